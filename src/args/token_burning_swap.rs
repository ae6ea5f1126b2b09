use async_trait::async_trait;
use rand::Rng;
use serde_json::Value;
use tracing::{info, warn};

use super::{ArgumentCalculator, CalculatorError, CalculatorInput, pow10};
use crate::chain::{ChainReader, Token, erc20};

/// Random swap amount for `swapBaseTokenForSubjectToken(amount, minAmountOut)`.
///
/// Picks a whole number in `[rand_min, rand_max]`, scales it by
/// `10^decimals` and refuses amounts above the base-token balance held by
/// the token-burning contract. `minAmountOut` is always 0.
pub struct TokenBurningSwap;

#[async_trait]
impl ArgumentCalculator for TokenBurningSwap {
    fn name(&self) -> &'static str {
        "token_burning_swap"
    }

    fn arity(&self) -> usize {
        2
    }

    async fn calculate(
        &self,
        input: &CalculatorInput,
        chain: &ChainReader,
    ) -> Result<Vec<Value>, CalculatorError> {
        let burning = input.required_address("token_burning_address")?;
        let base_token = input.required_address("base_token_address")?;
        let rand_min = input.u64_or("rand_min", 1)?;
        let rand_max = input.u64_or("rand_max", 100)?;
        let decimals = input.u64_or("decimals", 18)?;

        if rand_min > rand_max {
            return Err(CalculatorError::InvalidInput {
                key: "rand_max".into(),
                reason: format!("{rand_max} is below rand_min {rand_min}"),
            });
        }
        let scale = u32::try_from(decimals)
            .map_err(|e| e.to_string())
            .and_then(pow10)
            .map_err(|reason| CalculatorError::InvalidInput {
                key: "decimals".into(),
                reason,
            })?;

        let raw = rand::thread_rng().gen_range(rand_min..=rand_max);
        let amount = u128::from(raw)
            .checked_mul(scale)
            .ok_or_else(|| CalculatorError::Failed(format!("{raw} × 10^{decimals} overflows")))?;

        let balance = chain
            .call_uint(base_token, &erc20::balance_of(), &[Token::Address(burning)])
            .await?;
        info!(balance = %balance, raw_amount = raw, "Token burning balance checked");

        if amount > balance {
            warn!(amount = %amount, balance = %balance, "Random amount exceeds balance");
            return Err(CalculatorError::Failed(format!(
                "random amount {amount} exceeds available balance {balance}"
            )));
        }

        Ok(vec![Value::String(amount.to_string()), Value::String("0".into())])
    }
}
