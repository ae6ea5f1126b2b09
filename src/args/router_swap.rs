use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde_json::Value;
use tracing::{debug, info};

use super::{ArgumentCalculator, CalculatorError, CalculatorInput, pow10};
use crate::chain::{ChainReader, Token, erc20};

/// Slippage is parsed with this many fractional digits of a percent.
const SLIPPAGE_SCALE: u32 = 4;
const HUNDRED_PERCENT: u128 = 100 * 10u128.pow(SLIPPAGE_SCALE);

/// Arguments for `swapExactTokensForTokens(amountIn, amountOutMin, path, to, deadline)`
/// on a UniswapV2-style router.
///
/// Reads the sender's balance of the input token, picks a batch size within
/// the configured bounds, applies the slippage limit and checks that the
/// router is already approved for the amount. Approval itself must be a
/// separate step, since calculators never submit.
pub struct RouterSwap {
    clock: fn() -> DateTime<Utc>,
}

impl Default for RouterSwap {
    fn default() -> Self {
        Self::new()
    }
}

impl RouterSwap {
    pub fn new() -> Self {
        Self { clock: Utc::now }
    }

    #[cfg(test)]
    pub fn with_clock(clock: fn() -> DateTime<Utc>) -> Self {
        Self { clock }
    }
}

fn invalid(key: &str, reason: impl Into<String>) -> CalculatorError {
    CalculatorError::InvalidInput {
        key: key.to_string(),
        reason: reason.into(),
    }
}

/// `amount × (100% − slippage)`, rounded down.
fn apply_slippage(amount: u128, slippage: u128) -> Result<u128, CalculatorError> {
    let keep = HUNDRED_PERCENT.saturating_sub(slippage);
    let min_out = amount
        .checked_mul(keep)
        .map(|v| v / HUNDRED_PERCENT)
        .ok_or_else(|| CalculatorError::Failed(format!("slippage on {amount} overflows")))?;
    if min_out == 0 {
        return Err(CalculatorError::Failed(
            "slippage leaves a non-positive minimum output".into(),
        ));
    }
    Ok(min_out)
}

#[async_trait]
impl ArgumentCalculator for RouterSwap {
    fn name(&self) -> &'static str {
        "router_swap"
    }

    fn arity(&self) -> usize {
        5
    }

    async fn calculate(
        &self,
        input: &CalculatorInput,
        chain: &ChainReader,
    ) -> Result<Vec<Value>, CalculatorError> {
        let token_in = input.required_address("usdt_token_address")?;
        let token_out = input.required_address("czusd_token_address")?;
        let router = input.required_address("router_address")?;
        let target = input.required_address("target_address")?;
        let owner = input
            .optional_address("relayer_address")?
            .unwrap_or_else(|| chain.sender());

        let decimals = u32::try_from(input.u64_or("decimals", 18)?)
            .map_err(|e| invalid("decimals", e.to_string()))?;
        pow10(decimals).map_err(|e| invalid("decimals", e))?;
        let min_swap = input.decimal_or("min_swap_amount", "50", decimals)?;
        let max_swap = input.decimal_or("max_swap_amount", "150", decimals)?;
        let slippage = input.decimal_or("max_slippage_percent", "2", SLIPPAGE_SCALE)?;
        let precision = u32::try_from(input.u64_or("random_precision", 2)?)
            .map_err(|e| invalid("random_precision", e.to_string()))?
            .min(decimals);
        let deadline_seconds = input.u64_or("deadline_seconds", 600)?;

        if max_swap < min_swap {
            return Err(invalid("max_swap_amount", "cannot be less than min_swap_amount"));
        }
        if slippage >= HUNDRED_PERCENT {
            return Err(invalid("max_slippage_percent", "must be below 100"));
        }
        let deadline = ((self.clock)().timestamp().max(0) as u64)
            .checked_add(deadline_seconds)
            .ok_or_else(|| invalid("deadline_seconds", "deadline overflows a unix timestamp"))?;

        let balance = chain
            .call_uint(token_in, &erc20::balance_of(), &[Token::Address(owner)])
            .await?;
        info!(owner = %owner, balance = %balance, "Input token balance detected");
        if balance < min_swap {
            return Err(CalculatorError::Failed(format!(
                "balance {balance} below minimum batch size {min_swap}"
            )));
        }

        // Amounts are drawn on a grid of `random_precision` fractional digits.
        let step = pow10(decimals - precision).map_err(CalculatorError::Failed)?;
        let low = min_swap / step;
        let high = balance.min(max_swap) / step;
        let amount_in = if high < low {
            min_swap
        } else {
            rand::thread_rng().gen_range(low..=high) * step
        };
        let min_out = apply_slippage(amount_in, slippage)?;

        let allowance = chain
            .call_uint(
                token_in,
                &erc20::allowance(),
                &[Token::Address(owner), Token::Address(router)],
            )
            .await?;
        if allowance < amount_in {
            return Err(CalculatorError::Failed(format!(
                "router allowance {allowance} below required {amount_in}; approve the router first"
            )));
        }
        debug!(allowance = %allowance, "Router allowance sufficient");

        info!(amount_in = %amount_in, min_out = %min_out, deadline, "Swap arguments prepared");

        Ok(vec![
            Value::String(amount_in.to_string()),
            Value::String(min_out.to_string()),
            Value::Array(vec![
                Value::String(token_in.to_string()),
                Value::String(token_out.to_string()),
            ]),
            Value::String(target.to_string()),
            Value::String(deadline.to_string()),
        ])
    }
}
