use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, Utc, Weekday};
use serde_json::Value;
use tracing::{debug, info};

use super::{ArgumentCalculator, CalculatorError, CalculatorInput};
use crate::chain::ChainReader;

const WEEKEND_BOOST: f64 = 1.5;
const MONTH_END_BOOST: f64 = 1.2;

/// Distribution amount from a base amount and calendar boosts.
///
/// `base_amount × multiplier`, boosted on weekends and in the last three days
/// of the month, then clamped to `[min_amount, max_amount]`.
pub struct TokenDistributor {
    clock: fn() -> DateTime<Utc>,
}

impl Default for TokenDistributor {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenDistributor {
    pub fn new() -> Self {
        Self { clock: Utc::now }
    }

    #[cfg(test)]
    pub fn with_clock(clock: fn() -> DateTime<Utc>) -> Self {
        Self { clock }
    }
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}

fn is_month_end(now: DateTime<Utc>) -> bool {
    now.day() + 3 > days_in_month(now.year(), now.month())
}

#[async_trait]
impl ArgumentCalculator for TokenDistributor {
    fn name(&self) -> &'static str {
        "token_distributor"
    }

    fn arity(&self) -> usize {
        1
    }

    async fn calculate(
        &self,
        input: &CalculatorInput,
        _chain: &ChainReader,
    ) -> Result<Vec<Value>, CalculatorError> {
        let base_amount = input.f64_or("base_amount", 100.0)?;
        let mut multiplier = input.f64_or("multiplier", 1.0)?;
        let max_amount = input.u64_or("max_amount", 1000)?;
        let min_amount = input.u64_or("min_amount", 10)?;

        if min_amount > max_amount {
            return Err(CalculatorError::InvalidInput {
                key: "max_amount".into(),
                reason: format!("{max_amount} is below min_amount {min_amount}"),
            });
        }

        let now = (self.clock)();
        if matches!(now.weekday(), Weekday::Sat | Weekday::Sun) {
            debug!("Applying weekend multiplier");
            multiplier *= WEEKEND_BOOST;
        }
        if is_month_end(now) {
            debug!("Applying month-end multiplier");
            multiplier *= MONTH_END_BOOST;
        }

        let raw = (base_amount * multiplier).floor();
        let amount = if raw <= 0.0 { 0 } else { raw as u64 };
        let amount = amount.clamp(min_amount, max_amount);

        info!(amount, "Distribution amount calculated");
        Ok(vec![Value::String(amount.to_string())])
    }
}
