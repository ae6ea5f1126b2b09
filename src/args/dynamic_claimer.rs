use async_trait::async_trait;
use rand::seq::SliceRandom;
use serde_json::Value;
use tracing::{info, warn};

use super::{ArgumentCalculator, CalculatorError, CalculatorInput};
use crate::chain::ChainReader;

/// Picks the reward recipient from `candidate_addresses`.
///
/// `selection_strategy` is `random` by default; `round_robin`, `performance`
/// and anything unrecognised take the first candidate.
pub struct DynamicClaimer;

#[async_trait]
impl ArgumentCalculator for DynamicClaimer {
    fn name(&self) -> &'static str {
        "dynamic_claimer"
    }

    fn arity(&self) -> usize {
        1
    }

    async fn calculate(
        &self,
        input: &CalculatorInput,
        _chain: &ChainReader,
    ) -> Result<Vec<Value>, CalculatorError> {
        let candidates = input.address_list("candidate_addresses")?;
        let strategy = input.str_or("selection_strategy", "random")?;

        let first = *candidates.first().ok_or_else(|| CalculatorError::InvalidInput {
            key: "candidate_addresses".into(),
            reason: "list is empty".into(),
        })?;

        let selected = match strategy {
            "random" => candidates
                .choose(&mut rand::thread_rng())
                .copied()
                .unwrap_or(first),
            "round_robin" | "performance" => first,
            other => {
                warn!(strategy = other, "Unknown selection strategy, using first candidate");
                first
            }
        };

        info!(address = %selected, strategy, "Recipient selected");
        Ok(vec![Value::String(selected.to_string())])
    }
}
