//! Argument resolution for job steps.
//!
//! Static arguments pass through untouched. Calculated arguments come from an
//! [`ArgumentCalculator`] looked up by name in a [`CalculatorRegistry`] that
//! is filled once at start-up.

mod dynamic_claimer;
mod router_swap;
mod token_burning_swap;
mod token_distributor;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info};

use crate::chain::{Address, ChainClient, ChainError, ChainReader};
use crate::error::{Failure, FailureKind};
use crate::job::{ArgSource, JobStep};

pub use dynamic_claimer::DynamicClaimer;
pub use router_swap::RouterSwap;
pub use token_burning_swap::TokenBurningSwap;
pub use token_distributor::TokenDistributor;

/// Errors raised inside a calculator.
#[derive(Debug, Error)]
pub enum CalculatorError {
    #[error("missing required input '{0}'")]
    MissingInput(String),

    #[error("invalid input '{key}': {reason}")]
    InvalidInput { key: String, reason: String },

    #[error("chain read failed: {0}")]
    Chain(#[from] ChainError),

    #[error("{0}")]
    Failed(String),
}

/// Why a step's arguments could not be produced.
#[derive(Debug, Error)]
pub enum ArgumentError {
    #[error("calculator '{0}' is not registered")]
    NotFound(String),

    #[error("calculator '{calculator}' requires input '{key}'")]
    MissingInput { calculator: String, key: String },

    #[error("calculator '{calculator}' failed: {source}")]
    CalculationFailed {
        calculator: String,
        #[source]
        source: CalculatorError,
    },
}

impl From<&ArgumentError> for Failure {
    fn from(err: &ArgumentError) -> Self {
        Failure::new(FailureKind::Argument, err.to_string())
    }
}

/// Computes call arguments for a contract method, possibly from chain state.
///
/// The number and order of values is fixed per calculator even though the
/// values change between runs.
#[async_trait]
pub trait ArgumentCalculator: Send + Sync {
    fn name(&self) -> &'static str;

    /// Number of values every successful call returns.
    fn arity(&self) -> usize;

    async fn calculate(
        &self,
        input: &CalculatorInput,
        chain: &ChainReader,
    ) -> Result<Vec<Value>, CalculatorError>;
}

/// The `input` table of a calculated step, with typed accessors.
#[derive(Debug, Clone, Default)]
pub struct CalculatorInput {
    values: Map<String, Value>,
}

impl CalculatorInput {
    pub fn new(values: Map<String, Value>) -> Self {
        Self { values }
    }

    fn present(&self, key: &str) -> Option<&Value> {
        self.values.get(key).filter(|v| !v.is_null())
    }

    fn invalid(key: &str, reason: impl Into<String>) -> CalculatorError {
        CalculatorError::InvalidInput {
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    pub fn required_str(&self, key: &str) -> Result<&str, CalculatorError> {
        match self.present(key) {
            None => Err(CalculatorError::MissingInput(key.to_string())),
            Some(Value::String(s)) if !s.trim().is_empty() => Ok(s),
            Some(_) => Err(Self::invalid(key, "expected a non-empty string")),
        }
    }

    pub fn str_or<'a>(&'a self, key: &str, default: &'a str) -> Result<&'a str, CalculatorError> {
        match self.present(key) {
            None => Ok(default),
            Some(Value::String(s)) => Ok(s),
            Some(_) => Err(Self::invalid(key, "expected a string")),
        }
    }

    pub fn required_address(&self, key: &str) -> Result<Address, CalculatorError> {
        self.required_str(key)?
            .parse()
            .map_err(|e: String| Self::invalid(key, e))
    }

    pub fn optional_address(&self, key: &str) -> Result<Option<Address>, CalculatorError> {
        if self.present(key).is_none() {
            return Ok(None);
        }
        self.required_address(key).map(Some)
    }

    pub fn u64_or(&self, key: &str, default: u64) -> Result<u64, CalculatorError> {
        match self.present(key) {
            None => Ok(default),
            Some(Value::Number(n)) => n
                .as_u64()
                .ok_or_else(|| Self::invalid(key, "expected a non-negative integer")),
            Some(Value::String(s)) => s
                .trim()
                .parse()
                .map_err(|_| Self::invalid(key, "expected a non-negative integer")),
            Some(_) => Err(Self::invalid(key, "expected a non-negative integer")),
        }
    }

    pub fn f64_or(&self, key: &str, default: f64) -> Result<f64, CalculatorError> {
        let value = match self.present(key) {
            None => return Ok(default),
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().parse().ok(),
            Some(_) => None,
        };
        match value {
            Some(v) if v.is_finite() => Ok(v),
            _ => Err(Self::invalid(key, "expected a number")),
        }
    }

    /// A decimal amount as a fixed-point integer with `scale` fractional
    /// digits, rounded down.
    pub fn decimal_or(&self, key: &str, default: &str, scale: u32) -> Result<u128, CalculatorError> {
        let text = match self.present(key) {
            None => default.to_string(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::String(s)) => s.trim().to_string(),
            Some(_) => return Err(Self::invalid(key, "expected a decimal number")),
        };
        parse_decimal(&text, scale).map_err(|e| Self::invalid(key, e))
    }

    pub fn address_list(&self, key: &str) -> Result<Vec<Address>, CalculatorError> {
        let items = match self.present(key) {
            None => return Err(CalculatorError::MissingInput(key.to_string())),
            Some(Value::Array(items)) => items,
            Some(_) => return Err(Self::invalid(key, "expected a list of addresses")),
        };
        items
            .iter()
            .map(|item| {
                item.as_str()
                    .ok_or_else(|| Self::invalid(key, "expected address strings"))?
                    .parse()
                    .map_err(|e: String| Self::invalid(key, e))
            })
            .collect()
    }
}

/// `10^exp`, failing beyond what fits in 128 bits.
pub(crate) fn pow10(exp: u32) -> Result<u128, String> {
    10u128
        .checked_pow(exp)
        .ok_or_else(|| format!("10^{exp} does not fit in 128 bits"))
}

/// Parse `"12.5"` into `12.5 × 10^scale`, dropping digits past `scale`.
pub(crate) fn parse_decimal(text: &str, scale: u32) -> Result<u128, String> {
    let (whole, frac) = match text.split_once('.') {
        Some((w, f)) => (w, f),
        None => (text, ""),
    };
    let digits_ok = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if (whole.is_empty() && frac.is_empty()) || !digits_ok(whole) || !digits_ok(frac) {
        return Err(format!("'{text}' is not a non-negative decimal number"));
    }

    let overflow = || format!("'{text}' is too large");
    let whole: u128 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| overflow())?
    };
    let mut value = whole.checked_mul(pow10(scale)?).ok_or_else(overflow)?;

    for (i, c) in frac.chars().take(scale as usize).enumerate() {
        let digit = u128::from(c.to_digit(10).unwrap_or(0));
        let place = pow10(scale - 1 - i as u32)?;
        value = value.checked_add(digit * place).ok_or_else(overflow)?;
    }
    Ok(value)
}

/// Name → calculator lookup, populated once at start-up.
#[derive(Clone, Default)]
pub struct CalculatorRegistry {
    calculators: HashMap<&'static str, Arc<dyn ArgumentCalculator>>,
}

impl CalculatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in calculator.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(TokenBurningSwap));
        registry.register(Arc::new(TokenDistributor::new()));
        registry.register(Arc::new(DynamicClaimer));
        registry.register(Arc::new(RouterSwap::new()));
        registry
    }

    /// Add a calculator, replacing any previous one with the same name.
    pub fn register(&mut self, calculator: Arc<dyn ArgumentCalculator>) -> Option<Arc<dyn ArgumentCalculator>> {
        self.calculators.insert(calculator.name(), calculator)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ArgumentCalculator>> {
        self.calculators.get(name).cloned()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.calculators.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

/// Produces the ordered call arguments for a step.
pub struct ArgumentResolver {
    registry: Arc<CalculatorRegistry>,
    client: Arc<dyn ChainClient>,
}

impl ArgumentResolver {
    pub fn new(registry: Arc<CalculatorRegistry>, client: Arc<dyn ChainClient>) -> Self {
        Self { registry, client }
    }

    /// Resolve `step`'s arguments. Performs chain reads at most; never submits.
    pub async fn resolve(&self, step: &JobStep) -> Result<Vec<Value>, ArgumentError> {
        let (name, input) = match &step.args {
            ArgSource::Static(values) => return Ok(values.clone()),
            ArgSource::Calculated { calculator, input } => (calculator, input),
        };

        let calculator = self
            .registry
            .get(name)
            .ok_or_else(|| ArgumentError::NotFound(name.clone()))?;

        debug!(step = %step.name, calculator = %name, "Calculating arguments");
        let reader = ChainReader::new(Arc::clone(&self.client), step.network);
        let input = CalculatorInput::new(input.clone());
        let values = calculator
            .calculate(&input, &reader)
            .await
            .map_err(|source| match source {
                CalculatorError::MissingInput(key) => ArgumentError::MissingInput {
                    calculator: name.clone(),
                    key,
                },
                source => ArgumentError::CalculationFailed {
                    calculator: name.clone(),
                    source,
                },
            })?;

        if values.len() != calculator.arity() {
            return Err(ArgumentError::CalculationFailed {
                calculator: name.clone(),
                source: CalculatorError::Failed(format!(
                    "returned {} values, expected {}",
                    values.len(),
                    calculator.arity()
                )),
            });
        }

        let shown = Value::Array(values.clone());
        info!(step = %step.name, calculator = %name, args = %shown, "Arguments calculated");
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockChain, calculated_step, static_step};
    use serde_json::json;

    struct Fixed(Vec<Value>, usize);

    #[async_trait]
    impl ArgumentCalculator for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn arity(&self) -> usize {
            self.1
        }

        async fn calculate(
            &self,
            _input: &CalculatorInput,
            _chain: &ChainReader,
        ) -> Result<Vec<Value>, CalculatorError> {
            Ok(self.0.clone())
        }
    }

    fn resolver(registry: CalculatorRegistry) -> (ArgumentResolver, Arc<MockChain>) {
        let chain = Arc::new(MockChain::new());
        let client: Arc<dyn ChainClient> = chain.clone();
        (ArgumentResolver::new(Arc::new(registry), client), chain)
    }

    #[tokio::test]
    async fn static_args_are_returned_unchanged() {
        let (resolver, chain) = resolver(CalculatorRegistry::new());
        let args = vec![json!("0x00000000000000000000000000000000000000aa"), json!(5), json!(true)];
        let step = static_step("transfer", args.clone());

        assert_eq!(resolver.resolve(&step).await.unwrap(), args);
        assert_eq!(resolver.resolve(&step).await.unwrap(), args);
        assert!(chain.submitted().is_empty());
    }

    #[tokio::test]
    async fn calculated_args_are_returned() {
        let mut registry = CalculatorRegistry::new();
        registry.register(Arc::new(Fixed(vec![json!("7"), json!(0)], 2)));
        let (resolver, chain) = resolver(registry);
        let step = calculated_step("swap", "fixed", json!({}));

        assert_eq!(resolver.resolve(&step).await.unwrap(), vec![json!("7"), json!(0)]);
        assert!(chain.submitted().is_empty());
    }

    #[tokio::test]
    async fn unknown_calculator_is_not_found() {
        let (resolver, chain) = resolver(CalculatorRegistry::with_builtins());
        let step = calculated_step("claim", "does_not_exist", json!({}));

        let err = resolver.resolve(&step).await.unwrap_err();
        assert!(matches!(err, ArgumentError::NotFound(ref name) if name == "does_not_exist"));
        assert!(chain.submitted().is_empty());
    }

    #[tokio::test]
    async fn wrong_shape_is_a_calculation_failure() {
        let mut registry = CalculatorRegistry::new();
        registry.register(Arc::new(Fixed(vec![json!("1")], 2)));
        let (resolver, _) = resolver(registry);
        let step = calculated_step("swap", "fixed", json!({}));

        let err = resolver.resolve(&step).await.unwrap_err();
        assert!(matches!(err, ArgumentError::CalculationFailed { .. }));
        assert!(err.to_string().contains("returned 1 values, expected 2"));
    }

    #[tokio::test]
    async fn missing_required_input_is_reported() {
        let (resolver, _) = resolver(CalculatorRegistry::with_builtins());
        let step = calculated_step("burn", "token_burning_swap", json!({ "rand_min": 1 }));

        let err = resolver.resolve(&step).await.unwrap_err();
        match err {
            ArgumentError::MissingInput { calculator, key } => {
                assert_eq!(calculator, "token_burning_swap");
                assert_eq!(key, "token_burning_address");
            }
            other => panic!("expected MissingInput, got {other:?}"),
        }
    }

    #[test]
    fn argument_errors_are_permanent_failures() {
        let failure = Failure::from(&ArgumentError::NotFound("x".into()));
        assert_eq!(failure.kind, FailureKind::Argument);
        assert!(!failure.is_transient());
    }

    #[test]
    fn builtins_are_registered() {
        let registry = CalculatorRegistry::with_builtins();
        assert_eq!(
            registry.names(),
            vec!["dynamic_claimer", "router_swap", "token_burning_swap", "token_distributor"]
        );
    }

    #[test]
    fn register_replaces_by_name() {
        let mut registry = CalculatorRegistry::new();
        assert!(registry.register(Arc::new(Fixed(vec![], 0))).is_none());
        assert!(registry.register(Arc::new(Fixed(vec![], 0))).is_some());
        assert!(registry.get("fixed").is_some());
    }

    #[test]
    fn parse_decimal_scales_and_truncates() {
        assert_eq!(parse_decimal("50", 2).unwrap(), 5000);
        assert_eq!(parse_decimal("1.5", 18).unwrap(), 1_500_000_000_000_000_000);
        assert_eq!(parse_decimal("0.129", 2).unwrap(), 12);
        assert_eq!(parse_decimal(".5", 1).unwrap(), 5);
        assert!(parse_decimal("-1", 2).is_err());
        assert!(parse_decimal("abc", 2).is_err());
        assert!(parse_decimal(".", 2).is_err());
    }

    #[test]
    fn input_accessors_apply_defaults() {
        let input = CalculatorInput::new(
            json!({ "n": "7", "f": 1.5, "addr": "0x00000000000000000000000000000000000000aa", "nil": null })
                .as_object()
                .cloned()
                .unwrap(),
        );
        assert_eq!(input.u64_or("n", 1).unwrap(), 7);
        assert_eq!(input.u64_or("nil", 3).unwrap(), 3);
        assert_eq!(input.f64_or("f", 0.0).unwrap(), 1.5);
        assert_eq!(input.str_or("missing", "random").unwrap(), "random");
        assert!(input.optional_address("addr").unwrap().is_some());
        assert!(input.optional_address("missing").unwrap().is_none());
        assert!(matches!(
            input.required_str("missing"),
            Err(CalculatorError::MissingInput(_))
        ));
        assert!(matches!(input.u64_or("f", 0), Err(CalculatorError::InvalidInput { .. })));
    }
}
