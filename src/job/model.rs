use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveTime;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::chain::{Address, Network};
use crate::retry::RetryPolicy;
use crate::scheduler::Schedule;

/// A job or step definition that cannot be executed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("job name must not be empty")]
    EmptyName,

    #[error("job '{0}' has no steps")]
    NoSteps(String),

    #[error("step '{step}': {reason}")]
    InvalidStep { step: String, reason: String },

    #[error("step '{step}': set either `args` or `calculator`, not both")]
    ArgsAndCalculator { step: String },

    #[error("step '{step}': one of `args` or `calculator` is required")]
    NoArgumentSource { step: String },

    #[error("step '{step}': `gas_price` and `gas_price_multiplier` are mutually exclusive")]
    GasPriceAndMultiplier { step: String },

    #[error("invalid contract address '{value}' in step '{step}'")]
    InvalidAddress { step: String, value: String },

    #[error("unknown network '{value}' in step '{step}'")]
    UnknownNetwork { step: String, value: String },

    #[error("invalid schedule '{value}': {reason}")]
    InvalidSchedule { value: String, reason: String },

    #[error("invalid time window {start}-{end}: {reason}")]
    InvalidWindow {
        start: String,
        end: String,
        reason: String,
    },

    #[error("duplicate job name '{0}'")]
    DuplicateJob(String),

    #[error("job '{job}' is malformed: {reason}")]
    Malformed { job: String, reason: String },
}

/// Where a step's call arguments come from.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgSource {
    /// Literal values, coerced to the method's parameter types at encode time.
    Static(Vec<Value>),
    /// Computed by a registered calculator from `input` on every run.
    Calculated {
        calculator: String,
        input: Map<String, Value>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GasPrice {
    /// Explicit price in wei.
    Fixed(u128),
    /// Live network price scaled by `multiplier`, read on every attempt.
    Network { multiplier: f64 },
}

impl Default for GasPrice {
    fn default() -> Self {
        GasPrice::Network { multiplier: 1.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GasPolicy {
    /// Fixed gas limit; estimated when unset.
    pub limit: Option<u64>,
    pub price: GasPrice,
}

/// One contract method invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct JobStep {
    pub name: String,
    pub network: Network,
    pub contract: Address,
    pub abi: PathBuf,
    pub method: String,
    pub args: ArgSource,
    pub gas: GasPolicy,
    /// Native value sent with the call, in wei.
    pub value: u128,
    /// Estimate gas before sending even when the limit is fixed, so a
    /// deterministic revert never reaches the mempool.
    pub validate_before_send: bool,
    pub enabled: bool,
    pub retry: Option<RetryPolicy>,
}

impl JobStep {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let invalid = |reason: &str| ConfigurationError::InvalidStep {
            step: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(ConfigurationError::InvalidStep {
                step: self.method.clone(),
                reason: "step name must not be empty".into(),
            });
        }
        if self.method.trim().is_empty() {
            return Err(invalid("method must not be empty"));
        }
        if self.abi.as_os_str().is_empty() {
            return Err(invalid("abi path must not be empty"));
        }
        if let ArgSource::Calculated { calculator, .. } = &self.args {
            if calculator.trim().is_empty() {
                return Err(invalid("calculator name must not be empty"));
            }
        }
        if let GasPrice::Network { multiplier } = self.gas.price {
            if !multiplier.is_finite() || multiplier <= 0.0 {
                return Err(invalid("gas price multiplier must be a positive number"));
            }
        }
        if self.gas.limit == Some(0) {
            return Err(invalid("gas limit must be positive"));
        }
        Ok(())
    }
}

/// Daily UTC interval during which a job may run. Both ends are inclusive
/// and the window wraps midnight when `end < start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Result<Self, ConfigurationError> {
        if start == end {
            return Err(ConfigurationError::InvalidWindow {
                start: start.format("%H:%M").to_string(),
                end: end.format("%H:%M").to_string(),
                reason: "start and end must differ".into(),
            });
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start <= self.end {
            self.start <= time && time <= self.end
        } else {
            time >= self.start || time <= self.end
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MultiJob {
    pub steps: Vec<JobStep>,
    pub stop_on_failure: bool,
    pub delay_between_steps: Option<Duration>,
    /// Shared default for steps without their own policy.
    pub retry: Option<RetryPolicy>,
    pub allowed_windows: Vec<TimeWindow>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobKind {
    Simple(JobStep),
    Multi(MultiJob),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub name: String,
    pub schedule: Schedule,
    pub enabled: bool,
    pub kind: JobKind,
}

impl Job {
    pub fn steps(&self) -> &[JobStep] {
        match &self.kind {
            JobKind::Simple(step) => std::slice::from_ref(step),
            JobKind::Multi(multi) => &multi.steps,
        }
    }

    pub fn is_multi(&self) -> bool {
        matches!(self.kind, JobKind::Multi(_))
    }

    /// Job-wide retry default, if any.
    pub fn retry(&self) -> Option<RetryPolicy> {
        match &self.kind {
            JobKind::Simple(_) => None,
            JobKind::Multi(multi) => multi.retry,
        }
    }

    pub fn allowed_windows(&self) -> &[TimeWindow] {
        match &self.kind {
            JobKind::Simple(_) => &[],
            JobKind::Multi(multi) => &multi.allowed_windows,
        }
    }

    /// True when no windows are configured or `time` falls inside one.
    pub fn within_windows(&self, time: NaiveTime) -> bool {
        let windows = self.allowed_windows();
        windows.is_empty() || windows.iter().any(|w| w.contains(time))
    }

    /// Check the invariants the type system does not already enforce.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.name.trim().is_empty() {
            return Err(ConfigurationError::EmptyName);
        }
        if let JobKind::Multi(multi) = &self.kind {
            if multi.steps.is_empty() {
                return Err(ConfigurationError::NoSteps(self.name.clone()));
            }
            for window in &multi.allowed_windows {
                if window.start == window.end {
                    return Err(ConfigurationError::InvalidWindow {
                        start: window.start.format("%H:%M").to_string(),
                        end: window.end.format("%H:%M").to_string(),
                        reason: "start and end must differ".into(),
                    });
                }
            }
        }
        self.steps().iter().try_for_each(JobStep::validate)
    }
}
