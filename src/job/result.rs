use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::state::RunState;
use crate::chain::TxHash;
use crate::error::Failure;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Confirmed { tx_hash: TxHash, block_number: u64 },
    Failed {
        failure: Failure,
        #[serde(skip_serializing_if = "Option::is_none")]
        tx_hash: Option<TxHash>,
    },
}

/// One try at submitting a step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionAttempt {
    /// 1-based.
    pub index: u32,
    pub started_at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
}

impl ExecutionAttempt {
    #[cfg(test)]
    pub fn failure(&self) -> Option<&Failure> {
        match &self.outcome {
            AttemptOutcome::Failed { failure, .. } => Some(failure),
            AttemptOutcome::Confirmed { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Disabled,
    /// An earlier step failed with `stop_on_failure` set.
    Halted,
    /// The run was interrupted by shutdown.
    Cancelled,
}

/// Terminal outcome of one step.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepResult {
    Succeeded {
        tx_hash: TxHash,
        attempts: Vec<ExecutionAttempt>,
    },
    Failed {
        error: Failure,
        attempt_count: u32,
        attempts: Vec<ExecutionAttempt>,
    },
    Skipped {
        reason: SkipReason,
    },
}

impl StepResult {
    /// A failure that happened before anything was submitted.
    pub fn rejected(error: Failure) -> Self {
        StepResult::Failed {
            error,
            attempt_count: 0,
            attempts: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StepResult::Succeeded { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, StepResult::Failed { .. })
    }

    #[cfg(test)]
    pub fn attempt_count(&self) -> u32 {
        match self {
            StepResult::Succeeded { attempts, .. } => attempts.len() as u32,
            StepResult::Failed { attempt_count, .. } => *attempt_count,
            StepResult::Skipped { .. } => 0,
        }
    }

    #[cfg(test)]
    pub fn attempts(&self) -> &[ExecutionAttempt] {
        match self {
            StepResult::Succeeded { attempts, .. } | StepResult::Failed { attempts, .. } => attempts,
            StepResult::Skipped { .. } => &[],
        }
    }

    #[cfg(test)]
    pub fn error(&self) -> Option<&Failure> {
        match self {
            StepResult::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepReport {
    pub index: usize,
    pub name: String,
    pub result: StepResult,
}

/// Everything a run produced. Always returned, whatever happened.
#[derive(Debug, Clone, Serialize)]
pub struct JobResult {
    pub job: String,
    pub run_id: Uuid,
    pub state: RunState,
    pub transitions: Vec<RunState>,
    pub steps: Vec<StepReport>,
    /// A failed step with `stop_on_failure` left later steps unattempted.
    pub halted: bool,
    /// Job-level failure, e.g. a configuration rejection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Failure>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl JobResult {
    pub fn is_success(&self) -> bool {
        self.state == RunState::Succeeded
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}
