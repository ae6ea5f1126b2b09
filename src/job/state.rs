use std::fmt;

use serde::{Deserialize, Serialize};

use super::result::{SkipReason, StepReport, StepResult};

/// Lifecycle of one job run.
///
/// Pending → Running → Succeeded | PartiallyFailed | Failed. A job rejected
/// before it starts goes straight from Pending to Failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Running,
    Succeeded,
    PartiallyFailed,
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Succeeded | RunState::PartiallyFailed | RunState::Failed
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Pending => write!(f, "PENDING"),
            RunState::Running => write!(f, "RUNNING"),
            RunState::Succeeded => write!(f, "SUCCEEDED"),
            RunState::PartiallyFailed => write!(f, "PARTIALLY_FAILED"),
            RunState::Failed => write!(f, "FAILED"),
        }
    }
}

/// The result of asking the machine to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Moved { from: RunState, to: RunState },
    /// Not a legal edge; the state is unchanged.
    Rejected { from: RunState, requested: RunState },
}

/// Drives a run through [`RunState`], recording every state it enters.
#[derive(Debug, Clone)]
pub struct RunStateMachine {
    state: RunState,
    history: Vec<RunState>,
}

impl Default for RunStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStateMachine {
    pub fn new() -> Self {
        Self {
            state: RunState::Pending,
            history: vec![RunState::Pending],
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// States entered so far, current state last.
    pub fn history(&self) -> &[RunState] {
        &self.history
    }

    pub fn advance(&mut self, next: RunState) -> Transition {
        let legal = match (self.state, next) {
            (RunState::Pending, RunState::Running) => true,
            (RunState::Pending, RunState::Failed) => true,
            (RunState::Running, to) => to.is_terminal(),
            _ => false,
        };
        if !legal {
            return Transition::Rejected {
                from: self.state,
                requested: next,
            };
        }
        let from = self.state;
        self.state = next;
        self.history.push(next);
        Transition::Moved { from, to: next }
    }

    /// Terminal state for a finished run.
    ///
    /// No failures and no cancellation → Succeeded. Any success next to a
    /// failure or cancellation → PartiallyFailed. With no success at all,
    /// a run that continues past failures is PartiallyFailed when a step
    /// failed, while a run that stops on failure (or a simple job) is Failed.
    pub fn settle(steps: &[StepReport], continue_on_failure: bool) -> RunState {
        let succeeded = steps.iter().filter(|s| s.result.is_success()).count();
        let failed = steps.iter().filter(|s| s.result.is_failure()).count();
        let cancelled = steps.iter().any(|s| {
            matches!(
                s.result,
                StepResult::Skipped {
                    reason: SkipReason::Cancelled
                }
            )
        });

        if failed == 0 && !cancelled {
            RunState::Succeeded
        } else if succeeded > 0 || (continue_on_failure && failed > 0) {
            RunState::PartiallyFailed
        } else {
            RunState::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::TxHash;
    use crate::error::{Failure, FailureKind};

    fn report(index: usize, result: StepResult) -> StepReport {
        StepReport {
            index,
            name: format!("step-{index}"),
            result,
        }
    }

    fn ok() -> StepResult {
        StepResult::Succeeded {
            tx_hash: TxHash([1; 32]),
            attempts: Vec::new(),
        }
    }

    fn failed() -> StepResult {
        StepResult::rejected(Failure::new(FailureKind::Revert, "boom"))
    }

    fn skipped(reason: SkipReason) -> StepResult {
        StepResult::Skipped { reason }
    }

    #[test]
    fn happy_path_walks_all_states() {
        let mut machine = RunStateMachine::new();
        assert_eq!(machine.state(), RunState::Pending);

        let t = machine.advance(RunState::Running);
        assert_eq!(
            t,
            Transition::Moved {
                from: RunState::Pending,
                to: RunState::Running
            }
        );
        machine.advance(RunState::Succeeded);
        assert_eq!(
            machine.history(),
            &[RunState::Pending, RunState::Running, RunState::Succeeded]
        );
    }

    #[test]
    fn terminal_states_are_absorbing() {
        let mut machine = RunStateMachine::new();
        machine.advance(RunState::Running);
        machine.advance(RunState::Failed);

        let t = machine.advance(RunState::Running);
        assert!(matches!(t, Transition::Rejected { .. }));
        assert_eq!(machine.state(), RunState::Failed);
        assert_eq!(machine.history().len(), 3);
    }

    #[test]
    fn pending_cannot_jump_to_success() {
        let mut machine = RunStateMachine::new();
        assert!(matches!(
            machine.advance(RunState::Succeeded),
            Transition::Rejected { .. }
        ));
        assert!(matches!(
            machine.advance(RunState::Failed),
            Transition::Moved { .. }
        ));
    }

    #[test]
    fn settle_all_succeeded() {
        let steps = vec![report(0, ok()), report(1, skipped(SkipReason::Disabled)), report(2, ok())];
        assert_eq!(RunStateMachine::settle(&steps, false), RunState::Succeeded);
        assert_eq!(RunStateMachine::settle(&steps, true), RunState::Succeeded);
    }

    #[test]
    fn settle_mixed_is_partial() {
        let steps = vec![report(0, ok()), report(1, failed()), report(2, skipped(SkipReason::Halted))];
        assert_eq!(RunStateMachine::settle(&steps, false), RunState::PartiallyFailed);
    }

    #[test]
    fn settle_first_step_failure_is_failed() {
        let steps = vec![report(0, failed()), report(1, skipped(SkipReason::Halted))];
        assert_eq!(RunStateMachine::settle(&steps, false), RunState::Failed);
    }

    #[test]
    fn settle_continue_mode_with_only_failures_is_partial() {
        let steps = vec![report(0, failed()), report(1, failed())];
        assert_eq!(RunStateMachine::settle(&steps, true), RunState::PartiallyFailed);
        assert_eq!(RunStateMachine::settle(&steps, false), RunState::Failed);
    }

    #[test]
    fn settle_cancellation_counts_as_failure() {
        let steps = vec![report(0, ok()), report(1, skipped(SkipReason::Cancelled))];
        assert_eq!(RunStateMachine::settle(&steps, true), RunState::PartiallyFailed);

        let steps = vec![report(0, skipped(SkipReason::Cancelled))];
        assert_eq!(RunStateMachine::settle(&steps, true), RunState::Failed);
    }

    #[test]
    fn state_display() {
        assert_eq!(RunState::Pending.to_string(), "PENDING");
        assert_eq!(RunState::PartiallyFailed.to_string(), "PARTIALLY_FAILED");
        assert_eq!(RunState::Failed.to_string(), "FAILED");
    }
}
