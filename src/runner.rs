//! Drives one job run through its steps and the [`RunState`] machine.

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

use crate::args::ArgumentResolver;
use crate::error::{Failure, FailureKind};
use crate::executor::TransactionExecutor;
use crate::job::{
    Job, JobKind, JobResult, JobStep, RunState, RunStateMachine, SkipReason, StepReport, StepResult,
    Transition,
};
use crate::retry::{RetryPolicy, pause};

pub struct JobRunner {
    resolver: ArgumentResolver,
    executor: TransactionExecutor,
    default_retry: RetryPolicy,
    cancel: CancellationToken,
}

impl JobRunner {
    pub fn new(
        resolver: ArgumentResolver,
        executor: TransactionExecutor,
        default_retry: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            resolver,
            executor,
            default_retry,
            cancel,
        }
    }

    /// Run `job` once. Never fails: every outcome ends up in the result.
    ///
    /// Must not be called concurrently for the same job; the scheduler
    /// serialises runs per job.
    pub async fn run(&self, job: &Job) -> JobResult {
        let run_id = Uuid::new_v4();
        let span = info_span!("run", job = %job.name, %run_id);
        self.run_inner(job, run_id).instrument(span).await
    }

    async fn run_inner(&self, job: &Job, run_id: Uuid) -> JobResult {
        let started_at = Utc::now();
        let mut machine = RunStateMachine::new();

        if let Err(e) = job.validate() {
            warn!(error = %e, "Job rejected");
            machine.advance(RunState::Failed);
            return JobResult {
                job: job.name.clone(),
                run_id,
                state: machine.state(),
                transitions: machine.history().to_vec(),
                steps: Vec::new(),
                halted: false,
                error: Some(Failure::new(FailureKind::Configuration, e.to_string())),
                started_at,
                finished_at: Utc::now(),
            };
        }

        machine.advance(RunState::Running);
        let (stop_on_failure, delay) = match &job.kind {
            JobKind::Simple(_) => (false, None),
            JobKind::Multi(multi) => (multi.stop_on_failure, multi.delay_between_steps),
        };
        info!(steps = job.steps().len(), "Job started");

        let mut reports = Vec::with_capacity(job.steps().len());
        let mut stopping = false;
        let mut halted = false;
        let mut cancelled = false;
        let mut attempted_any = false;

        for (index, step) in job.steps().iter().enumerate() {
            let skip = if stopping {
                halted = true;
                Some(SkipReason::Halted)
            } else if cancelled || self.cancel.is_cancelled() {
                cancelled = true;
                Some(SkipReason::Cancelled)
            } else if !step.enabled {
                Some(SkipReason::Disabled)
            } else {
                None
            };
            if let Some(reason) = skip {
                info!(step = %step.name, ?reason, "Step skipped");
                reports.push(StepReport {
                    index,
                    name: step.name.clone(),
                    result: StepResult::Skipped { reason },
                });
                continue;
            }

            if let Some(delay) = delay.filter(|_| attempted_any) {
                info!(delay_secs = delay.as_secs_f64(), "Waiting before next step");
                if !pause(delay, &self.cancel).await {
                    cancelled = true;
                    reports.push(StepReport {
                        index,
                        name: step.name.clone(),
                        result: StepResult::Skipped {
                            reason: SkipReason::Cancelled,
                        },
                    });
                    continue;
                }
            }

            attempted_any = true;
            let result = self.run_step(job, step).await;
            if result.is_failure() {
                if self.cancel.is_cancelled() {
                    cancelled = true;
                } else if stop_on_failure {
                    warn!(step = %step.name, "Step failed, halting remaining steps");
                    stopping = true;
                }
            }
            reports.push(StepReport {
                index,
                name: step.name.clone(),
                result,
            });
        }

        let continue_on_failure = job.is_multi() && !stop_on_failure;
        let state = RunStateMachine::settle(&reports, continue_on_failure);
        if let Transition::Rejected { from, requested } = machine.advance(state) {
            warn!(%from, %requested, "Illegal run state transition ignored");
        }

        let finished_at = Utc::now();
        let failed = reports.iter().filter(|r| r.result.is_failure()).count();
        match state {
            RunState::Succeeded => info!(%state, "Job finished"),
            _ => warn!(%state, failed, halted, "Job finished with failures"),
        }

        JobResult {
            job: job.name.clone(),
            run_id,
            state,
            transitions: machine.history().to_vec(),
            steps: reports,
            halted,
            error: None,
            started_at,
            finished_at,
        }
    }

    /// Resolve once, then hand off to the executor. Argument errors are
    /// permanent and recorded with no attempts.
    async fn run_step(&self, job: &Job, step: &JobStep) -> StepResult {
        let policy = step.retry.or(job.retry()).unwrap_or(self.default_retry);

        let args = match self.resolver.resolve(step).await {
            Ok(args) => args,
            Err(e) => {
                warn!(step = %step.name, error = %e, "Argument resolution failed");
                return StepResult::rejected(Failure::from(&e));
            }
        };

        self.executor.submit(step, &args, policy, &self.cancel).await
    }
}
