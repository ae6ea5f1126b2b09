//! Scheduler loop: one task per job, each sleeping in `tick` steps until its
//! next trigger, so a job is never re-entered while it is still running.

mod schedule;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub use schedule::{Schedule, is_due};

use crate::job::{Job, JobResult, StepResult};
use crate::retry::pause;
use crate::runner::JobRunner;

pub struct Scheduler {
    runner: Arc<JobRunner>,
    jobs: Vec<Arc<Job>>,
    tick: Duration,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(runner: Arc<JobRunner>, jobs: Vec<Job>, tick: Duration, cancel: CancellationToken) -> Self {
        Self {
            runner,
            jobs: jobs.into_iter().map(Arc::new).collect(),
            tick,
            cancel,
        }
    }

    pub fn jobs(&self) -> &[Arc<Job>] {
        &self.jobs
    }

    /// Run every enabled job once, concurrently, ignoring schedules but not
    /// allowed windows. Results come back in configuration order.
    pub async fn run_once(&self) -> Vec<JobResult> {
        let now = Utc::now();
        let mut set = JoinSet::new();

        for (position, job) in self.jobs.iter().enumerate() {
            if !job.enabled {
                info!(job = %job.name, "Job disabled, not running");
                continue;
            }
            if !is_due(job, now, now) {
                info!(job = %job.name, "Outside allowed time windows, not running");
                continue;
            }
            let runner = Arc::clone(&self.runner);
            let job = Arc::clone(job);
            set.spawn(async move { (position, runner.run(&job).await) });
        }

        let mut results = Vec::with_capacity(set.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((position, result)) => {
                    log_result(&result);
                    results.push((position, result));
                }
                Err(e) => error!(error = %e, "Job task failed"),
            }
        }
        results.sort_by_key(|(position, _)| *position);
        results.into_iter().map(|(_, result)| result).collect()
    }

    /// Run until the cancellation token fires. Returns the number of runs.
    pub async fn run(&self) -> u64 {
        let mut set = JoinSet::new();
        for job in self.jobs.iter().filter(|j| j.enabled) {
            set.spawn(job_loop(
                Arc::clone(&self.runner),
                Arc::clone(job),
                self.tick,
                self.cancel.clone(),
            ));
        }
        if set.is_empty() {
            warn!("No enabled jobs to schedule");
            return 0;
        }
        info!(jobs = set.len(), tick_secs = self.tick.as_secs_f64(), "Scheduler running");

        let mut runs = 0;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(count) => runs += count,
                Err(e) => error!(error = %e, "Job task failed"),
            }
        }
        info!(runs, "Scheduler stopped");
        runs
    }
}

async fn job_loop(runner: Arc<JobRunner>, job: Arc<Job>, tick: Duration, cancel: CancellationToken) -> u64 {
    let mut rng = StdRng::from_entropy();
    let mut next = job.schedule.next_run(Utc::now(), &mut rng);
    info!(job = %job.name, schedule = %job.schedule, next_run = %next, "Job scheduled");

    let mut runs = 0;
    while pause(tick, &cancel).await {
        let now = Utc::now();
        if now < next {
            continue;
        }
        if is_due(&job, next, now) {
            let result = runner.run(&job).await;
            log_result(&result);
            runs += 1;
        } else {
            info!(job = %job.name, "Outside allowed time windows, skipping occurrence");
        }
        next = job.schedule.next_run(Utc::now(), &mut rng);
        debug!(job = %job.name, next_run = %next, "Rescheduled");
    }
    runs
}

/// Summarise a finished run, with enough detail on failed steps to
/// diagnose them without re-running.
pub fn log_result(result: &JobResult) {
    if let Some(error) = &result.error {
        error!(job = %result.job, run_id = %result.run_id, error = %error, "Job rejected");
        return;
    }
    for report in &result.steps {
        match &report.result {
            StepResult::Succeeded { tx_hash, attempts } => info!(
                job = %result.job,
                step = %report.name,
                tx_hash = %tx_hash,
                attempts = attempts.len(),
                "Step succeeded"
            ),
            StepResult::Failed {
                error,
                attempt_count,
                ..
            } => error!(
                job = %result.job,
                step = %report.name,
                kind = %error.kind,
                class = %error.class,
                attempt_count,
                error = %error.message,
                "Step failed"
            ),
            StepResult::Skipped { reason } => {
                debug!(job = %result.job, step = %report.name, ?reason, "Step skipped")
            }
        }
    }
    info!(
        job = %result.job,
        run_id = %result.run_id,
        state = %result.state,
        halted = result.halted,
        duration_ms = result.duration_ms(),
        "Run complete"
    );
}
