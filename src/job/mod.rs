mod model;
mod result;
mod state;

pub use model::{
    ArgSource, ConfigurationError, GasPolicy, GasPrice, Job, JobKind, JobStep, MultiJob, TimeWindow,
};
pub use result::{AttemptOutcome, ExecutionAttempt, JobResult, SkipReason, StepReport, StepResult};
pub use state::{RunState, RunStateMachine, Transition};
