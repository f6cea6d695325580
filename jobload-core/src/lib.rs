mod error;
mod poll;
mod scenario;
mod scheduler;
mod signal;
mod transport;

pub mod config;
pub mod metrics;
pub mod report;
pub mod run;
pub mod schedule;
pub mod thresholds;
pub mod wire;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
pub use poll::{JobPoller, PollOutcome, PollState};
pub use run::{RunOptions, RunProgress, RunProgressFn, run};
pub use scenario::{IterationFailure, IterationOutcome, ScenarioExecutor, idempotency_key};
pub use scheduler::{
    RampOutcome, RampProgress, RampProgressFn, RampScheduler, VuContext, VuGauges,
};
pub use signal::StopSignal;
pub use transport::{CallKind, CallOutcome, JobApi, Transport};
