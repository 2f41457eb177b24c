//! Task scheduler.
//!
//! Runs the periodic orchestration jobs and ad-hoc submissions on isolated
//! lanes. Every run is bounded by a hard timeout and handed a soft deadline
//! through its [`JobContext`].

mod config;
mod runner;
mod types;

pub use config::{AdhocTimeouts, JobSchedule, LaneConfig, SchedulerConfig};
pub use runner::Scheduler;
pub use types::{
    JobContext, JobError, JobFuture, JobOutcome, JobReport, JobRun, JobStatus, Lane,
    SchedulerError, SchedulerStatus,
};
