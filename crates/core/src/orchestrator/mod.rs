//! Lifecycle orchestrator.
//!
//! The control loop behind the scheduled jobs:
//! - **reconcile-statuses**: re-derive every workshop's status from its attendees
//! - **process-lifecycle**: reclaim stale deployments, provision waiting
//!   attendees, tear down workshops whose deletion is due
//! - **health-check**: probe active attendees and fail persistent misses
//!
//! Every status write emits an audit event and a notification.

mod config;
mod jobs;
mod runner;
mod types;

pub use config::OrchestratorConfig;
pub use jobs::{register_jobs, HEALTH_CHECK, PROCESS_LIFECYCLE, RECONCILE_STATUSES};
pub use runner::LifecycleOrchestrator;
pub use types::{AttendeeStatusReport, OperationResult, OrchestratorError, WorkshopStatusReport};
