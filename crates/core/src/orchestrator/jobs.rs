//! Registration of the orchestrator's periodic jobs with the scheduler.

use std::sync::Arc;

use super::LifecycleOrchestrator;
use crate::scheduler::{JobError, Lane, Scheduler, SchedulerConfig, SchedulerError};

pub const RECONCILE_STATUSES: &str = "reconcile_statuses";
pub const PROCESS_LIFECYCLE: &str = "process_lifecycle";
pub const HEALTH_CHECK: &str = "health_check";

/// Register reconcile-statuses, process-lifecycle and health-check on their lanes.
pub fn register_jobs(
    scheduler: &Scheduler,
    orchestrator: Arc<LifecycleOrchestrator>,
    config: &SchedulerConfig,
) -> Result<(), SchedulerError> {
    let o = Arc::clone(&orchestrator);
    scheduler.every(
        RECONCILE_STATUSES,
        Lane::Status,
        config.reconcile_statuses,
        move |ctx| {
            let o = Arc::clone(&o);
            async move { o.reconcile_statuses(&ctx).await.map_err(JobError::from) }
        },
    )?;

    let o = Arc::clone(&orchestrator);
    scheduler.every(
        PROCESS_LIFECYCLE,
        Lane::Lifecycle,
        config.process_lifecycle,
        move |ctx| {
            let o = Arc::clone(&o);
            async move { o.process_lifecycle(&ctx).await.map_err(JobError::from) }
        },
    )?;

    let o = orchestrator;
    scheduler.every(
        HEALTH_CHECK,
        Lane::Provisioning,
        config.health_check,
        move |ctx| {
            let o = Arc::clone(&o);
            async move { o.health_check(&ctx).await.map_err(JobError::from) }
        },
    )?;

    Ok(())
}
