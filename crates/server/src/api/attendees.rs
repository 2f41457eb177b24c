//! Attendee API handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use provisioner_core::scheduler::JobError;
use provisioner_core::{
    AttendeeStatusReport, DeploymentAction, DeploymentLog, JobReport, Lane, OperationResult,
};

use super::error::ApiError;
use crate::state::AppState;

/// Response for an accepted background operation
#[derive(Debug, Serialize)]
pub struct AcceptedResponse {
    pub attendee_id: String,
    pub job: String,
}

/// Attendee status with its in-progress operation
pub async fn get_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<AttendeeStatusReport>, ApiError> {
    Ok(Json(state.orchestrator().attendee_status(&id)?))
}

/// Deployment history, newest first
pub async fn list_deployments(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<DeploymentLog>>, ApiError> {
    Ok(Json(state.orchestrator().deployment_history(&id)?))
}

/// Re-provision an attendee on the provisioning lane
pub async fn provision(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<AcceptedResponse>), ApiError> {
    submit(&state, id, Operation::Provision)
}

/// Tear an attendee down on the provisioning lane
pub async fn teardown(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<AcceptedResponse>), ApiError> {
    submit(&state, id, Operation::Teardown)
}

#[derive(Debug, Clone, Copy)]
enum Operation {
    Provision,
    Teardown,
}

impl Operation {
    fn job_name(&self) -> &'static str {
        match self {
            Operation::Provision => "provision-attendee",
            Operation::Teardown => "teardown-attendee",
        }
    }

    fn action(&self) -> DeploymentAction {
        match self {
            Operation::Provision => DeploymentAction::Apply,
            Operation::Teardown => DeploymentAction::Destroy,
        }
    }
}

fn submit(
    state: &AppState,
    attendee_id: String,
    operation: Operation,
) -> Result<(StatusCode, Json<AcceptedResponse>), ApiError> {
    // Reject up front what the job would reject, so the caller gets the reason:
    // 409 for an operation in progress, 422 for a state that forbids it.
    state
        .orchestrator()
        .check_operation(&attendee_id, operation.action())?;

    let orchestrator = Arc::clone(state.orchestrator());
    let id = attendee_id.clone();
    let job = operation.job_name();

    // The handle is dropped; the run is recorded in the scheduler status.
    let _handle = state
        .scheduler()
        .submit(Lane::Provisioning, job, move |ctx| async move {
            let result = match operation {
                Operation::Provision => orchestrator.provision_attendee(&ctx, &id).await?,
                Operation::Teardown => orchestrator.teardown_attendee(&ctx, &id).await?,
            };
            let changed = usize::from(result != OperationResult::Deferred);
            Ok::<_, JobError>(JobReport {
                examined: 1,
                changed,
                failed: usize::from(result == OperationResult::Failed),
                checkpointed: false,
            })
        })?;

    info!(attendee_id = %attendee_id, job, "Attendee operation submitted");
    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            attendee_id,
            job: job.to_string(),
        }),
    ))
}
