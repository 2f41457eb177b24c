//! Scheduler API handlers.

use axum::{extract::State, Json};
use std::sync::Arc;

use provisioner_core::SchedulerStatus;

use crate::state::AppState;

/// Job registrations, in-flight flags, last runs and recent ad-hoc runs
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<SchedulerStatus> {
    Json(state.scheduler().status())
}
