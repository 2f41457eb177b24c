//! Workshop API handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use provisioner_core::{
    Attendee, CreateAttendeeRequest, CreateWorkshopRequest, Status, Workshop, WorkshopFilter,
    WorkshopStatusReport,
};

use super::error::ApiError;
use crate::state::AppState;

/// Maximum allowed limit for workshop queries
const MAX_LIMIT: i64 = 1000;

/// Default limit for workshop queries
const DEFAULT_LIMIT: i64 = 100;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Query parameters for listing workshops
#[derive(Debug, Deserialize)]
pub struct ListWorkshopsParams {
    pub status: Option<Status>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ListWorkshopsResponse {
    pub workshops: Vec<Workshop>,
    pub limit: i64,
    pub offset: i64,
}

/// Request body for adding an attendee
#[derive(Debug, Deserialize)]
pub struct AddAttendeeBody {
    pub name: String,
    pub email: String,
}

/// Request body for scheduling deletion. A missing `at` cancels it.
#[derive(Debug, Deserialize)]
pub struct ScheduleDeletionBody {
    pub at: Option<DateTime<Utc>>,
}

/// Request body for pinning. A missing `status` unpins.
#[derive(Debug, Deserialize)]
pub struct PinStatusBody {
    pub status: Option<Status>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Create a new workshop
pub async fn create_workshop(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateWorkshopRequest>,
) -> Result<(StatusCode, Json<Workshop>), ApiError> {
    let workshop = state.workshops().create_workshop(body)?;
    Ok((StatusCode::CREATED, Json(workshop)))
}

/// List workshops
pub async fn list_workshops(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListWorkshopsParams>,
) -> Result<Json<ListWorkshopsResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut filter = WorkshopFilter::new().with_limit(limit).with_offset(offset);
    if let Some(status) = params.status {
        filter = filter.with_status(status);
    }

    let workshops = state.workshops().list_workshops(&filter)?;
    Ok(Json(ListWorkshopsResponse {
        workshops,
        limit,
        offset,
    }))
}

/// Stored and derived status of a workshop
pub async fn get_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<WorkshopStatusReport>, ApiError> {
    Ok(Json(state.orchestrator().workshop_status(&id)?))
}

/// Reconcile a workshop's status now
pub async fn reconcile(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Workshop>, ApiError> {
    Ok(Json(state.orchestrator().reconcile_now(&id).await?))
}

/// Add an attendee; the next lifecycle run provisions it
pub async fn add_attendee(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<AddAttendeeBody>,
) -> Result<(StatusCode, Json<Attendee>), ApiError> {
    let attendee = state.workshops().add_attendee(CreateAttendeeRequest {
        workshop_id: id,
        name: body.name,
        email: body.email,
    })?;
    Ok((StatusCode::CREATED, Json(attendee)))
}

/// List a workshop's attendees
pub async fn list_attendees(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Attendee>>, ApiError> {
    if state.workshops().get_workshop(&id)?.is_none() {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            format!("workshop {} not found", id),
        ));
    }
    Ok(Json(state.workshops().list_attendees(&id)?))
}

/// Set or cancel the scheduled deletion
pub async fn schedule_deletion(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<ScheduleDeletionBody>,
) -> Result<Json<Workshop>, ApiError> {
    Ok(Json(state.orchestrator().schedule_deletion(&id, body.at)?))
}

/// Pin or unpin the workshop status
pub async fn pin_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<PinStatusBody>,
) -> Result<Json<Workshop>, ApiError> {
    Ok(Json(state.orchestrator().pin_status(&id, body.status).await?))
}
