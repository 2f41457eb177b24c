//! Workshop storage trait and types.

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::{Attendee, CreateAttendeeRequest, CreateWorkshopRequest, Status, Workshop};

/// Error type for workshop/attendee storage.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Filter for querying workshops.
#[derive(Debug, Clone, Default)]
pub struct WorkshopFilter {
    /// Only workshops in this status.
    pub status: Option<Status>,
    /// Only workshops whose deletion was scheduled at or before this instant.
    pub deletion_due_at: Option<DateTime<Utc>>,
    /// Only workshops that currently have at least one attendee.
    pub with_attendees: bool,
    /// Maximum number of results.
    pub limit: i64,
    /// Offset for pagination.
    pub offset: i64,
}

impl WorkshopFilter {
    pub fn new() -> Self {
        Self {
            limit: 100,
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_deletion_due_at(mut self, now: DateTime<Utc>) -> Self {
        self.deletion_due_at = Some(now);
        self
    }

    pub fn with_attendees(mut self) -> Self {
        self.with_attendees = true;
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Trait for workshop/attendee storage backends.
///
/// Deleting a workshop deletes its attendees with it.
pub trait WorkshopStore: Send + Sync {
    /// Create a workshop in `planning`.
    fn create_workshop(&self, request: CreateWorkshopRequest) -> Result<Workshop, StoreError>;

    fn get_workshop(&self, id: &str) -> Result<Option<Workshop>, StoreError>;

    /// List workshops matching the filter, oldest first.
    fn list_workshops(&self, filter: &WorkshopFilter) -> Result<Vec<Workshop>, StoreError>;

    fn update_workshop_status(&self, id: &str, status: Status) -> Result<Workshop, StoreError>;

    /// Pin or unpin the stored status against reconciliation.
    fn set_status_pinned(&self, id: &str, pinned: bool) -> Result<Workshop, StoreError>;

    /// Set or clear the scheduled deletion time.
    fn schedule_deletion(
        &self,
        id: &str,
        at: Option<DateTime<Utc>>,
    ) -> Result<Workshop, StoreError>;

    /// Permanently delete a workshop and its attendees. Returns the deleted workshop.
    fn delete_workshop(&self, id: &str) -> Result<Workshop, StoreError>;

    /// Add an attendee in `deploying`.
    fn add_attendee(&self, request: CreateAttendeeRequest) -> Result<Attendee, StoreError>;

    fn get_attendee(&self, id: &str) -> Result<Option<Attendee>, StoreError>;

    /// All attendees of a workshop, oldest first.
    fn list_attendees(&self, workshop_id: &str) -> Result<Vec<Attendee>, StoreError>;

    /// One page of attendees across all workshops in the given status, oldest first.
    fn list_attendees_by_status(
        &self,
        status: Status,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Attendee>, StoreError>;

    /// Set an attendee's status. `last_error` replaces the stored error.
    fn update_attendee_status(
        &self,
        id: &str,
        status: Status,
        last_error: Option<&str>,
    ) -> Result<Attendee, StoreError>;

    /// Store the external handles returned by the provisioning tool.
    fn set_attendee_handles(
        &self,
        id: &str,
        external_id: Option<&str>,
        project_id: Option<&str>,
    ) -> Result<Attendee, StoreError>;

    /// Record a health probe. Returns the consecutive failure count after the probe.
    fn record_health_probe(&self, id: &str, healthy: bool) -> Result<u32, StoreError>;
}
