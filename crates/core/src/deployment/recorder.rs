//! Deployment recorder trait.

use chrono::{DateTime, Utc};

use super::{DeploymentAction, DeploymentError, DeploymentLog, DeploymentStatus};

/// Append-only log of provisioning actions.
///
/// At most one record per attendee is open at a time. Opening a record is the
/// lock that keeps two workers from operating on the same attendee.
pub trait DeploymentRecorder: Send + Sync {
    /// Open a record for the attendee.
    ///
    /// Fails with [`DeploymentError::Conflict`] when an open record already exists.
    fn begin(
        &self,
        attendee_id: &str,
        workshop_id: &str,
        action: DeploymentAction,
    ) -> Result<DeploymentLog, DeploymentError>;

    /// Close an open record.
    ///
    /// Fails with [`DeploymentError::NotFound`] when the record is unknown or
    /// already closed. Exactly one caller wins a race to close the same record.
    fn complete(
        &self,
        log_id: &str,
        status: DeploymentStatus,
        output: Option<&str>,
        error: Option<&str>,
    ) -> Result<DeploymentLog, DeploymentError>;

    fn open_record_exists(&self, attendee_id: &str) -> Result<bool, DeploymentError> {
        Ok(self.open_record(attendee_id)?.is_some())
    }

    fn open_record(&self, attendee_id: &str) -> Result<Option<DeploymentLog>, DeploymentError>;

    /// Open records started before the cutoff, oldest first.
    fn stale_open_records(
        &self,
        started_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<DeploymentLog>, DeploymentError>;

    /// All records for the attendee, newest first.
    fn history(&self, attendee_id: &str) -> Result<Vec<DeploymentLog>, DeploymentError>;

    /// Most recent closed record of the given action.
    fn last_completed(
        &self,
        attendee_id: &str,
        action: DeploymentAction,
    ) -> Result<Option<DeploymentLog>, DeploymentError>;
}
