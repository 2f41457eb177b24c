use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::deployment::{DeploymentAction, DeploymentStatus};
use crate::workshop::Status;

/// Audit event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    // System events
    ServiceStarted {
        version: String,
        config_hash: String,
    },
    ServiceStopped {
        reason: String,
    },

    // Status transitions
    WorkshopStatusChanged {
        workshop_id: String,
        from_status: Status,
        to_status: Status,
    },
    AttendeeStatusChanged {
        workshop_id: String,
        attendee_id: String,
        from_status: Status,
        to_status: Status,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    // Deployment lifecycle
    DeploymentStarted {
        workshop_id: String,
        attendee_id: String,
        log_id: String,
        action: DeploymentAction,
    },
    DeploymentCompleted {
        workshop_id: String,
        attendee_id: String,
        log_id: String,
        action: DeploymentAction,
        status: DeploymentStatus,
        duration_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// An open record outlived the staleness threshold and was closed.
    StaleDeploymentReclaimed {
        workshop_id: String,
        attendee_id: String,
        log_id: String,
        action: DeploymentAction,
        started_at: DateTime<Utc>,
    },
    /// Workshop and its attendees were deleted after teardown.
    WorkshopPurged {
        workshop_id: String,
        name: String,
        attendee_count: usize,
    },

    // Scheduler
    JobCompleted {
        job: String,
        duration_ms: u64,
        examined: usize,
        changed: usize,
        failed: usize,
        checkpointed: bool,
    },
    JobTimedOut {
        job: String,
        timeout_secs: u64,
    },
}

impl AuditEvent {
    /// Returns the event type as a string for storage
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ServiceStarted { .. } => "service_started",
            Self::ServiceStopped { .. } => "service_stopped",
            Self::WorkshopStatusChanged { .. } => "workshop_status_changed",
            Self::AttendeeStatusChanged { .. } => "attendee_status_changed",
            Self::DeploymentStarted { .. } => "deployment_started",
            Self::DeploymentCompleted { .. } => "deployment_completed",
            Self::StaleDeploymentReclaimed { .. } => "stale_deployment_reclaimed",
            Self::WorkshopPurged { .. } => "workshop_purged",
            Self::JobCompleted { .. } => "job_completed",
            Self::JobTimedOut { .. } => "job_timed_out",
        }
    }

    /// Extract workshop_id if this event concerns a workshop
    pub fn workshop_id(&self) -> Option<&str> {
        match self {
            Self::WorkshopStatusChanged { workshop_id, .. }
            | Self::AttendeeStatusChanged { workshop_id, .. }
            | Self::DeploymentStarted { workshop_id, .. }
            | Self::DeploymentCompleted { workshop_id, .. }
            | Self::StaleDeploymentReclaimed { workshop_id, .. }
            | Self::WorkshopPurged { workshop_id, .. } => Some(workshop_id),
            Self::ServiceStarted { .. }
            | Self::ServiceStopped { .. }
            | Self::JobCompleted { .. }
            | Self::JobTimedOut { .. } => None,
        }
    }

    /// Extract attendee_id if this event concerns one attendee
    pub fn attendee_id(&self) -> Option<&str> {
        match self {
            Self::AttendeeStatusChanged { attendee_id, .. }
            | Self::DeploymentStarted { attendee_id, .. }
            | Self::DeploymentCompleted { attendee_id, .. }
            | Self::StaleDeploymentReclaimed { attendee_id, .. } => Some(attendee_id),
            _ => None,
        }
    }
}

/// Stored audit record (returned from queries)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub workshop_id: Option<String>,
    pub attendee_id: Option<String>,
    pub data: AuditEvent,
}
