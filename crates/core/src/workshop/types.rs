//! Workshop and attendee types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status shared by workshops and attendees.
///
/// Attendees never take `Planning`; they start at `Deploying`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Planning,
    Deploying,
    Active,
    Completed,
    Failed,
    Deleting,
}

impl Status {
    pub const ALL: [Status; 6] = [
        Status::Planning,
        Status::Deploying,
        Status::Active,
        Status::Completed,
        Status::Failed,
        Status::Deleting,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Planning => "planning",
            Status::Deploying => "deploying",
            Status::Active => "active",
            Status::Completed => "completed",
            Status::Failed => "failed",
            Status::Deleting => "deleting",
        }
    }

    /// Whether an attendee may hold this status.
    pub fn is_attendee_status(&self) -> bool {
        !matches!(self, Status::Planning)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Status::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown status: {}", s))
    }
}

/// A time-boxed collection of attendees sharing a lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workshop {
    pub id: String,
    pub name: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    /// IANA timezone name the workshop is scheduled in.
    pub timezone: String,
    pub status: Status,
    /// Manual override: reconciliation leaves `status` alone while set.
    pub status_pinned: bool,
    pub deletion_scheduled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workshop {
    /// Whether the scheduled deletion time has passed.
    pub fn deletion_due(&self, now: DateTime<Utc>) -> bool {
        self.deletion_scheduled_at.is_some_and(|at| at <= now)
    }
}

/// A single participant's provisioned resource set within a workshop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attendee {
    pub id: String,
    pub workshop_id: String,
    pub name: String,
    pub email: String,
    pub status: Status,
    /// Identity handle in the cloud provider, set after a successful apply.
    pub external_id: Option<String>,
    /// Project handle in the cloud provider, set after a successful apply.
    pub project_id: Option<String>,
    /// Consecutive failed health probes.
    pub health_failures: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Attendee {
    /// What the provisioning tool needs to know about this attendee.
    pub fn spec(&self) -> AttendeeSpec {
        AttendeeSpec {
            attendee_id: self.id.clone(),
            workshop_id: self.workshop_id.clone(),
            name: self.name.clone(),
            email: self.email.clone(),
            external_id: self.external_id.clone(),
            project_id: self.project_id.clone(),
        }
    }
}

/// Input handed to the provisioning tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendeeSpec {
    pub attendee_id: String,
    pub workshop_id: String,
    pub name: String,
    pub email: String,
    pub external_id: Option<String>,
    pub project_id: Option<String>,
}

/// Request to create a new workshop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateWorkshopRequest {
    pub name: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub timezone: String,
    #[serde(default)]
    pub deletion_scheduled_at: Option<DateTime<Utc>>,
}

impl CreateWorkshopRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("workshop name must not be empty".to_string());
        }
        if self.ends_at <= self.starts_at {
            return Err("workshop must end after it starts".to_string());
        }
        if self.timezone.is_empty() || self.timezone.chars().any(char::is_whitespace) {
            return Err(format!("invalid timezone: {:?}", self.timezone));
        }
        Ok(())
    }
}

/// Request to add an attendee to a workshop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAttendeeRequest {
    pub workshop_id: String,
    pub name: String,
    pub email: String,
}
