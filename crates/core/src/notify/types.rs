//! Notification types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::workshop::Status;

/// What changed status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationSubject {
    Workshop,
    Attendee,
}

/// Message sent after a persisted status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusNotification {
    pub subject: NotificationSubject,
    pub workshop_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attendee_id: Option<String>,
    pub from_status: Status,
    pub to_status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl StatusNotification {
    pub fn workshop(workshop_id: &str, from_status: Status, to_status: Status) -> Self {
        Self {
            subject: NotificationSubject::Workshop,
            workshop_id: workshop_id.to_string(),
            attendee_id: None,
            from_status,
            to_status,
            reason: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn attendee(
        workshop_id: &str,
        attendee_id: &str,
        from_status: Status,
        to_status: Status,
        reason: Option<String>,
    ) -> Self {
        Self {
            subject: NotificationSubject::Attendee,
            workshop_id: workshop_id.to_string(),
            attendee_id: Some(attendee_id.to_string()),
            from_status,
            to_status,
            reason,
            occurred_at: Utc::now(),
        }
    }
}

/// Delivery failure.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("failed to build HTTP client: {0}")]
    Client(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("receiver rejected notification: HTTP {status}")]
    Rejected { status: u16 },
}
