//! Deployment log types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Provisioning action recorded in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentAction {
    Apply,
    Destroy,
}

impl DeploymentAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentAction::Apply => "apply",
            DeploymentAction::Destroy => "destroy",
        }
    }
}

impl fmt::Display for DeploymentAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "apply" => Ok(DeploymentAction::Apply),
            "destroy" => Ok(DeploymentAction::Destroy),
            other => Err(format!("unknown deployment action: {}", other)),
        }
    }
}

/// Outcome of a recorded action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    /// The action is in flight. The only open status.
    Running,
    Succeeded,
    Failed,
    /// Reclaimed by the staleness path or cut off by the operation timeout.
    TimedOut,
    /// Postponed by the rate limiter; a later run retries the action.
    Deferred,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Running => "running",
            DeploymentStatus::Succeeded => "succeeded",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::TimedOut => "timed_out",
            DeploymentStatus::Deferred => "deferred",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, DeploymentStatus::Running)
    }

    /// Whether the action reached a final verdict. `Deferred` is closed but not terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeploymentStatus::Succeeded | DeploymentStatus::Failed | DeploymentStatus::TimedOut
        )
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(DeploymentStatus::Running),
            "succeeded" => Ok(DeploymentStatus::Succeeded),
            "failed" => Ok(DeploymentStatus::Failed),
            "timed_out" => Ok(DeploymentStatus::TimedOut),
            "deferred" => Ok(DeploymentStatus::Deferred),
            other => Err(format!("unknown deployment status: {}", other)),
        }
    }
}

/// One provisioning or teardown action on one attendee.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentLog {
    pub id: String,
    pub attendee_id: String,
    pub workshop_id: String,
    pub action: DeploymentAction,
    pub status: DeploymentStatus,
    /// Raw output of the provisioning tool.
    pub output: Option<String>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl DeploymentLog {
    pub fn is_open(&self) -> bool {
        self.completed_at.is_none()
    }
}

/// Error type for the deployment recorder.
#[derive(Debug, Error)]
pub enum DeploymentError {
    /// An open record already exists for the attendee.
    #[error("attendee {attendee_id} already has an open deployment record")]
    Conflict { attendee_id: String },

    /// The record is unknown or already completed.
    #[error("no open deployment record {0}")]
    NotFound(String),

    #[error("invalid completion status: {0}")]
    InvalidStatus(DeploymentStatus),

    #[error("database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for DeploymentError {
    fn from(e: rusqlite::Error) -> Self {
        DeploymentError::Database(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_running_is_open() {
        assert!(DeploymentStatus::Running.is_open());
        assert!(!DeploymentStatus::Deferred.is_open());
        assert!(!DeploymentStatus::Running.is_terminal());
        assert!(!DeploymentStatus::Deferred.is_terminal());
        assert!(DeploymentStatus::TimedOut.is_terminal());
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(
            "timed_out".parse::<DeploymentStatus>().unwrap(),
            DeploymentStatus::TimedOut
        );
        assert!("done".parse::<DeploymentStatus>().is_err());
        assert_eq!(
            "destroy".parse::<DeploymentAction>().unwrap(),
            DeploymentAction::Destroy
        );
    }
}
