//! Types for the lifecycle orchestrator.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::deployment::{DeploymentError, DeploymentLog};
use crate::provisioner::ProvisionError;
use crate::workshop::{Attendee, StoreError, Status, Workshop};

/// Errors that can occur during orchestration.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// An operation is already in progress for the attendee.
    #[error("attendee {attendee_id} has an operation in progress")]
    Conflict { attendee_id: String },

    #[error("not found: {0}")]
    NotFound(String),

    /// The call was refused by the rate limiter; retry later, never drop it.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// The provisioning call failed.
    #[error("provisioning failed: {0}")]
    ExternalOperation(String),

    /// The provisioning call did not finish in time.
    #[error("provisioning timed out after {0}s")]
    Timeout(u64),

    /// The request does not make sense in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("store error: {0}")]
    Store(String),
}

impl OrchestratorError {
    /// Whether retrying the same request later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. } | Self::RateLimited { .. } | Self::Store(_)
        )
    }
}

impl From<StoreError> for OrchestratorError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => Self::NotFound(what),
            StoreError::InvalidInput(msg) => Self::InvalidState(msg),
            StoreError::Database(msg) => Self::Store(msg),
        }
    }
}

impl From<DeploymentError> for OrchestratorError {
    fn from(e: DeploymentError) -> Self {
        match e {
            DeploymentError::Conflict { attendee_id } => Self::Conflict { attendee_id },
            DeploymentError::NotFound(id) => Self::NotFound(format!("deployment record {}", id)),
            DeploymentError::InvalidStatus(status) => {
                Self::InvalidState(format!("cannot complete a record as {}", status))
            }
            DeploymentError::Database(msg) => Self::Store(msg),
        }
    }
}

impl From<ProvisionError> for OrchestratorError {
    fn from(e: ProvisionError) -> Self {
        match e {
            ProvisionError::RateLimited { retry_after_secs } => {
                Self::RateLimited { retry_after_secs }
            }
            other => Self::ExternalOperation(other.to_string()),
        }
    }
}

/// How one attendee operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationResult {
    Succeeded,
    Failed,
    /// Postponed by the rate limiter; the next run picks it up.
    Deferred,
}

/// Stored and derived status of a workshop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkshopStatusReport {
    pub workshop: Workshop,
    /// What the attendees imply right now. Differs from the stored status while
    /// pinned or before the next reconciliation.
    pub derived_status: Status,
    pub attendee_count: usize,
    pub attendees_by_status: BTreeMap<Status, usize>,
}

/// An attendee together with its in-progress operation, if any.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendeeStatusReport {
    pub attendee: Attendee,
    pub open_deployment: Option<DeploymentLog>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(OrchestratorError::RateLimited { retry_after_secs: 5 }.is_retryable());
        assert!(OrchestratorError::Conflict {
            attendee_id: "a-1".to_string()
        }
        .is_retryable());
        assert!(!OrchestratorError::NotFound("a-1".to_string()).is_retryable());
        assert!(!OrchestratorError::Timeout(240).is_retryable());
    }

    #[test]
    fn test_rate_limit_conversion_keeps_retry_after() {
        let err: OrchestratorError = ProvisionError::RateLimited {
            retry_after_secs: 42,
        }
        .into();
        assert!(matches!(
            err,
            OrchestratorError::RateLimited {
                retry_after_secs: 42
            }
        ));
    }

    #[test]
    fn test_deployment_conflict_conversion() {
        let err: OrchestratorError = DeploymentError::Conflict {
            attendee_id: "a-1".to_string(),
        }
        .into();
        assert!(matches!(err, OrchestratorError::Conflict { ref attendee_id } if attendee_id == "a-1"));
    }
}
