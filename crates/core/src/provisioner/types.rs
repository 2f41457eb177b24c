//! Types for the provisioning collaborator.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result of an apply or destroy run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionOutcome {
    pub success: bool,
    /// Raw tool output.
    pub output: Option<String>,
    pub error: Option<String>,
    /// Identity handle reported by a successful apply.
    pub external_id: Option<String>,
    /// Project handle reported by a successful apply.
    pub project_id: Option<String>,
}

impl ProvisionOutcome {
    pub fn succeeded(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: Some(output.into()),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_handles(mut self, external_id: Option<String>, project_id: Option<String>) -> Self {
        self.external_id = external_id;
        self.project_id = project_id;
        self
    }
}

/// Errors raised before or around a provisioning run.
///
/// A run that completes with a failing result is an `Ok(ProvisionOutcome)`
/// with `success == false`, not an error.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The call was not made because the rate limit was reached.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// The provisioning command could not be started.
    #[error("failed to start {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The command answered in a way that could not be interpreted.
    #[error("unexpected provisioning result: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProvisionError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_builders() {
        let ok = ProvisionOutcome::succeeded("done")
            .with_handles(Some("u-1".to_string()), Some("p-1".to_string()));
        assert!(ok.success);
        assert_eq!(ok.output.as_deref(), Some("done"));
        assert_eq!(ok.project_id.as_deref(), Some("p-1"));

        let failed = ProvisionOutcome::failed("quota");
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("quota"));
    }

    #[test]
    fn test_rate_limited_display() {
        let err = ProvisionError::RateLimited {
            retry_after_secs: 12,
        };
        assert!(err.is_rate_limited());
        assert_eq!(err.to_string(), "rate limited, retry after 12s");
    }
}
