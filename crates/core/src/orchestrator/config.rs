//! Orchestrator configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the lifecycle orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// How long a deployment record may stay open before it is presumed dead (seconds).
    /// Must exceed every job's hard timeout.
    #[serde(default = "default_staleness_threshold")]
    pub staleness_threshold_secs: u64,

    /// Upper bound on a single provisioning call (seconds).
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_secs: u64,

    /// Consecutive failed health probes before an attendee is failed.
    #[serde(default = "default_health_failure_threshold")]
    pub health_failure_threshold: u32,

    /// Per-run concurrency of provisioning calls and probes.
    #[serde(default = "default_max_parallel_operations")]
    pub max_parallel_operations: usize,

    /// How many times one call waits out a rate-limit denial before the
    /// operation is deferred to the next run.
    #[serde(default = "default_max_rate_limit_waits")]
    pub max_rate_limit_waits: u32,

    /// Delete a workshop once all of its attendees are torn down.
    #[serde(default = "default_purge_after_teardown")]
    pub purge_after_teardown: bool,

    /// Maximum items fetched per scan.
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
}

fn default_staleness_threshold() -> u64 {
    900 // 15 minutes
}

fn default_operation_timeout() -> u64 {
    240
}

fn default_health_failure_threshold() -> u32 {
    3
}

fn default_max_parallel_operations() -> usize {
    4
}

fn default_max_rate_limit_waits() -> u32 {
    2
}

fn default_purge_after_teardown() -> bool {
    true
}

fn default_batch_size() -> i64 {
    500
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            staleness_threshold_secs: default_staleness_threshold(),
            operation_timeout_secs: default_operation_timeout(),
            health_failure_threshold: default_health_failure_threshold(),
            max_parallel_operations: default_max_parallel_operations(),
            max_rate_limit_waits: default_max_rate_limit_waits(),
            purge_after_teardown: default_purge_after_teardown(),
            batch_size: default_batch_size(),
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.operation_timeout_secs == 0 {
            return Err("operation_timeout_secs must be positive".to_string());
        }
        if self.operation_timeout_secs >= self.staleness_threshold_secs {
            return Err(format!(
                "operation_timeout_secs ({}) must be less than staleness_threshold_secs ({})",
                self.operation_timeout_secs, self.staleness_threshold_secs
            ));
        }
        if self.health_failure_threshold == 0 {
            return Err("health_failure_threshold must be at least 1".to_string());
        }
        if self.max_parallel_operations == 0 {
            return Err("max_parallel_operations must be at least 1".to_string());
        }
        if self.batch_size <= 0 {
            return Err("batch_size must be positive".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.staleness_threshold_secs, 900);
        assert_eq!(config.operation_timeout_secs, 240);
        assert_eq!(config.health_failure_threshold, 3);
        assert!(config.purge_after_teardown);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_minimal() {
        let toml = r#"
            health_failure_threshold = 5
        "#;
        let config: OrchestratorConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.health_failure_threshold, 5);
        assert_eq!(config.max_parallel_operations, 4);
    }

    #[test]
    fn test_operation_timeout_below_staleness() {
        let config = OrchestratorConfig {
            operation_timeout_secs: 900,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
