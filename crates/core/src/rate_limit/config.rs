//! Rate limiter configuration.

use serde::{Deserialize, Serialize};

/// Where the sliding-window markers live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitBackend {
    /// Shared database table; use when more than one worker process runs.
    Sqlite,
    /// Process-local.
    Memory,
}

/// Calls allowed per window for one limit class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassLimit {
    pub limit: u32,
    pub window_secs: u64,
}

/// Configuration for the outbound-call rate limiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Key the provisioning gateway limits under (one window per key and class).
    #[serde(default = "default_key")]
    pub key: String,

    #[serde(default = "default_backend")]
    pub backend: RateLimitBackend,

    /// Reads and existence checks.
    #[serde(default = "default_class")]
    pub default: ClassLimit,

    /// Apply and destroy.
    #[serde(default = "write_class")]
    pub write: ClassLimit,
}

fn default_key() -> String {
    "cloud-api".to_string()
}

fn default_backend() -> RateLimitBackend {
    RateLimitBackend::Sqlite
}

fn default_class() -> ClassLimit {
    ClassLimit {
        limit: 60,
        window_secs: 60,
    }
}

fn write_class() -> ClassLimit {
    ClassLimit {
        limit: 30,
        window_secs: 60,
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            key: default_key(),
            backend: default_backend(),
            default: default_class(),
            write: write_class(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RateLimitConfig::default();
        assert_eq!(config.backend, RateLimitBackend::Sqlite);
        assert_eq!(config.default.limit, 60);
        assert_eq!(config.default.window_secs, 60);
        assert_eq!(config.write.limit, 30);
    }

    #[test]
    fn test_deserialize_partial() {
        let toml = r#"
            backend = "memory"

            [write]
            limit = 5
            window_secs = 10
        "#;
        let config: RateLimitConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.backend, RateLimitBackend::Memory);
        assert_eq!(config.write.limit, 5);
        assert_eq!(config.write.window_secs, 10);
        assert_eq!(config.default.limit, 60);
        assert_eq!(config.key, "cloud-api");
    }
}
