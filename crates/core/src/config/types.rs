use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use crate::notify::NotificationConfig;
use crate::orchestrator::OrchestratorConfig;
use crate::provisioner::ProvisionerConfig;
use crate::rate_limit::RateLimitConfig;
use crate::scheduler::SchedulerConfig;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub provisioner: ProvisionerConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    8080
}

/// Database configuration
///
/// Every store opens its own connection to this file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("provisioner.db")
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration
///
/// Levels come from `RUST_LOG`; only the output format is configured here.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub rate_limit: RateLimitConfig,
    pub scheduler: SchedulerConfig,
    pub orchestrator: OrchestratorConfig,
    pub provisioner: ProvisionerConfig,
    pub notifications: SanitizedNotificationConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedNotificationConfig {
    pub enabled: bool,
    /// Whether a webhook URL is set. The URL itself may carry a token.
    pub webhook_configured: bool,
    pub timeout_secs: u64,
    pub buffer_size: usize,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        let notifications = &config.notifications;
        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            logging: config.logging.clone(),
            rate_limit: config.rate_limit.clone(),
            scheduler: config.scheduler.clone(),
            orchestrator: config.orchestrator.clone(),
            provisioner: config.provisioner.clone(),
            notifications: SanitizedNotificationConfig {
                enabled: notifications.enabled,
                webhook_configured: notifications
                    .webhook_url
                    .as_deref()
                    .is_some_and(|url| !url.is_empty()),
                timeout_secs: notifications.timeout_secs,
                buffer_size: notifications.buffer_size,
                max_attempts: notifications.max_attempts,
                initial_backoff_ms: notifications.initial_backoff_ms,
            },
        }
    }
}
