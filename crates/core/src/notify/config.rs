//! Notification configuration.

use serde::{Deserialize, Serialize};

/// Configuration for status-change notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// When disabled, notifications are discarded at the handle.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// POST target for notifications. Without one they are only logged.
    #[serde(default)]
    pub webhook_url: Option<String>,

    /// Per-request timeout for the webhook.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Queue size; notifications beyond it are dropped and logged.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Delivery attempts per notification, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry; doubles on each further retry.
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_timeout() -> u64 {
    10
}

fn default_buffer_size() -> usize {
    256
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff() -> u64 {
    500
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            webhook_url: None,
            timeout_secs: default_timeout(),
            buffer_size: default_buffer_size(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
        }
    }
}
