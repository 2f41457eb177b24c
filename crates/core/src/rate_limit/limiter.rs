//! Sliding-window rate limiter for outbound calls.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{Acquire, ClassLimit, RateLimitConfig, RateLimitError, WindowStore};
use crate::metrics;

/// Limit class chosen by the caller per endpoint kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitClass {
    Default,
    Write,
}

impl LimitClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitClass::Default => "default",
            LimitClass::Write => "write",
        }
    }
}

impl fmt::Display for LimitClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub permitted: bool,
    /// Whole seconds until a call would be permitted. Zero when permitted.
    pub retry_after_secs: u64,
}

impl Decision {
    fn permit() -> Self {
        Self {
            permitted: true,
            retry_after_secs: 0,
        }
    }

    fn deny(retry_after_secs: u64) -> Self {
        Self {
            permitted: false,
            retry_after_secs,
        }
    }
}

/// Rate limiter shared by every component that calls the external API.
///
/// Each (key, class) pair has its own window.
pub struct RateLimiter {
    store: Arc<dyn WindowStore>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn WindowStore>, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn class_limit(&self, class: LimitClass) -> ClassLimit {
        match class {
            LimitClass::Default => self.config.default,
            LimitClass::Write => self.config.write,
        }
    }

    /// Check and, if permitted, consume one call for `key` in `class`.
    pub fn allow(&self, key: &str, class: LimitClass) -> Result<Decision, RateLimitError> {
        self.allow_at(key, class, Utc::now())
    }

    /// [`allow`](Self::allow) with an explicit clock.
    pub fn allow_at(
        &self,
        key: &str,
        class: LimitClass,
        now: DateTime<Utc>,
    ) -> Result<Decision, RateLimitError> {
        let limit = self.class_limit(class);
        let window_ms = (limit.window_secs as i64).saturating_mul(1000);
        let now_ms = now.timestamp_millis();
        let window_key = format!("{}:{}", key, class);

        let acquired = self
            .store
            .acquire(&window_key, limit.limit, window_ms, now_ms)
            .inspect_err(|e| {
                warn!(key, class = %class, error = %e, "Rate limiter storage failed, denying call");
            })?;

        match acquired {
            Acquire::Recorded => {
                metrics::RATE_LIMIT_PERMITS
                    .with_label_values(&[class.as_str()])
                    .inc();
                Ok(Decision::permit())
            }
            Acquire::Full { oldest_ms } => {
                let wait_ms = (oldest_ms + window_ms - now_ms).max(0);
                // Round up so a caller sleeping this long is past the window edge.
                let retry_after_secs = ((wait_ms as u64).div_ceil(1000)).max(1);
                metrics::RATE_LIMIT_DENIALS
                    .with_label_values(&[class.as_str()])
                    .inc();
                debug!(key, class = %class, retry_after_secs, "Rate limit reached");
                Ok(Decision::deny(retry_after_secs))
            }
        }
    }
}
