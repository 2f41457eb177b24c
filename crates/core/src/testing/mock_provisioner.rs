//! Mock provisioner for testing.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::provisioner::{ProvisionError, ProvisionOutcome, Provisioner};
use crate::workshop::AttendeeSpec;

/// Which operation a recorded call was.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockAction {
    Apply,
    Destroy,
    Exists,
}

/// A recorded call for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub action: MockAction,
    pub attendee_id: String,
}

/// Mock implementation of the Provisioner trait.
///
/// Every call succeeds unless configured otherwise:
/// - per-attendee apply/destroy failures
/// - attendees whose resources are reported missing
/// - a number of upcoming calls answered with `RateLimited`
/// - a simulated call duration
///
/// A successful apply reports `ext-<attendee>` / `proj-<attendee>` handles.
///
/// # Example
///
/// ```rust,ignore
/// use provisioner_core::testing::MockProvisioner;
///
/// let provisioner = MockProvisioner::new();
/// provisioner.fail_apply("attendee-1", "quota exceeded").await;
///
/// // ... run the orchestrator ...
///
/// assert_eq!(provisioner.apply_calls().await, 3);
/// ```
#[derive(Debug, Default)]
pub struct MockProvisioner {
    calls: Arc<RwLock<Vec<RecordedCall>>>,
    apply_failures: Arc<RwLock<HashMap<String, String>>>,
    destroy_failures: Arc<RwLock<HashMap<String, String>>>,
    missing: Arc<RwLock<HashSet<String>>>,
    /// Upcoming calls to answer with RateLimited, and the retry-after to report.
    rate_limited: Arc<RwLock<Option<(u32, u64)>>>,
    delay: Arc<RwLock<Duration>>,
}

impl MockProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make applies for the attendee fail with the given error.
    pub async fn fail_apply(&self, attendee_id: &str, error: &str) {
        self.apply_failures
            .write()
            .await
            .insert(attendee_id.to_string(), error.to_string());
    }

    /// Make destroys for the attendee fail with the given error.
    pub async fn fail_destroy(&self, attendee_id: &str, error: &str) {
        self.destroy_failures
            .write()
            .await
            .insert(attendee_id.to_string(), error.to_string());
    }

    /// Clear all configured failures.
    pub async fn clear_failures(&self) {
        self.apply_failures.write().await.clear();
        self.destroy_failures.write().await.clear();
    }

    /// Report the attendee's resources as missing in existence checks.
    pub async fn set_missing(&self, attendee_id: &str, missing: bool) {
        let mut set = self.missing.write().await;
        if missing {
            set.insert(attendee_id.to_string());
        } else {
            set.remove(attendee_id);
        }
    }

    /// Answer the next `calls` calls with `RateLimited { retry_after_secs }`.
    pub async fn rate_limit_next(&self, calls: u32, retry_after_secs: u64) {
        *self.rate_limited.write().await = Some((calls, retry_after_secs));
    }

    /// Make every call take this long.
    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = delay;
    }

    /// All recorded calls, including rate-limited ones.
    pub async fn recorded_calls(&self) -> Vec<RecordedCall> {
        self.calls.read().await.clone()
    }

    pub async fn apply_calls(&self) -> usize {
        self.count(MockAction::Apply).await
    }

    pub async fn destroy_calls(&self) -> usize {
        self.count(MockAction::Destroy).await
    }

    pub async fn exists_calls(&self) -> usize {
        self.count(MockAction::Exists).await
    }

    async fn count(&self, action: MockAction) -> usize {
        self.calls
            .read()
            .await
            .iter()
            .filter(|c| c.action == action)
            .count()
    }

    async fn enter(&self, action: MockAction, spec: &AttendeeSpec) -> Result<(), ProvisionError> {
        self.calls.write().await.push(RecordedCall {
            action,
            attendee_id: spec.attendee_id.clone(),
        });

        {
            let mut limited = self.rate_limited.write().await;
            if let Some((remaining, retry_after_secs)) = *limited {
                *limited = if remaining > 1 {
                    Some((remaining - 1, retry_after_secs))
                } else {
                    None
                };
                if remaining > 0 {
                    return Err(ProvisionError::RateLimited { retry_after_secs });
                }
            }
        }

        let delay = *self.delay.read().await;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}

#[async_trait]
impl Provisioner for MockProvisioner {
    fn name(&self) -> &str {
        "mock"
    }

    async fn apply(&self, spec: &AttendeeSpec) -> Result<ProvisionOutcome, ProvisionError> {
        self.enter(MockAction::Apply, spec).await?;

        if let Some(error) = self.apply_failures.read().await.get(&spec.attendee_id) {
            return Ok(ProvisionOutcome::failed(error.clone()));
        }

        Ok(ProvisionOutcome::succeeded(format!("applied {}", spec.attendee_id)).with_handles(
            Some(format!("ext-{}", spec.attendee_id)),
            Some(format!("proj-{}", spec.attendee_id)),
        ))
    }

    async fn destroy(&self, spec: &AttendeeSpec) -> Result<ProvisionOutcome, ProvisionError> {
        self.enter(MockAction::Destroy, spec).await?;

        if let Some(error) = self.destroy_failures.read().await.get(&spec.attendee_id) {
            return Ok(ProvisionOutcome::failed(error.clone()));
        }
        Ok(ProvisionOutcome::succeeded(format!(
            "destroyed {}",
            spec.attendee_id
        )))
    }

    async fn exists(&self, spec: &AttendeeSpec) -> Result<bool, ProvisionError> {
        self.enter(MockAction::Exists, spec).await?;
        Ok(!self.missing.read().await.contains(&spec.attendee_id))
    }
}
