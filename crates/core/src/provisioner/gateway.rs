//! Rate-limited access to the provisioning collaborator.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::warn;

use super::traits::Provisioner;
use super::types::{ProvisionError, ProvisionOutcome};
use crate::metrics;
use crate::rate_limit::{LimitClass, RateLimiter};
use crate::workshop::AttendeeSpec;

/// Wraps a provisioner so every call first takes a permit from the shared
/// rate limiter.
///
/// Apply and destroy use the `write` class, existence checks the `default`
/// class. A denial surfaces as [`ProvisionError::RateLimited`] and the inner
/// provisioner is not called.
pub struct ProvisioningGateway {
    inner: Arc<dyn Provisioner>,
    limiter: Arc<RateLimiter>,
    key: String,
}

impl ProvisioningGateway {
    pub fn new(inner: Arc<dyn Provisioner>, limiter: Arc<RateLimiter>) -> Self {
        let key = limiter.config().key.clone();
        Self {
            inner,
            limiter,
            key,
        }
    }

    /// Override the rate limit key (defaults to the configured one).
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    fn permit(&self, class: LimitClass) -> Result<(), ProvisionError> {
        match self.limiter.allow(&self.key, class) {
            Ok(decision) if decision.permitted => Ok(()),
            Ok(decision) => Err(ProvisionError::RateLimited {
                retry_after_secs: decision.retry_after_secs,
            }),
            Err(e) => {
                // Fail closed: back off for a full window.
                let window_secs = self.limiter.class_limit(class).window_secs.max(1);
                warn!(error = %e, class = %class, "Rate limiter unavailable, treating as limited");
                Err(ProvisionError::RateLimited {
                    retry_after_secs: window_secs,
                })
            }
        }
    }

    fn observe(operation: &str, started: Instant) {
        metrics::EXTERNAL_CALL_DURATION
            .with_label_values(&[operation])
            .observe(started.elapsed().as_secs_f64());
    }
}

#[async_trait]
impl Provisioner for ProvisioningGateway {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn apply(&self, spec: &AttendeeSpec) -> Result<ProvisionOutcome, ProvisionError> {
        self.permit(LimitClass::Write)?;
        let started = Instant::now();
        let result = self.inner.apply(spec).await;
        Self::observe("apply", started);
        result
    }

    async fn destroy(&self, spec: &AttendeeSpec) -> Result<ProvisionOutcome, ProvisionError> {
        self.permit(LimitClass::Write)?;
        let started = Instant::now();
        let result = self.inner.destroy(spec).await;
        Self::observe("destroy", started);
        result
    }

    async fn exists(&self, spec: &AttendeeSpec) -> Result<bool, ProvisionError> {
        self.permit(LimitClass::Default)?;
        let started = Instant::now();
        let result = self.inner.exists(spec).await;
        Self::observe("exists", started);
        result
    }
}
