//! Trait definitions for the provisioning collaborator.

use async_trait::async_trait;

use super::types::{ProvisionError, ProvisionOutcome};
use crate::workshop::AttendeeSpec;

/// Creates and removes the cloud resources of one attendee.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Returns the name of this provisioner implementation.
    fn name(&self) -> &str;

    /// Create (or converge) the attendee's resources.
    async fn apply(&self, spec: &AttendeeSpec) -> Result<ProvisionOutcome, ProvisionError>;

    /// Remove the attendee's resources.
    async fn destroy(&self, spec: &AttendeeSpec) -> Result<ProvisionOutcome, ProvisionError>;

    /// Lightweight check that the attendee's resources still exist.
    async fn exists(&self, spec: &AttendeeSpec) -> Result<bool, ProvisionError>;
}
