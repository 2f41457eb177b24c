//! Testing utilities and mock implementations.
//!
//! The mock provisioner stands in for the cloud tooling, so the orchestrator
//! and scheduler can be exercised end to end against real SQLite stores.
//!
//! # Example
//!
//! ```rust,ignore
//! use provisioner_core::testing::{fixtures, MockProvisioner};
//!
//! let provisioner = MockProvisioner::new();
//! provisioner.set_missing("attendee-1", true).await;
//!
//! let request = fixtures::workshop_request("Kubernetes 101");
//! ```

mod mock_provisioner;

pub use mock_provisioner::{MockAction, MockProvisioner, RecordedCall};

/// Test fixtures and helper functions.
pub mod fixtures {
    use chrono::{Duration, Utc};

    use crate::workshop::{AttendeeSpec, CreateAttendeeRequest, CreateWorkshopRequest};

    /// A workshop starting now and running for three hours, no deletion scheduled.
    pub fn workshop_request(name: &str) -> CreateWorkshopRequest {
        let starts_at = Utc::now();
        CreateWorkshopRequest {
            name: name.to_string(),
            starts_at,
            ends_at: starts_at + Duration::hours(3),
            timezone: "Europe/London".to_string(),
            deletion_scheduled_at: None,
        }
    }

    /// An attendee named after the local part of the email.
    pub fn attendee_request(workshop_id: &str, email: &str) -> CreateAttendeeRequest {
        let name = email.split('@').next().unwrap_or(email);
        CreateAttendeeRequest {
            workshop_id: workshop_id.to_string(),
            name: name.to_string(),
            email: email.to_string(),
        }
    }

    /// A provisioning spec for an attendee without handles.
    pub fn attendee_spec(attendee_id: &str) -> AttendeeSpec {
        AttendeeSpec {
            attendee_id: attendee_id.to_string(),
            workshop_id: "workshop-1".to_string(),
            name: attendee_id.to_string(),
            email: format!("{}@example.com", attendee_id),
            external_id: None,
            project_id: None,
        }
    }
}
