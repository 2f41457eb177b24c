//! Deployment log: one record per provisioning action on one attendee.

mod recorder;
mod sqlite;
mod types;

pub use recorder::DeploymentRecorder;
pub use sqlite::SqliteDeploymentRecorder;
pub use types::{DeploymentAction, DeploymentError, DeploymentLog, DeploymentStatus};
