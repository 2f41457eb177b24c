//! Provisioning collaborator: creates and tears down attendee resources.

mod command;
mod config;
mod gateway;
mod traits;
mod types;

pub use command::CommandProvisioner;
pub use config::ProvisionerConfig;
pub use gateway::ProvisioningGateway;
pub use traits::Provisioner;
pub use types::{ProvisionError, ProvisionOutcome};
