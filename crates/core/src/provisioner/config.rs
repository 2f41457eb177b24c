//! Configuration for the command-line provisioner.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for [`CommandProvisioner`](super::CommandProvisioner).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionerConfig {
    /// Program to run. Receives `apply`, `destroy` or `exists` as its first argument.
    #[serde(default = "default_command")]
    pub command: PathBuf,

    /// Arguments appended after the action.
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory for the program (defaults to the worker's).
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

fn default_command() -> PathBuf {
    PathBuf::from("workshop-provision")
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
            args: Vec::new(),
            working_dir: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize() {
        let toml = r#"
            command = "/opt/provision/run.sh"
            args = ["--var-file", "workshop.tfvars"]
        "#;
        let config: ProvisionerConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.command, PathBuf::from("/opt/provision/run.sh"));
        assert_eq!(config.args.len(), 2);
        assert!(config.working_dir.is_none());
    }
}
