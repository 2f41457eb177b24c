//! Provisioner that drives an external command-line tool.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::config::ProvisionerConfig;
use super::traits::Provisioner;
use super::types::{ProvisionError, ProvisionOutcome};
use crate::workshop::AttendeeSpec;

/// Exit code the tool uses to say the resources do not exist.
const EXIT_MISSING: i32 = 1;

/// Runs the configured program once per action.
///
/// The attendee is passed through the environment (`WORKSHOP_ID`,
/// `ATTENDEE_ID`, `ATTENDEE_EMAIL`, `EXTERNAL_ID`, `PROJECT_ID`). Exit status 0
/// is success. An apply may report handles with `external_id=...` and
/// `project_id=...` lines on stdout.
pub struct CommandProvisioner {
    config: ProvisionerConfig,
}

struct CommandOutput {
    code: Option<i32>,
    stdout: String,
    stderr: String,
}

impl CommandProvisioner {
    pub fn new(config: ProvisionerConfig) -> Self {
        Self { config }
    }

    async fn run(&self, action: &str, spec: &AttendeeSpec) -> Result<CommandOutput, ProvisionError> {
        let mut command = Command::new(&self.config.command);
        command
            .arg(action)
            .args(&self.config.args)
            .env("WORKSHOP_ID", &spec.workshop_id)
            .env("ATTENDEE_ID", &spec.attendee_id)
            .env("ATTENDEE_NAME", &spec.name)
            .env("ATTENDEE_EMAIL", &spec.email)
            .env("EXTERNAL_ID", spec.external_id.as_deref().unwrap_or(""))
            .env("PROJECT_ID", spec.project_id.as_deref().unwrap_or(""))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // A job cut off by its hard timeout drops this future; take the child with it.
            .kill_on_drop(true);

        if let Some(ref dir) = self.config.working_dir {
            command.current_dir(dir);
        }

        debug!(
            command = %self.config.command.display(),
            action,
            attendee_id = %spec.attendee_id,
            "Running provisioning command"
        );

        let output = command.output().await.map_err(|e| ProvisionError::Spawn {
            command: self.config.command.display().to_string(),
            source: e,
        })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn to_outcome(output: CommandOutput) -> ProvisionOutcome {
        if output.code == Some(0) {
            ProvisionOutcome {
                success: true,
                output: non_empty(output.stdout),
                error: None,
                external_id: None,
                project_id: None,
            }
        } else {
            let error = non_empty(output.stderr).unwrap_or_else(|| match output.code {
                Some(code) => format!("exited with status {}", code),
                None => "terminated by signal".to_string(),
            });
            ProvisionOutcome {
                success: false,
                output: non_empty(output.stdout),
                error: Some(error),
                external_id: None,
                project_id: None,
            }
        }
    }
}

fn non_empty(text: String) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Extract `external_id=` / `project_id=` values; the last occurrence wins.
fn parse_handles(stdout: &str) -> (Option<String>, Option<String>) {
    let mut external_id = None;
    let mut project_id = None;

    for line in stdout.lines() {
        let line = line.trim();
        if let Some(value) = line.strip_prefix("external_id=") {
            external_id = Some(value.trim().to_string()).filter(|v| !v.is_empty());
        } else if let Some(value) = line.strip_prefix("project_id=") {
            project_id = Some(value.trim().to_string()).filter(|v| !v.is_empty());
        }
    }

    (external_id, project_id)
}

#[async_trait]
impl Provisioner for CommandProvisioner {
    fn name(&self) -> &str {
        "command"
    }

    async fn apply(&self, spec: &AttendeeSpec) -> Result<ProvisionOutcome, ProvisionError> {
        let output = self.run("apply", spec).await?;
        let (external_id, project_id) = parse_handles(&output.stdout);
        let outcome = Self::to_outcome(output);

        if outcome.success {
            Ok(outcome.with_handles(external_id, project_id))
        } else {
            Ok(outcome)
        }
    }

    async fn destroy(&self, spec: &AttendeeSpec) -> Result<ProvisionOutcome, ProvisionError> {
        let output = self.run("destroy", spec).await?;
        Ok(Self::to_outcome(output))
    }

    async fn exists(&self, spec: &AttendeeSpec) -> Result<bool, ProvisionError> {
        let output = self.run("exists", spec).await?;
        match output.code {
            Some(0) => Ok(true),
            Some(EXIT_MISSING) => Ok(false),
            code => Err(ProvisionError::Protocol(format!(
                "exists check exited with {:?}: {}",
                code,
                output.stderr.trim()
            ))),
        }
    }
}
