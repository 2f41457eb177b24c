//! Types for the task scheduler.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

/// Isolated execution pool. A slow job in one lane never delays another lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    /// Status reconciliation.
    Status,
    /// Lifecycle processing and cleanup.
    Lifecycle,
    /// Health checks and ad-hoc provisioning.
    Provisioning,
}

impl Lane {
    pub const ALL: [Lane; 3] = [Lane::Status, Lane::Lifecycle, Lane::Provisioning];

    pub fn as_str(&self) -> &'static str {
        match self {
            Lane::Status => "status",
            Lane::Lifecycle => "lifecycle",
            Lane::Provisioning => "provisioning",
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handed to every job run. Jobs poll it between items.
#[derive(Debug, Clone)]
pub struct JobContext {
    name: String,
    started: Instant,
    soft_deadline: Instant,
}

impl JobContext {
    pub fn new(name: impl Into<String>, soft_timeout: Duration) -> Self {
        let started = Instant::now();
        Self {
            name: name.into(),
            started,
            soft_deadline: started + soft_timeout,
        }
    }

    /// A context whose soft deadline is effectively never reached.
    pub fn unbounded(name: impl Into<String>) -> Self {
        Self::new(name, Duration::from_secs(365 * 24 * 3600))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Whether the job should stop taking new items.
    pub fn soft_deadline_passed(&self) -> bool {
        Instant::now() >= self.soft_deadline
    }

    /// Time left before the soft deadline.
    pub fn remaining(&self) -> Duration {
        self.soft_deadline.saturating_duration_since(Instant::now())
    }
}

/// What a job run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReport {
    /// Items looked at.
    pub examined: usize,
    /// Items whose state was written.
    pub changed: usize,
    /// Items whose handling failed (contained, the run carried on).
    pub failed: usize,
    /// The run stopped early at its soft deadline.
    pub checkpointed: bool,
}

impl JobReport {
    pub fn merge(&mut self, other: JobReport) {
        self.examined += other.examined;
        self.changed += other.changed;
        self.failed += other.failed;
        self.checkpointed |= other.checkpointed;
    }
}

/// Error returned by a job body.
pub type JobError = Box<dyn std::error::Error + Send + Sync>;

/// Boxed job future.
pub type JobFuture = BoxFuture<'static, Result<JobReport, JobError>>;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Succeeded,
    Failed,
    TimedOut,
}

impl JobOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::Succeeded => "succeeded",
            JobOutcome::Failed => "failed",
            JobOutcome::TimedOut => "timed_out",
        }
    }
}

/// Summary of one finished run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRun {
    pub job: String,
    pub lane: Lane,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub outcome: JobOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<JobReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-job view in [`SchedulerStatus`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub name: String,
    pub lane: Lane,
    pub interval_secs: u64,
    pub in_flight: bool,
    pub runs: u64,
    /// Ticks dropped because the previous run was still going.
    pub skipped_ticks: u64,
    pub last_run: Option<JobRun>,
}

/// Current status of the scheduler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub jobs: Vec<JobStatus>,
    /// Most recent ad-hoc runs, newest first.
    pub recent_adhoc: Vec<JobRun>,
}

/// Errors returned by the scheduler itself.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler is not running")]
    NotRunning,

    #[error("job already registered: {0}")]
    DuplicateJob(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_merge() {
        let mut total = JobReport {
            examined: 2,
            changed: 1,
            failed: 0,
            checkpointed: false,
        };
        total.merge(JobReport {
            examined: 3,
            changed: 0,
            failed: 1,
            checkpointed: true,
        });
        assert_eq!(total.examined, 5);
        assert_eq!(total.failed, 1);
        assert!(total.checkpointed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_context_soft_deadline() {
        let ctx = JobContext::new("job", Duration::from_secs(10));
        assert!(!ctx.soft_deadline_passed());
        assert_eq!(ctx.remaining(), Duration::from_secs(10));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(ctx.soft_deadline_passed());
        assert_eq!(ctx.remaining(), Duration::ZERO);
    }

    #[test]
    fn test_unbounded_context() {
        assert!(!JobContext::unbounded("manual").soft_deadline_passed());
    }
}
