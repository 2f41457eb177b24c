//! Scheduler configuration.

use serde::{Deserialize, Serialize};

/// Cadence and time limits of one periodic job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSchedule {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Time between ticks. A tick that finds the previous run still going is skipped.
    pub interval_secs: u64,

    /// After this the job stops taking new items and returns.
    pub soft_timeout_secs: u64,

    /// After this the run is cancelled and recorded as timed out.
    pub hard_timeout_secs: u64,
}

impl JobSchedule {
    pub fn new(interval_secs: u64, soft_timeout_secs: u64, hard_timeout_secs: u64) -> Self {
        Self {
            enabled: true,
            interval_secs,
            soft_timeout_secs,
            hard_timeout_secs,
        }
    }

    /// Check the timeout ordering: soft < hard < staleness threshold.
    pub fn validate(&self, name: &str, staleness_threshold_secs: u64) -> Result<(), String> {
        if self.interval_secs == 0 {
            return Err(format!("{}: interval_secs must be positive", name));
        }
        check_timeouts(
            name,
            self.soft_timeout_secs,
            self.hard_timeout_secs,
            staleness_threshold_secs,
        )
    }
}

/// Time limits for ad-hoc submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdhocTimeouts {
    pub soft_timeout_secs: u64,
    pub hard_timeout_secs: u64,
}

impl AdhocTimeouts {
    pub fn validate(&self, staleness_threshold_secs: u64) -> Result<(), String> {
        check_timeouts(
            "adhoc",
            self.soft_timeout_secs,
            self.hard_timeout_secs,
            staleness_threshold_secs,
        )
    }
}

fn check_timeouts(name: &str, soft: u64, hard: u64, staleness: u64) -> Result<(), String> {
    if soft == 0 {
        return Err(format!("{}: soft_timeout_secs must be positive", name));
    }
    if soft >= hard {
        return Err(format!(
            "{}: soft_timeout_secs ({}) must be less than hard_timeout_secs ({})",
            name, soft, hard
        ));
    }
    // A record left open by a cancelled run must not look stale while the run could still be alive.
    if hard >= staleness {
        return Err(format!(
            "{}: hard_timeout_secs ({}) must be less than the staleness threshold ({})",
            name, hard, staleness
        ));
    }
    Ok(())
}

/// Concurrency per lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneConfig {
    #[serde(default = "default_single")]
    pub status: usize,
    #[serde(default = "default_single")]
    pub lifecycle: usize,
    #[serde(default = "default_provisioning")]
    pub provisioning: usize,
}

impl Default for LaneConfig {
    fn default() -> Self {
        Self {
            status: default_single(),
            lifecycle: default_single(),
            provisioning: default_provisioning(),
        }
    }
}

/// Configuration for the task scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_reconcile_statuses")]
    pub reconcile_statuses: JobSchedule,

    #[serde(default = "default_process_lifecycle")]
    pub process_lifecycle: JobSchedule,

    #[serde(default = "default_health_check")]
    pub health_check: JobSchedule,

    #[serde(default = "default_adhoc")]
    pub adhoc: AdhocTimeouts,

    #[serde(default)]
    pub lanes: LaneConfig,
}

fn default_enabled() -> bool {
    true
}

fn default_single() -> usize {
    1
}

fn default_provisioning() -> usize {
    4
}

fn default_reconcile_statuses() -> JobSchedule {
    JobSchedule::new(30, 20, 60)
}

fn default_process_lifecycle() -> JobSchedule {
    JobSchedule::new(60, 240, 300)
}

fn default_health_check() -> JobSchedule {
    JobSchedule::new(300, 240, 300)
}

fn default_adhoc() -> AdhocTimeouts {
    AdhocTimeouts {
        soft_timeout_secs: 240,
        hard_timeout_secs: 300,
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            reconcile_statuses: default_reconcile_statuses(),
            process_lifecycle: default_process_lifecycle(),
            health_check: default_health_check(),
            adhoc: default_adhoc(),
            lanes: LaneConfig::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self, staleness_threshold_secs: u64) -> Result<(), String> {
        self.reconcile_statuses
            .validate("reconcile_statuses", staleness_threshold_secs)?;
        self.process_lifecycle
            .validate("process_lifecycle", staleness_threshold_secs)?;
        self.health_check
            .validate("health_check", staleness_threshold_secs)?;
        self.adhoc.validate(staleness_threshold_secs)?;

        if self.lanes.status == 0 || self.lanes.lifecycle == 0 || self.lanes.provisioning == 0 {
            return Err("lane concurrency must be at least 1".to_string());
        }
        Ok(())
    }
}
