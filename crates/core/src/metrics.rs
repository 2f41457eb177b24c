//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Scheduler (job runs, durations, timeouts)
//! - Orchestrator (deployments, status transitions, stale reclaims)
//! - Outbound calls (rate limiting, provisioning tool latency, notifications)

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Scheduler
// =============================================================================

/// Job runs by job and outcome.
pub static JOB_RUNS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("provisioner_job_runs_total", "Total scheduled job runs"),
        &["job", "outcome"], // "succeeded", "failed", "timed_out", "skipped"
    )
    .unwrap()
});

/// Job run duration in seconds.
pub static JOB_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("provisioner_job_duration_seconds", "Duration of job runs")
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0]),
        &["job"],
    )
    .unwrap()
});

// =============================================================================
// Orchestrator
// =============================================================================

/// Closed deployment records by action and final status.
pub static DEPLOYMENTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("provisioner_deployments_total", "Total closed deployment records"),
        &["action", "status"],
    )
    .unwrap()
});

/// Persisted status changes by subject and target status.
pub static STATUS_TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "provisioner_status_transitions_total",
            "Total persisted status changes",
        ),
        &["subject", "to"], // subject: "workshop", "attendee"
    )
    .unwrap()
});

/// Open records closed by the staleness path.
pub static STALE_RECLAIMS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "provisioner_stale_reclaims_total",
        "Total stale deployment records reclaimed",
    )
    .unwrap()
});

// =============================================================================
// Outbound calls
// =============================================================================

/// Rate limiter permits by class.
pub static RATE_LIMIT_PERMITS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("provisioner_rate_limit_permits_total", "Total permitted calls"),
        &["class"],
    )
    .unwrap()
});

/// Rate limiter denials by class.
pub static RATE_LIMIT_DENIALS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("provisioner_rate_limit_denials_total", "Total denied calls"),
        &["class"],
    )
    .unwrap()
});

/// Provisioning tool call duration in seconds.
pub static EXTERNAL_CALL_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "provisioner_external_call_duration_seconds",
            "Duration of provisioning tool calls",
        )
        .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0]),
        &["operation"], // "apply", "destroy", "exists"
    )
    .unwrap()
});

/// Notifications by outcome.
pub static NOTIFICATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("provisioner_notifications_total", "Total status notifications"),
        &["outcome"], // "delivered", "failed", "dropped"
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Scheduler
        Box::new(JOB_RUNS.clone()),
        Box::new(JOB_DURATION.clone()),
        // Orchestrator
        Box::new(DEPLOYMENTS.clone()),
        Box::new(STATUS_TRANSITIONS.clone()),
        Box::new(STALE_RECLAIMS.clone()),
        // Outbound
        Box::new(RATE_LIMIT_PERMITS.clone()),
        Box::new(RATE_LIMIT_DENIALS.clone()),
        Box::new(EXTERNAL_CALL_DURATION.clone()),
        Box::new(NOTIFICATIONS.clone()),
    ]
}
