//! Lifecycle orchestrator implementation.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use tracing::{debug, info, warn};

use super::config::OrchestratorConfig;
use super::types::{
    AttendeeStatusReport, OperationResult, OrchestratorError, WorkshopStatusReport,
};
use crate::audit::{AuditEvent, AuditHandle};
use crate::deployment::{
    DeploymentAction, DeploymentError, DeploymentLog, DeploymentRecorder, DeploymentStatus,
};
use crate::metrics;
use crate::notify::{NotificationHandle, StatusNotification};
use crate::provisioner::{ProvisionError, ProvisionOutcome, Provisioner};
use crate::scheduler::{JobContext, JobReport};
use crate::workshop::{
    derive_workshop_status, Attendee, Status, Workshop, WorkshopFilter, WorkshopStore,
};

/// Per-item result inside a job run.
enum ItemResult {
    Unchanged,
    Changed,
    Failed,
    /// Not attempted because the soft deadline passed.
    Skipped,
}

fn fold_items(items: impl IntoIterator<Item = ItemResult>) -> JobReport {
    let mut report = JobReport::default();
    for item in items {
        match item {
            ItemResult::Unchanged => report.examined += 1,
            ItemResult::Changed => {
                report.examined += 1;
                report.changed += 1;
            }
            ItemResult::Failed => {
                report.examined += 1;
                report.failed += 1;
            }
            ItemResult::Skipped => report.checkpointed = true,
        }
    }
    report
}

/// Result of one provisioning call, after rate-limit waits.
enum CallResult {
    Finished(ProvisionOutcome),
    Error(String),
    TimedOut,
    RateLimited(u64),
}

/// Drives workshops and attendees through their lifecycle.
///
/// Every entry point is safe to run concurrently with itself in another
/// process: the only cross-worker exclusion is the recorder's one open
/// record per attendee.
pub struct LifecycleOrchestrator {
    config: OrchestratorConfig,
    workshops: Arc<dyn WorkshopStore>,
    deployments: Arc<dyn DeploymentRecorder>,
    provisioner: Arc<dyn Provisioner>,
    audit: Option<AuditHandle>,
    notifications: NotificationHandle,
}

impl LifecycleOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        workshops: Arc<dyn WorkshopStore>,
        deployments: Arc<dyn DeploymentRecorder>,
        provisioner: Arc<dyn Provisioner>,
        audit: Option<AuditHandle>,
        notifications: NotificationHandle,
    ) -> Self {
        Self {
            config,
            workshops,
            deployments,
            provisioner,
            audit,
            notifications,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    // =========================================================================
    // Scheduled jobs
    // =========================================================================

    /// Recompute and persist the status of every workshop that has attendees.
    pub async fn reconcile_statuses(
        &self,
        ctx: &JobContext,
    ) -> Result<JobReport, OrchestratorError> {
        let batch = self.config.batch_size;
        let mut report = JobReport::default();
        let mut offset = 0;

        loop {
            let filter = WorkshopFilter::new()
                .with_attendees()
                .with_limit(batch)
                .with_offset(offset);
            let page = self.workshops.list_workshops(&filter)?;
            let page_len = page.len() as i64;

            for workshop in page {
                if ctx.soft_deadline_passed() {
                    report.checkpointed = true;
                    return Ok(report);
                }

                report.examined += 1;
                match self.reconcile_workshop(&workshop).await {
                    Ok(Some(_)) => report.changed += 1,
                    Ok(None) => {}
                    Err(e) => {
                        report.failed += 1;
                        warn!(workshop_id = %workshop.id, error = %e, "Failed to reconcile workshop status");
                    }
                }
            }

            if page_len < batch {
                break;
            }
            offset += batch;
        }

        Ok(report)
    }

    /// Reclaim stale records, provision and tear down waiting attendees, then
    /// advance due deletions.
    pub async fn process_lifecycle(
        &self,
        ctx: &JobContext,
    ) -> Result<JobReport, OrchestratorError> {
        let mut report = self.reclaim_stale(ctx).await?;
        if !report.checkpointed {
            report.merge(self.provision_pending(ctx).await?);
        }
        if !report.checkpointed {
            report.merge(self.teardown_pending(ctx).await?);
        }
        if !report.checkpointed {
            report.merge(self.advance_deletions(ctx).await?);
        }
        Ok(report)
    }

    /// Probe active attendees and fail the ones that keep failing.
    pub async fn health_check(&self, ctx: &JobContext) -> Result<JobReport, OrchestratorError> {
        // Collected up front so failures moving attendees out of `active`
        // cannot shift later pages.
        let active = self.attendees_in_status(Status::Active)?;
        let parallel = self.config.max_parallel_operations.max(1);

        let results: Vec<ItemResult> = stream::iter(active)
            .map(|attendee| {
                async move {
                    if ctx.soft_deadline_passed() {
                        return ItemResult::Skipped;
                    }
                    match self.probe(&attendee).await {
                        Ok(true) => ItemResult::Changed,
                        Ok(false) => ItemResult::Unchanged,
                        Err(e) => {
                            warn!(attendee_id = %attendee.id, error = %e, "Health check failed to complete");
                            ItemResult::Failed
                        }
                    }
                }
                .boxed()
            })
            .buffer_unordered(parallel)
            .collect()
            .await;

        Ok(fold_items(results))
    }

    // =========================================================================
    // Upward operations
    // =========================================================================

    /// Reconcile one workshop now and return its current state.
    pub async fn reconcile_now(&self, workshop_id: &str) -> Result<Workshop, OrchestratorError> {
        let workshop = self.require_workshop(workshop_id)?;
        Ok(self
            .reconcile_workshop(&workshop)
            .await?
            .unwrap_or(workshop))
    }

    pub fn workshop_status(
        &self,
        workshop_id: &str,
    ) -> Result<WorkshopStatusReport, OrchestratorError> {
        let workshop = self.require_workshop(workshop_id)?;
        let attendees = self.workshops.list_attendees(workshop_id)?;

        let mut attendees_by_status = BTreeMap::new();
        for attendee in &attendees {
            *attendees_by_status.entry(attendee.status).or_insert(0) += 1;
        }

        Ok(WorkshopStatusReport {
            derived_status: derive_workshop_status(attendees.iter().map(|a| a.status)),
            attendee_count: attendees.len(),
            attendees_by_status,
            workshop,
        })
    }

    pub fn attendee_status(
        &self,
        attendee_id: &str,
    ) -> Result<AttendeeStatusReport, OrchestratorError> {
        let attendee = self.require_attendee(attendee_id)?;
        let open_deployment = self.deployments.open_record(attendee_id)?;
        Ok(AttendeeStatusReport {
            attendee,
            open_deployment,
        })
    }

    /// Set or clear the time after which the workshop is torn down.
    pub fn schedule_deletion(
        &self,
        workshop_id: &str,
        at: Option<DateTime<Utc>>,
    ) -> Result<Workshop, OrchestratorError> {
        let workshop = self.workshops.schedule_deletion(workshop_id, at)?;
        match at {
            Some(at) => info!(workshop_id, deletion_at = %at, "Workshop deletion scheduled"),
            None => info!(workshop_id, "Workshop deletion cancelled"),
        }
        Ok(workshop)
    }

    /// Pin the workshop to `status`, or unpin it and reconcile when `None`.
    pub async fn pin_status(
        &self,
        workshop_id: &str,
        status: Option<Status>,
    ) -> Result<Workshop, OrchestratorError> {
        let workshop = self.require_workshop(workshop_id)?;

        match status {
            Some(status) => {
                let pinned = self.workshops.set_status_pinned(workshop_id, true)?;
                info!(workshop_id, status = %status, "Workshop status pinned");
                if pinned.status == status {
                    return Ok(pinned);
                }
                self.transition_workshop(&pinned, status).await
            }
            None => {
                if !workshop.status_pinned {
                    return Ok(workshop);
                }
                let unpinned = self.workshops.set_status_pinned(workshop_id, false)?;
                info!(workshop_id, "Workshop status unpinned");
                Ok(self
                    .reconcile_workshop(&unpinned)
                    .await?
                    .unwrap_or(unpinned))
            }
        }
    }

    /// Reject an on-demand operation the attendee's current state does not
    /// allow. The open-record check here is advisory; opening the record is
    /// what actually serializes operations.
    pub fn check_operation(
        &self,
        attendee_id: &str,
        action: DeploymentAction,
    ) -> Result<Attendee, OrchestratorError> {
        let attendee = self.require_attendee(attendee_id)?;
        match action {
            DeploymentAction::Apply => {
                if matches!(attendee.status, Status::Deleting | Status::Completed) {
                    return Err(OrchestratorError::InvalidState(format!(
                        "attendee {} is {}",
                        attendee_id, attendee.status
                    )));
                }
                let workshop = self.require_workshop(&attendee.workshop_id)?;
                if workshop.deletion_due(Utc::now()) {
                    return Err(OrchestratorError::InvalidState(format!(
                        "workshop {} is due for deletion",
                        workshop.id
                    )));
                }
            }
            DeploymentAction::Destroy => {
                if attendee.status == Status::Completed {
                    return Err(OrchestratorError::InvalidState(format!(
                        "attendee {} is already torn down",
                        attendee_id
                    )));
                }
            }
        }

        if self.deployments.open_record_exists(&attendee.id)? {
            return Err(OrchestratorError::Conflict {
                attendee_id: attendee.id.clone(),
            });
        }
        Ok(attendee)
    }

    /// (Re-)provision one attendee right away.
    pub async fn provision_attendee(
        &self,
        ctx: &JobContext,
        attendee_id: &str,
    ) -> Result<OperationResult, OrchestratorError> {
        self.run_on_demand(ctx, attendee_id, DeploymentAction::Apply, Status::Deploying)
            .await
    }

    /// Tear one attendee down right away.
    pub async fn teardown_attendee(
        &self,
        ctx: &JobContext,
        attendee_id: &str,
    ) -> Result<OperationResult, OrchestratorError> {
        self.run_on_demand(ctx, attendee_id, DeploymentAction::Destroy, Status::Deleting)
            .await
    }

    /// Deployment records of an attendee, newest first. Outlives the workshop.
    pub fn deployment_history(
        &self,
        attendee_id: &str,
    ) -> Result<Vec<DeploymentLog>, OrchestratorError> {
        Ok(self.deployments.history(attendee_id)?)
    }

    // =========================================================================
    // process-lifecycle phases
    // =========================================================================

    async fn reclaim_stale(&self, ctx: &JobContext) -> Result<JobReport, OrchestratorError> {
        let cutoff =
            Utc::now() - chrono::Duration::seconds(self.config.staleness_threshold_secs as i64);
        let stale = self
            .deployments
            .stale_open_records(cutoff, self.config.batch_size)?;

        let mut items = Vec::with_capacity(stale.len());
        for log in stale {
            if ctx.soft_deadline_passed() {
                items.push(ItemResult::Skipped);
                break;
            }
            items.push(match self.reclaim_one(&log).await {
                Ok(true) => ItemResult::Changed,
                Ok(false) => ItemResult::Unchanged,
                Err(e) => {
                    warn!(log_id = %log.id, attendee_id = %log.attendee_id, error = %e, "Failed to reclaim stale deployment");
                    ItemResult::Failed
                }
            });
        }
        Ok(fold_items(items))
    }

    /// Close a stale record and fail its attendee. Returns false if another
    /// worker closed it first.
    async fn reclaim_one(&self, log: &DeploymentLog) -> Result<bool, OrchestratorError> {
        let reason = format!(
            "no result after {}s, presumed failed",
            self.config.staleness_threshold_secs
        );

        let closed = match self.deployments.complete(
            &log.id,
            DeploymentStatus::TimedOut,
            None,
            Some(&reason),
        ) {
            Ok(closed) => closed,
            Err(DeploymentError::NotFound(_)) => {
                debug!(log_id = %log.id, "Stale record already closed elsewhere");
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };

        metrics::STALE_RECLAIMS.inc();
        metrics::DEPLOYMENTS
            .with_label_values(&[closed.action.as_str(), closed.status.as_str()])
            .inc();
        warn!(
            log_id = %closed.id,
            attendee_id = %closed.attendee_id,
            action = %closed.action,
            started_at = %closed.started_at,
            "Reclaimed stale deployment"
        );
        self.emit(AuditEvent::StaleDeploymentReclaimed {
            workshop_id: closed.workshop_id.clone(),
            attendee_id: closed.attendee_id.clone(),
            log_id: closed.id.clone(),
            action: closed.action,
            started_at: closed.started_at,
        })
        .await;

        if let Some(attendee) = self.workshops.get_attendee(&closed.attendee_id)? {
            self.transition_attendee(&attendee, Status::Failed, Some(&reason))
                .await?;
        }
        self.refresh_workshop_status(&closed.workshop_id).await?;
        Ok(true)
    }

    async fn provision_pending(&self, ctx: &JobContext) -> Result<JobReport, OrchestratorError> {
        let now = Utc::now();
        let candidates = self.attendees_in_status(Status::Deploying)?;

        let mut deletion_due: HashMap<String, bool> = HashMap::new();
        let mut pending = Vec::new();
        let mut report = JobReport::default();

        for attendee in candidates {
            match self.awaiting_provisioning(&attendee, now, &mut deletion_due) {
                Ok(true) => pending.push(attendee),
                Ok(false) => {}
                Err(e) => {
                    report.examined += 1;
                    report.failed += 1;
                    warn!(attendee_id = %attendee.id, error = %e, "Failed to inspect attendee");
                }
            }
        }

        if !pending.is_empty() {
            debug!(count = pending.len(), "Provisioning attendees");
        }
        report.merge(self.run_batch(ctx, pending, DeploymentAction::Apply).await);
        Ok(report)
    }

    fn awaiting_provisioning(
        &self,
        attendee: &Attendee,
        now: DateTime<Utc>,
        deletion_due: &mut HashMap<String, bool>,
    ) -> Result<bool, OrchestratorError> {
        if self.deployments.open_record_exists(&attendee.id)? {
            return Ok(false);
        }

        let due = match deletion_due.get(&attendee.workshop_id) {
            Some(due) => *due,
            None => {
                let due = self
                    .workshops
                    .get_workshop(&attendee.workshop_id)?
                    .map_or(true, |w| w.deletion_due(now));
                deletion_due.insert(attendee.workshop_id.clone(), due);
                due
            }
        };
        if due {
            return Ok(false);
        }

        let last = self
            .deployments
            .last_completed(&attendee.id, DeploymentAction::Apply)?;
        Ok(last.map_or(true, |log| log.status == DeploymentStatus::Deferred))
    }

    /// Attendees left in `deleting` by a deferred or never started teardown,
    /// whether or not their workshop is due.
    async fn teardown_pending(&self, ctx: &JobContext) -> Result<JobReport, OrchestratorError> {
        let candidates = self.attendees_in_status(Status::Deleting)?;

        let mut pending = Vec::new();
        let mut report = JobReport::default();
        for attendee in candidates {
            match self.awaiting_teardown(&attendee) {
                Ok(true) => pending.push(attendee),
                Ok(false) => {}
                Err(e) => {
                    report.examined += 1;
                    report.failed += 1;
                    warn!(attendee_id = %attendee.id, error = %e, "Failed to inspect attendee");
                }
            }
        }

        if !pending.is_empty() {
            debug!(count = pending.len(), "Tearing down attendees");
        }
        report.merge(
            self.run_batch(ctx, pending, DeploymentAction::Destroy)
                .await,
        );
        Ok(report)
    }

    fn awaiting_teardown(&self, attendee: &Attendee) -> Result<bool, OrchestratorError> {
        if self.deployments.open_record_exists(&attendee.id)? {
            return Ok(false);
        }
        let last = self
            .deployments
            .last_completed(&attendee.id, DeploymentAction::Destroy)?;
        Ok(last.map_or(true, |log| log.status == DeploymentStatus::Deferred))
    }

    async fn advance_deletions(&self, ctx: &JobContext) -> Result<JobReport, OrchestratorError> {
        let filter = WorkshopFilter::new()
            .with_deletion_due_at(Utc::now())
            .with_limit(self.config.batch_size);
        let due = self.workshops.list_workshops(&filter)?;

        let mut report = JobReport::default();
        for workshop in due {
            if ctx.soft_deadline_passed() {
                report.checkpointed = true;
                break;
            }
            match self.advance_deletion(ctx, &workshop).await {
                Ok(workshop_report) => report.merge(workshop_report),
                Err(e) => {
                    report.examined += 1;
                    report.failed += 1;
                    warn!(workshop_id = %workshop.id, error = %e, "Failed to advance workshop deletion");
                }
            }
        }
        Ok(report)
    }

    async fn advance_deletion(
        &self,
        ctx: &JobContext,
        workshop: &Workshop,
    ) -> Result<JobReport, OrchestratorError> {
        let mut report = JobReport::default();
        let attendees = self.workshops.list_attendees(&workshop.id)?;

        if attendees.is_empty() {
            report.examined += 1;
            if self.finish_teardown(workshop, 0).await? {
                report.changed += 1;
            }
            return Ok(report);
        }

        // Mark everything that has not been torn down yet. A failed teardown
        // leaves a destroy record behind and is left for an operator.
        let mut marked = 0;
        for attendee in &attendees {
            if matches!(attendee.status, Status::Deleting | Status::Completed) {
                continue;
            }
            if self.deployments.open_record_exists(&attendee.id)? {
                continue;
            }
            if self
                .deployments
                .last_completed(&attendee.id, DeploymentAction::Destroy)?
                .is_some()
            {
                continue;
            }
            self.transition_attendee(attendee, Status::Deleting, None)
                .await?;
            marked += 1;
        }
        if marked > 0 {
            report.examined += marked;
            report.changed += marked;
            self.refresh_workshop_status(&workshop.id).await?;
        }

        let mut teardown = Vec::new();
        for attendee in self.workshops.list_attendees(&workshop.id)? {
            if attendee.status == Status::Deleting
                && !self.deployments.open_record_exists(&attendee.id)?
            {
                teardown.push(attendee);
            }
        }
        report.merge(
            self.run_batch(ctx, teardown, DeploymentAction::Destroy)
                .await,
        );
        if report.checkpointed {
            return Ok(report);
        }

        let remaining = self.workshops.list_attendees(&workshop.id)?;
        if remaining.iter().all(|a| a.status == Status::Completed) {
            for attendee in &remaining {
                if self.deployments.open_record_exists(&attendee.id)? {
                    return Ok(report);
                }
            }
            if self.finish_teardown(workshop, remaining.len()).await? {
                report.changed += 1;
            }
        }
        Ok(report)
    }

    /// Purge a fully torn down workshop, or mark it completed when purging is off.
    async fn finish_teardown(
        &self,
        workshop: &Workshop,
        attendee_count: usize,
    ) -> Result<bool, OrchestratorError> {
        if !self.config.purge_after_teardown {
            let current = self.require_workshop(&workshop.id)?;
            if current.status == Status::Completed || current.status_pinned {
                return Ok(false);
            }
            self.transition_workshop(&current, Status::Completed).await?;
            return Ok(true);
        }

        let deleted = self.workshops.delete_workshop(&workshop.id)?;
        info!(workshop_id = %deleted.id, name = %deleted.name, attendee_count, "Workshop purged");
        self.emit(AuditEvent::WorkshopPurged {
            workshop_id: deleted.id.clone(),
            name: deleted.name.clone(),
            attendee_count,
        })
        .await;
        Ok(true)
    }

    // =========================================================================
    // Attendee operations
    // =========================================================================

    /// Run one action per attendee with bounded parallelism.
    async fn run_batch(
        &self,
        ctx: &JobContext,
        attendees: Vec<Attendee>,
        action: DeploymentAction,
    ) -> JobReport {
        let parallel = self.config.max_parallel_operations.max(1);

        // Boxed so the spawned job future stays provably Send.
        let results: Vec<ItemResult> = stream::iter(attendees)
            .map(|attendee| {
                async move {
                    if ctx.soft_deadline_passed() {
                        return ItemResult::Skipped;
                    }
                    match self.run_operation(ctx, &attendee, action).await {
                        Ok(OperationResult::Deferred) => ItemResult::Unchanged,
                        Ok(_) => ItemResult::Changed,
                        Err(OrchestratorError::Conflict { .. }) => {
                            debug!(attendee_id = %attendee.id, action = %action, "Operation already in progress");
                            ItemResult::Unchanged
                        }
                        Err(e) => {
                            warn!(attendee_id = %attendee.id, action = %action, error = %e, "Attendee operation failed");
                            ItemResult::Failed
                        }
                    }
                }
                .boxed()
            })
            .buffer_unordered(parallel)
            .collect()
            .await;

        fold_items(results)
    }

    /// Open the record first and only then move the attendee, so a losing
    /// caller leaves no write behind.
    async fn run_on_demand(
        &self,
        ctx: &JobContext,
        attendee_id: &str,
        action: DeploymentAction,
        target: Status,
    ) -> Result<OperationResult, OrchestratorError> {
        let attendee = self.check_operation(attendee_id, action)?;
        let log = self.open_record(&attendee, action).await?;

        let moved = match self.transition_attendee(&attendee, target, None).await {
            Ok(moved) => moved,
            Err(e) => {
                self.abandon_record(&log, &e);
                return Err(e);
            }
        };
        if let Err(e) = self.refresh_workshop_status(&moved.workshop_id).await {
            self.abandon_record(&log, &e);
            return Err(e);
        }

        self.execute_operation(ctx, &moved, log).await
    }

    /// Open a record, call the provisioner and fold the result into the attendee.
    async fn run_operation(
        &self,
        ctx: &JobContext,
        attendee: &Attendee,
        action: DeploymentAction,
    ) -> Result<OperationResult, OrchestratorError> {
        let log = self.open_record(attendee, action).await?;
        self.execute_operation(ctx, attendee, log).await
    }

    /// Fails with `Conflict` while another operation holds the attendee.
    async fn open_record(
        &self,
        attendee: &Attendee,
        action: DeploymentAction,
    ) -> Result<DeploymentLog, OrchestratorError> {
        let log = self
            .deployments
            .begin(&attendee.id, &attendee.workshop_id, action)?;
        debug!(log_id = %log.id, attendee_id = %attendee.id, action = %action, "Deployment started");
        self.emit(AuditEvent::DeploymentStarted {
            workshop_id: log.workshop_id.clone(),
            attendee_id: log.attendee_id.clone(),
            log_id: log.id.clone(),
            action,
        })
        .await;
        Ok(log)
    }

    /// Close a record whose operation never reached the provisioner.
    fn abandon_record(&self, log: &DeploymentLog, cause: &OrchestratorError) {
        let reason = cause.to_string();
        if let Err(e) =
            self.deployments
                .complete(&log.id, DeploymentStatus::Failed, None, Some(&reason))
        {
            warn!(log_id = %log.id, error = %e, "Failed to close abandoned deployment");
        }
    }

    /// Call the provisioner for an open record and fold the result into the attendee.
    ///
    /// If this future is dropped mid-call the record stays open until the
    /// staleness path reclaims it.
    async fn execute_operation(
        &self,
        ctx: &JobContext,
        attendee: &Attendee,
        log: DeploymentLog,
    ) -> Result<OperationResult, OrchestratorError> {
        let action = log.action;
        let started = Instant::now();
        let call = self.call_provisioner(ctx, attendee, action).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let mut handles = None;
        let (status, output, error) = match call {
            CallResult::Finished(outcome) if outcome.success => {
                handles = Some((outcome.external_id, outcome.project_id));
                (DeploymentStatus::Succeeded, outcome.output, None)
            }
            CallResult::Finished(outcome) => (
                DeploymentStatus::Failed,
                outcome.output,
                Some(
                    outcome
                        .error
                        .unwrap_or_else(|| "provisioning reported failure".to_string()),
                ),
            ),
            CallResult::Error(e) => (DeploymentStatus::Failed, None, Some(e)),
            CallResult::TimedOut => (
                DeploymentStatus::TimedOut,
                None,
                Some(OrchestratorError::Timeout(self.config.operation_timeout_secs).to_string()),
            ),
            CallResult::RateLimited(retry_after_secs) => (
                DeploymentStatus::Deferred,
                None,
                Some(OrchestratorError::RateLimited { retry_after_secs }.to_string()),
            ),
        };

        let closed =
            self.deployments
                .complete(&log.id, status, output.as_deref(), error.as_deref())?;
        metrics::DEPLOYMENTS
            .with_label_values(&[action.as_str(), status.as_str()])
            .inc();
        self.emit(AuditEvent::DeploymentCompleted {
            workshop_id: closed.workshop_id.clone(),
            attendee_id: closed.attendee_id.clone(),
            log_id: closed.id.clone(),
            action,
            status,
            duration_ms,
            error: error.clone(),
        })
        .await;

        if status == DeploymentStatus::Deferred {
            info!(attendee_id = %attendee.id, action = %action, "Operation deferred by rate limit");
            return Ok(OperationResult::Deferred);
        }

        let mut current = self.require_attendee(&attendee.id)?;
        let (target, result) = match (action, status) {
            (DeploymentAction::Apply, DeploymentStatus::Succeeded) => {
                if let Some((external_id, project_id)) = handles {
                    if external_id.is_some() || project_id.is_some() {
                        current = self.workshops.set_attendee_handles(
                            &current.id,
                            external_id.as_deref(),
                            project_id.as_deref(),
                        )?;
                    }
                }
                if current.health_failures > 0 {
                    self.workshops.record_health_probe(&current.id, true)?;
                }
                (Status::Active, OperationResult::Succeeded)
            }
            (DeploymentAction::Destroy, DeploymentStatus::Succeeded) => {
                (Status::Completed, OperationResult::Succeeded)
            }
            _ => (Status::Failed, OperationResult::Failed),
        };

        if result == OperationResult::Failed {
            warn!(
                attendee_id = %attendee.id,
                action = %action,
                status = %status,
                error = error.as_deref(),
                "Deployment did not succeed"
            );
        } else {
            info!(attendee_id = %attendee.id, action = %action, duration_ms, "Deployment succeeded");
        }

        self.transition_attendee(&current, target, error.as_deref())
            .await?;
        self.refresh_workshop_status(&attendee.workshop_id).await?;
        Ok(result)
    }

    /// Call the provisioner, waiting out rate-limit denials while the budget
    /// and the soft deadline allow.
    async fn call_provisioner(
        &self,
        ctx: &JobContext,
        attendee: &Attendee,
        action: DeploymentAction,
    ) -> CallResult {
        let spec = attendee.spec();
        let timeout = Duration::from_secs(self.config.operation_timeout_secs);
        let mut waits = 0;

        loop {
            let call = async {
                match action {
                    DeploymentAction::Apply => self.provisioner.apply(&spec).await,
                    DeploymentAction::Destroy => self.provisioner.destroy(&spec).await,
                }
            };

            match tokio::time::timeout(timeout, call).await {
                Err(_) => return CallResult::TimedOut,
                Ok(Ok(outcome)) => return CallResult::Finished(outcome),
                Ok(Err(ProvisionError::RateLimited { retry_after_secs })) => {
                    let wait = Duration::from_secs(retry_after_secs);
                    if waits < self.config.max_rate_limit_waits && wait < ctx.remaining() {
                        waits += 1;
                        debug!(attendee_id = %attendee.id, retry_after_secs, waits, "Rate limited, waiting");
                        tokio::time::sleep(wait).await;
                        continue;
                    }
                    return CallResult::RateLimited(retry_after_secs);
                }
                Ok(Err(e)) => return CallResult::Error(e.to_string()),
            }
        }
    }

    /// Probe one attendee. Returns true if anything was written.
    async fn probe(&self, attendee: &Attendee) -> Result<bool, OrchestratorError> {
        if self.deployments.open_record_exists(&attendee.id)? {
            return Ok(false);
        }

        let timeout = Duration::from_secs(self.config.operation_timeout_secs);
        let healthy = match tokio::time::timeout(timeout, self.provisioner.exists(&attendee.spec())).await {
            Ok(Ok(exists)) => exists,
            Ok(Err(ProvisionError::RateLimited { retry_after_secs })) => {
                debug!(attendee_id = %attendee.id, retry_after_secs, "Health probe rate limited, skipping");
                return Ok(false);
            }
            Ok(Err(e)) => {
                debug!(attendee_id = %attendee.id, error = %e, "Health probe errored");
                false
            }
            Err(_) => {
                debug!(attendee_id = %attendee.id, "Health probe timed out");
                false
            }
        };

        if healthy {
            if attendee.health_failures == 0 {
                return Ok(false);
            }
            self.workshops.record_health_probe(&attendee.id, true)?;
            return Ok(true);
        }

        let failures = self.workshops.record_health_probe(&attendee.id, false)?;
        if failures < self.config.health_failure_threshold {
            warn!(attendee_id = %attendee.id, failures, "Attendee failed health check");
            return Ok(true);
        }

        let current = self.require_attendee(&attendee.id)?;
        if current.status != Status::Active {
            return Ok(true);
        }
        let reason = format!("health check failed {} consecutive times", failures);
        self.transition_attendee(&current, Status::Failed, Some(&reason))
            .await?;
        self.refresh_workshop_status(&current.workshop_id).await?;
        Ok(true)
    }

    // =========================================================================
    // Status writes
    // =========================================================================

    /// Persist the derived status if it differs. Returns the updated workshop on change.
    async fn reconcile_workshop(
        &self,
        workshop: &Workshop,
    ) -> Result<Option<Workshop>, OrchestratorError> {
        if workshop.status_pinned {
            return Ok(None);
        }

        let attendees = self.workshops.list_attendees(&workshop.id)?;
        if attendees.is_empty() && matches!(workshop.status, Status::Completed | Status::Deleting)
        {
            return Ok(None);
        }

        let derived = derive_workshop_status(attendees.iter().map(|a| a.status));
        if derived == workshop.status {
            return Ok(None);
        }
        Ok(Some(self.transition_workshop(workshop, derived).await?))
    }

    /// Re-read the workshop and reconcile it. A missing workshop is not an error.
    async fn refresh_workshop_status(&self, workshop_id: &str) -> Result<bool, OrchestratorError> {
        match self.workshops.get_workshop(workshop_id)? {
            Some(workshop) => Ok(self.reconcile_workshop(&workshop).await?.is_some()),
            None => Ok(false),
        }
    }

    async fn transition_workshop(
        &self,
        workshop: &Workshop,
        to: Status,
    ) -> Result<Workshop, OrchestratorError> {
        let updated = self.workshops.update_workshop_status(&workshop.id, to)?;

        metrics::STATUS_TRANSITIONS
            .with_label_values(&["workshop", to.as_str()])
            .inc();
        info!(workshop_id = %workshop.id, from = %workshop.status, to = %to, "Workshop status changed");

        self.emit(AuditEvent::WorkshopStatusChanged {
            workshop_id: workshop.id.clone(),
            from_status: workshop.status,
            to_status: to,
        })
        .await;
        self.notifications
            .notify(StatusNotification::workshop(&workshop.id, workshop.status, to));

        Ok(updated)
    }

    async fn transition_attendee(
        &self,
        attendee: &Attendee,
        to: Status,
        reason: Option<&str>,
    ) -> Result<Attendee, OrchestratorError> {
        if attendee.status == to && attendee.last_error.as_deref() == reason {
            return Ok(attendee.clone());
        }

        let updated = self
            .workshops
            .update_attendee_status(&attendee.id, to, reason)?;
        if attendee.status == to {
            return Ok(updated);
        }

        metrics::STATUS_TRANSITIONS
            .with_label_values(&["attendee", to.as_str()])
            .inc();
        info!(
            attendee_id = %attendee.id,
            workshop_id = %attendee.workshop_id,
            from = %attendee.status,
            to = %to,
            "Attendee status changed"
        );

        self.emit(AuditEvent::AttendeeStatusChanged {
            workshop_id: attendee.workshop_id.clone(),
            attendee_id: attendee.id.clone(),
            from_status: attendee.status,
            to_status: to,
            reason: reason.map(str::to_string),
        })
        .await;
        self.notifications.notify(StatusNotification::attendee(
            &attendee.workshop_id,
            &attendee.id,
            attendee.status,
            to,
            reason.map(str::to_string),
        ));

        Ok(updated)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn require_workshop(&self, id: &str) -> Result<Workshop, OrchestratorError> {
        self.workshops
            .get_workshop(id)?
            .ok_or_else(|| OrchestratorError::NotFound(format!("workshop {}", id)))
    }

    fn require_attendee(&self, id: &str) -> Result<Attendee, OrchestratorError> {
        self.workshops
            .get_attendee(id)?
            .ok_or_else(|| OrchestratorError::NotFound(format!("attendee {}", id)))
    }

    /// Every attendee in `status`, read page by page.
    fn attendees_in_status(&self, status: Status) -> Result<Vec<Attendee>, OrchestratorError> {
        let batch = self.config.batch_size.max(1);
        let mut attendees = Vec::new();
        let mut offset = 0;
        loop {
            let page = self
                .workshops
                .list_attendees_by_status(status, batch, offset)?;
            let page_len = page.len() as i64;
            attendees.extend(page);
            if page_len < batch {
                return Ok(attendees);
            }
            offset += batch;
        }
    }

    async fn emit(&self, event: AuditEvent) {
        if let Some(ref audit) = self.audit {
            audit.emit(event).await;
        }
    }
}
