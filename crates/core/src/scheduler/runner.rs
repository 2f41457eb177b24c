//! Scheduler runner: lanes, periodic tickers and ad-hoc submissions.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::config::{AdhocTimeouts, JobSchedule, SchedulerConfig};
use super::types::{
    JobContext, JobError, JobFuture, JobOutcome, JobReport, JobRun, JobStatus, Lane,
    SchedulerError, SchedulerStatus,
};
use crate::audit::{AuditEvent, AuditHandle};
use crate::metrics;

/// Number of ad-hoc runs kept for [`Scheduler::status`].
const RECENT_ADHOC_LIMIT: usize = 32;

type JobFn = Arc<dyn Fn(JobContext) -> JobFuture + Send + Sync>;

#[derive(Clone)]
struct PeriodicJob {
    name: String,
    lane: Lane,
    schedule: JobSchedule,
    job: JobFn,
    in_flight: Arc<AtomicBool>,
}

struct JobState {
    lane: Lane,
    interval_secs: u64,
    in_flight: Arc<AtomicBool>,
    runs: u64,
    skipped_ticks: u64,
    last_run: Option<JobRun>,
}

/// State shared with ticker and run tasks.
struct Shared {
    status_lane: Semaphore,
    lifecycle_lane: Semaphore,
    provisioning_lane: Semaphore,
    jobs: Mutex<HashMap<String, JobState>>,
    recent_adhoc: Mutex<VecDeque<JobRun>>,
    audit: Option<AuditHandle>,
}

impl Shared {
    fn lane(&self, lane: Lane) -> &Semaphore {
        match lane {
            Lane::Status => &self.status_lane,
            Lane::Lifecycle => &self.lifecycle_lane,
            Lane::Provisioning => &self.provisioning_lane,
        }
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<String, JobState>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn recent_adhoc(&self) -> MutexGuard<'_, VecDeque<JobRun>> {
        self.recent_adhoc.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record_periodic(&self, run: JobRun) {
        if let Some(state) = self.jobs().get_mut(&run.job) {
            state.runs += 1;
            state.last_run = Some(run);
        }
    }

    fn record_skipped(&self, name: &str) {
        if let Some(state) = self.jobs().get_mut(name) {
            state.skipped_ticks += 1;
        }
    }

    fn record_adhoc(&self, run: JobRun) {
        let mut recent = self.recent_adhoc();
        recent.push_front(run);
        recent.truncate(RECENT_ADHOC_LIMIT);
    }
}

/// Clears the in-flight flag even if the run panics.
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Runs periodic and ad-hoc jobs on isolated lanes with soft and hard timeouts.
pub struct Scheduler {
    shared: Arc<Shared>,
    adhoc: AdhocTimeouts,
    periodic: Mutex<Vec<PeriodicJob>>,
    tickers: Mutex<Vec<JoinHandle<()>>>,
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Scheduler {
    pub fn new(config: &SchedulerConfig, audit: Option<AuditHandle>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let shared = Shared {
            status_lane: Semaphore::new(config.lanes.status.max(1)),
            lifecycle_lane: Semaphore::new(config.lanes.lifecycle.max(1)),
            provisioning_lane: Semaphore::new(config.lanes.provisioning.max(1)),
            jobs: Mutex::new(HashMap::new()),
            recent_adhoc: Mutex::new(VecDeque::new()),
            audit,
        };

        Self {
            shared: Arc::new(shared),
            adhoc: config.adhoc,
            periodic: Mutex::new(Vec::new()),
            tickers: Mutex::new(Vec::new()),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        }
    }

    /// Register a periodic job. Disabled schedules are accepted and ignored.
    ///
    /// Jobs registered after [`start`](Self::start) begin ticking immediately.
    pub fn every<F, Fut>(
        &self,
        name: impl Into<String>,
        lane: Lane,
        schedule: JobSchedule,
        job: F,
    ) -> Result<(), SchedulerError>
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<JobReport, JobError>> + Send + 'static,
    {
        let name = name.into();
        if !schedule.enabled {
            info!(job = %name, "Job disabled, not scheduling");
            return Ok(());
        }

        let in_flight = Arc::new(AtomicBool::new(false));
        {
            let mut jobs = self.shared.jobs();
            if jobs.contains_key(&name) {
                return Err(SchedulerError::DuplicateJob(name));
            }
            jobs.insert(
                name.clone(),
                JobState {
                    lane,
                    interval_secs: schedule.interval_secs,
                    in_flight: in_flight.clone(),
                    runs: 0,
                    skipped_ticks: 0,
                    last_run: None,
                },
            );
        }

        let job: JobFn = Arc::new(move |ctx| Box::pin(job(ctx)) as JobFuture);
        let periodic = PeriodicJob {
            name,
            lane,
            schedule,
            job,
            in_flight,
        };

        if self.running.load(Ordering::SeqCst) {
            let handle = self.spawn_ticker(periodic.clone());
            lock(&self.tickers).push(handle);
        }
        lock(&self.periodic).push(periodic);
        Ok(())
    }

    /// Start ticking every registered job.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Scheduler already running");
            return;
        }

        let periodic = lock(&self.periodic).clone();
        info!(jobs = periodic.len(), "Starting scheduler");

        let handles: Vec<_> = periodic
            .into_iter()
            .map(|job| self.spawn_ticker(job))
            .collect();
        lock(&self.tickers).extend(handles);
    }

    /// Stop the tickers. Runs already in progress finish under their own hard timeout.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        info!("Stopping scheduler");
        let _ = self.shutdown_tx.send(());

        let handles: Vec<_> = lock(&self.tickers).drain(..).collect();
        for handle in handles {
            if tokio::time::timeout(Duration::from_millis(500), handle)
                .await
                .is_err()
            {
                warn!("Ticker did not stop in time");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run a one-off job on a lane under the ad-hoc timeouts.
    ///
    /// The returned handle resolves to the run summary; dropping it does not
    /// cancel the run.
    pub fn submit<F, Fut>(
        &self,
        lane: Lane,
        name: impl Into<String>,
        job: F,
    ) -> Result<JoinHandle<JobRun>, SchedulerError>
    where
        F: FnOnce(JobContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<JobReport, JobError>> + Send + 'static,
    {
        if !self.is_running() {
            return Err(SchedulerError::NotRunning);
        }

        let name = name.into();
        let shared = self.shared.clone();
        let soft = Duration::from_secs(self.adhoc.soft_timeout_secs);
        let hard = Duration::from_secs(self.adhoc.hard_timeout_secs);

        debug!(job = %name, lane = %lane, "Submitting ad-hoc job");
        Ok(tokio::spawn(async move {
            let run = execute(&shared, &name, lane, soft, hard, job).await;
            shared.record_adhoc(run.clone());
            run
        }))
    }

    pub fn status(&self) -> SchedulerStatus {
        let mut jobs: Vec<JobStatus> = self
            .shared
            .jobs()
            .iter()
            .map(|(name, state)| JobStatus {
                name: name.clone(),
                lane: state.lane,
                interval_secs: state.interval_secs,
                in_flight: state.in_flight.load(Ordering::SeqCst),
                runs: state.runs,
                skipped_ticks: state.skipped_ticks,
                last_run: state.last_run.clone(),
            })
            .collect();
        jobs.sort_by(|a, b| a.name.cmp(&b.name));

        SchedulerStatus {
            running: self.is_running(),
            jobs,
            recent_adhoc: self.shared.recent_adhoc().iter().cloned().collect(),
        }
    }

    fn spawn_ticker(&self, job: PeriodicJob) -> JoinHandle<()> {
        let shared = self.shared.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let period = Duration::from_secs(job.schedule.interval_secs.max(1));
            let soft = Duration::from_secs(job.schedule.soft_timeout_secs);
            let hard = Duration::from_secs(job.schedule.hard_timeout_secs);

            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(job = %job.name, lane = %job.lane, interval_secs = job.schedule.interval_secs, "Job ticker started");

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!(job = %job.name, "Job ticker received shutdown");
                        break;
                    }
                    _ = ticker.tick() => {
                        if job.in_flight.swap(true, Ordering::SeqCst) {
                            debug!(job = %job.name, "Previous run still in flight, skipping tick");
                            metrics::JOB_RUNS.with_label_values(&[job.name.as_str(), "skipped"]).inc();
                            shared.record_skipped(&job.name);
                            continue;
                        }

                        let guard = InFlightGuard(job.in_flight.clone());
                        let shared = shared.clone();
                        let name = job.name.clone();
                        let lane = job.lane;
                        let body = job.job.clone();
                        tokio::spawn(async move {
                            let _guard = guard;
                            let run = execute(&shared, &name, lane, soft, hard, |ctx| body(ctx)).await;
                            shared.record_periodic(run);
                        });
                    }
                }
            }
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Run one job body: wait for a lane permit, then enforce the hard timeout.
async fn execute<F, Fut>(
    shared: &Shared,
    name: &str,
    lane: Lane,
    soft: Duration,
    hard: Duration,
    job: F,
) -> JobRun
where
    F: FnOnce(JobContext) -> Fut,
    Fut: Future<Output = Result<JobReport, JobError>>,
{
    let _permit = match shared.lane(lane).acquire().await {
        Ok(permit) => permit,
        Err(e) => {
            error!(job = %name, lane = %lane, "Lane closed: {}", e);
            return JobRun {
                job: name.to_string(),
                lane,
                started_at: Utc::now(),
                duration_ms: 0,
                outcome: JobOutcome::Failed,
                report: None,
                error: Some(format!("lane {} closed", lane)),
            };
        }
    };

    let started_at = Utc::now();
    let started = Instant::now();
    let ctx = JobContext::new(name, soft);

    let result = tokio::time::timeout(hard, job(ctx)).await;
    let duration = started.elapsed();
    let duration_ms = duration.as_millis() as u64;

    let (outcome, report, error) = match result {
        Ok(Ok(report)) => (JobOutcome::Succeeded, Some(report), None),
        Ok(Err(e)) => (JobOutcome::Failed, None, Some(e.to_string())),
        Err(_) => (
            JobOutcome::TimedOut,
            None,
            Some(format!("exceeded hard timeout of {}s", hard.as_secs())),
        ),
    };

    metrics::JOB_RUNS
        .with_label_values(&[name, outcome.as_str()])
        .inc();
    metrics::JOB_DURATION
        .with_label_values(&[name])
        .observe(duration.as_secs_f64());

    match (outcome, &report) {
        (JobOutcome::Succeeded, Some(report)) => {
            if report.changed > 0 || report.failed > 0 || report.checkpointed {
                info!(
                    job = %name,
                    duration_ms,
                    examined = report.examined,
                    changed = report.changed,
                    failed = report.failed,
                    checkpointed = report.checkpointed,
                    "Job completed"
                );
            } else {
                debug!(job = %name, duration_ms, examined = report.examined, "Job completed");
            }
            if let Some(ref audit) = shared.audit {
                audit
                    .emit(AuditEvent::JobCompleted {
                        job: name.to_string(),
                        duration_ms,
                        examined: report.examined,
                        changed: report.changed,
                        failed: report.failed,
                        checkpointed: report.checkpointed,
                    })
                    .await;
            }
        }
        (JobOutcome::TimedOut, _) => {
            error!(job = %name, timeout_secs = hard.as_secs(), "Job exceeded hard timeout and was cancelled");
            if let Some(ref audit) = shared.audit {
                audit
                    .emit(AuditEvent::JobTimedOut {
                        job: name.to_string(),
                        timeout_secs: hard.as_secs(),
                    })
                    .await;
            }
        }
        _ => {
            error!(job = %name, duration_ms, error = error.as_deref(), "Job failed");
        }
    }

    JobRun {
        job: name.to_string(),
        lane,
        started_at,
        duration_ms,
        outcome,
        report,
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::LaneConfig;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            adhoc: AdhocTimeouts {
                soft_timeout_secs: 5,
                hard_timeout_secs: 10,
            },
            lanes: LaneConfig {
                status: 1,
                lifecycle: 1,
                provisioning: 1,
            },
            ..Default::default()
        }
    }

    fn counting_job(
        counter: Arc<AtomicUsize>,
        work: Duration,
    ) -> impl Fn(JobContext) -> JobFuture + Send + Sync + 'static {
        move |_ctx| {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(work).await;
                Ok(JobReport::default())
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_job_runs_each_interval() {
        let scheduler = Scheduler::new(&config(), None);
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler
            .every(
                "reconcile_statuses",
                Lane::Status,
                JobSchedule::new(1, 1, 2),
                counting_job(counter.clone(), Duration::ZERO),
            )
            .unwrap();

        scheduler.start();
        tokio::time::sleep(Duration::from_millis(3500)).await;
        scheduler.stop().await;

        // Ticks at 0s, 1s, 2s and 3s.
        let runs = counter.load(Ordering::SeqCst);
        assert!(runs >= 3);
        let status = scheduler.status();
        assert!(!status.running);
        assert_eq!(status.jobs.len(), 1);
        assert_eq!(status.jobs[0].runs, runs as u64);
        assert_eq!(
            status.jobs[0].last_run.as_ref().map(|r| r.outcome),
            Some(JobOutcome::Succeeded)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_skipped_while_in_flight() {
        let scheduler = Scheduler::new(&config(), None);
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler
            .every(
                "process_lifecycle",
                Lane::Lifecycle,
                JobSchedule::new(1, 20, 30),
                counting_job(counter.clone(), Duration::from_secs(10)),
            )
            .unwrap();

        scheduler.start();
        tokio::time::sleep(Duration::from_millis(3500)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        let status = scheduler.status();
        assert!(status.jobs[0].in_flight);
        assert!(status.jobs[0].skipped_ticks >= 2);

        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_job_is_not_scheduled() {
        let scheduler = Scheduler::new(&config(), None);
        let counter = Arc::new(AtomicUsize::new(0));
        let mut schedule = JobSchedule::new(1, 1, 2);
        schedule.enabled = false;
        scheduler
            .every("health_check", Lane::Provisioning, schedule, counting_job(counter.clone(), Duration::ZERO))
            .unwrap();

        scheduler.start();
        tokio::time::sleep(Duration::from_secs(3)).await;
        scheduler.stop().await;

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(scheduler.status().jobs.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_job_rejected() {
        let scheduler = Scheduler::new(&config(), None);
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler
            .every("job", Lane::Status, JobSchedule::new(1, 1, 2), counting_job(counter.clone(), Duration::ZERO))
            .unwrap();
        let result = scheduler.every("job", Lane::Status, JobSchedule::new(1, 1, 2), counting_job(counter, Duration::ZERO));
        assert!(matches!(result, Err(SchedulerError::DuplicateJob(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_timeout_cancels_run() {
        let (tx, mut rx) = mpsc::channel(16);
        let scheduler = Scheduler::new(&config(), Some(AuditHandle::new(tx)));
        scheduler.start();

        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let run = scheduler
            .submit(Lane::Provisioning, "provision:a-1", move |_ctx| async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                flag.store(true, Ordering::SeqCst);
                Ok(JobReport::default())
            })
            .unwrap()
            .await
            .unwrap();

        assert_eq!(run.outcome, JobOutcome::TimedOut);
        assert!(run.error.unwrap().contains("hard timeout"));
        assert!(!finished.load(Ordering::SeqCst));

        let envelope = rx.recv().await.unwrap();
        assert!(matches!(
            envelope.event,
            AuditEvent::JobTimedOut { ref job, timeout_secs: 10 } if job == "provision:a-1"
        ));

        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_failed_job_recorded() {
        let scheduler = Scheduler::new(&config(), None);
        scheduler.start();

        let run = scheduler
            .submit(Lane::Status, "broken", |_ctx| async {
                Err::<JobReport, JobError>("store unavailable".into())
            })
            .unwrap()
            .await
            .unwrap();

        assert_eq!(run.outcome, JobOutcome::Failed);
        assert_eq!(run.error.as_deref(), Some("store unavailable"));

        let status = scheduler.status();
        assert_eq!(status.recent_adhoc.len(), 1);
        assert_eq!(status.recent_adhoc[0].job, "broken");

        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_context_carries_soft_deadline() {
        let scheduler = Scheduler::new(&config(), None);
        scheduler.start();

        let run = scheduler
            .submit(Lane::Lifecycle, "checkpointing", |ctx| async move {
                let mut report = JobReport::default();
                while !ctx.soft_deadline_passed() {
                    report.examined += 1;
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                report.checkpointed = true;
                Ok(report)
            })
            .unwrap()
            .await
            .unwrap();

        assert_eq!(run.outcome, JobOutcome::Succeeded);
        let report = run.report.unwrap();
        assert!(report.checkpointed);
        assert_eq!(report.examined, 5);

        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_lane_does_not_block_other_lanes() {
        let scheduler = Scheduler::new(&config(), None);
        scheduler.start();

        let slow = scheduler
            .submit(Lane::Provisioning, "slow", |_ctx| async {
                tokio::time::sleep(Duration::from_secs(8)).await;
                Ok(JobReport::default())
            })
            .unwrap();
        tokio::task::yield_now().await;

        let fast = scheduler
            .submit(Lane::Status, "fast", |_ctx| async { Ok(JobReport::default()) })
            .unwrap()
            .await
            .unwrap();
        assert_eq!(fast.outcome, JobOutcome::Succeeded);
        assert!(!slow.is_finished());

        assert_eq!(slow.await.unwrap().outcome, JobOutcome::Succeeded);
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_lane_serializes_runs() {
        let scheduler = Scheduler::new(&config(), None);
        scheduler.start();

        let first_done = Arc::new(AtomicBool::new(false));

        let done = first_done.clone();
        let first = scheduler
            .submit(Lane::Provisioning, "first", move |_ctx| async move {
                tokio::time::sleep(Duration::from_secs(3)).await;
                done.store(true, Ordering::SeqCst);
                Ok(JobReport::default())
            })
            .unwrap();
        tokio::task::yield_now().await;

        let done = first_done.clone();
        let second = scheduler
            .submit(Lane::Provisioning, "second", move |_ctx| async move {
                // Only starts once the single provisioning permit is released.
                let examined = usize::from(done.load(Ordering::SeqCst));
                Ok(JobReport {
                    examined,
                    ..Default::default()
                })
            })
            .unwrap();

        assert!(first.await.unwrap().duration_ms >= 3000);
        let second = second.await.unwrap();
        assert_eq!(second.report.map(|r| r.examined), Some(1));
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_submit_requires_running() {
        let scheduler = Scheduler::new(&config(), None);
        let result = scheduler.submit(Lane::Status, "early", |_ctx| async { Ok(JobReport::default()) });
        assert!(matches!(result, Err(SchedulerError::NotRunning)));
    }

    #[tokio::test]
    async fn test_start_stop_idempotent() {
        let scheduler = Scheduler::new(&config(), None);
        scheduler.start();
        scheduler.start();
        assert!(scheduler.is_running());
        scheduler.stop().await;
        scheduler.stop().await;
        assert!(!scheduler.is_running());
    }
}
