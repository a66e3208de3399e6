//! Sync scheduler
//!
//! The scheduler ticks at a fixed interval. Every tick hands stale started
//! records back and queues one job for each tracker whose budget allows work.
//! Expired account tokens are refreshed by a background round started on the
//! tick; accounts waiting for a token are skipped until that round renews it.
//! A pool of workers executes queued jobs, including the continuations and
//! delayed retries the jobs queue themselves.
//!
//! A tracker owns at most one job chain at a time: it stays claimed from the
//! moment a tick queues its job until the last job of the chain finishes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::auth::TokenRefresher;
use crate::config::SchedulerConfig;
use crate::error::SyncError;
use crate::models::EndpointKind;
use crate::otel::SyncMetrics;

use super::engine::SyncEngine;
use super::gate::{TrackerGate, TrackerLocks};
use super::jobs::{Job, JobOutcome, JobReport, JobResult};

/// Status of the most recent job of a tracker
#[derive(Debug, Clone, Default)]
pub struct SyncStatus {
    /// When the last job finished
    pub last_run: Option<DateTime<Utc>>,
    /// Last job result
    pub last_result: Option<Result<JobResult, String>>,
    /// Whether a job is currently running
    pub in_progress: bool,
}

/// Manual sync request
struct ManualSyncRequest {
    tracker_id: i64,
    response: oneshot::Sender<Result<JobResult, SyncError>>,
}

/// Executes jobs and keeps per-tracker bookkeeping
#[derive(Clone)]
struct JobRunner {
    engine: Arc<SyncEngine>,
    refresher: Option<Arc<TokenRefresher>>,
    metrics: Option<Arc<SyncMetrics>>,
    gate: Arc<TrackerGate>,
    locks: Arc<TrackerLocks>,
    status: Arc<RwLock<HashMap<i64, SyncStatus>>>,
}

impl JobRunner {
    async fn tick(&self, now: DateTime<Utc>) -> Result<usize, SyncError> {
        if let Err(err) = self.engine.reclaim_stale(now).await {
            warn!(error = %err, "Reclaiming stale records failed");
        }

        let awaiting_token = self.accounts_awaiting_token(now).await?;
        let jobs = self.engine.tick_jobs_except(now, &awaiting_token).await?;
        let queue = self.engine.queue();
        let mut queued = 0;

        for job in jobs {
            let tracker_id = job.tracker_id();
            if !self.gate.try_claim(tracker_id) {
                debug!(tracker_id = tracker_id, "Tracker busy, skipped this tick");
                continue;
            }
            if let Err(err) = queue.enqueue_now(job).await {
                self.gate.release(tracker_id);
                return Err(err);
            }
            queued += 1;
        }

        if queued > 0 {
            info!(jobs = queued, "Sync jobs queued");
        }
        Ok(queued)
    }

    /// Accounts left out of planning until the refresher has renewed their token
    async fn accounts_awaiting_token(
        &self,
        now: DateTime<Utc>,
    ) -> Result<HashSet<i64>, SyncError> {
        if self.refresher.is_none() {
            return Ok(HashSet::new());
        }
        let accounts = self.engine.db().list_accounts().await?;
        Ok(accounts
            .iter()
            .filter(|account| account.token_expired(now))
            .map(|account| account.id)
            .collect())
    }

    /// Refresh expired tokens, then queue the jobs of the refreshed accounts
    async fn refresh_round(self, now: DateTime<Utc>) {
        let Some(refresher) = self.refresher.clone() else {
            return;
        };

        match refresher.refresh_expired(now).await {
            Ok(summary) if summary.refreshed > 0 => {
                if let Err(err) = self.tick(Utc::now()).await {
                    warn!(error = %err, "Planning after token refresh failed");
                }
            }
            Ok(_) => {}
            Err(err) => warn!(error = %err, "Token refresh round failed"),
        }
    }

    async fn execute(&self, job: Job) -> Result<JobResult, SyncError> {
        let tracker_id = job.tracker_id();
        let lock = self.locks.lock_for(tracker_id);
        let _guard = lock.lock().await;

        self.status
            .write()
            .await
            .entry(tracker_id)
            .or_default()
            .in_progress = true;

        let started = Instant::now();
        let result = self.engine.run_job(&job).await;
        let elapsed = started.elapsed().as_secs_f64();

        match &result {
            Ok(job_result) => {
                info!(
                    job = job.kind(),
                    tracker_id = tracker_id,
                    outcome = job_result.outcome.as_str(),
                    requests = job_result.report.requests,
                    discovered = job_result.report.discovered,
                    finished = job_result.report.finished,
                    failed = job_result.report.failed,
                    duration_secs = elapsed,
                    "Sync job finished"
                );
            }
            Err(err) if err.is_transient() => {
                warn!(
                    job = job.kind(),
                    tracker_id = tracker_id,
                    error = %err,
                    "Sync job interrupted"
                );
            }
            Err(err) => {
                error!(
                    job = job.kind(),
                    tracker_id = tracker_id,
                    error = %err,
                    "Sync job failed"
                );
            }
        }

        self.record_metrics(&job, &result, elapsed);

        {
            let mut status_map = self.status.write().await;
            let status = status_map.entry(tracker_id).or_default();
            status.in_progress = false;
            status.last_run = Some(Utc::now());
            status.last_result = Some(result.clone().map_err(|e| e.to_string()));
        }

        let follow_up = matches!(&result, Ok(r) if r.outcome.has_follow_up());
        if !follow_up {
            self.gate.release(tracker_id);
        }

        result
    }

    fn record_metrics(&self, job: &Job, result: &Result<JobResult, SyncError>, elapsed: f64) {
        let Some(metrics) = &self.metrics else {
            return;
        };
        let endpoint = match job {
            Job::ListSync { .. } => EndpointKind::ShipmentList,
            Job::DetailSync { .. } => EndpointKind::ShipmentDetail,
        };

        match result {
            Ok(job_result) => {
                let report = &job_result.report;
                metrics.record_requests(endpoint.as_str(), report.requests);
                metrics.record_discovered(report.discovered);
                metrics.record_details(report.finished, report.failed);
                if matches!(
                    job_result.outcome,
                    JobOutcome::RateLimited { .. } | JobOutcome::Suspended { .. }
                ) {
                    metrics.record_rate_limited(endpoint.as_str());
                }
                metrics.record_job_duration(job.kind(), job_result.outcome.as_str(), elapsed);
            }
            Err(err) => {
                let kind = if err.is_transient() { "transient" } else { "fatal" };
                metrics.record_job_failure(job.kind(), kind);
                metrics.record_job_duration(job.kind(), "failed", elapsed);
            }
        }
    }

    fn handle_manual_sync(&self, request: ManualSyncRequest) {
        let tracker_id = request.tracker_id;

        if !self.gate.try_claim(tracker_id) {
            warn!(tracker_id = tracker_id, "Manual sync requested for busy tracker");
            let _ = request.response.send(Err(SyncError::TrackerBusy(tracker_id)));
            return;
        }

        info!(tracker_id = tracker_id, "Manual sync triggered");
        let runner = self.clone();
        tokio::spawn(async move {
            let result = match runner.engine.job_for_tracker(tracker_id).await {
                Ok(Some(job)) => runner.execute(job).await,
                Ok(None) => {
                    runner.gate.release(tracker_id);
                    debug!(tracker_id = tracker_id, "Nothing to sync for tracker");
                    Ok(JobResult::completed(JobReport::default()))
                }
                Err(err) => {
                    runner.gate.release(tracker_id);
                    warn!(tracker_id = tracker_id, error = %err, "Manual sync rejected");
                    Err(err)
                }
            };
            let _ = request.response.send(result);
        });
    }
}

/// Tick-driven scheduler with a worker pool
pub struct SyncScheduler {
    config: SchedulerConfig,
    runner: JobRunner,
    job_rx: mpsc::UnboundedReceiver<Job>,
    shutdown_rx: broadcast::Receiver<()>,
    manual_sync_rx: mpsc::Receiver<ManualSyncRequest>,
    manual_sync_tx: mpsc::Sender<ManualSyncRequest>,
}

impl SyncScheduler {
    /// Create a new sync scheduler
    ///
    /// # Arguments
    ///
    /// * `config` - Scheduler configuration
    /// * `engine` - Engine planning and running the jobs
    /// * `job_rx` - Receiving end of the engine's job queue
    /// * `shutdown_rx` - Broadcast receiver for shutdown signal
    pub fn new(
        config: SchedulerConfig,
        engine: Arc<SyncEngine>,
        job_rx: mpsc::UnboundedReceiver<Job>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        let (manual_sync_tx, manual_sync_rx) = mpsc::channel(32);

        Self {
            config,
            runner: JobRunner {
                engine,
                refresher: None,
                metrics: None,
                gate: Arc::new(TrackerGate::new()),
                locks: Arc::new(TrackerLocks::new()),
                status: Arc::new(RwLock::new(HashMap::new())),
            },
            job_rx,
            shutdown_rx,
            manual_sync_rx,
            manual_sync_tx,
        }
    }

    /// Refresh expired account tokens in the background on every tick
    pub fn with_refresher(mut self, refresher: Arc<TokenRefresher>) -> Self {
        self.runner.refresher = Some(refresher);
        self
    }

    /// Record job metrics
    pub fn with_metrics(mut self, metrics: Arc<SyncMetrics>) -> Self {
        self.runner.metrics = Some(metrics);
        self
    }

    /// Get a handle for triggering manual syncs
    pub fn manual_sync_handle(&self) -> ManualSyncHandle {
        ManualSyncHandle {
            tx: self.manual_sync_tx.clone(),
            status: self.runner.status.clone(),
        }
    }

    /// Get the current sync status for all trackers that ran a job
    pub async fn get_status(&self) -> HashMap<i64, SyncStatus> {
        self.runner.status.read().await.clone()
    }

    /// Plan and queue one tick at `now`, returning the number of queued jobs
    ///
    /// Token refresh is not part of this pass; [`run`](Self::run) starts it
    /// in the background.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<usize, SyncError> {
        self.runner.tick(now).await
    }

    /// Run the scheduler until shutdown is signalled
    ///
    /// Running jobs are allowed to finish; queued and delayed jobs are dropped.
    pub async fn run(self) {
        let SyncScheduler {
            config,
            runner,
            job_rx,
            mut shutdown_rx,
            mut manual_sync_rx,
            ..
        } = self;

        info!(
            workers = config.workers,
            tick_interval_secs = config.tick_interval_secs,
            "Starting sync scheduler"
        );

        let (task_shutdown_tx, _) = broadcast::channel::<()>(1);
        let job_rx = Arc::new(Mutex::new(job_rx));
        let mut handles = Vec::with_capacity(config.workers);

        for worker in 0..config.workers.max(1) {
            let runner = runner.clone();
            let job_rx = job_rx.clone();
            let mut worker_shutdown_rx = task_shutdown_tx.subscribe();

            handles.push(tokio::spawn(async move {
                loop {
                    let job = tokio::select! {
                        _ = worker_shutdown_rx.recv() => break,
                        job = async { job_rx.lock().await.recv().await } => job,
                    };
                    match job {
                        Some(job) => {
                            let _ = runner.execute(job).await;
                        }
                        None => break,
                    }
                }
                debug!(worker = worker, "Sync worker stopped");
            }));
        }

        let start = tokio::time::Instant::now() + Duration::from_secs(config.initial_delay_secs);
        let mut ticker = interval_at(start, Duration::from_secs(config.tick_interval_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut refresh_task: Option<JoinHandle<()>> = None;

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping sync scheduler");
                    let _ = task_shutdown_tx.send(());
                    if let Some(task) = refresh_task.take() {
                        task.abort();
                    }
                    break;
                }
                _ = ticker.tick() => {
                    let now = Utc::now();
                    if runner.refresher.is_some() {
                        if refresh_task.as_ref().map_or(true, JoinHandle::is_finished) {
                            refresh_task = Some(tokio::spawn(runner.clone().refresh_round(now)));
                        } else {
                            debug!("Previous token refresh round still running");
                        }
                    }
                    if let Err(err) = runner.tick(now).await {
                        error!(error = %err, "Scheduler tick failed");
                    }
                }
                Some(request) = manual_sync_rx.recv() => {
                    runner.handle_manual_sync(request);
                }
            }
        }

        for handle in handles {
            let _ = handle.await;
        }

        info!("Sync scheduler stopped");
    }
}

/// Handle for triggering manual syncs
#[derive(Clone)]
pub struct ManualSyncHandle {
    tx: mpsc::Sender<ManualSyncRequest>,
    status: Arc<RwLock<HashMap<i64, SyncStatus>>>,
}

impl ManualSyncHandle {
    /// Run the job a tracker would get now, regardless of its budget
    ///
    /// Fails with [`SyncError::TrackerBusy`] while the tracker owns a job chain.
    pub async fn trigger_sync(&self, tracker_id: i64) -> Result<JobResult, SyncError> {
        let (response_tx, response_rx) = oneshot::channel();

        self.tx
            .send(ManualSyncRequest {
                tracker_id,
                response: response_tx,
            })
            .await
            .map_err(|_| SyncError::QueueClosed)?;

        response_rx.await.map_err(|_| SyncError::QueueClosed)?
    }

    /// Current status of all trackers that ran a job
    pub async fn get_status(&self) -> HashMap<i64, SyncStatus> {
        self.status.read().await.clone()
    }
}
