//! Sync engine
//!
//! Ties the list and detail algorithms to the tracker table: it decides which
//! job each eligible tracker gets on a scheduler tick and dispatches jobs to the
//! algorithm that handles them.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::config::{HttpConfig, SchedulerConfig};
use crate::database::Database;
use crate::error::SyncError;
use crate::models::{EndpointKind, EndpointTracker, RecordState};

use super::detail::DetailSync;
use super::jobs::{Job, JobQueue, JobResult};
use super::list::ListSync;
use super::upstream::SyncContext;

/// Job planner and dispatcher
pub struct SyncEngine {
    ctx: SyncContext,
    list: ListSync,
    detail: DetailSync,
    reclaim_after_secs: u64,
}

impl SyncEngine {
    /// Build the engine and its algorithms from configuration
    pub fn new(ctx: SyncContext, http: &HttpConfig, scheduler: &SchedulerConfig) -> Self {
        Self {
            list: ListSync::new(
                ctx.clone(),
                http.rate_limit_wait_secs,
                scheduler.max_pages_per_run,
            ),
            detail: DetailSync::new(
                ctx.clone(),
                scheduler.detail_fallback_budget,
                http.rate_limit_wait_secs,
            ),
            reclaim_after_secs: scheduler.reclaim_after_secs,
            ctx,
        }
    }

    /// Record store
    pub fn db(&self) -> Arc<dyn Database> {
        self.ctx.db.clone()
    }

    /// Queue jobs are submitted to
    pub fn queue(&self) -> Arc<dyn JobQueue> {
        self.ctx.queue.clone()
    }

    /// Execute one job
    pub async fn run_job(&self, job: &Job) -> Result<JobResult, SyncError> {
        match job {
            Job::ListSync {
                tracker_id,
                page,
                category,
            } => self.list.run(*tracker_id, *page, category).await,
            Job::DetailSync { tracker_id } => self.detail.run(*tracker_id).await,
        }
    }

    /// Jobs to start on a tick at `now`
    ///
    /// Only trackers whose budget allows work get a job; detail trackers only
    /// when records are waiting for their details.
    pub async fn tick_jobs(&self, now: DateTime<Utc>) -> Result<Vec<Job>, SyncError> {
        self.tick_jobs_except(now, &HashSet::new()).await
    }

    /// Jobs to start on a tick at `now`, leaving out the trackers of `accounts`
    pub async fn tick_jobs_except(
        &self,
        now: DateTime<Utc>,
        accounts: &HashSet<i64>,
    ) -> Result<Vec<Job>, SyncError> {
        let trackers = self.ctx.db.list_eligible_trackers(now).await?;
        let mut jobs = Vec::with_capacity(trackers.len());

        for tracker in trackers.iter().filter(|t| !accounts.contains(&t.account_id)) {
            if let Some(job) = self.plan(tracker).await? {
                jobs.push(job);
            }
        }

        debug!(eligible = trackers.len(), jobs = jobs.len(), "Tick planned");
        Ok(jobs)
    }

    /// Job a tracker would get right now, ignoring its budget
    pub async fn job_for_tracker(&self, tracker_id: i64) -> Result<Option<Job>, SyncError> {
        let tracker = self
            .ctx
            .db
            .get_tracker(tracker_id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("tracker {}", tracker_id)))?;
        self.plan(&tracker).await
    }

    async fn plan(&self, tracker: &EndpointTracker) -> Result<Option<Job>, SyncError> {
        match tracker.endpoint {
            EndpointKind::ShipmentList => Ok(tracker
                .flags
                .resume_category(&self.ctx.upstream.categories)
                .map(|category| Job::ListSync {
                    tracker_id: tracker.id,
                    page: 1,
                    category: category.to_string(),
                })),
            EndpointKind::ShipmentDetail => {
                let pending = self
                    .ctx
                    .db
                    .count_records(tracker.account_id, RecordState::NotStarted)
                    .await?;
                Ok((pending > 0).then_some(Job::DetailSync {
                    tracker_id: tracker.id,
                }))
            }
        }
    }

    /// Hand records stuck in the started state back to the detail sync
    pub async fn reclaim_stale(&self, now: DateTime<Utc>) -> Result<u64, SyncError> {
        let age = i64::try_from(self.reclaim_after_secs).unwrap_or(i64::MAX / 1000);
        let cutoff = now - chrono::Duration::seconds(age);
        let reclaimed = self.ctx.db.reclaim_stale_records(cutoff).await?;
        if reclaimed > 0 {
            info!(
                reclaimed = reclaimed,
                older_than_secs = self.reclaim_after_secs,
                "Stale started records reclaimed"
            );
        }
        Ok(reclaimed)
    }
}
