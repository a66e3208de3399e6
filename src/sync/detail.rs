//! Shipment detail synchronization
//!
//! One invocation fetches the details of at most one budget's worth of
//! not-started records. Each record is moved to started before its request
//! and to finished once its payload is stored.

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::error::SyncError;
use crate::models::{EndpointKind, EndpointTracker, TrackedRecord};

use super::http_client::FetchResponse;
use super::jobs::{JobOutcome, JobReport, JobResult};
use super::upstream::{retry_delay, success_budget, SyncContext};

/// Detail slice algorithm
pub struct DetailSync {
    ctx: SyncContext,
    fallback_budget: u32,
    rate_limit_wait_secs: u64,
}

impl DetailSync {
    /// Create the algorithm
    ///
    /// `fallback_budget` is the slice size used when the tracker has no
    /// remaining requests recorded.
    pub fn new(ctx: SyncContext, fallback_budget: u32, rate_limit_wait_secs: u64) -> Self {
        Self {
            ctx,
            fallback_budget: fallback_budget.max(1),
            rate_limit_wait_secs,
        }
    }

    /// Process one slice for the detail tracker `tracker_id`
    pub async fn run(&self, tracker_id: i64) -> Result<JobResult, SyncError> {
        let mut tracker = self
            .ctx
            .db
            .get_tracker(tracker_id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("tracker {}", tracker_id)))?;

        if tracker.endpoint != EndpointKind::ShipmentDetail {
            return Err(SyncError::InvalidData(format!(
                "tracker {} is a {} tracker",
                tracker_id, tracker.endpoint
            )));
        }

        let limit = tracker.budget.slice_limit(self.fallback_budget);
        let batch = self.ctx.db.next_batch(tracker.account_id, limit).await?;
        let mut report = JobReport::default();

        if batch.is_empty() {
            debug!(tracker_id = tracker_id, "No shipments waiting for details");
            return Ok(JobResult::completed(report));
        }

        let token = self.ctx.tokens.bearer_token(tracker.account_id).await?;

        for record in &batch {
            if !self.ctx.db.mark_started(record.id, Utc::now()).await? {
                debug!(record_id = record.id, "Record already claimed, skipping");
                continue;
            }

            let response = self
                .ctx
                .fetcher
                .fetch(self.ctx.detail_request(&token, &record.external_id))
                .await?;
            report.requests += 1;
            let now = Utc::now();

            match response.status {
                200 => match self.store_detail(&mut tracker, record, &response).await {
                    Ok(()) => report.finished += 1,
                    Err(SyncError::InvalidData(reason)) => {
                        warn!(
                            record_id = record.id,
                            shipment_id = %record.external_id,
                            reason = %reason,
                            "Detail response rejected"
                        );
                        report.failed += 1;
                    }
                    Err(err) => return Err(err),
                },
                429 => {
                    let wait = retry_delay(&response, self.rate_limit_wait_secs);
                    tracker.budget.apply_rate_limited(wait, now);
                    self.ctx.db.update_tracker(&tracker).await?;

                    warn!(
                        tracker_id = tracker_id,
                        record_id = record.id,
                        retry_after = wait,
                        finished = report.finished,
                        "Detail endpoint rate limited, slice stopped"
                    );
                    return Ok(JobResult {
                        outcome: JobOutcome::RateLimited {
                            reset_at: tracker.budget.reset_at,
                        },
                        report,
                    });
                }
                status => {
                    error!(
                        record_id = record.id,
                        shipment_id = %record.external_id,
                        status = status,
                        "Unexpected detail response"
                    );
                    report.failed += 1;
                }
            }
        }

        info!(
            tracker_id = tracker_id,
            finished = report.finished,
            failed = report.failed,
            remaining = tracker.budget.remaining_requests,
            "Detail slice completed"
        );

        Ok(JobResult::completed(report))
    }

    async fn store_detail(
        &self,
        tracker: &mut EndpointTracker,
        record: &TrackedRecord,
        response: &FetchResponse,
    ) -> Result<(), SyncError> {
        let (remaining, reset_after) = success_budget(response)?;
        tracker
            .budget
            .apply_success(remaining, reset_after, Utc::now());
        self.ctx.db.update_tracker(tracker).await?;

        let payload = std::str::from_utf8(&response.body)
            .map_err(|e| SyncError::InvalidData(format!("detail payload is not UTF-8: {}", e)))?;

        if !self
            .ctx
            .db
            .mark_finished(record.id, payload, Utc::now())
            .await?
        {
            return Err(SyncError::InvalidData(format!(
                "record {} left the started state",
                record.id
            )));
        }

        debug!(
            record_id = record.id,
            shipment_id = %record.external_id,
            "Shipment detail stored"
        );
        Ok(())
    }
}
