//! Shipment list synchronization
//!
//! Walks the paginated list endpoint category by category and records every
//! shipment id it has not seen before. A category is complete once a page comes
//! back empty; after that, later runs stop at the first already-known id.

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::error::SyncError;
use crate::models::EndpointKind;

use super::jobs::{Job, JobOutcome, JobReport, JobResult};
use super::upstream::{retry_delay, success_budget, SyncContext};

/// List pagination algorithm
pub struct ListSync {
    ctx: SyncContext,
    rate_limit_wait_secs: u64,
    max_pages_per_run: u32,
}

/// What one 200 page meant for its category
enum PageStep {
    NextPage,
    CategoryDone,
}

impl ListSync {
    /// Create the algorithm
    ///
    /// `rate_limit_wait_secs` is used when a 429 carries no delay header;
    /// `max_pages_per_run` bounds the pages one invocation may fetch.
    pub fn new(ctx: SyncContext, rate_limit_wait_secs: u64, max_pages_per_run: u32) -> Self {
        Self {
            ctx,
            rate_limit_wait_secs,
            max_pages_per_run: max_pages_per_run.max(1),
        }
    }

    /// Run from `page` of `category` through the remaining categories
    pub async fn run(
        &self,
        tracker_id: i64,
        page: u32,
        category: &str,
    ) -> Result<JobResult, SyncError> {
        let mut tracker = self
            .ctx
            .db
            .get_tracker(tracker_id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("tracker {}", tracker_id)))?;

        if tracker.endpoint != EndpointKind::ShipmentList {
            return Err(SyncError::InvalidData(format!(
                "tracker {} is a {} tracker",
                tracker_id, tracker.endpoint
            )));
        }

        let categories = &self.ctx.upstream.categories;
        let start = categories
            .iter()
            .position(|c| c == category)
            .ok_or_else(|| SyncError::InvalidData(format!("unknown category {}", category)))?;

        let token = self.ctx.tokens.bearer_token(tracker.account_id).await?;

        let mut report = JobReport::default();
        let mut page = page.max(1);
        let mut pages_this_run = 0u32;

        for category in &categories[start..] {
            loop {
                if pages_this_run >= self.max_pages_per_run {
                    self.ctx
                        .queue
                        .enqueue_now(Job::ListSync {
                            tracker_id,
                            page,
                            category: category.clone(),
                        })
                        .await?;
                    info!(
                        tracker_id = tracker_id,
                        category = %category,
                        page = page,
                        pages = pages_this_run,
                        "Page ceiling reached, continuation queued"
                    );
                    return Ok(JobResult {
                        outcome: JobOutcome::Continued,
                        report,
                    });
                }

                let response = self
                    .ctx
                    .fetcher
                    .fetch(self.ctx.list_request(&token, category, page))
                    .await?;
                pages_this_run += 1;
                report.requests += 1;
                let now = Utc::now();

                match response.status {
                    200 => {
                        let (remaining, reset_after) = success_budget(&response)?;
                        tracker.budget.apply_success(remaining, reset_after, now);
                        self.ctx.db.update_tracker(&tracker).await?;

                        let ids = self.ctx.parse_list_page(&response.body)?;
                        debug!(
                            tracker_id = tracker_id,
                            category = %category,
                            page = page,
                            items = ids.len(),
                            remaining = remaining,
                            "List page received"
                        );

                        if ids.is_empty() {
                            if !tracker.flags.is_complete(category) {
                                tracker.flags.mark_complete(category);
                                self.ctx.db.update_tracker(&tracker).await?;
                                info!(
                                    tracker_id = tracker_id,
                                    category = %category,
                                    pages = page,
                                    "Initial scan of category completed"
                                );
                            }
                            break;
                        }

                        let caught_up_possible = tracker.flags.is_complete(category);
                        let step = self
                            .discover_page(
                                tracker.account_id,
                                category,
                                &ids,
                                caught_up_possible,
                                &mut report,
                            )
                            .await?;
                        match step {
                            PageStep::NextPage => page += 1,
                            PageStep::CategoryDone => {
                                debug!(
                                    tracker_id = tracker_id,
                                    category = %category,
                                    page = page,
                                    "Reached already synced shipment"
                                );
                                break;
                            }
                        }
                    }
                    429 => {
                        let wait = retry_delay(&response, self.rate_limit_wait_secs);
                        tracker.budget.apply_rate_limited(wait, now);
                        self.ctx.db.update_tracker(&tracker).await?;

                        let resume_at = tracker.budget.reset_at;
                        self.ctx
                            .queue
                            .enqueue_at(
                                Job::ListSync {
                                    tracker_id,
                                    page,
                                    category: category.clone(),
                                },
                                resume_at,
                            )
                            .await?;

                        warn!(
                            tracker_id = tracker_id,
                            category = %category,
                            page = page,
                            retry_after = wait,
                            "List endpoint rate limited, re-invocation scheduled"
                        );
                        return Ok(JobResult {
                            outcome: JobOutcome::Suspended { resume_at },
                            report,
                        });
                    }
                    status => {
                        error!(
                            tracker_id = tracker_id,
                            category = %category,
                            page = page,
                            status = status,
                            "Unexpected list response"
                        );
                        return Err(SyncError::UpstreamStatus(status));
                    }
                }
            }
            page = 1;
        }

        Ok(JobResult::completed(report))
    }

    async fn discover_page(
        &self,
        account_id: i64,
        category: &str,
        ids: &[String],
        category_complete: bool,
        report: &mut JobReport,
    ) -> Result<PageStep, SyncError> {
        let now = Utc::now();

        for id in ids {
            let (record, created) = self.ctx.db.discover_record(account_id, id, now).await?;
            if created {
                report.discovered += 1;
                debug!(
                    record_id = record.id,
                    shipment_id = %id,
                    category = category,
                    "Shipment discovered"
                );
            } else if category_complete {
                return Ok(PageStep::CategoryDone);
            }
        }

        Ok(PageStep::NextPage)
    }
}
