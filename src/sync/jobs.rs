//! Job descriptors and the queue they travel through
//!
//! A [`Job`] names one algorithm invocation. Jobs are queued for the worker pool
//! either immediately or at a future instant; a delayed job waits on its own
//! timer task and never occupies a worker while waiting.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::SyncError;

/// One algorithm invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    /// Paginate the list endpoint starting at `page` of `category`
    ListSync {
        /// List tracker
        tracker_id: i64,
        /// 1-based page to fetch first
        page: u32,
        /// Category to start with
        category: String,
    },
    /// Fetch details for one slice of not-started records
    DetailSync {
        /// Detail tracker
        tracker_id: i64,
    },
}

impl Job {
    /// Tracker the job works on
    pub fn tracker_id(&self) -> i64 {
        match self {
            Job::ListSync { tracker_id, .. } | Job::DetailSync { tracker_id } => *tracker_id,
        }
    }

    /// Short name for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Job::ListSync { .. } => "list_sync",
            Job::DetailSync { .. } => "detail_sync",
        }
    }
}

/// How a job invocation ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Work done; nothing queued for the tracker
    Completed,
    /// Upstream answered 429; stopped without a follow-up job
    RateLimited {
        /// When the budget resets
        reset_at: DateTime<Utc>,
    },
    /// Upstream answered 429; the same job is queued for `resume_at`
    Suspended {
        /// When the re-invocation runs
        resume_at: DateTime<Utc>,
    },
    /// Page ceiling reached; a continuation job is queued
    Continued,
}

impl JobOutcome {
    /// Whether a follow-up job for the same tracker was queued
    pub fn has_follow_up(&self) -> bool {
        matches!(self, JobOutcome::Suspended { .. } | JobOutcome::Continued)
    }

    /// Short name for logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::Completed => "completed",
            JobOutcome::RateLimited { .. } => "rate_limited",
            JobOutcome::Suspended { .. } => "suspended",
            JobOutcome::Continued => "continued",
        }
    }
}

/// Counts collected while a job runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobReport {
    /// Upstream requests issued
    pub requests: u64,
    /// Records created by list pages
    pub discovered: u64,
    /// Records moved to finished
    pub finished: u64,
    /// Detail fetches that left their record started
    pub failed: u64,
}

/// Outcome plus counts of one invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResult {
    /// How the invocation ended
    pub outcome: JobOutcome,
    /// What it did
    pub report: JobReport,
}

impl JobResult {
    /// Invocation finished its work
    pub fn completed(report: JobReport) -> Self {
        Self {
            outcome: JobOutcome::Completed,
            report,
        }
    }
}

/// Scheduling primitive used by the algorithms and the scheduler
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Queue a job for immediate execution
    async fn enqueue_now(&self, job: Job) -> Result<(), SyncError>;

    /// Queue a job to run at `at` (immediately if `at` has passed)
    async fn enqueue_at(&self, job: Job, at: DateTime<Utc>) -> Result<(), SyncError>;
}

/// Job queue backed by an unbounded tokio channel
///
/// Workers queue follow-up jobs into the channel they drain, so sending never
/// waits for capacity. The tracker gate keeps at most one job per tracker in
/// flight, which bounds the queue length by the number of trackers.
#[derive(Debug, Clone)]
pub struct ChannelJobQueue {
    tx: mpsc::UnboundedSender<Job>,
}

impl ChannelJobQueue {
    /// Create a queue and the receiver the workers read from
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Job>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl JobQueue for ChannelJobQueue {
    async fn enqueue_now(&self, job: Job) -> Result<(), SyncError> {
        debug!(job = job.kind(), tracker_id = job.tracker_id(), "Job queued");
        self.tx.send(job).map_err(|_| SyncError::QueueClosed)
    }

    async fn enqueue_at(&self, job: Job, at: DateTime<Utc>) -> Result<(), SyncError> {
        if self.tx.is_closed() {
            return Err(SyncError::QueueClosed);
        }

        let delay = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        debug!(
            job = job.kind(),
            tracker_id = job.tracker_id(),
            delay_secs = delay.as_secs(),
            "Delayed job scheduled"
        );

        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let tracker_id = job.tracker_id();
            if tx.send(job).is_err() {
                warn!(tracker_id = tracker_id, "Queue closed before delayed job was due");
            }
        });

        Ok(())
    }
}
