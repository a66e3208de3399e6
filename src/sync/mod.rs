//! Shipment synchronization
//!
//! This module discovers shipments through the paginated list endpoint and
//! fetches their details, spending no more requests than each endpoint's
//! advertised budget allows.
//!
//! # Components
//!
//! - [`http_client`]: Upstream transport with concurrency and pacing limits
//! - [`upstream`]: Request building and rate-limit header handling
//! - [`list`]: Category-by-category list pagination
//! - [`detail`]: Budget-bounded detail slices
//! - [`jobs`]: Job descriptors and the job queue
//! - [`engine`]: Job planning per tracker and job dispatch
//! - [`scheduler`]: Tick loop, worker pool and manual triggers
//! - [`retry`]: Retry manager with exponential backoff
//!
//! # Example
//!
//! ```ignore
//! use shipment_sync::sync::{ChannelJobQueue, SyncContext, SyncEngine, SyncScheduler};
//!
//! let (queue, job_rx) = ChannelJobQueue::new();
//! let ctx = SyncContext::new(db, fetcher, tokens, Arc::new(queue), config.upstream.clone());
//! let engine = Arc::new(SyncEngine::new(ctx, &config.http, &config.scheduler));
//!
//! let scheduler = SyncScheduler::new(config.scheduler.clone(), engine, job_rx, shutdown_rx);
//! tokio::spawn(scheduler.run());
//! ```

pub mod detail;
pub mod engine;
pub mod gate;
pub mod http_client;
pub mod jobs;
pub mod list;
pub mod retry;
pub mod scheduler;
pub mod upstream;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types for convenience
pub use detail::DetailSync;
pub use engine::SyncEngine;
pub use http_client::{FetchRequest, FetchResponse, Fetcher, HttpFetcher};
pub use jobs::{ChannelJobQueue, Job, JobOutcome, JobQueue, JobReport, JobResult};
pub use list::ListSync;
pub use retry::RetryManager;
pub use scheduler::{ManualSyncHandle, SyncScheduler, SyncStatus};
pub use upstream::SyncContext;
