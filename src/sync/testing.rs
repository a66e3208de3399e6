//! Test doubles for the sync algorithms

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::auth::TokenProvider;
use crate::config::UpstreamConfig;
use crate::database::{Database, SqliteDatabase};
use crate::error::SyncError;
use crate::models::{EndpointKind, EndpointTracker, NewAccount};

use super::http_client::{FetchRequest, FetchResponse, Fetcher};
use super::jobs::{ChannelJobQueue, Job, JobQueue};
use super::upstream::SyncContext;

/// Fetcher answering from a fixed script, recording every request
pub struct ScriptedFetcher {
    script: Mutex<VecDeque<Result<FetchResponse, SyncError>>>,
    requests: Mutex<Vec<FetchRequest>>,
}

impl ScriptedFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn push(&self, response: FetchResponse) {
        self.script.lock().unwrap().push_back(Ok(response));
    }

    pub fn push_err(&self, err: SyncError) {
        self.script.lock().unwrap().push_back(Err(err));
    }

    pub fn requests(&self) -> Vec<FetchRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, SyncError> {
        self.requests.lock().unwrap().push(request);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(SyncError::Network("script exhausted".to_string())))
    }
}

/// Queue remembering what was enqueued instead of running it
pub struct RecordingQueue {
    jobs: Mutex<Vec<(Job, Option<DateTime<Utc>>)>>,
}

impl RecordingQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            jobs: Mutex::new(Vec::new()),
        })
    }

    pub fn jobs(&self) -> Vec<(Job, Option<DateTime<Utc>>)> {
        self.jobs.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobQueue for RecordingQueue {
    async fn enqueue_now(&self, job: Job) -> Result<(), SyncError> {
        self.jobs.lock().unwrap().push((job, None));
        Ok(())
    }

    async fn enqueue_at(&self, job: Job, at: DateTime<Utc>) -> Result<(), SyncError> {
        self.jobs.lock().unwrap().push((job, Some(at)));
        Ok(())
    }
}

/// Token provider handing out one fixed token
pub struct StaticTokens;

#[async_trait]
impl TokenProvider for StaticTokens {
    async fn bearer_token(&self, _account_id: i64) -> Result<String, SyncError> {
        Ok("test-token".to_string())
    }
}

/// Context over an in-memory database with the default upstream layout
pub async fn test_context(
    fetcher: Arc<ScriptedFetcher>,
    queue: Arc<RecordingQueue>,
) -> (SyncContext, Arc<SqliteDatabase>) {
    let db = Arc::new(SqliteDatabase::in_memory().await.unwrap());
    let ctx = SyncContext::new(
        db.clone(),
        fetcher,
        Arc::new(StaticTokens),
        queue,
        UpstreamConfig::default(),
    );
    (ctx, db)
}

/// Context whose queue feeds a real job channel
pub async fn channel_context(
    fetcher: Arc<ScriptedFetcher>,
) -> (SyncContext, Arc<SqliteDatabase>, tokio::sync::mpsc::UnboundedReceiver<Job>) {
    let db = Arc::new(SqliteDatabase::in_memory().await.unwrap());
    let (queue, rx) = ChannelJobQueue::new();
    let ctx = SyncContext::new(
        db.clone(),
        fetcher,
        Arc::new(StaticTokens),
        Arc::new(queue),
        UpstreamConfig::default(),
    );
    (ctx, db, rx)
}

/// Account with both trackers
pub async fn seed_account(db: &SqliteDatabase) -> (i64, EndpointTracker, EndpointTracker) {
    let account_id = db
        .create_account(&NewAccount::new("shop", "client", "secret"))
        .await
        .unwrap();
    let list = db
        .ensure_tracker(account_id, EndpointKind::ShipmentList, Utc::now())
        .await
        .unwrap();
    let detail = db
        .ensure_tracker(account_id, EndpointKind::ShipmentDetail, Utc::now())
        .await
        .unwrap();
    (account_id, list, detail)
}

/// 200 list page with the given shipment ids
pub fn list_page(ids: &[&str]) -> FetchResponse {
    let items: Vec<_> = ids
        .iter()
        .map(|id| serde_json::json!({ "shipmentId": id }))
        .collect();
    ok_response(serde_json::json!({ "shipments": items }).to_string())
}

/// 200 with budget headers and `body`
pub fn ok_response(body: impl Into<String>) -> FetchResponse {
    FetchResponse::new(200)
        .with_header("X-RateLimit-Remaining", "10")
        .with_header("X-RateLimit-Reset", "60")
        .with_body(body.into())
}

/// 429 with a retry-after header
pub fn rate_limited(retry_after: u64) -> FetchResponse {
    FetchResponse::new(429).with_header("Retry-After", retry_after.to_string())
}
