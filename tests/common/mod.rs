//! Common test utilities and helpers for integration tests

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use wiremock::{MockServer, ResponseTemplate};

use shipment_sync::auth::{StoredTokenProvider, TokenRefresher};
use shipment_sync::config::{HttpConfig, RetryConfig, SchedulerConfig, UpstreamConfig};
use shipment_sync::database::{Database, SqliteDatabase};
use shipment_sync::models::{EndpointKind, NewAccount};
use shipment_sync::sync::{
    ChannelJobQueue, HttpFetcher, Job, RetryManager, SyncContext, SyncEngine, SyncScheduler,
};

/// Token stored on seeded accounts
pub const TEST_TOKEN: &str = "test-access-token";

/// Create an in-memory database for testing
pub async fn create_test_database() -> Arc<SqliteDatabase> {
    Arc::new(
        SqliteDatabase::new(":memory:")
            .await
            .expect("Failed to create test database"),
    )
}

/// Upstream configuration pointing at a mock server
pub fn upstream_config(server: &MockServer) -> UpstreamConfig {
    UpstreamConfig {
        list_url: format!("{}/shipments", server.uri()),
        detail_url: format!("{}/shipments/{{id}}", server.uri()),
        token_url: format!("{}/token", server.uri()),
        ..UpstreamConfig::default()
    }
}

/// Scheduler configuration with a long tick so only the first tick fires
pub fn scheduler_config() -> SchedulerConfig {
    SchedulerConfig {
        tick_interval_secs: 3600,
        workers: 2,
        ..SchedulerConfig::default()
    }
}

/// Engine over the real HTTP fetcher, plus the receiving end of its queue
pub fn create_engine(
    db: Arc<SqliteDatabase>,
    server: &MockServer,
) -> (Arc<SyncEngine>, mpsc::UnboundedReceiver<Job>) {
    let http = HttpConfig {
        timeout_secs: 5,
        ..HttpConfig::default()
    };
    let fetcher = Arc::new(HttpFetcher::new(http.clone()).expect("Failed to create fetcher"));
    let tokens = Arc::new(StoredTokenProvider::new(db.clone()));
    let (queue, job_rx) = ChannelJobQueue::new();

    let ctx = SyncContext::new(db, fetcher, tokens, Arc::new(queue), upstream_config(server));
    let engine = Arc::new(SyncEngine::new(ctx, &http, &scheduler_config()));
    (engine, job_rx)
}

/// Token refresher posting to the mock server without retry delays
pub fn create_refresher(db: Arc<SqliteDatabase>, server: &MockServer) -> Arc<TokenRefresher> {
    let retry = RetryManager::new(RetryConfig {
        max_retries: 1,
        initial_backoff_secs: 0,
        max_backoff_secs: 0,
        backoff_multiplier: 2.0,
        jitter: false,
    });
    Arc::new(
        TokenRefresher::new(
            db,
            format!("{}/token", server.uri()),
            retry,
            Duration::from_secs(5),
        )
        .expect("Failed to create refresher"),
    )
}

/// Scheduler over `engine` with its shutdown sender
pub fn create_scheduler(
    engine: Arc<SyncEngine>,
    job_rx: mpsc::UnboundedReceiver<Job>,
) -> (SyncScheduler, broadcast::Sender<()>) {
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    (
        SyncScheduler::new(scheduler_config(), engine, job_rx, shutdown_rx),
        shutdown_tx,
    )
}

/// Seeded account ids
pub struct SeededAccount {
    pub account_id: i64,
    pub list_tracker: i64,
    pub detail_tracker: i64,
}

/// Register an account with both trackers and, optionally, a valid token
pub async fn seed_account(db: &SqliteDatabase, with_token: bool) -> SeededAccount {
    let account_id = db
        .create_account(&NewAccount::new("shop", "client-id", "client-secret"))
        .await
        .expect("Failed to create account");

    if with_token {
        db.update_account_token(account_id, TEST_TOKEN, Utc::now() + chrono::Duration::hours(1))
            .await
            .expect("Failed to store token");
    }

    let list = db
        .ensure_tracker(account_id, EndpointKind::ShipmentList, Utc::now())
        .await
        .expect("Failed to create list tracker");
    let detail = db
        .ensure_tracker(account_id, EndpointKind::ShipmentDetail, Utc::now())
        .await
        .expect("Failed to create detail tracker");

    SeededAccount {
        account_id,
        list_tracker: list.id,
        detail_tracker: detail.id,
    }
}

/// 200 response carrying budget headers
pub fn budget_response(remaining: u32) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("X-RateLimit-Remaining", remaining.to_string().as_str())
        .insert_header("X-RateLimit-Reset", "60")
}

/// List page with the given shipment ids
pub fn list_response(ids: &[&str]) -> ResponseTemplate {
    let items: Vec<_> = ids
        .iter()
        .map(|id| serde_json::json!({ "shipmentId": id }))
        .collect();
    budget_response(20).set_body_json(serde_json::json!({ "shipments": items }))
}

/// Poll `check` until it holds, panicking after a few seconds
pub async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..300 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
