//! Sync functionality integration tests
//!
//! Tests the synchronization system end to end against a mock upstream:
//! - List pagination across categories
//! - Detail fetching and payload storage
//! - Rate-limit handling and tracker eligibility
//! - Scheduler ticks, token refresh and stale record reclaim

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use wiremock::matchers::{basic_auth, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use shipment_sync::auth::TokenRefresher;
use shipment_sync::config::RetryConfig;
use shipment_sync::database::Database;
use shipment_sync::models::{EndpointKind, NewAccount, RecordState};
use shipment_sync::sync::{Job, JobOutcome, RetryManager};

use common::*;

async fn mount_list_page(server: &MockServer, category: &str, page: u32, ids: &[&str]) {
    Mock::given(method("GET"))
        .and(path("/shipments"))
        .and(query_param("fulfilment-method", category))
        .and(query_param("page", page.to_string().as_str()))
        .respond_with(list_response(ids))
        .expect(1)
        .mount(server)
        .await;
}

/// Test 1: Empty upstream completes both categories in one tick
#[tokio::test]
async fn test_empty_upstream_single_tick() {
    let server = MockServer::start().await;
    mount_list_page(&server, "FBR", 1, &[]).await;
    mount_list_page(&server, "FBB", 1, &[]).await;

    let db = create_test_database().await;
    let seeded = seed_account(&db, true).await;
    let (engine, job_rx) = create_engine(db.clone(), &server);
    let (scheduler, shutdown_tx) = create_scheduler(engine.clone(), job_rx);
    let handle = scheduler.manual_sync_handle();
    let task = tokio::spawn(scheduler.run());

    let list_tracker = seeded.list_tracker;
    wait_until(|| {
        let handle = handle.clone();
        async move {
            handle
                .get_status()
                .await
                .get(&list_tracker)
                .map(|s| s.last_result.is_some() && !s.in_progress)
                .unwrap_or(false)
        }
    })
    .await;

    let tracker = db.get_tracker(seeded.list_tracker).await.unwrap().unwrap();
    assert!(tracker.flags.is_complete("FBR"));
    assert!(tracker.flags.is_complete("FBB"));
    assert_eq!(
        db.count_records(seeded.account_id, RecordState::NotStarted)
            .await
            .unwrap(),
        0
    );

    let status = handle.get_status().await;
    assert!(!status.contains_key(&seeded.detail_tracker));

    let jobs = engine.tick_jobs(Utc::now()).await.unwrap();
    assert!(jobs
        .iter()
        .all(|job| !matches!(job, Job::DetailSync { .. })));

    shutdown_tx.send(()).unwrap();
    let _ = task.await;
}

/// Test 2: Discovered shipments get their details fetched
#[tokio::test]
async fn test_list_then_detail() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/shipments"))
        .and(query_param("fulfilment-method", "FBR"))
        .and(query_param("page", "1"))
        .and(header("authorization", format!("Bearer {}", TEST_TOKEN).as_str()))
        .and(header("accept", "application/vnd.retailer.v3+json"))
        .respond_with(list_response(&["A", "B"]))
        .expect(1)
        .mount(&server)
        .await;
    mount_list_page(&server, "FBR", 2, &[]).await;
    mount_list_page(&server, "FBB", 1, &[]).await;
    for id in ["A", "B"] {
        Mock::given(method("GET"))
            .and(path(format!("/shipments/{}", id)))
            .respond_with(
                budget_response(5).set_body_string(format!(r#"{{"shipmentId":"{}"}}"#, id)),
            )
            .expect(1)
            .mount(&server)
            .await;
    }

    let db = create_test_database().await;
    let seeded = seed_account(&db, true).await;
    let (engine, _job_rx) = create_engine(db.clone(), &server);

    let result = engine
        .run_job(&Job::ListSync {
            tracker_id: seeded.list_tracker,
            page: 1,
            category: "FBR".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(result.outcome, JobOutcome::Completed);
    assert_eq!(result.report.discovered, 2);
    assert_eq!(result.report.requests, 3);

    let jobs = engine.tick_jobs(Utc::now()).await.unwrap();
    let detail_job = Job::DetailSync {
        tracker_id: seeded.detail_tracker,
    };
    assert!(jobs.contains(&detail_job));

    let result = engine.run_job(&detail_job).await.unwrap();
    assert_eq!(result.report.finished, 2);

    assert_eq!(
        db.count_records(seeded.account_id, RecordState::Finished)
            .await
            .unwrap(),
        2
    );
    let tracker = db.get_tracker(seeded.detail_tracker).await.unwrap().unwrap();
    assert_eq!(tracker.budget.remaining_requests, 5);

    let (record, created) = db
        .discover_record(seeded.account_id, "A", Utc::now())
        .await
        .unwrap();
    assert!(!created);
    assert_eq!(
        db.get_detail(record.id).await.unwrap().as_deref(),
        Some(r#"{"shipmentId":"A"}"#)
    );
}

/// Test 3: A rate-limited list page makes the tracker ineligible until reset
#[tokio::test]
async fn test_rate_limited_list_tracker() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/shipments"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "30"))
        .expect(1)
        .mount(&server)
        .await;

    let db = create_test_database().await;
    let seeded = seed_account(&db, true).await;
    let (engine, _job_rx) = create_engine(db.clone(), &server);

    let before = Utc::now();
    let result = engine
        .run_job(&Job::ListSync {
            tracker_id: seeded.list_tracker,
            page: 3,
            category: "FBB".to_string(),
        })
        .await
        .unwrap();

    match result.outcome {
        JobOutcome::Suspended { resume_at } => {
            assert!(resume_at >= before + chrono::Duration::seconds(30));
        }
        other => panic!("unexpected outcome {:?}", other),
    }

    let tracker = db.get_tracker(seeded.list_tracker).await.unwrap().unwrap();
    assert_eq!(tracker.budget.remaining_requests, 0);
    assert!(!tracker.flags.is_complete("FBB"));

    let jobs = engine.tick_jobs(Utc::now()).await.unwrap();
    assert!(jobs.iter().all(|j| j.tracker_id() != seeded.list_tracker));

    let later = Utc::now() + chrono::Duration::seconds(31);
    let jobs = engine.tick_jobs(later).await.unwrap();
    assert!(jobs.iter().any(|j| j.tracker_id() == seeded.list_tracker));
}

/// Test 4: A tick refreshes a missing token before the list sync uses it
#[tokio::test]
async fn test_tick_refreshes_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(basic_auth("client-id", "client-secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "refreshed-token",
            "expires_in": 299
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/shipments"))
        .and(header("authorization", "Bearer refreshed-token"))
        .respond_with(list_response(&[]))
        .expect(2)
        .mount(&server)
        .await;

    let db = create_test_database().await;
    let seeded = seed_account(&db, false).await;
    let (engine, job_rx) = create_engine(db.clone(), &server);
    let (scheduler, shutdown_tx) = create_scheduler(engine, job_rx);
    let scheduler = scheduler.with_refresher(create_refresher(db.clone(), &server));
    let task = tokio::spawn(scheduler.run());

    let list_tracker = seeded.list_tracker;
    let check_db = db.clone();
    wait_until(|| {
        let db = check_db.clone();
        async move {
            db.get_tracker(list_tracker)
                .await
                .unwrap()
                .map(|t| t.flags.is_complete("FBB"))
                .unwrap_or(false)
        }
    })
    .await;

    let account = db.get_account(seeded.account_id).await.unwrap().unwrap();
    assert_eq!(account.access_token.as_deref(), Some("refreshed-token"));

    shutdown_tx.send(()).unwrap();
    let _ = task.await;
}

/// Test 5: A tick reclaims records stuck in the started state
#[tokio::test]
async fn test_tick_reclaims_stale_records() {
    let server = MockServer::start().await;
    let db = create_test_database().await;
    let seeded = seed_account(&db, true).await;
    let (record, _) = db
        .discover_record(seeded.account_id, "S1", Utc::now())
        .await
        .unwrap();
    db.mark_started(record.id, Utc::now() - chrono::Duration::hours(1))
        .await
        .unwrap();

    let (engine, job_rx) = create_engine(db.clone(), &server);
    let (scheduler, _shutdown_tx) = create_scheduler(engine, job_rx);

    let queued = scheduler.tick(Utc::now()).await.unwrap();
    assert_eq!(queued, 2);
    assert_eq!(
        db.count_records(seeded.account_id, RecordState::NotStarted)
            .await
            .unwrap(),
        1
    );
}

/// Test 6: A failing token endpoint neither delays other accounts nor shutdown
#[tokio::test]
async fn test_failing_token_refresh_does_not_block_scheduler() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    mount_list_page(&server, "FBR", 1, &[]).await;
    mount_list_page(&server, "FBB", 1, &[]).await;

    let db = create_test_database().await;
    let seeded = seed_account(&db, true).await;
    let expired = db
        .create_account(&NewAccount::new("expired", "expired-client", "secret"))
        .await
        .unwrap();
    let expired_list = db
        .ensure_tracker(expired, EndpointKind::ShipmentList, Utc::now())
        .await
        .unwrap();

    let slow_retry = RetryManager::new(RetryConfig {
        max_retries: 3,
        initial_backoff_secs: 30,
        max_backoff_secs: 60,
        backoff_multiplier: 2.0,
        jitter: false,
    });
    let refresher = Arc::new(
        TokenRefresher::new(
            db.clone(),
            format!("{}/token", server.uri()),
            slow_retry,
            Duration::from_secs(5),
        )
        .unwrap(),
    );

    let (engine, job_rx) = create_engine(db.clone(), &server);
    let (scheduler, shutdown_tx) = create_scheduler(engine, job_rx);
    let scheduler = scheduler.with_refresher(refresher);
    let handle = scheduler.manual_sync_handle();
    let task = tokio::spawn(scheduler.run());

    let list_tracker = seeded.list_tracker;
    let check_db = db.clone();
    wait_until(|| {
        let db = check_db.clone();
        async move {
            db.get_tracker(list_tracker)
                .await
                .unwrap()
                .map(|t| t.flags.is_complete("FBB"))
                .unwrap_or(false)
        }
    })
    .await;

    assert!(!handle.get_status().await.contains_key(&expired_list.id));
    let account = db.get_account(expired).await.unwrap().unwrap();
    assert!(account.access_token.is_none());

    shutdown_tx.send(()).unwrap();
    assert!(tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .is_ok());
}
