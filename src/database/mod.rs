//! Database layer for shipment-sync
//!
//! This module defines the record-store trait and its SQLite implementation.

pub mod migrations;
pub mod sqlite;

pub use sqlite::SqliteDatabase;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DbError;
use crate::models::{Account, EndpointKind, EndpointTracker, NewAccount, RecordState, TrackedRecord};

/// Database trait for sync state persistence
///
/// It uses `async_trait` for async methods and `mockall::automock` for testing.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Database: Send + Sync {
    // =========================================================================
    // Account operations
    // =========================================================================

    /// Register an account, returning its ID
    async fn create_account(&self, account: &NewAccount) -> Result<i64, DbError>;

    /// Get an account by ID
    async fn get_account(&self, id: i64) -> Result<Option<Account>, DbError>;

    /// List all accounts
    async fn list_accounts(&self) -> Result<Vec<Account>, DbError>;

    /// Store a freshly obtained access token
    async fn update_account_token(
        &self,
        id: i64,
        access_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), DbError>;

    // =========================================================================
    // Endpoint tracker operations
    // =========================================================================

    /// Get or create the tracker of `endpoint` for an account
    ///
    /// A new tracker starts with an empty, immediately eligible budget.
    async fn ensure_tracker(
        &self,
        account_id: i64,
        endpoint: EndpointKind,
        now: DateTime<Utc>,
    ) -> Result<EndpointTracker, DbError>;

    /// Get a tracker by ID
    async fn get_tracker(&self, id: i64) -> Result<Option<EndpointTracker>, DbError>;

    /// Get the tracker of `endpoint` for an account
    async fn get_tracker_for(
        &self,
        account_id: i64,
        endpoint: EndpointKind,
    ) -> Result<Option<EndpointTracker>, DbError>;

    /// List all trackers
    async fn list_trackers(&self) -> Result<Vec<EndpointTracker>, DbError>;

    /// List trackers whose budget allows work at `now`
    async fn list_eligible_trackers(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<EndpointTracker>, DbError>;

    /// Persist budget and completion flags of a tracker
    async fn update_tracker(&self, tracker: &EndpointTracker) -> Result<(), DbError>;

    // =========================================================================
    // Tracked record operations
    // =========================================================================

    /// Get or create the record for a shipment id
    ///
    /// Returns the record and whether it was created by this call.
    async fn discover_record(
        &self,
        account_id: i64,
        external_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(TrackedRecord, bool), DbError>;

    /// Up to `limit` not-started records of an account, oldest first
    async fn next_batch(&self, account_id: i64, limit: u32)
        -> Result<Vec<TrackedRecord>, DbError>;

    /// Get a record by ID
    async fn get_record(&self, id: i64) -> Result<Option<TrackedRecord>, DbError>;

    /// Count records of an account in `state`
    async fn count_records(&self, account_id: i64, state: RecordState) -> Result<u64, DbError>;

    /// Move a record from not-started to started
    ///
    /// Returns false when the record was not in the not-started state.
    async fn mark_started(&self, record_id: i64, at: DateTime<Utc>) -> Result<bool, DbError>;

    /// Store the detail payload and move a record from started to finished
    ///
    /// Returns false (and stores nothing) when the record was not started.
    async fn mark_finished(
        &self,
        record_id: i64,
        payload: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, DbError>;

    /// Put records started before `started_before` back to not-started
    ///
    /// Returns the number of reclaimed records.
    async fn reclaim_stale_records(&self, started_before: DateTime<Utc>) -> Result<u64, DbError>;

    /// Stored detail payload of a record
    async fn get_detail(&self, record_id: i64) -> Result<Option<String>, DbError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RateBudget;

    #[tokio::test]
    async fn test_mock_database_next_batch() {
        let mut mock = MockDatabase::new();

        mock.expect_next_batch()
            .withf(|account, limit| *account == 1 && *limit == 2)
            .returning(|account_id, _| {
                Ok(vec![TrackedRecord {
                    id: 10,
                    account_id,
                    external_id: "S1".to_string(),
                    state: RecordState::NotStarted,
                    discovered_at: Utc::now(),
                    started_at: None,
                }])
            });

        let batch = mock.next_batch(1, 2).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].external_id, "S1");
    }

    #[tokio::test]
    async fn test_mock_database_tracker() {
        let mut mock = MockDatabase::new();
        let now = Utc::now();

        mock.expect_get_tracker()
            .withf(|id| *id == 3)
            .returning(move |id| {
                Ok(Some(EndpointTracker {
                    id,
                    account_id: 1,
                    endpoint: EndpointKind::ShipmentDetail,
                    budget: RateBudget::fresh(now),
                    flags: Default::default(),
                }))
            });
        mock.expect_update_tracker().returning(|_| Ok(()));

        let tracker = mock.get_tracker(3).await.unwrap().unwrap();
        assert_eq!(tracker.endpoint, EndpointKind::ShipmentDetail);
        assert!(mock.update_tracker(&tracker).await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_database_error_handling() {
        let mut mock = MockDatabase::new();

        mock.expect_get_account().returning(|_| Err(DbError::NotFound));

        match mock.get_account(1).await {
            Err(DbError::NotFound) => (),
            _ => panic!("Expected DbError::NotFound"),
        }
    }
}
