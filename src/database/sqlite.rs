//! SQLite implementation of the Database trait
//!
//! This module provides a SQLite-based implementation of the Database trait
//! using rusqlite and tokio-rusqlite for async operations.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;

use super::migrations::CREATE_SCHEMA;
use super::Database;
use crate::error::DbError;
use crate::models::{
    Account, CompletionFlags, EndpointKind, EndpointTracker, NewAccount, RateBudget, RecordState,
    TrackedRecord,
};

/// SQLite database implementation
pub struct SqliteDatabase {
    conn: Connection,
}

impl SqliteDatabase {
    /// Create a new SQLite database connection
    ///
    /// Use `:memory:` for in-memory database or a file path for persistent storage.
    pub async fn new(path: &str) -> Result<Self, DbError> {
        let conn = Connection::open(path).await?;

        // Run migrations
        conn.call(|conn| {
            conn.execute_batch(CREATE_SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    /// Create a new in-memory database (useful for testing)
    pub async fn in_memory() -> Result<Self, DbError> {
        Self::new(":memory:").await
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    // =========================================================================
    // Account operations
    // =========================================================================

    async fn create_account(&self, account: &NewAccount) -> Result<i64, DbError> {
        let name = account.name.clone();
        let client_id = account.client_id.clone();
        let client_secret = account.client_secret.clone();

        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO accounts (name, client_id, client_secret)
                    VALUES (?1, ?2, ?3)
                    "#,
                    rusqlite::params![name, client_id, client_secret],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .map_err(Into::into)
    }

    async fn get_account(&self, id: i64) -> Result<Option<Account>, DbError> {
        self.conn
            .call(move |conn| {
                let result = conn
                    .query_row(
                        r#"
                        SELECT id, name, client_id, client_secret, access_token, token_expires_at
                        FROM accounts
                        WHERE id = ?1
                        "#,
                        [id],
                        account_from_row,
                    )
                    .optional()?;
                Ok(result)
            })
            .await
            .map_err(Into::into)
    }

    async fn list_accounts(&self) -> Result<Vec<Account>, DbError> {
        self.conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT id, name, client_id, client_secret, access_token, token_expires_at
                    FROM accounts
                    ORDER BY id
                    "#,
                )?;

                let accounts = stmt
                    .query_map([], account_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(accounts)
            })
            .await
            .map_err(Into::into)
    }

    async fn update_account_token(
        &self,
        id: i64,
        access_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        let access_token = access_token.to_string();
        let expires_at = format_datetime(expires_at);

        let rows_affected = self
            .conn
            .call(move |conn| {
                let count = conn.execute(
                    "UPDATE accounts SET access_token = ?1, token_expires_at = ?2 WHERE id = ?3",
                    rusqlite::params![access_token, expires_at, id],
                )?;
                Ok(count)
            })
            .await?;

        if rows_affected == 0 {
            return Err(DbError::NotFound);
        }

        Ok(())
    }

    // =========================================================================
    // Endpoint tracker operations
    // =========================================================================

    async fn ensure_tracker(
        &self,
        account_id: i64,
        endpoint: EndpointKind,
        now: DateTime<Utc>,
    ) -> Result<EndpointTracker, DbError> {
        let endpoint = endpoint.as_str();
        let reset_at = format_datetime(now);

        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT OR IGNORE INTO endpoint_trackers (account_id, endpoint, reset_at)
                    VALUES (?1, ?2, ?3)
                    "#,
                    rusqlite::params![account_id, endpoint, reset_at],
                )?;

                let tracker = conn.query_row(
                    r#"
                    SELECT id, account_id, endpoint, remaining_requests, reset_at, completed_categories
                    FROM endpoint_trackers
                    WHERE account_id = ?1 AND endpoint = ?2
                    "#,
                    rusqlite::params![account_id, endpoint],
                    tracker_from_row,
                )?;

                Ok(tracker)
            })
            .await
            .map_err(Into::into)
    }

    async fn get_tracker(&self, id: i64) -> Result<Option<EndpointTracker>, DbError> {
        self.conn
            .call(move |conn| {
                let result = conn
                    .query_row(
                        r#"
                        SELECT id, account_id, endpoint, remaining_requests, reset_at, completed_categories
                        FROM endpoint_trackers
                        WHERE id = ?1
                        "#,
                        [id],
                        tracker_from_row,
                    )
                    .optional()?;
                Ok(result)
            })
            .await
            .map_err(Into::into)
    }

    async fn get_tracker_for(
        &self,
        account_id: i64,
        endpoint: EndpointKind,
    ) -> Result<Option<EndpointTracker>, DbError> {
        let endpoint = endpoint.as_str();

        self.conn
            .call(move |conn| {
                let result = conn
                    .query_row(
                        r#"
                        SELECT id, account_id, endpoint, remaining_requests, reset_at, completed_categories
                        FROM endpoint_trackers
                        WHERE account_id = ?1 AND endpoint = ?2
                        "#,
                        rusqlite::params![account_id, endpoint],
                        tracker_from_row,
                    )
                    .optional()?;
                Ok(result)
            })
            .await
            .map_err(Into::into)
    }

    async fn list_trackers(&self) -> Result<Vec<EndpointTracker>, DbError> {
        self.conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT id, account_id, endpoint, remaining_requests, reset_at, completed_categories
                    FROM endpoint_trackers
                    ORDER BY id
                    "#,
                )?;

                let trackers = stmt
                    .query_map([], tracker_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(trackers)
            })
            .await
            .map_err(Into::into)
    }

    async fn list_eligible_trackers(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<EndpointTracker>, DbError> {
        let now = format_datetime(now);

        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT id, account_id, endpoint, remaining_requests, reset_at, completed_categories
                    FROM endpoint_trackers
                    WHERE reset_at <= ?1 OR remaining_requests > 0
                    ORDER BY id
                    "#,
                )?;

                let trackers = stmt
                    .query_map([&now], tracker_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(trackers)
            })
            .await
            .map_err(Into::into)
    }

    async fn update_tracker(&self, tracker: &EndpointTracker) -> Result<(), DbError> {
        let id = tracker.id;
        let remaining = i64::from(tracker.budget.remaining_requests);
        let reset_at = format_datetime(tracker.budget.reset_at);
        let flags =
            serde_json::to_string(&tracker.flags).map_err(|e| DbError::Corrupt(e.to_string()))?;

        let rows_affected = self
            .conn
            .call(move |conn| {
                let count = conn.execute(
                    r#"
                    UPDATE endpoint_trackers
                    SET remaining_requests = ?1, reset_at = ?2, completed_categories = ?3
                    WHERE id = ?4
                    "#,
                    rusqlite::params![remaining, reset_at, flags, id],
                )?;
                Ok(count)
            })
            .await?;

        if rows_affected == 0 {
            return Err(DbError::NotFound);
        }

        Ok(())
    }

    // =========================================================================
    // Tracked record operations
    // =========================================================================

    async fn discover_record(
        &self,
        account_id: i64,
        external_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(TrackedRecord, bool), DbError> {
        let external_id = external_id.to_string();
        let now = format_datetime(now);

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;

                let inserted = tx.execute(
                    r#"
                    INSERT OR IGNORE INTO tracked_records (account_id, external_id, state, discovered_at)
                    VALUES (?1, ?2, 'not_started', ?3)
                    "#,
                    rusqlite::params![account_id, external_id, now],
                )?;

                let record = tx.query_row(
                    r#"
                    SELECT id, account_id, external_id, state, discovered_at, started_at
                    FROM tracked_records
                    WHERE account_id = ?1 AND external_id = ?2
                    "#,
                    rusqlite::params![account_id, external_id],
                    record_from_row,
                )?;

                tx.commit()?;
                Ok((record, inserted == 1))
            })
            .await
            .map_err(Into::into)
    }

    async fn next_batch(
        &self,
        account_id: i64,
        limit: u32,
    ) -> Result<Vec<TrackedRecord>, DbError> {
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT id, account_id, external_id, state, discovered_at, started_at
                    FROM tracked_records
                    WHERE account_id = ?1 AND state = 'not_started'
                    ORDER BY id
                    LIMIT ?2
                    "#,
                )?;

                let records = stmt
                    .query_map(rusqlite::params![account_id, limit], record_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(records)
            })
            .await
            .map_err(Into::into)
    }

    async fn get_record(&self, id: i64) -> Result<Option<TrackedRecord>, DbError> {
        self.conn
            .call(move |conn| {
                let result = conn
                    .query_row(
                        r#"
                        SELECT id, account_id, external_id, state, discovered_at, started_at
                        FROM tracked_records
                        WHERE id = ?1
                        "#,
                        [id],
                        record_from_row,
                    )
                    .optional()?;
                Ok(result)
            })
            .await
            .map_err(Into::into)
    }

    async fn count_records(&self, account_id: i64, state: RecordState) -> Result<u64, DbError> {
        let state = state.as_str();

        self.conn
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM tracked_records WHERE account_id = ?1 AND state = ?2",
                    rusqlite::params![account_id, state],
                    |row| row.get(0),
                )?;
                Ok(count as u64)
            })
            .await
            .map_err(Into::into)
    }

    async fn mark_started(&self, record_id: i64, at: DateTime<Utc>) -> Result<bool, DbError> {
        let at = format_datetime(at);

        self.conn
            .call(move |conn| {
                let count = conn.execute(
                    r#"
                    UPDATE tracked_records
                    SET state = 'started', started_at = ?2
                    WHERE id = ?1 AND state = 'not_started'
                    "#,
                    rusqlite::params![record_id, at],
                )?;
                Ok(count == 1)
            })
            .await
            .map_err(Into::into)
    }

    async fn mark_finished(
        &self,
        record_id: i64,
        payload: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let payload = payload.to_string();
        let at = format_datetime(at);

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;

                let updated = tx.execute(
                    "UPDATE tracked_records SET state = 'finished' WHERE id = ?1 AND state = 'started'",
                    [record_id],
                )?;

                if updated == 1 {
                    tx.execute(
                        r#"
                        INSERT OR REPLACE INTO record_details (record_id, payload, fetched_at)
                        VALUES (?1, ?2, ?3)
                        "#,
                        rusqlite::params![record_id, payload, at],
                    )?;
                }

                tx.commit()?;
                Ok(updated == 1)
            })
            .await
            .map_err(Into::into)
    }

    async fn reclaim_stale_records(&self, started_before: DateTime<Utc>) -> Result<u64, DbError> {
        let started_before = format_datetime(started_before);

        self.conn
            .call(move |conn| {
                let count = conn.execute(
                    r#"
                    UPDATE tracked_records
                    SET state = 'not_started', started_at = NULL
                    WHERE state = 'started' AND started_at <= ?1
                    "#,
                    [&started_before],
                )?;
                Ok(count as u64)
            })
            .await
            .map_err(Into::into)
    }

    async fn get_detail(&self, record_id: i64) -> Result<Option<String>, DbError> {
        self.conn
            .call(move |conn| {
                let result = conn
                    .query_row(
                        "SELECT payload FROM record_details WHERE record_id = ?1",
                        [record_id],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(result)
            })
            .await
            .map_err(Into::into)
    }
}

/// Format a timestamp for storage
///
/// Fixed-width UTC so stored values compare correctly as text.
fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a datetime string to DateTime<Utc>
fn parse_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
            .or_else(|| {
                // Try parsing SQLite's datetime format
                chrono::NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S")
                    .ok()
                    .map(|dt| dt.and_utc())
            })
    })
}

fn required_datetime(idx: usize, s: String) -> rusqlite::Result<DateTime<Utc>> {
    let raw = s.clone();
    parse_datetime(Some(s)).ok_or_else(|| conversion_error(idx, format!("bad timestamp: {}", raw)))
}

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        Box::<dyn std::error::Error + Send + Sync>::from(msg),
    )
}

fn account_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        id: row.get(0)?,
        name: row.get(1)?,
        client_id: row.get(2)?,
        client_secret: row.get(3)?,
        access_token: row.get(4)?,
        token_expires_at: parse_datetime(row.get::<_, Option<String>>(5)?),
    })
}

fn tracker_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EndpointTracker> {
    let endpoint: String = row.get(2)?;
    let remaining: i64 = row.get(3)?;
    let flags: String = row.get(5)?;

    let flags: CompletionFlags =
        serde_json::from_str(&flags).map_err(|e| conversion_error(5, e.to_string()))?;

    Ok(EndpointTracker {
        id: row.get(0)?,
        account_id: row.get(1)?,
        endpoint: endpoint.parse().map_err(|e| conversion_error(2, e))?,
        budget: RateBudget::new(
            u32::try_from(remaining.max(0)).unwrap_or(u32::MAX),
            required_datetime(4, row.get(4)?)?,
        ),
        flags,
    })
}

fn record_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TrackedRecord> {
    let state: String = row.get(3)?;

    Ok(TrackedRecord {
        id: row.get(0)?,
        account_id: row.get(1)?,
        external_id: row.get(2)?,
        state: state.parse().map_err(|e| conversion_error(3, e))?,
        discovered_at: required_datetime(4, row.get(4)?)?,
        started_at: parse_datetime(row.get::<_, Option<String>>(5)?),
    })
}
