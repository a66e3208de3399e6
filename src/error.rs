//! Application error types for shipment-sync
//!
//! This module defines common error types used throughout the application.
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Database-related errors
#[derive(Debug, Error)]
pub enum DbError {
    /// SQLite error
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Error raised by the async connection wrapper
    #[error("Database connection error: {0}")]
    Connection(#[from] tokio_rusqlite::Error),

    /// Record not found
    #[error("Record not found")]
    NotFound,

    /// Stored value could not be decoded
    #[error("Corrupt stored value: {0}")]
    Corrupt(String),
}

/// Synchronization-related errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SyncError {
    /// Network timeout
    #[error("Network timeout")]
    NetworkTimeout,

    /// Connection refused
    #[error("Connection refused")]
    ConnectionRefused,

    /// Generic network error
    #[error("Network error: {0}")]
    Network(String),

    /// Rate limited by upstream
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// Upstream answered with a status the sync cannot handle
    #[error("Upstream error: HTTP {0}")]
    UpstreamStatus(u16),

    /// Invalid data received
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Upstream rejected the credentials
    #[error("Unauthorized")]
    Unauthorized,

    /// Tracker, account or record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Another job already owns the tracker
    #[error("Tracker {0} is busy")]
    TrackerBusy(i64),

    /// Job queue is closed
    #[error("Job queue closed")]
    QueueClosed,

    /// Persistence failure
    #[error("Storage error: {0}")]
    Storage(String),
}

impl SyncError {
    /// Whether the error is a transport-level failure (timeout, refused, reset)
    ///
    /// Transient failures end the current job; the next scheduled tick retries.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SyncError::NetworkTimeout | SyncError::ConnectionRefused | SyncError::Network(_)
        )
    }
}

impl From<DbError> for SyncError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound => SyncError::NotFound("database record".to_string()),
            other => SyncError::Storage(other.to_string()),
        }
    }
}

/// Trait for determining if an error is retryable
pub trait RetryableError {
    /// Returns true if the error is retryable
    fn is_retryable(&self) -> bool;

    /// Delay the remote side asked for before the next attempt
    fn retry_after_secs(&self) -> Option<u64> {
        None
    }
}

impl RetryableError for SyncError {
    fn is_retryable(&self) -> bool {
        match self {
            SyncError::NetworkTimeout => true,
            SyncError::ConnectionRefused => true,
            SyncError::Network(_) => true,
            SyncError::RateLimited(_) => true,
            SyncError::UpstreamStatus(code) if *code >= 500 => true,

            SyncError::UpstreamStatus(_) => false,
            SyncError::InvalidData(_) => false,
            SyncError::Unauthorized => false,
            SyncError::NotFound(_) => false,
            SyncError::TrackerBusy(_) => false,
            SyncError::QueueClosed => false,
            SyncError::Storage(_) => false,
        }
    }

    fn retry_after_secs(&self) -> Option<u64> {
        match self {
            SyncError::RateLimited(secs) => Some(*secs),
            _ => None,
        }
    }
}
