//! Tracked shipment records
//!
//! A tracked record is created when the list scan first sees a shipment id and
//! follows `NotStarted -> Started -> Finished` while its detail is fetched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Detail-fetch lifecycle of a tracked record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    /// Discovered, detail not requested yet
    NotStarted,
    /// Detail fetch in progress (or interrupted)
    Started,
    /// Detail stored
    Finished,
}

impl RecordState {
    /// Stable name used in storage
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordState::NotStarted => "not_started",
            RecordState::Started => "started",
            RecordState::Finished => "finished",
        }
    }
}

impl std::fmt::Display for RecordState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RecordState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(RecordState::NotStarted),
            "started" => Ok(RecordState::Started),
            "finished" => Ok(RecordState::Finished),
            _ => Err(format!("Invalid record state: {}", s)),
        }
    }
}

/// A shipment discovered through the list endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedRecord {
    /// Database ID (creation order)
    pub id: i64,

    /// Owning account
    pub account_id: i64,

    /// Upstream shipment identifier, unique per account
    pub external_id: String,

    /// Lifecycle state
    pub state: RecordState,

    /// When the list scan first saw the shipment
    pub discovered_at: DateTime<Utc>,

    /// When the last detail fetch started
    pub started_at: Option<DateTime<Utc>>,
}
