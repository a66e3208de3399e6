//! Endpoint tracker models
//!
//! An endpoint tracker bundles the rate budget of one upstream endpoint for one
//! account, plus the per-category completion flags of the list scan.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::budget::RateBudget;

/// Upstream endpoint a tracker is responsible for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    /// Paginated shipment list
    ShipmentList,
    /// Single shipment detail
    ShipmentDetail,
}

impl EndpointKind {
    /// All endpoint kinds, in the order trackers are created
    pub const ALL: [EndpointKind; 2] = [EndpointKind::ShipmentList, EndpointKind::ShipmentDetail];

    /// Stable name used in storage and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointKind::ShipmentList => "shipment_list",
            EndpointKind::ShipmentDetail => "shipment_detail",
        }
    }
}

impl std::fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EndpointKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shipment_list" => Ok(EndpointKind::ShipmentList),
            "shipment_detail" => Ok(EndpointKind::ShipmentDetail),
            _ => Err(format!("Invalid endpoint: {}", s)),
        }
    }
}

/// Categories whose initial list scan reached the last page
///
/// Flags only ever go from unset to set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompletionFlags {
    completed: BTreeSet<String>,
}

impl CompletionFlags {
    /// Whether the scan of `category` has completed at least once
    pub fn is_complete(&self, category: &str) -> bool {
        self.completed.contains(category)
    }

    /// Set the flag for `category`
    pub fn mark_complete(&mut self, category: &str) {
        self.completed.insert(category.to_string());
    }

    /// Whether every configured category has been scanned to the end
    pub fn fully_scanned(&self, categories: &[String]) -> bool {
        categories.iter().all(|c| self.is_complete(c))
    }

    /// Category a fresh list run should start with
    ///
    /// The first category without a flag; once everything is scanned, the first
    /// category so new shipments are picked up.
    pub fn resume_category<'a>(&self, categories: &'a [String]) -> Option<&'a str> {
        categories
            .iter()
            .find(|c| !self.is_complete(c))
            .or_else(|| categories.first())
            .map(String::as_str)
    }

    /// Completed category names
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.completed.iter().map(String::as_str)
    }
}

/// Per-account, per-endpoint sync state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointTracker {
    /// Database ID
    pub id: i64,

    /// Owning account
    pub account_id: i64,

    /// Endpoint this tracker covers
    pub endpoint: EndpointKind,

    /// Request budget of the endpoint
    pub budget: RateBudget,

    /// Completion flags (meaningful for list trackers only)
    pub flags: CompletionFlags,
}
