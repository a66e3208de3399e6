//! Per-tracker exclusion
//!
//! [`TrackerGate`] keeps the scheduler from queueing a second job for a tracker
//! whose job chain is still alive. [`TrackerLocks`] serializes execution, so two
//! jobs for one tracker never run at the same time even when both got queued.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Trackers that currently own a queued or running job chain
#[derive(Debug, Default)]
pub struct TrackerGate {
    claimed: Mutex<HashSet<i64>>,
}

impl TrackerGate {
    /// Create an empty gate
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `tracker_id`; false when it is already claimed
    pub fn try_claim(&self, tracker_id: i64) -> bool {
        self.claimed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(tracker_id)
    }

    /// Release a claim
    pub fn release(&self, tracker_id: i64) {
        self.claimed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&tracker_id);
    }

    /// Whether `tracker_id` is claimed
    pub fn is_claimed(&self, tracker_id: i64) -> bool {
        self.claimed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&tracker_id)
    }
}

/// One async mutex per tracker
#[derive(Debug, Default)]
pub struct TrackerLocks {
    locks: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl TrackerLocks {
    /// Create an empty lock table
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock of `tracker_id`, created on first use
    pub fn lock_for(&self, tracker_id: i64) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(tracker_id)
            .or_default()
            .clone()
    }
}
