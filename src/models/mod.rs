//! Domain models for shipment-sync
//!
//! This module contains the core domain models used throughout the application.

pub mod account;
pub mod budget;
pub mod record;
pub mod tracker;

// Re-export commonly used types
pub use account::{Account, NewAccount};
pub use budget::RateBudget;
pub use record::{RecordState, TrackedRecord};
pub use tracker::{CompletionFlags, EndpointKind, EndpointTracker};
