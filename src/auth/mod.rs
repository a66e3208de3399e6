//! Upstream credentials for shipment-sync
//!
//! This module provides bearer tokens to the sync algorithms:
//! - Token lookup for an account ([`TokenProvider`])
//! - Client-credentials refresh of expired tokens ([`TokenRefresher`])

pub mod refresh;
pub mod token;

pub use refresh::{RefreshSummary, TokenGrant, TokenRefresher};
pub use token::{StoredTokenProvider, TokenProvider};
