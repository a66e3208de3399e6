//! Bearer token lookup
//!
//! The sync algorithms ask a [`TokenProvider`] for the current bearer token of
//! the account that owns a tracker. Refreshing happens elsewhere (see
//! [`super::refresh`]); a provider only hands out what is stored.

use std::sync::Arc;

use async_trait::async_trait;

use crate::database::Database;
use crate::error::SyncError;

/// Source of bearer tokens for upstream requests
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Current bearer token of an account
    async fn bearer_token(&self, account_id: i64) -> Result<String, SyncError>;
}

/// Token provider reading the token stored on the account
pub struct StoredTokenProvider {
    db: Arc<dyn Database>,
}

impl StoredTokenProvider {
    /// Create a provider backed by `db`
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TokenProvider for StoredTokenProvider {
    async fn bearer_token(&self, account_id: i64) -> Result<String, SyncError> {
        let account = self
            .db
            .get_account(account_id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("account {}", account_id)))?;

        account.access_token.ok_or(SyncError::Unauthorized)
    }
}
