//! Client-credentials token refresh
//!
//! Accounts whose token is missing or expired get a new one from the token
//! endpoint: `POST token_url` with HTTP basic auth, answered by
//! `{"access_token": "...", "expires_in": <secs>}`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::database::Database;
use crate::error::SyncError;
use crate::models::Account;
use crate::sync::RetryManager;

/// Token endpoint answer
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenGrant {
    /// Bearer token
    pub access_token: String,
    /// Lifetime in seconds
    pub expires_in: u64,
}

impl TokenGrant {
    /// Expiry time of the grant when received at `now`
    pub fn expires_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let secs = i64::try_from(self.expires_in).unwrap_or(i64::MAX / 1000);
        now + chrono::Duration::seconds(secs.min(366 * 24 * 60 * 60))
    }
}

/// Outcome of one refresh round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    /// Accounts that received a new token
    pub refreshed: usize,
    /// Accounts whose refresh failed
    pub failed: usize,
}

/// Refreshes expired account tokens
pub struct TokenRefresher {
    client: Client,
    token_url: String,
    db: Arc<dyn Database>,
    retry: RetryManager,
}

impl TokenRefresher {
    /// Create a refresher posting to `token_url`
    pub fn new(
        db: Arc<dyn Database>,
        token_url: impl Into<String>,
        retry: RetryManager,
        timeout: Duration,
    ) -> Result<Self, SyncError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Network(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self::with_client(client, db, token_url, retry))
    }

    /// Create a refresher with a custom reqwest Client
    pub fn with_client(
        client: Client,
        db: Arc<dyn Database>,
        token_url: impl Into<String>,
        retry: RetryManager,
    ) -> Self {
        Self {
            client,
            token_url: token_url.into(),
            db,
            retry,
        }
    }

    /// Request a token once, without retries
    pub async fn request_token(
        &self,
        client_id: &str,
        client_secret: &str,
    ) -> Result<TokenGrant, SyncError> {
        let response = self
            .client
            .post(&self.token_url)
            .basic_auth(client_id, Some(client_secret))
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SyncError::NetworkTimeout
                } else if e.is_connect() {
                    SyncError::ConnectionRefused
                } else {
                    SyncError::Network(e.to_string())
                }
            })?;

        match response.status() {
            StatusCode::OK => response
                .json::<TokenGrant>()
                .await
                .map_err(|e| SyncError::InvalidData(format!("token response: {}", e))),
            StatusCode::TOO_MANY_REQUESTS => {
                let wait = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(1);
                Err(SyncError::RateLimited(wait))
            }
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(SyncError::Unauthorized)
            }
            status => Err(SyncError::UpstreamStatus(status.as_u16())),
        }
    }

    /// Obtain and store a new token for `account`, retrying transient failures
    pub async fn refresh_account(&self, account: &Account) -> Result<(), SyncError> {
        let grant = self
            .retry
            .execute(|| self.request_token(&account.client_id, &account.client_secret))
            .await?;

        let expires_at = grant.expires_at(Utc::now());
        self.db
            .update_account_token(account.id, &grant.access_token, expires_at)
            .await?;

        debug!(account_id = account.id, expires_at = %expires_at, "Access token refreshed");
        Ok(())
    }

    /// Refresh every account whose token has expired at `now`
    ///
    /// Failures are logged and counted; they never abort the round.
    pub async fn refresh_expired(&self, now: DateTime<Utc>) -> Result<RefreshSummary, SyncError> {
        let accounts = self.db.list_accounts().await?;
        let mut summary = RefreshSummary::default();

        for account in accounts.iter().filter(|a| a.token_expired(now)) {
            match self.refresh_account(account).await {
                Ok(()) => summary.refreshed += 1,
                Err(err) => {
                    warn!(account_id = account.id, error = %err, "Token refresh failed");
                    summary.failed += 1;
                }
            }
        }

        if summary.refreshed > 0 || summary.failed > 0 {
            info!(
                refreshed = summary.refreshed,
                failed = summary.failed,
                "Token refresh round finished"
            );
        }

        Ok(summary)
    }
}
