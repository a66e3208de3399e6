//! Seller account models
//!
//! An account owns the client credentials used to obtain bearer tokens and the
//! currently valid access token.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Seller account stored in database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Database ID
    pub id: i64,

    /// Human-readable name
    pub name: String,

    /// OAuth client id (unique)
    pub client_id: String,

    /// OAuth client secret
    #[serde(skip_serializing)]
    pub client_secret: String,

    /// Current bearer token, if one was obtained
    #[serde(skip_serializing)]
    pub access_token: Option<String>,

    /// When the current token expires
    pub token_expires_at: Option<DateTime<Utc>>,
}

impl Account {
    /// Check if the access token is missing or expired at `now`
    pub fn token_expired(&self, now: DateTime<Utc>) -> bool {
        match (&self.access_token, self.token_expires_at) {
            (Some(_), Some(expires_at)) => expires_at <= now,
            (Some(_), None) => false,
            (None, _) => true,
        }
    }
}

/// Request to register a new account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAccount {
    /// Human-readable name
    pub name: String,

    /// OAuth client id
    pub client_id: String,

    /// OAuth client secret
    pub client_secret: String,
}

impl NewAccount {
    /// Create a new account registration
    pub fn new(
        name: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn account() -> Account {
        Account {
            id: 1,
            name: "shop".to_string(),
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            access_token: None,
            token_expires_at: None,
        }
    }

    #[test]
    fn test_missing_token_is_expired() {
        assert!(account().token_expired(Utc::now()));
    }

    #[test]
    fn test_token_expiry() {
        let now = Utc::now();
        let mut acc = account();
        acc.access_token = Some("abc".to_string());
        acc.token_expires_at = Some(now + Duration::seconds(10));

        assert!(!acc.token_expired(now));
        assert!(acc.token_expired(now + Duration::seconds(10)));
    }

    #[test]
    fn test_token_without_expiry_is_valid() {
        let mut acc = account();
        acc.access_token = Some("abc".to_string());
        assert!(!acc.token_expired(Utc::now()));
    }

    #[test]
    fn test_secrets_not_serialized() {
        let mut acc = account();
        acc.access_token = Some("token-value".to_string());

        let json = serde_json::to_string(&acc).unwrap();
        assert!(!json.contains("secret"));
        assert!(!json.contains("token-value"));
    }
}
