//! Shared collaborators of the sync algorithms
//!
//! [`SyncContext`] bundles the record store, transport, token provider and job
//! queue, and knows how to build upstream requests and read the rate-limit
//! headers of their responses.

use std::sync::Arc;

use crate::auth::TokenProvider;
use crate::config::UpstreamConfig;
use crate::database::Database;
use crate::error::SyncError;

use super::http_client::{FetchRequest, FetchResponse, Fetcher};
use super::jobs::JobQueue;

/// Requests left in the current window
pub const HEADER_REMAINING: &str = "x-ratelimit-remaining";

/// Seconds until the window resets
pub const HEADER_RESET: &str = "x-ratelimit-reset";

/// Seconds to wait after a 429
pub const HEADER_RETRY_AFTER: &str = "retry-after";

/// Collaborators shared by the list and detail algorithms
#[derive(Clone)]
pub struct SyncContext {
    /// Record store
    pub db: Arc<dyn Database>,
    /// Upstream transport
    pub fetcher: Arc<dyn Fetcher>,
    /// Bearer token source
    pub tokens: Arc<dyn TokenProvider>,
    /// Job queue for continuations and delayed retries
    pub queue: Arc<dyn JobQueue>,
    /// Upstream endpoints and payload layout
    pub upstream: Arc<UpstreamConfig>,
}

impl SyncContext {
    /// Bundle the collaborators
    pub fn new(
        db: Arc<dyn Database>,
        fetcher: Arc<dyn Fetcher>,
        tokens: Arc<dyn TokenProvider>,
        queue: Arc<dyn JobQueue>,
        upstream: UpstreamConfig,
    ) -> Self {
        Self {
            db,
            fetcher,
            tokens,
            queue,
            upstream: Arc::new(upstream),
        }
    }

    /// Request for one list page of a category
    pub fn list_request(&self, token: &str, category: &str, page: u32) -> FetchRequest {
        self.authorized(FetchRequest::get(self.upstream.list_url.as_str()), token)
            .with_query("page", page.to_string())
            .with_query(self.upstream.category_param.as_str(), category)
    }

    /// Request for the detail of one shipment
    pub fn detail_request(&self, token: &str, external_id: &str) -> FetchRequest {
        self.authorized(
            FetchRequest::get(self.upstream.detail_url_for(external_id)),
            token,
        )
    }

    fn authorized(&self, request: FetchRequest, token: &str) -> FetchRequest {
        request
            .with_header("Accept", self.upstream.accept.as_str())
            .with_header("Authorization", format!("Bearer {}", token))
    }

    /// Identifiers on one list page, in page order
    ///
    /// A body without the item array is an empty page.
    pub fn parse_list_page(&self, body: &[u8]) -> Result<Vec<String>, SyncError> {
        let value: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| SyncError::InvalidData(format!("list page is not JSON: {}", e)))?;

        let items = match value.get(&self.upstream.items_field) {
            None | Some(serde_json::Value::Null) => return Ok(Vec::new()),
            Some(serde_json::Value::Array(items)) => items,
            Some(_) => {
                return Err(SyncError::InvalidData(format!(
                    "'{}' is not an array",
                    self.upstream.items_field
                )))
            }
        };

        items
            .iter()
            .map(|item| match item.get(&self.upstream.id_field) {
                Some(serde_json::Value::String(id)) => Ok(id.clone()),
                Some(serde_json::Value::Number(id)) => Ok(id.to_string()),
                _ => Err(SyncError::InvalidData(format!(
                    "list item without '{}'",
                    self.upstream.id_field
                ))),
            })
            .collect()
    }
}

/// Budget values carried by a successful response
///
/// Returns `(remaining, reset_after_secs)`.
pub fn success_budget(response: &FetchResponse) -> Result<(u32, u64), SyncError> {
    let remaining = response.header_u64(HEADER_REMAINING).ok_or_else(|| {
        SyncError::InvalidData(format!("missing or invalid {} header", HEADER_REMAINING))
    })?;
    let reset = response.header_u64(HEADER_RESET).ok_or_else(|| {
        SyncError::InvalidData(format!("missing or invalid {} header", HEADER_RESET))
    })?;

    Ok((u32::try_from(remaining).unwrap_or(u32::MAX), reset))
}

/// Delay demanded by a 429 response
///
/// `retry-after`, then `x-ratelimit-reset`, then `default_secs`.
pub fn retry_delay(response: &FetchResponse, default_secs: u64) -> u64 {
    response
        .header_u64(HEADER_RETRY_AFTER)
        .or_else(|| response.header_u64(HEADER_RESET))
        .unwrap_or(default_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::testing::{test_context, RecordingQueue, ScriptedFetcher};

    async fn context() -> SyncContext {
        let (ctx, _db) = test_context(ScriptedFetcher::new(), RecordingQueue::new()).await;
        ctx
    }

    #[tokio::test]
    async fn test_list_request_shape() {
        let ctx = context().await;
        let request = ctx.list_request("tok", "FBB", 3);

        assert_eq!(request.url, ctx.upstream.list_url);
        assert_eq!(request.query_value("page"), Some("3"));
        assert_eq!(request.query_value("fulfilment-method"), Some("FBB"));
        assert_eq!(request.header_value("authorization"), Some("Bearer tok"));
        assert_eq!(
            request.header_value("accept"),
            Some("application/vnd.retailer.v3+json")
        );
    }

    #[tokio::test]
    async fn test_detail_request_shape() {
        let ctx = context().await;
        let request = ctx.detail_request("tok", "987");

        assert!(request.url.ends_with("/shipments/987"));
        assert!(request.query.is_empty());
        assert_eq!(request.header_value("authorization"), Some("Bearer tok"));
    }

    #[tokio::test]
    async fn test_parse_list_page() {
        let ctx = context().await;

        let ids = ctx
            .parse_list_page(br#"{"shipments":[{"shipmentId":"A"},{"shipmentId":42}]}"#)
            .unwrap();
        assert_eq!(ids, vec!["A", "42"]);

        assert!(ctx.parse_list_page(b"{}").unwrap().is_empty());
        assert!(ctx.parse_list_page(br#"{"shipments":[]}"#).unwrap().is_empty());

        assert!(matches!(
            ctx.parse_list_page(b"<html>"),
            Err(SyncError::InvalidData(_))
        ));
        assert!(matches!(
            ctx.parse_list_page(br#"{"shipments":[{"orderId":"x"}]}"#),
            Err(SyncError::InvalidData(_))
        ));
    }

    #[test]
    fn test_success_budget_headers() {
        let response = FetchResponse::new(200)
            .with_header("X-RateLimit-Remaining", "7")
            .with_header("X-RateLimit-Reset", "30");
        assert_eq!(success_budget(&response).unwrap(), (7, 30));

        let missing = FetchResponse::new(200).with_header("X-RateLimit-Remaining", "7");
        assert!(matches!(
            success_budget(&missing),
            Err(SyncError::InvalidData(_))
        ));
    }

    #[test]
    fn test_retry_delay_fallbacks() {
        let response = FetchResponse::new(429)
            .with_header("Retry-After", "30")
            .with_header("X-RateLimit-Reset", "50");
        assert_eq!(retry_delay(&response, 60), 30);

        let response = FetchResponse::new(429).with_header("X-RateLimit-Reset", "50");
        assert_eq!(retry_delay(&response, 60), 50);

        assert_eq!(retry_delay(&FetchResponse::new(429), 60), 60);
    }
}
