//! HTTP transport for upstream API calls
//!
//! The sync algorithms only see the [`Fetcher`] trait: a GET with headers and
//! query parameters that yields status, headers and body. Every HTTP status is a
//! normal response; only transport failures (timeout, refused connection, broken
//! body) are errors. [`HttpFetcher`] is the reqwest implementation with global
//! concurrency limiting and a per-host minimum request interval.

use crate::config::HttpConfig;
use crate::error::SyncError;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use tracing::debug;

/// Upstream GET request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchRequest {
    /// Absolute URL
    pub url: String,
    /// Request headers, in insertion order
    pub headers: Vec<(String, String)>,
    /// Query parameters, in insertion order
    pub query: Vec<(String, String)>,
}

impl FetchRequest {
    /// Create a request for `url`
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Add a header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Add a query parameter
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Value of a query parameter
    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Value of a header (case-insensitive)
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Upstream response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers, names lowercased
    pub headers: HashMap<String, String>,
    /// Raw body
    pub body: Bytes,
}

impl FetchResponse {
    /// Create a response with an empty body
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: Bytes::new(),
        }
    }

    /// Add a header
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Set the body
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Header value by (case-insensitive) name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Header value parsed as a non-negative integer
    pub fn header_u64(&self, name: &str) -> Option<u64> {
        self.header(name).and_then(|v| v.trim().parse().ok())
    }
}

/// Transport capability used by the sync algorithms
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Perform a GET request
    ///
    /// Returns `Err` only for transport failures; any HTTP status is `Ok`.
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, SyncError>;
}

/// reqwest-based fetcher with concurrency and interval limiting
///
/// Features:
/// - Per-host request interval enforcement
/// - Global concurrent request limiting via semaphore
/// - Request timeout surfaced as [`SyncError::NetworkTimeout`]
#[derive(Debug)]
pub struct HttpFetcher {
    client: Client,
    semaphore: Arc<Semaphore>,
    last_request: Arc<Mutex<HashMap<String, Instant>>>,
    config: HttpConfig,
}

impl HttpFetcher {
    /// Create a new fetcher
    pub fn new(config: HttpConfig) -> Result<Self, SyncError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SyncError::Network(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self::with_client(client, config))
    }

    /// Create a fetcher with a custom reqwest Client
    pub fn with_client(client: Client, config: HttpConfig) -> Self {
        Self {
            client,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent)),
            last_request: Arc::new(Mutex::new(HashMap::new())),
            config,
        }
    }

    /// Wait for the minimum interval to pass for the given URL's host
    async fn wait_for_interval(&self, url: &str) {
        if self.config.min_interval_ms == 0 {
            return;
        }

        let host = extract_host(url);
        let min_interval = Duration::from_millis(self.config.min_interval_ms);

        let mut last_requests = self.last_request.lock().await;

        if let Some(last) = last_requests.get(&host) {
            let elapsed = last.elapsed();
            if elapsed < min_interval {
                let wait_time = min_interval - elapsed;
                debug!(
                    host = host,
                    wait_ms = wait_time.as_millis(),
                    "Waiting for request interval"
                );
                drop(last_requests); // Release lock while waiting
                tokio::time::sleep(wait_time).await;
                last_requests = self.last_request.lock().await;
            }
        }

        last_requests.insert(host, Instant::now());
    }

    /// Get current configuration
    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    /// Get number of available permits (concurrent request slots)
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, SyncError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| SyncError::Network("HTTP client shut down".to_string()))?;

        self.wait_for_interval(&request.url).await;

        debug!(url = %request.url, query = ?request.query, "Sending HTTP GET request");

        let mut builder = self.client.get(&request.url).query(&request.query);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(map_transport_error)?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();

        let body = response.bytes().await.map_err(map_transport_error)?;

        debug!(
            url = %request.url,
            status = status,
            body_size = body.len(),
            "Received response"
        );

        Ok(FetchResponse {
            status,
            headers,
            body,
        })
    }
}

fn map_transport_error(e: reqwest::Error) -> SyncError {
    if e.is_timeout() {
        SyncError::NetworkTimeout
    } else if e.is_connect() {
        SyncError::ConnectionRefused
    } else {
        SyncError::Network(e.to_string())
    }
}

/// Extract host (with port) from URL for interval tracking
fn extract_host(url: &str) -> String {
    url.split("://")
        .nth(1)
        .and_then(|s| s.split('/').next())
        .unwrap_or(url)
        .to_string()
}
