//! Configuration management for shipment-sync
//!
//! This module handles loading, parsing, and validating application configuration
//! from YAML files and environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Upstream API endpoints and payload layout
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// HTTP transport configuration
    #[serde(default)]
    pub http: HttpConfig,

    /// Scheduler configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Retry configuration for credential refresh
    #[serde(default)]
    pub retry: RetryConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// OpenTelemetry configuration
    #[serde(default)]
    pub otel: OtelConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileRead(format!("Failed to read config file: {}", e)))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        // First, expand environment variables in the YAML string
        let expanded = expand_env_vars(yaml);
        let config: Config = serde_yaml::from_str(&expanded)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables with prefix SHIPMENT_SYNC_
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        // Upstream config from env
        if let Ok(url) = std::env::var("SHIPMENT_SYNC_UPSTREAM_LIST_URL") {
            config.upstream.list_url = url;
        }
        if let Ok(url) = std::env::var("SHIPMENT_SYNC_UPSTREAM_DETAIL_URL") {
            config.upstream.detail_url = url;
        }
        if let Ok(url) = std::env::var("SHIPMENT_SYNC_UPSTREAM_TOKEN_URL") {
            config.upstream.token_url = url;
        }
        if let Ok(categories) = std::env::var("SHIPMENT_SYNC_UPSTREAM_CATEGORIES") {
            config.upstream.categories = categories
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(String::from)
                .collect();
        }

        // Scheduler config from env
        if let Ok(secs) = std::env::var("SHIPMENT_SYNC_SCHEDULER_TICK_INTERVAL_SECS") {
            config.scheduler.tick_interval_secs = parse_env("tick_interval_secs", &secs)?;
        }
        if let Ok(workers) = std::env::var("SHIPMENT_SYNC_SCHEDULER_WORKERS") {
            config.scheduler.workers = parse_env("workers", &workers)?;
        }

        // Database config from env
        if let Ok(path) = std::env::var("SHIPMENT_SYNC_DATABASE_PATH") {
            config.database.path = path;
        }

        // OTEL config from env
        if let Ok(enabled) = std::env::var("SHIPMENT_SYNC_OTEL_ENABLED") {
            config.otel.enabled = enabled.parse().unwrap_or(false);
        }
        if let Ok(endpoint) = std::env::var("SHIPMENT_SYNC_OTEL_ENDPOINT") {
            config.otel.endpoint = Some(endpoint);
        }
        if let Ok(environment) = std::env::var("SHIPMENT_SYNC_OTEL_ENVIRONMENT") {
            config.otel.environment = Some(environment);
        }

        // Logging config from env
        if let Ok(level) = std::env::var("SHIPMENT_SYNC_LOG_LEVEL") {
            config.logging.level = level;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check values that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.upstream.categories.is_empty() {
            return Err(ConfigError::MissingRequired(
                "upstream.categories".to_string(),
            ));
        }
        if !self.upstream.detail_url.contains("{id}") {
            return Err(ConfigError::InvalidValue(
                "upstream.detail_url must contain an {id} placeholder".to_string(),
            ));
        }
        if self.scheduler.workers == 0 {
            return Err(ConfigError::InvalidValue(
                "scheduler.workers must be at least 1".to_string(),
            ));
        }
        if self.scheduler.tick_interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "scheduler.tick_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.scheduler.max_pages_per_run == 0 {
            return Err(ConfigError::InvalidValue(
                "scheduler.max_pages_per_run must be at least 1".to_string(),
            ));
        }
        if self.http.max_concurrent == 0 {
            return Err(ConfigError::InvalidValue(
                "http.max_concurrent must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.otel.trace_sample_ratio) {
            return Err(ConfigError::InvalidValue(
                "otel.trace_sample_ratio must be between 0.0 and 1.0".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::Parse(format!("Invalid value for {}: {}", name, value)))
}

/// Upstream API configuration
///
/// Defaults target the retailer shipments API (v3 media type).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpstreamConfig {
    /// Paginated list endpoint
    #[serde(default = "default_list_url")]
    pub list_url: String,

    /// Detail endpoint, `{id}` is replaced by the shipment id
    #[serde(default = "default_detail_url")]
    pub detail_url: String,

    /// Client-credentials token endpoint
    #[serde(default = "default_token_url")]
    pub token_url: String,

    /// Value of the Accept header on every upstream request
    #[serde(default = "default_accept")]
    pub accept: String,

    /// Query parameter carrying the fulfilment category
    #[serde(default = "default_category_param")]
    pub category_param: String,

    /// Fulfilment categories, scanned in this order
    #[serde(default = "default_categories")]
    pub categories: Vec<String>,

    /// Field of the list body holding the item array
    #[serde(default = "default_items_field")]
    pub items_field: String,

    /// Field of each list item holding its identifier
    #[serde(default = "default_id_field")]
    pub id_field: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            list_url: default_list_url(),
            detail_url: default_detail_url(),
            token_url: default_token_url(),
            accept: default_accept(),
            category_param: default_category_param(),
            categories: default_categories(),
            items_field: default_items_field(),
            id_field: default_id_field(),
        }
    }
}

impl UpstreamConfig {
    /// Detail URL of one shipment, with the id encoded as a single path segment
    pub fn detail_url_for(&self, external_id: &str) -> String {
        self.detail_url.replace("{id}", &urlencoding::encode(external_id))
    }
}

fn default_list_url() -> String {
    "https://api.bol.com/retailer/shipments".to_string()
}

fn default_detail_url() -> String {
    "https://api.bol.com/retailer/shipments/{id}".to_string()
}

fn default_token_url() -> String {
    "https://login.bol.com/token?grant_type=client_credentials".to_string()
}

fn default_accept() -> String {
    "application/vnd.retailer.v3+json".to_string()
}

fn default_category_param() -> String {
    "fulfilment-method".to_string()
}

fn default_categories() -> Vec<String> {
    vec!["FBR".to_string(), "FBB".to_string()]
}

fn default_items_field() -> String {
    "shipments".to_string()
}

fn default_id_field() -> String {
    "shipmentId".to_string()
}

/// HTTP transport configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpConfig {
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Minimum interval between requests to one host in milliseconds
    #[serde(default = "default_min_interval")]
    pub min_interval_ms: u64,

    /// Maximum number of concurrent requests
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Wait time when a 429 carries no usable delay (in seconds)
    #[serde(default = "default_rate_limit_wait")]
    pub rate_limit_wait_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            min_interval_ms: default_min_interval(),
            max_concurrent: default_max_concurrent(),
            rate_limit_wait_secs: default_rate_limit_wait(),
        }
    }
}

fn default_timeout() -> u64 {
    30
}

fn default_min_interval() -> u64 {
    0
}

fn default_max_concurrent() -> usize {
    4
}

fn default_rate_limit_wait() -> u64 {
    60
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerConfig {
    /// Interval between ticks in seconds
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,

    /// Delay before the first tick in seconds
    #[serde(default)]
    pub initial_delay_secs: u64,

    /// Number of worker tasks executing jobs
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Detail slice size when the budget is exhausted or unknown
    #[serde(default = "default_detail_fallback_budget")]
    pub detail_fallback_budget: u32,

    /// Age after which a started record is handed out again (seconds)
    #[serde(default = "default_reclaim_after")]
    pub reclaim_after_secs: u64,

    /// Page ceiling of one list invocation
    #[serde(default = "default_max_pages_per_run")]
    pub max_pages_per_run: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
            initial_delay_secs: 0,
            workers: default_workers(),
            detail_fallback_budget: default_detail_fallback_budget(),
            reclaim_after_secs: default_reclaim_after(),
            max_pages_per_run: default_max_pages_per_run(),
        }
    }
}

fn default_tick_interval() -> u64 {
    60
}

fn default_workers() -> usize {
    4
}

fn default_detail_fallback_budget() -> u32 {
    14
}

fn default_reclaim_after() -> u64 {
    900
}

fn default_max_pages_per_run() -> u32 {
    100
}

/// Retry configuration for external API calls
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial backoff duration in seconds
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_secs: u64,

    /// Maximum backoff duration in seconds
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    /// Backoff multiplier
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Whether to add jitter to backoff
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_secs: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: default_jitter(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff() -> u64 {
    5
}

fn default_max_backoff() -> u64 {
    300
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> bool {
    true
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "/data/db/shipment-sync.db".to_string()
}

/// OpenTelemetry configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OtelConfig {
    /// Whether OpenTelemetry is enabled
    #[serde(default)]
    pub enabled: bool,

    /// OTLP endpoint URL
    pub endpoint: Option<String>,

    /// `service.name` resource attribute
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// `deployment.environment` resource attribute, omitted when unset
    #[serde(default)]
    pub environment: Option<String>,

    /// Fraction of root traces sampled (0.0 to 1.0)
    #[serde(default = "default_trace_sample_ratio")]
    pub trace_sample_ratio: f64,

    /// Metric export interval in seconds
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            service_name: default_service_name(),
            environment: None,
            trace_sample_ratio: default_trace_sample_ratio(),
            metrics_interval_secs: default_metrics_interval(),
        }
    }
}

fn default_service_name() -> String {
    "shipment-sync".to_string()
}

fn default_trace_sample_ratio() -> f64 {
    1.0
}

fn default_metrics_interval() -> u64 {
    60
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// Configuration error types
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ConfigError {
    /// Error reading configuration file
    #[error("Failed to read configuration file: {0}")]
    FileRead(String),

    /// Error parsing configuration
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    /// Invalid configuration value
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// Missing required configuration
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

/// Expand environment variables in a string
///
/// Supports `${VAR_NAME}` syntax
fn expand_env_vars(input: &str) -> String {
    let re = match regex_lite::Regex::new(r"\$\{([^}]+)\}") {
        Ok(re) => re,
        Err(_) => return input.to_string(),
    };

    re.replace_all(input, |caps: &regex_lite::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| caps[0].to_string())
    })
    .into_owned()
}
