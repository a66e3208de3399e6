//! OpenTelemetry integration for shipment-sync
//!
//! This module provides observability through OpenTelemetry: OTLP trace and
//! metric export, the sync metric set, and tracing subscriber setup.

use std::time::Duration;

use crate::config::OtelConfig;
use opentelemetry::{
    global,
    metrics::{Counter, Histogram, Meter, MeterProvider as _},
    trace::TracerProvider as TracerProviderTrait,
    KeyValue,
};
use opentelemetry_sdk::{metrics::SdkMeterProvider, trace::TracerProvider, Resource};
use thiserror::Error;
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// OpenTelemetry error types
#[derive(Debug, Error)]
pub enum OtelError {
    /// Failed to initialize tracer
    #[error("Failed to initialize tracer: {0}")]
    TracerInit(String),

    /// Failed to initialize meter
    #[error("Failed to initialize meter: {0}")]
    MeterInit(String),

    /// Failed to shutdown
    #[error("Failed to shutdown: {0}")]
    Shutdown(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Telemetry providers of one shipment-sync process
///
/// With export disabled only an in-process meter provider exists, so metric
/// handles stay valid and record nowhere.
pub struct OtelProvider {
    tracer_provider: Option<TracerProvider>,
    meter_provider: SdkMeterProvider,
}

impl OtelProvider {
    /// Build the providers described by `config`
    pub fn new(config: &OtelConfig) -> Result<Self, OtelError> {
        let resource = service_resource(config);

        if !config.enabled {
            return Ok(Self {
                tracer_provider: None,
                meter_provider: SdkMeterProvider::builder().with_resource(resource).build(),
            });
        }

        let endpoint = config
            .endpoint
            .as_deref()
            .ok_or_else(|| OtelError::Config("OTLP endpoint is required when enabled".into()))?;

        let tracer_provider =
            Self::init_tracer_provider(endpoint, &resource, config.trace_sample_ratio)?;
        let meter_provider = Self::init_meter_provider(
            endpoint,
            &resource,
            Duration::from_secs(config.metrics_interval_secs.max(1)),
        )?;
        global::set_tracer_provider(tracer_provider.clone());

        Ok(Self {
            tracer_provider: Some(tracer_provider),
            meter_provider,
        })
    }

    fn init_tracer_provider(
        endpoint: &str,
        resource: &Resource,
        sample_ratio: f64,
    ) -> Result<TracerProvider, OtelError> {
        use opentelemetry_otlp::WithExportConfig;
        use opentelemetry_sdk::runtime;
        use opentelemetry_sdk::trace::{Config, Sampler};

        let exporter = opentelemetry_otlp::new_exporter()
            .tonic()
            .with_endpoint(endpoint)
            .build_span_exporter()
            .map_err(|e| OtelError::TracerInit(e.to_string()))?;

        let sampler = Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(sample_ratio)));

        Ok(TracerProvider::builder()
            .with_batch_exporter(exporter, runtime::Tokio)
            .with_config(
                Config::default()
                    .with_sampler(sampler)
                    .with_resource(resource.clone()),
            )
            .build())
    }

    fn init_meter_provider(
        endpoint: &str,
        resource: &Resource,
        interval: Duration,
    ) -> Result<SdkMeterProvider, OtelError> {
        use opentelemetry_otlp::{MetricsExporterBuilder, WithExportConfig};
        use opentelemetry_sdk::metrics::reader::{
            DefaultAggregationSelector, DefaultTemporalitySelector,
        };
        use opentelemetry_sdk::{metrics::PeriodicReader, runtime};

        let exporter = MetricsExporterBuilder::from(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint),
        )
        .build_metrics_exporter(
            Box::new(DefaultTemporalitySelector::new()),
            Box::new(DefaultAggregationSelector::new()),
        )
        .map_err(|e| OtelError::MeterInit(e.to_string()))?;

        let reader = PeriodicReader::builder(exporter, runtime::Tokio)
            .with_interval(interval)
            .build();

        Ok(SdkMeterProvider::builder()
            .with_resource(resource.clone())
            .with_reader(reader)
            .build())
    }

    /// Meter the sync metrics are created from
    pub fn meter(&self) -> Meter {
        self.meter_provider.meter(env!("CARGO_PKG_NAME"))
    }

    /// Whether spans and metrics are exported
    pub fn is_enabled(&self) -> bool {
        self.tracer_provider.is_some()
    }

    /// Flush pending spans and metrics, then stop both providers
    pub fn shutdown(self) -> Result<(), OtelError> {
        if let Some(tracer_provider) = &self.tracer_provider {
            for result in tracer_provider.force_flush() {
                result.map_err(|e| OtelError::Shutdown(format!("Tracer flush failed: {:?}", e)))?;
            }
            global::shutdown_tracer_provider();
        }

        self.meter_provider
            .shutdown()
            .map_err(|e| OtelError::Shutdown(format!("Meter shutdown failed: {:?}", e)))
    }
}

/// Resource attributes identifying this process
fn service_resource(config: &OtelConfig) -> Resource {
    let mut attributes = vec![
        KeyValue::new("service.name", config.service_name.clone()),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
    ];
    if let Some(environment) = &config.environment {
        attributes.push(KeyValue::new("deployment.environment", environment.clone()));
    }
    Resource::new(attributes)
}

/// Sync engine metrics
///
/// Counters are labelled with the endpoint or job kind they belong to.
pub struct SyncMetrics {
    /// Upstream requests issued by sync jobs
    pub requests_total: Counter<u64>,

    /// Newly discovered shipment records
    pub records_discovered_total: Counter<u64>,

    /// Detail payloads stored
    pub details_finished_total: Counter<u64>,

    /// Detail fetches that left their record started
    pub details_failed_total: Counter<u64>,

    /// 429 responses received
    pub rate_limited_total: Counter<u64>,

    /// Jobs that ended with an error
    pub job_failures_total: Counter<u64>,

    /// Job execution time in seconds
    pub job_duration: Histogram<f64>,
}

impl SyncMetrics {
    /// Create new metrics with the given meter
    pub fn new(meter: &Meter) -> Self {
        let requests_total = meter
            .u64_counter("shipment_sync_requests_total")
            .with_description("Upstream requests issued by sync jobs")
            .init();

        let records_discovered_total = meter
            .u64_counter("shipment_sync_records_discovered_total")
            .with_description("Newly discovered shipment records")
            .init();

        let details_finished_total = meter
            .u64_counter("shipment_sync_details_finished_total")
            .with_description("Shipment details fetched and stored")
            .init();

        let details_failed_total = meter
            .u64_counter("shipment_sync_details_failed_total")
            .with_description("Shipment detail fetches that failed")
            .init();

        let rate_limited_total = meter
            .u64_counter("shipment_sync_rate_limited_total")
            .with_description("Rate-limited upstream responses")
            .init();

        let job_failures_total = meter
            .u64_counter("shipment_sync_job_failures_total")
            .with_description("Sync jobs that ended with an error")
            .init();

        let job_duration = meter
            .f64_histogram("shipment_sync_job_duration_seconds")
            .with_description("Sync job duration in seconds")
            .init();

        Self {
            requests_total,
            records_discovered_total,
            details_finished_total,
            details_failed_total,
            rate_limited_total,
            job_failures_total,
            job_duration,
        }
    }

    /// Record upstream requests against an endpoint
    pub fn record_requests(&self, endpoint: &str, count: u64) {
        if count > 0 {
            self.requests_total
                .add(count, &[KeyValue::new("endpoint", endpoint.to_string())]);
        }
    }

    /// Record newly discovered records
    pub fn record_discovered(&self, count: u64) {
        if count > 0 {
            self.records_discovered_total.add(count, &[]);
        }
    }

    /// Record stored and failed detail fetches
    pub fn record_details(&self, finished: u64, failed: u64) {
        if finished > 0 {
            self.details_finished_total.add(finished, &[]);
        }
        if failed > 0 {
            self.details_failed_total.add(failed, &[]);
        }
    }

    /// Record a rate-limited response
    pub fn record_rate_limited(&self, endpoint: &str) {
        self.rate_limited_total
            .add(1, &[KeyValue::new("endpoint", endpoint.to_string())]);
    }

    /// Record a failed job
    pub fn record_job_failure(&self, job: &str, error_kind: &str) {
        self.job_failures_total.add(
            1,
            &[
                KeyValue::new("job", job.to_string()),
                KeyValue::new("error", error_kind.to_string()),
            ],
        );
    }

    /// Record job duration
    pub fn record_job_duration(&self, job: &str, outcome: &str, duration_secs: f64) {
        self.job_duration.record(
            duration_secs,
            &[
                KeyValue::new("job", job.to_string()),
                KeyValue::new("outcome", outcome.to_string()),
            ],
        );
    }
}

/// Map a configured level name to a tracing level
///
/// Unknown names fall back to INFO.
pub fn parse_level(log_level: &str) -> Level {
    match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Initialize tracing subscriber with OpenTelemetry integration
///
/// `log_format` is `json` (default) or `pretty`.
pub fn init_tracing(otel: &OtelProvider, log_level: &str, log_format: &str) -> Result<(), OtelError> {
    let filter = tracing_subscriber::filter::LevelFilter::from_level(parse_level(log_level));
    let otel_layer = otel.tracer_provider.as_ref().map(|tp| {
        let tracer = tp.tracer(env!("CARGO_PKG_NAME"));
        tracing_opentelemetry::layer().with_tracer(tracer)
    });

    let registry = tracing_subscriber::registry().with(filter).with(otel_layer);

    if log_format.eq_ignore_ascii_case("pretty") {
        registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()
            .map_err(|e| OtelError::TracerInit(e.to_string()))?;
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| OtelError::TracerInit(e.to_string()))?;
    }

    Ok(())
}
