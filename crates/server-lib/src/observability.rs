//! Observability infrastructure for the model service
//!
//! Provides:
//! - Prometheus metrics (ingest volume, training and export latency, current model version)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for training and export latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ServiceMetricsInner> = OnceLock::new();

struct ServiceMetricsInner {
    ingest_requests: IntCounter,
    records_ingested: IntCounter,
    training_latency_seconds: Histogram,
    export_latency_seconds: Histogram,
    model_version: IntGauge,
    bootstraps: IntCounter,
    errors: IntCounterVec,
}

impl ServiceMetricsInner {
    fn new() -> Self {
        Self {
            ingest_requests: register_int_counter!(
                "model_service_ingest_requests_total",
                "Telemetry batches accepted for retraining"
            )
            .expect("Failed to register ingest_requests_total"),

            records_ingested: register_int_counter!(
                "model_service_records_ingested_total",
                "Telemetry records used for retraining"
            )
            .expect("Failed to register records_ingested_total"),

            training_latency_seconds: register_histogram!(
                "model_service_training_latency_seconds",
                "Time spent fitting the classifier",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register training_latency_seconds"),

            export_latency_seconds: register_histogram!(
                "model_service_export_latency_seconds",
                "Time spent converting a model to the mobile format",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register export_latency_seconds"),

            model_version: register_int_gauge!(
                "model_service_model_version",
                "Most recently published or served model version"
            )
            .expect("Failed to register model_version"),

            bootstraps: register_int_counter!(
                "model_service_bootstraps_total",
                "Times an empty registry was seeded with an untrained model"
            )
            .expect("Failed to register bootstraps_total"),

            errors: register_int_counter_vec!(
                "model_service_errors_total",
                "Failed requests by kind",
                &["kind"]
            )
            .expect("Failed to register errors_total"),
        }
    }
}

/// Lightweight handle to the global metrics instance
///
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct ServiceMetrics {
    _private: (),
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ServiceMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ServiceMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn record_ingest(&self, records: usize) {
        self.inner().ingest_requests.inc();
        self.inner().records_ingested.inc_by(records as u64);
    }

    pub fn observe_training_latency(&self, duration_secs: f64) {
        self.inner().training_latency_seconds.observe(duration_secs);
    }

    pub fn observe_export_latency(&self, duration_secs: f64) {
        self.inner().export_latency_seconds.observe(duration_secs);
    }

    pub fn set_model_version(&self, version: u32) {
        self.inner().model_version.set(i64::from(version));
    }

    pub fn inc_bootstraps(&self) {
        self.inner().bootstraps.inc();
    }

    pub fn inc_errors(&self, kind: &str) {
        self.inner().errors.with_label_values(&[kind]).inc();
    }
}

/// Structured logger for service events
#[derive(Clone)]
pub struct StructuredLogger {
    service: String,
}

impl StructuredLogger {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    pub fn log_startup(&self, version: &str, bucket: &str) {
        info!(
            event = "service_started",
            service = %self.service,
            service_version = %version,
            bucket = %bucket,
            "Model service started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "service_shutdown",
            service = %self.service,
            reason = %reason,
            "Model service shutting down"
        );
    }

    pub fn log_model_published(&self, version: u32, location: &str, samples: usize) {
        info!(
            event = "model_published",
            service = %self.service,
            version = version,
            location = %location,
            samples = samples,
            "Retrained model published"
        );
    }

    pub fn log_bootstrap(&self, version: u32, location: &str) {
        warn!(
            event = "registry_bootstrapped",
            service = %self.service,
            version = version,
            location = %location,
            "Ledger empty, published an untrained model"
        );
    }

    pub fn log_model_served(&self, version: u32, size_bytes: usize) {
        info!(
            event = "model_served",
            service = %self.service,
            version = version,
            size_bytes = size_bytes,
            "Exported model served"
        );
    }

    pub fn log_blob_missing(&self, key: &str) {
        warn!(
            event = "blob_missing",
            service = %self.service,
            key = %key,
            "Ledger points at a model blob that does not exist"
        );
    }

    pub fn log_ledger_failure(&self, error: &str) {
        warn!(
            event = "ledger_query_failed",
            service = %self.service,
            error = %error,
            "Ledger query failed"
        );
    }

    pub fn log_orphans(&self, orphans: &[String], deleted: bool) {
        if orphans.is_empty() {
            info!(
                event = "orphans_found",
                service = %self.service,
                count = 0,
                "No orphaned model blobs"
            );
        } else {
            warn!(
                event = "orphans_found",
                service = %self.service,
                count = orphans.len(),
                keys = ?orphans,
                deleted = deleted,
                "Model blobs without ledger rows"
            );
        }
    }
}
