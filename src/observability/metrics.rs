use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

use crate::error::{AppError, Result};

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Global metrics instance.
pub static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Metrics collector for the expense tracker.
///
/// Calls are no-ops until a recorder is installed with [`init_metrics`].
#[derive(Debug, Clone)]
pub struct Metrics;

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self
    }

    pub fn record_expense_created(&self, category: &str) {
        counter!("expenses_created_total", "category" => category.to_string()).increment(1);
    }

    pub fn record_expense_deleted(&self, category: &str) {
        counter!("expenses_deleted_total", "category" => category.to_string()).increment(1);
    }

    pub fn record_store_write_latency(&self, duration_ms: f64) {
        histogram!("expense_store_write_duration_ms").record(duration_ms);
    }

    /// `outcome` is one of `executed`, `replayed` or `bypassed`.
    pub fn record_idempotency_outcome(&self, outcome: &str) {
        counter!("idempotency_requests_total", "outcome" => outcome.to_string()).increment(1);
    }

    pub fn record_idempotency_evictions(&self, count: u64) {
        counter!("idempotency_records_evicted_total").increment(count);
    }

    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_ms: f64) {
        counter!("http_requests_total", "method" => method.to_string(), "path" => path.to_string(), "status" => status.to_string()).increment(1);
        histogram!("http_request_duration_ms", "method" => method.to_string(), "path" => path.to_string()).record(duration_ms);
    }
}

/// Timer for measuring operation latency.
pub struct LatencyTimer {
    start: Instant,
}

impl LatencyTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for LatencyTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Installs the Prometheus recorder and returns its handle.
pub fn init_metrics() -> Result<PrometheusHandle> {
    if let Some(handle) = METRICS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to install Prometheus recorder: {}", e)))?;
    describe_metrics();

    METRICS.get_or_init(Metrics::new);
    Ok(METRICS_HANDLE.get_or_init(|| handle).clone())
}

/// Describes all metrics for Prometheus.
fn describe_metrics() {
    describe_counter!("expenses_created_total", Unit::Count, "Total number of expenses created");
    describe_counter!("expenses_deleted_total", Unit::Count, "Total number of expenses deleted");
    describe_histogram!("expense_store_write_duration_ms", Unit::Milliseconds, "Expense store write latency in milliseconds");

    describe_counter!("idempotency_requests_total", Unit::Count, "POST requests seen by the idempotency layer, by outcome");
    describe_counter!("idempotency_records_evicted_total", Unit::Count, "Idempotency records evicted by expiry or capacity");

    describe_counter!("http_requests_total", Unit::Count, "Total HTTP requests");
    describe_histogram!("http_request_duration_ms", Unit::Milliseconds, "HTTP request latency in milliseconds");
}

/// Returns the global metrics instance.
pub fn get_metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}
