//! Prometheus metrics for collection runs
//!
//! Metrics are recorded through the `metrics` facade, so they cost almost
//! nothing until [`init_metrics`] installs the Prometheus exporter.
//!
//! - `easm_http_requests_total` / `easm_http_request_duration_seconds`
//! - `easm_http_retries_total` / `easm_retry_backoff_duration_seconds`
//! - `easm_token_refreshes_total`
//! - `easm_pages_fetched_total` / `easm_records_emitted_total`
//! - `easm_collections_completed_total` / `easm_collections_failed_total`

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::OnceCell;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

static METRICS_INITIALIZED: OnceCell<SocketAddr> = OnceCell::new();

static CORRELATION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Metrics initialization failure
#[derive(Debug, thiserror::Error)]
#[error("failed to install Prometheus exporter on {addr}: {message}")]
pub struct MetricsError {
    addr: SocketAddr,
    message: String,
}

/// Install the Prometheus exporter and describe all metrics.
///
/// Idempotent: later calls are no-ops.
pub fn init_metrics(addr: SocketAddr) -> Result<(), MetricsError> {
    if let Some(existing) = METRICS_INITIALIZED.get() {
        debug!(addr = %existing, "Metrics already initialized, skipping");
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| MetricsError {
            addr,
            message: e.to_string(),
        })?;

    describe_counter!(
        "easm_http_requests_total",
        Unit::Count,
        "HTTP requests made to the token endpoint and the EASM data plane"
    );
    describe_histogram!(
        "easm_http_request_duration_seconds",
        Unit::Seconds,
        "HTTP request duration"
    );
    describe_counter!(
        "easm_http_retries_total",
        Unit::Count,
        "Retries after transient failures"
    );
    describe_histogram!(
        "easm_retry_backoff_duration_seconds",
        Unit::Seconds,
        "Backoff slept before a retry"
    );
    describe_counter!(
        "easm_token_refreshes_total",
        Unit::Count,
        "Client-credential token exchanges"
    );
    describe_counter!(
        "easm_pages_fetched_total",
        Unit::Count,
        "Listing pages fetched"
    );
    describe_counter!(
        "easm_records_emitted_total",
        Unit::Count,
        "Records written to the event sink"
    );
    describe_counter!(
        "easm_collections_completed_total",
        Unit::Count,
        "Collection runs that finished"
    );
    describe_counter!(
        "easm_collections_failed_total",
        Unit::Count,
        "Collection runs that aborted with an error"
    );

    let _ = METRICS_INITIALIZED.set(addr);
    info!(addr = %addr, "Metrics exporter listening");
    Ok(())
}

/// Whether the exporter has been installed
pub fn is_initialized() -> bool {
    METRICS_INITIALIZED.get().is_some()
}

/// Generate a correlation ID for request tracing
pub fn generate_correlation_id() -> String {
    let id = CORRELATION_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    format!("req-{id:08x}")
}

/// Timing and outcome of one HTTP attempt
pub struct HttpRequestMetrics {
    endpoint: String,
    start_time: Instant,
    correlation_id: String,
    attempt: u32,
}

impl HttpRequestMetrics {
    /// Start timing an attempt.
    pub fn start(endpoint: impl Into<String>, attempt: u32) -> Self {
        let endpoint = endpoint.into();
        let correlation_id = generate_correlation_id();
        debug!(
            correlation_id = %correlation_id,
            endpoint = %endpoint,
            attempt,
            "Sending request"
        );
        Self {
            endpoint,
            start_time: Instant::now(),
            correlation_id,
            attempt,
        }
    }

    /// Record a response with a status code.
    pub fn record_complete(&self, status_code: u16) {
        let duration = self.start_time.elapsed();
        counter!(
            "easm_http_requests_total",
            "endpoint" => self.endpoint.clone(),
            "status" => status_code.to_string(),
        )
        .increment(1);
        histogram!(
            "easm_http_request_duration_seconds",
            "endpoint" => self.endpoint.clone(),
        )
        .record(duration.as_secs_f64());

        debug!(
            correlation_id = %self.correlation_id,
            endpoint = %self.endpoint,
            status = status_code,
            attempt = self.attempt,
            duration_ms = duration.as_millis() as u64,
            "Response received"
        );
    }

    /// Record a failure without a status code.
    pub fn record_network_error(&self, kind: &str) {
        let duration = self.start_time.elapsed();
        counter!(
            "easm_http_requests_total",
            "endpoint" => self.endpoint.clone(),
            "status" => kind.to_string(),
        )
        .increment(1);
        histogram!(
            "easm_http_request_duration_seconds",
            "endpoint" => self.endpoint.clone(),
        )
        .record(duration.as_secs_f64());

        warn!(
            correlation_id = %self.correlation_id,
            endpoint = %self.endpoint,
            attempt = self.attempt,
            kind,
            duration_ms = duration.as_millis() as u64,
            "Request failed without a response"
        );
    }

    /// Correlation ID of this attempt
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }
}

/// Record a retry and the backoff slept before it.
pub fn record_retry_backoff(duration: Duration, attempt: u32) {
    counter!("easm_http_retries_total", "attempt" => attempt.to_string()).increment(1);
    histogram!("easm_retry_backoff_duration_seconds").record(duration.as_secs_f64());
}

/// Record a token exchange and its outcome.
pub fn record_token_refresh(success: bool) {
    counter!(
        "easm_token_refreshes_total",
        "outcome" => if success { "success" } else { "failure" },
    )
    .increment(1);
}

/// Record one fetched page.
pub fn record_page(collection: &str, records: usize) {
    counter!("easm_pages_fetched_total", "collection" => collection.to_string()).increment(1);
    counter!("easm_records_emitted_total", "collection" => collection.to_string())
        .increment(records as u64);
}

/// Per-run collection metrics
pub struct CollectionMetrics {
    collection: String,
    start_time: Instant,
}

impl CollectionMetrics {
    /// Start tracking a run.
    pub fn start(collection: impl Into<String>) -> Self {
        let collection = collection.into();
        info!(collection = %collection, "Collection started");
        Self {
            collection,
            start_time: Instant::now(),
        }
    }

    /// Elapsed time since start
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Record a finished run.
    pub fn record_success(&self, records: u64, pages: u64) {
        counter!(
            "easm_collections_completed_total",
            "collection" => self.collection.clone(),
        )
        .increment(1);
        info!(
            collection = %self.collection,
            records,
            pages,
            duration_secs = self.elapsed().as_secs(),
            "Collection completed"
        );
    }

    /// Record an aborted run.
    pub fn record_failure(&self, error: &str) {
        counter!(
            "easm_collections_failed_total",
            "collection" => self.collection.clone(),
        )
        .increment(1);
        error!(
            collection = %self.collection,
            error = %error,
            duration_secs = self.elapsed().as_secs(),
            "Collection failed"
        );
    }
}
