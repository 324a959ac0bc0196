//! Prometheus metrics for the metering service.
//!
//! Every recording function compiles to a no-op without the `prometheus`
//! feature, so call sites never need their own `cfg` guards.

#[cfg(feature = "prometheus")]
use std::sync::OnceLock;

#[cfg(feature = "prometheus")]
use metrics::{counter, histogram};
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::config::MetricsConfig;

/// Global Prometheus handle for the metrics endpoint.
#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the metrics system with the given configuration.
#[cfg(feature = "prometheus")]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        return Ok(());
    }

    let builder = PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Suffix("_duration_seconds".to_string()),
            &seconds_from_ms(&config.latency_buckets_ms),
        )
        .map_err(|e| MetricsError::Setup(e.to_string()))?;

    let handle = builder.install_recorder().map_err(MetricsError::Install)?;

    PROMETHEUS_HANDLE
        .set(handle)
        .map_err(|_| MetricsError::Setup("Metrics already initialized".to_string()))?;

    Ok(())
}

/// Initialize the metrics system (no-op without prometheus feature).
#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if config.enabled {
        tracing::debug!("Metrics enabled in config but the 'prometheus' feature is not compiled");
    }
    Ok(())
}

/// Convert millisecond buckets to seconds.
#[cfg(feature = "prometheus")]
fn seconds_from_ms(ms_buckets: &[f64]) -> Vec<f64> {
    ms_buckets.iter().map(|ms| ms / 1000.0).collect()
}

/// Get the Prometheus handle for rendering metrics.
#[cfg(feature = "prometheus")]
pub fn get_prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ─────────────────────────────────────────────────────────────────────────────
// Metric Recording Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    #[cfg(feature = "prometheus")]
    {
        let status_class = format!("{}xx", status / 100);

        counter!("edgemeter_http_requests_total", "method" => method.to_string(), "path" => path.to_string(), "status" => status.to_string(), "status_class" => status_class.clone())
            .increment(1);

        histogram!("edgemeter_http_request_duration_seconds", "method" => method.to_string(), "path" => path.to_string(), "status_class" => status_class)
            .record(duration_secs);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (method, path, status, duration_secs);
    }
}

/// Record an ingested sample.
///
/// `outcome` is `stored`, `dropped` (non-positive tenant) or `error`.
pub fn record_sample_write(outcome: &str, bytes: i64) {
    #[cfg(feature = "prometheus")]
    {
        counter!("edgemeter_samples_total", "outcome" => outcome.to_string()).increment(1);
        if outcome == "stored" {
            counter!("edgemeter_ingested_bytes_total").increment(bytes.max(0) as u64);
        }
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (outcome, bytes);
    }
}

/// Record a read query (peak, percentile, range).
pub fn record_query(kind: &str, success: bool, duration_secs: f64) {
    #[cfg(feature = "prometheus")]
    {
        let status = if success { "success" } else { "error" };
        counter!("edgemeter_queries_total", "kind" => kind.to_string(), "status" => status)
            .increment(1);
        histogram!("edgemeter_query_duration_seconds", "kind" => kind.to_string())
            .record(duration_secs);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (kind, success, duration_secs);
    }
}

/// Record a failed unit of work in a shard fan-out.
pub fn record_shard_failure(table: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("edgemeter_shard_failures_total", "table" => table.to_string()).increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = table;
    }
}

/// Record rows deleted by the retention sweeper.
///
/// # Arguments
/// * `table` - The partition table rows were deleted from
/// * `count` - The number of rows deleted
pub fn record_retention_deletion(table: &str, count: u64) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "edgemeter_retention_deleted_total",
            "table" => table.to_string()
        )
        .increment(count);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (table, count);
    }
}

/// Record a completed or failed retention sweep.
pub fn record_sweep(success: bool, duration_secs: f64) {
    #[cfg(feature = "prometheus")]
    {
        let status = if success { "success" } else { "error" };
        counter!("edgemeter_retention_sweeps_total", "status" => status).increment(1);
        histogram!("edgemeter_retention_sweep_duration_seconds").record(duration_secs);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (success, duration_secs);
    }
}

/// Record a rejected RPC authentication attempt.
pub fn record_auth_failure(code: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("edgemeter_auth_failures_total", "code" => code.to_string()).increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = code;
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to set up metrics: {0}")]
    Setup(String),

    #[cfg(feature = "prometheus")]
    #[error("Failed to install metrics recorder: {0}")]
    Install(#[from] metrics_exporter_prometheus::BuildError),
}
