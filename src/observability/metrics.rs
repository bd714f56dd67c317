//! Prometheus metrics for store operations and embedding requests.
//!
//! Recording functions compile to no-ops without the `prometheus` feature.

#[cfg(feature = "prometheus")]
use std::sync::OnceLock;

#[cfg(feature = "prometheus")]
use metrics::{counter, histogram};
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::config::MetricsConfig;

#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder with the configured latency buckets.
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
pub fn init_metrics(_config: &MetricsConfig) -> Result<(), MetricsError> {
    Ok(())
}

#[cfg(feature = "prometheus")]
fn seconds_from_ms(ms_buckets: &[f64]) -> Vec<f64> {
    ms_buckets.iter().map(|ms| ms / 1000.0).collect()
}

/// Render everything recorded so far in the Prometheus text format.
///
/// `None` until [`init_metrics`] has installed the recorder.
pub fn render_metrics() -> Option<String> {
    #[cfg(feature = "prometheus")]
    {
        PROMETHEUS_HANDLE.get().map(PrometheusHandle::render)
    }
    #[cfg(not(feature = "prometheus"))]
    {
        None
    }
}

/// Record an embedding request.
pub fn record_embedding_generation(
    provider: &str,
    model: &str,
    status: &str,
    duration_secs: f64,
    token_count: Option<u32>,
    batch_size: u32,
) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "embedding_requests_total",
            "provider" => provider.to_string(),
            "model" => model.to_string(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            "embedding_duration_seconds",
            "provider" => provider.to_string(),
            "model" => model.to_string()
        )
        .record(duration_secs);

        histogram!(
            "embedding_batch_size",
            "provider" => provider.to_string(),
            "model" => model.to_string()
        )
        .record(batch_size as f64);

        if let Some(tokens) = token_count {
            counter!(
                "embedding_tokens_total",
                "provider" => provider.to_string(),
                "model" => model.to_string()
            )
            .increment(tokens as u64);
        }
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (provider, model, status, duration_secs, token_count, batch_size);
    }
}

/// Record a vector store operation.
pub fn record_vector_store_operation(
    backend: &str,
    operation: &str,
    status: &str,
    duration_secs: f64,
    item_count: u32,
) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "vector_store_operations_total",
            "backend" => backend.to_string(),
            "operation" => operation.to_string(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            "vector_store_operation_duration_seconds",
            "backend" => backend.to_string(),
            "operation" => operation.to_string()
        )
        .record(duration_secs);

        histogram!(
            "vector_store_operation_items",
            "backend" => backend.to_string(),
            "operation" => operation.to_string()
        )
        .record(item_count as f64);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (backend, operation, status, duration_secs, item_count);
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
