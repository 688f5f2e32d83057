// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize telemetry (logs + metrics)
pub fn init_telemetry() {
    // 1. Logs
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "logpulse_node=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    // 2. Metrics (Prometheus)
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if PROM_HANDLE.set(handle).is_err() {
                tracing::warn!("Prometheus handle already set. Telemetry re-initialized?");
            }
        }
        Err(e) => {
            tracing::warn!("Failed to install Prometheus recorder: {}", e);
            return;
        }
    }

    metrics::describe_counter!("logpulse_records_submitted_total", "Records accepted into the ingest buffer");
    metrics::describe_counter!("logpulse_records_rejected_total", "Records refused by validation or backpressure");
    metrics::describe_counter!("logpulse_records_flushed_total", "Records persisted to chunks");
    metrics::describe_counter!("logpulse_records_dropped_total", "Records lost after exhausting flush retries");
    metrics::describe_counter!("logpulse_records_evicted_total", "Records evicted by the drop_oldest overflow policy");
    metrics::describe_histogram!("logpulse_flush_duration_seconds", "Time taken to persist one batch");
    metrics::describe_counter!("logpulse_flush_retries_total", "Failed flush attempts that were retried");
    metrics::describe_counter!("logpulse_chunks_deleted_total", "Chunks removed by retention");
    metrics::describe_gauge!("logpulse_buffer_depth", "Records currently buffered");

    metrics::gauge!("logpulse_node_up", 1.0);
}

/// Get the Prometheus handle to render metrics
pub fn get_metrics() -> String {
    if let Some(handle) = PROM_HANDLE.get() {
        handle.render()
    } else {
        "# metrics not initialized".to_string()
    }
}
