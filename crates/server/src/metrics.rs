//! Prometheus metrics for the sieve server.
//!
//! Exposes counters for chunk intake, pipeline runs and downloads, plus
//! per-stage latency. No upload ids or file names appear in labels.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts,
    Registry, TextEncoder,
};
use sieve_pipeline::ProcessedUpload;
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Chunk metrics
pub static CHUNKS_RECEIVED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("sieve_chunks_received_total", "Total number of chunks stored")
        .expect("metric creation failed")
});

pub static CHUNK_BYTES_RECEIVED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "sieve_chunk_bytes_received_total",
        "Total bytes of chunk payload stored",
    )
    .expect("metric creation failed")
});

pub static CHUNK_SAVE_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "sieve_chunk_save_duration_seconds",
            "Time taken to receive and store a single chunk",
        )
        .buckets(vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
    )
    .expect("metric creation failed")
});

// Error metrics
pub static UPLOAD_ERRORS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("sieve_upload_errors_total", "Total upload errors by error type"),
        &["error_type"],
    )
    .expect("metric creation failed")
});

// Pipeline metrics
pub static PIPELINE_RUNS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("sieve_pipeline_runs_total", "Processing runs by outcome"),
        &["outcome"],
    )
    .expect("metric creation failed")
});

pub static PIPELINE_STAGE_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "sieve_pipeline_stage_duration_seconds",
            "Duration of successful pipeline stages",
        )
        .buckets(vec![0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 600.0]),
        &["stage"],
    )
    .expect("metric creation failed")
});

pub static ROWS_PARTITIONED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("sieve_rows_partitioned_total", "Data rows written by branch"),
        &["branch"],
    )
    .expect("metric creation failed")
});

pub static ARCHIVES_DOWNLOADED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "sieve_archives_downloaded_total",
        "Total number of archive downloads started",
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Idempotent, so tests can build several routers in one process.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(CHUNKS_RECEIVED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CHUNK_BYTES_RECEIVED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CHUNK_SAVE_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOAD_ERRORS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(PIPELINE_RUNS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(PIPELINE_STAGE_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(ROWS_PARTITIONED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(ARCHIVES_DOWNLOADED.clone()))
            .expect("metric registration failed");
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

/// Helper to record upload errors by type.
pub fn record_upload_error(error_type: &str) {
    UPLOAD_ERRORS.with_label_values(&[error_type]).inc();
}

/// Record a finished processing run.
pub fn record_pipeline_success(processed: &ProcessedUpload) {
    PIPELINE_RUNS.with_label_values(&["done"]).inc();
    let timings = &processed.timings;
    for (stage, elapsed) in [
        ("merging", timings.merge),
        ("partitioning", timings.partition),
        ("archiving", timings.archive),
    ] {
        PIPELINE_STAGE_DURATION
            .with_label_values(&[stage])
            .observe(elapsed.as_secs_f64());
    }
    ROWS_PARTITIONED
        .with_label_values(&["positive"])
        .inc_by(processed.positive_rows);
    ROWS_PARTITIONED
        .with_label_values(&["negative"])
        .inc_by(processed.negative_rows);
}

/// Record a failed processing run by error code.
pub fn record_pipeline_failure(code: &str) {
    PIPELINE_RUNS.with_label_values(&["failed"]).inc();
    UPLOAD_ERRORS.with_label_values(&[code]).inc();
}
