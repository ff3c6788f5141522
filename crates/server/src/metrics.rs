//! Prometheus metrics for the logward server.
//!
//! Exposes counters for admission outcomes, summary completion and the
//! pending-upload index.
//!
//! # Security Note
//!
//! The `/metrics` endpoint is unauthenticated to allow Prometheus scraping.
//! Metrics carry no uploader or encounter identifiers, only aggregate counts.
//! The endpoint should still be network-restricted to authorized scrapers.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Admission metrics
pub static ADMISSIONS_ACCEPTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "logward_admissions_accepted_total",
        "Total number of uploads staged for processing",
    )
    .expect("metric creation failed")
});

pub static ADMISSIONS_DUPLICATE: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "logward_admissions_duplicate_total",
        "Total number of uploads rejected as duplicates of a recent upload",
    )
    .expect("metric creation failed")
});

pub static ADMISSIONS_SUPERSEDED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "logward_admissions_superseded_total",
        "Total number of stale pending uploads replaced by a new submission",
    )
    .expect("metric creation failed")
});

pub static ADMISSION_REJECTIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "logward_admission_rejections_total",
            "Total number of uploads rejected before staging, by error code",
        ),
        &["code"],
    )
    .expect("metric creation failed")
});

pub static DECOMPRESSED_BYTES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "logward_decompressed_bytes_total",
        "Total decompressed bytes of admitted payloads",
    )
    .expect("metric creation failed")
});

// Lifecycle metrics
pub static SUMMARIES_COMPLETED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "logward_summaries_completed_total",
            "Total number of summaries that reached a terminal state",
        ),
        &["status"],
    )
    .expect("metric creation failed")
});

pub static PROCESSING_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "logward_processing_duration_seconds",
            "Background summarization time per upload",
        )
        .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]),
    )
    .expect("metric creation failed")
});

// Pending index metrics
pub static PENDING_UPLOADS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "logward_pending_uploads",
        "Uploads currently tracked in the pending index",
    )
    .expect("metric creation failed")
});

pub static PENDING_EVICTIONS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "logward_pending_evictions_total",
        "Stale pending entries removed by the background sweep",
    )
    .expect("metric creation failed")
});

static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(ADMISSIONS_ACCEPTED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(ADMISSIONS_DUPLICATE.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(ADMISSIONS_SUPERSEDED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(ADMISSION_REJECTIONS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(DECOMPRESSED_BYTES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(SUMMARIES_COMPLETED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(PROCESSING_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(PENDING_UPLOADS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(PENDING_EVICTIONS.clone()))
            .expect("metric registration failed");
    });
}

/// Handler for GET /metrics.
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

/// Helper to record admission rejections by error code.
pub fn record_rejection(code: &str) {
    ADMISSION_REJECTIONS.with_label_values(&[code]).inc();
}
