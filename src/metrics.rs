//! Prometheus metrics for the rollup engine
//!
//! Counters for merges, alignment anomalies and store traffic, plus a store
//! latency histogram. Collectors register with the default registry on first
//! use. Recording can be switched off process-wide with [`set_enabled`],
//! which [`crate::ingestion::RollupWriter::from_config`] does when
//! `monitoring.metrics_enabled` is false.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::rollup::{AggregationRule, BucketSize};

lazy_static! {
    // === Aggregation ===

    /// Bucket merges by rule and outcome
    pub static ref MERGES_TOTAL: CounterVec = register_counter_vec!(
        "rollup_merges_total",
        "Bucket merges by aggregation rule and status",
        &["rule", "status"]
    ).expect("rollup_merges_total registers once");

    /// Buckets written per aggregation level
    pub static ref BUCKETS_WRITTEN_TOTAL: CounterVec = register_counter_vec!(
        "rollup_buckets_written_total",
        "Aggregated buckets written by level",
        &["level"]
    ).expect("rollup_buckets_written_total registers once");

    // === Alignment ===

    /// Store points that collided with another point in the same bucket
    pub static ref ALIGNMENT_COLLISIONS_TOTAL: CounterVec = register_counter_vec!(
        "rollup_alignment_collisions_total",
        "Store points overwritten during bucket alignment",
        &["level"]
    ).expect("rollup_alignment_collisions_total registers once");

    /// Store points outside the aligned interval
    pub static ref ALIGNMENT_DROPPED_TOTAL: CounterVec = register_counter_vec!(
        "rollup_alignment_dropped_total",
        "Store points dropped because they fell outside the aligned interval",
        &["level"]
    ).expect("rollup_alignment_dropped_total registers once");

    // === Store ===

    /// Store requests by operation and outcome
    pub static ref STORE_REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "rollup_store_requests_total",
        "Requests to the time-series store",
        &["operation", "status"]
    ).expect("rollup_store_requests_total registers once");

    /// Store request latency including retries
    pub static ref STORE_REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "rollup_store_request_duration_seconds",
        "Store request latency in seconds, retries included",
        &["operation"],
        vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
    ).expect("rollup_store_request_duration_seconds registers once");
}

static ENABLED: AtomicBool = AtomicBool::new(true);

/// Turn recording on or off for the whole process
pub fn set_enabled(enabled: bool) {
    ENABLED.store(enabled, Ordering::Relaxed);
}

/// Whether the `record_*` helpers update collectors
pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

fn status(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "error"
    }
}

/// Get metrics in Prometheus text format
pub fn gather_metrics() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("Failed to encode metrics: {}", e))?;

    String::from_utf8(buffer).map_err(|e| format!("Metrics contain invalid UTF-8: {}", e))
}

/// Record one bucket merge
#[inline]
pub fn record_merge(rule: AggregationRule, success: bool) {
    if !is_enabled() {
        return;
    }
    MERGES_TOTAL
        .with_label_values(&[rule.as_str(), status(success)])
        .inc();
}

/// Record buckets written for one level
#[inline]
pub fn record_buckets_written(level: BucketSize, count: usize) {
    if !is_enabled() {
        return;
    }
    BUCKETS_WRITTEN_TOTAL
        .with_label_values(&[level.as_str()])
        .inc_by(count as f64);
}

/// Record collisions and dropped points from one alignment pass
#[inline]
pub fn record_alignment_anomalies(level: BucketSize, collisions: usize, out_of_range: usize) {
    if !is_enabled() {
        return;
    }
    if collisions > 0 {
        ALIGNMENT_COLLISIONS_TOTAL
            .with_label_values(&[level.as_str()])
            .inc_by(collisions as f64);
    }
    if out_of_range > 0 {
        ALIGNMENT_DROPPED_TOTAL
            .with_label_values(&[level.as_str()])
            .inc_by(out_of_range as f64);
    }
}

/// Record a store request
#[inline]
pub fn record_store_request(operation: &str, success: bool, elapsed: Duration) {
    if !is_enabled() {
        return;
    }
    STORE_REQUESTS_TOTAL
        .with_label_values(&[operation, status(success)])
        .inc();

    STORE_REQUEST_DURATION
        .with_label_values(&[operation])
        .observe(elapsed.as_secs_f64());
}
