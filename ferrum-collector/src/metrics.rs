// Ferrum Collector - Prometheus metrics definitions
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Prometheus self-metrics of the collector.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_int_counter, register_int_counter_vec,
    CounterVec, Encoder, Gauge, IntCounter, IntCounterVec, TextEncoder,
};

lazy_static! {
    // ============================================================
    // Collection
    // ============================================================

    /// Collection cycles by outcome ("ok" or an error kind).
    pub static ref COLLECTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "ferrum_collections_total",
        "Collection cycles by outcome",
        &["outcome"]
    ).unwrap();

    /// Failures that dropped the console connection.
    pub static ref CONNECTION_RESETS_TOTAL: IntCounter = register_int_counter!(
        "ferrum_connection_resets_total",
        "Collection failures that dropped the console connection"
    ).unwrap();

    /// Game tick of the last successful collection.
    pub static ref LAST_GAME_TICK: Gauge = register_gauge!(
        "ferrum_last_game_tick",
        "Game tick of the last successful collection"
    ).unwrap();

    /// Whether the game was paused at the last collection (1 = paused).
    pub static ref GAME_PAUSED: Gauge = register_gauge!(
        "ferrum_game_paused",
        "Whether the game was paused at the last collection"
    ).unwrap();

    // ============================================================
    // Storage and feed
    // ============================================================

    /// Buckets persisted, per series and resolution.
    pub static ref BUCKETS_PERSISTED_TOTAL: CounterVec = register_counter_vec!(
        "ferrum_buckets_persisted_total",
        "Finalized buckets persisted",
        &["series", "resolution"]
    ).unwrap();

    /// Buckets that could not be packed for the live feed.
    pub static ref FEED_REJECTED_TOTAL: IntCounter = register_int_counter!(
        "ferrum_feed_rejected_total",
        "Buckets dropped from the live feed because they could not be packed"
    ).unwrap();
}

/// Record a successful collection.
pub fn record_collection(game_tick: u64, paused: bool) {
    COLLECTIONS_TOTAL.with_label_values(&["ok"]).inc();
    LAST_GAME_TICK.set(game_tick as f64);
    GAME_PAUSED.set(if paused { 1.0 } else { 0.0 });
}

/// Record a failed collection.
pub fn record_failure(error: &ferrum::FerrumError) {
    COLLECTIONS_TOTAL.with_label_values(&[error.kind()]).inc();
    if error.invalidates_connection() {
        CONNECTION_RESETS_TOTAL.inc();
    }
}

/// Record a persisted bucket.
pub fn record_bucket(series: &str, resolution: &str) {
    BUCKETS_PERSISTED_TOTAL
        .with_label_values(&[series, resolution])
        .inc();
}

/// Encode all metrics to Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
