//! Prometheus metrics for the bridge
//!
//! Exposed on the API's /metrics endpoint.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram, CounterVec, Encoder, Gauge,
    Histogram, TextEncoder,
};

lazy_static! {
    pub static ref PASSES_TOTAL: CounterVec = register_counter_vec!(
        "bridge_reconcile_passes_total",
        "Reconciliation passes run",
        &["result"]
    ).unwrap();

    pub static ref PASS_DURATION: Histogram = register_histogram!(
        "bridge_reconcile_pass_seconds",
        "Wall time of one reconciliation pass",
        vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]
    ).unwrap();

    pub static ref PENDING_SWAPS: Gauge = register_gauge!(
        "bridge_pending_swaps",
        "Swaps in the Pending state at the start of the last pass"
    ).unwrap();

    pub static ref SWAP_OUTCOMES: CounterVec = register_counter_vec!(
        "bridge_swap_outcomes_total",
        "Terminal swap transitions",
        &["direction", "status", "reason"]
    ).unwrap();

    pub static ref SWAPS_CREATED: CounterVec = register_counter_vec!(
        "bridge_swaps_created_total",
        "Swaps created through the API",
        &["direction"]
    ).unwrap();

    pub static ref REFUNDS: CounterVec = register_counter_vec!(
        "bridge_refunds_total",
        "Refunds enqueued and attempted",
        &["result"]
    ).unwrap();

    pub static ref ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "bridge_errors_total",
        "Errors by component",
        &["component"]
    ).unwrap();

    pub static ref PRICE_ORACLE_RATE: Gauge = register_gauge!(
        "bridge_idna_bnb_rate",
        "Last fetched IDNA price in BNB"
    ).unwrap();

    pub static ref UP: Gauge = register_gauge!(
        "bridge_up",
        "Whether the bridge is up and running"
    ).unwrap();
}

pub fn record_outcome(direction: &str, status: &str, reason: &str) {
    SWAP_OUTCOMES
        .with_label_values(&[direction, status, reason])
        .inc();
}

pub fn record_refund(result: &str) {
    REFUNDS.with_label_values(&[result]).inc();
}

pub fn record_error(component: &str) {
    ERRORS_TOTAL.with_label_values(&[component]).inc();
}

/// Render the default registry in the text exposition format
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8(buffer).unwrap_or_default()
}
