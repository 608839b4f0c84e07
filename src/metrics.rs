// Metrics and observability module
// This file handles collection and reporting of performance metrics
// for upstream calls, provider attempts, health transitions and outcomes
//
// Numan Thabit 2025 Nov

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};

pub static REQ_LATENCY: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "exec_request_latency_seconds",
        "latency for upstream calls",
        &["service", "method"]
    )
    .unwrap()
});

pub static REQ_ERRORS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "exec_request_errors_total",
        "errors by upstream",
        &["service", "method"]
    )
    .unwrap()
});

pub static ATTEMPTS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "exec_attempts_total",
        "terminal provider attempts by status",
        &["provider", "status"]
    )
    .unwrap()
});

pub static ATTEMPT_LATENCY: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "exec_attempt_latency_seconds",
        "submit-to-terminal latency per provider",
        &["provider"],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 3.0, 5.0, 10.0]
    )
    .unwrap()
});

pub static OUTCOMES: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "exec_pipeline_outcomes_total",
        "terminal signal outcomes",
        &["pair", "outcome"]
    )
    .unwrap()
});

pub static HEALTH_TRANSITIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "exec_provider_health_transitions_total",
        "provider health state changes",
        &["provider", "state"]
    )
    .unwrap()
});

/// Render the default registry in the prometheus text format.
pub fn render() -> String {
    let families = prometheus::gather();
    let mut buf = Vec::new();
    if TextEncoder::new().encode(&families, &mut buf).is_err() {
        return String::new();
    }
    String::from_utf8(buf).unwrap_or_default()
}
