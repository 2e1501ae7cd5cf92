//! Prometheus metrics for matching-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};

/// Counter for stage runs by stage and outcome.
pub static STAGE_RUNS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "matching_stage_runs_total",
        "Total number of pipeline stage runs",
        &["stage", "outcome"]
    )
    .expect("Failed to register STAGE_RUNS")
});

/// Histogram for stage duration.
pub static STAGE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "matching_stage_duration_seconds",
        "Pipeline stage duration in seconds",
        &["stage"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .expect("Failed to register STAGE_DURATION")
});

/// Histogram for store operation duration.
pub static STORE_OPERATION_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "matching_store_operation_duration_seconds",
        "Store operation duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("Failed to register STORE_OPERATION_DURATION")
});

/// Counter for partner assignments by source.
pub static PARTNER_MATCHES: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "matching_partner_matches_total",
        "Total number of partner assignments",
        &["source"]
    )
    .expect("Failed to register PARTNER_MATCHES")
});

/// Counter for transaction matches by kind.
pub static TRANSACTION_MATCHES: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "matching_transaction_matches_total",
        "Total number of transaction matches",
        &["match_type"]
    )
    .expect("Failed to register TRANSACTION_MATCHES")
});

/// Counter for collaborator calls.
pub static COLLABORATOR_CALLS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "matching_collaborator_calls_total",
        "Total number of collaborator calls",
        &["collaborator", "status"]
    )
    .expect("Failed to register COLLABORATOR_CALLS")
});

/// Counter for documents requeued by the recovery sweep.
pub static RECOVERY_RETRIES: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "matching_recovery_retries_total",
        "Total number of stale documents requeued by the recovery sweep",
        &["stage"]
    )
    .expect("Failed to register RECOVERY_RETRIES")
});

/// Counter for errors.
pub static ERRORS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "matching_errors_total",
        "Total number of errors",
        &["error_type"]
    )
    .expect("Failed to register ERRORS")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&STAGE_RUNS);
    Lazy::force(&STAGE_DURATION);
    Lazy::force(&STORE_OPERATION_DURATION);
    Lazy::force(&PARTNER_MATCHES);
    Lazy::force(&TRANSACTION_MATCHES);
    Lazy::force(&COLLABORATOR_CALLS);
    Lazy::force(&RECOVERY_RETRIES);
    Lazy::force(&ERRORS);
}

/// Get all metrics as Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

pub fn record_stage_run(stage: &str, outcome: &str) {
    STAGE_RUNS.with_label_values(&[stage, outcome]).inc();
}

pub fn record_stage_duration(stage: &str, duration_secs: f64) {
    STAGE_DURATION.with_label_values(&[stage]).observe(duration_secs);
}

pub fn record_store_operation(operation: &str, duration_secs: f64) {
    STORE_OPERATION_DURATION
        .with_label_values(&[operation])
        .observe(duration_secs);
}

pub fn record_partner_match(source: &str) {
    PARTNER_MATCHES.with_label_values(&[source]).inc();
}

/// `match_type` is one of `auto`, `suggestion`, `coverage_skipped`.
pub fn record_transaction_match(match_type: &str) {
    TRANSACTION_MATCHES.with_label_values(&[match_type]).inc();
}

pub fn record_collaborator_call(collaborator: &str, status: &str) {
    COLLABORATOR_CALLS
        .with_label_values(&[collaborator, status])
        .inc();
}

pub fn record_recovery_retry(stage: &str) {
    RECOVERY_RETRIES.with_label_values(&[stage]).inc();
}

/// Record an error.
pub fn record_error(error_type: &str) {
    ERRORS.with_label_values(&[error_type]).inc();
}
