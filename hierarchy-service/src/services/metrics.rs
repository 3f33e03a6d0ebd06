//! Prometheus metrics for hierarchy-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};

/// Mutations by kind, operation and outcome (`ok` or the error reason code).
pub static MUTATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "hierarchy_mutations_total",
        "Total number of hierarchy mutations",
        &["kind", "operation", "outcome"]
    )
    .expect("Failed to register mutations_total")
});

/// Descendants rewritten per move.
pub static CASCADE_SIZE: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "hierarchy_cascade_size",
        "Number of descendants rewritten by a move",
        &["kind"],
        vec![0.0, 1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0]
    )
    .expect("Failed to register cascade_size")
});

/// Retries after a lost concurrency race.
pub static RETRIES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "hierarchy_retries_total",
        "Total number of retries after concurrent modification",
        &["operation"]
    )
    .expect("Failed to register retries_total")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "hierarchy_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&MUTATIONS_TOTAL);
    Lazy::force(&CASCADE_SIZE);
    Lazy::force(&RETRIES_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
