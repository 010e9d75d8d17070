//! Prometheus metrics for payroll-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};

/// Payroll operations by operation (process, revert, delete_run) and status.
pub static PAYROLL_OPERATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "payroll_operations_total",
        "Total number of payroll operations",
        &["operation", "status"]
    )
    .expect("Failed to register payroll_operations_total")
});

/// Employees handled by process runs.
pub static EMPLOYEES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "payroll_employees_total",
        "Total number of employees handled by payroll runs",
        &["outcome"]  // processed, skipped
    )
    .expect("Failed to register employees_total")
});

/// Advance ledger mutations by transaction type.
pub static ADVANCE_OPERATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "payroll_advance_operations_total",
        "Total number of advance ledger operations",
        &["operation"]
    )
    .expect("Failed to register advance_operations_total")
});

/// Warnings surfaced to callers, by kind.
pub static WARNINGS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "payroll_warnings_total",
        "Total number of payroll warnings by kind",
        &["kind"]
    )
    .expect("Failed to register warnings_total")
});

/// Store query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "payroll_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&PAYROLL_OPERATIONS_TOTAL);
    Lazy::force(&EMPLOYEES_TOTAL);
    Lazy::force(&ADVANCE_OPERATIONS_TOTAL);
    Lazy::force(&WARNINGS_TOTAL);
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
