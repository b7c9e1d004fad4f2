//! Prometheus-style metrics, exported over HTTP (spec §4.8 / §10.5).
//!
//! Mirrors `original_source/monitoring/metrics.py`'s series 1:1: counters
//! for processed messages, predictions, pager requests, and errors; a
//! histogram for message-processing and database-operation latency; a
//! gauge for per-component health.

use lazy_static::lazy_static;
use prometheus_exporter::prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge_vec, HistogramVec,
    IntCounterVec, IntGaugeVec,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("failed to start metrics exporter: {0}")]
    Exporter(#[from] prometheus_exporter::Error),
}

lazy_static! {
    pub static ref MESSAGES_PROCESSED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "messages_processed_total",
        "Count of upstream messages processed, by message type",
        &["message_type"]
    )
    .unwrap();

    pub static ref MESSAGE_PROCESSING_SECONDS: HistogramVec = register_histogram_vec!(
        "message_processing_seconds",
        "Time spent processing one upstream message, by message type",
        &["message_type"]
    )
    .unwrap();

    pub static ref PREDICTIONS_MADE_TOTAL: IntCounterVec = register_int_counter_vec!(
        "predictions_made_total",
        "Count of predictions made, by result",
        &["result"]
    )
    .unwrap();

    pub static ref DATABASE_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "database_operations_total",
        "Count of feature-store operations, by operation type and status",
        &["operation_type", "status"]
    )
    .unwrap();

    pub static ref DATABASE_OPERATION_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "database_operation_duration_seconds",
        "Feature-store operation latency, by operation type",
        &["operation_type"]
    )
    .unwrap();

    pub static ref PAGER_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "pager_requests_total",
        "Count of pager HTTP requests, by status",
        &["status"]
    )
    .unwrap();

    pub static ref APPLICATION_ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "application_errors_total",
        "Count of application errors, by error type and component",
        &["error_type", "component"]
    )
    .unwrap();

    pub static ref SOCKET_TIMEOUTS: IntCounterVec = register_int_counter_vec!(
        "socket_timeouts",
        "Count of upstream socket read timeouts",
        &["component"]
    )
    .unwrap();

    pub static ref SIGTERM_COUNTER: IntCounterVec = register_int_counter_vec!(
        "sigterm_counter",
        "Count of shutdown signals observed",
        &["component"]
    )
    .unwrap();

    pub static ref SYSTEM_HEALTH_STATUS: IntGaugeVec = register_int_gauge_vec!(
        "system_health_status",
        "1 if the component is healthy, 0 if degraded",
        &["component"]
    )
    .unwrap();
}

/// Start the metrics HTTP server on `0.0.0.0:{port}`.
pub fn init(port: u16) -> Result<(), MetricsError> {
    let addr = format!("0.0.0.0:{port}").parse().expect("valid socket address");
    prometheus_exporter::start(addr)?;
    Ok(())
}

/// Run `operation`, recording its outcome and latency under `operation_type`
/// (the decorator-style DB instrumentation from `monitoring/metrics.py`'s
/// `monitor_db_operation`, modeled here as a thunk wrapper).
pub fn monitor_db_operation<T, E>(
    operation_type: &str,
    operation: impl FnOnce() -> Result<T, E>,
) -> Result<T, E> {
    let timer = DATABASE_OPERATION_DURATION_SECONDS
        .with_label_values(&[operation_type])
        .start_timer();
    let result = operation();
    timer.observe_duration();
    let status = if result.is_ok() { "success" } else { "error" };
    DATABASE_OPERATIONS_TOTAL
        .with_label_values(&[operation_type, status])
        .inc();
    result
}
