//! Prometheus metrics for bookkeeping-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};

use crate::error::LedgerError;

/// gRPC request counter by method and status.
pub static GRPC_REQUESTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "bookkeeping_grpc_requests_total",
        "Total number of gRPC requests",
        &["method", "status"]
    )
    .expect("Failed to register grpc_requests_total")
});

/// gRPC request duration histogram by method.
pub static GRPC_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "bookkeeping_grpc_request_duration_seconds",
        "gRPC request duration in seconds",
        &["method"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .expect("Failed to register grpc_request_duration")
});

/// Posting outcomes by transaction type: created, duplicate or error.
pub static TRANSACTIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "bookkeeping_transactions_total",
        "Total number of transactions posted",
        &["transaction_type", "outcome"]
    )
    .expect("Failed to register transactions_total")
});

/// Ledger counter by type.
pub static LEDGERS_CREATED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "bookkeeping_ledgers_created_total",
        "Total number of ledgers created",
        &["ledger_type"]
    )
    .expect("Failed to register ledgers_created")
});

/// Account counter by ledger type.
pub static ACCOUNTS_CREATED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "bookkeeping_accounts_created_total",
        "Total number of accounts created",
        &["ledger_type"]
    )
    .expect("Failed to register accounts_created")
});

/// Batches streamed out of search jobs.
pub static SEARCH_BATCHES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "bookkeeping_search_batches_total",
        "Total number of search result batches streamed",
        &["namespace"]
    )
    .expect("Failed to register search_batches_total")
});

/// Error counter for alerting.
pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "bookkeeping_errors_total",
        "Total number of errors by kind",
        &["kind"]
    )
    .expect("Failed to register errors_total")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "bookkeeping_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&GRPC_REQUESTS_TOTAL);
    Lazy::force(&GRPC_REQUEST_DURATION);
    Lazy::force(&TRANSACTIONS_TOTAL);
    Lazy::force(&LEDGERS_CREATED);
    Lazy::force(&ACCOUNTS_CREATED);
    Lazy::force(&SEARCH_BATCHES_TOTAL);
    Lazy::force(&ERRORS_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);
}

/// Count an error under its kind.
pub fn record_error(err: &LedgerError) {
    ERRORS_TOTAL.with_label_values(&[err.kind().as_str()]).inc();
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_metrics_are_exported() {
        init_metrics();
        record_error(&LedgerError::new(ErrorKind::TransactionIsConflicting));
        let text = get_metrics();
        assert!(text.contains("bookkeeping_errors_total"));
    }
}
