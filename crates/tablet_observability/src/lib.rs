//! Observability setup: structured logging and query-service metrics.
//!
//! Metrics go through the `metrics` facade; installing an exporter is left
//! to the embedding process.

use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber with structured logging.
///
/// Safe to call more than once; later calls leave the first subscriber in
/// place.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tablet=debug"));

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true);

    if tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .is_err()
    {
        tracing::debug!("tracing subscriber already installed");
    }
}

/// Record one query-service call. `query_type` is the RPC name in
/// snake_case ("execute", "execute_batch", "stream_execute", ...).
pub fn record_query_metrics(duration_us: u64, query_type: &str, success: bool) {
    metrics::counter!("tablet_queries_total", "type" => query_type.to_string(), "success" => success.to_string()).increment(1);
    metrics::histogram!("tablet_query_duration_us", "type" => query_type.to_string()).record(duration_us as f64);
}

/// `action` is one of "begin", "commit", "rollback", "reap".
pub fn record_txn_metrics(action: &str) {
    metrics::counter!("tablet_txn_total", "action" => action.to_string()).increment(1);
}

pub fn record_live_sessions(count: usize) {
    metrics::gauge!("tablet_live_sessions").set(count as f64);
}

pub fn record_stream_batch(rows: usize) {
    metrics::counter!("tablet_stream_batches_total").increment(1);
    metrics::counter!("tablet_stream_rows_total").increment(rows as u64);
}

pub fn record_split_query(splits: usize) {
    metrics::counter!("tablet_split_queries_total").increment(1);
    metrics::histogram!("tablet_split_count").record(splits as f64);
}
