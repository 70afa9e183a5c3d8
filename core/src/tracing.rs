//! Tracing utilities for livedb observability.
//!
//! Enable the `tracing` feature to emit spans and events via the `tracing`
//! crate. These macros no-op when the feature is disabled, avoiding
//! `#[cfg]` boilerplate at every call site.

/// Emit a debug-level tracing event with the SQL text and parameter count.
///
/// ```ignore
/// livedb_trace_query!(&sql_str, params.len());
/// ```
#[macro_export]
macro_rules! livedb_trace_query {
    ($sql:expr, $param_count:expr) => {
        #[cfg(feature = "tracing")]
        tracing::debug!(sql = %$sql, params = $param_count, "livedb.query");
    };
}

/// Emit an info-level tracing event for transaction lifecycle (begin, commit, rollback).
///
/// ```ignore
/// livedb_trace_tx!("begin", depth);
/// livedb_trace_tx!("commit", depth);
/// ```
#[macro_export]
macro_rules! livedb_trace_tx {
    ($event:literal, $depth:expr) => {
        #[cfg(feature = "tracing")]
        tracing::info!(event = $event, depth = $depth, "livedb.transaction");
    };
}

/// Emit a debug-level tracing event when a live query reruns.
///
/// ```ignore
/// livedb_trace_requery!(query_id, tables.len());
/// ```
#[macro_export]
macro_rules! livedb_trace_requery {
    ($id:expr, $table_count:expr) => {
        #[cfg(feature = "tracing")]
        tracing::debug!(query_id = $id, tables = $table_count, "livedb.requery");
    };
}
