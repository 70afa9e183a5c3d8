//! Error types for livedb operations

use thiserror::Error;

/// Crate-wide error type.
///
/// This mirrors the boundary components described by the adapter: the
/// embedded CRDT/SQLite engine, the query layer, changeset decoding, the
/// migrator, and caller misuse of the reactive APIs.
#[derive(Debug, Error)]
pub enum LiveDbError {
    /// The embedded storage engine rejected an operation. Engine crates
    /// (e.g. the rusqlite-backed implementation) convert their own error
    /// types into this variant at the boundary so this crate never needs
    /// to depend on a concrete driver.
    #[error("engine error: {0}")]
    Engine(String),

    /// A query failed to execute or its results could not be mapped.
    #[error("query error: {0}")]
    Query(String),

    /// A changeset tuple did not have the expected shape or types.
    #[error("invalid changeset: {0}")]
    InvalidChangeset(String),

    /// A migration failed to apply or the bookkeeping table was in an
    /// unexpected state.
    #[error("migration error: {0}")]
    Migration(String),

    /// Caller misuse: nested live-query registration, use-after-destroy,
    /// committing a transaction that was already finished, and similar
    /// programmer errors rather than runtime conditions.
    #[error("usage error: {0}")]
    Usage(String),

    /// JSON (de)serialization of a row or changeset failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for livedb operations.
pub type Result<T> = core::result::Result<T, LiveDbError>;
