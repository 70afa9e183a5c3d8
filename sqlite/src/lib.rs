//! livedb-sqlite - the reference embedded engine backend for livedb.
//!
//! The rest of the adapter is written against the [`CrdtEngine`] trait,
//! treating the concrete storage engine as an external collaborator (per
//! the system's own framing: a library that accepts SQL, exposes prepared
//! statements, offers a table-update callback, and provides
//! `pullChanges`/`applyChanges`/`sync`). This crate supplies the one
//! concrete implementation the workspace ships with, backed by `rusqlite`
//! with a last-writer-wins changelog table standing in for a real CRDT
//! merge algorithm.

pub mod connection;
pub mod engine;
pub mod rusqlite_engine;

pub use connection::SQLiteTransactionType;
pub use engine::{
    ChangeNotification, CrdtEngine, EngineStatement, LiveSyncHandle, SyncOptions, TxToken,
    UnsubscribeHandle,
};
pub use rusqlite_engine::RusqliteEngine;
