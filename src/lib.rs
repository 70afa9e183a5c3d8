//! # livedb
//!
//! A reactive, local-first database adapter sitting between a typed query
//! layer and an embedded, CRDT-capable SQLite engine. Three subsystems live
//! here: a driver/session layer (prepared statements, transactions), a
//! reactive live-query engine that refetches and re-renders when the tables
//! it reads from change, and a changeset sync layer for snapshot and
//! continuous replication.
//!
//! The embedded engine itself is an external collaborator, represented by
//! the [`CrdtEngine`] trait from `livedb-sqlite` so this crate has something
//! concrete to compile and be tested against. Everything above that trait
//! is written only against `Arc<dyn CrdtEngine>`, so swapping in a
//! different engine never touches the reactive core.

pub mod facade;
pub mod live_query;
pub mod migrator;
pub mod prepared;
pub mod router;
pub mod session;
pub mod sync;
pub mod ui;

pub use livedb_core::{BigInt, ChangeTuple, ChangeType, LiveDbError, Result, Row, Value};
pub use livedb_sqlite::{
    ChangeNotification, CrdtEngine, EngineStatement, LiveSyncHandle, RusqliteEngine,
    SQLiteTransactionType, SyncOptions, TxToken, UnsubscribeHandle,
};

pub use facade::{
    DatabaseConfig, LiveDb, Logger, LoggerOption, SchemaDescriptor, TableDescriptor,
    create_live_db,
};
pub use live_query::{LiveQuery, ResultSnapshot, StructuralEq};
pub use migrator::{Migration, migrate};
pub use prepared::{ExecutionMode, PreparedStatement, Query};
pub use session::{Session, TxHandle};
pub use ui::{ExternalStore, OwnedLiveQuery, Unsubscribe, use_live_query};

/// A comprehensive prelude bringing the commonly used items into scope with
/// a single `use livedb::prelude::*;`.
pub mod prelude {
    pub use crate::facade::{
        DatabaseConfig, LiveDb, Logger, LoggerOption, SchemaDescriptor, TableDescriptor,
        create_live_db,
    };
    pub use crate::live_query::{LiveQuery, ResultSnapshot, StructuralEq};
    pub use crate::migrator::{Migration, migrate};
    pub use crate::prepared::{ExecutionMode, PreparedStatement, Query};
    pub use crate::session::{Session, TxHandle};
    pub use crate::ui::{ExternalStore, OwnedLiveQuery, Unsubscribe, use_live_query};
    pub use livedb_core::{BigInt, ChangeTuple, ChangeType, LiveDbError, Result, Row, Value};
    pub use livedb_sqlite::{
        ChangeNotification, CrdtEngine, EngineStatement, LiveSyncHandle, RusqliteEngine,
        SQLiteTransactionType, SyncOptions, TxToken, UnsubscribeHandle,
    };
}
