//! The `CrdtEngine` trait: the concrete Rust shape of the "external
//! collaborator" the adapter is built against — a library that accepts
//! SQL, exposes prepared statements, offers a table-update callback, and
//! provides `pull_changes`/`apply_changes`/`sync`.
//!
//! Everything above this trait (`livedb::session`, `livedb::live_query`,
//! `livedb::router`, …) is written only against `Arc<dyn CrdtEngine>`, so
//! swapping in a different embedded engine never touches the reactive
//! core.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use livedb_core::changeset::ChangeType;
use livedb_core::{ChangeTuple, Result, Row, Value};

use crate::connection::SQLiteTransactionType;

/// A prepared statement handle as seen by the engine boundary. The
/// reference engine doesn't hold onto a driver-level prepared statement
/// between calls (rusqlite's `Statement<'_>` borrows its `Connection`,
/// which doesn't compose well with an `Arc<dyn CrdtEngine>` trait object);
/// instead it re-prepares the rendered SQL on every execution, exactly the
/// way the teacher's own rusqlite builder does (`conn.prepare(&sql)` on
/// every `execute`/`all`/`get` call). `EngineStatement` still exists as a
/// distinct type so the trait's signature matches the "prepared statement"
/// concept the rest of the crate is built around.
#[derive(Debug, Clone)]
pub struct EngineStatement {
    pub sql: String,
}

/// An opaque capability identifying one in-flight imperative transaction.
/// The session is responsible for passing this back on every statement
/// executed within the transaction and for releasing it exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxToken {
    pub(crate) id: u64,
}

/// A table-change notification delivered by the engine's update hook.
#[derive(Debug, Clone)]
pub struct ChangeNotification {
    pub change_type: ChangeType,
    pub db_name: String,
    pub table_name: String,
}

/// A subscription handle returned by [`CrdtEngine::on_update`]. Dropping it
/// does *not* unsubscribe — callers must call [`Self::unsubscribe`]
/// explicitly, matching the router's ownership of its unsubscribe handle.
///
/// The boxed closure carries `+ Sync` as well as `+ Send`: this handle is
/// held by `Router`, which lives inside `LiveDbInner` behind the `LiveDb`
/// facade's `Arc`, and that `Arc` needs to be `Sync` for `LiveDb` to cross
/// the `tokio::spawn` boundary the live-query engine relies on.
pub struct UnsubscribeHandle(pub(crate) Box<dyn FnOnce() + Send + Sync>);

impl UnsubscribeHandle {
    pub fn unsubscribe(self) {
        (self.0)()
    }
}

impl std::fmt::Debug for UnsubscribeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("UnsubscribeHandle")
    }
}

/// Options accepted by the engine's continuous-sync primitive.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// A `ws://` or `wss://` endpoint.
    pub endpoint: String,
    pub db_name: String,
    pub auth_token: Option<String>,
}

/// A handle to a running live-sync connection. Dropping it leaves the
/// background task running; call [`Self::stop`] to tear it down.
///
/// Same `+ Sync` requirement as [`UnsubscribeHandle`] above: anything this
/// crate hands back to the facade must stay `Send + Sync` all the way up.
pub struct LiveSyncHandle {
    pub(crate) stop: Box<dyn FnOnce() + Send + Sync>,
}

impl LiveSyncHandle {
    pub fn new(stop: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            stop: Box::new(stop),
        }
    }

    pub fn stop(self) {
        (self.stop)()
    }
}

impl std::fmt::Debug for LiveSyncHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LiveSyncHandle")
    }
}

/// The external, out-of-scope embedded SQLite/CRDT engine, represented as
/// a trait so the rest of the adapter has something concrete to compile
/// and be tested against.
///
/// Suspension points named in the concurrency model (prepare, run/all/get,
/// exec, transaction acquire/release, sync IO) are realized as `async`
/// methods returning boxed futures, which keeps the trait object-safe for
/// `Arc<dyn CrdtEngine>` while still matching the model's "suspension only
/// at engine boundaries" rule: a synchronous engine like the shipped
/// `RusqliteEngine` simply returns an already-resolved future.
pub trait CrdtEngine: Send + Sync {
    /// Compiles `sql` into an engine-level statement handle. Synchronous:
    /// preparing a statement text is not itself an IO boundary for most
    /// embedded engines (SQLite compiles in-process).
    fn prepare(&self, sql: &str) -> Result<EngineStatement>;

    /// Executes `stmt`, discarding any rows, and returns the number of
    /// affected rows.
    fn run<'a>(
        &'a self,
        stmt: &'a EngineStatement,
        params: &'a [Value],
        tx: Option<TxToken>,
    ) -> BoxFuture<'a, Result<u64>>;

    /// Executes `stmt` and returns every matching row.
    fn all<'a>(
        &'a self,
        stmt: &'a EngineStatement,
        params: &'a [Value],
        tx: Option<TxToken>,
    ) -> BoxFuture<'a, Result<Vec<Row>>>;

    /// Executes `stmt` and returns the first row, or `None` if there were
    /// no matches.
    fn get<'a>(
        &'a self,
        stmt: &'a EngineStatement,
        params: &'a [Value],
        tx: Option<TxToken>,
    ) -> BoxFuture<'a, Result<Option<Row>>>;

    /// Executes `stmt` in raw array mode: each row comes back as a
    /// `Vec<Value>` ordered by column position in the `SELECT` list, rather
    /// than keyed by column name. [`PreparedStatement::values`] needs this
    /// rather than [`CrdtEngine::all`] because `Row` is a `BTreeMap` — it
    /// reorders columns alphabetically by name, which would silently
    /// return the wrong column as "the first one" for any multi-column,
    /// non-alphabetical `SELECT`.
    fn all_raw<'a>(
        &'a self,
        stmt: &'a EngineStatement,
        params: &'a [Value],
        tx: Option<TxToken>,
    ) -> BoxFuture<'a, Result<Vec<Vec<Value>>>>;

    /// Executes raw, unparameterized SQL (used by `Session::exec` and for
    /// the BEGIN/SAVEPOINT/COMMIT/ROLLBACK statements the session issues
    /// on top of the imperative-transaction primitive below).
    fn exec<'a>(&'a self, sql: &'a str, tx: Option<TxToken>) -> BoxFuture<'a, Result<()>>;

    /// Subscribes to the engine's table-update callback. The router holds
    /// the returned handle for the lifetime of the facade. Takes `self` as
    /// an `Arc` so the returned handle (and any background task a `sync`
    /// implementation spawns) can keep the engine alive without resorting
    /// to unsafe lifetime extension.
    fn on_update(
        self: Arc<Self>,
        callback: Arc<dyn Fn(ChangeNotification) + Send + Sync>,
    ) -> UnsubscribeHandle;

    /// Acquires the engine's imperative-transaction primitive, starting a
    /// top-level transaction with the given locking behavior.
    fn begin_tx(&self, behavior: SQLiteTransactionType) -> BoxFuture<'_, Result<TxToken>>;

    /// Commits a top-level transaction and releases its token.
    fn commit_tx(&self, token: TxToken) -> BoxFuture<'_, Result<()>>;

    /// Rolls back a top-level transaction and releases its token.
    fn rollback_tx(&self, token: TxToken) -> BoxFuture<'_, Result<()>>;

    /// Returns every change tuple recorded since `since_version`. Passing
    /// `0` returns the engine's full history.
    fn pull_changes(&self, since_version: i128) -> BoxFuture<'_, Result<Vec<ChangeTuple>>>;

    /// Applies a peer's change tuples. Engine-side errors propagate
    /// unchanged; successful application must fire the same table-change
    /// callbacks a local mutation would.
    fn apply_changes(&self, changes: Vec<ChangeTuple>) -> BoxFuture<'_, Result<()>>;

    /// Opens the engine's continuous-sync primitive. Connection
    /// management, retry and authentication are the engine's concern; the
    /// adapter only promises that applied remote changes surface through
    /// `on_update` like any other mutation. Takes `self` as an `Arc` since
    /// the background task that drives the connection outlives this call.
    fn sync(self: Arc<Self>, options: SyncOptions) -> BoxFuture<'static, Result<LiveSyncHandle>>;
}
