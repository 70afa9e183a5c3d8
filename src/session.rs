//! Session and transactions (C4): prepares queries, runs one-shot
//! statements, and opens transactions (including nested savepoints) on top
//! of the engine's imperative-transaction primitive.

use std::cell::Cell;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use livedb_core::{LiveDbError, Result, Row};
use livedb_sqlite::{CrdtEngine, SQLiteTransactionType, TxToken};

use crate::prepared::{PreparedStatement, Query, ResultMapper, TableCollector, identity_mapper};

/// An engine transaction token paired with a release guard. Exactly one of
/// {commit, rollback} runs exactly once; a debug build asserts this on
/// drop rather than silently leaking an unreleased transaction (§3
/// "Transaction token" invariant).
pub struct TxHandle {
    token: TxToken,
    released: Cell<bool>,
}

impl TxHandle {
    fn new(token: TxToken) -> Self {
        Self {
            token,
            released: Cell::new(false),
        }
    }

    fn mark_released(&self) {
        self.released.set(true);
    }
}

impl Drop for TxHandle {
    fn drop(&mut self) {
        debug_assert!(
            self.released.get(),
            "TxHandle dropped without commit or rollback"
        );
    }
}

/// Per-connection execution context. Holds the engine handle, the
/// currently-bound transaction token (if any), and the table-dependency
/// collector slot a live-query refetch installs for the duration of its
/// first run (§4.6, §9: threaded explicitly rather than through a
/// process-global).
#[derive(Clone)]
pub struct Session {
    engine: Arc<dyn CrdtEngine>,
    tx: Option<TxToken>,
    collector: Arc<Mutex<Option<TableCollector>>>,
    savepoint_depth: Arc<AtomicU32>,
}

impl Session {
    pub(crate) fn new(engine: Arc<dyn CrdtEngine>) -> Self {
        Self {
            engine,
            tx: None,
            collector: Arc::new(Mutex::new(None)),
            savepoint_depth: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn engine(&self) -> &Arc<dyn CrdtEngine> {
        &self.engine
    }

    pub fn active_tx(&self) -> Option<TxToken> {
        self.tx
    }

    /// Installs `collector` as the active table-dependency sink and
    /// returns the previous value, so the live-query engine can restore it
    /// after its refetch completes (§4.6 "install"/"uninstall").
    pub(crate) fn install_collector(&self, collector: Option<TableCollector>) -> Option<TableCollector> {
        let mut guard = self.collector.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *guard, collector)
    }

    fn current_collector(&self) -> Option<TableCollector> {
        self.collector.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Prepares a long-lived statement, registered for finalization on
    /// drop. Picks up whatever table collector is currently installed.
    pub fn prepare_query<T>(
        &self,
        query: &dyn Query,
        mapper: ResultMapper<T>,
    ) -> Result<PreparedStatement<T>> {
        PreparedStatement::new(
            self.engine.clone(),
            query,
            self.tx,
            self.current_collector(),
            mapper,
            false,
        )
    }

    /// Prepares a single-use statement, finalized after its first
    /// execution.
    pub fn prepare_one_time_query<T>(
        &self,
        query: &dyn Query,
        mapper: ResultMapper<T>,
    ) -> Result<PreparedStatement<T>> {
        PreparedStatement::new(
            self.engine.clone(),
            query,
            self.tx,
            self.current_collector(),
            mapper,
            true,
        )
    }

    /// Prepares a raw-row query (no custom mapper) for one-shot use. Most
    /// callers that don't have their own typed row shape go through this.
    pub fn prepare_raw(&self, query: &dyn Query) -> Result<PreparedStatement<Row>> {
        self.prepare_one_time_query(query, identity_mapper())
    }

    /// Dispatches raw SQL to the active transaction if one is bound to
    /// this session, else directly to the engine.
    pub async fn exec(&self, raw_sql: &str) -> Result<()> {
        livedb_core::livedb_trace_query!(raw_sql, 0usize);
        self.engine.exec(raw_sql, self.tx).await
    }

    /// Acquires the engine's imperative-transaction primitive, constructs
    /// a child session bound to the new token, and invokes `f` with it.
    /// The top-level transaction commits on normal return and rolls back
    /// on error; the engine-side release runs on both paths.
    pub async fn transaction<F, R>(&self, behavior: SQLiteTransactionType, f: F) -> Result<R>
    where
        F: AsyncFnOnce(&Session) -> Result<R>,
    {
        if self.tx.is_some() {
            return self.savepoint(f).await;
        }

        let token = self.engine.begin_tx(behavior).await?;
        let handle = TxHandle::new(token);
        livedb_core::livedb_trace_tx!("begin", 0u32);

        let child = Session {
            engine: self.engine.clone(),
            tx: Some(token),
            collector: self.collector.clone(),
            savepoint_depth: self.savepoint_depth.clone(),
        };

        let result = f(&child).await;

        match result {
            Ok(value) => {
                self.engine.commit_tx(token).await?;
                handle.mark_released();
                livedb_core::livedb_trace_tx!("commit", 0u32);
                Ok(value)
            }
            Err(err) => {
                let rollback = self.engine.rollback_tx(token).await;
                handle.mark_released();
                livedb_core::livedb_trace_tx!("rollback", 0u32);
                rollback?;
                Err(err)
            }
        }
    }

    /// A nested `transaction` call issues a named `sp<depth>` SAVEPOINT
    /// rather than acquiring a second imperative-transaction token,
    /// matching §4.2's nested-transaction contract literally.
    async fn savepoint<F, R>(&self, f: F) -> Result<R>
    where
        F: AsyncFnOnce(&Session) -> Result<R>,
    {
        let Some(_tx) = self.tx else {
            return Err(LiveDbError::Usage(
                "savepoint requested without an active transaction".into(),
            ));
        };

        let depth = self.savepoint_depth.fetch_add(1, Ordering::SeqCst);
        let sp_name = format!("sp{depth}");

        self.exec(&format!("SAVEPOINT {sp_name}")).await?;
        livedb_core::livedb_trace_tx!("savepoint", depth);

        let result = f(self).await;

        self.savepoint_depth.store(depth, Ordering::SeqCst);

        match result {
            Ok(value) => {
                self.exec(&format!("RELEASE SAVEPOINT {sp_name}")).await?;
                Ok(value)
            }
            Err(err) => {
                self.exec(&format!("ROLLBACK TO SAVEPOINT {sp_name}")).await?;
                self.exec(&format!("RELEASE SAVEPOINT {sp_name}")).await?;
                Err(err)
            }
        }
    }
}

/// The table names captured by a single refetch, handed back to the
/// live-query engine once the collector is uninstalled.
pub(crate) fn drain_collector(collector: &TableCollector) -> BTreeSet<String> {
    std::mem::take(&mut *collector.lock().unwrap_or_else(|e| e.into_inner()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use livedb_core::Value;
    use livedb_sqlite::RusqliteEngine;

    struct RawQuery {
        sql: String,
    }

    impl Query for RawQuery {
        fn sql(&self) -> &str {
            &self.sql
        }
        fn params(&self) -> &[Value] {
            &[]
        }
    }

    fn q(sql: &str) -> RawQuery {
        RawQuery { sql: sql.to_string() }
    }

    #[tokio::test]
    async fn transaction_commits_on_success() {
        let engine = Arc::new(RusqliteEngine::open_in_memory().unwrap());
        let session = Session::new(engine);
        session
            .exec("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)")
            .await
            .unwrap();

        session
            .transaction(SQLiteTransactionType::Deferred, async |tx| {
                tx.prepare_raw(&q("INSERT INTO t (id, name) VALUES (1, 'a')"))
                    .unwrap()
                    .run(&[])
                    .await?;
                Ok(())
            })
            .await
            .unwrap();

        let rows = session
            .prepare_raw(&q("SELECT * FROM t"))
            .unwrap()
            .all(&[])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn transaction_rolls_back_on_error() {
        let engine = Arc::new(RusqliteEngine::open_in_memory().unwrap());
        let session = Session::new(engine);
        session
            .exec("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)")
            .await
            .unwrap();

        let result: Result<()> = session
            .transaction(SQLiteTransactionType::Deferred, async |tx| {
                tx.prepare_raw(&q("INSERT INTO t (id, name) VALUES (1, 'a')"))
                    .unwrap()
                    .run(&[])
                    .await?;
                Err(LiveDbError::Usage("boom".into()))
            })
            .await;
        assert!(result.is_err());

        let rows = session
            .prepare_raw(&q("SELECT * FROM t"))
            .unwrap()
            .all(&[])
            .await
            .unwrap();
        assert_eq!(rows.len(), 0);
    }

    #[tokio::test]
    async fn nested_transaction_uses_savepoint_and_isolates_failure() {
        let engine = Arc::new(RusqliteEngine::open_in_memory().unwrap());
        let session = Session::new(engine);
        session
            .exec("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)")
            .await
            .unwrap();

        session
            .transaction(SQLiteTransactionType::Deferred, async |tx| {
                tx.prepare_raw(&q("INSERT INTO t (id, name) VALUES (1, 'outer')"))
                    .unwrap()
                    .run(&[])
                    .await?;

                let inner: Result<()> = tx
                    .transaction(SQLiteTransactionType::Deferred, async |stx| {
                        stx.prepare_raw(&q("INSERT INTO t (id, name) VALUES (2, 'inner')"))
                            .unwrap()
                            .run(&[])
                            .await?;
                        Err(LiveDbError::Usage("inner failure".into()))
                    })
                    .await;
                assert!(inner.is_err());
                Ok(())
            })
            .await
            .unwrap();

        let rows = session
            .prepare_raw(&q("SELECT * FROM t"))
            .unwrap()
            .all(&[])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("name").unwrap().as_text(), Some("outer"));
    }
}
