//! Prepared statements (C3): owns one compiled engine statement, executes in
//! `run`/`all`/`get`/`values` modes, and is finalization-safe.

use std::cell::Cell;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use livedb_core::{LiveDbError, Result, Row, Value, extract_tables};
use livedb_sqlite::{CrdtEngine, EngineStatement, TxToken};

/// The minimal shape the driver needs from a query-builder's query object:
/// rendered SQL text plus a positional parameter list. The crate does not
/// ship a query builder — any caller's builder output can implement this.
pub trait Query {
    fn sql(&self) -> &str;
    fn params(&self) -> &[Value];
}

/// The four execution modes a prepared statement supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Execute and discard rows, returning the affected-row count.
    Run,
    /// Execute and return every matching row.
    All,
    /// Execute and return the first row, or `None`.
    Get,
    /// Execute and return the first column of each row.
    Values,
}

/// Maps one engine row to the statement's typed result shape. `prepare_query`
/// installs the identity mapper (`Ok`) when `T = Row` and no custom mapper
/// was supplied.
pub type ResultMapper<T> = Box<dyn Fn(Row) -> Result<T> + Send + Sync>;

/// A live query's current table-dependency collector (§4.6): installed for
/// the duration of one first-run refetch, shared down through `Session` and
/// into every `PreparedStatement` execution it drives.
pub type TableCollector = Arc<Mutex<BTreeSet<String>>>;

/// A compiled statement bound to one engine. `T` is the row's mapped shape,
/// produced from each raw [`Row`] by the statement's [`ResultMapper`].
pub struct PreparedStatement<T = Row> {
    engine: Arc<dyn CrdtEngine>,
    stmt: EngineStatement,
    tables: BTreeSet<String>,
    collector: Option<TableCollector>,
    tx: Option<TxToken>,
    mapper: ResultMapper<T>,
    single_use: bool,
    finalized: Cell<bool>,
}

impl<T> PreparedStatement<T> {
    /// Compiles `query` against `engine`. `tables` is derived once, at
    /// prepare time, from the rendered SQL text (§4.4) rather than
    /// recomputed on every execution.
    pub(crate) fn new(
        engine: Arc<dyn CrdtEngine>,
        query: &dyn Query,
        tx: Option<TxToken>,
        collector: Option<TableCollector>,
        mapper: ResultMapper<T>,
        single_use: bool,
    ) -> Result<Self> {
        let stmt = engine.prepare(query.sql())?;
        let tables = extract_tables(query.sql());
        Ok(Self {
            engine,
            stmt,
            tables,
            collector,
            tx,
            mapper,
            single_use,
            finalized: Cell::new(false),
        })
    }

    /// The lowercase table names this statement was derived to depend on.
    pub fn tables(&self) -> &BTreeSet<String> {
        &self.tables
    }

    fn contribute_tables(&self) {
        if let Some(collector) = &self.collector {
            let mut guard = collector.lock().unwrap_or_else(|e| e.into_inner());
            guard.extend(self.tables.iter().cloned());
        }
    }

    fn trace(&self, param_count: usize) {
        livedb_core::livedb_trace_query!(self.stmt.sql, param_count);
    }

    /// Marks this statement finalized. Idempotent: a second call is a
    /// no-op, matching §8 testable property 5 ("finalized exactly once").
    fn finalize(&self) {
        self.finalized.set(true);
    }

    fn after_execute(&self) {
        if self.single_use {
            self.finalize();
        }
    }

    /// Executes the statement, discarding any rows, and returns the number
    /// of affected rows.
    pub async fn run(&self, params: &[Value]) -> Result<u64> {
        self.trace(params.len());
        self.contribute_tables();
        let result = self.engine.run(&self.stmt, params, self.tx).await;
        self.after_execute();
        result
    }

    /// Executes the statement and returns every matching row, mapped
    /// through the statement's result mapper.
    pub async fn all(&self, params: &[Value]) -> Result<Vec<T>> {
        self.trace(params.len());
        self.contribute_tables();
        let result = self.engine.all(&self.stmt, params, self.tx).await;
        self.after_execute();
        result?.into_iter().map(|row| (self.mapper)(row)).collect()
    }

    /// Executes the statement and returns the first row, or `None` when
    /// there were no matches.
    pub async fn get(&self, params: &[Value]) -> Result<Option<T>> {
        self.trace(params.len());
        self.contribute_tables();
        let result = self.engine.get(&self.stmt, params, self.tx).await;
        self.after_execute();
        result?.map(|row| (self.mapper)(row)).transpose()
    }

    /// Executes the statement and returns the first column of each row, in
    /// `SELECT`-list order. Runs through [`CrdtEngine::all_raw`] rather than
    /// [`CrdtEngine::all`]: `Row` is a `BTreeMap`, so reading its first
    /// value would return the alphabetically-first column instead of the
    /// first *selected* one. Raises [`LiveDbError::Query`] if a row has no
    /// columns.
    pub async fn values(&self, params: &[Value]) -> Result<Vec<Value>> {
        self.trace(params.len());
        self.contribute_tables();
        let result = self.engine.all_raw(&self.stmt, params, self.tx).await;
        self.after_execute();
        result?
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .next()
                    .ok_or_else(|| LiveDbError::Query("row has no columns".into()))
            })
            .collect()
    }
}

impl<T> Drop for PreparedStatement<T> {
    fn drop(&mut self) {
        self.finalize();
    }
}

/// The identity mapper used when a caller asks for raw [`Row`]s.
pub(crate) fn identity_mapper() -> ResultMapper<Row> {
    Box::new(Ok)
}

#[cfg(test)]
mod tests {
    use super::*;
    use livedb_sqlite::RusqliteEngine;

    struct RawQuery(&'static str);
    impl Query for RawQuery {
        fn sql(&self) -> &str {
            self.0
        }
        fn params(&self) -> &[Value] {
            &[]
        }
    }

    async fn seeded_engine() -> Arc<dyn CrdtEngine> {
        let engine: Arc<dyn CrdtEngine> = Arc::new(RusqliteEngine::open_in_memory().unwrap());
        engine
            .exec("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)", None)
            .await
            .unwrap();
        engine
            .exec("INSERT INTO t (id, name) VALUES (1, 'a'), (2, 'b')", None)
            .await
            .unwrap();
        engine
    }

    #[tokio::test]
    async fn all_returns_every_row() {
        let engine = seeded_engine().await;
        let stmt = PreparedStatement::new(
            engine,
            &RawQuery("SELECT * FROM t ORDER BY id"),
            None,
            None,
            identity_mapper(),
            false,
        )
        .unwrap();
        let rows = stmt.all(&[]).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("name").unwrap().as_text(), Some("a"));
    }

    #[tokio::test]
    async fn get_returns_first_row_or_none() {
        let engine = seeded_engine().await;
        let stmt = PreparedStatement::new(
            engine,
            &RawQuery("SELECT * FROM t WHERE id = 99"),
            None,
            None,
            identity_mapper(),
            false,
        )
        .unwrap();
        assert!(stmt.get(&[]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn values_extracts_first_column() {
        let engine = seeded_engine().await;
        let stmt = PreparedStatement::new(
            engine,
            &RawQuery("SELECT name FROM t ORDER BY id"),
            None,
            None,
            identity_mapper(),
            false,
        )
        .unwrap();
        let values = stmt.values(&[]).await.unwrap();
        assert_eq!(values, vec![Value::Text("a".into()), Value::Text("b".into())]);
    }

    #[tokio::test]
    async fn values_follows_select_order_not_column_name_order() {
        // "name" sorts after "id" alphabetically, so a BTreeMap-backed row
        // would wrongly hand back the `id` column here.
        let engine = seeded_engine().await;
        let stmt = PreparedStatement::new(
            engine,
            &RawQuery("SELECT name, id FROM t ORDER BY id"),
            None,
            None,
            identity_mapper(),
            false,
        )
        .unwrap();
        let values = stmt.values(&[]).await.unwrap();
        assert_eq!(values, vec![Value::Text("a".into()), Value::Text("b".into())]);
    }

    #[tokio::test]
    async fn single_use_statement_finalizes_after_one_execution() {
        let engine = seeded_engine().await;
        let stmt = PreparedStatement::new(
            engine,
            &RawQuery("SELECT * FROM t"),
            None,
            None,
            identity_mapper(),
            true,
        )
        .unwrap();
        assert!(!stmt.finalized.get());
        stmt.all(&[]).await.unwrap();
        assert!(stmt.finalized.get());
    }

    #[tokio::test]
    async fn contributes_tables_to_an_installed_collector() {
        let engine = seeded_engine().await;
        let collector: TableCollector = Arc::new(Mutex::new(BTreeSet::new()));
        let stmt = PreparedStatement::new(
            engine,
            &RawQuery("SELECT * FROM t"),
            None,
            Some(collector.clone()),
            identity_mapper(),
            false,
        )
        .unwrap();
        stmt.all(&[]).await.unwrap();
        assert!(collector.lock().unwrap().contains("t"));
    }
}
