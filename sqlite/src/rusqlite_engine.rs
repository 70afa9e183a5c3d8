//! A reference [`CrdtEngine`] implementation backed by `rusqlite`.
//!
//! This is explicitly a reference/test engine, not a production CRDT
//! store: conflict resolution on `apply_changes` is last-writer-wins via
//! SQLite's own `INSERT OR REPLACE`, and change history is recorded by
//! diffing a table's contents before and after a single-table statement
//! rather than by hooking into a real per-column version vector. Merge
//! correctness beyond last-writer-wins-per-row remains delegated to a
//! production engine, matching the system's own framing of the embedded
//! engine as an external collaborator.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use livedb_core::changeset::ChangeType;
use livedb_core::{ChangeTuple, LiveDbError, Result, Row, Value};
use rusqlite::Connection;
use rusqlite::types::{Value as SqlValue, ValueRef};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;

use crate::connection::SQLiteTransactionType;
use crate::engine::{
    ChangeNotification, CrdtEngine, EngineStatement, LiveSyncHandle, SyncOptions, TxToken,
    UnsubscribeHandle,
};

const CHANGELOG_TABLE: &str = "__livedb_changelog";

type Listener = Arc<dyn Fn(ChangeNotification) + Send + Sync>;

/// Rusqlite-backed reference engine. Holds a single connection behind a
/// mutex, matching the single-threaded-cooperative scheduling model the
/// adapter is built for: only one logical task touches the connection at
/// a time, the mutex exists to satisfy `Send + Sync` rather than to
/// arbitrate real contention.
pub struct RusqliteEngine {
    conn: Mutex<Connection>,
    site_id: i128,
    clock: AtomicI64,
    next_listener_id: AtomicU64,
    listeners: Mutex<Vec<(u64, Listener)>>,
    /// `Some(buffer)` while a top-level transaction is in flight: table
    /// notifications are buffered and only dispatched on commit, matching
    /// "in-transaction mutations do not trigger refetches until commit".
    tx_pending: Mutex<Option<Vec<ChangeNotification>>>,
    next_tx_id: AtomicU64,
}

impl RusqliteEngine {
    /// Opens an in-memory database. Most tests use this constructor.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(engine_err)?;
        Self::from_connection(conn)
    }

    /// Opens (creating if absent) the database file at `path`.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(engine_err)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {CHANGELOG_TABLE} (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                table_name TEXT NOT NULL,
                pk TEXT NOT NULL,
                col_version TEXT NOT NULL,
                db_version TEXT NOT NULL,
                site_id TEXT NOT NULL,
                cl INTEGER NOT NULL,
                value TEXT NOT NULL,
                UNIQUE(table_name, pk, col_version, db_version, site_id)
            )"
        ))
        .map_err(engine_err)?;

        Ok(Self {
            conn: Mutex::new(conn),
            site_id: uuid::Uuid::new_v4().as_u128() as i128,
            clock: AtomicI64::new(1),
            next_listener_id: AtomicU64::new(1),
            listeners: Mutex::new(Vec::new()),
            tx_pending: Mutex::new(None),
            next_tx_id: AtomicU64::new(1),
        })
    }

    fn dispatch(&self, notification: ChangeNotification) {
        let mut pending = self.tx_pending.lock().unwrap();
        if let Some(buffer) = pending.as_mut() {
            buffer.push(notification);
            return;
        }
        drop(pending);
        self.notify_now(notification);
    }

    fn notify_now(&self, notification: ChangeNotification) {
        let listeners = self.listeners.lock().unwrap();
        for (_, listener) in listeners.iter() {
            listener(notification.clone());
        }
    }

    fn pk_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
        let mut stmt = conn
            .prepare(&format!("PRAGMA table_info({table})"))
            .map_err(engine_err)?;
        let mut cols: Vec<(i64, String)> = stmt
            .query_map([], |row| {
                let pk: i64 = row.get(5)?;
                let name: String = row.get(1)?;
                Ok((pk, name))
            })
            .map_err(engine_err)?
            .collect::<rusqlite::Result<_>>()
            .map_err(engine_err)?;
        cols.retain(|(pk, _)| *pk > 0);
        cols.sort_by_key(|(pk, _)| *pk);
        Ok(cols.into_iter().map(|(_, name)| name).collect())
    }

    fn pk_value(row: &Row, pk_cols: &[String]) -> Value {
        match pk_cols {
            [] => Value::Null,
            [single] => row.get(single).cloned().unwrap_or(Value::Null),
            many => Value::Array(
                many.iter()
                    .map(|c| row.get(c).cloned().unwrap_or(Value::Null))
                    .collect(),
            ),
        }
    }

    /// Snapshots every row of `table`, keyed by `rowid`, so a single-table
    /// statement's effect can be recovered by diffing before/after.
    fn snapshot_table(conn: &Connection, table: &str) -> Result<BTreeMap<i64, Row>> {
        let mut stmt = conn
            .prepare(&format!("SELECT rowid, * FROM {table}"))
            .map_err(engine_err)?;
        let column_count = stmt.column_count();
        let names: Vec<String> = (0..column_count)
            .map(|i| stmt.column_name(i).unwrap_or_default().to_string())
            .collect();

        let rows = stmt
            .query_map([], |sql_row| {
                let rowid: i64 = sql_row.get(0)?;
                let mut row = Row::new();
                for (idx, name) in names.iter().enumerate().skip(1) {
                    row.insert(name.clone(), value_from_sql(sql_row.get_ref(idx)?));
                }
                Ok((rowid, row))
            })
            .map_err(engine_err)?;

        let mut snapshot = BTreeMap::new();
        for entry in rows {
            let (rowid, row) = entry.map_err(engine_err)?;
            snapshot.insert(rowid, row);
        }
        Ok(snapshot)
    }

    /// The single table a statement's changelog diff should be tracked
    /// against, if any. Multi-table statements (joins used in an UPDATE,
    /// for instance) fall outside this reference engine's changeset
    /// tracking — a real engine would track these at the storage layer
    /// rather than by diffing SQL text.
    fn trackable_table(sql: &str) -> Option<String> {
        let trimmed = sql.trim_start();
        let is_dml = trimmed.get(..6).is_some_and(|kw| {
            kw.eq_ignore_ascii_case("insert")
                || kw.eq_ignore_ascii_case("update")
                || kw.eq_ignore_ascii_case("delete")
        });
        if !is_dml {
            return None;
        }
        let tables = livedb_core::table_extractor::extract_tables(sql);
        if tables.len() == 1 && tables.iter().next() != Some(&CHANGELOG_TABLE.to_string()) {
            tables.into_iter().next()
        } else {
            None
        }
    }

    fn record_diff(
        &self,
        conn: &Connection,
        table: &str,
        before: BTreeMap<i64, Row>,
        after: BTreeMap<i64, Row>,
    ) -> Result<()> {
        let pk_cols = Self::pk_columns(conn, table)?;
        let db_version = self.clock.fetch_add(1, Ordering::SeqCst);
        let mut changed = false;

        for (rowid, after_row) in &after {
            let differs = before
                .get(rowid)
                .is_none_or(|before_row| !livedb_core::value::rows_eq(
                    std::slice::from_ref(before_row),
                    std::slice::from_ref(after_row),
                ));
            if differs {
                let col_version = self.clock.fetch_add(1, Ordering::SeqCst);
                self.append_changelog(
                    conn,
                    table,
                    Self::pk_value(after_row, &pk_cols),
                    col_version,
                    db_version,
                    self.site_id,
                    1,
                    Value::Object(after_row.clone()),
                )?;
                changed = true;
            }
        }
        for (rowid, before_row) in &before {
            if !after.contains_key(rowid) {
                let col_version = self.clock.fetch_add(1, Ordering::SeqCst);
                self.append_changelog(
                    conn,
                    table,
                    Self::pk_value(before_row, &pk_cols),
                    col_version,
                    db_version,
                    self.site_id,
                    1,
                    Value::Null,
                )?;
                changed = true;
            }
        }

        if changed {
            self.dispatch(ChangeNotification {
                change_type: ChangeType::Update,
                db_name: "main".to_string(),
                table_name: table.to_string(),
            });
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn append_changelog(
        &self,
        conn: &Connection,
        table: &str,
        pk: Value,
        col_version: i64,
        db_version: i64,
        site_id: i128,
        cl: i64,
        value: Value,
    ) -> Result<()> {
        let pk_json = serde_json::to_string(&pk).map_err(LiveDbError::from)?;
        let value_json = serde_json::to_string(&value).map_err(LiveDbError::from)?;
        conn.execute(
            &format!(
                "INSERT OR IGNORE INTO {CHANGELOG_TABLE}
                 (table_name, pk, col_version, db_version, site_id, cl, value)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
            ),
            rusqlite::params![
                table,
                pk_json,
                col_version.to_string(),
                db_version.to_string(),
                site_id.to_string(),
                cl,
                value_json
            ],
        )
        .map_err(engine_err)?;
        Ok(())
    }
}

fn engine_err(err: impl std::fmt::Display) -> LiveDbError {
    LiveDbError::Engine(err.to_string())
}

fn value_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(*b as i64),
        Value::Integer(i) => SqlValue::Integer(*i),
        Value::Real(f) => SqlValue::Real(*f),
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Blob(b) => SqlValue::Blob(b.clone()),
        Value::Array(_) | Value::Object(_) => {
            SqlValue::Text(serde_json::to_string(value).unwrap_or_default())
        }
    }
}

fn value_from_sql(value_ref: ValueRef<'_>) -> Value {
    match value_ref {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(f) => Value::Real(f),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Blob(b.to_vec()),
    }
}

fn row_from_rusqlite(row: &rusqlite::Row) -> rusqlite::Result<Row> {
    let mut out = Row::new();
    for idx in 0..row.as_ref().column_count() {
        let name = row.as_ref().column_name(idx)?.to_string();
        out.insert(name, value_from_sql(row.get_ref(idx)?));
    }
    Ok(out)
}

/// Like [`row_from_rusqlite`], but keeps columns in `SELECT`-list order
/// instead of folding them into the name-keyed (and therefore
/// alphabetically reordered) `Row` map.
fn row_values_from_rusqlite(row: &rusqlite::Row) -> rusqlite::Result<Vec<Value>> {
    let column_count = row.as_ref().column_count();
    let mut out = Vec::with_capacity(column_count);
    for idx in 0..column_count {
        out.push(value_from_sql(row.get_ref(idx)?));
    }
    Ok(out)
}

impl CrdtEngine for RusqliteEngine {
    fn prepare(&self, sql: &str) -> Result<EngineStatement> {
        let conn = self.conn.lock().unwrap();
        conn.prepare(sql).map_err(engine_err)?;
        Ok(EngineStatement {
            sql: sql.to_string(),
        })
    }

    fn run<'a>(
        &'a self,
        stmt: &'a EngineStatement,
        params: &'a [Value],
        _tx: Option<TxToken>,
    ) -> BoxFuture<'a, Result<u64>> {
        Box::pin(async move {
            let conn = self.conn.lock().unwrap();
            let sql_params: Vec<SqlValue> = params.iter().map(value_to_sql).collect();
            let tracked = Self::trackable_table(&stmt.sql);
            let before = tracked
                .as_ref()
                .map(|t| Self::snapshot_table(&conn, t))
                .transpose()?;

            let affected = conn
                .execute(&stmt.sql, rusqlite::params_from_iter(sql_params.iter()))
                .map_err(engine_err)?;

            if let (Some(table), Some(before)) = (tracked, before) {
                let after = Self::snapshot_table(&conn, &table)?;
                self.record_diff(&conn, &table, before, after)?;
            }

            Ok(affected as u64)
        })
    }

    fn all<'a>(
        &'a self,
        stmt: &'a EngineStatement,
        params: &'a [Value],
        _tx: Option<TxToken>,
    ) -> BoxFuture<'a, Result<Vec<Row>>> {
        Box::pin(async move {
            let conn = self.conn.lock().unwrap();
            let sql_params: Vec<SqlValue> = params.iter().map(value_to_sql).collect();
            let mut prepared = conn.prepare(&stmt.sql).map_err(engine_err)?;
            let rows = prepared
                .query_map(rusqlite::params_from_iter(sql_params.iter()), |row| {
                    row_from_rusqlite(row)
                })
                .map_err(engine_err)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(engine_err)?);
            }
            Ok(out)
        })
    }

    fn get<'a>(
        &'a self,
        stmt: &'a EngineStatement,
        params: &'a [Value],
        _tx: Option<TxToken>,
    ) -> BoxFuture<'a, Result<Option<Row>>> {
        Box::pin(async move {
            let conn = self.conn.lock().unwrap();
            let sql_params: Vec<SqlValue> = params.iter().map(value_to_sql).collect();
            let mut prepared = conn.prepare(&stmt.sql).map_err(engine_err)?;
            let mut rows = prepared
                .query(rusqlite::params_from_iter(sql_params.iter()))
                .map_err(engine_err)?;
            match rows.next().map_err(engine_err)? {
                Some(row) => Ok(Some(row_from_rusqlite(row).map_err(engine_err)?)),
                None => Ok(None),
            }
        })
    }

    fn all_raw<'a>(
        &'a self,
        stmt: &'a EngineStatement,
        params: &'a [Value],
        _tx: Option<TxToken>,
    ) -> BoxFuture<'a, Result<Vec<Vec<Value>>>> {
        Box::pin(async move {
            let conn = self.conn.lock().unwrap();
            let sql_params: Vec<SqlValue> = params.iter().map(value_to_sql).collect();
            let mut prepared = conn.prepare(&stmt.sql).map_err(engine_err)?;
            let rows = prepared
                .query_map(rusqlite::params_from_iter(sql_params.iter()), |row| {
                    row_values_from_rusqlite(row)
                })
                .map_err(engine_err)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(engine_err)?);
            }
            Ok(out)
        })
    }

    fn exec<'a>(&'a self, sql: &'a str, _tx: Option<TxToken>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let conn = self.conn.lock().unwrap();
            conn.execute_batch(sql).map_err(engine_err)
        })
    }

    fn on_update(self: Arc<Self>, callback: Listener) -> UnsubscribeHandle {
        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.lock().unwrap().push((id, callback));
        let engine = self.clone();
        UnsubscribeHandle(Box::new(move || {
            engine
                .listeners
                .lock()
                .unwrap()
                .retain(|(entry_id, _)| *entry_id != id);
        }))
    }

    fn begin_tx(&self, behavior: SQLiteTransactionType) -> BoxFuture<'_, Result<TxToken>> {
        Box::pin(async move {
            let conn = self.conn.lock().unwrap();
            let keyword = match behavior {
                SQLiteTransactionType::Deferred => "DEFERRED",
                SQLiteTransactionType::Immediate => "IMMEDIATE",
                SQLiteTransactionType::Exclusive => "EXCLUSIVE",
            };
            conn.execute_batch(&format!("BEGIN {keyword}"))
                .map_err(engine_err)?;
            *self.tx_pending.lock().unwrap() = Some(Vec::new());
            let id = self.next_tx_id.fetch_add(1, Ordering::SeqCst);
            Ok(TxToken { id })
        })
    }

    fn commit_tx(&self, _token: TxToken) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let conn = self.conn.lock().unwrap();
            conn.execute_batch("COMMIT").map_err(engine_err)?;
            let pending = self.tx_pending.lock().unwrap().take();
            drop(conn);
            for notification in pending.into_iter().flatten() {
                self.notify_now(notification);
            }
            Ok(())
        })
    }

    fn rollback_tx(&self, _token: TxToken) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let conn = self.conn.lock().unwrap();
            conn.execute_batch("ROLLBACK").map_err(engine_err)?;
            *self.tx_pending.lock().unwrap() = None;
            Ok(())
        })
    }

    fn pull_changes(&self, since_version: i128) -> BoxFuture<'_, Result<Vec<ChangeTuple>>> {
        Box::pin(async move {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT table_name, pk, col_version, db_version, site_id, cl, seq, value
                     FROM {CHANGELOG_TABLE}
                     WHERE CAST(db_version AS INTEGER) >= ?1 OR ?1 = 0
                     ORDER BY seq ASC"
                ))
                .map_err(engine_err)?;

            let rows = stmt
                .query_map(rusqlite::params![since_version.to_string()], |row| {
                    let table: String = row.get(0)?;
                    let pk_json: String = row.get(1)?;
                    let col_version: String = row.get(2)?;
                    let db_version: String = row.get(3)?;
                    let site_id: String = row.get(4)?;
                    let cl: i64 = row.get(5)?;
                    let seq: i64 = row.get(6)?;
                    let value_json: String = row.get(7)?;
                    Ok((table, pk_json, col_version, db_version, site_id, cl, seq, value_json))
                })
                .map_err(engine_err)?;

            let mut tuples = Vec::new();
            for row in rows {
                let (table, pk_json, col_version, db_version, site_id, cl, seq, value_json) =
                    row.map_err(engine_err)?;
                let pk: Value = serde_json::from_str(&pk_json).map_err(LiveDbError::from)?;
                let value: Value = serde_json::from_str(&value_json).map_err(LiveDbError::from)?;
                tuples.push(ChangeTuple {
                    table,
                    pk,
                    col_version: parse_bigint(&col_version)?,
                    db_version: parse_bigint(&db_version)?,
                    site_id: parse_bigint(&site_id)?,
                    cl,
                    seq,
                    value,
                });
            }
            Ok(tuples)
        })
    }

    fn apply_changes(&self, changes: Vec<ChangeTuple>) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let conn = self.conn.lock().unwrap();
            let mut touched_tables = std::collections::BTreeSet::new();

            for tuple in &changes {
                let pk_json = serde_json::to_string(&tuple.pk).map_err(LiveDbError::from)?;
                let value_json = serde_json::to_string(&tuple.value).map_err(LiveDbError::from)?;
                conn.execute(
                    &format!(
                        "INSERT OR IGNORE INTO {CHANGELOG_TABLE}
                         (table_name, pk, col_version, db_version, site_id, cl, value)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
                    ),
                    rusqlite::params![
                        tuple.table,
                        pk_json,
                        tuple.col_version.0.to_string(),
                        tuple.db_version.0.to_string(),
                        tuple.site_id.0.to_string(),
                        tuple.cl,
                        value_json
                    ],
                )
                .map_err(engine_err)?;

                match &tuple.value {
                    Value::Null => {
                        let pk_cols = Self::pk_columns(&conn, &tuple.table)?;
                        delete_by_pk(&conn, &tuple.table, &pk_cols, &tuple.pk)?;
                    }
                    Value::Object(row) => {
                        upsert_row(&conn, &tuple.table, row)?;
                    }
                    _ => {
                        return Err(LiveDbError::InvalidChangeset(
                            "change tuple value must be an object or null".to_string(),
                        ));
                    }
                }
                touched_tables.insert(tuple.table.clone());
            }

            drop(conn);
            for table in touched_tables {
                self.dispatch(ChangeNotification {
                    change_type: ChangeType::Update,
                    db_name: "main".to_string(),
                    table_name: table,
                });
            }
            Ok(())
        })
    }

    fn sync(self: Arc<Self>, options: SyncOptions) -> BoxFuture<'static, Result<LiveSyncHandle>> {
        Box::pin(async move { connect_live_sync(self, options).await })
    }
}

fn parse_bigint(s: &str) -> Result<livedb_core::changeset::BigInt> {
    s.parse::<i128>()
        .map(livedb_core::changeset::BigInt)
        .map_err(|e| LiveDbError::Engine(format!("corrupt changelog bigint: {e}")))
}

fn delete_by_pk(conn: &Connection, table: &str, pk_cols: &[String], pk: &Value) -> Result<()> {
    if pk_cols.is_empty() {
        return Ok(());
    }
    let values: Vec<Value> = match (pk_cols.len(), pk) {
        (1, v) => vec![v.clone()],
        (_, Value::Array(items)) => items.clone(),
        _ => vec![pk.clone()],
    };
    let where_clause = pk_cols
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{c} = ?{}", i + 1))
        .collect::<Vec<_>>()
        .join(" AND ");
    let sql_params: Vec<SqlValue> = values.iter().map(value_to_sql).collect();
    conn.execute(
        &format!("DELETE FROM {table} WHERE {where_clause}"),
        rusqlite::params_from_iter(sql_params.iter()),
    )
    .map_err(engine_err)?;
    Ok(())
}

fn upsert_row(conn: &Connection, table: &str, row: &Row) -> Result<()> {
    let columns: Vec<&String> = row.keys().collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
    let column_list = columns
        .iter()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "INSERT OR REPLACE INTO {table} ({column_list}) VALUES ({})",
        placeholders.join(", ")
    );
    let sql_params: Vec<SqlValue> = columns.iter().map(|c| value_to_sql(&row[*c])).collect();
    conn.execute(&sql, rusqlite::params_from_iter(sql_params.iter()))
        .map_err(engine_err)?;
    Ok(())
}

async fn connect_live_sync(
    engine: Arc<RusqliteEngine>,
    options: SyncOptions,
) -> Result<LiveSyncHandle> {
    let mut request = options
        .endpoint
        .clone()
        .into_client_request()
        .map_err(|e| LiveDbError::Engine(format!("invalid sync endpoint: {e}")))?;
    if let Some(token) = &options.auth_token {
        request.headers_mut().insert(
            "Authorization",
            HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| LiveDbError::Engine(format!("invalid auth token: {e}")))?,
        );
    }

    let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| LiveDbError::Engine(format!("live sync connect failed: {e}")))?;

    let (mut write, mut read) = ws_stream.split();

    let local_cursor = Arc::new(AtomicI64::new(0));
    let cursor_for_push = local_cursor.clone();
    let engine_for_recv = engine.clone();

    let recv_handle = tokio::spawn(async move {
        while let Some(Ok(message)) = read.next().await {
            if let Message::Text(text) = message {
                if let Ok(tuples) = livedb_core::changeset::from_wire(&text) {
                    let _ = engine_for_recv.apply_changes(tuples).await;
                }
            }
        }
    });

    let push_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_millis(500));
        loop {
            interval.tick().await;
            let since = cursor_for_push.load(Ordering::SeqCst) as i128;
            let Ok(tuples) = engine.pull_changes(since).await else {
                continue;
            };
            if tuples.is_empty() {
                continue;
            }
            if let Some(max_version) = tuples.iter().map(|t| t.db_version.0).max() {
                cursor_for_push.store(max_version as i64 + 1, Ordering::SeqCst);
            }
            let Ok(wire) = livedb_core::changeset::to_wire(&tuples) else {
                continue;
            };
            if write.send(Message::Text(wire.into())).await.is_err() {
                break;
            }
        }
    });

    Ok(LiveSyncHandle::new(move || {
        recv_handle.abort();
        push_handle.abort();
    }))
}
