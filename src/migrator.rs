//! The migrator (C10): applies ordered, pre-loaded SQL migrations
//! idempotently via a bookkeeping table, modeled on the teacher
//! workspace's `drizzle-migrations::migrator::Migrator` SQL generation
//! (`create_migrations_table_sql`/`record_migration_sql`/
//! `query_applied_sql`) but simplified to the single bookkeeping shape
//! §6 names.

use livedb_core::{LiveDbError, Result, Value};

use crate::facade::LiveDb;
use crate::prepared::Query;

const DEFAULT_MIGRATIONS_TABLE: &str = "__drizzle_migrations";

/// One migration to apply: a caller-supplied id, a content hash for
/// bookkeeping, the authoring-time ordering key (`folder_millis`, named
/// for parity with the upstream Drizzle Kit journal this migrator is
/// modeled on), and its pre-split SQL statements.
#[derive(Debug, Clone)]
pub struct Migration {
    pub id: String,
    pub hash: String,
    pub folder_millis: i64,
    pub statements: Vec<String>,
}

struct RawQuery(String, Vec<Value>);

impl Query for RawQuery {
    fn sql(&self) -> &str {
        &self.0
    }
    fn params(&self) -> &[Value] {
        &self.1
    }
}

fn create_migrations_table_sql(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            id TEXT PRIMARY KEY,
            hash TEXT NOT NULL,
            created_at INTEGER
        )"
    )
}

fn query_latest_sql(table: &str) -> String {
    format!("SELECT created_at FROM {table} ORDER BY created_at DESC LIMIT 1")
}

fn record_migration_sql(table: &str) -> String {
    format!("INSERT INTO {table} (id, hash, created_at) VALUES (?1, ?2, ?3)")
}

/// Applies `migrations`, ordered by `folder_millis` ascending, skipping
/// any whose `folder_millis` is not strictly greater than the bookkeeping
/// table's most recent `created_at`. A no-op when `migrations` is empty.
/// Idempotent: running twice with the same set applies nothing the second
/// time (§4.9, §8 testable property 4).
pub async fn migrate(
    db: &LiveDb,
    mut migrations: Vec<Migration>,
    migrations_table: Option<&str>,
) -> Result<()> {
    if migrations.is_empty() {
        return Ok(());
    }

    let table = migrations_table.unwrap_or(DEFAULT_MIGRATIONS_TABLE);
    let session = db.session();

    session.exec(&create_migrations_table_sql(table)).await?;

    let latest: Option<i64> = session
        .prepare_raw(&RawQuery(query_latest_sql(table), vec![]))?
        .get(&[])
        .await?
        .and_then(|row| row.get("created_at").and_then(|v| v.as_integer()));

    migrations.sort_by_key(|m| m.folder_millis);

    for migration in &migrations {
        let already_applied = latest.is_some_and(|applied| applied >= migration.folder_millis);
        if already_applied {
            continue;
        }

        for statement in &migration.statements {
            session.exec(statement).await.map_err(|e| {
                LiveDbError::Migration(format!(
                    "migration {} failed: {e}",
                    migration.id
                ))
            })?;
        }

        session
            .prepare_raw(&RawQuery(
                record_migration_sql(table),
                vec![
                    Value::Text(migration.id.clone()),
                    Value::Text(migration.hash.clone()),
                    Value::Integer(migration.folder_millis),
                ],
            ))?
            .run(&[
                Value::Text(migration.id.clone()),
                Value::Text(migration.hash.clone()),
                Value::Integer(migration.folder_millis),
            ])
            .await
            .map_err(|e| {
                LiveDbError::Migration(format!(
                    "failed to record migration {}: {e}",
                    migration.id
                ))
            })?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facade::{DatabaseConfig, create_live_db};
    use livedb_sqlite::RusqliteEngine;
    use std::sync::Arc;

    fn migration(id: &str, millis: i64, sql: &[&str]) -> Migration {
        Migration {
            id: id.to_string(),
            hash: format!("hash-{id}"),
            folder_millis: millis,
            statements: sql.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn applies_migrations_in_order_and_is_idempotent() {
        let engine = Arc::new(RusqliteEngine::open_in_memory().unwrap());
        let db = create_live_db(engine, DatabaseConfig::default()).unwrap();

        let migrations = vec![
            migration(
                "0000",
                1000,
                &["CREATE TABLE customers (id TEXT PRIMARY KEY, name TEXT)"],
            ),
            migration(
                "0001",
                2000,
                &["CREATE TABLE orders (id TEXT PRIMARY KEY, customer_id TEXT)"],
            ),
        ];

        migrate(&db, migrations.clone(), None).await.unwrap();

        db.session()
            .exec("ALTER TABLE orders ADD COLUMN quantity INTEGER")
            .await
            .unwrap();

        // Re-running with the same set applies nothing further.
        migrate(&db, migrations, None).await.unwrap();

        let count: i64 = db
            .session()
            .prepare_raw(&RawQuery(
                "SELECT COUNT(*) AS c FROM __drizzle_migrations".to_string(),
                vec![],
            ))
            .unwrap()
            .get(&[])
            .await
            .unwrap()
            .and_then(|row| row.get("c").and_then(|v| v.as_integer()))
            .unwrap();
        assert_eq!(count, 2);

        db.session()
            .exec("INSERT INTO orders (id, customer_id, quantity) VALUES ('o1', 'c1', 3)")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn empty_migration_set_is_a_no_op() {
        let engine = Arc::new(RusqliteEngine::open_in_memory().unwrap());
        let db = create_live_db(engine, DatabaseConfig::default()).unwrap();
        migrate(&db, Vec::new(), None).await.unwrap();
    }

    #[tokio::test]
    async fn custom_migrations_table_name_is_honored() {
        let engine = Arc::new(RusqliteEngine::open_in_memory().unwrap());
        let db = create_live_db(engine, DatabaseConfig::default()).unwrap();

        migrate(
            &db,
            vec![migration("0000", 1, &["CREATE TABLE t (id INTEGER)"])],
            Some("custom_migrations"),
        )
        .await
        .unwrap();

        let rows = db
            .session()
            .prepare_raw(&RawQuery(
                "SELECT * FROM custom_migrations".to_string(),
                vec![],
            ))
            .unwrap()
            .all(&[])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }
}
