//! Snapshot sync (C8) and the live-sync pass-through (C9).
//!
//! Snapshot sync serializes/deserializes the engine's CRDT changeset
//! format for explicit peer-to-peer exchange; live sync is a thin
//! pass-through to the engine's own continuous-sync primitive. Both
//! coexist: changes applied by either path flow through the same
//! `on_update` callback the change router already subscribes to, so
//! affected live queries refetch identically either way (§4.8).

use livedb_core::{ChangeTuple, Result, changeset};
use livedb_sqlite::{LiveSyncHandle, SyncOptions};

use crate::facade::LiveDb;

impl LiveDb {
    /// Opens the engine's continuous-sync connection. Connection
    /// management, retry, and authentication are the engine's
    /// responsibility; this is a pass-through (§4.8 "Live sync (C9)").
    pub async fn sync(&self, options: SyncOptions) -> Result<LiveSyncHandle> {
        self.engine().clone().sync(options).await
    }

    /// Returns every changeset tuple the engine has recorded, serialized
    /// to the wire format (§4.8 "Snapshot sync (C8)"). An empty history
    /// serializes to `"[]"`.
    pub async fn get_changeset(&self) -> Result<String> {
        let tuples = self.engine().pull_changes(0).await?;
        changeset::to_wire(&tuples)
    }

    /// Parses, validates, and applies a peer's changeset. Raises
    /// [`livedb_core::LiveDbError::InvalidChangeset`] if `raw` isn't a
    /// JSON array of 8-element tuples. Successful application causes the
    /// engine to fire `on_update` for every touched table, which the
    /// change router treats identically to a local mutation.
    pub async fn apply_changeset(&self, raw: &str) -> Result<()> {
        let tuples: Vec<ChangeTuple> = changeset::from_wire(raw)?;
        self.engine().apply_changes(tuples).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facade::{DatabaseConfig, create_live_db};
    use livedb_sqlite::RusqliteEngine;
    use std::sync::Arc;

    #[tokio::test]
    async fn round_trips_a_changeset_between_two_databases() {
        let engine1 = Arc::new(RusqliteEngine::open_in_memory().unwrap());
        let db1 = create_live_db(engine1, DatabaseConfig::default()).unwrap();
        db1.session()
            .exec("CREATE TABLE users (id TEXT PRIMARY KEY, name TEXT)")
            .await
            .unwrap();
        db1.session()
            .exec("INSERT INTO users (id, name) VALUES ('1', 'Alice')")
            .await
            .unwrap();

        let changeset = db1.get_changeset().await.unwrap();
        assert_ne!(changeset, "[]");

        let engine2 = Arc::new(RusqliteEngine::open_in_memory().unwrap());
        let db2 = create_live_db(engine2, DatabaseConfig::default()).unwrap();
        db2.session()
            .exec("CREATE TABLE users (id TEXT PRIMARY KEY, name TEXT)")
            .await
            .unwrap();
        db2.apply_changeset(&changeset).await.unwrap();

        // Applying twice must not duplicate rows (idempotent apply).
        db2.apply_changeset(&changeset).await.unwrap();

        let rows = db2
            .session()
            .prepare_raw(&RawQuery("SELECT * FROM users".to_string()))
            .unwrap()
            .all(&[])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0].get("name").unwrap().as_text(),
            Some("Alice")
        );
    }

    #[tokio::test]
    async fn rejects_malformed_changesets() {
        let engine = Arc::new(RusqliteEngine::open_in_memory().unwrap());
        let db = create_live_db(engine, DatabaseConfig::default()).unwrap();

        let err = db.apply_changeset("this is not json").await.unwrap_err();
        assert!(matches!(err, livedb_core::LiveDbError::InvalidChangeset(_)));

        let err = db
            .apply_changeset(r#"[["t","pk",1,2,3]]"#)
            .await
            .unwrap_err();
        match err {
            livedb_core::LiveDbError::InvalidChangeset(msg) => {
                assert!(msg.contains("Invalid changeset format."))
            }
            other => panic!("expected InvalidChangeset, got {other:?}"),
        }
    }

    struct RawQuery(String);
    impl crate::prepared::Query for RawQuery {
        fn sql(&self) -> &str {
            &self.0
        }
        fn params(&self) -> &[livedb_core::Value] {
            &[]
        }
    }
}
