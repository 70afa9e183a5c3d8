//! S4/S5 - snapshot-sync round-trip convergence and invalid-changeset
//! rejection, plus confirmation that an applied changeset refetches any
//! live query scoped to the touched table.

use std::sync::Arc;
use std::time::Duration;

use livedb::prelude::*;
use livedb::{LiveDbError, Row, Value};
use tokio::time::sleep;

struct RawQuery(&'static str);

impl Query for RawQuery {
    fn sql(&self) -> &str {
        self.0
    }
    fn params(&self) -> &[Value] {
        &[]
    }
}

async fn new_db_with_users_table() -> LiveDb {
    let engine = Arc::new(RusqliteEngine::open_in_memory().unwrap());
    let db = create_live_db(engine, DatabaseConfig::default()).unwrap();
    db.session()
        .exec("CREATE TABLE users (id TEXT PRIMARY KEY, name TEXT)")
        .await
        .unwrap();
    db
}

#[tokio::test]
async fn s4_changeset_round_trip_converges_and_is_idempotent() {
    let db1 = new_db_with_users_table().await;
    db1.session()
        .exec("INSERT INTO users (id, name) VALUES ('1', 'Alice')")
        .await
        .unwrap();

    let changeset = db1.get_changeset().await.unwrap();
    assert!(changeset.starts_with('['));
    assert_ne!(changeset, "[]");

    let db2 = new_db_with_users_table().await;
    let live = db2.live_query(|db: LiveDb| -> futures_util::future::BoxFuture<'static, Result<Vec<Row>>> {
        Box::pin(async move {
            db.session()
                .prepare_raw(&RawQuery("SELECT * FROM users"))?
                .all(&[])
                .await
        })
    });
    sleep(Duration::from_millis(50)).await;
    assert_eq!(live.snapshot().data, Some(Vec::new()));

    db2.apply_changeset(&changeset).await.unwrap();
    sleep(Duration::from_millis(50)).await;

    let rows = live.snapshot().data.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("name").unwrap().as_text(), Some("Alice"));

    // Re-applying the same changeset does not duplicate rows.
    db2.apply_changeset(&changeset).await.unwrap();
    sleep(Duration::from_millis(50)).await;
    assert_eq!(live.snapshot().data.unwrap().len(), 1);
}

#[tokio::test]
async fn s5_invalid_changeset_rejected() {
    let db = new_db_with_users_table().await;

    let err = db.apply_changeset("this is not json").await.unwrap_err();
    assert!(matches!(err, LiveDbError::InvalidChangeset(_)));

    let err = db
        .apply_changeset(r#"[["t","pk",1,2,3]]"#)
        .await
        .unwrap_err();
    match err {
        LiveDbError::InvalidChangeset(msg) => assert!(msg.contains("Invalid changeset format.")),
        other => panic!("expected InvalidChangeset, got {other:?}"),
    }
}
