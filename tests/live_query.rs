//! End-to-end scenarios S1-S3 from the spec's testable-properties section:
//! a live query observes local inserts, stays silent on unrelated
//! mutations, and sees exactly one notification for a whole transaction.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use livedb::prelude::*;
use livedb::{Row, Value};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

struct RawQuery(&'static str);

impl Query for RawQuery {
    fn sql(&self) -> &str {
        self.0
    }
    fn params(&self) -> &[Value] {
        &[]
    }
}

async fn setup() -> LiveDb {
    let engine = Arc::new(RusqliteEngine::open_in_memory().unwrap());
    let db = create_live_db(engine, DatabaseConfig::default()).unwrap();
    db.session()
        .exec("CREATE TABLE users (id TEXT PRIMARY KEY, name TEXT, email TEXT UNIQUE)")
        .await
        .unwrap();
    db.session()
        .exec("CREATE TABLE posts (id TEXT PRIMARY KEY, body TEXT)")
        .await
        .unwrap();
    db
}

fn select_users(db: LiveDb) -> futures_util::future::BoxFuture<'static, Result<Vec<Row>>> {
    Box::pin(async move { db.session().prepare_raw(&RawQuery("SELECT * FROM users"))?.all(&[]).await })
}

#[tokio::test]
async fn s1_insert_triggers_live_query() {
    let db = setup().await;
    let live = db.live_query(select_users);

    // Initial refetch settles with an empty result.
    sleep(Duration::from_millis(50)).await;
    assert_eq!(live.snapshot().data, Some(Vec::new()));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _unsub = live.subscribe(move |rows| {
        let _ = tx.send(rows.clone());
    });

    db.session()
        .exec("INSERT INTO users (id, name, email) VALUES ('1', 'Alice', 'a@a.com')")
        .await
        .unwrap();

    let rows = timeout(Duration::from_millis(100), rx.recv())
        .await
        .expect("notification within 100ms")
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("name").unwrap().as_text(), Some("Alice"));
}

#[tokio::test]
async fn s2_unrelated_mutation_is_silent() {
    let db = setup().await;
    let live = db.live_query(select_users);
    sleep(Duration::from_millis(50)).await;

    let notifications = Arc::new(AtomicUsize::new(0));
    let counter = notifications.clone();
    let _unsub = live.subscribe(move |_rows| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    // Subscribing to an already-populated query fires once, synchronously.
    assert_eq!(notifications.load(Ordering::SeqCst), 1);

    db.session()
        .exec("INSERT INTO posts (id, body) VALUES ('p1', 'hello')")
        .await
        .unwrap();
    sleep(Duration::from_millis(50)).await;

    assert_eq!(notifications.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn s3_transaction_is_atomic_from_the_live_querys_perspective() {
    let db = setup().await;
    db.session()
        .exec("INSERT INTO users (id, name, email) VALUES ('1', 'Alice', 'a1@a.com')")
        .await
        .unwrap();
    db.session()
        .exec("INSERT INTO users (id, name, email) VALUES ('2', 'Bob', 'b2@a.com')")
        .await
        .unwrap();

    let live = db.live_query(select_users);
    sleep(Duration::from_millis(50)).await;
    assert_eq!(live.snapshot().data.as_ref().unwrap().len(), 2);

    let notifications = Arc::new(AtomicUsize::new(0));
    let counter = notifications.clone();
    let _unsub = live.subscribe(move |_rows| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    // The subscribe-time replay counts as the first notification.
    assert_eq!(notifications.load(Ordering::SeqCst), 1);

    db.session()
        .transaction(SQLiteTransactionType::Deferred, async |tx| {
            tx.prepare_raw(&RawQuery("INSERT INTO users (id, name, email) VALUES ('3', 'Charlie', 'c3@a.com')"))?
                .run(&[])
                .await?;
            tx.prepare_raw(&RawQuery("DELETE FROM users WHERE id = '1'"))?
                .run(&[])
                .await?;
            Ok(())
        })
        .await
        .unwrap();

    sleep(Duration::from_millis(100)).await;

    let final_snapshot = live.snapshot();
    let ids: std::collections::BTreeSet<String> = final_snapshot
        .data
        .as_ref()
        .unwrap()
        .iter()
        .map(|row| row.get("id").unwrap().as_text().unwrap().to_string())
        .collect();
    assert_eq!(ids, std::collections::BTreeSet::from(["2".to_string(), "3".to_string()]));
    // Exactly one notification for the whole transaction (plus the
    // subscribe-time replay).
    assert_eq!(notifications.load(Ordering::SeqCst), 2);
}
