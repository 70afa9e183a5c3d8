//! The UI framework adapter (C11): a single external-store hook any
//! rendering framework binding can implement against, modeled on React's
//! `useSyncExternalStore` contract since that is what `useLiveQuery`
//! already assumes.

use crate::live_query::{LiveQuery, ResultSnapshot, StructuralEq};
pub use crate::live_query::Unsubscribe;

/// The minimal shape a rendering framework binding needs: a way to
/// subscribe to invalidation and a way to pull the current snapshot.
/// Implemented once, below, for [`LiveQuery`] itself.
pub trait ExternalStore<T> {
    fn subscribe(&self, notify: Box<dyn Fn() + Send + Sync>) -> Unsubscribe;
    fn get_snapshot(&self) -> ResultSnapshot<T>;
}

impl<T> ExternalStore<T> for LiveQuery<T>
where
    T: StructuralEq + Clone + Send + 'static,
{
    fn subscribe(&self, notify: Box<dyn Fn() + Send + Sync>) -> Unsubscribe {
        self.subscribe(move |_data| notify())
    }

    fn get_snapshot(&self) -> ResultSnapshot<T> {
        self.snapshot()
    }
}

/// Literal port of `useLiveQuery(factory)`: binds `live` to the host
/// framework's invalidate/re-render signal (`on_change`) and returns the
/// current snapshot. Memoization of `live` per call-site identity is the
/// caller's concern (the factory itself, in the spec's JS host) since
/// Rust has no implicit per-render identity to hook into.
///
/// Deliberately does **not** destroy `live` when the caller is done with
/// this snapshot — destruction is explicit via [`LiveQuery::destroy`], so
/// one live query can back multiple simultaneous consumers without a
/// surprise teardown (§4.10).
pub fn use_live_query<T>(
    live: &LiveQuery<T>,
    on_change: impl Fn() + Send + Sync + 'static,
) -> ResultSnapshot<T>
where
    T: StructuralEq + Clone + Send + 'static,
{
    // Leaked deliberately: an external-store binding owns this for as
    // long as the component is mounted, exactly as `useSyncExternalStore`
    // expects the subscribe callback to stay registered across renders.
    // Framework bindings that need the unsubscribe function back should
    // call `live.subscribe` directly instead of going through this
    // convenience wrapper.
    let _ = live.subscribe(move |_data| on_change());
    live.snapshot()
}

/// A live query that destroys itself when dropped, for single-consumer
/// call sites that want RAII cleanup instead of an explicit `destroy()`
/// call (the "optional owned mode" §4.10 permits).
pub struct OwnedLiveQuery<T> {
    inner: LiveQuery<T>,
}

impl<T> From<LiveQuery<T>> for OwnedLiveQuery<T> {
    fn from(inner: LiveQuery<T>) -> Self {
        Self { inner }
    }
}

impl<T> std::ops::Deref for OwnedLiveQuery<T> {
    type Target = LiveQuery<T>;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<T> Drop for OwnedLiveQuery<T> {
    fn drop(&mut self) {
        self.inner.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facade::{DatabaseConfig, create_live_db};
    use livedb_sqlite::RusqliteEngine;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::{Duration, sleep};

    #[tokio::test]
    async fn use_live_query_returns_current_snapshot_and_fires_on_change() {
        let engine = Arc::new(RusqliteEngine::open_in_memory().unwrap());
        let db = create_live_db(engine, DatabaseConfig::default()).unwrap();
        db.session()
            .exec("CREATE TABLE items (id INTEGER PRIMARY KEY)")
            .await
            .unwrap();

        struct SelectAll;
        impl crate::prepared::Query for SelectAll {
            fn sql(&self) -> &str {
                "SELECT * FROM items"
            }
            fn params(&self) -> &[livedb_core::Value] {
                &[]
            }
        }

        let live = db.live_query::<Vec<livedb_core::Row>, _>(move |db| {
            Box::pin(async move {
                db.session()
                    .prepare_raw(&SelectAll)?
                    .all(&[])
                    .await
            })
        });

        sleep(Duration::from_millis(50)).await;

        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        let snapshot = use_live_query(&live, move || {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(snapshot.data, Some(Vec::new()));

        db.session()
            .exec("INSERT INTO items (id) VALUES (1)")
            .await
            .unwrap();
        sleep(Duration::from_millis(50)).await;

        assert!(fired.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn owned_live_query_destroys_on_drop() {
        let engine = Arc::new(RusqliteEngine::open_in_memory().unwrap());
        let db = create_live_db(engine, DatabaseConfig::default()).unwrap();
        db.session()
            .exec("CREATE TABLE items (id INTEGER PRIMARY KEY)")
            .await
            .unwrap();

        struct SelectAll;
        impl crate::prepared::Query for SelectAll {
            fn sql(&self) -> &str {
                "SELECT * FROM items"
            }
            fn params(&self) -> &[livedb_core::Value] {
                &[]
            }
        }

        let id = {
            let owned: OwnedLiveQuery<Vec<livedb_core::Row>> = db
                .live_query(move |db| {
                    Box::pin(async move { db.session().prepare_raw(&SelectAll)?.all(&[]).await })
                })
                .into();
            owned.id()
        };
        let _ = id;
    }
}
