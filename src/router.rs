//! The change router (C7): subscribes to the engine's table-change
//! callback and dispatches to affected live queries.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use livedb_sqlite::{ChangeNotification, CrdtEngine, UnsubscribeHandle};

use crate::live_query::ErasedLiveQuery;

/// The live-query registry: every currently-registered query, keyed by
/// id. Shared between the facade (which inserts/removes entries) and the
/// router (which only reads it).
pub(crate) type Registry = Arc<Mutex<BTreeMap<u64, ErasedLiveQuery>>>;

/// Owns the engine's `on_update` subscription for the lifetime of the
/// facade. On every callback: normalize the table name to lowercase, then
/// enqueue a refetch for every registered live query whose dependency set
/// intersects it (§4.7).
pub(crate) struct Router {
    unsubscribe: Option<UnsubscribeHandle>,
}

impl Router {
    pub(crate) fn install(engine: Arc<dyn CrdtEngine>, registry: Registry) -> Self {
        let callback: Arc<dyn Fn(ChangeNotification) + Send + Sync> =
            Arc::new(move |notification: ChangeNotification| {
                let table = notification.table_name.to_ascii_lowercase();
                let hits: Vec<ErasedLiveQuery> = {
                    let guard = registry.lock().unwrap_or_else(|e| e.into_inner());
                    guard
                        .values()
                        .filter(|q| !q.is_destroyed() && q.tables().contains(&table))
                        .cloned()
                        .collect()
                };
                for handle in hits {
                    tokio::spawn(handle.trigger_refetch());
                }
            });

        let unsubscribe = engine.on_update(callback);
        Self {
            unsubscribe: Some(unsubscribe),
        }
    }
}

impl Drop for Router {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe.unsubscribe();
        }
    }
}
