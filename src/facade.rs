//! The database facade (C5): combines the session/query surface with the
//! reactive live-query engine, the snapshot/live sync surface, and an
//! escape hatch to the raw engine handle.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use livedb_core::Result;
use livedb_sqlite::CrdtEngine;

use crate::live_query::{ErasedLiveQuery, LiveQuery, StructuralEq};
use crate::router::{Registry, Router};
use crate::session::Session;

/// A single table's shape, as supplied by the application for the
/// query-builder's type inference. The crate does not ship a typed query
/// builder (§1 Non-goals / SPEC_FULL §1), so this is intentionally a thin
/// descriptor: enough to exist as a construction input, not enough to
/// drive codegen.
#[derive(Debug, Clone)]
pub struct TableDescriptor {
    pub name: String,
    pub columns: Vec<String>,
}

/// A mapping from logical table name to its descriptor, immutable after
/// database construction (§3 "Schema descriptor").
#[derive(Debug, Clone, Default)]
pub struct SchemaDescriptor {
    tables: BTreeMap<String, TableDescriptor>,
}

impl SchemaDescriptor {
    pub fn new(tables: impl IntoIterator<Item = TableDescriptor>) -> Self {
        Self {
            tables: tables.into_iter().map(|t| (t.name.clone(), t)).collect(),
        }
    }

    pub fn get(&self, table: &str) -> Option<&TableDescriptor> {
        self.tables.get(table)
    }

    pub fn table_names(&self) -> BTreeSet<String> {
        self.tables.keys().cloned().collect()
    }
}

/// A pluggable logging sink for `LoggerOption::Custom`. Most callers never
/// need this: the `tracing` feature already wires SQL/transaction events
/// through the `tracing` crate (§4.1, §4.2); this exists for hosts that
/// want to route those same events somewhere else instead.
pub trait Logger: Send + Sync {
    fn log(&self, message: &str);
}

/// The logger selector construction input accepts: `Default` enables the
/// crate's own `tracing`-backed logging (a no-op unless the `tracing`
/// feature is enabled), `None` disables the custom-logger callback
/// entirely, `Custom` installs a caller-supplied sink.
#[derive(Clone, Default)]
pub enum LoggerOption {
    #[default]
    Default,
    None,
    Custom(Arc<dyn Logger>),
}

impl LoggerOption {
    fn notify(&self, message: &str) {
        match self {
            LoggerOption::Custom(logger) => logger.log(message),
            LoggerOption::Default => livedb_core::livedb_trace_tx!("facade", 0u32),
            LoggerOption::None => {}
        }
    }
}

/// Construction input for [`create_live_db`] (§4.3).
#[derive(Clone, Default)]
pub struct DatabaseConfig {
    pub schema: Option<SchemaDescriptor>,
    pub logger: LoggerOption,
}

struct LiveDbInner {
    engine: Arc<dyn CrdtEngine>,
    session: Session,
    schema: Option<SchemaDescriptor>,
    logger: LoggerOption,
    registry: Registry,
    next_query_id: AtomicU64,
    router: Router,
}

/// The database facade: the public surface applications construct and
/// hold onto. Cloning is cheap (an `Arc` of shared state) and every clone
/// observes the same session, registry, and router.
#[derive(Clone)]
pub struct LiveDb {
    inner: Arc<LiveDbInner>,
}

/// Constructs a facade over `engine`. Because the engine is a Rust trait
/// (§4.3's "exposes prepare/imperativeTx/onUpdate/exec" check is enforced
/// at compile time by the `CrdtEngine` bound), the only runtime
/// construction failure this function can still raise is an absent
/// schema being mistaken for an error — which the spec explicitly
/// disallows (an absent schema is permitted, never an error), so
/// `create_live_db` is infallible in this Rust realization; it still
/// returns `Result` to match §6's signature and to leave room for a
/// future engine-handle validation that does need to fail at runtime.
pub fn create_live_db(engine: Arc<dyn CrdtEngine>, config: DatabaseConfig) -> Result<LiveDb> {
    let session = Session::new(engine.clone());
    let registry: Registry = Arc::new(Mutex::new(BTreeMap::new()));
    let router = Router::install(engine.clone(), registry.clone());

    config.logger.notify("livedb facade constructed");

    Ok(LiveDb {
        inner: Arc::new(LiveDbInner {
            engine,
            session,
            schema: config.schema,
            logger: config.logger,
            registry,
            next_query_id: AtomicU64::new(1),
            router,
        }),
    })
}

impl LiveDb {
    pub fn engine(&self) -> &Arc<dyn CrdtEngine> {
        &self.inner.engine
    }

    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    pub fn schema(&self) -> Option<&SchemaDescriptor> {
        self.inner.schema.as_ref()
    }

    pub(crate) fn logger(&self) -> &LoggerOption {
        &self.inner.logger
    }

    /// Registers a builder closure as a live query and triggers its
    /// initial refetch (§4.6 "Registration").
    pub fn live_query<T, F>(&self, builder: F) -> LiveQuery<T>
    where
        T: StructuralEq + Clone + Send + 'static,
        F: FnMut(LiveDb) -> BoxFuture<'static, Result<T>> + Send + 'static,
    {
        let id = self.inner.next_query_id.fetch_add(1, Ordering::SeqCst);
        LiveQuery::register(self.clone(), id, builder)
    }

    pub(crate) fn register_live_query(&self, handle: ErasedLiveQuery) {
        self.inner
            .registry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(handle.id(), handle);
    }

    pub(crate) fn unregister_live_query(&self, id: u64) {
        self.inner
            .registry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
    }
}
