//! The reactive live-query engine (C6): registers queries, tracks their
//! table dependencies, and fans out notifications when a dependency
//! changes.

use std::cell::Cell;
use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use futures_util::future::BoxFuture;
use livedb_core::{LiveDbError, Result, Row};

use crate::facade::LiveDb;
use crate::prepared::TableCollector;
use crate::session::drain_collector;

thread_local! {
    /// Set for the duration of a live query's first-run refetch. The one
    /// genuinely global piece of state the explicit-collector redesign
    /// (§9) still needs: it catches a builder that calls back into
    /// `LiveDb::live_query` on the same call stack, which the per-`Session`
    /// collector stack alone would register against the wrong query.
    static IN_FIRST_RUN: Cell<bool> = const { Cell::new(false) };
}

/// `true` while a builder further up this thread's call stack is running
/// its live query's first-run refetch. [`LiveQuery::register`] consults
/// this to reject nested registration (§4.6, §9).
pub(crate) fn in_first_run() -> bool {
    IN_FIRST_RUN.with(|f| f.get())
}

struct FirstRunGuard {
    previous: bool,
}

impl FirstRunGuard {
    fn enter() -> Self {
        let previous = IN_FIRST_RUN.with(|f| f.replace(true));
        Self { previous }
    }
}

impl Drop for FirstRunGuard {
    fn drop(&mut self) {
        IN_FIRST_RUN.with(|f| f.set(self.previous));
    }
}

/// Structural (deep, JSON-shaped) equality over a live query's result
/// type, used to suppress a notification when a refetch produces the same
/// data as the previous snapshot (§4.5, §4.6 step 4).
pub trait StructuralEq {
    fn structural_eq(&self, other: &Self) -> bool;
}

impl StructuralEq for Row {
    fn structural_eq(&self, other: &Self) -> bool {
        livedb_core::value::rows_eq(std::slice::from_ref(self), std::slice::from_ref(other))
    }
}

impl StructuralEq for Vec<Row> {
    fn structural_eq(&self, other: &Self) -> bool {
        livedb_core::value::rows_eq(self, other)
    }
}

impl<T: StructuralEq> StructuralEq for Option<T> {
    fn structural_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (None, None) => true,
            (Some(a), Some(b)) => a.structural_eq(b),
            _ => false,
        }
    }
}

/// `{data, error, loading}` as described in §3 "Result snapshot": `loading`
/// is true from construction until the first terminal state; `data` is
/// preserved across a failed refetch; `error` is cleared on the next
/// successful one.
#[derive(Clone)]
pub struct ResultSnapshot<T> {
    pub data: Option<T>,
    pub error: Option<Arc<LiveDbError>>,
    pub loading: bool,
}

impl<T> Default for ResultSnapshot<T> {
    fn default() -> Self {
        Self {
            data: None,
            error: None,
            loading: true,
        }
    }
}

type Subscriber<T> = Box<dyn Fn(&T) + Send + Sync>;
type Builder<T> = Box<dyn FnMut(LiveDb) -> BoxFuture<'static, Result<T>> + Send>;

#[derive(Clone, Copy, PartialEq, Eq)]
enum RefetchState {
    Idle,
    Running,
    RunningWithPending,
}

/// Object-safe view of a live query the change router holds in its
/// registry, so it can intersect changed tables and trigger a refetch
/// without knowing the query's result type.
pub(crate) trait LiveQueryHandle: Send + Sync {
    fn id(&self) -> u64;
    fn tables(&self) -> BTreeSet<String>;
    fn is_destroyed(&self) -> bool;
    fn trigger_refetch(self: Arc<Self>) -> Pin<Box<dyn Future<Output = ()> + Send>>;
}

struct LiveQueryInner<T> {
    id: u64,
    db: LiveDb,
    builder: Mutex<Builder<T>>,
    snapshot: RwLock<ResultSnapshot<T>>,
    subscribers: Mutex<Vec<(u64, Subscriber<T>)>>,
    next_subscriber_id: AtomicU64,
    tables: Mutex<BTreeSet<String>>,
    initialized: AtomicBool,
    destroyed: AtomicBool,
    state: Mutex<RefetchState>,
}

impl<T> LiveQueryInner<T>
where
    T: StructuralEq + Clone + Send + 'static,
{
    fn notify(&self, data: &T) {
        let subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        for (_, cb) in subscribers.iter() {
            // A subscriber's panic must not prevent later subscribers from
            // being notified (§4.6 "Notification contract").
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| cb(data)));
            if result.is_err() {
                livedb_core::livedb_trace_requery!(self.id, 0usize);
            }
        }
    }

    async fn run_once(self: &Arc<Self>) {
        {
            let mut snapshot = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
            snapshot.loading = true;
        }

        let first_run = !self.initialized.load(Ordering::SeqCst);
        let collector: Option<TableCollector> = if first_run {
            Some(Arc::new(Mutex::new(BTreeSet::new())))
        } else {
            None
        };

        let previous = self.db.session().install_collector(collector.clone());
        let first_run_guard = first_run.then(FirstRunGuard::enter);

        let result = {
            let mut builder = self.builder.lock().unwrap_or_else(|e| e.into_inner());
            (builder)(self.db.clone()).await
        };

        drop(first_run_guard);
        self.db.session().install_collector(previous);

        if let Some(collector) = &collector {
            let captured = drain_collector(collector);
            *self.tables.lock().unwrap_or_else(|e| e.into_inner()) = captured;
            self.initialized.store(true, Ordering::SeqCst);
        }

        if self.destroyed.load(Ordering::SeqCst) {
            let mut snapshot = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
            snapshot.loading = false;
            return;
        }

        match result {
            Ok(data) => {
                let changed = {
                    let snapshot = self.snapshot.read().unwrap_or_else(|e| e.into_inner());
                    !matches!(&snapshot.data, Some(prev) if prev.structural_eq(&data))
                };

                {
                    let mut snapshot = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
                    snapshot.error = None;
                    snapshot.loading = false;
                    if changed {
                        snapshot.data = Some(data.clone());
                    }
                }

                if changed {
                    self.notify(&data);
                }
            }
            Err(err) => {
                let mut snapshot = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
                snapshot.error = Some(Arc::new(err));
                snapshot.loading = false;
            }
        }
    }
}

impl<T> LiveQueryHandle for LiveQueryInner<T>
where
    T: StructuralEq + Clone + Send + 'static,
{
    fn id(&self) -> u64 {
        self.id
    }

    fn tables(&self) -> BTreeSet<String> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    fn trigger_refetch(self: Arc<Self>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
            if self.destroyed.load(Ordering::SeqCst) {
                return;
            }
            refetch_coalesced(self).await;
        })
    }
}

/// Serializes refetches per live query: a request arriving while one is
/// already running coalesces into exactly one follow-up refetch, no matter
/// how many requests arrived during the run (§4.6 "Concurrency under rapid
/// change").
async fn refetch_coalesced<T>(inner: Arc<LiveQueryInner<T>>)
where
    T: StructuralEq + Clone + Send + 'static,
{
    {
        let mut state = inner.state.lock().unwrap_or_else(|e| e.into_inner());
        match *state {
            RefetchState::Idle => *state = RefetchState::Running,
            RefetchState::Running => {
                *state = RefetchState::RunningWithPending;
                return;
            }
            RefetchState::RunningWithPending => return,
        }
    }

    loop {
        inner.run_once().await;

        let mut state = inner.state.lock().unwrap_or_else(|e| e.into_inner());
        match *state {
            RefetchState::RunningWithPending => {
                *state = RefetchState::Running;
                drop(state);
                continue;
            }
            _ => {
                *state = RefetchState::Idle;
                break;
            }
        }
    }
}

/// A handle to one registered live query. Dropping it does not destroy
/// the registration — see [`LiveQuery::destroy`] and §4.10's non-surprise
/// requirement for multi-consumer code.
pub struct LiveQuery<T> {
    inner: Arc<LiveQueryInner<T>>,
}

impl<T> Clone for LiveQuery<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Opaque unsubscribe token; drop or call nothing further is needed since
/// it removes itself when invoked via the closure returned by
/// [`LiveQuery::subscribe`]. Kept as a function for parity with the
/// spec's `subscribe(cb) -> unsubscribe` contract.
pub type Unsubscribe = Box<dyn FnOnce() + Send>;

impl<T> LiveQuery<T>
where
    T: StructuralEq + Clone + Send + 'static,
{
    pub(crate) fn register<F>(db: LiveDb, id: u64, builder: F) -> Self
    where
        F: FnMut(LiveDb) -> BoxFuture<'static, Result<T>> + Send + 'static,
    {
        let inner = Arc::new(LiveQueryInner {
            id,
            db: db.clone(),
            builder: Mutex::new(Box::new(builder)),
            snapshot: RwLock::new(ResultSnapshot::default()),
            subscribers: Mutex::new(Vec::new()),
            next_subscriber_id: AtomicU64::new(1),
            tables: Mutex::new(BTreeSet::new()),
            initialized: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            state: Mutex::new(RefetchState::Idle),
        });

        db.register_live_query(inner.clone());

        if in_first_run() {
            // A builder further up this thread's call stack is mid first-run
            // refetch for another query; register this one, but reject it
            // rather than letting its refetch race that query's collector
            // (§4.6, §9 "nested live-query registration").
            livedb_core::livedb_trace_requery!(inner.id, 0usize);
            let mut snapshot = inner.snapshot.write().unwrap_or_else(|e| e.into_inner());
            snapshot.loading = false;
            snapshot.error = Some(Arc::new(LiveDbError::Usage(
                "nested live-query registration: a builder registered a live query from within another live query's first-run refetch".to_string(),
            )));
        } else {
            tokio::spawn({
                let inner = inner.clone();
                async move { refetch_coalesced(inner).await }
            });
        }

        Self { inner }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// The current `{data, error, loading}` snapshot.
    pub fn snapshot(&self) -> ResultSnapshot<T> {
        self.inner.snapshot.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Registers `cb`. If `data` is already populated, `cb` is invoked
    /// synchronously with the current value before this call returns.
    /// Returns an unsubscribe function.
    pub fn subscribe<F>(&self, cb: F) -> Unsubscribe
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.inner.next_subscriber_id.fetch_add(1, Ordering::SeqCst);
        let boxed: Subscriber<T> = Box::new(cb);

        if let Some(data) = &self.inner.snapshot.read().unwrap_or_else(|e| e.into_inner()).data {
            boxed(data);
        }

        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, boxed));

        let inner = self.inner.clone();
        Box::new(move || {
            inner
                .subscribers
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .retain(|(entry_id, _)| *entry_id != id);
        })
    }

    /// Schedules a re-execution of the builder, coalescing with any
    /// refetch already in flight.
    pub fn refetch(&self) {
        let inner = self.inner.clone();
        tokio::spawn(async move { refetch_coalesced(inner).await });
    }

    /// Removes this query from the registry. Future engine callbacks will
    /// not trigger further work for it; a refetch already in flight
    /// completes but its notification is suppressed.
    pub fn destroy(&self) {
        self.inner.destroyed.store(true, Ordering::SeqCst);
        self.inner.db.unregister_live_query(self.inner.id);
    }
}

pub(crate) type ErasedLiveQuery = Arc<dyn LiveQueryHandle>;

#[cfg(test)]
mod tests {
    use crate::facade::{DatabaseConfig, create_live_db};
    use crate::prepared::Query;
    use livedb_core::Value;
    use livedb_sqlite::RusqliteEngine;
    use std::sync::Arc;
    use tokio::time::{Duration, sleep};

    struct RawQuery(&'static str);
    impl Query for RawQuery {
        fn sql(&self) -> &str {
            self.0
        }
        fn params(&self) -> &[Value] {
            &[]
        }
    }

    #[tokio::test]
    async fn nested_registration_from_a_first_run_builder_is_rejected() {
        let engine = Arc::new(RusqliteEngine::open_in_memory().unwrap());
        let db = create_live_db(engine, DatabaseConfig::default()).unwrap();
        db.session()
            .exec("CREATE TABLE t (id INTEGER PRIMARY KEY)")
            .await
            .unwrap();

        let outer_db = db.clone();
        let outer = db.live_query::<Vec<livedb_core::Row>, _>(move |db| {
            let outer_db = outer_db.clone();
            Box::pin(async move {
                // Registering a second live query from inside this one's
                // first-run refetch must be rejected, not silently dropped.
                let _inner = outer_db.live_query::<Vec<livedb_core::Row>, _>(|db| {
                    Box::pin(async move {
                        db.session()
                            .prepare_raw(&RawQuery("SELECT * FROM t"))?
                            .all(&[])
                            .await
                    })
                });
                assert!(_inner.snapshot().error.is_some());

                db.session()
                    .prepare_raw(&RawQuery("SELECT * FROM t"))?
                    .all(&[])
                    .await
            })
        });

        sleep(Duration::from_millis(50)).await;
        assert_eq!(outer.snapshot().data, Some(Vec::new()));
    }
}
