//! Batch window scheduling and result demultiplexing.
//!
//! A window moves through `Idle -> Armed -> Flushing -> Idle`:
//!
//! - The first waiter to find no pending batch creates one and spawns its
//!   window task (a single `yield_now` for a zero window, a sleep otherwise).
//! - When the window task fires it swaps the pending batch out under the lock.
//!   From that instant new waiters arm a fresh batch; they never wait on the
//!   fetch already in flight.
//! - The captured batch is handed to the batch function once, and every
//!   outcome is routed back to the waiters of the key at the same position.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, instrument, warn};

use coalesce_cache::CacheStore;
use coalesce_core::{cause, BatchFn, CoalesceError, Outcome, Result};

use crate::stats::StatsCounters;

/// Receives the outcome of one waiter.
pub(crate) type WaiterRx<V> = oneshot::Receiver<Result<V>>;

/// One distinct key of a pending batch and everyone waiting on it.
struct Slot<Q, V> {
    key: String,
    query: Q,
    original: Value,
    waiters: Vec<oneshot::Sender<Result<V>>>,
}

impl<Q, V: Clone> Slot<Q, V> {
    fn settle(self, result: Result<V>) {
        for waiter in self.waiters {
            // A dropped receiver means the caller stopped waiting.
            let _ = waiter.send(result.clone());
        }
    }

    fn fail(self, err: &CoalesceError) {
        let scoped = err.for_waiter(&self.key, &self.original);
        self.settle(Err(scoped));
    }
}

struct PendingBatch<Q, V> {
    id: u64,
    slots: Vec<Slot<Q, V>>,
    index: HashMap<String, usize>,
}

impl<Q, V> PendingBatch<Q, V> {
    fn new(id: u64) -> Self {
        Self {
            id,
            slots: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn push(&mut self, key: String, query: Q, original: Value, tx: oneshot::Sender<Result<V>>) {
        if let Some(&pos) = self.index.get(&key) {
            self.slots[pos].waiters.push(tx);
            return;
        }
        self.index.insert(key.clone(), self.slots.len());
        self.slots.push(Slot {
            key,
            query,
            original,
            waiters: vec![tx],
        });
    }
}

struct SchedulerState<Q, V> {
    /// The armed batch; `None` while idle or once a batch has been captured.
    current: Option<PendingBatch<Q, V>>,
    last_id: u64,
}

struct SchedulerInner<Q, V> {
    state: Mutex<SchedulerState<Q, V>>,
    batch_fn: Arc<dyn BatchFn<Q, V>>,
    store: CacheStore<V>,
    window: Duration,
    max_batch_size: Option<usize>,
    stats: Arc<StatsCounters>,
}

/// Coalesces waiters into batch function calls.
pub(crate) struct Scheduler<Q, V> {
    inner: Arc<SchedulerInner<Q, V>>,
}

impl<Q, V> Clone for Scheduler<Q, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<Q, V> Scheduler<Q, V>
where
    Q: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(
        batch_fn: Arc<dyn BatchFn<Q, V>>,
        store: CacheStore<V>,
        window: Duration,
        max_batch_size: Option<usize>,
        stats: Arc<StatsCounters>,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                state: Mutex::new(SchedulerState {
                    current: None,
                    last_id: 0,
                }),
                batch_fn,
                store,
                window,
                max_batch_size,
                stats,
            }),
        }
    }

    /// Adds a waiter to the armed batch, arming a new one if needed.
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn enqueue(&self, key: String, query: Q, original: Value) -> WaiterRx<V> {
        let (tx, rx) = oneshot::channel();

        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        let candidate = state.last_id + 1;
        let mut armed = false;
        let batch = state.current.get_or_insert_with(|| {
            armed = true;
            PendingBatch::new(candidate)
        });
        batch.push(key, query, original, tx);

        let full = self
            .inner
            .max_batch_size
            .is_some_and(|max| batch.slots.len() >= max);
        if armed {
            state.last_id = candidate;
        }
        let captured = if full { state.current.take() } else { None };
        drop(guard);

        if armed && captured.is_none() {
            self.arm(candidate);
        }
        if let Some(batch) = captured {
            debug!(batch_id = batch.id, "batch full, flushing early");
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move { inner.dispatch(batch).await });
        }
        rx
    }

    fn arm(&self, id: u64) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            if inner.window.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(inner.window).await;
            }
            if let Some(batch) = inner.capture(id) {
                inner.dispatch(batch).await;
            }
        });
    }
}

impl<Q, V> SchedulerInner<Q, V>
where
    Q: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Swaps the armed batch out if it is still batch `id`.
    fn capture(&self, id: u64) -> Option<PendingBatch<Q, V>> {
        let mut state = self.state.lock();
        // A different id means batch `id` was already flushed for being full.
        let armed = state.current.as_ref().is_some_and(|b| b.id == id);
        if armed {
            state.current.take()
        } else {
            None
        }
    }

    #[instrument(skip_all, fields(batch_id = batch.id, keys = batch.slots.len()))]
    async fn dispatch(&self, batch: PendingBatch<Q, V>) {
        let sent = batch.slots.len();
        let queries: Vec<Q> = batch.slots.iter().map(|s| s.query.clone()).collect();

        StatsCounters::incr(&self.stats.batches, 1);
        StatsCounters::incr(&self.stats.keys_fetched, sent as u64);
        debug!("dispatching batch");

        match self.batch_fn.load(queries).await {
            Err(err) => {
                warn!(error = %err, "batch function failed");
                StatsCounters::incr(&self.stats.fetch_failures, 1);
                let err = CoalesceError::batch_wide("batch function failed", Some(err));
                for slot in batch.slots {
                    slot.fail(&err);
                }
            }
            Ok(outcomes) if outcomes.len() != sent => {
                warn!(expected = sent, got = outcomes.len(), "malformed batch result");
                StatsCounters::incr(&self.stats.fetch_failures, 1);
                let err = CoalesceError::batch_wide(
                    format!(
                        "batch function must return one outcome per query: sent {sent}, got {}",
                        outcomes.len()
                    ),
                    None,
                );
                for slot in batch.slots {
                    slot.fail(&err);
                }
            }
            Ok(outcomes) => {
                for (slot, outcome) in batch.slots.into_iter().zip(outcomes) {
                    let result = self.resolve(&slot, outcome);
                    slot.settle(result);
                }
                debug!("batch settled");
            }
        }
    }

    fn resolve(&self, slot: &Slot<Q, V>, outcome: Outcome<V>) -> Result<V> {
        match outcome {
            Outcome::Value(value) => match self.store.set_value(&slot.key, value.clone()) {
                Ok(_) => Ok(value),
                Err(err) => Err(CoalesceError::Cache {
                    key: slot.key.clone(),
                    query: Some(slot.original.clone()),
                    message: "failed to cache fetched value".into(),
                    cause: Some(cause(err)),
                }),
            },
            Outcome::NotFound => Err(CoalesceError::NotFound {
                key: slot.key.clone(),
                query: slot.original.clone(),
            }),
            Outcome::Failure(err) => Err(CoalesceError::BatchFunction {
                key: Some(slot.key.clone()),
                query: Some(slot.original.clone()),
                message: err.to_string(),
                cause: Some(err),
            }),
        }
    }
}
