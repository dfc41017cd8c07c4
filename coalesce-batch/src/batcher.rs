//! Public batcher facade.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tracing::{instrument, trace};

use coalesce_cache::{CacheStore, CommittedEntry, StoreConfig};
use coalesce_core::{
    derive_key, fixed_size, identity, json_size, query_to_value, sha3_hasher, BatchFn,
    BatcherConfig, CacheEvent, CoalesceError, EventKind, KeyHasher, Notifier, QueryNormalizer,
    Result, SizeEstimator, SubscriptionId,
};

use crate::scheduler::{Scheduler, WaiterRx};
use crate::stats::{BatcherStats, StatsCounters};

/// Request-coalescing cache in front of a batch function.
///
/// Loads are answered from the cache when possible. Misses issued within one
/// batch window are merged into a single batch function call, and each
/// caller receives only the outcome for its own key.
///
/// Cloning yields another handle to the same batcher. Separate batchers
/// share nothing.
pub struct Batcher<Q, V> {
    config: Arc<BatcherConfig>,
    store: CacheStore<V>,
    scheduler: Scheduler<Q, V>,
    notifier: Arc<Notifier>,
    hasher: KeyHasher,
    normalizer: QueryNormalizer<Q>,
    stats: Arc<StatsCounters>,
}

impl<Q, V> Clone for Batcher<Q, V> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            store: self.store.clone(),
            scheduler: self.scheduler.clone(),
            notifier: Arc::clone(&self.notifier),
            hasher: Arc::clone(&self.hasher),
            normalizer: Arc::clone(&self.normalizer),
            stats: Arc::clone(&self.stats),
        }
    }
}

/// A `load_many` position before its outcome is known.
enum Pending<V> {
    Ready(Result<V>),
    Waiting {
        key: String,
        original: Value,
        rx: WaiterRx<V>,
    },
}

impl<Q, V> Batcher<Q, V>
where
    Q: Serialize + Clone + Send + Sync + 'static,
    V: Serialize + Clone + Send + Sync + 'static,
{
    /// Creates a batcher that sizes values by their JSON encoding.
    pub fn new<F>(batch_fn: F, config: BatcherConfig) -> Result<Self>
    where
        F: BatchFn<Q, V> + 'static,
    {
        Self::builder(batch_fn).config(config).json_sized().build()
    }
}

impl<Q, V> Batcher<Q, V>
where
    Q: Serialize + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Starts building a batcher around `batch_fn`.
    pub fn builder<F>(batch_fn: F) -> BatcherBuilder<Q, V>
    where
        F: BatchFn<Q, V> + 'static,
    {
        BatcherBuilder::new(Arc::new(batch_fn))
    }

    /// Returns the configuration.
    pub fn config(&self) -> &BatcherConfig {
        &self.config
    }

    /// Returns the notifier lifecycle events are delivered through.
    pub fn notifier(&self) -> &Arc<Notifier> {
        &self.notifier
    }

    /// Registers a listener for one kind of event.
    pub fn subscribe<F>(&self, kind: EventKind, listener: F) -> SubscriptionId
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        self.notifier.subscribe(kind, listener)
    }

    /// Registers a listener for every kind of event.
    pub fn subscribe_all<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        self.notifier.subscribe_all(listener)
    }

    /// Removes a listener.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.notifier.unsubscribe(id)
    }

    /// Derives the cache key a query would be stored under.
    pub fn cache_key(&self, query: &Q) -> Result<String> {
        self.prepare(query.clone()).map(|(key, _, _)| key)
    }

    /// Loads the value for one query.
    ///
    /// Answers from the cache on a hit; otherwise joins the current batch
    /// window and resolves once that batch settles.
    pub async fn load(&self, query: Q) -> Result<V> {
        let (key, normalized, original) = self.prepare(query)?;
        match self.lookup(&key) {
            Some(value) => Ok(value),
            None => {
                let rx = self.scheduler.enqueue(key.clone(), normalized, original.clone());
                await_waiter(key, original, rx).await
            }
        }
    }

    /// Loads values for many queries.
    ///
    /// Returns one result per query, in input order. Cache hits are answered
    /// directly; all misses join the same batch window. A failure for one
    /// query never affects the others.
    #[instrument(skip_all, fields(queries = queries.len()))]
    pub async fn load_many(&self, queries: Vec<Q>) -> Vec<Result<V>> {
        let pending: Vec<Pending<V>> = queries
            .into_iter()
            .map(|query| match self.prepare(query) {
                Err(err) => Pending::Ready(Err(err)),
                Ok((key, normalized, original)) => match self.lookup(&key) {
                    Some(value) => Pending::Ready(Ok(value)),
                    None => {
                        let rx = self.scheduler.enqueue(key.clone(), normalized, original.clone());
                        Pending::Waiting { key, original, rx }
                    }
                },
            })
            .collect();

        join_all(pending.into_iter().map(|p| async move {
            match p {
                Pending::Ready(result) => result,
                Pending::Waiting { key, original, rx } => await_waiter(key, original, rx).await,
            }
        }))
        .await
    }

    /// Stores a value under a query's key, as if it had been fetched.
    pub fn prime(&self, query: Q, value: V) -> Result<CommittedEntry> {
        let key = self.cache_key(&query)?;
        self.set_value(&key, value)
    }

    /// Reads a cached value by key.
    pub fn get(&self, key: &str) -> Option<V> {
        let value = self.store.get(key);
        self.notifier.emit(CacheEvent::Read {
            key: key.to_string(),
            found: value.is_some(),
        });
        value
    }

    /// Returns true if a live value is cached under `key`.
    pub fn has(&self, key: &str) -> bool {
        let exists = self.store.has(key);
        self.notifier.emit(CacheEvent::Checked {
            key: key.to_string(),
            exists,
        });
        exists
    }

    /// Writes a value into the cache.
    pub fn set_value(&self, key: &str, value: V) -> Result<CommittedEntry> {
        let entry = self.store.set_value(key, value)?;
        self.notifier.emit(CacheEvent::Set {
            key: key.to_string(),
        });
        Ok(entry)
    }

    /// Deletes a cached value, returning it if it was live.
    pub fn delete_value(&self, key: &str) -> Option<V> {
        let removed = self.store.delete_value(key);
        self.notifier.emit(CacheEvent::Deleted {
            key: key.to_string(),
            existed: removed.is_some(),
        });
        removed
    }

    /// Empties the cache. Returns the number of entries removed.
    pub fn clear_cache(&self) -> usize {
        let removed = self.store.clear();
        self.notifier.emit(CacheEvent::Cleared { removed });
        removed
    }

    /// Returns a statistics snapshot.
    pub fn stats(&self) -> BatcherStats {
        self.stats
            .snapshot(self.store.len(), self.store.size_bytes())
    }

    fn prepare(&self, query: Q) -> Result<(String, Q, Value)> {
        let normalized = (self.normalizer)(query);
        let original = query_to_value(&normalized)?;
        let key = derive_key(
            &original,
            self.config.cache_key_fields.as_deref(),
            &self.hasher,
        );
        Ok((key, normalized, original))
    }

    fn lookup(&self, key: &str) -> Option<V> {
        match self.store.get(key) {
            Some(value) => {
                trace!(key, "cache hit");
                StatsCounters::incr(&self.stats.hits, 1);
                self.notifier.emit(CacheEvent::Hit {
                    key: key.to_string(),
                });
                Some(value)
            }
            None => {
                StatsCounters::incr(&self.stats.misses, 1);
                self.notifier.emit(CacheEvent::Miss {
                    key: key.to_string(),
                });
                None
            }
        }
    }
}

async fn await_waiter<V>(key: String, original: Value, rx: WaiterRx<V>) -> Result<V> {
    rx.await.unwrap_or_else(|_| {
        Err(CoalesceError::BatchFunction {
            key: Some(key),
            query: Some(original),
            message: "batch was dropped before it settled".into(),
            cause: None,
        })
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// BUILDER
// ═══════════════════════════════════════════════════════════════════════════════

/// Builder for [`Batcher`].
///
/// Unless [`json_sized`](Self::json_sized) or
/// [`with_size_estimator`](Self::with_size_estimator) is called, every value
/// is accounted at `size_of::<V>()`. Heap contents are not counted, so the
/// memory limit then bounds entry count times that stack size. Serializable
/// values should use `json_sized`, which [`Batcher::new`] does.
pub struct BatcherBuilder<Q, V> {
    batch_fn: Arc<dyn BatchFn<Q, V>>,
    config: BatcherConfig,
    hasher: Option<KeyHasher>,
    normalizer: Option<QueryNormalizer<Q>>,
    estimator: Option<SizeEstimator<V>>,
    notifier: Option<Arc<Notifier>>,
}

impl<Q, V> BatcherBuilder<Q, V>
where
    Q: Serialize + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates a builder with default configuration.
    pub fn new(batch_fn: Arc<dyn BatchFn<Q, V>>) -> Self {
        Self {
            batch_fn,
            config: BatcherConfig::default(),
            hasher: None,
            normalizer: None,
            estimator: None,
            notifier: None,
        }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: BatcherConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the batch window.
    pub fn window(mut self, window: Duration) -> Self {
        self.config = self.config.with_window(window);
        self
    }

    /// Sets the cache admission limit.
    pub fn memory_limit(mut self, bytes: usize) -> Self {
        self.config = self.config.with_memory_limit(bytes);
        self
    }

    /// Sets the entry expiration.
    pub fn expiration(mut self, ttl: Duration) -> Self {
        self.config = self.config.with_expiration(ttl);
        self
    }

    /// Restricts key hashing to the given query fields.
    pub fn cache_key_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config = self.config.with_cache_key_fields(fields);
        self
    }

    /// Flushes a batch as soon as it holds `size` distinct keys.
    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.config = self.config.with_max_batch_size(size);
        self
    }

    /// Sets the function mapping a serialized query to its cache key.
    pub fn with_key_hasher(mut self, hasher: KeyHasher) -> Self {
        self.hasher = Some(hasher);
        self
    }

    /// Sets the function rewriting queries before hashing and fetching.
    pub fn with_normalizer(mut self, normalizer: QueryNormalizer<Q>) -> Self {
        self.normalizer = Some(normalizer);
        self
    }

    /// Sets the value size estimator. Defaults to `size_of::<V>()`, which
    /// ignores heap contents.
    pub fn with_size_estimator(mut self, estimator: SizeEstimator<V>) -> Self {
        self.estimator = Some(estimator);
        self
    }

    /// Delivers events through an existing notifier.
    pub fn with_notifier(mut self, notifier: Arc<Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Validates the configuration and builds the batcher.
    pub fn build(self) -> Result<Batcher<Q, V>> {
        self.config.validate()?;

        let notifier = self.notifier.unwrap_or_default();
        let stats = Arc::new(StatsCounters::default());
        let store = CacheStore::with_notifier(
            StoreConfig::from(&self.config),
            self.estimator.unwrap_or_else(fixed_size),
            Arc::clone(&notifier),
        );
        let scheduler = Scheduler::new(
            self.batch_fn,
            store.clone(),
            self.config.window(),
            self.config.max_batch_size,
            Arc::clone(&stats),
        );

        Ok(Batcher {
            config: Arc::new(self.config),
            store,
            scheduler,
            notifier,
            hasher: self.hasher.unwrap_or_else(sha3_hasher),
            normalizer: self.normalizer.unwrap_or_else(identity),
            stats,
        })
    }
}

impl<Q, V> BatcherBuilder<Q, V>
where
    Q: Serialize + Clone + Send + Sync + 'static,
    V: Serialize + Clone + Send + Sync + 'static,
{
    /// Sizes values by the length of their JSON encoding.
    pub fn json_sized(self) -> Self {
        self.with_size_estimator(json_size())
    }
}
