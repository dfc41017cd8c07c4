//! Bounded in-memory store with per-key expiration timers.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use coalesce_core::{
    BatcherConfig, CacheEvent, CoalesceError, Notifier, Result, SizeEstimator,
    DEFAULT_EXPIRATION_MS, DEFAULT_MEMORY_LIMIT_BYTES,
};

/// Store entry.
struct CacheEntry<V> {
    value: V,
    size: usize,
    expires_at: Option<Instant>,
    /// Distinguishes this write from later writes of the same key, so a
    /// stale timer never removes a newer value.
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// Store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Admission limit in bytes
    pub memory_limit_bytes: usize,
    /// Entry expiration in milliseconds (0 = never)
    pub expiration_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            memory_limit_bytes: DEFAULT_MEMORY_LIMIT_BYTES,
            expiration_ms: DEFAULT_EXPIRATION_MS,
        }
    }
}

impl From<&BatcherConfig> for StoreConfig {
    fn from(config: &BatcherConfig) -> Self {
        Self {
            memory_limit_bytes: config.memory_limit_bytes,
            expiration_ms: config.expiration_ms,
        }
    }
}

impl StoreConfig {
    fn expiration(&self) -> Option<Duration> {
        (self.expiration_ms > 0).then(|| Duration::from_millis(self.expiration_ms))
    }
}

/// Metadata of an admitted entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommittedEntry {
    /// Cache key
    pub key: String,
    /// Estimated size of the value in bytes
    pub size: usize,
    /// Expiration deadline, if the store expires entries
    pub expires_at: Option<Instant>,
}

/// Store statistics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreStats {
    /// Entries held, including expired ones not yet reaped
    pub total_entries: usize,
    /// Entries past their deadline but not yet reaped
    pub expired_entries: usize,
    /// Accounted size in bytes
    pub size_bytes: usize,
    /// Admission limit in bytes
    pub memory_limit_bytes: usize,
}

struct StoreState<V> {
    entries: HashMap<String, CacheEntry<V>>,
    size: usize,
    generation: u64,
}

impl<V> StoreState<V> {
    fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let mut entry = self.entries.remove(key)?;
        entry.cancel_timer();
        self.size = self.size.saturating_sub(entry.size);
        Some(entry)
    }

    /// Removes `key` if it has expired. Returns true if it did.
    fn reap(&mut self, key: &str, now: Instant) -> bool {
        let expired = self.entries.get(key).is_some_and(|e| e.is_expired(now));
        if expired {
            self.remove(key);
        }
        expired
    }
}

struct StoreInner<V> {
    state: Mutex<StoreState<V>>,
    config: StoreConfig,
    estimator: SizeEstimator<V>,
    notifier: Arc<Notifier>,
}

impl<V> StoreInner<V> {
    fn expire(&self, key: &str, generation: u64) {
        let removed = {
            let mut state = self.state.lock();
            let current = state
                .entries
                .get(key)
                .is_some_and(|e| e.generation == generation);
            // The running timer is this entry's own; nothing to abort.
            if current {
                if let Some(entry) = state.entries.remove(key) {
                    state.size = state.size.saturating_sub(entry.size);
                }
            }
            current
        };
        if removed {
            debug!(key, "cache entry expired");
            self.notifier.emit(CacheEvent::Expired { key: key.to_string() });
        }
    }
}

impl<V> Drop for StoreInner<V> {
    fn drop(&mut self) {
        for entry in self.state.get_mut().entries.values_mut() {
            entry.cancel_timer();
        }
    }
}

/// Bounded key-value store.
///
/// Admission is refused (never evicting anything) when the projected total
/// size would exceed the memory limit. When an expiration is configured every
/// entry gets a timer task that removes it at its deadline and emits a
/// [`CacheEvent::Expired`]; reads also check the deadline, so an expired
/// entry is never observable even without a running runtime.
///
/// Cloning yields another handle to the same store.
pub struct CacheStore<V> {
    inner: Arc<StoreInner<V>>,
}

impl<V> Clone for CacheStore<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> CacheStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates a store with its own notifier.
    pub fn new(config: StoreConfig, estimator: SizeEstimator<V>) -> Self {
        Self::with_notifier(config, estimator, Arc::new(Notifier::new()))
    }

    /// Creates a store that reports expirations to `notifier`.
    pub fn with_notifier(
        config: StoreConfig,
        estimator: SizeEstimator<V>,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                state: Mutex::new(StoreState {
                    entries: HashMap::new(),
                    size: 0,
                    generation: 0,
                }),
                config,
                estimator,
                notifier,
            }),
        }
    }

    /// Returns the notifier expirations are reported to.
    pub fn notifier(&self) -> &Arc<Notifier> {
        &self.inner.notifier
    }

    /// Returns the store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Gets a live value.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let (value, reaped) = {
            let mut state = self.inner.state.lock();
            let reaped = state.reap(key, now);
            (state.entries.get(key).map(|e| e.value.clone()), reaped)
        };
        self.report_reaped(key, reaped);
        trace!(key, hit = value.is_some(), "cache get");
        value
    }

    /// Returns true if a live value is stored under `key`.
    pub fn has(&self, key: &str) -> bool {
        let now = Instant::now();
        let (exists, reaped) = {
            let mut state = self.inner.state.lock();
            let reaped = state.reap(key, now);
            (state.entries.contains_key(key), reaped)
        };
        self.report_reaped(key, reaped);
        exists
    }

    /// Stores a value, replacing any previous one and re-arming its timer.
    ///
    /// Fails with [`CoalesceError::MemoryLimit`] if admission would push the
    /// accounted size past the limit; the store is left untouched. Fails with
    /// [`CoalesceError::Cache`] if the size estimator fails.
    pub fn set_value(&self, key: &str, value: V) -> Result<CommittedEntry> {
        let size = (self.inner.estimator)(&value).map_err(|e| CoalesceError::Cache {
            key: key.to_string(),
            query: None,
            message: "size estimation failed".into(),
            cause: Some(e),
        })?;

        let limit = self.inner.config.memory_limit_bytes;
        let mut state = self.inner.state.lock();

        let replaced = state.entries.get(key).map_or(0, |e| e.size);
        // An overflowing total can never fit.
        let projected = (state.size - replaced)
            .checked_add(size)
            .unwrap_or(usize::MAX);
        if projected > limit {
            drop(state);
            warn!(key, size, projected, limit, "cache admission refused");
            return Err(CoalesceError::MemoryLimit {
                key: key.to_string(),
                projected,
                limit,
            });
        }

        state.generation += 1;
        let generation = state.generation;
        let expiration = self.inner.config.expiration();
        let expires_at = expiration.map(|ttl| Instant::now() + ttl);
        let timer = expires_at.and_then(|deadline| self.arm_timer(key, generation, deadline));

        let entry = CacheEntry {
            value,
            size,
            expires_at,
            generation,
            timer,
        };
        if let Some(mut previous) = state.entries.insert(key.to_string(), entry) {
            previous.cancel_timer();
        }
        state.size = projected;
        drop(state);

        debug!(key, size, total = projected, "cache entry admitted");
        Ok(CommittedEntry {
            key: key.to_string(),
            size,
            expires_at,
        })
    }

    /// Removes a value. Returns it if it was live.
    pub fn delete_value(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let removed = self.inner.state.lock().remove(key);
        match removed {
            Some(entry) if entry.is_expired(now) => {
                self.report_reaped(key, true);
                None
            }
            Some(entry) => Some(entry.value),
            None => None,
        }
    }

    /// Removes every entry and cancels every timer. Returns the number of
    /// entries removed.
    pub fn clear(&self) -> usize {
        let drained: Vec<CacheEntry<V>> = {
            let mut state = self.inner.state.lock();
            state.size = 0;
            state.entries.drain().map(|(_, e)| e).collect()
        };
        let removed = drained.len();
        for mut entry in drained {
            entry.cancel_timer();
        }
        debug!(removed, "cache cleared");
        removed
    }

    /// Removes every expired entry now, emitting one expiration per entry.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = {
            let mut state = self.inner.state.lock();
            let keys: Vec<String> = state
                .entries
                .iter()
                .filter(|(_, e)| e.is_expired(now))
                .map(|(k, _)| k.clone())
                .collect();
            for key in &keys {
                state.remove(key);
            }
            keys
        };
        for key in &expired {
            self.report_reaped(key, true);
        }
        expired.len()
    }

    /// Snapshot of the live keys.
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        self.inner
            .state
            .lock()
            .entries
            .iter()
            .filter(|(_, e)| !e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.inner
            .state
            .lock()
            .entries
            .values()
            .filter(|e| !e.is_expired(now))
            .count()
    }

    /// Returns true if no live entry is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Accounted size of all held entries in bytes.
    pub fn size_bytes(&self) -> usize {
        self.inner.state.lock().size
    }

    /// Returns store statistics.
    pub fn stats(&self) -> StoreStats {
        let now = Instant::now();
        let state = self.inner.state.lock();
        let expired = state.entries.values().filter(|e| e.is_expired(now)).count();
        StoreStats {
            total_entries: state.entries.len(),
            expired_entries: expired,
            size_bytes: state.size,
            memory_limit_bytes: self.inner.config.memory_limit_bytes,
        }
    }

    fn arm_timer(&self, key: &str, generation: u64, deadline: Instant) -> Option<JoinHandle<()>> {
        // Without a runtime, expiry is only enforced on access.
        let handle = Handle::try_current().ok()?;
        let weak: Weak<StoreInner<V>> = Arc::downgrade(&self.inner);
        let key = key.to_string();
        Some(handle.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(inner) = weak.upgrade() {
                inner.expire(&key, generation);
            }
        }))
    }

    fn report_reaped(&self, key: &str, reaped: bool) {
        if reaped {
            debug!(key, "expired cache entry reaped on access");
            self.inner
                .notifier
                .emit(CacheEvent::Expired { key: key.to_string() });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coalesce_core::{cause_msg, fixed_size, json_size, EventKind};
    use serde_json::{json, Value};

    fn store(limit: usize, expiration_ms: u64) -> CacheStore<Value> {
        CacheStore::new(
            StoreConfig {
                memory_limit_bytes: limit,
                expiration_ms,
            },
            json_size(),
        )
    }

    fn expirations(store: &CacheStore<Value>) -> Arc<Mutex<Vec<String>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        store.notifier().subscribe(EventKind::ValueExpired, move |e| {
            sink.lock().push(e.key().unwrap_or_default().to_string());
        });
        seen
    }

    #[test]
    fn test_store_set_get() {
        let store = store(1024, 0);
        let entry = store.set_value("a", json!({"id": "a"})).unwrap();

        assert_eq!(entry.size, 10);
        assert_eq!(entry.expires_at, None);
        assert_eq!(store.get("a"), Some(json!({"id": "a"})));
        assert!(store.has("a"));
        assert!(!store.has("b"));
        assert_eq!(store.get("b"), None);
    }

    #[test]
    fn test_store_delete() {
        let store = store(1024, 0);
        store.set_value("a", json!(1)).unwrap();

        assert_eq!(store.delete_value("a"), Some(json!(1)));
        assert_eq!(store.delete_value("a"), None);
        assert!(!store.has("a"));
        assert_eq!(store.size_bytes(), 0);
    }

    #[test]
    fn test_store_clear() {
        let store = store(1024, 0);
        store.set_value("a", json!(1)).unwrap();
        store.set_value("b", json!(2)).unwrap();

        assert_eq!(store.clear(), 2);
        assert!(store.is_empty());
        assert_eq!(store.size_bytes(), 0);
        assert_eq!(store.clear(), 0);
    }

    #[test]
    fn test_memory_limit_refuses_without_evicting() {
        let store = store(16, 0);
        store.set_value("small", json!("abc")).unwrap();

        let err = store
            .set_value("big", json!("this string is far too long"))
            .unwrap_err();

        assert!(matches!(err, CoalesceError::MemoryLimit { ref key, limit: 16, .. } if key == "big"));
        assert_eq!(store.get("small"), Some(json!("abc")));
        assert!(!store.has("big"));
        assert_eq!(store.size_bytes(), 5);
    }

    #[test]
    fn test_value_larger_than_limit() {
        let store = store(2, 0);
        assert!(store.set_value("k", json!("abc")).unwrap_err().is_memory_limit());
        assert!(store.is_empty());
    }

    #[test]
    fn test_overflowing_estimate_is_refused() {
        let store: CacheStore<usize> = CacheStore::new(
            StoreConfig {
                memory_limit_bytes: 1024,
                expiration_ms: 0,
            },
            Arc::new(|v: &usize| Ok::<_, coalesce_core::Cause>(*v)),
        );
        store.set_value("a", 10).unwrap();

        let err = store.set_value("b", usize::MAX - 5).unwrap_err();

        assert!(matches!(
            err,
            CoalesceError::MemoryLimit { ref key, projected: usize::MAX, limit: 1024 } if key == "b"
        ));
        assert_eq!(store.get("a"), Some(10));
        assert!(!store.has("b"));
        assert_eq!(store.size_bytes(), 10);
    }

    #[test]
    fn test_refused_overwrite_keeps_old_value() {
        let store = store(8, 0);
        store.set_value("k", json!("ab")).unwrap();

        assert!(store.set_value("k", json!("abcdefghij")).is_err());
        assert_eq!(store.get("k"), Some(json!("ab")));
    }

    #[test]
    fn test_overwrite_replaces_accounted_size() {
        let store = store(10, 0);
        store.set_value("k", json!("abcdef")).unwrap();
        // 8 bytes held; replacing with 8 more would overflow if not subtracted.
        store.set_value("k", json!("ghijkl")).unwrap();
        assert_eq!(store.size_bytes(), 8);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_estimator_failure_is_cache_error() {
        let store: CacheStore<u32> = CacheStore::new(
            StoreConfig::default(),
            Arc::new(|_: &u32| Err::<usize, _>(cause_msg("cannot size"))),
        );
        let err = store.set_value("k", 1).unwrap_err();
        assert!(matches!(err, CoalesceError::Cache { .. }));
        assert!(!err.is_memory_limit());
        assert!(store.is_empty());
    }

    #[test]
    fn test_lazy_expiry_without_runtime() {
        let store: CacheStore<u64> = CacheStore::new(
            StoreConfig {
                memory_limit_bytes: 1024,
                expiration_ms: 1,
            },
            fixed_size(),
        );
        store.set_value("k", 7).unwrap();
        std::thread::sleep(Duration::from_millis(10));

        assert!(!store.has("k"));
        assert_eq!(store.get("k"), None);
        assert_eq!(store.size_bytes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_expires_entry() {
        let store = store(1024, 1000);
        let seen = expirations(&store);
        store.set_value("k", json!("v")).unwrap();
        assert!(store.has("k"));

        tokio::time::sleep(Duration::from_millis(1001)).await;

        // Removed by the timer, not by a read.
        assert_eq!(store.stats().total_entries, 0);
        assert_eq!(*seen.lock(), vec!["k".to_string()]);
        assert!(!store.has("k"));
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwrite_resets_expiration() {
        let store = store(1024, 1000);
        let seen = expirations(&store);

        store.set_value("k", json!(1)).unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;
        store.set_value("k", json!(2)).unwrap();

        // t = 1100ms: the first deadline has passed, the second has not.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(store.get("k"), Some(json!(2)));
        assert!(seen.lock().is_empty());

        // t = 1700ms: 1100ms after the update.
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(!store.has("k"));
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_cancels_timer() {
        let store = store(1024, 100);
        let seen = expirations(&store);
        store.set_value("k", json!(1)).unwrap();
        store.delete_value("k");

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(seen.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_cancels_timers() {
        let store = store(1024, 100);
        let seen = expirations(&store);
        for i in 0..10 {
            store.set_value(&format!("k{i}"), json!(i)).unwrap();
        }
        assert_eq!(store.clear(), 10);

        store.set_value("fresh", json!(0)).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.has("fresh"));
        tokio::time::sleep(Duration::from_millis(101)).await;
        assert_eq!(*seen.lock(), vec!["fresh".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_and_stats() {
        let store = store(1024, 0);
        store.set_value("a", json!(1)).unwrap();
        store.set_value("b", json!(22)).unwrap();

        let mut keys = store.keys();
        keys.sort();
        assert_eq!(keys, vec!["a", "b"]);

        let stats = store.stats();
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.expired_entries, 0);
        assert_eq!(stats.size_bytes, 3);
        assert_eq!(stats.memory_limit_bytes, 1024);
    }

    #[test]
    fn test_cleanup_expired() {
        let store: CacheStore<u64> = CacheStore::new(
            StoreConfig {
                memory_limit_bytes: 1024,
                expiration_ms: 1,
            },
            fixed_size(),
        );
        store.set_value("a", 1).unwrap();
        store.set_value("b", 2).unwrap();
        std::thread::sleep(Duration::from_millis(10));

        assert_eq!(store.stats().expired_entries, 2);
        assert_eq!(store.cleanup_expired(), 2);
        assert_eq!(store.stats().total_entries, 0);
    }

    #[test]
    fn test_clones_share_state() {
        let a = store(1024, 0);
        let b = a.clone();
        a.set_value("k", json!(true)).unwrap();
        assert!(b.has("k"));
    }
}
