//! Batcher counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Lock-free counters shared by the facade and the scheduler.
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub(crate) hits: AtomicU64,
    pub(crate) misses: AtomicU64,
    pub(crate) batches: AtomicU64,
    pub(crate) keys_fetched: AtomicU64,
    pub(crate) fetch_failures: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn incr(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, cached_entries: usize, size_bytes: usize) -> BatcherStats {
        BatcherStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            batches_dispatched: self.batches.load(Ordering::Relaxed),
            keys_fetched: self.keys_fetched.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            cached_entries,
            size_bytes,
        }
    }
}

/// Point-in-time batcher statistics.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatcherStats {
    /// Loads answered from the cache
    pub hits: u64,
    /// Loads forwarded to the scheduler
    pub misses: u64,
    /// Batch function invocations
    pub batches_dispatched: u64,
    /// Distinct keys sent to the batch function
    pub keys_fetched: u64,
    /// Batch function invocations that failed as a whole
    pub fetch_failures: u64,
    /// Live cache entries
    pub cached_entries: usize,
    /// Accounted cache size in bytes
    pub size_bytes: usize,
}

impl BatcherStats {
    /// Fraction of loads answered from the cache (0.0 with no loads).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }

    /// Average number of keys per batch (0.0 with no batches).
    pub fn avg_batch_size(&self) -> f64 {
        if self.batches_dispatched == 0 {
            return 0.0;
        }
        self.keys_fetched as f64 / self.batches_dispatched as f64
    }
}
