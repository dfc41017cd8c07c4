//! # Coalesce Batch
//!
//! Request-coalescing cache: concurrent lookups issued within one batch
//! window are merged into a single call to a user-supplied batch function,
//! and the results are cached for later lookups.
//!
//! ## Features
//!
//! - **Coalescing**: one batch function call per window, in call order
//! - **Per-key Outcomes**: a failure for one key never affects the others
//! - **Bounded Cache**: admission is refused past the memory limit
//! - **Expiration**: entries removed by timer, with lazy reaping as backup
//! - **Lifecycle Events**: hit, miss, set, read, delete, expire, clear, check
//!
//! ## Example
//!
//! ```rust
//! use coalesce_batch::{batch_fn, Batcher, BatcherConfig, Cause, Outcome};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> coalesce_batch::Result<()> {
//! let users = batch_fn(|ids: Vec<u32>| async move {
//!     Ok::<_, Cause>(
//!         ids.into_iter()
//!             .map(|id| if id == 0 { Outcome::NotFound } else { Outcome::Value(format!("user-{id}")) })
//!             .collect(),
//!     )
//! });
//! let batcher = Batcher::new(users, BatcherConfig::default())?;
//!
//! let (a, b) = tokio::join!(batcher.load(1), batcher.load(2));
//! assert_eq!(a?, "user-1");
//! assert_eq!(b?, "user-2");
//! assert_eq!(batcher.stats().batches_dispatched, 1);
//!
//! assert!(batcher.load(0).await.unwrap_err().is_not_found());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

mod batcher;
mod scheduler;
mod stats;

pub use batcher::{Batcher, BatcherBuilder};
pub use stats::BatcherStats;

pub use coalesce_cache::{CacheStore, CommittedEntry, StoreConfig, StoreStats};
pub use coalesce_core::{
    batch_fn, cause, cause_msg, fixed_size, identity, json_size, plain_hasher, sha3_hasher,
    BatchFn, BatcherConfig, CacheEvent, Cause, CoalesceError, EventKind, KeyHasher, Notifier,
    Outcome, QueryNormalizer, Result, SizeEstimator, SubscriptionId,
};
