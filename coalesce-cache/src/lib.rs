//! # Coalesce Cache
//!
//! Bounded in-memory store backing the batcher.
//!
//! Entries are admitted only while the accounted size stays within the memory
//! limit; nothing is ever evicted to make room. Optional per-key expiration is
//! enforced both by timer tasks and on access.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

mod store;

pub use store::{CacheStore, CommittedEntry, StoreConfig, StoreStats};
