//! # Coalesce Core
//!
//! Shared building blocks for the request-coalescing cache.
//!
//! - **Errors**: the failure taxonomy, each kind carrying its key and query
//! - **Types**: per-slot batch outcomes and lifecycle events
//! - **Traits**: the batch function contract and estimator/normalizer hooks
//! - **Keys**: canonical query hashing with optional field projection
//! - **Events**: observer registry for lifecycle notifications
//! - **Config**: serializable batcher configuration
//!
//! ## Example
//!
//! ```rust
//! use coalesce_core::{derive_key, sha3_hasher, BatcherConfig};
//! use serde_json::json;
//!
//! let config = BatcherConfig::default().with_cache_key_fields(["id"]);
//! let key = derive_key(
//!     &json!({"id": 1, "trace": "abc"}),
//!     config.cache_key_fields.as_deref(),
//!     &sha3_hasher(),
//! );
//! assert_eq!(key.len(), 64);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, clippy::all)]

pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod key;
pub mod traits;
pub mod types;

// Re-export commonly used items at crate root
pub use config::BatcherConfig;
pub use constants::*;
pub use error::{cause, cause_msg, Cause, CoalesceError, MessageError, Result};
pub use events::{Listener, Notifier, SubscriptionId};
pub use key::{derive_key, plain_hasher, query_to_value, sha3_hasher, KeyHasher};
pub use traits::*;
pub use types::*;
