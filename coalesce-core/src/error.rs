//! Error types for the coalescing cache.
//!
//! Every failure kind carries the key (and, where one exists, the original
//! query) it belongs to, so a caller holding a `load_many` result can tell
//! exactly which slot failed and why.

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

/// Result type alias using `CoalesceError`.
pub type Result<T> = std::result::Result<T, CoalesceError>;

/// Shared underlying cause.
///
/// Reference counted so that one total batch failure can be handed to every
/// waiter of that batch.
pub type Cause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Wraps any error into a [`Cause`].
pub fn cause<E>(err: E) -> Cause
where
    E: std::error::Error + Send + Sync + 'static,
{
    Arc::new(err)
}

/// Builds a [`Cause`] from a plain message.
pub fn cause_msg(message: impl Into<String>) -> Cause {
    Arc::new(MessageError(message.into()))
}

/// A bare message used as an error cause.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct MessageError(pub String);

/// Main error type for all coalescing cache operations.
#[derive(Debug, Clone, Error)]
pub enum CoalesceError {
    /// The batch function explicitly reported absence for a key.
    #[error("No value found for key '{key}'")]
    NotFound {
        /// Cache key of the request.
        key: String,
        /// Query as it was handed to the batch function.
        query: Value,
    },

    /// The batch function failed as a whole, returned a malformed result,
    /// or reported an error for this particular key.
    #[error("Batch function failed{}: {message}", fmt_key(.key))]
    BatchFunction {
        /// Cache key of the request, when the failure is per-key.
        key: Option<String>,
        /// Query as it was handed to the batch function.
        query: Option<Value>,
        /// Human readable description.
        message: String,
        /// Underlying error, if any.
        #[source]
        cause: Option<Cause>,
    },

    /// Reading from or writing to the cache failed.
    #[error("Cache error for key '{key}': {message}")]
    Cache {
        /// Cache key involved.
        key: String,
        /// Original query, when the failure happened during a load.
        query: Option<Value>,
        /// Human readable description.
        message: String,
        /// Underlying error, if any.
        #[source]
        cause: Option<Cause>,
    },

    /// Admission was refused because the store would exceed its memory limit.
    #[error("Memory limit exceeded for key '{key}': projected {projected} bytes, limit {limit} bytes")]
    MemoryLimit {
        /// Key whose admission was refused.
        key: String,
        /// Projected total size had the entry been admitted.
        projected: usize,
        /// Configured limit.
        limit: usize,
    },

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

fn fmt_key(key: &Option<String>) -> String {
    match key {
        Some(k) => format!(" for key '{k}'"),
        None => String::new(),
    }
}

impl CoalesceError {
    /// Creates a batch-wide failure (no per-key information).
    pub fn batch_wide(message: impl Into<String>, cause: Option<Cause>) -> Self {
        CoalesceError::BatchFunction {
            key: None,
            query: None,
            message: message.into(),
            cause,
        }
    }

    /// Re-targets a batch-wide failure at a single waiter.
    pub fn for_waiter(&self, key: &str, query: &Value) -> Self {
        match self {
            CoalesceError::BatchFunction { message, cause, .. } => CoalesceError::BatchFunction {
                key: Some(key.to_string()),
                query: Some(query.clone()),
                message: message.clone(),
                cause: cause.clone(),
            },
            other => other.clone(),
        }
    }

    /// Returns true if the batch function reported absence.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CoalesceError::NotFound { .. })
    }

    /// Returns true if this error originates in the batch function.
    pub fn is_batch_error(&self) -> bool {
        matches!(self, CoalesceError::BatchFunction { .. })
    }

    /// Returns true if this error originates in the cache layer.
    ///
    /// A refused admission counts as a cache error.
    pub fn is_cache_error(&self) -> bool {
        matches!(
            self,
            CoalesceError::Cache { .. } | CoalesceError::MemoryLimit { .. }
        )
    }

    /// Returns true if admission was refused for capacity, either directly or
    /// as the cause of a wrapped cache error.
    pub fn is_memory_limit(&self) -> bool {
        match self {
            CoalesceError::MemoryLimit { .. } => true,
            CoalesceError::Cache {
                cause: Some(cause), ..
            } => cause
                .downcast_ref::<CoalesceError>()
                .is_some_and(|e| e.is_memory_limit()),
            _ => false,
        }
    }

    /// Cache key the error belongs to, if it is key-specific.
    ///
    /// `None` for a query that failed to serialize, since no key could be
    /// derived for it.
    pub fn key(&self) -> Option<&str> {
        match self {
            CoalesceError::Cache { key, .. } if key.is_empty() => None,
            CoalesceError::NotFound { key, .. }
            | CoalesceError::Cache { key, .. }
            | CoalesceError::MemoryLimit { key, .. } => Some(key),
            CoalesceError::BatchFunction { key, .. } => key.as_deref(),
            CoalesceError::Config(_) => None,
        }
    }

    /// Original query the error belongs to, if known.
    pub fn query(&self) -> Option<&Value> {
        match self {
            CoalesceError::NotFound { query, .. } => Some(query),
            CoalesceError::BatchFunction { query, .. } | CoalesceError::Cache { query, .. } => {
                query.as_ref()
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::error::Error as _;
    use test_case::test_case;

    fn not_found() -> CoalesceError {
        CoalesceError::NotFound {
            key: "404".into(),
            query: json!("404"),
        }
    }

    fn memory_limit() -> CoalesceError {
        CoalesceError::MemoryLimit {
            key: "big".into(),
            projected: 2048,
            limit: 1024,
        }
    }

    #[test]
    fn test_error_display() {
        let err = memory_limit();
        assert!(err.to_string().contains("2048"));
        assert!(err.to_string().contains("1024"));

        let err = CoalesceError::batch_wide("connection reset", None);
        assert_eq!(err.to_string(), "Batch function failed: connection reset");
    }

    #[test_case(not_found(), true, false, false ; "not found")]
    #[test_case(memory_limit(), false, false, true ; "memory limit")]
    #[test_case(CoalesceError::batch_wide("x", None), false, true, false ; "batch wide")]
    #[test_case(CoalesceError::Config("bad".into()), false, false, false ; "config")]
    fn test_error_classification(err: CoalesceError, nf: bool, batch: bool, cache: bool) {
        assert_eq!(err.is_not_found(), nf);
        assert_eq!(err.is_batch_error(), batch);
        assert_eq!(err.is_cache_error(), cache);
    }

    #[test]
    fn test_for_waiter_keeps_cause() {
        let err = CoalesceError::batch_wide("boom", Some(cause_msg("socket closed")));
        let scoped = err.for_waiter("k1", &json!({"id": 1}));

        assert_eq!(scoped.key(), Some("k1"));
        assert_eq!(scoped.query(), Some(&json!({"id": 1})));
        assert_eq!(scoped.source().unwrap().to_string(), "socket closed");
        assert!(scoped.to_string().contains("'k1'"));
    }

    #[test]
    fn test_wrapped_memory_limit_detected() {
        let err = CoalesceError::Cache {
            key: "big".into(),
            query: None,
            message: "admission refused".into(),
            cause: Some(cause(memory_limit())),
        };
        assert!(err.is_memory_limit());
        assert!(!not_found().is_memory_limit());
    }
}
