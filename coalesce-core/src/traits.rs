//! Collaborator interfaces.
//!
//! The batch function is the only collaborator with a real contract: it takes
//! queries in order and must answer with one [`Outcome`] per query, in the same
//! order. The size estimator and the query normalizer are plain functions.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{cause, Cause};
use crate::types::Outcome;

// ═══════════════════════════════════════════════════════════════════════════════
// BATCH FUNCTION
// ═══════════════════════════════════════════════════════════════════════════════

/// Bulk fetch collaborator.
///
/// Implementations must return exactly one outcome per query, positionally
/// matched. A response of any other length fails every waiter of the batch.
/// Returning `Err` signals a total failure with no per-key information.
#[async_trait]
pub trait BatchFn<Q, V>: Send + Sync {
    /// Fetches values for the given queries.
    async fn load(&self, queries: Vec<Q>) -> std::result::Result<Vec<Outcome<V>>, Cause>;
}

/// Adapter turning an async closure into a [`BatchFn`].
pub struct FnBatch<F, Q, V> {
    f: F,
    _marker: PhantomData<fn(Q) -> V>,
}

/// Wraps an async closure as a batch function.
///
/// ```rust
/// use coalesce_core::{batch_fn, Outcome};
///
/// let f = batch_fn(|keys: Vec<String>| async move {
///     Ok::<_, coalesce_core::Cause>(keys.into_iter().map(|k| Outcome::Value(k.len())).collect())
/// });
/// # let _ = f;
/// ```
pub fn batch_fn<F, Fut, Q, V>(f: F) -> FnBatch<F, Q, V>
where
    F: Fn(Vec<Q>) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<Vec<Outcome<V>>, Cause>> + Send,
{
    FnBatch {
        f,
        _marker: PhantomData,
    }
}

#[async_trait]
impl<F, Fut, Q, V> BatchFn<Q, V> for FnBatch<F, Q, V>
where
    F: Fn(Vec<Q>) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<Vec<Outcome<V>>, Cause>> + Send,
    Q: Send + 'static,
    V: Send + 'static,
{
    async fn load(&self, queries: Vec<Q>) -> std::result::Result<Vec<Outcome<V>>, Cause> {
        (self.f)(queries).await
    }
}

#[async_trait]
impl<Q, V, T> BatchFn<Q, V> for Arc<T>
where
    T: BatchFn<Q, V> + ?Sized,
    Q: Send + 'static,
    V: Send + 'static,
{
    async fn load(&self, queries: Vec<Q>) -> std::result::Result<Vec<Outcome<V>>, Cause> {
        (**self).load(queries).await
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SIZE ESTIMATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Approximate byte size of a value. A failing estimator refuses admission
/// with a cache error.
pub type SizeEstimator<V> = Arc<dyn Fn(&V) -> std::result::Result<usize, Cause> + Send + Sync>;

/// Estimates size as the length of the value's JSON encoding.
pub fn json_size<V: Serialize + 'static>() -> SizeEstimator<V> {
    Arc::new(|value: &V| {
        serde_json::to_vec(value)
            .map(|bytes| bytes.len())
            .map_err(cause)
    })
}

/// Estimates every value at its in-memory stack size.
pub fn fixed_size<V: 'static>() -> SizeEstimator<V> {
    Arc::new(|_: &V| Ok::<_, Cause>(std::mem::size_of::<V>()))
}

// ═══════════════════════════════════════════════════════════════════════════════
// QUERY NORMALIZATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Rewrites a query into its canonical form before hashing and fetching.
pub type QueryNormalizer<Q> = Arc<dyn Fn(Q) -> Q + Send + Sync>;

/// Normalizer that returns the query unchanged.
pub fn identity<Q: 'static>() -> QueryNormalizer<Q> {
    Arc::new(|q: Q| q)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_closure_batch_fn() {
        let f = batch_fn(|keys: Vec<u32>| async move {
            Ok::<_, Cause>(keys
                .into_iter()
                .map(|k| if k == 0 { Outcome::NotFound } else { Outcome::Value(k * 2) })
                .collect())
        });

        let out = f.load(vec![1, 0, 3]).await.unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].clone().into_value(), Some(2));
        assert!(matches!(out[1], Outcome::NotFound));
        assert_eq!(out[2].clone().into_value(), Some(6));
    }

    #[tokio::test]
    async fn test_shared_batch_fn() {
        let f: Arc<dyn BatchFn<u32, u32>> = Arc::new(batch_fn(|keys: Vec<u32>| async move {
            Ok::<_, Cause>(keys.into_iter().map(Outcome::Value).collect())
        }));
        assert_eq!(f.load(vec![5]).await.unwrap().len(), 1);
    }

    #[test]
    fn test_json_size() {
        let estimate = json_size::<serde_json::Value>();
        assert_eq!(estimate(&json!("abc")).unwrap(), 5);
        assert!(estimate(&json!({"id": "1"})).unwrap() > estimate(&json!(1)).unwrap());
    }

    #[test]
    fn test_fixed_size() {
        let estimate = fixed_size::<u64>();
        assert_eq!(estimate(&42).unwrap(), 8);
    }
}
