//! Domain types shared by the cache store and the batch scheduler.
//!
//! - [`Outcome`]: result slot returned by a batch function for one query
//! - [`CacheEvent`] / [`EventKind`]: lifecycle notifications

use serde::{Deserialize, Serialize};

use crate::error::Cause;

/// Canonical cache key.
pub type CacheKey = String;

// ═══════════════════════════════════════════════════════════════════════════════
// OUTCOME
// ═══════════════════════════════════════════════════════════════════════════════

/// Outcome of a single slot in a batch function response.
///
/// Slot `i` always answers query `i` of the request.
#[derive(Debug, Clone)]
pub enum Outcome<V> {
    /// The value was found.
    Value(V),
    /// The backend knows of no value for this query.
    NotFound,
    /// The backend failed for this query only.
    Failure(Cause),
}

impl<V> Outcome<V> {
    /// Returns true if the slot holds a value.
    pub fn is_value(&self) -> bool {
        matches!(self, Outcome::Value(_))
    }

    /// Converts the slot into an `Option`, discarding failures.
    pub fn into_value(self) -> Option<V> {
        match self {
            Outcome::Value(v) => Some(v),
            _ => None,
        }
    }
}

impl<V> From<Option<V>> for Outcome<V> {
    fn from(value: Option<V>) -> Self {
        match value {
            Some(v) => Outcome::Value(v),
            None => Outcome::NotFound,
        }
    }
}

impl<V, E> From<std::result::Result<V, E>> for Outcome<V>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(value: std::result::Result<V, E>) -> Self {
        match value {
            Ok(v) => Outcome::Value(v),
            Err(e) => Outcome::Failure(crate::error::cause(e)),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EVENTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Kind of lifecycle notification, used as the subscription key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A load was answered from the cache.
    CacheHit,
    /// A load missed the cache and was queued for fetching.
    CacheMiss,
    /// A value was written explicitly.
    ValueSet,
    /// A value was read explicitly.
    ValueRead,
    /// A value was deleted explicitly.
    ValueDeleted,
    /// An entry reached its expiration time.
    ValueExpired,
    /// The whole cache was cleared.
    AllCleared,
    /// Existence of a key was checked.
    ExistenceChecked,
}

impl EventKind {
    /// Every event kind, in declaration order.
    pub const ALL: [EventKind; 8] = [
        EventKind::CacheHit,
        EventKind::CacheMiss,
        EventKind::ValueSet,
        EventKind::ValueRead,
        EventKind::ValueDeleted,
        EventKind::ValueExpired,
        EventKind::AllCleared,
        EventKind::ExistenceChecked,
    ];
}

/// Lifecycle notification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CacheEvent {
    /// A load was answered from the cache.
    Hit {
        /// Cache key.
        key: CacheKey,
    },
    /// A load missed the cache.
    Miss {
        /// Cache key.
        key: CacheKey,
    },
    /// A value was written.
    Set {
        /// Cache key.
        key: CacheKey,
    },
    /// A value was read.
    Read {
        /// Cache key.
        key: CacheKey,
        /// Whether a live value was present.
        found: bool,
    },
    /// A value was deleted.
    Deleted {
        /// Cache key.
        key: CacheKey,
        /// Whether the key held a value before the delete.
        existed: bool,
    },
    /// An entry expired.
    Expired {
        /// Cache key.
        key: CacheKey,
    },
    /// The cache was cleared.
    Cleared {
        /// Number of entries removed.
        removed: usize,
    },
    /// Existence of a key was checked.
    Checked {
        /// Cache key.
        key: CacheKey,
        /// Result of the check.
        exists: bool,
    },
}

impl CacheEvent {
    /// Returns the kind of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            CacheEvent::Hit { .. } => EventKind::CacheHit,
            CacheEvent::Miss { .. } => EventKind::CacheMiss,
            CacheEvent::Set { .. } => EventKind::ValueSet,
            CacheEvent::Read { .. } => EventKind::ValueRead,
            CacheEvent::Deleted { .. } => EventKind::ValueDeleted,
            CacheEvent::Expired { .. } => EventKind::ValueExpired,
            CacheEvent::Cleared { .. } => EventKind::AllCleared,
            CacheEvent::Checked { .. } => EventKind::ExistenceChecked,
        }
    }

    /// Key the event refers to, if any.
    pub fn key(&self) -> Option<&str> {
        match self {
            CacheEvent::Hit { key }
            | CacheEvent::Miss { key }
            | CacheEvent::Set { key }
            | CacheEvent::Read { key, .. }
            | CacheEvent::Deleted { key, .. }
            | CacheEvent::Expired { key }
            | CacheEvent::Checked { key, .. } => Some(key),
            CacheEvent::Cleared { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MessageError;

    #[test]
    fn test_outcome_from_option() {
        let hit: Outcome<u32> = Some(7).into();
        let miss: Outcome<u32> = None.into();
        assert!(hit.is_value());
        assert!(matches!(miss, Outcome::NotFound));
        assert_eq!(hit.into_value(), Some(7));
    }

    #[test]
    fn test_outcome_from_result() {
        let failed: Outcome<u32> = Err::<u32, _>(MessageError("down".into())).into();
        match failed {
            Outcome::Failure(cause) => assert_eq!(cause.to_string(), "down"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_event_kind_mapping() {
        let event = CacheEvent::Expired { key: "k".into() };
        assert_eq!(event.kind(), EventKind::ValueExpired);
        assert_eq!(event.key(), Some("k"));
        assert_eq!(CacheEvent::Cleared { removed: 3 }.key(), None);
    }

    #[test]
    fn test_event_serialization() {
        let json = serde_json::to_string(&CacheEvent::Checked {
            key: "a".into(),
            exists: true,
        })
        .unwrap();
        assert_eq!(json, r#"{"event":"checked","key":"a","exists":true}"#);
    }
}
