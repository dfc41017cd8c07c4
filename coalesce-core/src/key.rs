//! Cache key derivation.
//!
//! A query is serialized to JSON, optionally projected onto a subset of its
//! fields, written out in canonical form (object keys sorted) and hashed with
//! SHA3-256. Two queries that differ only in field order map to the same key.

use std::fmt::Write as _;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use sha3::{Digest, Sha3_256};

use crate::error::{cause, CoalesceError, Result};

/// Maps a (normalized, projected) query to its cache key.
pub type KeyHasher = Arc<dyn Fn(&Value) -> String + Send + Sync>;

/// Default hasher: hex encoded SHA3-256 of the canonical JSON text.
pub fn sha3_hasher() -> KeyHasher {
    Arc::new(|value: &Value| {
        let digest = Sha3_256::digest(canonical_json(value).as_bytes());
        hex::encode(digest)
    })
}

/// Hasher that uses the canonical JSON text itself as the key.
///
/// String queries map to their bare contents, which keeps keys readable.
pub fn plain_hasher() -> KeyHasher {
    Arc::new(|value: &Value| match value {
        Value::String(s) => s.clone(),
        other => canonical_json(other),
    })
}

/// Serializes a query for hashing and error reporting.
///
/// A query that cannot be serialized has no cache key; the error carries an
/// empty key and names the query type instead.
pub fn query_to_value<Q: Serialize>(query: &Q) -> Result<Value> {
    serde_json::to_value(query).map_err(|e| CoalesceError::Cache {
        key: String::new(),
        query: None,
        message: format!(
            "query of type {} is not serializable",
            std::any::type_name::<Q>()
        ),
        cause: Some(cause(e)),
    })
}

/// Keeps only `fields` of an object query. Non-object queries pass through.
pub fn project(value: &Value, fields: &[String]) -> Value {
    match value {
        Value::Object(map) => {
            let projected: Map<String, Value> = fields
                .iter()
                .filter_map(|f| map.get(f).map(|v| (f.clone(), v.clone())))
                .collect();
            Value::Object(projected)
        }
        other => other.clone(),
    }
}

/// Derives the cache key of a serialized query.
pub fn derive_key(value: &Value, fields: Option<&[String]>, hasher: &KeyHasher) -> String {
    match fields {
        Some(fields) if !fields.is_empty() => hasher(&project(value, fields)),
        _ => hasher(value),
    }
}

/// Canonical JSON text: object keys sorted, no insignificant whitespace.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, k) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Strings always serialize.
                let _ = write!(out, "{}", Value::String(k.clone()));
                out.push(':');
                write_canonical(&map[k], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => {
            let _ = write!(out, "{scalar}");
        }
    }
}
