//! Batcher configuration.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::constants::*;
use crate::error::{CoalesceError, Result};

/// Serializable batcher configuration.
///
/// Function hooks (key hasher, normalizer, size estimator) are not part of
/// this struct; they are supplied through the batcher builder.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatcherConfig {
    /// Batch window in milliseconds (0 = next scheduler turn)
    pub window_delay_ms: u64,
    /// Admission limit for the cache store
    pub memory_limit_bytes: usize,
    /// Entry expiration in milliseconds (0 = never)
    pub expiration_ms: u64,
    /// Query fields used to derive the cache key (None = whole query)
    pub cache_key_fields: Option<Vec<String>>,
    /// Flush a batch early once it holds this many distinct keys
    pub max_batch_size: Option<usize>,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            window_delay_ms: DEFAULT_WINDOW_DELAY_MS,
            memory_limit_bytes: DEFAULT_MEMORY_LIMIT_BYTES,
            expiration_ms: DEFAULT_EXPIRATION_MS,
            cache_key_fields: None,
            max_batch_size: None,
        }
    }
}

impl BatcherConfig {
    /// Creates a new default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads configuration from the environment, loading `.env` first.
    ///
    /// Missing variables keep their defaults; unparsable ones are logged and
    /// ignored.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        Self {
            window_delay_ms: env_parse(ENV_WINDOW_MS).unwrap_or(defaults.window_delay_ms),
            memory_limit_bytes: env_parse(ENV_MEMORY_LIMIT_BYTES)
                .unwrap_or(defaults.memory_limit_bytes),
            expiration_ms: env_parse(ENV_EXPIRATION_MS).unwrap_or(defaults.expiration_ms),
            cache_key_fields: std::env::var(ENV_CACHE_KEY_FIELDS)
                .ok()
                .map(|v| parse_fields(&v))
                .filter(|fields| !fields.is_empty()),
            max_batch_size: env_parse(ENV_MAX_BATCH_SIZE),
        }
    }

    /// Sets the batch window.
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window_delay_ms = saturating_millis(window);
        self
    }

    /// Sets the store admission limit.
    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit_bytes = bytes;
        self
    }

    /// Sets the entry expiration.
    pub fn with_expiration(mut self, ttl: Duration) -> Self {
        self.expiration_ms = saturating_millis(ttl);
        self
    }

    /// Restricts key hashing to the given query fields.
    pub fn with_cache_key_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cache_key_fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the maximum number of distinct keys per batch.
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = Some(size);
        self
    }

    /// Batch window as a duration.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_delay_ms)
    }

    /// Entry expiration, if enabled.
    pub fn expiration(&self) -> Option<Duration> {
        (self.expiration_ms > 0).then(|| Duration::from_millis(self.expiration_ms))
    }

    /// Checks the configuration for values that cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.memory_limit_bytes == 0 {
            return Err(CoalesceError::Config(
                "memory_limit_bytes must be greater than zero".into(),
            ));
        }
        if self.max_batch_size == Some(0) {
            return Err(CoalesceError::Config(
                "max_batch_size must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(variable = name, value = %raw, "ignoring unparsable configuration value");
            None
        }
    }
}

fn saturating_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn parse_fields(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(String::from)
        .collect()
}
