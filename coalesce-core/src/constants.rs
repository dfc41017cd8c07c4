//! Defaults and environment variable names.

// ═══════════════════════════════════════════════════════════════════════════════
// DEFAULTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Default batch window in milliseconds. Zero means "next scheduler turn".
pub const DEFAULT_WINDOW_DELAY_MS: u64 = 0;

/// Default admission limit for the cache store (1 GiB).
pub const DEFAULT_MEMORY_LIMIT_BYTES: usize = 1 << 30;

/// Default entry expiration in milliseconds. Zero means entries never expire.
pub const DEFAULT_EXPIRATION_MS: u64 = 0;

// ═══════════════════════════════════════════════════════════════════════════════
// ENVIRONMENT
// ═══════════════════════════════════════════════════════════════════════════════

/// Batch window in milliseconds.
pub const ENV_WINDOW_MS: &str = "COALESCE_WINDOW_MS";

/// Store admission limit in bytes.
pub const ENV_MEMORY_LIMIT_BYTES: &str = "COALESCE_MEMORY_LIMIT_BYTES";

/// Entry expiration in milliseconds.
pub const ENV_EXPIRATION_MS: &str = "COALESCE_EXPIRATION_MS";

/// Comma separated list of query fields used for key hashing.
pub const ENV_CACHE_KEY_FIELDS: &str = "COALESCE_CACHE_KEY_FIELDS";

/// Maximum number of distinct keys per batch.
pub const ENV_MAX_BATCH_SIZE: &str = "COALESCE_MAX_BATCH_SIZE";
