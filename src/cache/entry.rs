//! Cache Entry Module
//!
//! Defines the structure for individual cache entries with TTL support.

use serde_json::Value;

// == Cache Entry ==
/// Represents a single cache entry with value and metadata.
///
/// Owned by exactly one shard; only copies of `value` leave the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// The stored value
    pub value: Value,
    /// Expiration timestamp (Unix milliseconds), None = no expiration
    pub expires_at: Option<u64>,
    /// Last read or write (Unix milliseconds), drives LRU eviction
    pub last_access: u64,
    /// Estimated footprint of key + value
    pub size_bytes: u64,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates a new cache entry written at `now_ms`.
    ///
    /// # Arguments
    /// * `value` - The value to store
    /// * `ttl_seconds` - TTL in seconds; 0 means the entry never expires
    /// * `now_ms` - Write time in Unix milliseconds
    /// * `size_bytes` - Estimated footprint used for budget accounting
    pub fn new(value: Value, ttl_seconds: u64, now_ms: u64, size_bytes: u64) -> Self {
        Self {
            value,
            expires_at: expiry_for(now_ms, ttl_seconds),
            last_access: now_ms,
            size_bytes,
        }
    }

    // == Is Expired ==
    /// Checks if the entry has expired at `now_ms`.
    ///
    /// An entry is expired once the current time reaches its expiration time.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        match self.expires_at {
            Some(expires) => now_ms >= expires,
            None => false,
        }
    }

    // == Touch ==
    /// Records a read at `now_ms`.
    pub fn touch(&mut self, now_ms: u64) {
        self.last_access = self.last_access.max(now_ms);
    }
}

/// Expiration time for a write at `now_ms` with the given TTL.
pub fn expiry_for(now_ms: u64, ttl_seconds: u64) -> Option<u64> {
    if ttl_seconds == 0 {
        None
    } else {
        Some(now_ms.saturating_add(ttl_seconds.saturating_mul(1000)))
    }
}
