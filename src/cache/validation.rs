//! Input Validation and Size Estimation
//!
//! Every mutation passes through here before it touches the WAL or a shard.

use serde_json::Value;

use crate::cache::{MAX_KEY_LENGTH, MAX_TTL_SECONDS};
use crate::error::{CacheError, Result};

/// Fixed per-node cost charged for every JSON node.
const NODE_OVERHEAD: u64 = std::mem::size_of::<Value>() as u64;

// == Validate Key ==
/// Validates a cache key and returns an owned copy.
///
/// Rejects empty keys, keys longer than [`MAX_KEY_LENGTH`] characters and keys
/// containing control characters (NUL, CR, LF, ...).
pub fn validate_key(key: &str) -> Result<String> {
    if key.is_empty() {
        return Err(CacheError::Validation("Cache key cannot be empty".to_string()));
    }

    let length = key.chars().count();
    if length > MAX_KEY_LENGTH {
        return Err(CacheError::Validation(format!(
            "Cache key too long: {} characters (max {})",
            length, MAX_KEY_LENGTH
        )));
    }

    if key.chars().any(char::is_control) {
        return Err(CacheError::Validation(
            "Cache key cannot contain control characters".to_string(),
        ));
    }

    Ok(key.to_string())
}

// == Validate Value ==
/// Rejects values the cache cannot distinguish from "absent".
pub fn validate_value(value: &Value) -> Result<()> {
    if value.is_null() {
        return Err(CacheError::Validation(
            "Cache value cannot be null".to_string(),
        ));
    }
    Ok(())
}

// == Validate TTL ==
/// Resolves the effective TTL, falling back to `default_ttl` when none is given.
pub fn validate_ttl(ttl_seconds: Option<u64>, default_ttl: u64) -> Result<u64> {
    let ttl = ttl_seconds.unwrap_or(default_ttl);
    if ttl > MAX_TTL_SECONDS {
        return Err(CacheError::Validation(format!(
            "TTL too large: {} seconds (max {})",
            ttl, MAX_TTL_SECONDS
        )));
    }
    Ok(ttl)
}

// == Estimate Size ==
/// Estimates the in-memory footprint of a value.
///
/// Walks arrays and objects with an explicit work stack, so arbitrarily deep
/// values cannot overflow the call stack. JSON values are owned trees, so a
/// node can never be reached twice and no visited set is needed.
/// The figure is advisory and only used for budget accounting.
pub fn estimate_size(value: &Value) -> u64 {
    let mut total: u64 = 0;
    let mut stack: Vec<&Value> = vec![value];

    while let Some(node) = stack.pop() {
        total = total.saturating_add(NODE_OVERHEAD);
        match node {
            Value::String(s) => total = total.saturating_add(s.len() as u64),
            Value::Array(items) => stack.extend(items.iter()),
            Value::Object(map) => {
                for (k, v) in map {
                    total = total.saturating_add(k.len() as u64);
                    stack.push(v);
                }
            }
            Value::Null | Value::Bool(_) | Value::Number(_) => {}
        }
    }

    total
}

/// Footprint charged to an entry: key bytes plus estimated value size.
pub fn entry_size(key: &str, value: &Value) -> u64 {
    (key.len() as u64).saturating_add(estimate_size(value))
}
