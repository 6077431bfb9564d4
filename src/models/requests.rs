//! Request DTOs for the cache server API
//!
//! Defines the structure of incoming HTTP request bodies. Field-level
//! validation happens in the cache engine so every entry point shares it.

use serde::Deserialize;
use serde_json::Value;

/// Request body for the SET operation (PUT /set)
///
/// # Fields
/// - `key`: The cache key to store the value under
/// - `value`: Any JSON value except `null`
/// - `ttl`: Optional TTL in seconds (uses default if not specified, 0 = no expiry)
#[derive(Debug, Clone, Deserialize)]
pub struct SetRequest {
    /// The cache key
    pub key: String,
    /// The value to store
    pub value: Value,
    /// Optional TTL in seconds
    #[serde(default)]
    pub ttl: Option<u64>,
}

/// Request body for POST /restore
#[derive(Debug, Clone, Deserialize)]
pub struct RestoreRequest {
    /// File name of a snapshot in the snapshot directory
    pub snapshot: String,
}

/// Request body for POST /snapshots/cleanup
#[derive(Debug, Clone, Deserialize)]
pub struct PruneSnapshotsRequest {
    /// Snapshots older than this are deleted
    pub max_age_seconds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_request_deserialize() {
        let json = r#"{"key": "test", "value": "hello"}"#;
        let req: SetRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.key, "test");
        assert_eq!(req.value, json!("hello"));
        assert!(req.ttl.is_none());
    }

    #[test]
    fn test_set_request_with_ttl_and_object_value() {
        let json = r#"{"key": "test", "value": {"nested": [1, 2]}, "ttl": 60}"#;
        let req: SetRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.ttl, Some(60));
        assert_eq!(req.value, json!({"nested": [1, 2]}));
    }

    #[test]
    fn test_set_request_requires_value() {
        let json = r#"{"key": "test"}"#;
        assert!(serde_json::from_str::<SetRequest>(json).is_err());
    }

    #[test]
    fn test_restore_request_deserialize() {
        let json = r#"{"snapshot": "cache_snapshot_1_0.json"}"#;
        let req: RestoreRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.snapshot, "cache_snapshot_1_0.json");
    }
}
