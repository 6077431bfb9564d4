//! Response DTOs for the cache server API
//!
//! Defines the structure of outgoing HTTP response bodies. Stats and health
//! bodies are the engine's own `CacheStats` and `HealthReport`.

use serde::Serialize;
use serde_json::Value;

use crate::cache::{RestoreReport, SnapshotHandle};

/// Response body for the GET operation (GET /get/:key)
#[derive(Debug, Clone, Serialize)]
pub struct GetResponse {
    /// The requested key
    pub key: String,
    /// The stored value
    pub value: Value,
}

impl GetResponse {
    /// Creates a new GetResponse
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// Response body for the SET operation (PUT /set)
#[derive(Debug, Clone, Serialize)]
pub struct SetResponse {
    /// Success message
    pub message: String,
    /// The key that was set
    pub key: String,
}

impl SetResponse {
    /// Creates a new SetResponse
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' set successfully", key),
            key,
        }
    }
}

/// Response body for the DELETE operation (DELETE /del/:key)
#[derive(Debug, Clone, Serialize)]
pub struct DeleteResponse {
    /// Success message
    pub message: String,
    /// The key that was deleted
    pub key: String,
}

impl DeleteResponse {
    /// Creates a new DeleteResponse
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' deleted successfully", key),
            key,
        }
    }
}

/// Response body for POST /clear
#[derive(Debug, Clone, Serialize)]
pub struct ClearResponse {
    pub message: String,
}

impl ClearResponse {
    pub fn new() -> Self {
        Self {
            message: "Cache cleared".to_string(),
        }
    }
}

impl Default for ClearResponse {
    fn default() -> Self {
        Self::new()
    }
}

/// Response body for POST /snapshot
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotResponse {
    pub message: String,
    pub snapshot: SnapshotHandle,
}

impl SnapshotResponse {
    pub fn new(snapshot: SnapshotHandle) -> Self {
        Self {
            message: format!(
                "Snapshot '{}' created with {} entries",
                snapshot.file_name, snapshot.total_entries
            ),
            snapshot,
        }
    }
}

/// Response body for POST /restore
#[derive(Debug, Clone, Serialize)]
pub struct RestoreResponse {
    pub message: String,
    #[serde(flatten)]
    pub report: RestoreReport,
}

impl RestoreResponse {
    pub fn new(snapshot: &str, report: RestoreReport) -> Self {
        Self {
            message: format!("Restored {} entries from '{}'", report.restored, snapshot),
            report,
        }
    }
}

/// Response body for GET /snapshots
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotListResponse {
    /// Newest first
    pub snapshots: Vec<SnapshotHandle>,
}

/// Response body for POST /snapshots/cleanup
#[derive(Debug, Clone, Serialize)]
pub struct PruneSnapshotsResponse {
    pub removed: usize,
}

/// Error response body for all error conditions
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error message describing what went wrong
    pub error: String,
}

impl ErrorResponse {
    /// Creates a new ErrorResponse
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_response_serialize() {
        let resp = GetResponse::new("test_key", json!({"a": 1}));
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["key"], "test_key");
        assert_eq!(json["value"], json!({"a": 1}));
    }

    #[test]
    fn test_set_response_serialize() {
        let resp = SetResponse::new("my_key");
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("my_key"));
        assert!(json.contains("successfully"));
    }

    #[test]
    fn test_delete_response_serialize() {
        let resp = DeleteResponse::new("deleted_key");
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("deleted_key"));
        assert!(json.contains("deleted"));
    }

    #[test]
    fn test_restore_response_flattens_report() {
        let report = RestoreReport {
            restored: 3,
            skipped_expired: 1,
            evicted: 0,
        };
        let json = serde_json::to_value(RestoreResponse::new("snap.json", report)).unwrap();
        assert_eq!(json["restored"], 3);
        assert_eq!(json["skipped_expired"], 1);
        assert!(json["message"].as_str().unwrap().contains("snap.json"));
    }

    #[test]
    fn test_error_response_serialize() {
        let resp = ErrorResponse::new("Something went wrong");
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("error"));
        assert!(json.contains("Something went wrong"));
    }
}
