//! Error types for the cache engine
//!
//! Provides unified error handling using thiserror.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::models::ErrorResponse;

// == Cache Error Enum ==
/// Unified error type for the cache engine and its HTTP adapter.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Malformed key, value, TTL or configuration. Never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A single value that cannot fit even after maximal eviction
    #[error("Capacity error: {0}")]
    Capacity(String),

    /// The write-ahead log could not record a mutation
    #[error("Durability error: {0}")]
    Durability(String),

    /// Snapshot could not be written, read or parsed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Key or snapshot not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Unexpected failure inside a background cycle
    #[error("Internal error: {0}")]
    Internal(String),
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::Validation(_) => StatusCode::BAD_REQUEST,
            CacheError::NotFound(_) => StatusCode::NOT_FOUND,
            CacheError::Capacity(_) => StatusCode::INSUFFICIENT_STORAGE,
            CacheError::Durability(_) => StatusCode::SERVICE_UNAVAILABLE,
            CacheError::Persistence(_) | CacheError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(ErrorResponse::new(self.to_string()));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache engine.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (CacheError::Validation("k".into()), StatusCode::BAD_REQUEST),
            (CacheError::NotFound("k".into()), StatusCode::NOT_FOUND),
            (
                CacheError::Capacity("k".into()),
                StatusCode::INSUFFICIENT_STORAGE,
            ),
            (
                CacheError::Durability("k".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                CacheError::Internal("k".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }

    #[test]
    fn test_display_includes_context() {
        let err = CacheError::Durability("disk full".to_string());
        assert_eq!(err.to_string(), "Durability error: disk full");
    }
}
