//! API Routes
//!
//! Configures the Axum router with all cache server endpoints.

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    clear_handler, delete_handler, get_handler, health_handler, list_snapshots_handler,
    prune_snapshots_handler, restore_handler, set_handler, snapshot_handler, stats_handler,
    AppState,
};

/// Creates the main router with all endpoints configured.
///
/// # Middleware
/// - CORS: Allows any origin
/// - Tracing: Logs all requests
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/set", put(set_handler))
        .route("/get/:key", get(get_handler))
        .route("/del/:key", delete(delete_handler))
        .route("/clear", post(clear_handler))
        .route("/stats", get(stats_handler))
        .route("/health", get(health_handler))
        .route("/snapshot", post(snapshot_handler))
        .route("/restore", post(restore_handler))
        .route("/snapshots", get(list_snapshots_handler))
        .route("/snapshots/cleanup", post(prune_snapshots_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ShardedCache;
    use crate::config::CacheConfig;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tempfile::TempDir;
    use tower::util::ServiceExt;

    fn create_test_app(dir: &TempDir) -> Router {
        let config = CacheConfig {
            snapshot_dir: dir.path().to_path_buf(),
            ..CacheConfig::default()
        };
        create_router(AppState::new(ShardedCache::new(config).unwrap()))
    }

    async fn send(app: Router, method: &str, uri: &str, body: Option<&str>) -> StatusCode {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        app.oneshot(request).await.unwrap().status()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let dir = TempDir::new().unwrap();
        let status = send(create_test_app(&dir), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_stats_endpoint() {
        let dir = TempDir::new().unwrap();
        let status = send(create_test_app(&dir), "GET", "/stats", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_set_endpoint() {
        let dir = TempDir::new().unwrap();
        let status = send(
            create_test_app(&dir),
            "PUT",
            "/set",
            Some(r#"{"key":"test","value":{"hello":"world"}}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_set_null_value_rejected() {
        let dir = TempDir::new().unwrap();
        let status = send(
            create_test_app(&dir),
            "PUT",
            "/set",
            Some(r#"{"key":"test","value":null}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_get_not_found() {
        let dir = TempDir::new().unwrap();
        let status = send(create_test_app(&dir), "GET", "/get/nonexistent", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_clear_endpoint() {
        let dir = TempDir::new().unwrap();
        let status = send(create_test_app(&dir), "POST", "/clear", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_snapshot_endpoints() {
        let dir = TempDir::new().unwrap();
        let app = create_test_app(&dir);

        let status = send(app.clone(), "POST", "/snapshot", None).await;
        assert_eq!(status, StatusCode::OK);

        let status = send(app.clone(), "GET", "/snapshots", None).await;
        assert_eq!(status, StatusCode::OK);

        let status = send(
            app,
            "POST",
            "/restore",
            Some(r#"{"snapshot":"../etc/passwd"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
