//! API Handlers
//!
//! HTTP request handlers for each cache server endpoint. Handlers only
//! translate between JSON bodies and `ShardedCache` calls.

use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::cache::{CacheStats, HealthReport, ShardedCache};
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::models::{
    ClearResponse, DeleteResponse, GetResponse, PruneSnapshotsRequest, PruneSnapshotsResponse,
    RestoreRequest, RestoreResponse, SetRequest, SetResponse, SnapshotListResponse,
    SnapshotResponse,
};

/// Application state shared across all handlers.
///
/// `ShardedCache` is a cheap handle over shared state and does its own
/// per-shard locking, so no outer lock is needed.
#[derive(Clone)]
pub struct AppState {
    pub cache: ShardedCache,
}

impl AppState {
    /// Creates a new AppState around an existing cache.
    pub fn new(cache: ShardedCache) -> Self {
        Self { cache }
    }

    /// Creates a new AppState from configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let cache = ShardedCache::new(config.cache.clone())?;
        Ok(Self::new(cache))
    }
}

/// Handler for PUT /set
///
/// Stores a JSON value in the cache with optional TTL.
pub async fn set_handler(
    State(state): State<AppState>,
    Json(req): Json<SetRequest>,
) -> Result<Json<SetResponse>> {
    state.cache.set(&req.key, req.value, req.ttl).await?;
    Ok(Json(SetResponse::new(req.key)))
}

/// Handler for GET /get/:key
///
/// Absent and expired keys answer 404.
pub async fn get_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<GetResponse>> {
    match state.cache.get(&key).await? {
        Some(value) => Ok(Json(GetResponse::new(key, value))),
        None => Err(CacheError::NotFound(format!("Key '{}' not found", key))),
    }
}

/// Handler for DELETE /del/:key
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<DeleteResponse>> {
    if !state.cache.delete(&key).await? {
        return Err(CacheError::NotFound(format!("Key '{}' not found", key)));
    }
    Ok(Json(DeleteResponse::new(key)))
}

/// Handler for POST /clear
pub async fn clear_handler(State(state): State<AppState>) -> Result<Json<ClearResponse>> {
    state.cache.clear().await?;
    Ok(Json(ClearResponse::new()))
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Result<Json<CacheStats>> {
    Ok(Json(state.cache.stats().await?))
}

/// Handler for GET /health
///
/// Answers 503 with the full report when the cache is critical.
pub async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let report = state.cache.health_check().await;
    let status = if report.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

/// Handler for POST /snapshot
pub async fn snapshot_handler(State(state): State<AppState>) -> Result<Json<SnapshotResponse>> {
    let handle = state.cache.snapshot().await?;
    Ok(Json(SnapshotResponse::new(handle)))
}

/// Handler for POST /restore
///
/// The snapshot is named by file name; paths outside the snapshot directory
/// are rejected.
pub async fn restore_handler(
    State(state): State<AppState>,
    Json(req): Json<RestoreRequest>,
) -> Result<Json<RestoreResponse>> {
    let report = state.cache.restore_named(&req.snapshot).await?;
    Ok(Json(RestoreResponse::new(&req.snapshot, report)))
}

/// Handler for GET /snapshots
pub async fn list_snapshots_handler(
    State(state): State<AppState>,
) -> Result<Json<SnapshotListResponse>> {
    let snapshots = state.cache.list_snapshots().await?;
    Ok(Json(SnapshotListResponse { snapshots }))
}

/// Handler for POST /snapshots/cleanup
pub async fn prune_snapshots_handler(
    State(state): State<AppState>,
    Json(req): Json<PruneSnapshotsRequest>,
) -> Result<Json<PruneSnapshotsResponse>> {
    let removed = state
        .cache
        .cleanup_old_snapshots(Duration::from_secs(req.max_age_seconds))
        .await?;
    Ok(Json(PruneSnapshotsResponse { removed }))
}
