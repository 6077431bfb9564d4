//! Shard Cache - a sharded in-memory TTL cache
//!
//! Per-shard locking, global LRU eviction under entry and byte budgets, an
//! optional write-ahead log with lazy replay, and JSON snapshots. A thin axum
//! adapter exposes the engine over HTTP.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod tasks;

pub use api::AppState;
pub use cache::ShardedCache;
pub use config::{CacheConfig, Config};
pub use error::{CacheError, Result};
