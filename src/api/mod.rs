//! API Module
//!
//! HTTP handlers and routing for the cache server REST API.
//!
//! # Endpoints
//! - `PUT /set` - Store a JSON value under a key
//! - `GET /get/:key` - Retrieve a value by key
//! - `DELETE /del/:key` - Delete a key
//! - `POST /clear` - Remove every entry
//! - `GET /stats` - Cache statistics
//! - `GET /health` - Health check endpoint
//! - `POST /snapshot` - Write a snapshot
//! - `POST /restore` - Restore a snapshot by file name
//! - `GET /snapshots` - List snapshots
//! - `POST /snapshots/cleanup` - Delete old snapshots

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
