//! Shard Cache - a sharded in-memory TTL cache server
//!
//! Boots the cache engine from environment configuration and serves it over HTTP.

use std::net::SocketAddr;

use anyhow::Context;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shard_cache::api::{create_router, AppState};
use shard_cache::Config;

/// Main entry point for the cache server.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Create the cache, replay the WAL and start the expiry task
/// 4. Serve the router on the configured port
/// 5. On SIGINT/SIGTERM, drain requests and stop the expiry task
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shard_cache=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Shard Cache Server");

    let config = Config::from_env();
    info!(
        port = config.server_port,
        num_shards = config.cache.num_shards,
        max_entries = config.cache.effective_max_entries(),
        max_memory_mb = config.cache.max_memory_mb,
        ttl_seconds = config.cache.ttl_seconds,
        cleanup_interval = config.cache.cleanup_interval_seconds,
        wal = config.cache.enable_wal,
        "Configuration loaded"
    );

    let state = AppState::from_config(&config).context("invalid cache configuration")?;
    let replay = state
        .cache
        .start()
        .await
        .context("cache startup failed")?;
    info!(
        applied = replay.applied,
        skipped_corrupt = replay.skipped_corrupt,
        entries = state.cache.size(),
        "Cache started"
    );

    let cache = state.cache.clone();
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    if let Err(e) = cache.shutdown().await {
        error!(error = %e, "Cache shutdown failed");
    }
    info!("Server shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
