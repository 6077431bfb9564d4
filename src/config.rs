//! Configuration Module
//!
//! Engine options are an immutable `CacheConfig` handed to the cache at
//! construction. `Config` wraps it together with server settings and knows how
//! to load both from environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{CacheError, Result};

/// Entry ceiling applied when `paranoia_mode` is on
pub const PARANOIA_MAX_ENTRIES: usize = 10_000;

/// Memory ceiling (MB) applied when `paranoia_mode` is on
pub const PARANOIA_MAX_MEMORY_MB: u64 = 10;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Cache engine configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Default TTL in seconds for entries set without one (0 = no expiry)
    pub ttl_seconds: u64,
    /// Background expiry sweep interval in seconds
    pub cleanup_interval_seconds: u64,
    /// Number of independently locked shards
    pub num_shards: usize,
    /// Entry-count budget of the main table
    pub max_entries: usize,
    /// Memory budget of the main table in MB
    pub max_memory_mb: u64,
    /// Whether mutations are recorded in the write-ahead log
    pub enable_wal: bool,
    /// Directory holding WAL segment files
    pub wal_path: PathBuf,
    /// Size at which the active WAL segment is rotated
    pub wal_max_log_bytes: u64,
    /// fsync each WAL append
    pub wal_sync: bool,
    /// Directory holding snapshot files
    pub snapshot_dir: PathBuf,
    /// Clamp budgets to conservative ceilings
    pub paranoia_mode: bool,
    /// Entry capacity of the overflow table for oversized values (0 disables it)
    pub overflow_max_entries: usize,
    /// Memory budget of the overflow table in MB
    pub overflow_max_mb: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 60,
            cleanup_interval_seconds: 30,
            num_shards: 16,
            max_entries: 100_000,
            max_memory_mb: 100,
            enable_wal: false,
            wal_path: PathBuf::from("./cache_wal"),
            wal_max_log_bytes: 10 * BYTES_PER_MB,
            wal_sync: true,
            snapshot_dir: PathBuf::from("./cache_snapshots"),
            paranoia_mode: false,
            overflow_max_entries: 32,
            overflow_max_mb: 256,
        }
    }
}

impl CacheConfig {
    /// Loads engine options from `CACHE_*` environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_TTL_SECONDS` - Default TTL (default: 60)
    /// - `CACHE_CLEANUP_INTERVAL` - Sweep interval in seconds (default: 30)
    /// - `CACHE_NUM_SHARDS` - Shard count (default: 16)
    /// - `CACHE_MAX_ENTRIES` - Entry budget (default: 100000)
    /// - `CACHE_MAX_MEMORY_MB` - Memory budget (default: 100)
    /// - `CACHE_ENABLE_WAL` - Enable write-ahead logging (default: false)
    /// - `CACHE_WAL_PATH` - WAL directory (default: ./cache_wal)
    /// - `CACHE_SNAPSHOT_DIR` - Snapshot directory (default: ./cache_snapshots)
    /// - `CACHE_PARANOIA_MODE` - Clamp budgets (default: false)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            ttl_seconds: env_or("CACHE_TTL_SECONDS", defaults.ttl_seconds),
            cleanup_interval_seconds: env_or(
                "CACHE_CLEANUP_INTERVAL",
                defaults.cleanup_interval_seconds,
            ),
            num_shards: env_or("CACHE_NUM_SHARDS", defaults.num_shards),
            max_entries: env_or("CACHE_MAX_ENTRIES", defaults.max_entries),
            max_memory_mb: env_or("CACHE_MAX_MEMORY_MB", defaults.max_memory_mb),
            enable_wal: env_or("CACHE_ENABLE_WAL", defaults.enable_wal),
            wal_path: env::var("CACHE_WAL_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.wal_path),
            snapshot_dir: env::var("CACHE_SNAPSHOT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.snapshot_dir),
            paranoia_mode: env_or("CACHE_PARANOIA_MODE", defaults.paranoia_mode),
            ..defaults
        }
    }

    /// Rejects option combinations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.num_shards == 0 {
            return Err(CacheError::Validation(
                "num_shards must be at least 1".to_string(),
            ));
        }
        if self.max_entries == 0 {
            return Err(CacheError::Validation(
                "max_entries must be at least 1".to_string(),
            ));
        }
        if self.max_memory_mb == 0 {
            return Err(CacheError::Validation(
                "max_memory_mb must be at least 1".to_string(),
            ));
        }
        if self.cleanup_interval_seconds == 0 {
            return Err(CacheError::Validation(
                "cleanup_interval_seconds must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Entry budget after the paranoia clamp.
    pub fn effective_max_entries(&self) -> usize {
        if self.paranoia_mode {
            self.max_entries.min(PARANOIA_MAX_ENTRIES)
        } else {
            self.max_entries
        }
    }

    /// Memory budget in bytes after the paranoia clamp.
    pub fn max_memory_bytes(&self) -> u64 {
        let mb = if self.paranoia_mode {
            self.max_memory_mb.min(PARANOIA_MAX_MEMORY_MB)
        } else {
            self.max_memory_mb
        };
        mb.saturating_mul(BYTES_PER_MB)
    }

    /// Memory budget of the overflow table in bytes.
    pub fn overflow_max_bytes(&self) -> u64 {
        self.overflow_max_mb.saturating_mul(BYTES_PER_MB)
    }
}

/// Server configuration parameters.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port
    pub server_port: u16,
    /// Cache engine options
    pub cache: CacheConfig,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// `SERVER_PORT` selects the HTTP port (default: 3000); engine options are
    /// read by [`CacheConfig::from_env`].
    pub fn from_env() -> Self {
        Self {
            server_port: env_or("SERVER_PORT", 3000),
            cache: CacheConfig::from_env(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: 3000,
            cache: CacheConfig::default(),
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
