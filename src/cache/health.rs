//! Health Report Module
//!
//! Types describing the outcome of `ShardedCache::health_check`.

use chrono::{DateTime, Utc};
use serde::Serialize;

// == Health Status ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Critical,
}

// == Cleanup Status ==
/// Liveness of the background expiry task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupStatus {
    NotStarted,
    Running,
    Stopped,
    /// The most recent sweep panicked
    Failed,
}

// == Health Report ==
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub size: u64,
    pub bytes_used: u64,
    pub num_shards: usize,
    pub shard_distribution: Vec<usize>,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_rate: f64,
    pub cleanup_status: CleanupStatus,
    /// Sweeps completed by the background task, successful or not
    pub cleanup_cycles: u64,
    /// Entries removed by background sweeps
    pub cleanup_removed: u64,
    /// Running totals agree with a full scan
    pub counters_consistent: bool,
    pub wal_enabled: bool,
    /// Last WAL append failed
    pub wal_degraded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Combines the individual checks into one status.
///
/// Any probe error, a failed sweep or a degraded WAL is critical.
pub fn overall_status(
    probe_error: Option<&str>,
    cleanup: CleanupStatus,
    wal_degraded: bool,
) -> HealthStatus {
    if probe_error.is_some() || cleanup == CleanupStatus::Failed || wal_degraded {
        HealthStatus::Critical
    } else {
        HealthStatus::Healthy
    }
}
