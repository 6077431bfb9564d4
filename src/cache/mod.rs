//! Cache Module
//!
//! Sharded in-memory cache engine with TTL expiration, global LRU eviction,
//! a write-ahead log and point-in-time snapshots.

mod clock;
mod entry;
mod eviction;
mod health;
mod overflow;
mod persistence;
mod shard;
mod stats;
mod store;
mod validation;
mod wal;


// Re-export public types
pub use clock::{current_timestamp_ms, Clock, ManualClock, SystemClock};
pub use entry::{expiry_for, CacheEntry};
pub use eviction::{EvictionManager, EvictionOutcome, EvictionRequest};
pub use health::{CleanupStatus, HealthReport, HealthStatus};
pub use overflow::OverflowTable;
pub use persistence::{
    PersistenceManager, SnapshotData, SnapshotEntry, SnapshotHandle, SnapshotMetadata,
    SNAPSHOT_VERSION,
};
pub use shard::{shard_for, AllShardsGuard, ShardTable};
pub use stats::{CacheStats, StatsCounters};
pub use store::{CounterCheck, ReplayReport, RestoreReport, ShardedCache};
pub use validation::{entry_size, estimate_size, validate_key, validate_ttl, validate_value};
pub use wal::{WalContents, WalOp, WalRecord, WalWrite, WriteAheadLog};

// == Public Constants ==
/// Maximum allowed key length in characters
pub const MAX_KEY_LENGTH: usize = 1000;

/// Maximum allowed TTL in seconds (one year)
pub const MAX_TTL_SECONDS: u64 = 31_536_000;
