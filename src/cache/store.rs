//! Cache Store Module
//!
//! `ShardedCache` is the public face of the engine. Every mutation runs
//! validation → eviction → WAL append → shard mutation → counter update, in
//! that order. Reads and deletes touch exactly one shard.
//!
//! Lock order, outermost first: shard lock(s) → WAL → overflow table.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, error, info, warn};

use crate::cache::eviction::{EvictionManager, EvictionOutcome, EvictionRequest};
use crate::cache::health::{overall_status, HealthReport};
use crate::cache::overflow::OverflowTable;
use crate::cache::persistence::{PersistenceManager, SnapshotData, SnapshotEntry, SnapshotHandle};
use crate::cache::shard::{AllShardsGuard, ShardTable};
use crate::cache::stats::{hot_shards, CacheStats, StatsCounters};
use crate::cache::validation::{entry_size, validate_key, validate_ttl, validate_value};
use crate::cache::wal::{WalOp, WalWrite, WriteAheadLog};
use crate::cache::{expiry_for, CacheEntry, Clock, SystemClock};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::tasks::{spawn_cleanup_task, CleanupHandle, CleanupMonitor, ExpirySweeper};

/// TTL given to the health probe key.
const PROBE_TTL_SECONDS: u64 = 60;

// == Reports ==
/// Outcome of replaying the WAL at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    /// Records applied to the table
    pub applied: usize,
    /// Records dropped because they were torn, corrupt or out of order
    pub skipped_corrupt: usize,
    /// Well-formed records the table refused
    pub rejected: usize,
}

/// Outcome of restoring a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    pub restored: u64,
    /// Entries whose expiry had already passed
    pub skipped_expired: u64,
    /// Entries evicted to fit the current budgets
    pub evicted: u64,
}

/// Running totals compared against a full scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CounterCheck {
    pub consistent: bool,
    pub running_entries: u64,
    pub running_bytes: u64,
    pub scanned_entries: u64,
    pub scanned_bytes: u64,
}

// == Cache Core ==
struct CacheCore {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    table: ShardTable,
    eviction: EvictionManager,
    overflow: OverflowTable,
    wal: Option<WriteAheadLog>,
    wal_degraded: AtomicBool,
    persistence: PersistenceManager,
    stats: StatsCounters,
    started: OnceCell<ReplayReport>,
    cleanup: Mutex<Option<CleanupHandle>>,
    monitor: Arc<CleanupMonitor>,
    probes: AtomicU64,
}

// == Sharded Cache ==
/// Sharded, TTL-aware, write-ahead-logged in-memory cache.
///
/// Cloning is cheap and every clone shares the same state. The first async
/// call (or [`start`](Self::start)) replays the WAL and starts the background
/// expiry task, exactly once.
#[derive(Clone)]
pub struct ShardedCache {
    core: Arc<CacheCore>,
}

impl std::fmt::Debug for ShardedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardedCache")
            .field("num_shards", &self.core.table.num_shards())
            .field("entries", &self.size())
            .field("bytes_used", &self.bytes_used())
            .finish()
    }
}

impl ShardedCache {
    // == Constructor ==
    /// Creates a cache using wall-clock time.
    pub fn new(config: CacheConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates a cache reading time from `clock`.
    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        let wal = config.enable_wal.then(|| {
            WriteAheadLog::new(&config.wal_path, config.wal_max_log_bytes, config.wal_sync)
        });
        let core = CacheCore {
            table: ShardTable::new(config.num_shards),
            eviction: EvictionManager::new(
                config.effective_max_entries(),
                config.max_memory_bytes(),
            ),
            overflow: OverflowTable::new(config.overflow_max_entries, config.overflow_max_bytes()),
            wal,
            wal_degraded: AtomicBool::new(false),
            persistence: PersistenceManager::new(&config.snapshot_dir),
            stats: StatsCounters::new(),
            started: OnceCell::new(),
            cleanup: Mutex::new(None),
            monitor: Arc::new(CleanupMonitor::new()),
            probes: AtomicU64::new(0),
            clock,
            config,
        };

        debug!(
            num_shards = core.table.num_shards(),
            max_entries = core.eviction.max_entries(),
            max_memory_bytes = core.eviction.max_memory_bytes(),
            wal = core.wal.is_some(),
            "Cache created"
        );
        Ok(Self {
            core: Arc::new(core),
        })
    }

    // == Start ==
    /// Replays the WAL and starts the background expiry task if that has not
    /// happened yet. Returns the replay outcome.
    pub async fn start(&self) -> Result<ReplayReport> {
        self.ensure_started().await.cloned()
    }

    async fn ensure_started(&self) -> Result<&ReplayReport> {
        self.core
            .started
            .get_or_try_init(|| async {
                let report = self.core.replay_wal().await?;
                let handle = spawn_cleanup_task(
                    Arc::downgrade(&self.core),
                    Duration::from_secs(self.core.config.cleanup_interval_seconds),
                    self.core.monitor.clone(),
                );
                *self.core.cleanup.lock().await = Some(handle);
                Ok::<_, CacheError>(report)
            })
            .await
    }

    // == Get ==
    /// Returns a copy of the value stored under `key`, or `None`.
    ///
    /// An expired entry is removed on access and reported as absent. A hit
    /// refreshes the entry's last access time.
    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.ensure_started().await?;
        let key = validate_key(key)?;
        Ok(self.core.get(&key).await)
    }

    // == Set ==
    /// Stores `value` under `key`.
    ///
    /// # Arguments
    /// * `key` - Non-empty, at most 1000 characters, no control characters
    /// * `value` - Any JSON value except `null`
    /// * `ttl_seconds` - TTL in seconds (cache default if `None`, 0 = no expiry)
    pub async fn set(&self, key: &str, value: Value, ttl_seconds: Option<u64>) -> Result<()> {
        self.ensure_started().await?;
        let key = validate_key(key)?;
        validate_value(&value)?;
        let ttl = validate_ttl(ttl_seconds, self.core.config.ttl_seconds)?;

        let now = self.core.clock.now_ms();
        let size = entry_size(&key, &value);
        let entry = CacheEntry::new(value, ttl, now, size);
        self.core.store(key, entry, Some(ttl), now).await?;
        self.core.stats.record_set();
        Ok(())
    }

    // == Delete ==
    /// Removes `key`. Returns true if an entry was removed.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.ensure_started().await?;
        let key = validate_key(key)?;
        let removed = self.core.remove(&key, true).await?;
        if removed {
            self.core.stats.record_delete();
        }
        Ok(removed)
    }

    // == Clear ==
    /// Removes every entry from both tables.
    pub async fn clear(&self) -> Result<()> {
        self.ensure_started().await?;
        let removed = self.core.clear(true).await?;
        info!(removed, "Cache cleared");
        Ok(())
    }

    // == Keys ==
    /// Every live key in either table, sorted. Takes all shard locks at once.
    pub async fn keys(&self) -> Result<Vec<String>> {
        self.ensure_started().await?;
        let now = self.core.clock.now_ms();
        let mut keys: Vec<String> = {
            let all = self.core.table.lock_all().await;
            let mut keys: Vec<String> = all
                .shards()
                .flat_map(|(_, shard)| {
                    shard
                        .iter()
                        .filter(|(_, entry)| !entry.is_expired(now))
                        .map(|(key, _)| key.clone())
                })
                .collect();
            keys.extend(self.core.overflow.live_keys(now).await);
            keys
        };
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    // == Size ==
    /// Entries in the main table. O(1); does not trigger replay.
    pub fn size(&self) -> u64 {
        self.core.table.entry_count()
    }

    /// Estimated bytes held by the main table. O(1); does not trigger replay.
    pub fn bytes_used(&self) -> u64 {
        self.core.table.memory_bytes()
    }

    pub fn num_shards(&self) -> usize {
        self.core.table.num_shards()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.core.config
    }

    /// True while the most recent WAL append has failed.
    pub fn is_wal_degraded(&self) -> bool {
        self.core.wal_degraded.load(Ordering::Acquire)
    }

    // == Snapshot ==
    /// Captures the main table and writes it to the snapshot directory.
    ///
    /// Every shard is locked only while the entries are copied; the file is
    /// written afterwards. The WAL is not touched.
    pub async fn snapshot(&self) -> Result<SnapshotHandle> {
        self.ensure_started().await?;
        let now = self.core.clock.now_ms();

        let data = {
            let all = self.core.table.lock_all().await;
            let shards = all
                .shards()
                .map(|(index, shard)| {
                    let entries = shard
                        .iter()
                        .map(|(key, entry)| (key.clone(), SnapshotEntry::from(entry)))
                        .collect::<BTreeMap<_, _>>();
                    (index, entries)
                })
                .collect();
            SnapshotData::new(now, shards)
        };

        self.core.persistence.save(&data).await
    }

    // == Restore ==
    /// Replaces the whole table with the contents of a snapshot.
    ///
    /// The table is cleared first (logged as a CLEAR when the WAL is on), then
    /// refilled directly with each entry's captured expiry and last access,
    /// without further WAL records. Entries that have already expired are
    /// skipped.
    pub async fn restore(&self, handle: &SnapshotHandle) -> Result<RestoreReport> {
        self.ensure_started().await?;
        let core = &self.core;
        let now = core.clock.now_ms();
        let data = core.persistence.load(&handle.path, now).await?;

        let mut report = RestoreReport::default();
        {
            let mut all = core.table.lock_all().await;
            core.log(WalWrite::clear(), now).await?;
            core.clear_locked(&mut all).await;

            let (mut count, mut bytes) = (0u64, 0u64);
            for (key, entry) in data.into_entries() {
                let entry = CacheEntry::from(entry);
                if entry.is_expired(now) {
                    report.skipped_expired += 1;
                    continue;
                }
                let size = entry.size_bytes;
                // the shard index in the file is informational
                let index = core.table.index_of(&key);
                match all.shard_mut(index).insert(key, entry) {
                    Some(old) => bytes = bytes.saturating_sub(old.size_bytes),
                    None => count += 1,
                }
                bytes += size;
                report.restored += 1;
            }
            core.table.store_totals(&all, count, bytes);

            let outcome =
                core.eviction
                    .evict_locked(&core.table, &mut all, EvictionRequest::trim(), now);
            core.record_eviction(&outcome);
            report.evicted = outcome.evicted;
        }

        info!(
            path = %handle.path.display(),
            restored = report.restored,
            skipped_expired = report.skipped_expired,
            evicted = report.evicted,
            "Snapshot restored"
        );
        Ok(report)
    }

    /// Restores the snapshot with the given file name from the snapshot directory.
    pub async fn restore_named(&self, file_name: &str) -> Result<RestoreReport> {
        let handle = self.core.persistence.resolve(file_name).await?;
        self.restore(&handle).await
    }

    /// Snapshots in the snapshot directory, newest first.
    pub async fn list_snapshots(&self) -> Result<Vec<SnapshotHandle>> {
        self.core.persistence.list_snapshots().await
    }

    /// Deletes snapshots older than `max_age`. Returns how many were removed.
    pub async fn cleanup_old_snapshots(&self, max_age: Duration) -> Result<usize> {
        let now = self.core.clock.now_ms();
        self.core
            .persistence
            .cleanup_old_snapshots(max_age, now)
            .await
    }

    // == Replay Hooks ==
    /// Applies a logged SET without logging it again.
    ///
    /// Expiry is computed from the record's `timestamp_ms`; a record whose
    /// expiry has already passed removes the key instead.
    pub async fn apply_wal_set(
        &self,
        key: &str,
        value: Value,
        ttl_seconds: u64,
        timestamp_ms: u64,
    ) -> Result<()> {
        self.core
            .apply_wal_set(key, value, ttl_seconds, timestamp_ms)
            .await
    }

    /// Applies a logged DELETE without logging it again.
    pub async fn apply_wal_delete(&self, key: &str) -> Result<bool> {
        let key = validate_key(key)?;
        self.core.remove(&key, false).await
    }

    /// Applies a logged CLEAR without logging it again.
    pub async fn apply_wal_clear(&self) -> Result<()> {
        self.core.clear(false).await.map(|_| ())
    }

    // == Expiry ==
    /// Removes every expired entry now, one shard at a time.
    pub async fn sweep_expired(&self) -> usize {
        self.core.sweep().await
    }

    // == Stats ==
    /// Operation counters plus the current table shape.
    pub async fn stats(&self) -> Result<CacheStats> {
        self.ensure_started().await?;
        let distribution = self.core.shard_distribution().await;
        let (overflow_entries, overflow_bytes) = self.core.overflow.usage().await;

        let mut stats = self.core.stats.snapshot();
        stats.entry_count = self.size();
        stats.bytes_used = self.bytes_used();
        stats.num_shards = distribution.len();
        stats.hot_shards = hot_shards(&distribution);
        stats.shard_distribution = distribution;
        stats.overflow_entries = overflow_entries;
        stats.overflow_bytes = overflow_bytes;

        if !stats.hot_shards.is_empty() {
            debug!(hot_shards = ?stats.hot_shards, "Hot shards detected");
        }
        Ok(stats)
    }

    /// Re-derives the totals by scanning every shard.
    pub async fn verify_counters(&self) -> CounterCheck {
        let table = &self.core.table;
        let all = table.lock_all().await;
        let (scanned_entries, scanned_bytes) = all.scan_totals();
        let running_entries = table.entry_count();
        let running_bytes = table.memory_bytes();
        CounterCheck {
            consistent: running_entries == scanned_entries && running_bytes == scanned_bytes,
            running_entries,
            running_bytes,
            scanned_entries,
            scanned_bytes,
        }
    }

    // == Health Check ==
    /// Runs a set/get/delete round trip on a probe key and reports the cache's state.
    pub async fn health_check(&self) -> HealthReport {
        let probe_error = match self.ensure_started().await {
            Ok(_) => self.probe().await.err(),
            Err(e) => Some(format!("startup failed: {}", e)),
        };

        let counters = self.verify_counters().await;
        let distribution = self.core.shard_distribution().await;
        let cleanup_status = self.core.monitor.status();
        let wal_degraded = self.is_wal_degraded();
        let status = overall_status(probe_error.as_deref(), cleanup_status, wal_degraded);

        let error = probe_error.or_else(|| {
            self.core
                .monitor
                .last_error()
                .map(|e| format!("last cleanup sweep failed: {}", e))
        });
        if let Some(message) = &error {
            warn!(error = %message, ?status, "Cache health check reported a problem");
        }

        HealthReport {
            status,
            size: self.size(),
            bytes_used: self.bytes_used(),
            num_shards: distribution.len(),
            shard_distribution: distribution,
            hits: self.core.stats.hits(),
            misses: self.core.stats.misses(),
            evictions: self.core.stats.evictions(),
            hit_rate: self.core.stats.hit_rate(),
            cleanup_status,
            cleanup_cycles: self.core.monitor.cycles(),
            cleanup_removed: self.core.monitor.removed(),
            counters_consistent: counters.consistent,
            wal_enabled: self.core.wal.is_some(),
            wal_degraded,
            error,
            checked_at: Utc::now(),
        }
    }

    async fn probe(&self) -> std::result::Result<(), String> {
        let now = self.core.clock.now_ms();
        let probe = self.core.probes.fetch_add(1, Ordering::Relaxed);
        let key = format!("__health_probe_{}_{}", now, probe);
        let value = json!({ "probe": now });

        self.set(&key, value.clone(), Some(PROBE_TTL_SECONDS))
            .await
            .map_err(|e| format!("probe set failed: {}", e))?;
        let read = self
            .get(&key)
            .await
            .map_err(|e| format!("probe get failed: {}", e))?;
        let deleted = self
            .delete(&key)
            .await
            .map_err(|e| format!("probe delete failed: {}", e))?;

        if read.as_ref() != Some(&value) {
            return Err("probe round-trip returned a different value".to_string());
        }
        if !deleted {
            return Err("probe key was not removed".to_string());
        }
        Ok(())
    }

    // == Shutdown ==
    /// Stops the background expiry task after its final sweep.
    pub async fn shutdown(&self) -> Result<()> {
        let handle = self.core.cleanup.lock().await.take();
        if let Some(handle) = handle {
            if !handle.stop().await {
                return Err(CacheError::Internal(
                    "cleanup task terminated abnormally".to_string(),
                ));
            }
        }
        info!(entries = self.size(), "Cache shut down");
        Ok(())
    }
}

impl CacheCore {
    // == Write Path ==
    /// Stores `entry`, logging a SET with `log_ttl` first when given.
    async fn store(
        &self,
        key: String,
        entry: CacheEntry,
        log_ttl: Option<u64>,
        now: u64,
    ) -> Result<()> {
        let size = entry.size_bytes;
        if self.eviction.is_oversized(size) {
            return self.store_overflow(key, entry, log_ttl, now).await;
        }

        let outcome = self
            .eviction
            .evict_if_needed(&self.table, EvictionRequest::for_insert(&key, size), now)
            .await;
        self.record_eviction(&outcome);
        if !outcome.fits {
            return Err(CacheError::Capacity(format!(
                "no room for {} bytes under key {}",
                size, key
            )));
        }

        {
            let (_, mut shard) = self.table.lock_for(&key).await;
            if let Some(ttl) = log_ttl {
                self.log(WalWrite::set(&key, &entry.value, ttl), now).await?;
            }
            self.overflow.remove(&key).await;
            let replaced = shard.insert(key, entry);
            self.table.record_insert(size, replaced.as_ref());
        }

        // concurrent writers may have filled the room reserved above
        let trim = self
            .eviction
            .evict_if_needed(&self.table, EvictionRequest::trim(), now)
            .await;
        self.record_eviction(&trim);
        Ok(())
    }

    async fn store_overflow(
        &self,
        key: String,
        entry: CacheEntry,
        log_ttl: Option<u64>,
        now: u64,
    ) -> Result<()> {
        let size = entry.size_bytes;
        if !self.overflow.accepts(size) {
            return Err(CacheError::Capacity(format!(
                "value of {} bytes exceeds the memory budget of {} bytes",
                size,
                self.eviction.max_memory_bytes()
            )));
        }

        let (_, mut shard) = self.table.lock_for(&key).await;
        if let Some(ttl) = log_ttl {
            self.log(WalWrite::set(&key, &entry.value, ttl), now).await?;
        }
        if let Some(old) = shard.remove(&key) {
            self.table.record_remove(&old);
        }
        let evicted = self.overflow.insert(key.clone(), entry).await;
        self.stats.record_evictions(evicted);

        warn!(key = %key, size_bytes = size, "Oversized value stored in overflow table");
        Ok(())
    }

    async fn remove(&self, key: &str, log: bool) -> Result<bool> {
        let now = self.clock.now_ms();
        let (_, mut shard) = self.table.lock_for(key).await;
        if log {
            self.log(WalWrite::delete(key), now).await?;
        }
        let removed_main = match shard.remove(key) {
            Some(old) => {
                self.table.record_remove(&old);
                true
            }
            None => false,
        };
        let removed_overflow = self.overflow.remove(key).await;
        Ok(removed_main || removed_overflow)
    }

    async fn clear(&self, log: bool) -> Result<u64> {
        let now = self.clock.now_ms();
        let mut all = self.table.lock_all().await;
        if log {
            self.log(WalWrite::clear(), now).await?;
        }
        Ok(self.clear_locked(&mut all).await)
    }

    /// Empties both tables. The caller holds every shard lock.
    async fn clear_locked(&self, all: &mut AllShardsGuard<'_>) -> u64 {
        let mut removed = 0;
        for index in 0..all.len() {
            let shard = all.shard_mut(index);
            removed += shard.len() as u64;
            shard.clear();
        }
        self.table.store_totals(all, 0, 0);
        removed + self.overflow.clear().await as u64
    }

    async fn log(&self, write: WalWrite<'_>, now: u64) -> Result<()> {
        let Some(wal) = &self.wal else {
            return Ok(());
        };
        match wal.append(write, now).await {
            Ok(_) => {
                if self.wal_degraded.swap(false, Ordering::AcqRel) {
                    info!("WAL appends succeeding again");
                }
                Ok(())
            }
            Err(e) => {
                self.wal_degraded.store(true, Ordering::Release);
                self.stats.record_wal_failure();
                error!(error = %e, op = ?write.op, key = ?write.key, "WAL append failed; mutation not applied");
                Err(e)
            }
        }
    }

    fn record_eviction(&self, outcome: &EvictionOutcome) {
        self.stats.record_evictions(outcome.evicted);
        self.stats.record_expirations(outcome.expired);
    }

    // == Read Path ==
    async fn get(&self, key: &str) -> Option<Value> {
        let now = self.clock.now_ms();
        let (_, mut shard) = self.table.lock_for(key).await;

        let expired = match shard.get_mut(key) {
            Some(entry) if entry.is_expired(now) => true,
            Some(entry) => {
                entry.touch(now);
                self.stats.record_hit();
                return Some(entry.value.clone());
            }
            None => false,
        };
        if expired {
            if let Some(old) = shard.remove(key) {
                self.table.record_remove(&old);
            }
            self.stats.record_expirations(1);
            self.stats.record_miss();
            return None;
        }

        let (value, overflow_expired) = self.overflow.get(key, now).await;
        drop(shard);
        if overflow_expired {
            self.stats.record_expirations(1);
        }
        match value {
            Some(value) => {
                self.stats.record_hit();
                Some(value)
            }
            None => {
                self.stats.record_miss();
                None
            }
        }
    }

    async fn shard_distribution(&self) -> Vec<usize> {
        let mut distribution = Vec::with_capacity(self.table.num_shards());
        for index in 0..self.table.num_shards() {
            distribution.push(self.table.lock_shard(index).await.len());
        }
        distribution
    }

    // == Replay ==
    async fn apply_wal_set(
        &self,
        key: &str,
        value: Value,
        ttl_seconds: u64,
        timestamp_ms: u64,
    ) -> Result<()> {
        let key = validate_key(key)?;
        validate_value(&value)?;
        let now = self.clock.now_ms();
        let expires_at = expiry_for(timestamp_ms, ttl_seconds);
        if expires_at.is_some_and(|at| now >= at) {
            self.remove(&key, false).await?;
            return Ok(());
        }

        let size = entry_size(&key, &value);
        let entry = CacheEntry {
            value,
            expires_at,
            last_access: timestamp_ms,
            size_bytes: size,
        };
        self.store(key, entry, None, now).await
    }

    async fn replay_wal(&self) -> Result<ReplayReport> {
        let Some(wal) = &self.wal else {
            return Ok(ReplayReport::default());
        };

        info!(dir = %wal.dir().display(), "Replaying WAL");
        let contents = wal.read_all().await?;
        let mut report = ReplayReport {
            skipped_corrupt: contents.skipped,
            ..ReplayReport::default()
        };

        for record in contents.records {
            let sequence = record.sequence;
            let result = match (record.op, record.key, record.value) {
                (WalOp::Set, Some(key), Some(value)) => {
                    self.apply_wal_set(
                        &key,
                        value,
                        record.ttl_seconds.unwrap_or(0),
                        record.timestamp,
                    )
                    .await
                }
                (WalOp::Delete, Some(key), _) => match validate_key(&key) {
                    Ok(key) => self.remove(&key, false).await.map(|_| ()),
                    Err(e) => Err(e),
                },
                (WalOp::Clear, _, _) => self.clear(false).await.map(|_| ()),
                (op, _, _) => {
                    warn!(sequence, ?op, "WAL record is missing its key or value");
                    report.skipped_corrupt += 1;
                    continue;
                }
            };
            match result {
                Ok(()) => report.applied += 1,
                Err(e) => {
                    warn!(sequence, error = %e, "WAL record could not be applied");
                    report.rejected += 1;
                }
            }
        }

        info!(
            applied = report.applied,
            skipped_corrupt = report.skipped_corrupt,
            rejected = report.rejected,
            entries = self.table.entry_count(),
            "WAL replay completed"
        );
        Ok(report)
    }

    // == Sweep ==
    async fn sweep(&self) -> usize {
        let now = self.clock.now_ms();
        let mut removed = 0;

        for index in 0..self.table.num_shards() {
            let mut shard = self.table.lock_shard(index).await;
            shard.retain(|_, entry| {
                if entry.is_expired(now) {
                    self.table.record_remove(entry);
                    removed += 1;
                    false
                } else {
                    true
                }
            });
        }
        removed += self.overflow.purge_expired(now).await;

        self.stats.record_expirations(removed as u64);
        removed
    }
}

impl ExpirySweeper for CacheCore {
    async fn sweep_expired(&self) -> usize {
        self.sweep().await
    }
}
