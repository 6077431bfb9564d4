//! Cache Statistics Module
//!
//! Lock-free operation counters plus the serializable view returned by
//! `ShardedCache::stats`.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Shards at or above this percentile of shard sizes are reported as hot.
const HOT_SHARD_PERCENTILE: f64 = 0.8;

// == Stats Counters ==
/// Running operation counters shared by every caller of the cache.
#[derive(Debug, Default)]
pub struct StatsCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    wal_failures: AtomicU64,
}

impl StatsCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, n: u64) {
        self.evictions.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_expirations(&self, n: u64) {
        self.expirations.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_wal_failure(&self) {
        self.wal_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn wal_failures(&self) -> u64 {
        self.wal_failures.load(Ordering::Relaxed)
    }

    // == Hit Rate ==
    /// Calculates the cache hit rate.
    ///
    /// Returns hits / (hits + misses), or 0.0 if no requests have been made.
    pub fn hit_rate(&self) -> f64 {
        ratio(self.hits(), self.misses())
    }

    /// Copies every counter into a fresh [`CacheStats`] with no table figures.
    pub fn snapshot(&self) -> CacheStats {
        let hits = self.hits();
        let misses = self.misses();
        CacheStats {
            hits,
            misses,
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            evictions: self.evictions(),
            expirations: self.expirations.load(Ordering::Relaxed),
            wal_failures: self.wal_failures(),
            hit_rate: ratio(hits, misses),
            miss_rate: ratio(misses, hits),
            ..CacheStats::default()
        }
    }
}

fn ratio(part: u64, other: u64) -> f64 {
    let total = part + other;
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

// == Cache Stats ==
/// Point-in-time view of the cache's counters and table shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Successful retrievals
    pub hits: u64,
    /// Retrievals of absent or expired keys
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    /// Entries removed by the LRU policy
    pub evictions: u64,
    /// Entries removed because their TTL passed
    pub expirations: u64,
    pub hit_rate: f64,
    pub miss_rate: f64,
    /// Entries in the main table
    pub entry_count: u64,
    /// Estimated bytes held by the main table
    pub bytes_used: u64,
    pub num_shards: usize,
    /// Entry count per shard, by shard index
    pub shard_distribution: Vec<usize>,
    /// Shards whose size is at or above the 80th percentile
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hot_shards: Vec<usize>,
    pub overflow_entries: usize,
    pub overflow_bytes: u64,
    /// Failed WAL appends since start
    pub wal_failures: u64,
}

// == Hot Shards ==
/// Indices of shards whose size is at or above the 80th percentile.
///
/// Empty when every shard is empty.
pub fn hot_shards(distribution: &[usize]) -> Vec<usize> {
    if distribution.iter().all(|&n| n == 0) {
        return Vec::new();
    }

    let mut sorted = distribution.to_vec();
    sorted.sort_unstable();
    // linear interpolation between closest ranks
    let position = HOT_SHARD_PERCENTILE * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    let threshold =
        sorted[lower] as f64 + (sorted[upper] as f64 - sorted[lower] as f64) * fraction;

    distribution
        .iter()
        .enumerate()
        .filter(|(_, &n)| n > 0 && n as f64 >= threshold)
        .map(|(i, _)| i)
        .collect()
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_new() {
        let stats = StatsCounters::new().snapshot();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.evictions, 0);
        assert_eq!(stats.entry_count, 0);
    }

    #[test]
    fn test_hit_rate_no_requests() {
        let counters = StatsCounters::new();
        assert_eq!(counters.hit_rate(), 0.0);
        assert_eq!(counters.snapshot().miss_rate, 0.0);
    }

    #[test]
    fn test_hit_rate_all_hits() {
        let counters = StatsCounters::new();
        counters.record_hit();
        counters.record_hit();
        counters.record_hit();
        assert_eq!(counters.hit_rate(), 1.0);
    }

    #[test]
    fn test_hit_rate_all_misses() {
        let counters = StatsCounters::new();
        counters.record_miss();
        counters.record_miss();
        assert_eq!(counters.hit_rate(), 0.0);
        assert_eq!(counters.snapshot().miss_rate, 1.0);
    }

    #[test]
    fn test_hit_rate_mixed() {
        let counters = StatsCounters::new();
        counters.record_hit();
        counters.record_miss();
        assert_eq!(counters.hit_rate(), 0.5);
    }

    #[test]
    fn test_record_evictions_and_expirations() {
        let counters = StatsCounters::new();
        counters.record_evictions(2);
        counters.record_expirations(3);
        counters.record_wal_failure();

        let stats = counters.snapshot();
        assert_eq!(stats.evictions, 2);
        assert_eq!(stats.expirations, 3);
        assert_eq!(stats.wal_failures, 1);
    }

    #[test]
    fn test_hot_shards_empty_table() {
        assert!(hot_shards(&[0, 0, 0, 0]).is_empty());
        assert!(hot_shards(&[]).is_empty());
    }

    #[test]
    fn test_hot_shards_picks_top_fifth() {
        let distribution = [1, 1, 1, 1, 1, 1, 1, 1, 9, 12];
        assert_eq!(hot_shards(&distribution), vec![8, 9]);
    }

    #[test]
    fn test_hot_shards_uniform_reports_all() {
        assert_eq!(hot_shards(&[3, 3, 3]), vec![0, 1, 2]);
    }
}
