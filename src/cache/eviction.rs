//! Eviction Module
//!
//! Keeps the main table inside its entry-count and memory budgets by removing
//! the globally least recently used entries. Evictions are a capacity policy
//! and are never written to the WAL.

use tracing::{debug, info};

use crate::cache::shard::{AllShardsGuard, ShardTable};

// == Eviction Request ==
/// What the caller is about to add.
#[derive(Debug, Clone, Copy)]
pub struct EvictionRequest<'a> {
    /// Key about to be written. Its current entry, if any, is treated as
    /// replaced and is never chosen as a victim. `None` trims to the budgets
    /// without reserving room for a new entry.
    pub key: Option<&'a str>,
    /// Size of the incoming entry
    pub incoming_bytes: u64,
}

impl<'a> EvictionRequest<'a> {
    /// Room for `key` with an entry of `incoming_bytes`.
    pub fn for_insert(key: &'a str, incoming_bytes: u64) -> Self {
        Self {
            key: Some(key),
            incoming_bytes,
        }
    }

    /// Bring the table back inside its budgets.
    pub fn trim() -> Self {
        Self {
            key: None,
            incoming_bytes: 0,
        }
    }
}

// == Eviction Outcome ==
/// Result of one eviction pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionOutcome {
    /// Live entries removed by LRU order
    pub evicted: u64,
    /// Already expired entries purged along the way
    pub expired: u64,
    /// Bytes released by both
    pub bytes_freed: u64,
    /// Whether the request now fits the budgets
    pub fits: bool,
}

/// One LRU candidate: `(last_access, shard_index, key, size_bytes)`.
type Candidate = (u64, usize, String, u64);

// == Eviction Manager ==
/// Cross-shard LRU eviction driven by an entry budget and a memory budget.
#[derive(Debug, Clone)]
pub struct EvictionManager {
    max_entries: u64,
    max_memory_bytes: u64,
}

impl EvictionManager {
    /// Creates a manager enforcing the given budgets.
    pub fn new(max_entries: usize, max_memory_bytes: u64) -> Self {
        Self {
            max_entries: max_entries as u64,
            max_memory_bytes,
        }
    }

    /// Entry budget.
    pub fn max_entries(&self) -> u64 {
        self.max_entries
    }

    /// Memory budget.
    pub fn max_memory_bytes(&self) -> u64 {
        self.max_memory_bytes
    }

    /// True if an entry of `size_bytes` can never fit the main table.
    pub fn is_oversized(&self, size_bytes: u64) -> bool {
        size_bytes > self.max_memory_bytes
    }

    /// Cheap check against the running totals; no lock taken.
    pub fn within_budget(&self, table: &ShardTable, request: &EvictionRequest<'_>) -> bool {
        let count = table.entry_count();
        let bytes = table.memory_bytes();
        let count_ok = match request.key {
            Some(_) => count < self.max_entries,
            None => count <= self.max_entries,
        };
        count_ok && bytes.saturating_add(request.incoming_bytes) <= self.max_memory_bytes
    }

    // == Evict If Needed ==
    /// Evicts least recently used entries until `request` fits.
    ///
    /// Returns immediately when the running totals already leave room.
    /// Otherwise every shard is locked, totals are recomputed by scanning,
    /// expired entries are purged and live entries are removed oldest
    /// `last_access` first (ties by shard index, then key).
    pub async fn evict_if_needed(
        &self,
        table: &ShardTable,
        request: EvictionRequest<'_>,
        now_ms: u64,
    ) -> EvictionOutcome {
        if self.within_budget(table, &request) {
            return EvictionOutcome {
                fits: true,
                ..EvictionOutcome::default()
            };
        }

        let mut all = table.lock_all().await;
        let outcome = self.evict_locked(table, &mut all, request, now_ms);

        if outcome.evicted > 0 || outcome.expired > 0 {
            info!(
                evicted = outcome.evicted,
                expired = outcome.expired,
                bytes_freed = outcome.bytes_freed,
                entries = table.entry_count(),
                memory_bytes = table.memory_bytes(),
                "Eviction pass completed"
            );
        }
        outcome
    }

    /// Eviction body for callers that already hold every shard lock.
    pub fn evict_locked(
        &self,
        table: &ShardTable,
        all: &mut AllShardsGuard<'_>,
        request: EvictionRequest<'_>,
        now_ms: u64,
    ) -> EvictionOutcome {
        let mut outcome = EvictionOutcome::default();

        let (mut count, mut bytes) = all.scan_totals();

        // Purge what is already dead before touching live entries
        for index in 0..all.len() {
            let shard = all.shard_mut(index);
            let before = shard.len();
            shard.retain(|_, entry| {
                if entry.is_expired(now_ms) {
                    outcome.bytes_freed += entry.size_bytes;
                    bytes = bytes.saturating_sub(entry.size_bytes);
                    false
                } else {
                    true
                }
            });
            let purged = (before - shard.len()) as u64;
            outcome.expired += purged;
            count = count.saturating_sub(purged);
        }

        let target = request.key.map(|key| (table.index_of(key), key));
        let existing_bytes = target
            .and_then(|(index, key)| all.shard_mut(index).get(key).map(|e| e.size_bytes));
        let needs_slot = request.key.is_some() && existing_bytes.is_none();
        let existing_bytes = existing_bytes.unwrap_or(0);

        let fits = |count: u64, bytes: u64| {
            count + u64::from(needs_slot) <= self.max_entries
                && bytes
                    .saturating_sub(existing_bytes)
                    .saturating_add(request.incoming_bytes)
                    <= self.max_memory_bytes
        };

        if !fits(count, bytes) {
            let mut candidates: Vec<Candidate> = all
                .shards()
                .flat_map(|(index, shard)| {
                    shard
                        .iter()
                        .filter(move |(key, _)| {
                            target.map_or(true, |(t_index, t_key)| {
                                t_index != index || t_key != key.as_str()
                            })
                        })
                        .map(move |(key, entry)| {
                            (entry.last_access, index, key.clone(), entry.size_bytes)
                        })
                })
                .collect();
            candidates.sort_unstable();

            for (last_access, index, key, size_bytes) in candidates {
                if fits(count, bytes) {
                    break;
                }
                if all.shard_mut(index).remove(&key).is_some() {
                    count -= 1;
                    bytes = bytes.saturating_sub(size_bytes);
                    outcome.evicted += 1;
                    outcome.bytes_freed += size_bytes;
                    debug!(key = %key, shard = index, last_access, "Evicted LRU entry");
                }
            }
        }

        table.store_totals(all, count, bytes);
        outcome.fits = fits(count, bytes);
        outcome
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheEntry;
    use serde_json::json;

    async fn insert(table: &ShardTable, key: &str, last_access: u64, size: u64, ttl: u64) {
        let (_, mut shard) = table.lock_for(key).await;
        let entry = CacheEntry::new(json!(key), ttl, last_access, size);
        let replaced = shard.insert(key.to_string(), entry);
        table.record_insert(size, replaced.as_ref());
    }

    async fn contains(table: &ShardTable, key: &str) -> bool {
        let (_, shard) = table.lock_for(key).await;
        shard.contains_key(key)
    }

    #[tokio::test]
    async fn test_fast_path_when_under_budget() {
        let table = ShardTable::new(4);
        let manager = EvictionManager::new(10, 1_000);
        insert(&table, "a", 1, 10, 0).await;

        let outcome = manager
            .evict_if_needed(&table, EvictionRequest::for_insert("b", 10), 5)
            .await;
        assert!(outcome.fits);
        assert_eq!(outcome.evicted, 0);
        assert_eq!(table.entry_count(), 1);
    }

    #[tokio::test]
    async fn test_evicts_least_recently_used_across_shards() {
        let table = ShardTable::new(4);
        let manager = EvictionManager::new(3, 1_000);
        insert(&table, "a", 30, 10, 0).await;
        insert(&table, "b", 10, 10, 0).await;
        insert(&table, "c", 20, 10, 0).await;

        let outcome = manager
            .evict_if_needed(&table, EvictionRequest::for_insert("d", 10), 40)
            .await;

        assert!(outcome.fits);
        assert_eq!(outcome.evicted, 1);
        assert!(!contains(&table, "b").await);
        assert!(contains(&table, "a").await);
        assert!(contains(&table, "c").await);
        assert_eq!(table.entry_count(), 2);
        assert_eq!(table.memory_bytes(), 20);
    }

    #[tokio::test]
    async fn test_memory_budget_evicts_until_fit() {
        let table = ShardTable::new(2);
        let manager = EvictionManager::new(100, 100);
        insert(&table, "old", 1, 40, 0).await;
        insert(&table, "mid", 2, 40, 0).await;
        insert(&table, "new", 3, 10, 0).await;

        let outcome = manager
            .evict_if_needed(&table, EvictionRequest::for_insert("big", 60), 10)
            .await;

        assert!(outcome.fits);
        assert_eq!(outcome.evicted, 2);
        assert_eq!(outcome.bytes_freed, 80);
        assert!(contains(&table, "new").await);
        assert_eq!(table.memory_bytes(), 10);
    }

    #[tokio::test]
    async fn test_expired_entries_purged_before_live_ones() {
        let table = ShardTable::new(2);
        let manager = EvictionManager::new(2, 1_000);
        // expires at 1000 + 1s
        insert(&table, "stale", 1_000, 10, 1).await;
        insert(&table, "live", 500, 10, 0).await;

        let outcome = manager
            .evict_if_needed(&table, EvictionRequest::for_insert("x", 10), 5_000)
            .await;

        assert_eq!(outcome.expired, 1);
        assert_eq!(outcome.evicted, 0);
        assert!(contains(&table, "live").await);
        assert!(!contains(&table, "stale").await);
    }

    #[tokio::test]
    async fn test_overwrite_needs_no_extra_slot() {
        let table = ShardTable::new(2);
        let manager = EvictionManager::new(2, 1_000);
        insert(&table, "a", 1, 10, 0).await;
        insert(&table, "b", 2, 10, 0).await;

        let outcome = manager
            .evict_if_needed(&table, EvictionRequest::for_insert("a", 10), 3)
            .await;

        assert!(outcome.fits);
        assert_eq!(outcome.evicted, 0);
        assert!(contains(&table, "a").await);
        assert!(contains(&table, "b").await);
    }

    #[tokio::test]
    async fn test_trim_brings_table_within_budget() {
        let table = ShardTable::new(2);
        insert(&table, "a", 1, 10, 0).await;
        insert(&table, "b", 2, 10, 0).await;
        insert(&table, "c", 3, 10, 0).await;

        let manager = EvictionManager::new(2, 1_000);
        let outcome = manager
            .evict_if_needed(&table, EvictionRequest::trim(), 10)
            .await;

        assert!(outcome.fits);
        assert_eq!(outcome.evicted, 1);
        assert!(!contains(&table, "a").await);
        assert_eq!(table.entry_count(), 2);
    }

    #[test]
    fn test_is_oversized() {
        let manager = EvictionManager::new(10, 100);
        assert!(!manager.is_oversized(100));
        assert!(manager.is_oversized(101));
    }
}
