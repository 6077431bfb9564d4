//! Overflow Table Module
//!
//! Holds entries too large for the main table's memory budget. It has its own
//! entry and byte capacity and evicts in insertion order. Overflow entries are
//! excluded from the main counters and from snapshots.

use std::collections::{HashMap, VecDeque};

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use crate::cache::CacheEntry;

#[derive(Debug, Default)]
struct OverflowInner {
    entries: HashMap<String, CacheEntry>,
    /// Front = oldest insertion
    order: VecDeque<String>,
    bytes: u64,
}

impl OverflowInner {
    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.order.retain(|k| k != key);
        self.bytes = self.bytes.saturating_sub(entry.size_bytes);
        Some(entry)
    }

    fn evict_oldest(&mut self) -> Option<String> {
        let key = self.order.pop_front()?;
        if let Some(entry) = self.entries.remove(&key) {
            self.bytes = self.bytes.saturating_sub(entry.size_bytes);
        }
        Some(key)
    }
}

// == Overflow Table ==
/// Bounded side table for oversized values.
#[derive(Debug)]
pub struct OverflowTable {
    inner: Mutex<OverflowInner>,
    max_entries: usize,
    max_bytes: u64,
}

impl OverflowTable {
    /// Creates a table holding at most `max_entries` entries and `max_bytes` bytes.
    pub fn new(max_entries: usize, max_bytes: u64) -> Self {
        Self {
            inner: Mutex::new(OverflowInner::default()),
            max_entries,
            max_bytes,
        }
    }

    /// Whether an entry of `size_bytes` could ever be stored here.
    pub fn accepts(&self, size_bytes: u64) -> bool {
        self.max_entries > 0 && size_bytes <= self.max_bytes
    }

    /// Stores `entry`, evicting the oldest insertions until it fits.
    ///
    /// Returns the number of entries evicted. The caller checks
    /// [`accepts`](Self::accepts) first.
    pub async fn insert(&self, key: String, entry: CacheEntry) -> u64 {
        let mut inner = self.inner.lock().await;
        inner.remove(&key);

        let mut evicted = 0;
        while !inner.entries.is_empty()
            && (inner.entries.len() >= self.max_entries
                || inner.bytes + entry.size_bytes > self.max_bytes)
        {
            match inner.evict_oldest() {
                Some(victim) => {
                    debug!(key = %victim, "Evicted overflow entry");
                    evicted += 1;
                }
                None => break,
            }
        }

        inner.bytes += entry.size_bytes;
        inner.order.push_back(key.clone());
        inner.entries.insert(key, entry);
        evicted
    }

    /// Returns a copy of the value if present and not expired.
    ///
    /// Expired entries are dropped on access. The boolean reports whether an
    /// expired entry was dropped.
    pub async fn get(&self, key: &str, now_ms: u64) -> (Option<Value>, bool) {
        let mut inner = self.inner.lock().await;
        let expired = match inner.entries.get_mut(key) {
            None => return (None, false),
            Some(entry) if entry.is_expired(now_ms) => true,
            Some(entry) => {
                entry.touch(now_ms);
                return (Some(entry.value.clone()), false);
            }
        };
        if expired {
            inner.remove(key);
        }
        (None, expired)
    }

    /// Removes `key`. Returns true if it was present.
    pub async fn remove(&self, key: &str) -> bool {
        self.inner.lock().await.remove(key).is_some()
    }

    /// Removes every entry, returning how many there were.
    pub async fn clear(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let count = inner.entries.len();
        *inner = OverflowInner::default();
        count
    }

    /// Drops expired entries, returning how many were removed.
    pub async fn purge_expired(&self, now_ms: u64) -> usize {
        let mut inner = self.inner.lock().await;
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now_ms))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            inner.remove(key);
        }
        expired.len()
    }

    /// Keys of entries that have not expired at `now_ms`.
    pub async fn live_keys(&self, now_ms: u64) -> Vec<String> {
        let inner = self.inner.lock().await;
        inner
            .entries
            .iter()
            .filter(|(_, e)| !e.is_expired(now_ms))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Current `(entries, bytes)`.
    pub async fn usage(&self) -> (usize, u64) {
        let inner = self.inner.lock().await;
        (inner.entries.len(), inner.bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(size: u64, ttl: u64, now: u64) -> CacheEntry {
        CacheEntry::new(json!("big"), ttl, now, size)
    }

    #[tokio::test]
    async fn test_accepts_respects_limits() {
        let table = OverflowTable::new(2, 100);
        assert!(table.accepts(100));
        assert!(!table.accepts(101));

        let disabled = OverflowTable::new(0, 100);
        assert!(!disabled.accepts(1));
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let table = OverflowTable::new(2, 100);
        table.insert("a".to_string(), entry(40, 0, 0)).await;

        let (value, expired) = table.get("a", 10).await;
        assert_eq!(value, Some(json!("big")));
        assert!(!expired);
        assert_eq!(table.usage().await, (1, 40));
    }

    #[tokio::test]
    async fn test_evicts_oldest_on_entry_limit() {
        let table = OverflowTable::new(2, 1_000);
        table.insert("a".to_string(), entry(10, 0, 0)).await;
        table.insert("b".to_string(), entry(10, 0, 0)).await;
        let evicted = table.insert("c".to_string(), entry(10, 0, 0)).await;

        assert_eq!(evicted, 1);
        assert_eq!(table.get("a", 0).await.0, None);
        assert!(table.get("b", 0).await.0.is_some());
        assert!(table.get("c", 0).await.0.is_some());
    }

    #[tokio::test]
    async fn test_evicts_oldest_on_byte_limit() {
        let table = OverflowTable::new(10, 100);
        table.insert("a".to_string(), entry(60, 0, 0)).await;
        table.insert("b".to_string(), entry(30, 0, 0)).await;
        let evicted = table.insert("c".to_string(), entry(50, 0, 0)).await;

        assert_eq!(evicted, 1);
        assert_eq!(table.usage().await, (2, 80));
    }

    #[tokio::test]
    async fn test_reinsert_replaces_without_eviction() {
        let table = OverflowTable::new(1, 100);
        table.insert("a".to_string(), entry(60, 0, 0)).await;
        let evicted = table.insert("a".to_string(), entry(70, 0, 0)).await;

        assert_eq!(evicted, 0);
        assert_eq!(table.usage().await, (1, 70));
    }

    #[tokio::test]
    async fn test_expired_entry_dropped_on_get() {
        let table = OverflowTable::new(2, 100);
        table.insert("a".to_string(), entry(10, 1, 0)).await;

        let (value, expired) = table.get("a", 1_000).await;
        assert!(value.is_none());
        assert!(expired);
        assert_eq!(table.usage().await, (0, 0));
    }

    #[tokio::test]
    async fn test_purge_and_clear() {
        let table = OverflowTable::new(5, 1_000);
        table.insert("short".to_string(), entry(10, 1, 0)).await;
        table.insert("long".to_string(), entry(10, 60, 0)).await;

        assert_eq!(table.purge_expired(2_000).await, 1);
        assert_eq!(table.clear().await, 1);
        assert_eq!(table.usage().await, (0, 0));
        assert!(!table.remove("long").await);
    }
}
