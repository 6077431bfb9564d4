//! Shard Table Module
//!
//! Splits the key space into independently locked maps. A key's shard is a
//! pure function of its hash and never changes.
//!
//! Lock discipline:
//! - single-key operations hold exactly one shard lock;
//! - global operations go through [`ShardTable::lock_all`], which acquires
//!   shard 0..N-1 in ascending order and releases them in descending order;
//! - nothing else holds two shard locks at once.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, MutexGuard};

use crate::cache::CacheEntry;

/// Key → entry map owned by one shard.
pub type ShardMap = HashMap<String, CacheEntry>;

// == Shard Index ==
/// Maps a key to its shard.
pub fn shard_for(key: &str, num_shards: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    shard_from_hash(hasher.finish(), key, num_shards)
}

/// Reduces a hash to a shard index.
///
/// A degenerate hash of 0 is replaced by a byte-sum mix of the key so that a
/// broken hasher still spreads keys across shards.
pub fn shard_from_hash(hash: u64, key: &str, num_shards: usize) -> usize {
    let num_shards = num_shards.max(1) as u64;
    let hash = if hash == 0 { fallback_mix(key) } else { hash };
    (hash % num_shards) as usize
}

fn fallback_mix(key: &str) -> u64 {
    key.bytes()
        .fold(key.len() as u64, |acc, b| acc.wrapping_add(b as u64))
}

// == Shard Table ==
/// N independently locked maps plus O(1) running totals across all of them.
///
/// The totals are only changed while the lock of the affected shard is held.
#[derive(Debug)]
pub struct ShardTable {
    shards: Vec<Mutex<ShardMap>>,
    entry_count: AtomicU64,
    memory_bytes: AtomicU64,
}

impl ShardTable {
    /// Creates `num_shards` empty shards (at least one).
    pub fn new(num_shards: usize) -> Self {
        let shards = (0..num_shards.max(1))
            .map(|_| Mutex::new(HashMap::new()))
            .collect();
        Self {
            shards,
            entry_count: AtomicU64::new(0),
            memory_bytes: AtomicU64::new(0),
        }
    }

    /// Number of shards.
    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    /// Shard index for `key`.
    pub fn index_of(&self, key: &str) -> usize {
        shard_for(key, self.shards.len())
    }

    /// Locks the single shard owning `key`.
    pub async fn lock_for(&self, key: &str) -> (usize, MutexGuard<'_, ShardMap>) {
        let index = self.index_of(key);
        (index, self.shards[index].lock().await)
    }

    /// Locks one shard by index.
    pub async fn lock_shard(&self, index: usize) -> MutexGuard<'_, ShardMap> {
        self.shards[index].lock().await
    }

    /// Locks every shard in ascending index order.
    pub async fn lock_all(&self) -> AllShardsGuard<'_> {
        let mut guards = Vec::with_capacity(self.shards.len());
        for shard in &self.shards {
            guards.push(shard.lock().await);
        }
        AllShardsGuard { guards }
    }

    /// Running entry count.
    pub fn entry_count(&self) -> u64 {
        self.entry_count.load(Ordering::Acquire)
    }

    /// Running memory total.
    pub fn memory_bytes(&self) -> u64 {
        self.memory_bytes.load(Ordering::Acquire)
    }

    /// Accounts for an inserted entry, replacing `replaced` if there was one.
    pub fn record_insert(&self, size_bytes: u64, replaced: Option<&CacheEntry>) {
        match replaced {
            Some(old) => {
                self.sub_bytes(old.size_bytes);
            }
            None => {
                self.entry_count.fetch_add(1, Ordering::AcqRel);
            }
        }
        self.memory_bytes.fetch_add(size_bytes, Ordering::AcqRel);
    }

    /// Accounts for a removed entry.
    pub fn record_remove(&self, removed: &CacheEntry) {
        self.sub_count(1);
        self.sub_bytes(removed.size_bytes);
    }

    /// Overwrites both totals. Only valid while every shard is locked.
    pub fn store_totals(&self, _all: &AllShardsGuard<'_>, entries: u64, bytes: u64) {
        self.entry_count.store(entries, Ordering::Release);
        self.memory_bytes.store(bytes, Ordering::Release);
    }

    fn sub_count(&self, n: u64) {
        let _ = self
            .entry_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| {
                Some(c.saturating_sub(n))
            });
    }

    fn sub_bytes(&self, n: u64) {
        let _ = self
            .memory_bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| {
                Some(c.saturating_sub(n))
            });
    }
}

// == All Shards Guard ==
/// Every shard lock, held at once. Dropping releases them highest index first.
pub struct AllShardsGuard<'a> {
    guards: Vec<MutexGuard<'a, ShardMap>>,
}

impl<'a> AllShardsGuard<'a> {
    /// Shard maps in index order.
    pub fn shards(&self) -> impl Iterator<Item = (usize, &ShardMap)> {
        self.guards.iter().enumerate().map(|(i, g)| (i, &**g))
    }

    /// Mutable access to one shard.
    pub fn shard_mut(&mut self, index: usize) -> &mut ShardMap {
        &mut self.guards[index]
    }

    /// Number of held shards.
    pub fn len(&self) -> usize {
        self.guards.len()
    }

    /// True when the table has no shards, which `ShardTable::new` never produces.
    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }

    /// Entry count and memory bytes derived by a full scan.
    pub fn scan_totals(&self) -> (u64, u64) {
        self.guards.iter().fold((0, 0), |(count, bytes), shard| {
            let shard_bytes: u64 = shard.values().map(|e| e.size_bytes).sum();
            (count + shard.len() as u64, bytes + shard_bytes)
        })
    }
}

impl Drop for AllShardsGuard<'_> {
    fn drop(&mut self) {
        while let Some(guard) = self.guards.pop() {
            drop(guard);
        }
    }
}
