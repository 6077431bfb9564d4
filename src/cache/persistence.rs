//! Snapshot Persistence Module
//!
//! Point-in-time snapshots of the main table. A snapshot captures every
//! entry's exact expiry and last access, grouped by shard:
//!
//! ```json
//! {
//!   "metadata": { "created_at": "...", "total_entries": 2, "version": "1.0" },
//!   "shard_0": { "user:1": { "value": ..., "expires_at": ..., "last_access": ..., "size_bytes": ... } },
//!   "shard_3": { ... }
//! }
//! ```
//!
//! Files are written to a temporary name and renamed into place, so a
//! snapshot on disk is either complete or absent.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::cache::CacheEntry;
use crate::error::{CacheError, Result};

/// Format version written into every snapshot.
pub const SNAPSHOT_VERSION: &str = "1.0";

const SNAPSHOT_PREFIX: &str = "cache_snapshot_";
const SNAPSHOT_SUFFIX: &str = ".json";
const SHARD_PREFIX: &str = "shard_";
const METADATA_KEY: &str = "metadata";

/// Snapshots older than this are restored with a warning.
const STALE_AFTER_MS: u64 = 24 * 60 * 60 * 1000;

// == Snapshot Entry ==
/// One entry as stored in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub value: Value,
    pub expires_at: Option<u64>,
    pub last_access: u64,
    pub size_bytes: u64,
}

impl From<&CacheEntry> for SnapshotEntry {
    fn from(entry: &CacheEntry) -> Self {
        Self {
            value: entry.value.clone(),
            expires_at: entry.expires_at,
            last_access: entry.last_access,
            size_bytes: entry.size_bytes,
        }
    }
}

impl From<SnapshotEntry> for CacheEntry {
    fn from(entry: SnapshotEntry) -> Self {
        Self {
            value: entry.value,
            expires_at: entry.expires_at,
            last_access: entry.last_access,
            size_bytes: entry.size_bytes,
        }
    }
}

// == Snapshot Metadata ==
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub created_at: DateTime<Utc>,
    pub total_entries: u64,
    pub version: String,
}

// == Snapshot Data ==
/// In-memory form of a snapshot file.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotData {
    pub metadata: SnapshotMetadata,
    /// Shard index at capture time → entries of that shard
    pub shards: BTreeMap<usize, BTreeMap<String, SnapshotEntry>>,
}

impl SnapshotData {
    /// Wraps captured shards, stamping metadata at `created_at_ms`.
    pub fn new(created_at_ms: u64, shards: BTreeMap<usize, BTreeMap<String, SnapshotEntry>>) -> Self {
        let total_entries = shards.values().map(|s| s.len() as u64).sum();
        Self {
            metadata: SnapshotMetadata {
                created_at: datetime_from_ms(created_at_ms),
                total_entries,
                version: SNAPSHOT_VERSION.to_string(),
            },
            shards,
        }
    }

    /// Number of entries across all shards.
    pub fn entry_count(&self) -> u64 {
        self.shards.values().map(|s| s.len() as u64).sum()
    }

    /// Every entry, ignoring the shard it was captured from.
    pub fn into_entries(self) -> impl Iterator<Item = (String, SnapshotEntry)> {
        self.shards.into_values().flat_map(|shard| shard.into_iter())
    }

    fn to_json(&self) -> Result<Value> {
        let mut document = Map::new();
        document.insert(METADATA_KEY.to_string(), to_value(&self.metadata)?);
        for (index, entries) in &self.shards {
            document.insert(format!("{}{}", SHARD_PREFIX, index), to_value(entries)?);
        }
        Ok(Value::Object(document))
    }

    fn from_json(document: Value) -> Result<Self> {
        let Value::Object(mut document) = document else {
            return Err(CacheError::Persistence(
                "snapshot must be a JSON object".to_string(),
            ));
        };

        let metadata = document.remove(METADATA_KEY).ok_or_else(|| {
            CacheError::Persistence("snapshot missing required metadata".to_string())
        })?;
        let metadata: SnapshotMetadata = serde_json::from_value(metadata)
            .map_err(|e| CacheError::Persistence(format!("invalid snapshot metadata: {}", e)))?;
        if metadata.version.is_empty() {
            return Err(CacheError::Persistence(
                "snapshot metadata has an empty version".to_string(),
            ));
        }

        let mut shards = BTreeMap::new();
        for (name, entries) in document {
            let Some(index) = name
                .strip_prefix(SHARD_PREFIX)
                .and_then(|n| n.parse::<usize>().ok())
            else {
                warn!(key = %name, "Skipping unknown key in snapshot");
                continue;
            };
            let entries: BTreeMap<String, SnapshotEntry> = serde_json::from_value(entries)
                .map_err(|e| {
                    CacheError::Persistence(format!("invalid data for {}: {}", name, e))
                })?;
            shards.insert(index, entries);
        }

        Ok(Self { metadata, shards })
    }
}

// == Snapshot Handle ==
/// Reference to a snapshot file on disk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotHandle {
    pub path: PathBuf,
    pub file_name: String,
    pub created_at: DateTime<Utc>,
    pub total_entries: u64,
    pub size_bytes: u64,
}

// == Persistence Manager ==
/// Writes, reads, lists and prunes snapshot files in one directory.
#[derive(Debug)]
pub struct PersistenceManager {
    dir: PathBuf,
    /// Disambiguates snapshots taken within the same millisecond
    counter: AtomicU64,
}

impl PersistenceManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            counter: AtomicU64::new(0),
        }
    }

    // == Save ==
    /// Persists `data` and returns a handle to the new file.
    pub async fn save(&self, data: &SnapshotData) -> Result<SnapshotHandle> {
        fs::create_dir_all(&self.dir).await.map_err(|e| {
            CacheError::Persistence(format!(
                "failed to create snapshot directory {}: {}",
                self.dir.display(),
                e
            ))
        })?;

        let created_ms = data.metadata.created_at.timestamp_millis().max(0) as u64;
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let file_name = format!("{}{}_{}{}", SNAPSHOT_PREFIX, created_ms, n, SNAPSHOT_SUFFIX);
        let path = self.dir.join(&file_name);
        let tmp_path = self.dir.join(format!("{}.tmp", file_name));

        let bytes = serde_json::to_vec_pretty(&data.to_json()?)
            .map_err(|e| CacheError::Persistence(format!("failed to encode snapshot: {}", e)))?;

        fs::write(&tmp_path, &bytes).await.map_err(|e| {
            CacheError::Persistence(format!("failed to write {}: {}", tmp_path.display(), e))
        })?;
        if let Err(e) = fs::rename(&tmp_path, &path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(CacheError::Persistence(format!(
                "failed to move snapshot into place at {}: {}",
                path.display(),
                e
            )));
        }

        info!(
            path = %path.display(),
            entries = data.metadata.total_entries,
            bytes = bytes.len(),
            "Snapshot written"
        );

        Ok(SnapshotHandle {
            path,
            file_name,
            created_at: data.metadata.created_at,
            total_entries: data.metadata.total_entries,
            size_bytes: bytes.len() as u64,
        })
    }

    // == Load ==
    /// Reads and validates the snapshot at `path`.
    ///
    /// `now_ms` is only used to warn about snapshots older than a day.
    pub async fn load(&self, path: &Path, now_ms: u64) -> Result<SnapshotData> {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CacheError::NotFound(format!(
                    "snapshot file not found: {}",
                    path.display()
                )))
            }
            Err(e) => {
                return Err(CacheError::Persistence(format!(
                    "failed to read snapshot {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let document: Value = serde_json::from_slice(&bytes).map_err(|e| {
            CacheError::Persistence(format!("invalid snapshot JSON in {}: {}", path.display(), e))
        })?;
        let data = SnapshotData::from_json(document)?;

        let created_ms = data.metadata.created_at.timestamp_millis().max(0) as u64;
        let age_ms = now_ms.saturating_sub(created_ms);
        if age_ms > STALE_AFTER_MS {
            warn!(
                path = %path.display(),
                age_secs = age_ms / 1000,
                "Snapshot is older than 24 hours"
            );
        }

        let actual = data.entry_count();
        if actual != data.metadata.total_entries {
            warn!(
                path = %path.display(),
                recorded = data.metadata.total_entries,
                actual,
                "Snapshot entry count does not match its metadata"
            );
        }

        debug!(path = %path.display(), entries = actual, "Snapshot loaded");
        Ok(data)
    }

    // == Resolve ==
    /// Handle for a snapshot file name inside the snapshot directory.
    ///
    /// Only names this manager could have produced are accepted, so a name can
    /// never point outside the directory.
    pub async fn resolve(&self, file_name: &str) -> Result<SnapshotHandle> {
        let Some((created_ms, _)) = parse_snapshot_name(file_name) else {
            return Err(CacheError::Validation(format!(
                "not a snapshot file name: {}",
                file_name
            )));
        };
        let path = self.dir.join(file_name);
        let metadata = fs::metadata(&path).await.map_err(|_| {
            CacheError::NotFound(format!("snapshot not found: {}", file_name))
        })?;

        Ok(SnapshotHandle {
            path,
            file_name: file_name.to_string(),
            created_at: datetime_from_ms(created_ms),
            total_entries: 0,
            size_bytes: metadata.len(),
        })
    }

    // == List ==
    /// Every snapshot in the directory, newest first.
    ///
    /// Files whose metadata cannot be read are skipped with a warning.
    pub async fn list_snapshots(&self) -> Result<Vec<SnapshotHandle>> {
        let mut found = Vec::new();
        for (created_ms, n, path, file_name) in self.snapshot_files().await? {
            let size_bytes = match fs::metadata(&path).await {
                Ok(m) => m.len(),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Cannot stat snapshot");
                    continue;
                }
            };
            let total_entries = match read_metadata(&path).await {
                Ok(metadata) => metadata.total_entries,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Cannot read snapshot metadata");
                    continue;
                }
            };
            found.push((
                (created_ms, n),
                SnapshotHandle {
                    path,
                    file_name,
                    created_at: datetime_from_ms(created_ms),
                    total_entries,
                    size_bytes,
                },
            ));
        }

        found.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(found.into_iter().map(|(_, handle)| handle).collect())
    }

    // == Cleanup ==
    /// Deletes snapshots older than `max_age`, returning how many were removed.
    pub async fn cleanup_old_snapshots(&self, max_age: Duration, now_ms: u64) -> Result<usize> {
        let cutoff = now_ms.saturating_sub(max_age.as_millis() as u64);
        let mut removed = 0;

        for (created_ms, _, path, _) in self.snapshot_files().await? {
            if created_ms >= cutoff {
                continue;
            }
            match fs::remove_file(&path).await {
                Ok(()) => {
                    debug!(path = %path.display(), "Removed old snapshot");
                    removed += 1;
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove snapshot"),
            }
        }

        if removed > 0 {
            info!(removed, "Old snapshots cleaned up");
        }
        Ok(removed)
    }

    async fn snapshot_files(&self) -> Result<Vec<(u64, u64, PathBuf, String)>> {
        let mut files = Vec::new();
        let mut dir = match fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
            Err(e) => {
                return Err(CacheError::Persistence(format!(
                    "failed to list {}: {}",
                    self.dir.display(),
                    e
                )))
            }
        };

        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|e| CacheError::Persistence(format!("failed to list snapshots: {}", e)))?
        {
            let Ok(file_name) = item.file_name().into_string() else {
                continue;
            };
            if let Some((created_ms, n)) = parse_snapshot_name(&file_name) {
                files.push((created_ms, n, item.path(), file_name));
            }
        }
        Ok(files)
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value)
        .map_err(|e| CacheError::Persistence(format!("failed to encode snapshot: {}", e)))
}

fn datetime_from_ms(ms: u64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms as i64).unwrap_or_default()
}

/// `cache_snapshot_<ms>_<n>.json` → `(ms, n)`.
fn parse_snapshot_name(name: &str) -> Option<(u64, u64)> {
    let stem = name
        .strip_prefix(SNAPSHOT_PREFIX)?
        .strip_suffix(SNAPSHOT_SUFFIX)?;
    let (ms, n) = stem.split_once('_')?;
    Some((ms.parse().ok()?, n.parse().ok()?))
}

async fn read_metadata(path: &Path) -> Result<SnapshotMetadata> {
    #[derive(Deserialize)]
    struct Header {
        metadata: SnapshotMetadata,
    }

    let bytes = fs::read(path)
        .await
        .map_err(|e| CacheError::Persistence(e.to_string()))?;
    let header: Header =
        serde_json::from_slice(&bytes).map_err(|e| CacheError::Persistence(e.to_string()))?;
    Ok(header.metadata)
}
