//! Write-Ahead Log Module
//!
//! Append-only, checksummed record of every mutating call. Records are JSON
//! lines stored in segment files named after the first sequence they hold:
//!
//! ```text
//! <wal_path>/wal_00000000000000000001.log
//! <wal_path>/wal_00000000000000004127.log   <- active segment
//! ```
//!
//! A segment is rotated once it reaches the configured size. Reading walks the
//! segments in name order, which is sequence order.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{CacheError, Result};

const SEGMENT_PREFIX: &str = "wal_";
const SEGMENT_SUFFIX: &str = ".log";

// == Operation Type ==
/// Kind of mutation a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WalOp {
    Set,
    Delete,
    Clear,
}

impl WalOp {
    fn as_str(self) -> &'static str {
        match self {
            WalOp::Set => "SET",
            WalOp::Delete => "DELETE",
            WalOp::Clear => "CLEAR",
        }
    }
}

// == WAL Record ==
/// A record as read back from disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalRecord {
    pub sequence: u64,
    /// Unix milliseconds, strictly increasing across the log
    pub timestamp: u64,
    pub op: WalOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<u64>,
    pub checksum: String,
}

impl WalRecord {
    /// Recomputes the checksum from the record's content.
    pub fn calculate_checksum(&self) -> String {
        record_checksum(
            self.sequence,
            self.timestamp,
            self.op,
            self.key.as_deref(),
            self.value.as_ref(),
            self.ttl_seconds,
        )
    }

    /// True if the stored checksum matches the content.
    pub fn verify(&self) -> bool {
        self.checksum == self.calculate_checksum()
    }
}

/// Borrowed view written to disk; field names match [`WalRecord`].
#[derive(Serialize)]
struct WalLine<'a> {
    sequence: u64,
    timestamp: u64,
    op: WalOp,
    #[serde(skip_serializing_if = "Option::is_none")]
    key: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ttl_seconds: Option<u64>,
    checksum: &'a str,
}

fn record_checksum(
    sequence: u64,
    timestamp: u64,
    op: WalOp,
    key: Option<&str>,
    value: Option<&Value>,
    ttl_seconds: Option<u64>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(sequence.to_le_bytes());
    hasher.update(timestamp.to_le_bytes());
    hasher.update(op.as_str().as_bytes());
    hasher.update([0u8]);
    if let Some(key) = key {
        hasher.update(key.as_bytes());
    }
    hasher.update([0u8]);
    if let Some(value) = value {
        hasher.update(value.to_string().as_bytes());
    }
    hasher.update([0u8]);
    if let Some(ttl) = ttl_seconds {
        hasher.update(ttl.to_le_bytes());
    }
    format!("{:x}", hasher.finalize())
}

// == WAL Write ==
/// A mutation about to be logged.
#[derive(Debug, Clone, Copy)]
pub struct WalWrite<'a> {
    pub op: WalOp,
    pub key: Option<&'a str>,
    pub value: Option<&'a Value>,
    pub ttl_seconds: Option<u64>,
}

impl<'a> WalWrite<'a> {
    pub fn set(key: &'a str, value: &'a Value, ttl_seconds: u64) -> Self {
        Self {
            op: WalOp::Set,
            key: Some(key),
            value: Some(value),
            ttl_seconds: Some(ttl_seconds),
        }
    }

    pub fn delete(key: &'a str) -> Self {
        Self {
            op: WalOp::Delete,
            key: Some(key),
            value: None,
            ttl_seconds: None,
        }
    }

    pub fn clear() -> Self {
        Self {
            op: WalOp::Clear,
            key: None,
            value: None,
            ttl_seconds: None,
        }
    }
}

// == Read Result ==
/// Every valid record on disk plus a count of lines that were dropped.
#[derive(Debug, Default)]
pub struct WalContents {
    pub records: Vec<WalRecord>,
    /// Torn, unparsable, out-of-order or checksum-failing lines
    pub skipped: usize,
}

#[derive(Debug, Default)]
struct WalState {
    initialized: bool,
    file: Option<File>,
    segment_path: Option<PathBuf>,
    segment_bytes: u64,
    next_sequence: u64,
    last_timestamp: u64,
}

// == Write-Ahead Log ==
/// Durable, ordered, append-only log of cache mutations.
#[derive(Debug)]
pub struct WriteAheadLog {
    dir: PathBuf,
    max_segment_bytes: u64,
    sync: bool,
    state: Mutex<WalState>,
}

impl WriteAheadLog {
    /// Creates a log rooted at `dir`. No I/O happens until the first append or read.
    pub fn new(dir: impl Into<PathBuf>, max_segment_bytes: u64, sync: bool) -> Self {
        Self {
            dir: dir.into(),
            max_segment_bytes: max_segment_bytes.max(1),
            sync,
            state: Mutex::new(WalState::default()),
        }
    }

    /// Directory holding the segments.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    // == Append ==
    /// Appends `write` and returns its sequence number.
    ///
    /// The record is flushed (and fsynced when enabled) before this returns,
    /// so callers may apply the mutation afterwards.
    pub async fn append(&self, write: WalWrite<'_>, timestamp_ms: u64) -> Result<u64> {
        let mut state = self.state.lock().await;
        self.ensure_initialized(&mut state).await?;

        let sequence = state.next_sequence;
        // ties move forward by a millisecond so timestamps strictly increase
        let timestamp = timestamp_ms.max(state.last_timestamp.saturating_add(1));
        let checksum = record_checksum(
            sequence,
            timestamp,
            write.op,
            write.key,
            write.value,
            write.ttl_seconds,
        );
        let line = WalLine {
            sequence,
            timestamp,
            op: write.op,
            key: write.key,
            value: write.value,
            ttl_seconds: write.ttl_seconds,
            checksum: &checksum,
        };
        let mut bytes = serde_json::to_vec(&line).map_err(|e| {
            CacheError::Durability(format!("failed to encode WAL record {}: {}", sequence, e))
        })?;
        bytes.push(b'\n');

        if let Err(e) = self.write_line(&mut state, sequence, &bytes).await {
            state.file = None;
            self.discard_partial_write(&mut state).await;
            return Err(CacheError::Durability(format!(
                "WAL append of record {} in {} failed: {}",
                sequence,
                self.dir.display(),
                e
            )));
        }

        state.next_sequence += 1;
        state.last_timestamp = timestamp;
        state.segment_bytes += bytes.len() as u64;
        debug!(sequence, op = write.op.as_str(), "WAL record appended");
        Ok(sequence)
    }

    async fn write_line(
        &self,
        state: &mut WalState,
        sequence: u64,
        bytes: &[u8],
    ) -> std::io::Result<()> {
        if state.segment_path.is_none() || state.segment_bytes >= self.max_segment_bytes {
            let path = self.dir.join(segment_name(sequence));
            if state.segment_path.is_some() {
                info!(path = %path.display(), "Rotating WAL segment");
            }
            state.file = Some(open_segment(&path).await?);
            state.segment_path = Some(path);
            state.segment_bytes = 0;
        }

        if state.file.is_none() {
            if let Some(path) = &state.segment_path {
                state.file = Some(open_segment(path).await?);
            }
        }

        let file = state
            .file
            .as_mut()
            .ok_or_else(|| std::io::Error::other("no active WAL segment"))?;
        file.write_all(bytes).await?;
        file.flush().await?;
        if self.sync {
            file.sync_data().await?;
        }
        Ok(())
    }

    /// Cuts the active segment back to its last complete record so the next
    /// append starts on a fresh line.
    async fn discard_partial_write(&self, state: &mut WalState) {
        let Some(path) = state.segment_path.clone() else {
            return;
        };
        if let Err(e) = truncate_segment(&path, state.segment_bytes).await {
            // re-derive sequence and tail state from disk on the next append
            warn!(
                path = %path.display(),
                error = %e,
                "Could not discard partial WAL write"
            );
            state.initialized = false;
        }
    }

    async fn ensure_initialized(&self, state: &mut WalState) -> Result<()> {
        if state.initialized {
            return Ok(());
        }

        fs::create_dir_all(&self.dir).await.map_err(|e| {
            CacheError::Durability(format!(
                "failed to create WAL directory {}: {}",
                self.dir.display(),
                e
            ))
        })?;

        let segments = self.segments().await?;
        let mut next_sequence = 1;
        let mut last_timestamp = 0;

        if let Some((first_sequence, path)) = segments.last() {
            let (records, _) = read_segment(path).await?;
            next_sequence = records
                .iter()
                .map(|r| r.sequence + 1)
                .max()
                .unwrap_or(*first_sequence)
                .max(*first_sequence);
            last_timestamp = records.iter().map(|r| r.timestamp).max().unwrap_or(0);

            let size = terminate_last_line(path).await.map_err(|e| {
                CacheError::Durability(format!(
                    "failed to repair WAL segment {}: {}",
                    path.display(),
                    e
                ))
            })?;
            state.segment_path = Some(path.clone());
            state.segment_bytes = size;
        }

        state.file = None;
        state.next_sequence = next_sequence;
        state.last_timestamp = last_timestamp;
        state.initialized = true;
        debug!(
            dir = %self.dir.display(),
            next_sequence,
            segments = segments.len(),
            "WAL opened"
        );
        Ok(())
    }

    // == Read ==
    /// Reads every valid record in append order.
    ///
    /// Lines that fail to parse or verify, and records whose sequence does not
    /// increase, are skipped with a warning.
    pub async fn read_all(&self) -> Result<WalContents> {
        // Serialize with appends so a half-written line is never observed
        let _state = self.state.lock().await;

        let mut contents = WalContents::default();
        let mut last_sequence = 0;

        for (_, path) in self.segments().await? {
            let (records, skipped) = read_segment(&path).await?;
            contents.skipped += skipped;
            for record in records {
                if record.sequence <= last_sequence {
                    warn!(
                        sequence = record.sequence,
                        last_sequence, "Skipping out-of-order WAL record"
                    );
                    contents.skipped += 1;
                    continue;
                }
                last_sequence = record.sequence;
                contents.records.push(record);
            }
        }

        Ok(contents)
    }

    /// Segment files sorted by first sequence.
    pub async fn segments(&self) -> Result<Vec<(u64, PathBuf)>> {
        let mut segments = Vec::new();
        let mut dir = match fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(segments),
            Err(e) => {
                return Err(CacheError::Durability(format!(
                    "failed to list WAL directory {}: {}",
                    self.dir.display(),
                    e
                )))
            }
        };

        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|e| CacheError::Durability(format!("failed to list WAL directory: {}", e)))?
        {
            let name = item.file_name();
            if let Some(first) = name.to_str().and_then(parse_segment_name) {
                segments.push((first, item.path()));
            }
        }

        segments.sort();
        Ok(segments)
    }
}

fn segment_name(first_sequence: u64) -> String {
    format!("{}{:020}{}", SEGMENT_PREFIX, first_sequence, SEGMENT_SUFFIX)
}

fn parse_segment_name(name: &str) -> Option<u64> {
    name.strip_prefix(SEGMENT_PREFIX)?
        .strip_suffix(SEGMENT_SUFFIX)?
        .parse()
        .ok()
}

async fn open_segment(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path).await
}

/// Ends the segment with a newline if a crash left its last line unterminated,
/// so the next record never shares a line with the fragment. Returns the size.
async fn terminate_last_line(path: &Path) -> std::io::Result<u64> {
    let bytes = fs::read(path).await?;
    if bytes.last().map_or(true, |b| *b == b'\n') {
        return Ok(bytes.len() as u64);
    }

    warn!(path = %path.display(), "WAL segment ends in a torn line");
    let mut file = open_segment(path).await?;
    file.write_all(b"\n").await?;
    file.flush().await?;
    file.sync_data().await?;
    Ok(bytes.len() as u64 + 1)
}

async fn truncate_segment(path: &Path, len: u64) -> std::io::Result<()> {
    let file = OpenOptions::new().write(true).open(path).await?;
    file.set_len(len).await?;
    file.sync_data().await
}

async fn read_segment(path: &Path) -> Result<(Vec<WalRecord>, usize)> {
    let bytes = fs::read(path).await.map_err(|e| {
        CacheError::Durability(format!("failed to read WAL segment {}: {}", path.display(), e))
    })?;

    let mut records = Vec::new();
    let mut skipped = 0;
    for (line_no, line) in bytes.split(|b| *b == b'\n').enumerate() {
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match serde_json::from_slice::<WalRecord>(line) {
            Ok(record) if record.verify() => records.push(record),
            Ok(record) => {
                warn!(
                    path = %path.display(),
                    sequence = record.sequence,
                    "WAL record failed checksum verification"
                );
                skipped += 1;
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    line = line_no + 1,
                    error = %e,
                    "Unparsable WAL line"
                );
                skipped += 1;
            }
        }
    }
    Ok((records, skipped))
}
