//! Best-effort snapshot cache for intermediate phase results.
//!
//! Each document fingerprint owns a single slot; saving any phase overwrites whatever the slot
//! held before. Reads treat every failure as a miss so a broken cache never fails a run.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use walkdir::WalkDir;

const FINGERPRINT_PREFIX_CHARS: usize = 1000;
const ENTRY_EXTENSION: &str = "json";

/// Cheap, deterministic, non-cryptographic document identity.
///
/// Combines the character count with a 32-bit rolling hash over the first 1000 characters.
pub fn fingerprint(content: &str) -> String {
    let hash = content
        .chars()
        .take(FINGERPRINT_PREFIX_CHARS)
        .fold(0i32, |hash, c| hash.wrapping_mul(31).wrapping_add(c as i32));
    format!(
        "{}-{}",
        content.chars().count(),
        to_base36(u64::from(hash.unsigned_abs()))
    )
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();
    String::from_utf8_lossy(&digits).into_owned()
}

/// Phase whose output a cache entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CachePhase {
    /// Per-chunk analyses.
    Analyses,
    /// Section syntheses.
    Sections,
}

impl CachePhase {
    /// Tag used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Analyses => "analyses",
            Self::Sections => "sections",
        }
    }
}

/// Stored snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Document fingerprint the entry belongs to.
    pub fingerprint: String,
    /// Phase that produced `data`.
    pub phase: CachePhase,
    /// Serialized phase output.
    pub data: serde_json::Value,
    /// Save time in Unix milliseconds.
    pub timestamp_ms: i64,
}

impl CacheEntry {
    fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.timestamp_ms)
    }

    fn is_expired(&self, ttl: Duration, now_ms: i64) -> bool {
        self.age_ms(now_ms) >= ttl.as_millis() as i64
    }
}

/// Failures raised by cache backends. Never escapes [`DocumentCache`].
#[derive(Debug, Error)]
pub enum CacheError {
    /// Filesystem access failed.
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Entry could not be encoded or decoded.
    #[error("cache serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Storage backend holding one entry per fingerprint.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch the entry stored for `fingerprint`.
    async fn get(&self, fingerprint: &str) -> Result<Option<CacheEntry>, CacheError>;

    /// Replace the entry stored for `entry.fingerprint`.
    async fn put(&self, entry: CacheEntry) -> Result<(), CacheError>;
}

/// In-process store for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryCacheStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, fingerprint: &str) -> Result<Option<CacheEntry>, CacheError> {
        let entries = self.entries.lock().unwrap_or_else(|poison| poison.into_inner());
        Ok(entries.get(fingerprint).cloned())
    }

    async fn put(&self, entry: CacheEntry) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().unwrap_or_else(|poison| poison.into_inner());
        entries.insert(entry.fingerprint.clone(), entry);
        Ok(())
    }
}

/// Result of a prune pass over the cache directory.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PruneSummary {
    /// Entry files inspected.
    pub scanned: usize,
    /// Entry files deleted.
    pub removed: usize,
}

/// Directory-backed store with one JSON file per fingerprint.
#[derive(Debug, Clone)]
pub struct FileCacheStore {
    dir: PathBuf,
}

impl FileCacheStore {
    /// Store entries under `dir`; the directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the entry files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, fingerprint: &str) -> PathBuf {
        self.dir.join(format!("{fingerprint}.{ENTRY_EXTENSION}"))
    }

    /// Delete entries older than `ttl` along with files that no longer decode.
    pub fn prune_expired(&self, ttl: Duration) -> Result<PruneSummary, CacheError> {
        let mut summary = PruneSummary::default();
        if !self.dir.exists() {
            return Ok(summary);
        }
        let now = now_ms();
        for item in WalkDir::new(&self.dir).min_depth(1).max_depth(1) {
            let item = match item {
                Ok(item) => item,
                Err(error) => {
                    tracing::warn!(error = %error, "Skipping unreadable cache path");
                    continue;
                }
            };
            let path = item.path();
            if !item.file_type().is_file()
                || path.extension().and_then(|ext| ext.to_str()) != Some(ENTRY_EXTENSION)
            {
                continue;
            }
            summary.scanned += 1;

            let stale = match std::fs::read(path)
                .map_err(CacheError::from)
                .and_then(|bytes| serde_json::from_slice::<CacheEntry>(&bytes).map_err(CacheError::from))
            {
                Ok(entry) => entry.is_expired(ttl, now),
                Err(error) => {
                    tracing::debug!(path = %path.display(), error = %error, "Dropping undecodable cache entry");
                    true
                }
            };
            if stale {
                std::fs::remove_file(path)?;
                summary.removed += 1;
            }
        }
        tracing::info!(
            dir = %self.dir.display(),
            scanned = summary.scanned,
            removed = summary.removed,
            "Cache pruned"
        );
        Ok(summary)
    }
}

#[async_trait]
impl CacheStore for FileCacheStore {
    async fn get(&self, fingerprint: &str) -> Result<Option<CacheEntry>, CacheError> {
        let bytes = match tokio::fs::read(self.entry_path(fingerprint)).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(error.into()),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    async fn put(&self, entry: CacheEntry) -> Result<(), CacheError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.entry_path(&entry.fingerprint);
        let staging = path.with_extension(format!("{ENTRY_EXTENSION}.tmp"));
        tokio::fs::write(&staging, serde_json::to_vec(&entry)?).await?;
        tokio::fs::rename(&staging, &path).await?;
        Ok(())
    }
}

fn now_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Typed, failure-tolerant facade over a [`CacheStore`].
#[derive(Clone)]
pub struct DocumentCache {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
}

impl DocumentCache {
    /// Wrap `store`, treating entries older than `ttl` as absent.
    pub fn new(store: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Cache backed by process memory.
    pub fn in_memory(ttl: Duration) -> Self {
        Self::new(Arc::new(MemoryCacheStore::new()), ttl)
    }

    /// Entry lifetime.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Persist `data` as the snapshot for `fingerprint`. Failures are logged and swallowed.
    pub async fn save<T: Serialize + ?Sized>(&self, fingerprint: &str, phase: CachePhase, data: &T) {
        let data = match serde_json::to_value(data) {
            Ok(data) => data,
            Err(error) => {
                tracing::warn!(fingerprint, phase = phase.as_str(), error = %error, "Cache encode failed");
                return;
            }
        };
        let entry = CacheEntry {
            fingerprint: fingerprint.to_string(),
            phase,
            data,
            timestamp_ms: now_ms(),
        };
        match self.store.put(entry).await {
            Ok(()) => tracing::debug!(fingerprint, phase = phase.as_str(), "Cache entry saved"),
            Err(error) => {
                tracing::warn!(fingerprint, phase = phase.as_str(), error = %error, "Cache write failed");
            }
        }
    }

    /// Load the snapshot for `fingerprint` when it holds `phase` and has not expired.
    pub async fn load<T: DeserializeOwned>(&self, fingerprint: &str, phase: CachePhase) -> Option<T> {
        let entry = match self.store.get(fingerprint).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(error) => {
                tracing::warn!(fingerprint, phase = phase.as_str(), error = %error, "Cache read failed");
                return None;
            }
        };
        if entry.phase != phase {
            tracing::debug!(
                fingerprint,
                wanted = phase.as_str(),
                stored = entry.phase.as_str(),
                "Cache slot holds another phase"
            );
            return None;
        }
        if entry.is_expired(self.ttl, now_ms()) {
            tracing::debug!(fingerprint, phase = phase.as_str(), "Cache entry expired");
            return None;
        }
        match serde_json::from_value(entry.data) {
            Ok(value) => Some(value),
            Err(error) => {
                tracing::warn!(fingerprint, phase = phase.as_str(), error = %error, "Cache decode failed");
                None
            }
        }
    }
}
