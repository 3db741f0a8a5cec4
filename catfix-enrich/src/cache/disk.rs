//! Disk TTL tier
//!
//! One JSON file per entry, named by the SHA-256 of the cache key. Each file
//! holds the key, the write timestamp (unix milliseconds) and the value. Reads
//! never fail: expired, corrupt, unreadable or mismatched entries are absent.
//!
//! Writes go to a uniquely named temp file in the same directory and are then
//! renamed over the target, so a reader never sees a partial entry and
//! concurrent writers of one key are last-writer-wins.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

const ENTRY_EXTENSION: &str = "json";
const TEMP_EXTENSION: &str = "tmp";

#[derive(Debug, Serialize, Deserialize)]
struct DiskEntry {
    key: String,
    /// Unix milliseconds
    written_at: i64,
    value: Value,
}

#[derive(Debug, Clone)]
pub struct DiskTier {
    dir: PathBuf,
    max_age: Duration,
}

impl DiskTier {
    /// Directory is created lazily on first write
    pub fn new(dir: impl Into<PathBuf>, max_age: Duration) -> Self {
        Self {
            dir: dir.into(),
            max_age,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let name = format!("{:x}", Sha256::digest(key.as_bytes()));
        self.dir.join(format!("{}.{}", name, ENTRY_EXTENSION))
    }

    fn is_expired(&self, written_at: i64, now: i64) -> bool {
        let age_ms = now.saturating_sub(written_at);
        age_ms > 0 && age_ms as u128 > self.max_age.as_millis()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let path = self.entry_path(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Unreadable cache entry");
                return None;
            }
        };

        let entry: DiskEntry = match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt cache entry");
                return None;
            }
        };

        if entry.key != key {
            // SHA-256 collision or foreign file
            warn!(path = %path.display(), "Cache entry key mismatch");
            return None;
        }

        if self.is_expired(entry.written_at, chrono::Utc::now().timestamp_millis()) {
            debug!(key, "Cache entry expired");
            return None;
        }

        Some(entry.value)
    }

    pub fn put(&self, key: &str, value: &Value) -> io::Result<()> {
        self.put_with_timestamp(key, value, chrono::Utc::now().timestamp_millis())
    }

    pub(crate) fn put_with_timestamp(
        &self,
        key: &str,
        value: &Value,
        written_at: i64,
    ) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;

        let entry = DiskEntry {
            key: key.to_string(),
            written_at,
            value: value.clone(),
        };
        let bytes = serde_json::to_vec(&entry)?;

        let target = self.entry_path(key);
        let temp = target.with_extension(format!(
            "{}.{}",
            uuid::Uuid::new_v4().simple(),
            TEMP_EXTENSION
        ));

        fs::write(&temp, bytes)?;
        if let Err(e) = fs::rename(&temp, &target) {
            let _ = fs::remove_file(&temp);
            return Err(e);
        }
        Ok(())
    }

    /// Delete expired and unreadable entries; returns the number deleted
    pub fn purge_expired(&self) -> usize {
        let now = chrono::Utc::now().timestamp_millis();
        let mut purged = 0;

        for path in self.entry_files() {
            let expired = match fs::read(&path)
                .ok()
                .and_then(|bytes| serde_json::from_slice::<DiskEntry>(&bytes).ok())
            {
                Some(entry) => self.is_expired(entry.written_at, now),
                None => true,
            };

            if expired {
                match fs::remove_file(&path) {
                    Ok(()) => purged += 1,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Failed to purge cache entry")
                    }
                }
            }
        }

        purged
    }

    /// Delete every entry and leftover temp file; returns the number deleted
    pub fn clear_all(&self) -> usize {
        let mut removed = 0;
        let Ok(read_dir) = fs::read_dir(&self.dir) else {
            return 0;
        };

        for path in read_dir.flatten().map(|e| e.path()) {
            if is_cache_file(&path) {
                match fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Failed to remove cache file")
                    }
                }
            }
        }

        removed
    }

    /// Number of entry files currently on disk (expired ones included)
    pub fn entry_count(&self) -> usize {
        self.entry_files().len()
    }

    fn entry_files(&self) -> Vec<PathBuf> {
        match fs::read_dir(&self.dir) {
            Ok(read_dir) => read_dir
                .flatten()
                .map(|e| e.path())
                .filter(|p| p.extension().and_then(|e| e.to_str()) == Some(ENTRY_EXTENSION))
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

fn is_cache_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some(ENTRY_EXTENSION) | Some(TEMP_EXTENSION)
    )
}
