//! Two-tier classification result cache
//!
//! A bounded in-memory LRU tier fronts a disk TTL tier. Reads check memory,
//! then disk (promoting a disk hit into memory unless a write landed there
//! first). Writes go to both tiers, so memory entries are always a subset of
//! disk entries.
//!
//! Keys are `"{operation}:{normalized text}"` where normalization lowercases
//! and collapses whitespace. Classify callers prefix the text with a digest of
//! their candidate lists.

pub mod disk;
pub mod memory;

pub use disk::DiskTier;
pub use memory::MemoryTier;

use catfix_common::CacheConfig;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

/// Cached classification operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheOperation {
    Normalize,
    Classify,
}

impl CacheOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheOperation::Normalize => "normalize",
            CacheOperation::Classify => "classify",
        }
    }
}

impl fmt::Display for CacheOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build the cache key for `operation` over `text`
pub fn cache_key(operation: CacheOperation, text: &str) -> String {
    let normalized = text
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");
    format!("{}:{}", operation, normalized)
}

/// Hit/miss counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub misses: u64,
    pub memory_entries: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let hits = self.memory_hits + self.disk_hits;
        let total = hits + self.misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

/// Memory LRU in front of a disk TTL store
#[derive(Debug)]
pub struct ResultCache {
    memory: Mutex<MemoryTier>,
    disk: DiskTier,
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    misses: AtomicU64,
}

impl ResultCache {
    pub fn new(memory_capacity: usize, disk: DiskTier) -> Self {
        Self {
            memory: Mutex::new(MemoryTier::new(memory_capacity)),
            disk,
            memory_hits: AtomicU64::new(0),
            disk_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Build from configuration; `None` when caching is disabled
    pub fn from_config(config: &CacheConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        let max_age = Duration::from_secs(config.max_age_hours.saturating_mul(3600));
        let disk = DiskTier::new(config.resolved_dir(), max_age);
        debug!(
            dir = %disk.dir().display(),
            memory_capacity = config.memory_capacity,
            max_age_hours = config.max_age_hours,
            "Result cache enabled"
        );
        Some(Self::new(config.memory_capacity, disk))
    }

    pub fn disk(&self) -> &DiskTier {
        &self.disk
    }

    pub fn get(&self, operation: CacheOperation, text: &str) -> Option<Value> {
        let key = cache_key(operation, text);

        if let Some(value) = self.lock_memory().get(&key) {
            self.memory_hits.fetch_add(1, Ordering::Relaxed);
            return Some(value);
        }

        match self.disk.get(&key) {
            Some(value) => {
                self.disk_hits.fetch_add(1, Ordering::Relaxed);
                Some(self.promote(&key, value))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Write-through to both tiers; a disk failure is logged and the memory
    /// tier still receives the value
    pub fn put(&self, operation: CacheOperation, text: &str, value: Value) {
        let key = cache_key(operation, text);

        if let Err(e) = self.disk.put(&key, &value) {
            warn!(key = %key, error = %e, "Failed to write cache entry to disk");
        }
        self.lock_memory().put(&key, value);
    }

    /// Typed read; an entry that no longer deserializes counts as absent
    pub fn get_as<T: serde::de::DeserializeOwned>(
        &self,
        operation: CacheOperation,
        text: &str,
    ) -> Option<T> {
        let value = self.get(operation, text)?;
        match serde_json::from_value(value) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                warn!(operation = %operation, error = %e, "Cached value has unexpected shape");
                None
            }
        }
    }

    /// Typed write
    pub fn put_as<T: Serialize>(&self, operation: CacheOperation, text: &str, value: &T) {
        match serde_json::to_value(value) {
            Ok(json) => self.put(operation, text, json),
            Err(e) => warn!(operation = %operation, error = %e, "Failed to serialize cache value"),
        }
    }

    pub fn clear_memory(&self) {
        self.lock_memory().clear();
    }

    pub fn purge_expired(&self) -> usize {
        self.disk.purge_expired()
    }

    /// Drop both tiers; returns the number of disk files deleted
    pub fn clear_all(&self) -> usize {
        self.clear_memory();
        self.disk.clear_all()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            disk_hits: self.disk_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            memory_entries: self.lock_memory().len(),
        }
    }

    /// A value read from disk loses to one written into memory meanwhile
    fn promote(&self, key: &str, value: Value) -> Value {
        self.lock_memory().insert_if_absent(key, value)
    }

    fn lock_memory(&self) -> std::sync::MutexGuard<'_, MemoryTier> {
        // No MemoryTier method can panic midway through a mutation
        self.memory.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
