//! Bounded in-memory LRU tier
//!
//! Recency is tracked with a monotonic logical clock. Every access appends a
//! `(tick, key)` pair to a queue; an entry's current tick lives in the map, so
//! stale queue pairs are skipped lazily during eviction. The queue is compacted
//! once it grows past a multiple of the capacity, which keeps `get`/`put` O(1)
//! amortized.
//!
//! Eviction removes exactly the entry with the oldest last access. Ticks are
//! unique, so ties cannot occur and eviction is deterministic.

use serde_json::Value;
use std::collections::{HashMap, VecDeque};

#[derive(Debug)]
struct MemoryEntry {
    value: Value,
    last_access: u64,
}

/// Strict least-recently-used map of cache keys to JSON values
#[derive(Debug)]
pub struct MemoryTier {
    capacity: usize,
    entries: HashMap<String, MemoryEntry>,
    recency: VecDeque<(u64, String)>,
    clock: u64,
}

impl MemoryTier {
    /// Capacity 0 disables the tier: `put` stores nothing
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity.min(4096)),
            recency: VecDeque::new(),
            clock: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Look up a key and refresh its recency
    pub fn get(&mut self, key: &str) -> Option<Value> {
        let tick = self.next_tick();
        let entry = self.entries.get_mut(key)?;
        entry.last_access = tick;
        let value = entry.value.clone();
        self.recency.push_back((tick, key.to_string()));
        self.maybe_compact();
        Some(value)
    }

    /// Insert or replace a value; returns the evicted key, if any
    pub fn put(&mut self, key: &str, value: Value) -> Option<String> {
        if self.capacity == 0 {
            return None;
        }

        let tick = self.next_tick();
        let mut evicted = None;

        if let Some(entry) = self.entries.get_mut(key) {
            entry.value = value;
            entry.last_access = tick;
        } else {
            if self.entries.len() >= self.capacity {
                evicted = self.evict_oldest();
            }
            self.entries.insert(
                key.to_string(),
                MemoryEntry {
                    value,
                    last_access: tick,
                },
            );
        }

        self.recency.push_back((tick, key.to_string()));
        self.maybe_compact();
        evicted
    }

    /// Keep a resident value over `value`; returns whichever value the tier
    /// now serves for `key`
    pub fn insert_if_absent(&mut self, key: &str, value: Value) -> Value {
        match self.get(key) {
            Some(resident) => resident,
            None => {
                self.put(key, value.clone());
                value
            }
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
    }

    fn next_tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn evict_oldest(&mut self) -> Option<String> {
        while let Some((tick, key)) = self.recency.pop_front() {
            let is_current = self
                .entries
                .get(&key)
                .map(|e| e.last_access == tick)
                .unwrap_or(false);
            if is_current {
                self.entries.remove(&key);
                return Some(key);
            }
        }
        None
    }

    fn maybe_compact(&mut self) {
        if self.recency.len() <= self.capacity.saturating_mul(4).max(64) {
            return;
        }

        let mut live: Vec<(u64, String)> = self
            .entries
            .iter()
            .map(|(k, e)| (e.last_access, k.clone()))
            .collect();
        live.sort_unstable_by_key(|(tick, _)| *tick);
        self.recency = live.into();
    }
}
