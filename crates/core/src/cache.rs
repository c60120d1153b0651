// Byte-bounded recency cache for serialized workflows and operators.
//
// Entries live in a map keyed by id; a second ordered index keyed by the
// entry's last-access tick gives the eviction order. Touching an entry moves
// it to the back of that index.

use bytes::Bytes;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Fixed bookkeeping cost charged to every entry
pub const ENTRY_OVERHEAD: usize = 32;

#[derive(Debug)]
struct CacheEntry {
    payload: Bytes,
    last_access: u64,
    size: usize,
}

/// Counters describing cache effectiveness
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub rejections: u64,
}

/// Least-recently-used cache bounded by total entry size in bytes
#[derive(Debug)]
pub struct RecencyCache {
    capacity: usize,
    remaining: usize,
    clock: u64,
    entries: HashMap<String, CacheEntry>,
    recency: BTreeMap<u64, String>,
    stats: CacheStats,
}

impl RecencyCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            remaining: capacity,
            clock: 0,
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            stats: CacheStats::default(),
        }
    }

    /// Size an entry is charged against the capacity
    pub fn entry_size(id: &str, payload: &[u8]) -> usize {
        id.len() + payload.len() + ENTRY_OVERHEAD
    }

    /// Insert `payload` under `id`, evicting the oldest entries if needed
    ///
    /// Returns `false` when the entry alone exceeds the total capacity; the
    /// entry is then simply not cached.
    pub fn add(&mut self, id: &str, payload: Bytes) -> bool {
        // Replacing an entry must never leave the stale bytes behind
        self.remove(id);

        let size = Self::entry_size(id, &payload);
        if size > self.capacity {
            self.stats.rejections += 1;
            tracing::warn!(
                id,
                size,
                capacity = self.capacity,
                "Entry exceeds cache capacity, not caching"
            );
            return false;
        }

        while size > self.remaining {
            let Some((_, oldest)) = self.recency.pop_first() else {
                break;
            };
            if let Some(evicted) = self.entries.remove(&oldest) {
                self.remaining += evicted.size;
                self.stats.evictions += 1;
                tracing::debug!(id = %oldest, size = evicted.size, "Evicted cache entry");
            }
        }

        let last_access = self.tick();
        self.recency.insert(last_access, id.to_string());
        self.entries.insert(
            id.to_string(),
            CacheEntry {
                payload,
                last_access,
                size,
            },
        );
        self.remaining -= size;
        true
    }

    /// Cached bytes for `id`; does not refresh recency
    pub fn find(&mut self, id: &str) -> Option<Bytes> {
        match self.entries.get(id) {
            Some(entry) => {
                self.stats.hits += 1;
                Some(entry.payload.clone())
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Mark `id` as most recently used. Returns `false` if it is not cached.
    pub fn update(&mut self, id: &str) -> bool {
        let now = self.tick();
        let Some(entry) = self.entries.get_mut(id) else {
            return false;
        };
        self.recency.remove(&entry.last_access);
        entry.last_access = now;
        self.recency.insert(now, id.to_string());
        true
    }

    /// Drop `id` from the cache, if present
    pub fn invalidate(&mut self, id: &str) -> bool {
        self.remove(id)
    }

    /// Empty the cache and restore the full capacity
    pub fn flush(&mut self) {
        self.entries.clear();
        self.recency.clear();
        self.remaining = self.capacity;
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn remaining_capacity(&self) -> usize {
        self.remaining
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    fn remove(&mut self, id: &str) -> bool {
        match self.entries.remove(id) {
            Some(entry) => {
                self.recency.remove(&entry.last_access);
                self.remaining += entry.size;
                true
            }
            None => false,
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}
