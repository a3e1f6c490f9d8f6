//! LRU cache of decoded chunks.
//!
//! ```text
//! entries: HashMap<ChunkKey, CachedChunk>   (O(1) lookup)
//! lru:     VecDeque<ChunkKey>               (most recently used at back)
//! ```
//!
//! Capacity is small (tens of chunks) so promoting an entry scans `lru`
//! linearly. Dirty chunks evicted from the cache are handed back to the
//! caller, which must write them out or [`restore`](ChunkCache::restore)
//! them.

use std::collections::{HashMap, VecDeque};

/// Identifies one chunk of one layer.
///
/// `dataset` is the slot the store assigned to the layer when it was
/// registered; slots are never reused because layers are never removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkKey {
    pub dataset: usize,
    pub chunk: u64,
}

/// A decoded chunk: `rows × num_bins` counts, row-major.
#[derive(Debug, Clone)]
pub struct CachedChunk {
    pub values: Vec<u32>,
    pub dirty: bool,
}

/// Cache usage counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    /// Dirty chunks written to the file (on eviction or flush).
    pub write_backs: u64,
}

#[derive(Debug)]
pub struct ChunkCache {
    capacity: usize,
    entries: HashMap<ChunkKey, CachedChunk>,
    lru: VecDeque<ChunkKey>,
    stats: CacheStats,
}

impl ChunkCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            lru: VecDeque::with_capacity(capacity),
            stats: CacheStats::default(),
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Look up a chunk, marking it most recently used. Counts a hit or miss.
    pub fn get_mut(&mut self, key: ChunkKey) -> Option<&mut CachedChunk> {
        if self.entries.contains_key(&key) {
            self.stats.hits += 1;
            self.touch(key);
            self.entries.get_mut(&key)
        } else {
            self.stats.misses += 1;
            None
        }
    }

    /// Insert or replace a chunk and mark it most recently used.
    ///
    /// Never evicts; the cache may hold more than `capacity` entries until
    /// [`evict_lru`](Self::evict_lru) trims it.
    pub fn insert(&mut self, key: ChunkKey, chunk: CachedChunk) {
        if self.entries.insert(key, chunk).is_some() {
            self.touch(key);
        } else {
            self.lru.push_back(key);
        }
    }

    /// Remove the least recently used entry while more than `keep` are held.
    ///
    /// The caller owns the victim from then on and must persist it when dirty.
    pub fn evict_lru(&mut self, keep: usize) -> Option<(ChunkKey, CachedChunk)> {
        if self.entries.len() <= keep {
            return None;
        }
        let victim = self.lru.pop_front()?;
        self.stats.evictions += 1;
        self.entries.remove(&victim).map(|chunk| (victim, chunk))
    }

    /// Put back a victim that could not be written, as the next one to evict.
    pub fn restore(&mut self, key: ChunkKey, chunk: CachedChunk) {
        if self.entries.insert(key, chunk).is_none() {
            self.lru.push_front(key);
        }
        self.stats.evictions = self.stats.evictions.saturating_sub(1);
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Dirty chunks in key order, so write-back is deterministic.
    pub fn dirty_keys(&self) -> Vec<ChunkKey> {
        let mut keys: Vec<ChunkKey> = self
            .entries
            .iter()
            .filter(|(_, c)| c.dirty)
            .map(|(k, _)| *k)
            .collect();
        keys.sort_unstable();
        keys
    }

    /// Access without touching LRU order or counters.
    pub fn peek_mut(&mut self, key: ChunkKey) -> Option<&mut CachedChunk> {
        self.entries.get_mut(&key)
    }

    pub fn record_write_back(&mut self) {
        self.stats.write_backs += 1;
    }

    fn touch(&mut self, key: ChunkKey) {
        if let Some(pos) = self.lru.iter().position(|k| *k == key) {
            self.lru.remove(pos);
        }
        self.lru.push_back(key);
    }
}
