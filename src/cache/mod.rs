//! Sharded write-back page cache with global LRU eviction
//!
//! # Design
//!
//! - Offsets hash (FNV-1a) into `HASH_SIZE` buckets; buckets are grouped
//!   into `MUTEX_GROUPS` shards, each guarded by one mutex that owns the
//!   shard's entry map.
//! - A single LRU mutex owns the recency list (an arena of slots, see
//!   [`lru::LruList`]) and with it the entry count.
//! - Lock order is **shard first, then LRU**. The LRU mutex is never held
//!   while a shard mutex is acquired; eviction picks a candidate under the
//!   LRU lock alone, then re-validates it under the victim's shard lock and
//!   restarts if it lost the race.
//!
//! Misses read through the backing store; dirty entries are written back
//! when evicted or flushed, and write-back failures are logged and swallowed
//! (durability is advisory).

mod entry;
mod lru;

pub use entry::{CacheEntry, Page};
pub use lru::LruList;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::BLOCK_SIZE;
use crate::error::Result;
use crate::store::BackingStore;

/// Number of hash buckets for offset lookup
pub const HASH_SIZE: usize = 2048;

/// Number of bucket groups, each with its own mutex
pub const MUTEX_GROUPS: usize = 16;

type Shard = Mutex<HashMap<u64, Arc<CacheEntry>>>;

/// Fixed-capacity, sharded, write-back page cache
pub struct PageCache {
    shards: Vec<Shard>,
    lru: Mutex<LruList>,
    capacity: usize,
    store: Arc<BackingStore>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    writeback_failures: AtomicU64,
}

impl PageCache {
    /// Create a cache of `capacity` entries reading through `store`
    pub fn new(store: Arc<BackingStore>, capacity: usize) -> Self {
        let shards = (0..MUTEX_GROUPS)
            .map(|_| Mutex::new(HashMap::new()))
            .collect();
        info!(capacity, shards = MUTEX_GROUPS, "page cache initialized");
        Self {
            shards,
            lru: Mutex::new(LruList::new()),
            capacity,
            store,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            writeback_failures: AtomicU64::new(0),
        }
    }

    /// FNV-1a over the offset's bytes
    fn hash_offset(offset: u64) -> u64 {
        const FNV_PRIME: u64 = 1099511628211;
        const FNV_OFFSET_BASIS: u64 = 14695981039346656037;
        let mut hash = FNV_OFFSET_BASIS;
        for byte in offset.to_ne_bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        hash
    }

    /// Bucket index for an offset
    fn bucket_index(offset: u64) -> usize {
        ((Self::hash_offset(offset) / BLOCK_SIZE as u64) % HASH_SIZE as u64) as usize
    }

    /// Shard (mutex group) index for an offset
    fn shard_index(offset: u64) -> usize {
        Self::bucket_index(offset) % MUTEX_GROUPS
    }

    /// Fetch the page at `offset`, reading through the backing store on a
    /// miss. `write_intent` marks the entry dirty.
    ///
    /// The returned page is the caller's own copy.
    pub fn get(&self, offset: u64, write_intent: bool) -> Result<Page> {
        let shard_idx = Self::shard_index(offset);
        let mut shard = self.shards[shard_idx].lock();

        if let Some(entry) = shard.get(&offset) {
            let entry = Arc::clone(entry);
            if write_intent {
                entry.mark_dirty();
            }
            entry.touch();
            {
                let mut lru = self.lru.lock();
                lru.move_to_front(entry.lru_slot());
            }
            let page = entry.snapshot();
            drop(shard);

            let hits = self.hits.fetch_add(1, Ordering::Relaxed) + 1;
            if hits % 100 == 0 {
                let stats = self.stats();
                debug!(
                    hits = stats.hits,
                    misses = stats.misses,
                    hit_ratio = stats.hit_ratio,
                    "cache stats"
                );
            }
            return Ok(page);
        }

        // Miss: read through the store while the shard stays locked so no
        // second entry for this offset can appear.
        let data = match self.store.read(offset, BLOCK_SIZE) {
            Ok(data) => data,
            Err(e) => {
                drop(shard);
                self.misses.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };

        let entry = Arc::new(CacheEntry::new(offset, Page::from_slice(&data), write_intent));
        shard.insert(offset, Arc::clone(&entry));
        {
            let mut lru = self.lru.lock();
            let slot = lru.push_front(offset);
            entry.set_lru_slot(slot);
        }
        let page = entry.snapshot();
        drop(shard);

        self.misses.fetch_add(1, Ordering::Relaxed);
        self.evict_to_capacity();
        Ok(page)
    }

    /// Copy a worker's transformed page back into the live entry, marking
    /// it dirty. Returns false when the offset is no longer cached.
    pub fn publish(&self, offset: u64, data: &[u8]) -> bool {
        let shard = self.shards[Self::shard_index(offset)].lock();
        match shard.get(&offset) {
            Some(entry) => {
                entry.store_page(data);
                entry.mark_dirty();
                entry.touch();
                true
            }
            None => false,
        }
    }

    /// Whether an offset is currently cached. Does not count as an access.
    pub fn contains(&self, offset: u64) -> bool {
        self.shards[Self::shard_index(offset)]
            .lock()
            .contains_key(&offset)
    }

    /// Evict LRU-tail entries until the cache is back within capacity
    fn evict_to_capacity(&self) {
        loop {
            let (slot, victim_offset) = {
                let lru = self.lru.lock();
                if lru.len() <= self.capacity {
                    return;
                }
                match lru.peek_tail() {
                    Some(tail) => tail,
                    None => return,
                }
            };

            let victim = {
                let mut shard = self.shards[Self::shard_index(victim_offset)].lock();
                let entry = match shard.get(&victim_offset) {
                    Some(e) if e.lru_slot() == slot => Arc::clone(e),
                    // Entry vanished or the slot was recycled; retry
                    _ => continue,
                };
                {
                    let mut lru = self.lru.lock();
                    if lru.peek_tail() != Some((slot, victim_offset)) {
                        // Touched between candidate selection and now
                        continue;
                    }
                    lru.remove(slot);
                }
                shard.remove(&victim_offset);
                entry
            };

            if victim.is_dirty() {
                let page = victim.snapshot();
                match self.store.write(victim.offset(), page.as_slice()) {
                    Ok(()) => victim.mark_clean(),
                    Err(e) => {
                        self.writeback_failures.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            offset = victim.offset(),
                            error = %e,
                            "write-back failed during eviction, dropping entry"
                        );
                    }
                }
            }
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Write every dirty entry back to the store, returning how many pages
    /// were persisted. Failures are logged and the entries stay dirty.
    pub fn flush(&self) -> usize {
        let mut written = 0;
        for shard in &self.shards {
            let dirty: Vec<Arc<CacheEntry>> = shard
                .lock()
                .values()
                .filter(|e| e.is_dirty())
                .cloned()
                .collect();
            for entry in dirty {
                let page = entry.snapshot();
                match self.store.write(entry.offset(), page.as_slice()) {
                    Ok(()) => {
                        entry.mark_clean();
                        written += 1;
                    }
                    Err(e) => {
                        self.writeback_failures.fetch_add(1, Ordering::Relaxed);
                        warn!(offset = entry.offset(), error = %e, "flush write-back failed");
                    }
                }
            }
        }
        written
    }

    /// Drop every entry without writing anything back
    pub fn clear(&self) {
        for shard in &self.shards {
            shard.lock().clear();
        }
        self.lru.lock().clear();
    }

    /// Flush all dirty entries, then drop everything (shutdown path)
    pub fn close(&self) {
        let written = self.flush();
        self.clear();
        info!(written, "page cache closed");
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        self.lru.lock().len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Capacity in entries
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get statistics snapshot
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            hit_ratio: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
            evictions: self.evictions.load(Ordering::Relaxed),
            writeback_failures: self.writeback_failures.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }

    #[cfg(test)]
    fn map_entries(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    #[cfg(test)]
    fn peek_entry(&self, offset: u64) -> Option<Arc<CacheEntry>> {
        self.shards[Self::shard_index(offset)]
            .lock()
            .get(&offset)
            .cloned()
    }
}

/// Cache statistics snapshot
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Hit count
    pub hits: u64,
    /// Miss count
    pub misses: u64,
    /// Hit ratio (0.0 - 1.0)
    pub hit_ratio: f64,
    /// Eviction count
    pub evictions: u64,
    /// Write-backs that failed and were dropped
    pub writeback_failures: u64,
    /// Current entry count
    pub entries: usize,
}

// =============================================================================
// Tests
// =============================================================================
