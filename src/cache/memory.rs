//! In-process LRU cache.
//!
//! Holds encoded tiles in memory with a total byte budget. Locks are a set
//! of held keys guarded by a condition variable, so they only coordinate
//! threads of this process.
//!
//! # Size-Based Eviction
//!
//! The cache tracks the total size of stored tiles and evicts
//! least-recently-used entries when the budget is exceeded.

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::time::SystemTime;

use bytes::Bytes;
use lru::LruCache;
use parking_lot::{Condvar, Mutex};

use super::{require_data, tile_key, CacheBackend, CacheLookup, LockHandle, LockOutcome};
use crate::error::CacheError;
use crate::tile::Tile;

/// Default capacity: 64MB
pub const DEFAULT_MEMORY_CACHE_CAPACITY: usize = 64 * 1024 * 1024;

/// Maximum number of entries, bounding LRU bookkeeping
const DEFAULT_MAX_ENTRIES: usize = 100_000;

// =============================================================================
// Memory Cache
// =============================================================================

struct Entries {
    lru: LruCache<String, (Bytes, SystemTime)>,
    size: usize,
}

/// LRU cache of encoded tiles with a byte budget.
pub struct MemoryCache {
    name: String,
    entries: Mutex<Entries>,
    max_size: usize,
    locks: Mutex<HashSet<String>>,
    released: Condvar,
}

impl MemoryCache {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_capacity(name, DEFAULT_MEMORY_CACHE_CAPACITY)
    }

    /// Create a cache holding at most `max_size` bytes of tile data.
    pub fn with_capacity(name: impl Into<String>, max_size: usize) -> Self {
        let max_entries = NonZeroUsize::new(DEFAULT_MAX_ENTRIES).unwrap_or(NonZeroUsize::MIN);
        Self {
            name: name.into(),
            entries: Mutex::new(Entries {
                lru: LruCache::new(max_entries),
                size: 0,
            }),
            max_size,
            locks: Mutex::new(HashSet::new()),
            released: Condvar::new(),
        }
    }

    /// Number of stored tiles.
    pub fn len(&self) -> usize {
        self.entries.lock().lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().lru.is_empty()
    }

    /// Total bytes of stored tile data.
    pub fn size(&self) -> usize {
        self.entries.lock().size
    }

    pub fn capacity(&self) -> usize {
        self.max_size
    }

    /// Drop every stored tile. Held locks are kept.
    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        entries.lru.clear();
        entries.size = 0;
    }
}

impl CacheBackend for MemoryCache {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, tile: &mut Tile) -> Result<CacheLookup, CacheError> {
        let mut entries = self.entries.lock();
        match entries.lru.get(&tile_key(tile)) {
            Some((data, mtime)) => {
                tile.data = Some(data.clone());
                tile.mtime = Some(*mtime);
                Ok(CacheLookup::Hit)
            }
            None => Ok(CacheLookup::Miss),
        }
    }

    fn exists(&self, tile: &Tile) -> bool {
        self.entries.lock().lru.contains(&tile_key(tile))
    }

    fn set(&self, tile: &Tile) -> Result<(), CacheError> {
        let data = Bytes::copy_from_slice(require_data(tile)?);
        let data_size = data.len();
        let key = tile_key(tile);

        let mut entries = self.entries.lock();
        // `push` hands back the replaced value, or the entry a full LRU evicted
        if let Some((_, (evicted, _))) = entries.lru.push(key, (data, SystemTime::now())) {
            entries.size = entries.size.saturating_sub(evicted.len());
        }
        entries.size += data_size;

        while entries.size > self.max_size {
            match entries.lru.pop_lru() {
                Some((_, (evicted, _))) => {
                    entries.size = entries.size.saturating_sub(evicted.len());
                }
                None => break,
            }
        }
        Ok(())
    }

    fn delete(&self, tile: &Tile) -> Result<(), CacheError> {
        let mut entries = self.entries.lock();
        if let Some((data, _)) = entries.lru.pop(&tile_key(tile)) {
            entries.size = entries.size.saturating_sub(data.len());
        }
        Ok(())
    }

    fn lock(&self, tile: &Tile) -> Result<LockOutcome, CacheError> {
        let key = tile_key(tile);
        let mut locks = self.locks.lock();
        if !locks.insert(key.clone()) {
            return Ok(LockOutcome::AlreadyLocked);
        }
        Ok(LockOutcome::Acquired(LockHandle::new(key, None)))
    }

    fn unlock(&self, tile: &Tile, handle: LockHandle) -> Result<(), CacheError> {
        handle.redeem(tile)?;
        let mut locks = self.locks.lock();
        locks.remove(&tile_key(tile));
        self.released.notify_all();
        Ok(())
    }

    fn wait_for_lock(&self, tile: &Tile) -> Result<(), CacheError> {
        let key = tile_key(tile);
        let mut locks = self.locks.lock();
        while locks.contains(&key) {
            self.released.wait(&mut locks);
        }
        Ok(())
    }
}
