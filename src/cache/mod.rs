//! Pluggable tile storage.
//!
//! Every backend implements [`CacheBackend`]: read, write, test for and delete
//! encoded tiles, plus the advisory lock protocol that keeps a metatile from
//! being rendered twice at the same time.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          Tileset                             │
//! │      get / exists / set_many / lock / unlock / wait          │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                │ dyn CacheBackend
//!        ┌───────────────┬───────┴───────┬────────────────┐
//!        ▼               ▼               ▼                ▼
//!   ┌─────────┐    ┌───────────┐   ┌───────────┐   ┌────────────┐
//!   │  Disk   │    │  SQLite   │   │  MBTiles  │   │   Memory   │
//!   │ files + │    │ db per    │   │ one file  │   │ LRU + in-  │
//!   │ .lck    │    │ tileset   │   │           │   │ process    │
//!   └────┬────┘    └─────┬─────┘   └─────┬─────┘   │ locks      │
//!        └───────────────┴───────────────┘         └────────────┘
//!                        │
//!                  lockfile (flock)
//! ```
//!
//! The file-backed caches share [`lockfile`]: a lock is a sidecar file
//! created with create-if-absent semantics and held under an exclusive
//! advisory lock, so it coordinates threads and processes alike.

mod disk;
pub mod lockfile;
mod mbtiles;
mod memory;
mod sqlite;

use std::marker::PhantomData;

use crate::error::CacheError;
use crate::tile::Tile;

pub use disk::DiskCache;
pub use lockfile::LockFile;
pub use mbtiles::MbtilesCache;
pub use memory::{MemoryCache, DEFAULT_MEMORY_CACHE_CAPACITY};
pub use sqlite::{SqliteCache, SQLITE_BUSY_TIMEOUT_MS};

/// Result of a cache read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLookup {
    /// Tile data and mtime were filled in
    Hit,
    /// Nothing stored under this key
    Miss,
}

/// Result of a non-blocking lock attempt.
#[derive(Debug)]
pub enum LockOutcome {
    /// The caller now holds the lock and must pass the handle to `unlock`
    Acquired(LockHandle),
    /// Another actor holds the lock
    AlreadyLocked,
}

/// Proof of holding a metatile lock.
///
/// Handles cannot be sent to another thread: the thread that locked is the
/// one that unlocks.
#[derive(Debug)]
pub struct LockHandle {
    key: String,
    file: Option<LockFile>,
    _not_send: PhantomData<*const ()>,
}

impl LockHandle {
    pub(crate) fn new(key: String, file: Option<LockFile>) -> Self {
        Self {
            key,
            file,
            _not_send: PhantomData,
        }
    }

    /// Key of the tile the lock was taken for.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Check the handle belongs to `tile` and give back its lock file.
    pub(crate) fn redeem(self, tile: &Tile) -> Result<Option<LockFile>, CacheError> {
        let requested = tile_key(tile);
        if self.key != requested {
            return Err(CacheError::LockMismatch {
                held: self.key,
                requested,
            });
        }
        Ok(self.file)
    }
}

/// Persistent tile store with an advisory per-tile lock.
pub trait CacheBackend: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Whether keys include the grid name. A cache that does not namespace
    /// grids can only serve tilesets linked to a single grid.
    fn namespaces_grids(&self) -> bool {
        true
    }

    /// Whether keys include the tileset name. A cache that does not can back
    /// only one tileset.
    fn namespaces_tilesets(&self) -> bool {
        true
    }

    /// Read `tile`, filling `data` and `mtime` on a hit.
    fn get(&self, tile: &mut Tile) -> Result<CacheLookup, CacheError>;

    /// Whether something is stored for `tile`. Backend failures read as absent.
    fn exists(&self, tile: &Tile) -> bool;

    /// Store `tile.data`, replacing any previous value.
    fn set(&self, tile: &Tile) -> Result<(), CacheError>;

    /// Store several tiles. Backends with transactions write all or nothing.
    fn set_many(&self, tiles: &[Tile]) -> Result<(), CacheError> {
        tiles.iter().try_for_each(|t| self.set(t))
    }

    /// Remove `tile`. Deleting a missing tile is not an error.
    fn delete(&self, tile: &Tile) -> Result<(), CacheError>;

    /// Try to take the lock keyed on `tile` without blocking.
    fn lock(&self, tile: &Tile) -> Result<LockOutcome, CacheError>;

    /// Release a lock taken by [`lock`](CacheBackend::lock) on the same tile.
    fn unlock(&self, tile: &Tile, handle: LockHandle) -> Result<(), CacheError>;

    /// Block until nobody holds the lock keyed on `tile`.
    fn wait_for_lock(&self, tile: &Tile) -> Result<(), CacheError>;
}

/// Stable textual key of a tile, unique across tilesets and grids.
pub fn tile_key(tile: &Tile) -> String {
    format!(
        "{}/{}/{}/{}/{}/{}",
        tile.tileset(),
        tile.grid(),
        tile.z,
        tile.x,
        tile.y,
        tile.dimension_key()
    )
}

pub(crate) fn require_data(tile: &Tile) -> Result<&[u8], CacheError> {
    match tile.data.as_deref() {
        Some(data) if !data.is_empty() => Ok(data),
        _ => Err(CacheError::EmptyTile {
            x: tile.x,
            y: tile.y,
            z: tile.z,
        }),
    }
}
