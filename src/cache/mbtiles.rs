//! MBTiles cache.
//!
//! A single SQLite file with the MBTiles 1.3 schema:
//!
//! ```text
//! metadata(name, value)
//! tiles(zoom_level, tile_column, tile_row, tile_data)
//! ```
//!
//! MBTiles rows count from the south like grid rows do, so `y` is stored as
//! `tile_row` unchanged. The schema has no room for dimensions or grids, so
//! a tileset backed by this cache has one grid and no dimensions. The file
//! belongs to the first tileset that uses it; tiles of any other tileset are
//! rejected. MBTiles
//! carries no timestamps; hits have no `mtime`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::Mutex;
use r2d2::Pool;
use r2d2_sqlite::rusqlite::{params, OptionalExtension};
use r2d2_sqlite::SqliteConnectionManager;
use tracing::{debug, warn};

use super::lockfile::{self, LockFile};
use super::sqlite::SQLITE_BUSY_TIMEOUT_MS;
use super::{require_data, tile_key, CacheBackend, CacheLookup, LockHandle, LockOutcome};
use crate::error::CacheError;
use crate::tile::Tile;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS metadata (name TEXT, value TEXT, UNIQUE (name));
     CREATE TABLE IF NOT EXISTS tiles (zoom_level INTEGER, tile_column INTEGER, tile_row INTEGER, tile_data BLOB, UNIQUE (zoom_level, tile_column, tile_row));
     CREATE UNIQUE INDEX IF NOT EXISTS tile_index ON tiles (zoom_level, tile_column, tile_row);";

const INSERT_TILE: &str = "INSERT OR REPLACE INTO tiles (zoom_level, tile_column, tile_row, tile_data) \
     VALUES (?1, ?2, ?3, ?4)";

/// Tiles in one MBTiles file.
pub struct MbtilesCache {
    name: String,
    path: PathBuf,
    lock_dir: PathBuf,
    pool: Pool<SqliteConnectionManager>,
    owner: Mutex<Option<String>>,
}

impl MbtilesCache {
    /// Open or create the MBTiles file at `path`. Lock files go to a
    /// `{file name}.locks` directory next to it.
    pub fn open(name: impl Into<String>, path: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let name = name.into();
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| CacheError::io(parent, e))?;
        }

        let manager = SqliteConnectionManager::file(&path).with_init(|conn| {
            conn.busy_timeout(Duration::from_millis(SQLITE_BUSY_TIMEOUT_MS))
        });
        let pool = Pool::builder().max_size(4).build(manager)?;
        pool.get()?.execute_batch(SCHEMA)?;

        let mut lock_dir = path.clone().into_os_string();
        lock_dir.push(".locks");

        debug!(cache = %name, path = %path.display(), "opened mbtiles file");
        Ok(Self {
            name,
            path,
            lock_dir: PathBuf::from(lock_dir),
            pool,
            owner: Mutex::new(None),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert or replace a `metadata` entry.
    pub fn set_metadata(&self, name: &str, value: &str) -> Result<(), CacheError> {
        self.pool.get()?.execute(
            "INSERT OR REPLACE INTO metadata (name, value) VALUES (?1, ?2)",
            params![name, value],
        )?;
        Ok(())
    }

    pub fn metadata(&self, name: &str) -> Result<Option<String>, CacheError> {
        let value = self
            .pool
            .get()?
            .query_row(
                "SELECT value FROM metadata WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Tileset the file belongs to, once one has used it.
    pub fn owner(&self) -> Option<String> {
        self.owner.lock().clone()
    }

    fn check(&self, tile: &Tile) -> Result<(), CacheError> {
        if !tile.dimensions().is_empty() {
            return Err(self.unsupported("MBTiles cannot store dimension values".to_string()));
        }
        let mut owner = self.owner.lock();
        match owner.as_deref() {
            Some(name) if name != tile.tileset() => Err(self.unsupported(format!(
                "file already holds tileset {}, not {}",
                name,
                tile.tileset()
            ))),
            Some(_) => Ok(()),
            None => {
                debug!(cache = %self.name, tileset = tile.tileset(), "mbtiles file claimed");
                *owner = Some(tile.tileset().to_string());
                Ok(())
            }
        }
    }

    fn unsupported(&self, reason: String) -> CacheError {
        CacheError::Unsupported {
            backend: self.name.clone(),
            reason,
        }
    }

    fn lock_path(&self, tile: &Tile) -> PathBuf {
        self.lock_dir
            .join(format!("{}-{}-{}.lck", tile.z, tile.x, tile.y))
    }
}

impl CacheBackend for MbtilesCache {
    fn name(&self) -> &str {
        &self.name
    }

    fn namespaces_grids(&self) -> bool {
        false
    }

    fn namespaces_tilesets(&self) -> bool {
        false
    }

    fn get(&self, tile: &mut Tile) -> Result<CacheLookup, CacheError> {
        self.check(tile)?;
        let data: Option<Vec<u8>> = self
            .pool
            .get()?
            .query_row(
                "SELECT tile_data FROM tiles WHERE zoom_level = ?1 AND tile_column = ?2 AND tile_row = ?3",
                params![tile.z as i64, tile.x, tile.y],
                |row| row.get(0),
            )
            .optional()?;

        match data {
            Some(data) if !data.is_empty() => {
                tile.data = Some(data.into());
                tile.mtime = None;
                Ok(CacheLookup::Hit)
            }
            _ => Ok(CacheLookup::Miss),
        }
    }

    fn exists(&self, tile: &Tile) -> bool {
        if self.check(tile).is_err() {
            return false;
        }
        let lookup = self.pool.get().map_err(CacheError::from).and_then(|conn| {
            conn.query_row(
                "SELECT 1 FROM tiles WHERE zoom_level = ?1 AND tile_column = ?2 AND tile_row = ?3",
                params![tile.z as i64, tile.x, tile.y],
                |_| Ok(()),
            )
            .optional()
            .map_err(CacheError::from)
        });
        match lookup {
            Ok(found) => found.is_some(),
            Err(e) => {
                warn!(cache = %self.name, tile = %tile, error = %e, "existence check failed");
                false
            }
        }
    }

    fn set(&self, tile: &Tile) -> Result<(), CacheError> {
        self.check(tile)?;
        let data = require_data(tile)?;
        self.pool
            .get()?
            .execute(INSERT_TILE, params![tile.z as i64, tile.x, tile.y, data])?;
        Ok(())
    }

    fn set_many(&self, tiles: &[Tile]) -> Result<(), CacheError> {
        let mut conn = self.pool.get()?;
        let transaction = conn.transaction()?;
        {
            let mut insert = transaction.prepare_cached(INSERT_TILE)?;
            for tile in tiles {
                self.check(tile)?;
                let data = require_data(tile)?;
                insert.execute(params![tile.z as i64, tile.x, tile.y, data])?;
            }
        }
        transaction.commit()?;
        Ok(())
    }

    fn delete(&self, tile: &Tile) -> Result<(), CacheError> {
        self.check(tile)?;
        self.pool.get()?.execute(
            "DELETE FROM tiles WHERE zoom_level = ?1 AND tile_column = ?2 AND tile_row = ?3",
            params![tile.z as i64, tile.x, tile.y],
        )?;
        Ok(())
    }

    fn lock(&self, tile: &Tile) -> Result<LockOutcome, CacheError> {
        match LockFile::try_acquire(&self.lock_path(tile))? {
            Some(file) => Ok(LockOutcome::Acquired(LockHandle::new(
                tile_key(tile),
                Some(file),
            ))),
            None => Ok(LockOutcome::AlreadyLocked),
        }
    }

    fn unlock(&self, tile: &Tile, handle: LockHandle) -> Result<(), CacheError> {
        match handle.redeem(tile)? {
            Some(file) => file.release(),
            None => Ok(()),
        }
    }

    fn wait_for_lock(&self, tile: &Tile) -> Result<(), CacheError> {
        lockfile::wait(&self.lock_path(tile))
    }
}
