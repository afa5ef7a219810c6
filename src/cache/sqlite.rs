//! SQLite cache.
//!
//! One database file per tileset and grid, `dbdir/{tileset}#{grid}.db`,
//! with a single table:
//!
//! ```text
//! tiles(x, y, z, data blob, dim text, ctime, atime, hitcount,
//!       primary key(x, y, z, dim))
//! ```
//!
//! `dim` is the tile's dimension key (empty without dimensions). Connections
//! come from one r2d2 pool per database, created on first use. Locks are
//! sidecar files under `dbdir/locks/`.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, UNIX_EPOCH};

use parking_lot::Mutex;
use r2d2::Pool;
use r2d2_sqlite::rusqlite::{params, OptionalExtension};
use r2d2_sqlite::SqliteConnectionManager;
use tracing::{debug, warn};

use super::lockfile::{self, LockFile};
use super::{require_data, tile_key, CacheBackend, CacheLookup, LockHandle, LockOutcome};
use crate::error::CacheError;
use crate::tile::Tile;

/// Milliseconds a connection waits on a locked database before failing.
pub const SQLITE_BUSY_TIMEOUT_MS: u64 = 3000;

/// Default number of pooled connections per database.
const DEFAULT_POOL_SIZE: u32 = 4;

const CREATE_TABLE: &str = "create table if not exists tiles(x integer, y integer, z integer, \
     data blob, dim text, ctime datetime, atime datetime, hitcount integer default 0, \
     primary key(x,y,z,dim))";

const INSERT_TILE: &str = "insert or replace into tiles(x,y,z,data,dim,ctime) \
     values (?1,?2,?3,?4,?5,datetime('now'))";

type SqlitePool = Pool<SqliteConnectionManager>;

/// Tiles as rows of per-tileset SQLite databases.
pub struct SqliteCache {
    name: String,
    dbdir: PathBuf,
    hitstats: bool,
    pool_size: u32,
    pools: Mutex<HashMap<PathBuf, SqlitePool>>,
}

impl SqliteCache {
    pub fn new(name: impl Into<String>, dbdir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            dbdir: dbdir.into(),
            hitstats: false,
            pool_size: DEFAULT_POOL_SIZE,
            pools: Mutex::new(HashMap::new()),
        }
    }

    /// Count reads and record the last access time of every tile.
    pub fn with_hitstats(mut self, enabled: bool) -> Self {
        self.hitstats = enabled;
        self
    }

    pub fn with_pool_size(mut self, size: u32) -> Self {
        self.pool_size = size.max(1);
        self
    }

    /// Database file holding `tile`.
    pub fn db_path(&self, tile: &Tile) -> PathBuf {
        self.dbdir
            .join(format!("{}#{}.db", tile.tileset(), tile.grid()))
    }

    fn lock_path(&self, tile: &Tile) -> PathBuf {
        let mut name = format!(
            "{}#{}-{}-{}-{}",
            tile.tileset(),
            tile.grid(),
            tile.z,
            tile.x,
            tile.y
        );
        let dim = tile.dimension_key();
        if !dim.is_empty() {
            name.push('-');
            name.push_str(&hex::encode(dim));
        }
        name.push_str(".lck");
        self.dbdir.join("locks").join(name)
    }

    fn pool(&self, tile: &Tile) -> Result<SqlitePool, CacheError> {
        let path = self.db_path(tile);
        let mut pools = self.pools.lock();
        if let Some(pool) = pools.get(&path) {
            return Ok(pool.clone());
        }

        fs::create_dir_all(&self.dbdir).map_err(|e| CacheError::io(&self.dbdir, e))?;
        let manager = SqliteConnectionManager::file(&path).with_init(|conn| {
            conn.busy_timeout(Duration::from_millis(SQLITE_BUSY_TIMEOUT_MS))
        });
        let pool = Pool::builder().max_size(self.pool_size).build(manager)?;
        pool.get()?.execute_batch(CREATE_TABLE)?;

        debug!(cache = %self.name, db = %path.display(), "opened sqlite database");
        pools.insert(path, pool.clone());
        Ok(pool)
    }

    fn record_hit(&self, pool: &SqlitePool, tile: &Tile, dim: &str) {
        let result = pool.get().map_err(CacheError::from).and_then(|conn| {
            conn.execute(
                "update tiles set hitcount=hitcount+1, atime=datetime('now') \
                 where x=?1 and y=?2 and z=?3 and dim=?4",
                params![tile.x, tile.y, tile.z as i64, dim],
            )
            .map_err(CacheError::from)
        });
        if let Err(e) = result {
            warn!(cache = %self.name, tile = %tile, error = %e, "failed to update hit statistics");
        }
    }
}

impl CacheBackend for SqliteCache {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, tile: &mut Tile) -> Result<CacheLookup, CacheError> {
        let pool = self.pool(tile)?;
        let dim = tile.dimension_key();
        let row: Option<(Vec<u8>, Option<String>)> = pool
            .get()?
            .query_row(
                "select data, strftime('%s',ctime) from tiles \
                 where x=?1 and y=?2 and z=?3 and dim=?4",
                params![tile.x, tile.y, tile.z as i64, dim],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((data, ctime)) = row else {
            return Ok(CacheLookup::Miss);
        };
        if data.is_empty() {
            return Ok(CacheLookup::Miss);
        }

        tile.mtime = ctime
            .and_then(|s| s.parse::<u64>().ok())
            .map(|secs| UNIX_EPOCH + Duration::from_secs(secs));
        tile.data = Some(data.into());
        if self.hitstats {
            self.record_hit(&pool, tile, &dim);
        }
        Ok(CacheLookup::Hit)
    }

    fn exists(&self, tile: &Tile) -> bool {
        let lookup = self.pool(tile).and_then(|pool| {
            pool.get()?
                .query_row(
                    "select 1 from tiles where x=?1 and y=?2 and z=?3 and dim=?4",
                    params![tile.x, tile.y, tile.z as i64, tile.dimension_key()],
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
        let data = require_data(tile)?;
        let pool = self.pool(tile)?;
        pool.get()?.execute(
            INSERT_TILE,
            params![tile.x, tile.y, tile.z as i64, data, tile.dimension_key()],
        )?;
        Ok(())
    }

    fn set_many(&self, tiles: &[Tile]) -> Result<(), CacheError> {
        let Some(first) = tiles.first() else {
            return Ok(());
        };
        let pool = self.pool(first)?;
        let mut conn = pool.get()?;
        let transaction = conn.transaction()?;
        {
            let mut insert = transaction.prepare_cached(INSERT_TILE)?;
            for tile in tiles {
                let data = require_data(tile)?;
                insert.execute(params![
                    tile.x,
                    tile.y,
                    tile.z as i64,
                    data,
                    tile.dimension_key()
                ])?;
            }
        }
        transaction.commit()?;
        Ok(())
    }

    fn delete(&self, tile: &Tile) -> Result<(), CacheError> {
        let pool = self.pool(tile)?;
        pool.get()?.execute(
            "delete from tiles where x=?1 and y=?2 and z=?3 and dim=?4",
            params![tile.x, tile.y, tile.z as i64, tile.dimension_key()],
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
