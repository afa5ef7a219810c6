//! Filesystem cache.
//!
//! # Layout
//!
//! ```text
//! base/tileset/[grid/][dimension/value/...]zz/xxx/xxx/xxx/yyy/yyy/yyy.ext
//! ```
//!
//! `x` and `y` are split into millions, thousands and units, each zero padded
//! to three digits, so no directory holds more than 1000 entries. The lock
//! for a tile lives next to it with a `.lck` suffix. Writes go through a
//! temporary file renamed into place, so readers never see a partial tile.
//!
//! # Blank tiles
//!
//! With `symlink_blank`, a tile of one flat color is stored once per
//! tileset under `base/tileset/blanks/RRGGBBAA.ext` and every such tile is a
//! hard link to it.

use std::borrow::Cow;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tempfile::NamedTempFile;
use tracing::debug;

use super::lockfile::{self, LockFile};
use super::{require_data, tile_key, CacheBackend, CacheLookup, LockHandle, LockOutcome};
use crate::error::CacheError;
use crate::tile::Tile;

static LINK_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Tiles as files under a base directory.
#[derive(Debug, Clone)]
pub struct DiskCache {
    name: String,
    base: PathBuf,
    symlink_blank: bool,
    namespace_grids: bool,
}

impl DiskCache {
    pub fn new(name: impl Into<String>, base: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            base: base.into(),
            symlink_blank: false,
            namespace_grids: false,
        }
    }

    /// Store uniform tiles as hard links to one file per color.
    pub fn with_symlink_blank(mut self, enabled: bool) -> Self {
        self.symlink_blank = enabled;
        self
    }

    /// Insert the grid name after the tileset directory.
    pub fn with_grid_namespace(mut self, enabled: bool) -> Self {
        self.namespace_grids = enabled;
        self
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// File holding `tile`.
    pub fn tile_path(&self, tile: &Tile) -> PathBuf {
        let mut path = self.base.join(tile.tileset());
        if self.namespace_grids {
            path.push(tile.grid());
        }
        for (name, value) in tile.dimensions() {
            path.push(path_segment(name).as_ref());
            path.push(path_segment(value).as_ref());
        }
        path.push(format!("{:02}", tile.z));
        for v in [tile.x, tile.y] {
            path.push(format!("{:03}", v / 1_000_000));
            path.push(format!("{:03}", (v / 1000) % 1000));
            path.push(format!("{:03}", v % 1000));
        }
        // The last y group is the file name.
        path.set_extension(tile.extension());
        path
    }

    /// Lock file guarding `tile`.
    pub fn lock_path(&self, tile: &Tile) -> PathBuf {
        let mut path = self.tile_path(tile).into_os_string();
        path.push(".lck");
        PathBuf::from(path)
    }

    /// Shared file for blank tiles of `color`.
    pub fn blank_path(&self, tile: &Tile, color: [u8; 4]) -> PathBuf {
        self.base
            .join(tile.tileset())
            .join("blanks")
            .join(format!("{}.{}", hex::encode_upper(color), tile.extension()))
    }

    fn write_atomic(path: &Path, data: &[u8]) -> Result<(), CacheError> {
        let dir = parent_dir(path)?;
        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| CacheError::io(dir, e))?;
        tmp.write_all(data).map_err(|e| CacheError::io(tmp.path(), e))?;
        tmp.persist(path)
            .map_err(|e| CacheError::io(path, e.error))?;
        Ok(())
    }

    fn store_blank(&self, tile: &Tile, data: &[u8], color: [u8; 4]) -> Result<(), CacheError> {
        let blank = self.blank_path(tile, color);
        if !blank.exists() {
            let dir = parent_dir(&blank)?;
            fs::create_dir_all(dir).map_err(|e| CacheError::io(dir, e))?;
            let mut tmp = NamedTempFile::new_in(dir).map_err(|e| CacheError::io(dir, e))?;
            tmp.write_all(data).map_err(|e| CacheError::io(tmp.path(), e))?;
            match tmp.persist_noclobber(&blank) {
                Ok(_) => debug!(path = %blank.display(), "created blank tile"),
                Err(e) if e.error.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => return Err(CacheError::io(&blank, e.error)),
            }
        }

        // Link under a unique name, then rename over the target so readers
        // never see the tile missing.
        let target = self.tile_path(tile);
        let dir = parent_dir(&target)?;
        fs::create_dir_all(dir).map_err(|e| CacheError::io(dir, e))?;
        let staging = dir.join(format!(
            ".link-{}-{}",
            std::process::id(),
            LINK_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        fs::hard_link(&blank, &staging).map_err(|e| CacheError::io(&staging, e))?;
        if let Err(e) = fs::rename(&staging, &target) {
            let _ = fs::remove_file(&staging);
            return Err(CacheError::io(&target, e));
        }
        debug!(tile = %tile, blank = %blank.display(), "linked blank tile");
        Ok(())
    }
}

impl CacheBackend for DiskCache {
    fn name(&self) -> &str {
        &self.name
    }

    fn namespaces_grids(&self) -> bool {
        self.namespace_grids
    }

    fn get(&self, tile: &mut Tile) -> Result<CacheLookup, CacheError> {
        let path = self.tile_path(tile);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(CacheLookup::Miss),
            Err(e) => return Err(CacheError::io(&path, e)),
        };
        if data.is_empty() {
            return Ok(CacheLookup::Miss);
        }
        let mtime = fs::metadata(&path)
            .and_then(|m| m.modified())
            .map_err(|e| CacheError::io(&path, e))?;
        tile.data = Some(data.into());
        tile.mtime = Some(mtime);
        Ok(CacheLookup::Hit)
    }

    fn exists(&self, tile: &Tile) -> bool {
        self.tile_path(tile).is_file()
    }

    fn set(&self, tile: &Tile) -> Result<(), CacheError> {
        let data = require_data(tile)?;
        if self.symlink_blank {
            if let Some(color) = tile.uniform_color {
                return self.store_blank(tile, data, color);
            }
        }

        let path = self.tile_path(tile);
        let dir = parent_dir(&path)?;
        fs::create_dir_all(dir).map_err(|e| CacheError::io(dir, e))?;
        Self::write_atomic(&path, data)
    }

    fn delete(&self, tile: &Tile) -> Result<(), CacheError> {
        let path = self.tile_path(tile);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::io(&path, e)),
        }
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
            None => Err(CacheError::LockMismatch {
                held: "a lock handle without a lock file".to_string(),
                requested: tile_key(tile),
            }),
        }
    }

    fn wait_for_lock(&self, tile: &Tile) -> Result<(), CacheError> {
        lockfile::wait(&self.lock_path(tile))
    }
}

fn parent_dir(path: &Path) -> Result<&Path, CacheError> {
    path.parent().ok_or_else(|| {
        CacheError::io(
            path,
            std::io::Error::new(ErrorKind::InvalidInput, "path has no parent directory"),
        )
    })
}

/// Make a dimension name or value safe to use as one path component.
fn path_segment(value: &str) -> Cow<'_, str> {
    let needs_escape = value.is_empty()
        || value == "."
        || value == ".."
        || value.contains(['/', '\\', '%', '\0']);
    if !needs_escape {
        return Cow::Borrowed(value);
    }
    let mut out = String::with_capacity(value.len() + 8);
    for c in value.chars() {
        match c {
            '/' | '\\' | '%' | '.' | '\0' => out.push_str(&format!("%{:02X}", c as u32)),
            c => out.push(c),
        }
    }
    if out.is_empty() {
        out.push_str("%00");
    }
    Cow::Owned(out)
}
