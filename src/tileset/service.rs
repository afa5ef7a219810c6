//! The get / lock / render / store state machine.

use std::time::{Duration, SystemTime};

use image::imageops;
use tracing::{debug, error, warn};

use super::Tileset;
use crate::cache::{CacheLookup, LockOutcome};
use crate::codec::uniform_color;
use crate::error::TileError;
use crate::source::MapRequest;
use crate::tile::{Metatile, Tile};

/// Times a requester goes back to the lock after a reread misses.
const MAX_RENDER_ATTEMPTS: usize = 3;

// =============================================================================
// Fetch outcome
// =============================================================================

/// How a tile was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fetch {
    /// Read straight from the cache
    Hit,
    /// This request rendered the owning metatile
    Rendered,
    /// Another actor rendered the metatile while this request waited
    Waited,
}

impl Fetch {
    pub fn as_str(&self) -> &'static str {
        match self {
            Fetch::Hit => "hit",
            Fetch::Rendered => "rendered",
            Fetch::Waited => "waited",
        }
    }
}

/// What [`Tileset::ensure_metatile`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MetatileOutcome {
    /// The checked tile was already cached once the lock was held
    Present,
    Rendered,
    Waited,
}

// =============================================================================
// Tile Service
// =============================================================================

impl Tileset {
    /// Fill `tile.data` from the cache, rendering its metatile on a miss.
    ///
    /// The returned bytes are always read back from the cache, so a request
    /// that rendered and a request that waited see the same data.
    pub fn get_tile(&self, tile: &mut Tile) -> Result<Fetch, TileError> {
        self.validate_tile(tile)?;

        if self.cache.get(tile)? == CacheLookup::Hit {
            if !self.is_stale(tile) {
                self.stamp_expiry(tile);
                return Ok(Fetch::Hit);
            }
            debug!(tile = %tile, "cached tile expired, re-rendering metatile");
            tile.data = None;
            tile.mtime = None;
            self.delete_tile(tile, true)?;
        }

        if self.source.is_none() {
            return Err(TileError::NoSource {
                tileset: self.name.to_string(),
            });
        }

        for attempt in 1..=MAX_RENDER_ATTEMPTS {
            let outcome = self.ensure_metatile(tile, false)?;
            if self.cache.get(tile)? == CacheLookup::Hit {
                self.stamp_expiry(tile);
                return Ok(match outcome {
                    MetatileOutcome::Present => Fetch::Hit,
                    MetatileOutcome::Rendered => Fetch::Rendered,
                    MetatileOutcome::Waited => Fetch::Waited,
                });
            }
            warn!(
                tile = %tile,
                attempt,
                "tile missing from cache after metatile was produced"
            );
        }

        Err(TileError::MissingAfterRender {
            x: tile.x,
            y: tile.y,
            z: tile.z,
        })
    }

    /// Make sure the metatile owning `tile` is in the cache.
    ///
    /// Takes the metatile lock; the holder renders and stores every tile,
    /// anyone else waits for the holder to finish. Once the lock is held
    /// `tile` is checked again, so an actor that lost the race against a
    /// renderer that just finished does not render a second time. With
    /// `force` the check is skipped.
    pub(crate) fn ensure_metatile(
        &self,
        tile: &Tile,
        force: bool,
    ) -> Result<MetatileOutcome, TileError> {
        let mut metatile = self.metatile(tile)?;
        let anchor = metatile.anchor().clone();

        let handle = match self.cache.lock(&anchor)? {
            LockOutcome::Acquired(handle) => handle,
            LockOutcome::AlreadyLocked => {
                debug!(tile = %tile, lock = %anchor, "metatile locked, waiting");
                self.cache.wait_for_lock(&anchor)?;
                return Ok(MetatileOutcome::Waited);
            }
        };

        let result = if !force && self.cache.exists(tile) {
            Ok(MetatileOutcome::Present)
        } else {
            self.render_metatile(&mut metatile)
                .map(|()| MetatileOutcome::Rendered)
        };

        // Unlock whatever happened above.
        let unlocked = self.cache.unlock(&anchor, handle);
        match (result, unlocked) {
            (Ok(outcome), Ok(())) => Ok(outcome),
            (Ok(_), Err(e)) => Err(e.into()),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(unlock_err)) => {
                error!(lock = %anchor, error = %unlock_err, "failed to release metatile lock");
                Err(e)
            }
        }
    }

    /// Render, split, encode and store every tile of `metatile`.
    fn render_metatile(&self, metatile: &mut Metatile) -> Result<(), TileError> {
        let source = self.source.as_ref().ok_or_else(|| TileError::NoSource {
            tileset: self.name.to_string(),
        })?;
        let link = self.grid_link(metatile.anchor().grid())?;

        let request = MapRequest {
            bbox: *metatile.bbox(),
            width: metatile.pixel_width(),
            height: metatile.pixel_height(),
            srs: link.grid().srs().to_string(),
            dimensions: metatile.anchor().dimensions().to_vec(),
        };
        debug!(
            tileset = %self.name,
            source = source.name(),
            z = metatile.z,
            x = metatile.x,
            y = metatile.y,
            width = request.width,
            height = request.height,
            "rendering metatile"
        );
        let raw = source.render_metatile(&request)?;

        let Some(format) = &self.format else {
            // Without a format the source bytes are stored unchanged; the
            // builder only allows that for single-tile metatiles.
            for tile in metatile.tiles_mut() {
                tile.data = Some(raw.clone());
            }
            self.cache.set_many(metatile.tiles())?;
            return Ok(());
        };

        let image = self.codec.decode(&raw)?;
        let pieces = metatile.split(&image)?;
        for (tile, mut piece) in metatile.tiles_mut().iter_mut().zip(pieces) {
            if let Some(watermark) = &self.watermark {
                imageops::overlay(&mut piece, watermark, 0, 0);
            }
            tile.uniform_color = uniform_color(&piece);
            tile.data = Some(self.codec.encode(&piece, format)?);
        }

        // Every piece is encoded before the first write, so a failure above
        // leaves the cache untouched.
        self.cache.set_many(metatile.tiles())?;
        Ok(())
    }

    /// Expired under auto-expiry. Without a source nothing could replace
    /// the tile, so it is never stale.
    fn is_stale(&self, tile: &Tile) -> bool {
        if self.source.is_none() {
            return false;
        }
        match (self.auto_expire, tile.mtime) {
            (Some(max_age), Some(mtime)) => age(mtime) > Duration::from_secs(max_age.into()),
            _ => false,
        }
    }

    /// Set `tile.expires`: the remaining lifetime under auto-expiry, else the
    /// configured delay.
    fn stamp_expiry(&self, tile: &mut Tile) {
        tile.expires = Some(match (self.auto_expire, tile.mtime) {
            (Some(max_age), Some(mtime)) => {
                let age = age(mtime).as_secs();
                u32::try_from(u64::from(max_age).saturating_sub(age)).unwrap_or(max_age)
            }
            _ => self.expires,
        });
    }
}

fn age(mtime: SystemTime) -> Duration {
    SystemTime::now().duration_since(mtime).unwrap_or_default()
}
