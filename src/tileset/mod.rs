//! Tilesets: the unit that ties grids, a cache, a source and a format
//! together.
//!
//! A [`Tileset`] answers tile requests. On a cache miss it renders the
//! metatile owning the tile, splits it, stores every piece and reads the
//! requested tile back, holding the metatile lock for the whole
//! render-and-store sequence.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                           Tileset                               │
//! │  ┌─────────────────────────────────────────────────────────┐    │
//! │  │                      get_tile()                         │    │
//! │  │  1. Cache lookup        4. Render, split, encode        │    │
//! │  │  2. Lock metatile       5. Store all, unlock            │    │
//! │  │  3. (or wait for lock)  6. Reread requested tile        │    │
//! │  └─────────────────────────────────────────────────────────┘    │
//! │        │                    │                     │             │
//! │        ▼                    ▼                     ▼             │
//! │  ┌────────────┐      ┌─────────────┐      ┌──────────────┐      │
//! │  │CacheBackend│      │   Source    │      │  ImageCodec  │      │
//! │  └────────────┘      └─────────────┘      └──────────────┘      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

mod builder;
mod service;

use std::sync::Arc;

use image::RgbaImage;

use crate::cache::CacheBackend;
use crate::codec::{Format, ImageCodec};
use crate::error::{DimensionError, TileError};
use crate::grid::{Extent, GridLink};
use crate::source::Source;
use crate::tile::{Dimension, Metatile, MetatileLayout, Tile};

pub use builder::{TilesetBuilder, DEFAULT_EXPIRES_SECS};
pub use service::Fetch;
pub(crate) use service::MetatileOutcome;

/// A configured tileset. Immutable once built and shared behind an `Arc`.
pub struct Tileset {
    name: Arc<str>,
    grid_links: Vec<GridLink>,
    cache: Arc<dyn CacheBackend>,
    source: Option<Arc<dyn Source>>,
    format: Option<Format>,
    codec: Arc<dyn ImageCodec>,
    layout: MetatileLayout,
    expires: u32,
    auto_expire: Option<u32>,
    dimensions: Vec<Dimension>,
    watermark: Option<RgbaImage>,
}

impl Tileset {
    pub fn builder(name: impl Into<String>) -> TilesetBuilder {
        TilesetBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn grid_links(&self) -> &[GridLink] {
        &self.grid_links
    }

    /// The link to the grid named `grid`.
    pub fn grid_link(&self, grid: &str) -> Result<&GridLink, TileError> {
        self.grid_links
            .iter()
            .find(|link| link.grid().name() == grid)
            .ok_or_else(|| TileError::UnknownGrid {
                tileset: self.name.to_string(),
                grid: grid.to_string(),
            })
    }

    pub fn cache(&self) -> &Arc<dyn CacheBackend> {
        &self.cache
    }

    pub fn source(&self) -> Option<&Arc<dyn Source>> {
        self.source.as_ref()
    }

    /// Cache format. `None` stores source bytes unchanged.
    pub fn format(&self) -> Option<&Format> {
        self.format.as_ref()
    }

    pub fn layout(&self) -> MetatileLayout {
        self.layout
    }

    /// Seconds clients may cache a tile.
    pub fn expires(&self) -> u32 {
        self.expires
    }

    /// Age in seconds after which cached tiles are re-rendered.
    pub fn auto_expire(&self) -> Option<u32> {
        self.auto_expire
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    /// File extension tiles are stored under.
    pub fn extension(&self) -> &'static str {
        self.format.as_ref().map_or("png", Format::extension)
    }

    /// A new tile on `grid` at the origin, with every dimension at its default.
    pub fn tile(&self, grid: &str) -> Result<Tile, TileError> {
        let link = self.grid_link(grid)?;
        let dimensions = self
            .dimensions
            .iter()
            .map(|d| (d.name().to_string(), d.default_value().to_string()))
            .collect();
        let mut tile = Tile::new(Arc::clone(&self.name), link.grid().name(), 0, 0, 0)
            .with_extension(self.extension())
            .with_dimensions(dimensions);
        tile.expires = Some(self.expires);
        Ok(tile)
    }

    /// Validate `value` for dimension `name` and store its canonical form in
    /// `tile`.
    pub fn set_dimension(&self, tile: &mut Tile, name: &str, value: &str) -> Result<(), TileError> {
        let dimension = self
            .dimensions
            .iter()
            .find(|d| d.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| DimensionError::UnknownDimension {
                name: name.to_string(),
            })?;
        let canonical = dimension.validate(value)?;
        if !tile.set_dimension_value(dimension.name(), canonical) {
            return Err(DimensionError::UnknownDimension {
                name: name.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Check that `tile` addresses a tile this tileset serves.
    pub fn validate_tile(&self, tile: &Tile) -> Result<(), TileError> {
        let link = self.grid_link(tile.grid())?;
        let grid = link.grid();
        grid.level(tile.z)?;
        if !link.contains(tile.x, tile.y, tile.z) {
            return Err(TileError::OutOfLimits {
                x: tile.x,
                y: tile.y,
                z: tile.z,
            });
        }
        if let Some((width, height)) = tile.requested_size {
            if width != grid.tile_width() || height != grid.tile_height() {
                return Err(TileError::WrongTileSize {
                    width,
                    height,
                    expected_width: grid.tile_width(),
                    expected_height: grid.tile_height(),
                });
            }
        }
        Ok(())
    }

    /// Set the coordinates of `tile` from a map bbox, rejecting bboxes that
    /// are not aligned on the grid.
    pub fn tile_lookup_by_bbox(&self, tile: &mut Tile, bbox: &Extent) -> Result<(), TileError> {
        let link = self.grid_link(tile.grid())?;
        let (x, y, z) = link.grid().tile_for_bbox(bbox)?;
        tile.x = x;
        tile.y = y;
        tile.z = z;
        self.validate_tile(tile)
    }

    /// The metatile owning `tile`.
    pub fn metatile(&self, tile: &Tile) -> Result<Metatile, TileError> {
        let link = self.grid_link(tile.grid())?;
        Ok(Metatile::for_tile(tile, link.grid(), &self.layout)?)
    }

    /// Remove `tile` from the cache, or every tile of its metatile.
    pub fn delete_tile(&self, tile: &Tile, whole_metatile: bool) -> Result<(), TileError> {
        if !whole_metatile {
            self.cache.delete(tile)?;
            return Ok(());
        }
        let metatile = self.metatile(tile)?;
        for sibling in metatile.tiles() {
            self.cache.delete(sibling)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Tileset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tileset")
            .field("name", &self.name)
            .field(
                "grids",
                &self
                    .grid_links
                    .iter()
                    .map(|l| l.grid().name())
                    .collect::<Vec<_>>(),
            )
            .field("cache", &self.cache.name())
            .field("source", &self.source.as_ref().map(|s| s.name()))
            .field("format", &self.format)
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}
