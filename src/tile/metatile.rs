//! Metatile geometry and splitting.
//!
//! A metatile is a block of `size_x * size_y` adjacent tiles rendered in one
//! source call, with `buffer` extra pixels on every side. After rendering,
//! each constituent tile is cut out of the metatile image by a pixel copy.
//!
//! ```text
//!   ┌───────────────────────┐  ← buffer
//!   │ ┌─────┬─────┬─────┐   │
//!   │ │ 0,1 │ 1,1 │ 2,1 │   │  image row 0 is the north edge,
//!   │ ├─────┼─────┼─────┤   │  tile y grows northwards
//!   │ │ 0,0 │ 1,0 │ 2,0 │   │
//!   │ └─────┴─────┴─────┘   │
//!   └───────────────────────┘
//! ```
//!
//! Metatiles touching the east or north edge of the grid are shrunk so they
//! never cover tiles past the grid.

use image::{imageops, RgbaImage};

use super::model::Tile;
use crate::error::{GridError, TileError};
use crate::grid::{Extent, Grid};

/// Metatile size in tiles and gutter in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetatileLayout {
    pub size_x: u32,
    pub size_y: u32,
    pub buffer: u32,
}

impl MetatileLayout {
    pub const fn new(size_x: u32, size_y: u32, buffer: u32) -> Self {
        Self {
            size_x,
            size_y,
            buffer,
        }
    }

    /// True when every metatile is a single tile with no gutter.
    pub fn is_single_tile(&self) -> bool {
        self.size_x == 1 && self.size_y == 1 && self.buffer == 0
    }
}

impl Default for MetatileLayout {
    fn default() -> Self {
        Self::new(1, 1, 0)
    }
}

/// A block of tiles rendered together.
#[derive(Debug, Clone)]
pub struct Metatile {
    /// Metatile column (tile x divided by the layout width, floored)
    pub x: i64,

    /// Metatile row
    pub y: i64,

    pub z: usize,

    size_x: u32,
    size_y: u32,
    buffer: u32,
    tile_width: u32,
    tile_height: u32,
    bbox: Extent,
    tiles: Vec<Tile>,
}

impl Metatile {
    /// Compute the metatile owning `tile`.
    pub fn for_tile(tile: &Tile, grid: &Grid, layout: &MetatileLayout) -> Result<Self, GridError> {
        let level = grid.level(tile.z)?;
        let mx = tile.x.div_euclid(layout.size_x as i64);
        let my = tile.y.div_euclid(layout.size_y as i64);
        let base_x = mx * layout.size_x as i64;
        let base_y = my * layout.size_y as i64;

        let size_x = (level.max_x - base_x).clamp(1, layout.size_x as i64) as u32;
        let size_y = (level.max_y - base_y).clamp(1, layout.size_y as i64) as u32;

        let res = level.resolution;
        let tile_width = grid.tile_width();
        let tile_height = grid.tile_height();
        let gbuffer = res * layout.buffer as f64;
        let full_width = res * (layout.size_x * tile_width) as f64;
        let full_height = res * (layout.size_y * tile_height) as f64;
        let minx = grid.extent().minx + mx as f64 * full_width - gbuffer;
        let miny = grid.extent().miny + my as f64 * full_height - gbuffer;
        let bbox = Extent::new(
            minx,
            miny,
            minx + res * (size_x * tile_width) as f64 + 2.0 * gbuffer,
            miny + res * (size_y * tile_height) as f64 + 2.0 * gbuffer,
        );

        let mut tiles = Vec::with_capacity((size_x * size_y) as usize);
        for i in 0..size_x as i64 {
            for j in 0..size_y as i64 {
                tiles.push(tile.sibling(base_x + i, base_y + j));
            }
        }

        Ok(Self {
            x: mx,
            y: my,
            z: tile.z,
            size_x,
            size_y,
            buffer: layout.buffer,
            tile_width,
            tile_height,
            bbox,
            tiles,
        })
    }

    /// Geographic bbox including the gutter.
    pub fn bbox(&self) -> &Extent {
        &self.bbox
    }

    /// Size in tiles after edge clamping.
    pub fn size(&self) -> (u32, u32) {
        (self.size_x, self.size_y)
    }

    /// Pixel width of the image the source must render.
    pub fn pixel_width(&self) -> u32 {
        self.size_x * self.tile_width + 2 * self.buffer
    }

    /// Pixel height of the image the source must render.
    pub fn pixel_height(&self) -> u32 {
        self.size_y * self.tile_height + 2 * self.buffer
    }

    /// Constituent tiles, column by column from the south-west corner.
    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    pub fn tiles_mut(&mut self) -> &mut [Tile] {
        &mut self.tiles
    }

    /// The south-west tile. Its cache key doubles as the metatile lock key.
    pub fn anchor(&self) -> &Tile {
        &self.tiles[0]
    }

    /// True if tile `(x, y)` belongs to this metatile.
    pub fn contains(&self, x: i64, y: i64) -> bool {
        let base_x = self.anchor().x;
        let base_y = self.anchor().y;
        x >= base_x
            && x < base_x + self.size_x as i64
            && y >= base_y
            && y < base_y + self.size_y as i64
    }

    /// Cut the rendered image into one sub-image per tile, in [`tiles`] order.
    ///
    /// [`tiles`]: Metatile::tiles
    pub fn split(&self, image: &RgbaImage) -> Result<Vec<RgbaImage>, TileError> {
        if image.width() != self.pixel_width() || image.height() != self.pixel_height() {
            return Err(TileError::MetatileSize {
                width: image.width(),
                height: image.height(),
                expected_width: self.pixel_width(),
                expected_height: self.pixel_height(),
            });
        }

        let base_x = self.anchor().x;
        let base_y = self.anchor().y;
        let pieces = self
            .tiles
            .iter()
            .map(|tile| {
                let i = (tile.x - base_x) as u32;
                let j = (tile.y - base_y) as u32;
                let px = self.buffer + i * self.tile_width;
                let py = self.buffer + (self.size_y - 1 - j) * self.tile_height;
                imageops::crop_imm(image, px, py, self.tile_width, self.tile_height).to_image()
            })
            .collect();
        Ok(pieces)
    }
}
