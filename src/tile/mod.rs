//! Tile and metatile data model.
//!
//! # Components
//!
//! - [`Tile`]: one cached raster unit, addressed by tileset, grid, `(x, y, z)`
//!   and dimension values
//! - [`Metatile`]: a block of tiles rendered in one source call, with the
//!   geometry to cut it back into tiles
//! - [`Dimension`]: validator for one request dimension
//!
//! The cache key of a tile is `(tileset, grid, x, y, z, dimension_key)`,
//! where the dimension key joins the dimension values with `#` in the order
//! the tileset declares them, with `%` and `#` percent-encoded inside values.

mod dimension;
mod metatile;
mod model;

pub use dimension::{Dimension, DimensionKind, Interval, DIMENSION_SEPARATOR};
pub use metatile::{Metatile, MetatileLayout};
pub use model::Tile;
