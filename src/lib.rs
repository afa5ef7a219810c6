//! # tilecache
//!
//! A metatiling map tile cache. Tiles are read from a pluggable cache; on a
//! miss the whole metatile owning the tile is rendered once through an
//! upstream source, split into tiles and stored, while a per-metatile lock
//! makes every other request for the same metatile wait instead of
//! rendering it again.
//!
//! ## Features
//!
//! - **Grids**: resolution pyramids with tile limits, restricted extents and
//!   the usual built-in grids (`WGS84`, `GoogleMapsCompatible`)
//! - **Metatiling**: one source request per block of tiles, with a pixel
//!   gutter to avoid label clipping at tile edges
//! - **Cache backends**: disk (with blank tile deduplication through hard
//!   links), SQLite, MBTiles and an in-memory LRU
//! - **Dimensions**: extra request parameters (time, elevation, ...) that
//!   enter the cache key
//! - **Seeding**: multi-threaded pre-rendering with cancellation
//!
//! ## Architecture
//!
//! - [`grid`] - Grid math and grid links
//! - [`tile`] - Tile and metatile model, dimensions
//! - [`codec`] - Image formats and the raster codec
//! - [`source`] - Upstream renderers (WMS)
//! - [`cache`] - Cache backends and the lock protocol
//! - [`tileset`] - The get / lock / render / store state machine
//! - [`registry`] - Configuration loading
//! - [`seed`] - Seeding sessions
//! - [`server`] - Axum-based HTTP endpoint
//! - [`config`] - CLI configuration
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use tilecache::Registry;
//!
//! let registry = Registry::load(Path::new("tilecache.json")).unwrap();
//! let tileset = registry.tileset("osm").unwrap();
//!
//! let mut tile = tileset.tile("GoogleMapsCompatible").unwrap();
//! tile.x = 4;
//! tile.y = 10;
//! tile.z = 4;
//! let fetch = tileset.get_tile(&mut tile).unwrap();
//! println!("{} bytes ({})", tile.data.unwrap().len(), fetch.as_str());
//! ```

pub mod cache;
pub mod codec;
pub mod config;
pub mod error;
pub mod grid;
pub mod registry;
pub mod seed;
pub mod server;
pub mod source;
pub mod tile;
pub mod tileset;

// Re-export commonly used types
pub use cache::{
    CacheBackend, CacheLookup, DiskCache, LockHandle, LockOutcome, MbtilesCache, MemoryCache,
    SqliteCache,
};
pub use codec::{Format, FormatKind, ImageCodec, PngCompression, RasterCodec};
pub use config::{Cli, Command, SeedConfig, ServeConfig};
pub use error::{
    CacheError, CodecError, ConfigError, DimensionError, GridError, SourceError, TileError,
};
pub use grid::{Extent, Grid, GridLink, TileLimits, Unit};
pub use registry::{ConfigDocument, Registry};
pub use seed::{SeedProgress, SeedReport, SeedSession};
pub use server::{create_router, AppState, RouterConfig};
pub use source::{MapRequest, Source, WmsSource};
pub use tile::{Dimension, DimensionKind, Metatile, MetatileLayout, Tile};
pub use tileset::{Fetch, Tileset, TilesetBuilder};
