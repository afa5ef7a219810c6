use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by grid coordinate math and grid definitions
#[derive(Debug, Clone, Error)]
pub enum GridError {
    /// Grid definition violates an invariant (checked at configuration time)
    #[error("Invalid grid {grid}: {reason}")]
    InvalidDefinition { grid: String, reason: String },

    /// No configured level matches the requested resolution
    #[error("No level in grid {grid} matches resolution {resolution}")]
    WrongResolution { grid: String, resolution: f64 },

    /// Requested bbox does not align with the grid's tile boundaries
    #[error("Bounding box {bbox} is not aligned on grid {grid}")]
    WrongExtent { grid: String, bbox: String },

    /// Zoom level outside of the grid's configured levels
    #[error("Level {level} out of range for grid {grid} ({levels} levels)")]
    LevelOutOfRange {
        grid: String,
        level: usize,
        levels: usize,
    },

    /// Extent string could not be parsed
    #[error("Invalid extent '{0}': expected minx,miny,maxx,maxy")]
    InvalidExtent(String),
}

/// Errors raised when validating dimension values or definitions
#[derive(Debug, Clone, Error)]
pub enum DimensionError {
    /// Tileset has no dimension with this name
    #[error("Unknown dimension: {name}")]
    UnknownDimension { name: String },

    /// Value rejected by the dimension's validator
    #[error("Invalid value '{value}' for dimension {dimension}")]
    InvalidValue { dimension: String, value: String },

    /// Dimension definition is malformed
    #[error("Invalid dimension {dimension}: {reason}")]
    InvalidDefinition { dimension: String, reason: String },
}

/// Errors from image decoding and encoding
#[derive(Debug, Clone, Error)]
pub enum CodecError {
    /// Bytes could not be decoded into a raster
    #[error("Failed to decode image: {message}")]
    Decode { message: String },

    /// Raster could not be encoded in the requested format
    #[error("Failed to encode image: {message}")]
    Encode { message: String },
}

/// Errors from an upstream source while rendering a metatile
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// Request could not be sent or the response could not be read
    #[error("Source request failed: {message}")]
    Request { message: String },

    /// Upstream answered with a non-success status
    #[error("Source returned HTTP {status} for {url}")]
    Status { status: u16, url: String },

    /// Upstream answered with something that is not an image
    #[error("Source returned non-image content ({content_type})")]
    NotAnImage { content_type: String },

    /// Source configuration cannot produce a request
    #[error("Invalid source {name}: {reason}")]
    InvalidDefinition { name: String, reason: String },
}

/// Errors reported by cache backends.
///
/// A cache miss and an already-held lock are not errors: they are reported
/// through [`crate::cache::CacheLookup`] and [`crate::cache::LockOutcome`].
#[derive(Debug, Error)]
pub enum CacheError {
    /// Filesystem operation failed
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// SQLite statement or connection failed
    #[error("SQLite error: {0}")]
    Sqlite(#[from] r2d2_sqlite::rusqlite::Error),

    /// Connection pool could not hand out a connection
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Attempt to store a tile with no image data
    #[error("Refusing to store empty tile {x},{y},{z}")]
    EmptyTile { x: i64, y: i64, z: usize },

    /// Lock handle presented for a tile it was not issued for
    #[error("Lock handle for {held} does not match tile {requested}")]
    LockMismatch { held: String, requested: String },

    /// Backend cannot represent the requested tile
    #[error("{backend} cache cannot store this tile: {reason}")]
    Unsupported { backend: String, reason: String },
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CacheError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors raised while loading and checking configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("Cannot read configuration {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration document is not valid JSON for the expected schema
    #[error("Cannot parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// Two entries of the same kind share a name
    #[error("Duplicate {kind} '{name}'")]
    Duplicate { kind: &'static str, name: String },

    /// A reference names an entry that was never declared
    #[error("{referrer} references unknown {kind} '{name}'")]
    UnknownReference {
        kind: &'static str,
        name: String,
        referrer: String,
    },

    /// An entry is structurally invalid
    #[error("Invalid {context}: {reason}")]
    Invalid { context: String, reason: String },

    #[error(transparent)]
    Grid(#[from] GridError),

    #[error(transparent)]
    Dimension(#[from] DimensionError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Errors returned by tileset operations.
///
/// This is the error type seen by the protocol layer. Use
/// [`TileError::is_client_error`] to decide between a 4xx and a 5xx answer.
#[derive(Debug, Error)]
pub enum TileError {
    /// No tileset registered under this name
    #[error("Unknown tileset: {name}")]
    UnknownTileset { name: String },

    /// Tileset is not linked to this grid
    #[error("Tileset {tileset} has no grid {grid}")]
    UnknownGrid { tileset: String, grid: String },

    /// Tile coordinates fall outside the grid link's limits
    #[error("Tile {x},{y} is outside the limits of level {z}")]
    OutOfLimits { x: i64, y: i64, z: usize },

    /// Requested pixel size differs from the grid's tile size
    #[error("Wrong tile size {width}x{height}, expected {expected_width}x{expected_height}")]
    WrongTileSize {
        width: u32,
        height: u32,
        expected_width: u32,
        expected_height: u32,
    },

    /// Cache miss on a tileset without a source
    #[error("Tile not cached and tileset {tileset} has no source")]
    NoSource { tileset: String },

    /// Rendered metatile does not have the requested pixel size
    #[error("Source returned a {width}x{height} image, expected {expected_width}x{expected_height}")]
    MetatileSize {
        width: u32,
        height: u32,
        expected_width: u32,
        expected_height: u32,
    },

    /// Tile disappeared from the cache between store and reread
    #[error("Tile {x},{y},{z} missing from cache after render")]
    MissingAfterRender { x: i64, y: i64, z: usize },

    #[error(transparent)]
    Grid(#[from] GridError),

    #[error(transparent)]
    Dimension(#[from] DimensionError),

    #[error("Render failed: {0}")]
    Source(#[from] SourceError),

    #[error("Render failed: {0}")]
    Codec(#[from] CodecError),

    #[error("Cache failure: {0}")]
    Cache(#[from] CacheError),
}

impl TileError {
    /// Whether the error was caused by the request rather than the server.
    pub fn is_client_error(&self) -> bool {
        match self {
            TileError::UnknownTileset { .. }
            | TileError::UnknownGrid { .. }
            | TileError::OutOfLimits { .. }
            | TileError::WrongTileSize { .. }
            | TileError::NoSource { .. }
            | TileError::Dimension(_) => true,
            TileError::Grid(err) => !matches!(err, GridError::InvalidDefinition { .. }),
            _ => false,
        }
    }
}
