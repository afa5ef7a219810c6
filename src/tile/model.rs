use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;

use super::dimension::DIMENSION_SEPARATOR;

/// One cached raster unit.
///
/// A tile names its tileset and grid by value so cache backends can derive
/// keys without reaching back into the configuration. The image buffer is
/// owned by the tile and lives as long as the request that created it.
#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    tileset: Arc<str>,
    grid: Arc<str>,
    extension: Arc<str>,

    /// Column, counted from the grid's west edge
    pub x: i64,

    /// Row, counted from the grid's south edge
    pub y: i64,

    /// Zoom level index
    pub z: usize,

    dimensions: Vec<(String, String)>,

    /// Encoded image, filled by a cache read or a metatile split
    pub data: Option<Bytes>,

    /// Last modification time reported by the cache
    pub mtime: Option<SystemTime>,

    /// Seconds clients may keep the tile
    pub expires: Option<u32>,

    /// Pixel size requested by the protocol layer, if it sent one
    pub requested_size: Option<(u32, u32)>,

    /// RGBA color when the tile is a single flat color
    pub uniform_color: Option<[u8; 4]>,
}

impl Tile {
    /// Create an empty tile stored with the `png` extension.
    pub fn new(
        tileset: impl Into<Arc<str>>,
        grid: impl Into<Arc<str>>,
        x: i64,
        y: i64,
        z: usize,
    ) -> Self {
        Self {
            tileset: tileset.into(),
            grid: grid.into(),
            extension: Arc::from("png"),
            x,
            y,
            z,
            dimensions: Vec::new(),
            data: None,
            mtime: None,
            expires: None,
            requested_size: None,
            uniform_color: None,
        }
    }

    pub fn with_extension(mut self, extension: impl Into<Arc<str>>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn with_dimensions(mut self, dimensions: Vec<(String, String)>) -> Self {
        self.dimensions = dimensions;
        self
    }

    pub fn tileset(&self) -> &str {
        &self.tileset
    }

    pub fn grid(&self) -> &str {
        &self.grid
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Dimension name/value pairs in configuration order.
    pub fn dimensions(&self) -> &[(String, String)] {
        &self.dimensions
    }

    /// Replace the value of an existing dimension. Returns false if the tile
    /// has no dimension of that name.
    pub(crate) fn set_dimension_value(&mut self, name: &str, value: String) -> bool {
        match self.dimensions.iter_mut().find(|(n, _)| n == name) {
            Some((_, v)) => {
                *v = value;
                true
            }
            None => false,
        }
    }

    /// Dimension values joined in configuration order; empty without dimensions.
    ///
    /// `%` and the separator are percent-encoded inside values, so distinct
    /// value lists never share a key.
    pub fn dimension_key(&self) -> String {
        self.dimensions
            .iter()
            .map(|(_, v)| escape_key_value(v))
            .collect::<Vec<_>>()
            .join(DIMENSION_SEPARATOR)
    }

    /// A copy of this tile's identity at other coordinates, without data.
    pub fn sibling(&self, x: i64, y: i64) -> Tile {
        Tile {
            tileset: Arc::clone(&self.tileset),
            grid: Arc::clone(&self.grid),
            extension: Arc::clone(&self.extension),
            x,
            y,
            z: self.z,
            dimensions: self.dimensions.clone(),
            data: None,
            mtime: None,
            expires: None,
            requested_size: None,
            uniform_color: None,
        }
    }

    /// True if both tiles address the same cache entry.
    pub fn same_key(&self, other: &Tile) -> bool {
        self.tileset == other.tileset
            && self.grid == other.grid
            && self.x == other.x
            && self.y == other.y
            && self.z == other.z
            && self.dimensions == other.dimensions
    }
}

impl fmt::Display for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}/{}",
            self.tileset, self.grid, self.z, self.x, self.y
        )?;
        if !self.dimensions.is_empty() {
            write!(f, "[{}]", self.dimension_key())?;
        }
        Ok(())
    }
}

fn escape_key_value(value: &str) -> Cow<'_, str> {
    if !value.contains(['%', '#']) {
        return Cow::Borrowed(value);
    }
    Cow::Owned(value.replace('%', "%25").replace('#', "%23"))
}
