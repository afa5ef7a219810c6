//! Tileset construction and configuration checks.

use std::collections::HashSet;
use std::sync::Arc;

use image::RgbaImage;

use super::Tileset;
use crate::cache::CacheBackend;
use crate::codec::{Format, ImageCodec, RasterCodec};
use crate::error::ConfigError;
use crate::grid::GridLink;
use crate::source::Source;
use crate::tile::{Dimension, MetatileLayout};

/// Default client-side expiry of served tiles, in seconds.
pub const DEFAULT_EXPIRES_SECS: u32 = 300;

/// Assembles a [`Tileset`] and checks it is consistent.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use tilecache::cache::MemoryCache;
/// use tilecache::codec::Format;
/// use tilecache::grid::{google_maps_compatible, GridLink};
/// use tilecache::tileset::Tileset;
///
/// let grid = Arc::new(google_maps_compatible().unwrap());
/// let tileset = Tileset::builder("osm")
///     .grid(GridLink::new(grid))
///     .cache(Arc::new(MemoryCache::new("mem")))
///     .format(Format::png())
///     .metatile(5, 5, 10)
///     .build()
///     .unwrap();
/// assert_eq!(tileset.layout().size_x, 5);
/// ```
pub struct TilesetBuilder {
    name: String,
    grid_links: Vec<GridLink>,
    cache: Option<Arc<dyn CacheBackend>>,
    source: Option<Arc<dyn Source>>,
    format: Option<Format>,
    codec: Option<Arc<dyn ImageCodec>>,
    layout: MetatileLayout,
    expires: u32,
    auto_expire: Option<u32>,
    dimensions: Vec<Dimension>,
    watermark: Option<RgbaImage>,
}

impl TilesetBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            grid_links: Vec::new(),
            cache: None,
            source: None,
            format: None,
            codec: None,
            layout: MetatileLayout::default(),
            expires: DEFAULT_EXPIRES_SECS,
            auto_expire: None,
            dimensions: Vec::new(),
            watermark: None,
        }
    }

    pub fn grid(mut self, link: GridLink) -> Self {
        self.grid_links.push(link);
        self
    }

    pub fn cache(mut self, cache: Arc<dyn CacheBackend>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn source(mut self, source: Arc<dyn Source>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn format(mut self, format: Format) -> Self {
        self.format = Some(format);
        self
    }

    /// Codec used to decode metatiles and encode tiles. Defaults to
    /// [`RasterCodec`].
    pub fn codec(mut self, codec: Arc<dyn ImageCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Tiles per metatile along each axis, and the gutter in pixels.
    pub fn metatile(mut self, size_x: u32, size_y: u32, buffer: u32) -> Self {
        self.layout = MetatileLayout::new(size_x, size_y, buffer);
        self
    }

    pub fn expires(mut self, seconds: u32) -> Self {
        self.expires = seconds;
        self
    }

    /// Re-render tiles older than `seconds`.
    pub fn auto_expire(mut self, seconds: u32) -> Self {
        self.auto_expire = Some(seconds);
        self
    }

    pub fn dimension(mut self, dimension: Dimension) -> Self {
        self.dimensions.push(dimension);
        self
    }

    /// Image blended over the top-left corner of every rendered tile.
    pub fn watermark(mut self, image: RgbaImage) -> Self {
        self.watermark = Some(image);
        self
    }

    pub fn build(self) -> Result<Tileset, ConfigError> {
        let context = format!("tileset {}", self.name);
        let invalid = |reason: &str| ConfigError::Invalid {
            context: context.clone(),
            reason: reason.to_string(),
        };

        let cache = self.cache.ok_or_else(|| invalid("no cache configured"))?;
        if self.grid_links.is_empty() {
            return Err(invalid("no grid configured"));
        }

        let mut grids = HashSet::new();
        for link in &self.grid_links {
            if !grids.insert(link.grid().name().to_string()) {
                return Err(ConfigError::Duplicate {
                    kind: "grid link",
                    name: format!("{}/{}", self.name, link.grid().name()),
                });
            }
        }
        if self.grid_links.len() > 1 && !cache.namespaces_grids() {
            return Err(invalid(&format!(
                "cache {} does not separate grids, so the tileset may only use one grid",
                cache.name()
            )));
        }

        if self.layout.size_x == 0 || self.layout.size_y == 0 {
            return Err(invalid("metatile size must be at least 1x1"));
        }
        if !self.layout.is_single_tile() && self.format.is_none() {
            return Err(invalid("a format is required when metatiling"));
        }

        let mut names = HashSet::new();
        for dimension in &self.dimensions {
            if !names.insert(dimension.name().to_ascii_lowercase()) {
                return Err(ConfigError::Duplicate {
                    kind: "dimension",
                    name: format!("{}/{}", self.name, dimension.name()),
                });
            }
        }

        if let Some(watermark) = &self.watermark {
            if self.format.is_none() {
                return Err(invalid("a format is required to apply a watermark"));
            }
            for link in &self.grid_links {
                let grid = link.grid();
                if watermark.dimensions() != (grid.tile_width(), grid.tile_height()) {
                    return Err(invalid(&format!(
                        "watermark is {}x{}, grid {} tiles are {}x{}",
                        watermark.width(),
                        watermark.height(),
                        grid.name(),
                        grid.tile_width(),
                        grid.tile_height()
                    )));
                }
            }
        }

        Ok(Tileset {
            name: Arc::from(self.name),
            grid_links: self.grid_links,
            cache,
            source: self.source,
            format: self.format,
            codec: self
                .codec
                .unwrap_or_else(|| Arc::new(RasterCodec::new())),
            layout: self.layout,
            expires: self.expires,
            auto_expire: self.auto_expire,
            dimensions: self.dimensions,
            watermark: self.watermark,
        })
    }
}
