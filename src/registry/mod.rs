//! Process-wide configuration registry.
//!
//! The registry is built once at startup from a [`ConfigDocument`] and then
//! only read. Every cross reference (tileset → grid, cache, source, format)
//! is resolved while building, so a registry that exists is consistent.
//!
//! Built-in grids (`WGS84`, `GoogleMapsCompatible`, `g`) are always present;
//! a declared grid with the same name replaces the built-in one.

mod document;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::cache::{
    CacheBackend, DiskCache, MbtilesCache, MemoryCache, SqliteCache,
    DEFAULT_MEMORY_CACHE_CAPACITY,
};
use crate::codec::{Format, FormatKind, PngCompression, DEFAULT_JPEG_QUALITY};
use crate::error::{ConfigError, TileError};
use crate::grid::{well_known_grids, Extent, Grid, GridLink, Unit};
use crate::source::{Source, WmsSource, DEFAULT_WMS_TIMEOUT_SECS};
use crate::tile::Dimension;
use crate::tileset::Tileset;

pub use document::{
    CacheConfig, CacheKindConfig, ConfigDocument, DimensionConfig, DimensionKindConfig,
    FormatConfig, FormatKindConfig, GridConfig, GridLinkConfig, SourceConfig, SourceKindConfig,
    TilesetConfig,
};

/// Named grids, formats, caches, sources and tilesets.
#[derive(Default)]
pub struct Registry {
    grids: BTreeMap<String, Arc<Grid>>,
    formats: HashMap<String, Format>,
    caches: HashMap<String, Arc<dyn CacheBackend>>,
    sources: HashMap<String, Arc<dyn Source>>,
    tilesets: BTreeMap<String, Arc<Tileset>>,
}

impl Registry {
    /// Empty registry holding only the built-in grids.
    pub fn new() -> Result<Self, ConfigError> {
        let mut registry = Self::default();
        for grid in well_known_grids()? {
            registry.grids.insert(grid.name().to_string(), Arc::new(grid));
        }
        Ok(registry)
    }

    /// Read and build the configuration file at `path`. Relative paths in
    /// the file are resolved against its directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let document = ConfigDocument::from_json(&text)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let registry = Self::from_document(document, base)?;
        info!(
            config = %path.display(),
            tilesets = registry.tilesets.len(),
            "configuration loaded"
        );
        Ok(registry)
    }

    /// Build a registry from a parsed document.
    pub fn from_document(document: ConfigDocument, base: &Path) -> Result<Self, ConfigError> {
        let mut registry = Self::new()?;

        let mut declared = HashSet::new();
        for grid in document.grids {
            ensure_unique(!declared.insert(grid.name.clone()), "grid", &grid.name)?;
            registry.add_grid(build_grid(grid)?);
        }
        for format in document.formats {
            ensure_unique(registry.formats.contains_key(&format.name), "format", &format.name)?;
            let name = format.name.clone();
            registry.formats.insert(name, build_format(format)?);
        }
        for cache in document.caches {
            ensure_unique(registry.caches.contains_key(&cache.name), "cache", &cache.name)?;
            let name = cache.name.clone();
            registry.caches.insert(name, build_cache(cache, base)?);
        }
        for source in document.sources {
            ensure_unique(registry.sources.contains_key(&source.name), "source", &source.name)?;
            let name = source.name.clone();
            registry.sources.insert(name, build_source(source)?);
        }
        // Caches without a tileset namespace, and the tileset using each
        let mut bound: HashMap<String, String> = HashMap::new();
        for tileset in document.tilesets {
            ensure_unique(
                registry.tilesets.contains_key(&tileset.name),
                "tileset",
                &tileset.name,
            )?;
            let exclusive = registry
                .caches
                .get(&tileset.cache)
                .is_some_and(|cache| !cache.namespaces_tilesets());
            if exclusive {
                if let Some(owner) = bound.get(&tileset.cache) {
                    return Err(ConfigError::Invalid {
                        context: format!("tileset {}", tileset.name),
                        reason: format!(
                            "cache {} already holds tileset {} and cannot store another",
                            tileset.cache, owner
                        ),
                    });
                }
                bound.insert(tileset.cache.clone(), tileset.name.clone());
            }
            let tileset = registry.build_tileset(tileset, base)?;
            registry.add_tileset(tileset);
        }
        Ok(registry)
    }

    pub fn from_json(text: &str, base: &Path) -> Result<Self, ConfigError> {
        Self::from_document(ConfigDocument::from_json(text)?, base)
    }

    /// Register `grid`, replacing any grid of the same name.
    pub fn add_grid(&mut self, grid: Grid) -> Arc<Grid> {
        let grid = Arc::new(grid);
        if self
            .grids
            .insert(grid.name().to_string(), Arc::clone(&grid))
            .is_some()
        {
            debug!(grid = grid.name(), "grid definition replaces an earlier one");
        }
        grid
    }

    pub fn add_tileset(&mut self, tileset: Tileset) -> Arc<Tileset> {
        let tileset = Arc::new(tileset);
        self.tilesets
            .insert(tileset.name().to_string(), Arc::clone(&tileset));
        tileset
    }

    pub fn grid(&self, name: &str) -> Option<&Arc<Grid>> {
        self.grids.get(name)
    }

    pub fn grid_names(&self) -> impl Iterator<Item = &str> {
        self.grids.keys().map(String::as_str)
    }

    pub fn cache(&self, name: &str) -> Option<&Arc<dyn CacheBackend>> {
        self.caches.get(name)
    }

    /// The tileset named `name`.
    pub fn tileset(&self, name: &str) -> Result<&Arc<Tileset>, TileError> {
        self.tilesets
            .get(name)
            .ok_or_else(|| TileError::UnknownTileset {
                name: name.to_string(),
            })
    }

    /// Tileset names in sorted order.
    pub fn tileset_names(&self) -> impl Iterator<Item = &str> {
        self.tilesets.keys().map(String::as_str)
    }

    fn build_tileset(&self, config: TilesetConfig, base: &Path) -> Result<Tileset, ConfigError> {
        let referrer = format!("tileset {}", config.name);
        let unknown = |kind: &'static str, name: &str| ConfigError::UnknownReference {
            kind,
            name: name.to_string(),
            referrer: referrer.clone(),
        };

        let cache = self
            .caches
            .get(&config.cache)
            .ok_or_else(|| unknown("cache", &config.cache))?;
        let mut builder = Tileset::builder(&config.name).cache(Arc::clone(cache));

        for link in &config.grids {
            let grid = self
                .grids
                .get(link.grid_name())
                .ok_or_else(|| unknown("grid", link.grid_name()))?;
            builder = builder.grid(build_grid_link(Arc::clone(grid), link)?);
        }
        if let Some(name) = &config.source {
            let source = self.sources.get(name).ok_or_else(|| unknown("source", name))?;
            builder = builder.source(Arc::clone(source));
        }
        if let Some(name) = &config.format {
            let format = self.formats.get(name).ok_or_else(|| unknown("format", name))?;
            builder = builder.format(format.clone());
        }

        let [size_x, size_y] = config.metatile.unwrap_or([1, 1]);
        builder = builder.metatile(size_x, size_y, config.metabuffer);
        if let Some(expires) = config.expires {
            builder = builder.expires(expires);
        }
        if let Some(auto_expire) = config.auto_expire {
            builder = builder.auto_expire(auto_expire);
        }
        for dimension in config.dimensions {
            builder = builder.dimension(build_dimension(dimension)?);
        }
        if let Some(path) = &config.watermark {
            let path = resolve(base, path);
            let image = image::open(&path).map_err(|e| ConfigError::Invalid {
                context: referrer.clone(),
                reason: format!("cannot read watermark {}: {}", path.display(), e),
            })?;
            builder = builder.watermark(image.to_rgba8());
        }

        builder.build()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("grids", &self.grids.keys().collect::<Vec<_>>())
            .field("formats", &self.formats.keys().collect::<Vec<_>>())
            .field("caches", &self.caches.keys().collect::<Vec<_>>())
            .field("sources", &self.sources.keys().collect::<Vec<_>>())
            .field("tilesets", &self.tilesets.keys().collect::<Vec<_>>())
            .finish()
    }
}

// =============================================================================
// Builders
// =============================================================================

fn ensure_unique(taken: bool, kind: &'static str, name: &str) -> Result<(), ConfigError> {
    if taken {
        return Err(ConfigError::Duplicate {
            kind,
            name: name.to_string(),
        });
    }
    Ok(())
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn build_grid(config: GridConfig) -> Result<Grid, ConfigError> {
    let unit = match config.unit.as_deref() {
        Some(unit) => unit.parse::<Unit>().map_err(|reason| ConfigError::Invalid {
            context: format!("grid {}", config.name),
            reason,
        })?,
        None => Unit::default(),
    };
    let [width, height] = config.tile_size;
    let grid = Grid::new(
        config.name,
        config.srs,
        Extent::from(config.extent),
        &config.resolutions,
        width,
        height,
        unit,
    )?;
    Ok(grid.with_srs_aliases(config.srs_aliases))
}

fn build_grid_link(grid: Arc<Grid>, config: &GridLinkConfig) -> Result<GridLink, ConfigError> {
    let GridLinkConfig::Restricted {
        restricted_extent,
        tolerance,
        minzoom,
        maxzoom,
        ..
    } = config
    else {
        return Ok(GridLink::new(grid));
    };

    let levels = grid.level_count();
    let link = match restricted_extent {
        Some(extent) => {
            GridLink::restricted(grid, Extent::from(*extent), tolerance.unwrap_or(5))?
        }
        None => GridLink::new(grid),
    };
    if minzoom.is_none() && maxzoom.is_none() {
        return Ok(link);
    }
    let min_z = minzoom.unwrap_or(0);
    let max_z = maxzoom.map_or(levels, |z| z + 1);
    Ok(link.with_zoom_range(min_z, max_z)?)
}

fn build_format(config: FormatConfig) -> Result<Format, ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid {
        context: format!("format {}", config.name),
        reason,
    };
    let kind = match config.kind {
        FormatKindConfig::Png { compression } => {
            let compression = match compression.as_deref() {
                None | Some("default") => PngCompression::Default,
                Some("fast") => PngCompression::Fast,
                Some("best") => PngCompression::Best,
                Some(other) => return Err(invalid(format!("unknown PNG compression '{}'", other))),
            };
            FormatKind::Png { compression }
        }
        FormatKindConfig::Jpeg { quality } => {
            let quality = quality.unwrap_or(DEFAULT_JPEG_QUALITY);
            if !crate::codec::is_valid_quality(quality) {
                return Err(invalid(format!("JPEG quality {} out of 1..=100", quality)));
            }
            FormatKind::Jpeg { quality }
        }
    };
    Ok(Format::new(config.name.clone(), kind))
}

fn build_cache(config: CacheConfig, base: &Path) -> Result<Arc<dyn CacheBackend>, ConfigError> {
    let cache: Arc<dyn CacheBackend> = match config.kind {
        CacheKindConfig::Disk {
            base: dir,
            symlink_blank,
            namespace_grids,
        } => Arc::new(
            DiskCache::new(config.name, resolve(base, &dir))
                .with_symlink_blank(symlink_blank)
                .with_grid_namespace(namespace_grids),
        ),
        CacheKindConfig::Sqlite {
            dbdir,
            hitstats,
            pool_size,
        } => {
            let mut cache =
                SqliteCache::new(config.name, resolve(base, &dbdir)).with_hitstats(hitstats);
            if let Some(size) = pool_size {
                cache = cache.with_pool_size(size);
            }
            Arc::new(cache)
        }
        CacheKindConfig::Mbtiles { path } => {
            Arc::new(MbtilesCache::open(config.name, resolve(base, &path))?)
        }
        CacheKindConfig::Memory { capacity } => Arc::new(MemoryCache::with_capacity(
            config.name,
            capacity.unwrap_or(DEFAULT_MEMORY_CACHE_CAPACITY),
        )),
    };
    Ok(cache)
}

fn build_source(config: SourceConfig) -> Result<Arc<dyn Source>, ConfigError> {
    match config.kind {
        SourceKindConfig::Wms {
            url,
            params,
            timeout_secs,
        } => {
            let timeout = Duration::from_secs(timeout_secs.unwrap_or(DEFAULT_WMS_TIMEOUT_SECS));
            Ok(Arc::new(WmsSource::new(config.name, &url, params, timeout)?))
        }
    }
}

fn build_dimension(config: DimensionConfig) -> Result<Dimension, ConfigError> {
    let dimension = match config.kind {
        DimensionKindConfig::Values {
            values,
            case_sensitive,
        } => Dimension::values(config.name, config.default, values, case_sensitive)?,
        DimensionKindConfig::Regex { pattern } => {
            Dimension::regex(config.name, config.default, &pattern)?
        }
        DimensionKindConfig::Intervals { intervals } => {
            Dimension::intervals(config.name, config.default, &intervals)?
        }
    };
    Ok(dimension)
}
