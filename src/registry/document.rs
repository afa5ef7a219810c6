//! JSON configuration document.
//!
//! ```json
//! {
//!   "grids":    [{ "name": "local", "srs": "EPSG:3857", "extent": [0, 0, 512, 512],
//!                  "resolutions": [2, 1], "tile_size": [256, 256], "unit": "m" }],
//!   "formats":  [{ "name": "PNG", "type": "png", "compression": "fast" }],
//!   "caches":   [{ "name": "disk", "type": "disk", "base": "/var/cache/tiles",
//!                  "symlink_blank": true }],
//!   "sources":  [{ "name": "wms", "type": "wms", "url": "http://localhost/wms",
//!                  "params": { "LAYERS": "base" } }],
//!   "tilesets": [{ "name": "osm", "grids": ["GoogleMapsCompatible"],
//!                  "cache": "disk", "source": "wms", "format": "PNG",
//!                  "metatile": [5, 5], "metabuffer": 10 }]
//! }
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Whole configuration file.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigDocument {
    #[serde(default)]
    pub grids: Vec<GridConfig>,

    #[serde(default)]
    pub formats: Vec<FormatConfig>,

    #[serde(default)]
    pub caches: Vec<CacheConfig>,

    #[serde(default)]
    pub sources: Vec<SourceConfig>,

    #[serde(default)]
    pub tilesets: Vec<TilesetConfig>,
}

impl ConfigDocument {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GridConfig {
    pub name: String,
    pub srs: String,

    #[serde(default)]
    pub srs_aliases: Vec<String>,

    /// `[minx, miny, maxx, maxy]`
    pub extent: [f64; 4],

    pub resolutions: Vec<f64>,

    #[serde(default = "default_tile_size")]
    pub tile_size: [u32; 2],

    /// `m`, `dd` or `ft`
    #[serde(default)]
    pub unit: Option<String>,
}

fn default_tile_size() -> [u32; 2] {
    [256, 256]
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FormatConfig {
    pub name: String,

    #[serde(flatten)]
    pub kind: FormatKindConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FormatKindConfig {
    Png {
        /// `default`, `fast` or `best`
        #[serde(default)]
        compression: Option<String>,
    },
    Jpeg {
        #[serde(default)]
        quality: Option<u8>,
    },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    pub name: String,

    #[serde(flatten)]
    pub kind: CacheKindConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CacheKindConfig {
    Disk {
        base: PathBuf,
        #[serde(default)]
        symlink_blank: bool,
        #[serde(default)]
        namespace_grids: bool,
    },
    Sqlite {
        dbdir: PathBuf,
        #[serde(default)]
        hitstats: bool,
        #[serde(default)]
        pool_size: Option<u32>,
    },
    Mbtiles {
        path: PathBuf,
    },
    Memory {
        /// Byte budget
        #[serde(default)]
        capacity: Option<usize>,
    },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    pub name: String,

    #[serde(flatten)]
    pub kind: SourceKindConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SourceKindConfig {
    Wms {
        url: String,
        #[serde(default)]
        params: BTreeMap<String, String>,
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TilesetConfig {
    pub name: String,
    pub grids: Vec<GridLinkConfig>,
    pub cache: String,

    #[serde(default)]
    pub source: Option<String>,

    #[serde(default)]
    pub format: Option<String>,

    /// Tiles per metatile, `[x, y]`
    #[serde(default)]
    pub metatile: Option<[u32; 2]>,

    /// Metatile gutter in pixels
    #[serde(default)]
    pub metabuffer: u32,

    #[serde(default)]
    pub expires: Option<u32>,

    #[serde(default)]
    pub auto_expire: Option<u32>,

    #[serde(default)]
    pub dimensions: Vec<DimensionConfig>,

    /// Image file blended over every tile
    #[serde(default)]
    pub watermark: Option<PathBuf>,
}

/// A grid reference: a bare name or a restricted link.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum GridLinkConfig {
    Name(String),
    Restricted {
        grid: String,
        #[serde(default)]
        restricted_extent: Option<[f64; 4]>,
        /// Extra tiles around the restricted extent
        #[serde(default)]
        tolerance: Option<i64>,
        #[serde(default)]
        minzoom: Option<usize>,
        /// Highest served level, inclusive
        #[serde(default)]
        maxzoom: Option<usize>,
    },
}

impl GridLinkConfig {
    pub fn grid_name(&self) -> &str {
        match self {
            GridLinkConfig::Name(name) => name,
            GridLinkConfig::Restricted { grid, .. } => grid,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DimensionConfig {
    pub name: String,
    pub default: String,

    #[serde(flatten)]
    pub kind: DimensionKindConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DimensionKindConfig {
    Values {
        values: Vec<String>,
        #[serde(default)]
        case_sensitive: bool,
    },
    Regex {
        pattern: String,
    },
    Intervals {
        intervals: Vec<String>,
    },
}
