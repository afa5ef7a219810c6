//! Command-line configuration.
//!
//! Two subcommands share one configuration file:
//!
//! - `tilecache serve --config tilecache.json` runs the HTTP tile endpoint
//! - `tilecache seed --config tilecache.json --tileset osm --zoom 0,8`
//!   pre-renders a region of a tileset
//!
//! # Environment Variables
//!
//! Every option can also be set with a `TILECACHE_` prefixed variable:
//!
//! - `TILECACHE_CONFIG` - Path of the JSON configuration file
//! - `TILECACHE_HOST` - Server bind address (default: 0.0.0.0)
//! - `TILECACHE_PORT` - Server port (default: 8080)
//! - `TILECACHE_CORS_ORIGINS` - Allowed CORS origins, comma-separated
//! - `TILECACHE_SEED_THREADS` - Seeding workers (default: 4)

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::grid::Extent;
use crate::seed::DEFAULT_SEED_THREADS;

// =============================================================================
// Default Values
// =============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 8080;

/// Upper bound on seeding workers.
pub const MAX_SEED_THREADS: usize = 256;

// =============================================================================
// CLI Arguments
// =============================================================================

/// tilecache - a metatiling map tile cache.
///
/// Renders tiles through an upstream source on cache miss and stores them
/// on disk, in SQLite or in MBTiles.
#[derive(Parser, Debug, Clone)]
#[command(name = "tilecache")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Serve tiles over HTTP.
    Serve(ServeConfig),

    /// Pre-render tiles into the cache.
    Seed(SeedConfig),
}

/// Options of `tilecache serve`.
#[derive(Args, Debug, Clone)]
pub struct ServeConfig {
    /// JSON configuration file declaring grids, caches, sources and tilesets.
    #[arg(short, long, env = "TILECACHE_CONFIG")]
    pub config: PathBuf,

    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "TILECACHE_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "TILECACHE_PORT")]
    pub port: u16,

    /// Allowed CORS origins (comma-separated).
    ///
    /// If not specified, allows any origin.
    #[arg(long, env = "TILECACHE_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl ServeConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.config.as_os_str().is_empty() {
            return Err(
                "Configuration file is required. Set --config or TILECACHE_CONFIG".to_string(),
            );
        }
        if self.host.is_empty() {
            return Err("host must not be empty".to_string());
        }
        Ok(())
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Options of `tilecache seed`.
#[derive(Args, Debug, Clone)]
pub struct SeedConfig {
    /// JSON configuration file declaring grids, caches, sources and tilesets.
    #[arg(short, long, env = "TILECACHE_CONFIG")]
    pub config: PathBuf,

    /// Tileset to seed.
    #[arg(short, long)]
    pub tileset: String,

    /// Grid to seed. Defaults to the tileset's first grid.
    #[arg(short, long)]
    pub grid: Option<String>,

    /// Levels to seed, as `min,max` (inclusive).
    #[arg(short, long, value_delimiter = ',')]
    pub zoom: Option<Vec<usize>>,

    /// Only seed tiles touching `minx,miny,maxx,maxy`, in grid units.
    #[arg(short, long, allow_hyphen_values = true)]
    pub extent: Option<String>,

    /// Number of seeding workers.
    #[arg(long, default_value_t = DEFAULT_SEED_THREADS, env = "TILECACHE_SEED_THREADS")]
    pub threads: usize,

    /// Re-render metatiles that are already cached.
    #[arg(short, long, default_value_t = false)]
    pub force: bool,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl SeedConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.tileset.is_empty() {
            return Err("tileset name must not be empty".to_string());
        }
        if self.threads == 0 || self.threads > MAX_SEED_THREADS {
            return Err(format!("threads must be between 1 and {}", MAX_SEED_THREADS));
        }
        self.zoom_range()?;
        self.parsed_extent()?;
        Ok(())
    }

    /// The `(min, max)` zoom range, if one was given.
    pub fn zoom_range(&self) -> Result<Option<(usize, usize)>, String> {
        match self.zoom.as_deref() {
            None => Ok(None),
            Some([min, max]) if min <= max => Ok(Some((*min, *max))),
            Some([min, max]) => Err(format!("zoom range {},{} is reversed", min, max)),
            Some(_) => Err("zoom must be given as min,max".to_string()),
        }
    }

    pub fn parsed_extent(&self) -> Result<Option<Extent>, String> {
        self.extent
            .as_deref()
            .map(|s| s.parse::<Extent>().map_err(|e| e.to_string()))
            .transpose()
    }
}

// =============================================================================
// Tests
// =============================================================================
