//! Tiling schemes and tile coordinate math.
//!
//! A [`Grid`] is an immutable description of how the plane is cut into
//! tiles: a spatial reference, an extent, one resolution per zoom level and
//! a tile size in pixels. Tile `(0, 0)` sits at the lower-left corner of the
//! extent and `y` grows northwards.
//!
//! ```text
//!   extent.maxy ┌──────┬──────┐
//!               │ 0,1  │ 1,1  │
//!               ├──────┼──────┤
//!               │ 0,0  │ 1,0  │
//!   extent.miny └──────┴──────┘
//!          extent.minx      extent.maxx
//! ```
//!
//! A [`GridLink`] binds a grid to one tileset and precomputes per-level tile
//! limits from an optional restricted extent.
//!
//! All math is done in `f64`. Comparisons use a tolerance of one pixel
//! (`resolution / tile_size`) rather than float equality.

mod link;
mod presets;

use std::fmt;
use std::str::FromStr;

use crate::error::GridError;

pub use link::{GridLink, TileLimits};
pub use presets::{google_maps_compatible, well_known_grids, wgs84};

/// Slack applied when turning extents into tile indices.
const EPSILON: f64 = 1e-7;

// =============================================================================
// Extent
// =============================================================================

/// Axis-aligned bounding box in grid units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extent {
    pub minx: f64,
    pub miny: f64,
    pub maxx: f64,
    pub maxy: f64,
}

impl Extent {
    pub const fn new(minx: f64, miny: f64, maxx: f64, maxy: f64) -> Self {
        Self {
            minx,
            miny,
            maxx,
            maxy,
        }
    }

    pub fn width(&self) -> f64 {
        self.maxx - self.minx
    }

    pub fn height(&self) -> f64 {
        self.maxy - self.miny
    }

    /// True when min < max on both axes.
    pub fn is_valid(&self) -> bool {
        self.minx < self.maxx && self.miny < self.maxy
    }

    pub fn intersects(&self, other: &Extent) -> bool {
        self.minx < other.maxx
            && other.minx < self.maxx
            && self.miny < other.maxy
            && other.miny < self.maxy
    }

    /// True when `other` lies inside `self`.
    pub fn contains(&self, other: &Extent) -> bool {
        other.minx >= self.minx
            && other.miny >= self.miny
            && other.maxx <= self.maxx
            && other.maxy <= self.maxy
    }

    /// Compare corner by corner with an absolute tolerance.
    pub fn approx_eq(&self, other: &Extent, tolerance: f64) -> bool {
        (self.minx - other.minx).abs() <= tolerance
            && (self.miny - other.miny).abs() <= tolerance
            && (self.maxx - other.maxx).abs() <= tolerance
            && (self.maxy - other.maxy).abs() <= tolerance
    }
}

impl From<[f64; 4]> for Extent {
    fn from(v: [f64; 4]) -> Self {
        Extent::new(v[0], v[1], v[2], v[3])
    }
}

impl FromStr for Extent {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<f64> = s
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|_| GridError::InvalidExtent(s.to_string()))?;
        match parts.as_slice() {
            [minx, miny, maxx, maxy] => Ok(Extent::new(*minx, *miny, *maxx, *maxy)),
            _ => Err(GridError::InvalidExtent(s.to_string())),
        }
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.minx, self.miny, self.maxx, self.maxy)
    }
}

// =============================================================================
// Unit
// =============================================================================

/// Ground unit of a grid's spatial reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Unit {
    #[default]
    Meters,
    Degrees,
    Feet,
}

impl FromStr for Unit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "m" | "meters" => Ok(Unit::Meters),
            "dd" | "degrees" => Ok(Unit::Degrees),
            "ft" | "feet" => Ok(Unit::Feet),
            other => Err(format!("unknown unit '{}' (expected m, dd or ft)", other)),
        }
    }
}

// =============================================================================
// Grid
// =============================================================================

/// One zoom level of a grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridLevel {
    /// Ground units per pixel
    pub resolution: f64,

    /// Number of tile columns covering the grid extent
    pub max_x: i64,

    /// Number of tile rows covering the grid extent
    pub max_y: i64,
}

/// An immutable tiling scheme.
///
/// Shared read-only between tilesets through `Arc<Grid>`.
#[derive(Debug, Clone)]
pub struct Grid {
    name: String,
    srs: String,
    srs_aliases: Vec<String>,
    extent: Extent,
    unit: Unit,
    tile_width: u32,
    tile_height: u32,
    levels: Vec<GridLevel>,
}

impl Grid {
    /// Build a grid, checking every invariant of the definition.
    pub fn new(
        name: impl Into<String>,
        srs: impl Into<String>,
        extent: Extent,
        resolutions: &[f64],
        tile_width: u32,
        tile_height: u32,
        unit: Unit,
    ) -> Result<Self, GridError> {
        let name = name.into();
        let invalid = |reason: &str| GridError::InvalidDefinition {
            grid: name.clone(),
            reason: reason.to_string(),
        };

        if !extent.is_valid() {
            return Err(invalid("extent min must be lower than max on both axes"));
        }
        if tile_width == 0 || tile_height == 0 {
            return Err(invalid("tile size must be non-zero"));
        }
        if resolutions.is_empty() {
            return Err(invalid("at least one resolution is required"));
        }
        if resolutions.iter().any(|r| !r.is_finite() || *r <= 0.0) {
            return Err(invalid("resolutions must be positive"));
        }
        if resolutions.windows(2).any(|w| w[1] >= w[0]) {
            return Err(invalid("resolutions must be strictly decreasing"));
        }

        let levels = resolutions
            .iter()
            .map(|&resolution| {
                let unit_width = tile_width as f64 * resolution;
                let unit_height = tile_height as f64 * resolution;
                GridLevel {
                    resolution,
                    max_x: ((extent.width() - EPSILON) / unit_width).ceil() as i64,
                    max_y: ((extent.height() - EPSILON) / unit_height).ceil() as i64,
                }
            })
            .collect();

        Ok(Self {
            name,
            srs: srs.into(),
            srs_aliases: Vec::new(),
            extent,
            unit,
            tile_width,
            tile_height,
            levels,
        })
    }

    /// Add alternate SRS identifiers that resolve to this grid.
    pub fn with_srs_aliases(mut self, aliases: Vec<String>) -> Self {
        self.srs_aliases = aliases;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn srs(&self) -> &str {
        &self.srs
    }

    pub fn srs_aliases(&self) -> &[String] {
        &self.srs_aliases
    }

    /// True if `srs` is the grid's SRS or one of its aliases.
    pub fn matches_srs(&self, srs: &str) -> bool {
        self.srs.eq_ignore_ascii_case(srs)
            || self.srs_aliases.iter().any(|a| a.eq_ignore_ascii_case(srs))
    }

    pub fn extent(&self) -> &Extent {
        &self.extent
    }

    pub fn unit(&self) -> Unit {
        self.unit
    }

    pub fn tile_width(&self) -> u32 {
        self.tile_width
    }

    pub fn tile_height(&self) -> u32 {
        self.tile_height
    }

    pub fn levels(&self) -> &[GridLevel] {
        &self.levels
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Level `z`, or a [`GridError::LevelOutOfRange`].
    pub fn level(&self, z: usize) -> Result<&GridLevel, GridError> {
        self.levels.get(z).ok_or_else(|| GridError::LevelOutOfRange {
            grid: self.name.clone(),
            level: z,
            levels: self.levels.len(),
        })
    }

    /// Resolution a map of one tile covering `bbox` would need.
    pub fn resolution_for_bbox(&self, bbox: &Extent) -> f64 {
        let rx = bbox.width() / self.tile_width as f64;
        let ry = bbox.height() / self.tile_height as f64;
        rx.max(ry)
    }

    /// Find the level matching `resolution` within one pixel.
    ///
    /// Returns the level index and its exact configured resolution.
    pub fn level_for_resolution(&self, resolution: f64) -> Result<(usize, f64), GridError> {
        let max_size = self.tile_width.max(self.tile_height) as f64;
        let tolerance = resolution / max_size;
        self.levels
            .iter()
            .position(|l| (l.resolution - resolution).abs() < tolerance)
            .map(|z| (z, self.levels[z].resolution))
            .ok_or_else(|| GridError::WrongResolution {
                grid: self.name.clone(),
                resolution,
            })
    }

    /// Level whose resolution is closest to `resolution`.
    pub fn closest_level(&self, resolution: f64) -> usize {
        let mut best = 0;
        let mut best_diff = f64::INFINITY;
        for (z, level) in self.levels.iter().enumerate() {
            let diff = (level.resolution - resolution).abs();
            if diff < best_diff {
                best = z;
                best_diff = diff;
            }
        }
        best
    }

    /// Tile indices of the tile containing the point `(x, y)` at level `z`.
    pub fn xy_for_coords(&self, x: f64, y: f64, z: usize) -> Result<(i64, i64), GridError> {
        let res = self.level(z)?.resolution;
        let tx = ((x - self.extent.minx) / (res * self.tile_width as f64)).floor();
        let ty = ((y - self.extent.miny) / (res * self.tile_height as f64)).floor();
        Ok((tx as i64, ty as i64))
    }

    /// Geographic bbox of tile `(x, y, z)`.
    pub fn tile_bbox(&self, x: i64, y: i64, z: usize) -> Result<Extent, GridError> {
        let res = self.level(z)?.resolution;
        let width = res * self.tile_width as f64;
        let height = res * self.tile_height as f64;
        let minx = self.extent.minx + x as f64 * width;
        let miny = self.extent.miny + y as f64 * height;
        Ok(Extent::new(minx, miny, minx + width, miny + height))
    }

    /// Find the tile whose bbox is `bbox`.
    ///
    /// Fails with [`GridError::WrongResolution`] if the bbox size matches no
    /// level and [`GridError::WrongExtent`] if it is not aligned on tile
    /// boundaries within one pixel.
    pub fn tile_for_bbox(&self, bbox: &Extent) -> Result<(i64, i64, usize), GridError> {
        let (z, res) = self.level_for_resolution(self.resolution_for_bbox(bbox))?;
        let tile_w = res * self.tile_width as f64;
        let tile_h = res * self.tile_height as f64;
        let x = ((bbox.minx - self.extent.minx) / tile_w).round() as i64;
        let y = ((bbox.miny - self.extent.miny) / tile_h).round() as i64;

        let expected = self.tile_bbox(x, y, z)?;
        if !expected.approx_eq(bbox, res) {
            return Err(GridError::WrongExtent {
                grid: self.name.clone(),
                bbox: bbox.to_string(),
            });
        }
        Ok((x, y, z))
    }

    /// Per-level half-open tile limits covering `extent`, widened by
    /// `tolerance` tiles and clamped to the grid.
    pub fn compute_limits(&self, extent: &Extent, tolerance: i64) -> Vec<TileLimits> {
        self.levels
            .iter()
            .map(|level| {
                let unit_width = self.tile_width as f64 * level.resolution;
                let unit_height = self.tile_height as f64 * level.resolution;
                let min_x = ((extent.minx - self.extent.minx) / unit_width + EPSILON).floor()
                    as i64
                    - tolerance;
                let min_y = ((extent.miny - self.extent.miny) / unit_height + EPSILON).floor()
                    as i64
                    - tolerance;
                let max_x = ((extent.maxx - self.extent.minx) / unit_width - EPSILON).ceil()
                    as i64
                    + tolerance;
                let max_y = ((extent.maxy - self.extent.miny) / unit_height - EPSILON).ceil()
                    as i64
                    + tolerance;
                TileLimits {
                    min_x: min_x.clamp(0, level.max_x),
                    min_y: min_y.clamp(0, level.max_y),
                    max_x: max_x.clamp(0, level.max_x),
                    max_y: max_y.clamp(0, level.max_y),
                }
            })
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================
