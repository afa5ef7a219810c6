use std::sync::Arc;

use super::{Extent, Grid};
use crate::error::GridError;

/// Half-open tile index window `[min, max)` for one level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileLimits {
    pub min_x: i64,
    pub min_y: i64,
    pub max_x: i64,
    pub max_y: i64,
}

impl TileLimits {
    pub const fn new(min_x: i64, min_y: i64, max_x: i64, max_y: i64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn contains(&self, x: i64, y: i64) -> bool {
        x >= self.min_x && x < self.max_x && y >= self.min_y && y < self.max_y
    }

    /// Number of tiles inside the window.
    pub fn count(&self) -> u64 {
        let w = (self.max_x - self.min_x).max(0) as u64;
        let h = (self.max_y - self.min_y).max(0) as u64;
        w * h
    }
}

/// A grid as used by one tileset.
///
/// Carries an optional restricted extent and the per-level limits derived
/// from it (or from the full grid extent).
#[derive(Debug, Clone)]
pub struct GridLink {
    grid: Arc<Grid>,
    restricted_extent: Option<Extent>,
    limits: Vec<TileLimits>,
    min_z: usize,
    max_z: usize,
}

impl GridLink {
    /// Link to the full grid.
    pub fn new(grid: Arc<Grid>) -> Self {
        let limits = grid.compute_limits(grid.extent(), 0);
        let max_z = grid.level_count();
        Self {
            grid,
            restricted_extent: None,
            limits,
            min_z: 0,
            max_z,
        }
    }

    /// Link restricted to `extent`, widened by `tolerance` tiles per level.
    pub fn restricted(
        grid: Arc<Grid>,
        extent: Extent,
        tolerance: i64,
    ) -> Result<Self, GridError> {
        if !extent.is_valid() || !grid.extent().intersects(&extent) {
            return Err(GridError::InvalidDefinition {
                grid: grid.name().to_string(),
                reason: format!("restricted extent {} does not intersect the grid", extent),
            });
        }
        let limits = grid.compute_limits(&extent, tolerance);
        let max_z = grid.level_count();
        Ok(Self {
            grid,
            restricted_extent: Some(extent),
            limits,
            min_z: 0,
            max_z,
        })
    }

    /// Restrict the link to levels `min_z..max_z`.
    pub fn with_zoom_range(mut self, min_z: usize, max_z: usize) -> Result<Self, GridError> {
        if min_z >= max_z || max_z > self.grid.level_count() {
            return Err(GridError::InvalidDefinition {
                grid: self.grid.name().to_string(),
                reason: format!("invalid zoom range {}..{}", min_z, max_z),
            });
        }
        self.min_z = min_z;
        self.max_z = max_z;
        Ok(self)
    }

    pub fn grid(&self) -> &Arc<Grid> {
        &self.grid
    }

    pub fn restricted_extent(&self) -> Option<&Extent> {
        self.restricted_extent.as_ref()
    }

    /// Extent tiles are served for: restricted if set, else the full grid.
    pub fn effective_extent(&self) -> &Extent {
        self.restricted_extent
            .as_ref()
            .unwrap_or_else(|| self.grid.extent())
    }

    pub fn limits(&self) -> &[TileLimits] {
        &self.limits
    }

    pub fn min_z(&self) -> usize {
        self.min_z
    }

    pub fn max_z(&self) -> usize {
        self.max_z
    }

    /// Limits for level `z`, or `None` outside the link's zoom range.
    pub fn limits_at(&self, z: usize) -> Option<&TileLimits> {
        if z < self.min_z || z >= self.max_z {
            return None;
        }
        self.limits.get(z)
    }

    /// True if `(x, y, z)` is a valid tile of this link.
    pub fn contains(&self, x: i64, y: i64, z: usize) -> bool {
        self.limits_at(z).is_some_and(|l| l.contains(x, y))
    }

    /// Valid tiles at the level closest to the map resolution needed to draw
    /// `bbox` at `width`x`height` pixels.
    pub fn tiles_for_bbox(&self, bbox: &Extent, width: u32, height: u32) -> Vec<(i64, i64, usize)> {
        if width == 0 || height == 0 {
            return Vec::new();
        }
        let resolution = (bbox.width() / width as f64).max(bbox.height() / height as f64);
        let z = self
            .grid
            .closest_level(resolution)
            .clamp(self.min_z, self.max_z - 1);
        let Some(limits) = self.limits_at(z) else {
            return Vec::new();
        };
        let window = self.grid.compute_limits(bbox, 0)[z];

        let mut tiles = Vec::new();
        for y in window.min_y.max(limits.min_y)..window.max_y.min(limits.max_y) {
            for x in window.min_x.max(limits.min_x)..window.max_x.min(limits.max_x) {
                tiles.push((x, y, z));
            }
        }
        tiles
    }
}
