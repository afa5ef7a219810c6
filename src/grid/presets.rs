//! Grids every configuration gets without declaring them.

use super::{Extent, Grid, Unit};
use crate::error::GridError;

const WGS84_LEVELS: usize = 18;
const MERCATOR_LEVELS: usize = 19;
const MERCATOR_HALF_WIDTH: f64 = 20037508.3427892;

/// Geographic grid in degrees (EPSG:4326), two tiles wide at level 0.
pub fn wgs84() -> Result<Grid, GridError> {
    let resolutions: Vec<f64> = (0..WGS84_LEVELS)
        .map(|z| 0.703125 / f64::powi(2.0, z as i32))
        .collect();
    Grid::new(
        "WGS84",
        "EPSG:4326",
        Extent::new(-180.0, -90.0, 180.0, 90.0),
        &resolutions,
        256,
        256,
        Unit::Degrees,
    )
    .map(|g| g.with_srs_aliases(vec!["CRS:84".to_string()]))
}

/// Spherical mercator grid (EPSG:3857), one tile at level 0.
pub fn google_maps_compatible() -> Result<Grid, GridError> {
    mercator("GoogleMapsCompatible")
}

fn mercator(name: &str) -> Result<Grid, GridError> {
    let resolutions: Vec<f64> = (0..MERCATOR_LEVELS)
        .map(|z| 156543.0339280410 / f64::powi(2.0, z as i32))
        .collect();
    Grid::new(
        name,
        "EPSG:3857",
        Extent::new(
            -MERCATOR_HALF_WIDTH,
            -MERCATOR_HALF_WIDTH,
            MERCATOR_HALF_WIDTH,
            MERCATOR_HALF_WIDTH,
        ),
        &resolutions,
        256,
        256,
        Unit::Meters,
    )
    .map(|g| g.with_srs_aliases(vec!["EPSG:900913".to_string()]))
}

/// Built-in grids. `g` is the mercator grid under its short historical name.
pub fn well_known_grids() -> Result<Vec<Grid>, GridError> {
    Ok(vec![wgs84()?, google_maps_compatible()?, mercator("g")?])
}
