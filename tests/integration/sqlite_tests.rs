//! SQLite and MBTiles caches through a tileset.

use std::sync::Arc;

use tempfile::TempDir;

use tilecache::cache::{CacheBackend, MbtilesCache, SqliteCache};
use tilecache::codec::Format;
use tilecache::error::{CacheError, TileError};
use tilecache::grid::GridLink;
use tilecache::tile::Dimension;
use tilecache::tileset::{Fetch, Tileset};

use super::test_utils::{is_valid_png, local_grid, metatiled_tileset, request, StubSource};

// =============================================================================
// SQLite
// =============================================================================

#[test]
fn test_sqlite_render_then_hit() {
    let dir = TempDir::new().unwrap();
    let cache = Arc::new(SqliteCache::new("db", dir.path()).with_hitstats(true));
    let source = StubSource::gradient();
    let tileset = metatiled_tileset(cache.clone(), source.clone());

    let mut tile = request(&tileset, 1, 0, 1);
    assert_eq!(tileset.get_tile(&mut tile).unwrap(), Fetch::Rendered);
    assert!(dir.path().join("osm#local.db").is_file());
    assert_eq!(cache.db_path(&tile), dir.path().join("osm#local.db"));

    for (x, y) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
        let mut other = request(&tileset, x, y, 1);
        assert_eq!(tileset.get_tile(&mut other).unwrap(), Fetch::Hit);
        assert!(is_valid_png(&other.data.unwrap()));
        assert!(other.mtime.is_some());
    }
    assert_eq!(source.call_count(), 1);
}

#[test]
fn test_sqlite_keys_dimensions() {
    let dir = TempDir::new().unwrap();
    let source = StubSource::gradient();
    let tileset = Tileset::builder("osm")
        .grid(GridLink::new(local_grid()))
        .cache(Arc::new(SqliteCache::new("db", dir.path())))
        .source(source.clone())
        .format(Format::png())
        .dimension(Dimension::regex("elevation", "0", r"^\d+$").unwrap())
        .build()
        .unwrap();

    for value in ["0", "100", "0"] {
        let mut tile = request(&tileset, 0, 0, 0);
        tileset.set_dimension(&mut tile, "elevation", value).unwrap();
        tileset.get_tile(&mut tile).unwrap();
    }
    assert_eq!(source.call_count(), 2);
}

// =============================================================================
// MBTiles
// =============================================================================

#[test]
fn test_mbtiles_render_then_hit() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("osm.mbtiles");
    let cache = Arc::new(MbtilesCache::open("mbtiles", &path).unwrap());
    let source = StubSource::gradient();
    let tileset = metatiled_tileset(cache.clone(), source.clone());

    let mut tile = request(&tileset, 0, 1, 1);
    assert_eq!(tileset.get_tile(&mut tile).unwrap(), Fetch::Rendered);
    assert!(path.is_file());

    // Reopening the file sees the same tiles
    drop(tileset);
    let reopened = Arc::new(MbtilesCache::open("mbtiles", &path).unwrap());
    let tileset = metatiled_tileset(reopened.clone(), source.clone());
    let mut again = request(&tileset, 1, 0, 1);
    assert!(reopened.exists(&again));
    assert_eq!(tileset.get_tile(&mut again).unwrap(), Fetch::Hit);
    assert_eq!(source.call_count(), 1);
}

#[test]
fn test_mbtiles_rejects_dimensions() {
    let dir = TempDir::new().unwrap();
    let cache = Arc::new(MbtilesCache::open("mbtiles", dir.path().join("t.mbtiles")).unwrap());
    let source = StubSource::gradient();
    let tileset = Tileset::builder("osm")
        .grid(GridLink::new(local_grid()))
        .cache(cache)
        .source(source.clone())
        .format(Format::png())
        .dimension(Dimension::regex("elevation", "0", r"^\d+$").unwrap())
        .build()
        .unwrap();

    let mut tile = request(&tileset, 0, 0, 0);
    let err = tileset.get_tile(&mut tile).unwrap_err();
    assert!(matches!(
        err,
        TileError::Cache(CacheError::Unsupported { .. })
    ));
    assert!(!err.is_client_error());
}

#[test]
fn test_mbtiles_file_serves_one_tileset() {
    let dir = TempDir::new().unwrap();
    let cache = Arc::new(MbtilesCache::open("mbtiles", dir.path().join("t.mbtiles")).unwrap());
    let roads = metatiled_tileset(cache.clone(), StubSource::flat([200, 0, 0, 255]));
    let aerial = Tileset::builder("aerial")
        .grid(GridLink::new(local_grid()))
        .cache(cache.clone())
        .source(StubSource::flat([0, 0, 200, 255]))
        .format(Format::png())
        .metatile(2, 2, 0)
        .build()
        .unwrap();

    let mut road = request(&roads, 0, 0, 1);
    roads.get_tile(&mut road).unwrap();

    let mut photo = request(&aerial, 0, 0, 1);
    assert!(matches!(
        aerial.get_tile(&mut photo),
        Err(TileError::Cache(CacheError::Unsupported { .. }))
    ));
    assert!(photo.data.is_none());

    let mut again = request(&roads, 0, 0, 1);
    assert_eq!(roads.get_tile(&mut again).unwrap(), Fetch::Hit);
    assert_eq!(again.data, road.data);
}

#[test]
fn test_sqlite_dimension_values_with_separator() {
    let dir = TempDir::new().unwrap();
    let source = StubSource::gradient();
    let tileset = Tileset::builder("osm")
        .grid(GridLink::new(local_grid()))
        .cache(Arc::new(SqliteCache::new("db", dir.path())))
        .source(source.clone())
        .format(Format::png())
        .dimension(Dimension::regex("layer", "a", r"^[a-z#]+$").unwrap())
        .dimension(Dimension::regex("style", "c", r"^[a-z#]+$").unwrap())
        .build()
        .unwrap();

    let fetch = |layer: &str, style: &str| {
        let mut tile = request(&tileset, 0, 0, 0);
        tileset.set_dimension(&mut tile, "layer", layer).unwrap();
        tileset.set_dimension(&mut tile, "style", style).unwrap();
        tileset.get_tile(&mut tile).unwrap()
    };
    assert_eq!(fetch("a#b", "c"), Fetch::Rendered);
    assert_eq!(fetch("a", "b#c"), Fetch::Rendered);
    assert_eq!(fetch("a#b", "c"), Fetch::Hit);
    assert_eq!(source.call_count(), 2);
}
