//! End-to-end render tests: miss, render, split, store and reread.

use std::sync::Arc;

use tempfile::TempDir;

use tilecache::cache::{CacheBackend, DiskCache, MemoryCache};
use tilecache::codec::Format;
use tilecache::error::TileError;
use tilecache::grid::{Extent, GridLink};
use tilecache::tile::Dimension;
use tilecache::tileset::{Fetch, Tileset};

use super::test_utils::{
    decode, is_valid_png, local_grid, metatiled_tileset, request, FailingSource, StubSource,
};

// =============================================================================
// Miss / Render / Hit
// =============================================================================

#[test]
fn test_miss_renders_whole_metatile() {
    let dir = TempDir::new().unwrap();
    let cache = Arc::new(DiskCache::new("disk", dir.path()));
    let source = StubSource::gradient();
    let tileset = metatiled_tileset(cache.clone(), source.clone());

    let mut tile = request(&tileset, 0, 0, 1);
    assert_eq!(tileset.get_tile(&mut tile).unwrap(), Fetch::Rendered);
    let data = tile.data.clone().unwrap();
    assert!(is_valid_png(&data));
    assert!(tile.mtime.is_some());
    assert_eq!(source.call_count(), 1);

    // Every tile of the 2x2 metatile is on disk
    for (x, y) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
        assert!(cache.exists(&request(&tileset, x, y, 1)), "tile {},{}", x, y);
    }

    let mut again = request(&tileset, 0, 0, 1);
    assert_eq!(tileset.get_tile(&mut again).unwrap(), Fetch::Hit);
    assert_eq!(again.data.unwrap(), data);

    let mut sibling = request(&tileset, 1, 1, 1);
    assert_eq!(tileset.get_tile(&mut sibling).unwrap(), Fetch::Hit);
    assert_eq!(source.call_count(), 1);
}

#[test]
fn test_split_orientation() {
    let cache = Arc::new(MemoryCache::new("mem"));
    let tileset = metatiled_tileset(cache, StubSource::gradient());

    let pixel = |x: i64, y: i64| {
        let mut tile = request(&tileset, x, y, 1);
        tileset.get_tile(&mut tile).unwrap();
        decode(&tile.data.unwrap()).get_pixel(0, 0).0
    };

    // Row 1 is the northern row, drawn at the top of the metatile image
    assert_eq!(pixel(0, 1), [0, 0, 0, 255]);
    assert_eq!(pixel(1, 1), [64, 0, 0, 255]);
    assert_eq!(pixel(0, 0), [0, 64, 0, 255]);
    assert_eq!(pixel(1, 0), [64, 64, 0, 255]);
}

#[test]
fn test_metabuffer_is_cropped() {
    let source = StubSource::gradient();
    let tileset = Tileset::builder("osm")
        .grid(GridLink::new(local_grid()))
        .cache(Arc::new(MemoryCache::new("mem")))
        .source(source.clone())
        .format(Format::png())
        .metatile(2, 2, 16)
        .build()
        .unwrap();

    let mut tile = request(&tileset, 0, 1, 1);
    tileset.get_tile(&mut tile).unwrap();

    let sent = source.last_request().unwrap();
    assert_eq!((sent.width, sent.height), (544, 544));
    assert_eq!(sent.bbox, Extent::new(-16.0, -16.0, 528.0, 528.0));

    let image = decode(&tile.data.unwrap());
    assert_eq!(image.dimensions(), (256, 256));
    assert_eq!(image.get_pixel(0, 0).0, [4, 4, 0, 255]);
}

#[test]
fn test_edge_metatile_is_clamped() {
    let source = StubSource::gradient();
    let tileset = metatiled_tileset(Arc::new(MemoryCache::new("mem")), source.clone());

    let mut tile = request(&tileset, 0, 0, 0);
    tileset.get_tile(&mut tile).unwrap();

    let sent = source.last_request().unwrap();
    assert_eq!((sent.width, sent.height), (256, 256));
    assert_eq!(sent.bbox, Extent::new(0.0, 0.0, 512.0, 512.0));
}

#[test]
fn test_jpeg_tiles() {
    let tileset = Tileset::builder("osm")
        .grid(GridLink::new(local_grid()))
        .cache(Arc::new(MemoryCache::new("mem")))
        .source(StubSource::gradient())
        .format(Format::jpeg(80))
        .metatile(2, 2, 0)
        .build()
        .unwrap();

    let mut tile = request(&tileset, 1, 0, 1);
    assert_eq!(tile.extension(), "jpg");
    tileset.get_tile(&mut tile).unwrap();
    assert!(tile.data.unwrap().starts_with(&[0xFF, 0xD8, 0xFF]));
}

// =============================================================================
// Dimensions
// =============================================================================

#[test]
fn test_dimensions_enter_key_and_request() {
    let source = StubSource::gradient();
    let tileset = Tileset::builder("osm")
        .grid(GridLink::new(local_grid()))
        .cache(Arc::new(MemoryCache::new("mem")))
        .source(source.clone())
        .format(Format::png())
        .dimension(
            Dimension::values(
                "time",
                "2020",
                vec!["2020".to_string(), "2021".to_string()],
                false,
            )
            .unwrap(),
        )
        .build()
        .unwrap();

    let mut default = request(&tileset, 0, 0, 1);
    tileset.get_tile(&mut default).unwrap();
    assert_eq!(
        source.last_request().unwrap().dimensions,
        vec![("time".to_string(), "2020".to_string())]
    );

    let mut other = request(&tileset, 0, 0, 1);
    tileset.set_dimension(&mut other, "time", "2021").unwrap();
    assert_eq!(tileset.get_tile(&mut other).unwrap(), Fetch::Rendered);
    assert_eq!(
        source.last_request().unwrap().dimensions,
        vec![("time".to_string(), "2021".to_string())]
    );
    assert_eq!(source.call_count(), 2);

    let mut repeat = request(&tileset, 0, 0, 1);
    tileset.set_dimension(&mut repeat, "TIME", "2021").unwrap();
    assert_eq!(tileset.get_tile(&mut repeat).unwrap(), Fetch::Hit);
}

// =============================================================================
// Failures and Limits
// =============================================================================

#[test]
fn test_failed_render_leaves_no_lock() {
    let dir = TempDir::new().unwrap();
    let cache = Arc::new(DiskCache::new("disk", dir.path()));
    let tileset = metatiled_tileset(cache.clone(), Arc::new(FailingSource));

    let mut tile = request(&tileset, 1, 1, 1);
    let err = tileset.get_tile(&mut tile).unwrap_err();
    assert!(matches!(err, TileError::Source(_)));
    assert!(!err.is_client_error());

    let anchor = request(&tileset, 0, 0, 1);
    assert!(!cache.lock_path(&anchor).exists());
    assert!(!cache.exists(&tile));
}

#[test]
fn test_missing_tile_without_source() {
    let tileset = Tileset::builder("osm")
        .grid(GridLink::new(local_grid()))
        .cache(Arc::new(MemoryCache::new("mem")))
        .build()
        .unwrap();
    let mut tile = request(&tileset, 0, 0, 0);
    let err = tileset.get_tile(&mut tile).unwrap_err();
    assert!(matches!(err, TileError::NoSource { .. }));
    assert!(err.is_client_error());
}

#[test]
fn test_restricted_link_limits() {
    let link = GridLink::restricted(local_grid(), Extent::new(0.0, 0.0, 250.0, 250.0), 0).unwrap();
    let source = StubSource::gradient();
    let tileset = Tileset::builder("osm")
        .grid(link)
        .cache(Arc::new(MemoryCache::new("mem")))
        .source(source.clone())
        .format(Format::png())
        .build()
        .unwrap();

    let mut inside = request(&tileset, 0, 0, 1);
    tileset.get_tile(&mut inside).unwrap();

    let mut outside = request(&tileset, 1, 1, 1);
    assert!(matches!(
        tileset.get_tile(&mut outside),
        Err(TileError::OutOfLimits { x: 1, y: 1, z: 1 })
    ));
    assert_eq!(source.call_count(), 1);
}

#[test]
fn test_lookup_by_bbox_then_render() {
    let tileset = metatiled_tileset(Arc::new(MemoryCache::new("mem")), StubSource::gradient());
    let mut tile = tileset.tile("local").unwrap();
    tileset
        .tile_lookup_by_bbox(&mut tile, &Extent::new(256.0, 256.0, 512.0, 512.0))
        .unwrap();
    assert_eq!((tile.x, tile.y, tile.z), (1, 1, 1));
    tileset.get_tile(&mut tile).unwrap();
    assert_eq!(decode(&tile.data.unwrap()).get_pixel(0, 0).0, [64, 0, 0, 255]);
}
