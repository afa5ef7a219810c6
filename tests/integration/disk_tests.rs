//! Disk cache tests through a tileset: layout, blank tile links, grid
//! namespaces.

use std::fs;
use std::sync::Arc;

use tempfile::TempDir;

use tilecache::cache::{CacheBackend, DiskCache};
use tilecache::codec::Format;
use tilecache::grid::{Extent, Grid, GridLink};
use tilecache::tileset::{Fetch, Tileset};

use super::test_utils::{local_grid, metatiled_tileset, request, StubSource};

#[test]
fn test_rendered_tiles_follow_layout() {
    let dir = TempDir::new().unwrap();
    let cache = Arc::new(DiskCache::new("disk", dir.path()));
    let tileset = metatiled_tileset(cache, StubSource::gradient());

    let mut tile = request(&tileset, 1, 0, 1);
    tileset.get_tile(&mut tile).unwrap();

    for (x, y) in [("000/000/000", "000/000/000"), ("000/000/001", "000/000/001")] {
        let path = dir.path().join(format!("osm/01/{}/{}.png", x, y));
        assert!(path.is_file(), "missing {}", path.display());
    }
    // No lock file survives the render
    let leftovers: Vec<_> = walk(dir.path())
        .into_iter()
        .filter(|p| p.extension().is_some_and(|e| e == "lck"))
        .collect();
    assert!(leftovers.is_empty(), "{:?}", leftovers);
}

#[test]
fn test_blank_tiles_are_hard_links() {
    let dir = TempDir::new().unwrap();
    let cache = Arc::new(DiskCache::new("disk", dir.path()).with_symlink_blank(true));
    let tileset = metatiled_tileset(cache.clone(), StubSource::flat([255, 255, 255, 0]));

    let mut tile = request(&tileset, 0, 0, 1);
    assert_eq!(tileset.get_tile(&mut tile).unwrap(), Fetch::Rendered);

    let blanks = dir.path().join("osm/blanks");
    let entries: Vec<_> = fs::read_dir(&blanks).unwrap().collect();
    assert_eq!(entries.len(), 1);

    let blank = cache.blank_path(&tile, [255, 255, 255, 0]);
    assert!(blank.is_file());
    assert_eq!(fs::read(&blank).unwrap(), tile.data.clone().unwrap().as_ref());

    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        // The blank itself plus the four tiles of the metatile
        assert_eq!(fs::metadata(&blank).unwrap().nlink(), 5);
        let path = cache.tile_path(&request(&tileset, 1, 1, 1));
        assert_eq!(
            fs::metadata(&path).unwrap().ino(),
            fs::metadata(&blank).unwrap().ino()
        );
    }

    // Links read back as ordinary tiles
    let mut again = request(&tileset, 1, 1, 1);
    assert_eq!(tileset.get_tile(&mut again).unwrap(), Fetch::Hit);
    assert_eq!(again.data, tile.data);
}

#[test]
fn test_varied_tiles_are_not_linked() {
    let dir = TempDir::new().unwrap();
    let cache = Arc::new(DiskCache::new("disk", dir.path()).with_symlink_blank(true));
    let tileset = metatiled_tileset(cache, StubSource::gradient());

    let mut tile = request(&tileset, 0, 0, 1);
    tileset.get_tile(&mut tile).unwrap();
    assert!(!dir.path().join("osm/blanks").exists());
}

fn other_grid() -> Arc<Grid> {
    Arc::new(
        Grid::new(
            "other",
            "EPSG:4326",
            Extent::new(0.0, 0.0, 512.0, 512.0),
            &[2.0, 1.0],
            256,
            256,
            Default::default(),
        )
        .unwrap(),
    )
}

#[test]
fn test_grid_namespace_separates_grids() {
    let dir = TempDir::new().unwrap();
    let source = StubSource::gradient();
    let tileset = Tileset::builder("osm")
        .grid(GridLink::new(local_grid()))
        .grid(GridLink::new(other_grid()))
        .cache(Arc::new(
            DiskCache::new("disk", dir.path()).with_grid_namespace(true),
        ))
        .source(source.clone())
        .format(Format::png())
        .build()
        .unwrap();

    for grid in ["local", "other"] {
        let mut tile = tileset.tile(grid).unwrap();
        tileset.get_tile(&mut tile).unwrap();
    }
    assert_eq!(source.call_count(), 2);
    assert!(dir.path().join("osm/local/00").is_dir());
    assert!(dir.path().join("osm/other/00").is_dir());
    assert_eq!(source.last_request().unwrap().srs, "EPSG:4326");
}

#[test]
fn test_two_grids_need_a_namespacing_cache() {
    let dir = TempDir::new().unwrap();
    let result = Tileset::builder("osm")
        .grid(GridLink::new(local_grid()))
        .grid(GridLink::new(other_grid()))
        .cache(Arc::new(DiskCache::new("disk", dir.path())))
        .build();
    assert!(result.is_err());
}

#[test]
fn test_delete_whole_metatile() {
    let dir = TempDir::new().unwrap();
    let cache = Arc::new(DiskCache::new("disk", dir.path()));
    let tileset = metatiled_tileset(cache.clone(), StubSource::gradient());

    let mut tile = request(&tileset, 1, 1, 1);
    tileset.get_tile(&mut tile).unwrap();
    tileset.delete_tile(&tile, true).unwrap();
    for (x, y) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
        assert!(!cache.exists(&request(&tileset, x, y, 1)));
    }
}

fn walk(dir: &std::path::Path) -> Vec<std::path::PathBuf> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            out.extend(walk(&path));
        } else {
            out.push(path);
        }
    }
    out
}
