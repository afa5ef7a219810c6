//! Loading configuration files and serving from the loaded objects.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;

use tilecache::codec::Format;
use tilecache::error::{ConfigError, TileError};
use tilecache::grid::GridLink;
use tilecache::registry::Registry;
use tilecache::seed::SeedSession;
use tilecache::tileset::{Fetch, Tileset};

use super::test_utils::StubSource;

const CONFIG: &str = r#"{
    "grids": [{ "name": "local", "srs": "EPSG:3857",
                "extent": [0, 0, 512, 512], "resolutions": [2, 1] }],
    "formats": [{ "name": "PNG", "type": "png", "compression": "fast" }],
    "caches": [
        { "name": "disk", "type": "disk", "base": "tiles" },
        { "name": "mem", "type": "memory" }
    ],
    "sources": [{ "name": "wms", "type": "wms", "url": "http://127.0.0.1:9/wms",
                  "params": { "LAYERS": "base" }, "timeout_secs": 1 }],
    "tilesets": [
        { "name": "osm", "grids": ["local", "WGS84"], "cache": "mem",
          "source": "wms", "format": "PNG", "metatile": [2, 2] },
        { "name": "archive", "grids": ["local"], "cache": "disk" }
    ]
}"#;

fn write_config(dir: &Path, text: &str) -> std::path::PathBuf {
    let path = dir.join("tilecache.json");
    fs::write(&path, text).unwrap();
    path
}

#[test]
fn test_load_config_file() {
    let dir = TempDir::new().unwrap();
    let registry = Registry::load(&write_config(dir.path(), CONFIG)).unwrap();

    assert_eq!(
        registry.tileset_names().collect::<Vec<_>>(),
        vec!["archive", "osm"]
    );
    let osm = registry.tileset("osm").unwrap();
    assert_eq!(osm.grid_links().len(), 2);
    assert!(osm.source().is_some());
    assert_eq!(osm.format().map(Format::mime_type), Some("image/png"));

    let archive = registry.tileset("archive").unwrap();
    let mut tile = archive.tile("local").unwrap();
    assert!(matches!(
        archive.get_tile(&mut tile),
        Err(TileError::NoSource { .. })
    ));
}

#[test]
fn test_relative_paths_follow_config_file() {
    let dir = TempDir::new().unwrap();
    let mut registry = Registry::load(&write_config(dir.path(), CONFIG)).unwrap();

    // Serve the configured disk cache through a locally rendering tileset
    let tileset = Tileset::builder("local")
        .grid(GridLink::new(Arc::clone(registry.grid("local").unwrap())))
        .cache(Arc::clone(registry.cache("disk").unwrap()))
        .source(StubSource::gradient())
        .format(Format::png())
        .build()
        .unwrap();
    let tileset = registry.add_tileset(tileset);

    let mut tile = tileset.tile("local").unwrap();
    assert_eq!(tileset.get_tile(&mut tile).unwrap(), Fetch::Rendered);
    assert!(dir
        .path()
        .join("tiles/local/00/000/000/000/000/000/000.png")
        .is_file());
}

#[test]
fn test_seed_configured_tileset() {
    let dir = TempDir::new().unwrap();
    let mut registry = Registry::load(&write_config(dir.path(), CONFIG)).unwrap();
    let source = StubSource::gradient();
    let tileset = Tileset::builder("seeded")
        .grid(GridLink::new(Arc::clone(registry.grid("local").unwrap())))
        .cache(Arc::clone(registry.cache("mem").unwrap()))
        .source(source.clone())
        .format(Format::png())
        .metatile(2, 2, 0)
        .build()
        .unwrap();
    let tileset = registry.add_tileset(tileset);

    let report = SeedSession::new(tileset, "local").unwrap().threads(2).run();
    assert_eq!(report.rendered, 2);
    assert_eq!(report.failed, 0);
    assert_eq!(source.call_count(), 2);
}

#[test]
fn test_missing_config_file() {
    let dir = TempDir::new().unwrap();
    let err = Registry::load(&dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
}

#[test]
fn test_malformed_config_file() {
    let dir = TempDir::new().unwrap();
    let path = write_config(dir.path(), r#"{ "tilesets": [ }"#);
    assert!(Registry::load(&path).is_err());
}

#[test]
fn test_unknown_grid_reference() {
    let dir = TempDir::new().unwrap();
    let config = CONFIG.replace(r#"["local", "WGS84"]"#, r#"["local", "nowhere"]"#);
    let err = Registry::load(&write_config(dir.path(), &config)).unwrap_err();
    assert!(matches!(
        err,
        ConfigError::UnknownReference { kind: "grid", .. }
    ));
}
