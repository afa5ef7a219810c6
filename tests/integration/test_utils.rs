//! Test utilities for integration tests.
//!
//! Stub sources that render images locally, and helpers to build grids and
//! tilesets over them.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use image::{Rgba, RgbaImage};
use parking_lot::Mutex;

use tilecache::cache::CacheBackend;
use tilecache::codec::{Format, ImageCodec, RasterCodec};
use tilecache::error::SourceError;
use tilecache::grid::{Extent, Grid, GridLink};
use tilecache::source::{MapRequest, Source};
use tilecache::tile::Tile;
use tilecache::tileset::Tileset;

// =============================================================================
// Stub Sources
// =============================================================================

/// What a [`StubSource`] paints.
#[derive(Debug, Clone, Copy)]
pub enum Paint {
    /// Every pixel the same color
    Flat([u8; 4]),
    /// Pixel `(x, y)` is `(x / 4, y / 4, 0, 255)`, so no two tiles match
    Gradient,
}

/// A source that renders PNG images locally and records its calls.
pub struct StubSource {
    paint: Paint,
    delay: Duration,
    calls: AtomicUsize,
    requests: Mutex<Vec<MapRequest>>,
}

impl StubSource {
    pub fn new(paint: Paint) -> Self {
        Self {
            paint,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn flat(color: [u8; 4]) -> Arc<Self> {
        Arc::new(Self::new(Paint::Flat(color)))
    }

    pub fn gradient() -> Arc<Self> {
        Arc::new(Self::new(Paint::Gradient))
    }

    /// Sleep this long in every render, to widen race windows.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<MapRequest> {
        self.requests.lock().last().cloned()
    }
}

impl Source for StubSource {
    fn name(&self) -> &str {
        "stub"
    }

    fn render_metatile(&self, request: &MapRequest) -> Result<Bytes, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());
        std::thread::sleep(self.delay);

        let image = match self.paint {
            Paint::Flat(color) => RgbaImage::from_pixel(request.width, request.height, Rgba(color)),
            Paint::Gradient => RgbaImage::from_fn(request.width, request.height, |x, y| {
                Rgba([(x / 4) as u8, (y / 4) as u8, 0, 255])
            }),
        };
        RasterCodec::new()
            .encode(&image, &Format::png())
            .map_err(|e| SourceError::Request {
                message: e.to_string(),
            })
    }
}

/// A source that always fails.
pub struct FailingSource;

impl Source for FailingSource {
    fn name(&self) -> &str {
        "failing"
    }

    fn render_metatile(&self, _request: &MapRequest) -> Result<Bytes, SourceError> {
        Err(SourceError::Status {
            status: 503,
            url: "http://upstream.invalid/wms".to_string(),
        })
    }
}

// =============================================================================
// Grids and Tilesets
// =============================================================================

/// Two levels over `[0, 0, 512, 512]`: one tile at level 0, 2x2 at level 1.
pub fn local_grid() -> Arc<Grid> {
    Arc::new(
        Grid::new(
            "local",
            "EPSG:3857",
            Extent::new(0.0, 0.0, 512.0, 512.0),
            &[2.0, 1.0],
            256,
            256,
            Default::default(),
        )
        .unwrap(),
    )
}

/// PNG tileset on [`local_grid`] with 2x2 metatiles.
pub fn metatiled_tileset(cache: Arc<dyn CacheBackend>, source: Arc<dyn Source>) -> Tileset {
    Tileset::builder("osm")
        .grid(GridLink::new(local_grid()))
        .cache(cache)
        .source(source)
        .format(Format::png())
        .metatile(2, 2, 0)
        .build()
        .unwrap()
}

/// A request for `(x, y, z)` on the `local` grid.
pub fn request(tileset: &Tileset, x: i64, y: i64, z: usize) -> Tile {
    let mut tile = tileset.tile("local").unwrap();
    tile.x = x;
    tile.y = y;
    tile.z = z;
    tile
}

// =============================================================================
// Image Checks
// =============================================================================

pub fn is_valid_png(data: &[u8]) -> bool {
    data.starts_with(&[0x89, b'P', b'N', b'G'])
}

pub fn decode(data: &[u8]) -> RgbaImage {
    RasterCodec::new().decode(data).unwrap()
}
