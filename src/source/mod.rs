//! Upstream renderers.
//!
//! A [`Source`] turns a [`MapRequest`] (bbox, pixel size, SRS, dimension
//! values) into encoded image bytes. The tileset calls it once per metatile
//! while holding the metatile lock, so implementations block the calling
//! thread until the image is available.

mod wms;

use bytes::Bytes;

use crate::error::SourceError;
use crate::grid::Extent;

pub use wms::{WmsSource, DEFAULT_WMS_TIMEOUT_SECS};

/// One map image to render.
#[derive(Debug, Clone, PartialEq)]
pub struct MapRequest {
    pub bbox: Extent,
    pub width: u32,
    pub height: u32,
    pub srs: String,

    /// Dimension name/value pairs in configuration order
    pub dimensions: Vec<(String, String)>,
}

/// Produces raw metatile images.
pub trait Source: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Render `request` and return encoded image bytes.
    fn render_metatile(&self, request: &MapRequest) -> Result<Bytes, SourceError>;
}
