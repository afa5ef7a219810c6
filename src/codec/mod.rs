//! Image encoding and decoding.
//!
//! The tileset decodes each rendered metatile once and encodes every
//! constituent tile in the tileset's cache [`Format`]. The [`ImageCodec`]
//! trait keeps that boundary swappable; [`RasterCodec`] is the PNG/JPEG
//! implementation.

mod format;
mod raster;

use bytes::Bytes;
use image::RgbaImage;

use crate::error::CodecError;

pub use format::{
    clamp_quality, is_valid_quality, Format, FormatGuess, FormatKind, PngCompression,
    DEFAULT_JPEG_QUALITY, MAX_JPEG_QUALITY, MIN_JPEG_QUALITY,
};
pub use raster::RasterCodec;

/// Raster buffer conversions used by the render path.
pub trait ImageCodec: Send + Sync {
    /// Decode encoded bytes into an RGBA buffer.
    fn decode(&self, data: &[u8]) -> Result<RgbaImage, CodecError>;

    /// Encode an RGBA buffer in `format`.
    fn encode(&self, image: &RgbaImage, format: &Format) -> Result<Bytes, CodecError>;

    /// Guess the format of encoded bytes.
    fn sniff_format(&self, data: &[u8]) -> FormatGuess;
}

/// The color of `image` if every pixel has it.
pub fn uniform_color(image: &RgbaImage) -> Option<[u8; 4]> {
    let mut pixels = image.pixels();
    let first = pixels.next()?.0;
    pixels.all(|p| p.0 == first).then_some(first)
}
