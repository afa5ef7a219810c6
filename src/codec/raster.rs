//! Raster codec backed by the `image` crate.
//!
//! Decodes PNG and JPEG into RGBA buffers and encodes tiles back into the
//! tileset's cache format. JPEG has no alpha channel, so RGBA is flattened to
//! RGB before encoding.

use std::io::Cursor;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{DynamicImage, ExtendedColorType, ImageEncoder, ImageReader, RgbaImage};

use super::format::{Format, FormatGuess, FormatKind, PngCompression};
use super::ImageCodec;
use crate::error::CodecError;

/// PNG/JPEG codec.
#[derive(Debug, Clone, Default)]
pub struct RasterCodec {}

impl RasterCodec {
    pub fn new() -> Self {
        Self {}
    }
}

impl ImageCodec for RasterCodec {
    fn decode(&self, data: &[u8]) -> Result<RgbaImage, CodecError> {
        let format = match FormatGuess::sniff(data) {
            FormatGuess::Png => image::ImageFormat::Png,
            FormatGuess::Jpeg => image::ImageFormat::Jpeg,
            FormatGuess::Unknown => {
                return Err(CodecError::Decode {
                    message: "unrecognized image data".to_string(),
                })
            }
        };
        let img = ImageReader::with_format(Cursor::new(data), format)
            .decode()
            .map_err(|e| CodecError::Decode {
                message: e.to_string(),
            })?;
        Ok(img.into_rgba8())
    }

    fn encode(&self, image: &RgbaImage, format: &Format) -> Result<Bytes, CodecError> {
        let mut output = Vec::new();
        let encode_err = |e: image::ImageError| CodecError::Encode {
            message: e.to_string(),
        };

        match format.kind() {
            FormatKind::Png { compression } => {
                let compression = match compression {
                    PngCompression::Default => CompressionType::Default,
                    PngCompression::Fast => CompressionType::Fast,
                    PngCompression::Best => CompressionType::Best,
                };
                PngEncoder::new_with_quality(&mut output, compression, FilterType::Adaptive)
                    .write_image(
                        image.as_raw(),
                        image.width(),
                        image.height(),
                        ExtendedColorType::Rgba8,
                    )
                    .map_err(encode_err)?;
            }
            FormatKind::Jpeg { quality } => {
                let rgb = DynamicImage::ImageRgba8(image.clone()).into_rgb8();
                JpegEncoder::new_with_quality(&mut output, quality)
                    .encode_image(&rgb)
                    .map_err(encode_err)?;
            }
        }

        Ok(Bytes::from(output))
    }

    fn sniff_format(&self, data: &[u8]) -> FormatGuess {
        FormatGuess::sniff(data)
    }
}

// =============================================================================
// Tests
// =============================================================================
