use std::fmt;

/// Default JPEG quality (1-100).
pub const DEFAULT_JPEG_QUALITY: u8 = 85;

/// Minimum allowed JPEG quality.
pub const MIN_JPEG_QUALITY: u8 = 1;

/// Maximum allowed JPEG quality.
pub const MAX_JPEG_QUALITY: u8 = 100;

/// zlib effort for PNG output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PngCompression {
    #[default]
    Default,
    Fast,
    Best,
}

/// Encoding parameters of a format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatKind {
    Png { compression: PngCompression },
    Jpeg { quality: u8 },
}

/// A named output format tiles are encoded to before caching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Format {
    name: String,
    kind: FormatKind,
}

impl Format {
    pub fn new(name: impl Into<String>, kind: FormatKind) -> Self {
        let kind = match kind {
            FormatKind::Jpeg { quality } => FormatKind::Jpeg {
                quality: clamp_quality(quality),
            },
            other => other,
        };
        Self {
            name: name.into(),
            kind,
        }
    }

    /// Default PNG format.
    pub fn png() -> Self {
        Self::new(
            "PNG",
            FormatKind::Png {
                compression: PngCompression::Default,
            },
        )
    }

    /// JPEG at the given quality.
    pub fn jpeg(quality: u8) -> Self {
        Self::new("JPEG", FormatKind::Jpeg { quality })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> FormatKind {
        self.kind
    }

    /// File extension used by disk caches.
    pub fn extension(&self) -> &'static str {
        match self.kind {
            FormatKind::Png { .. } => "png",
            FormatKind::Jpeg { .. } => "jpg",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self.kind {
            FormatKind::Png { .. } => "image/png",
            FormatKind::Jpeg { .. } => "image/jpeg",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Image type guessed from leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatGuess {
    Png,
    Jpeg,
    Unknown,
}

impl FormatGuess {
    /// Guess from magic bytes.
    pub fn sniff(data: &[u8]) -> Self {
        if data.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
            FormatGuess::Png
        } else if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            FormatGuess::Jpeg
        } else {
            FormatGuess::Unknown
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            FormatGuess::Png => "image/png",
            FormatGuess::Jpeg => "image/jpeg",
            FormatGuess::Unknown => "application/octet-stream",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            FormatGuess::Png => "png",
            FormatGuess::Jpeg => "jpg",
            FormatGuess::Unknown => "bin",
        }
    }
}

/// Validate JPEG quality parameter.
///
/// Returns `true` if quality is in the valid range (1-100).
#[inline]
pub fn is_valid_quality(quality: u8) -> bool {
    (MIN_JPEG_QUALITY..=MAX_JPEG_QUALITY).contains(&quality)
}

/// Clamp quality to valid range.
#[inline]
pub fn clamp_quality(quality: u8) -> u8 {
    quality.clamp(MIN_JPEG_QUALITY, MAX_JPEG_QUALITY)
}
