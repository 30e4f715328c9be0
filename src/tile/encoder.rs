//! JPEG tile encoder.
//!
//! Turns the premultiplied ARGB raster painted by a native slide into a JPEG.
//!
//! # Design Decisions
//!
//! - **Flatten before encoding**: JPEG has no alpha channel, so every pixel is
//!   composited over the slide's background colour first. Areas outside the
//!   slide (alpha 0) come out as pure background.
//!
//! - **No resizing**: tiles are encoded at the size they were painted.
//!
//! - **Quality control**: JPEG quality is configurable, clamped to 1-100.

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};

use crate::error::TileError;

/// Default JPEG quality (1-100).
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Minimum allowed JPEG quality.
pub const MIN_JPEG_QUALITY: u8 = 1;

/// Maximum allowed JPEG quality.
pub const MAX_JPEG_QUALITY: u8 = 100;

// =============================================================================
// JPEG Encoder
// =============================================================================

/// JPEG tile encoder for painted rasters.
///
/// # Example
///
/// ```
/// use slide_tiler::tile::JpegTileEncoder;
///
/// let encoder = JpegTileEncoder::new();
///
/// // A 2x2 raster: opaque red pixels and one transparent pixel
/// let pixels = [0xFFFF0000, 0xFFFF0000, 0xFFFF0000, 0x00000000];
/// let jpeg = encoder.encode_argb(&pixels, 2, 2, [255, 255, 255], 85).unwrap();
/// assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct JpegTileEncoder {}

impl JpegTileEncoder {
    /// Create a new JPEG tile encoder.
    pub fn new() -> Self {
        Self {}
    }

    /// Composite a premultiplied ARGB raster over `background` and encode it.
    ///
    /// # Arguments
    ///
    /// * `pixels` - `width * height` premultiplied ARGB pixels, row-major
    /// * `background` - RGB fill for transparent areas
    /// * `quality` - Output JPEG quality (1-100)
    ///
    /// # Errors
    ///
    /// Returns an error if the raster has the wrong size or encoding fails.
    pub fn encode_argb(
        &self,
        pixels: &[u32],
        width: u32,
        height: u32,
        background: [u8; 3],
        quality: u8,
    ) -> Result<Bytes, TileError> {
        let quality = clamp_quality(quality);

        if pixels.len() != width as usize * height as usize {
            return Err(TileError::EncodeError {
                message: format!(
                    "raster holds {} pixels, expected {}x{}",
                    pixels.len(),
                    width,
                    height
                ),
            });
        }

        let img = RgbImage::from_fn(width, height, |x, y| {
            let argb = pixels[(y as usize) * (width as usize) + x as usize];
            Rgb(composite_over(argb, background))
        });

        let mut output = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut output, quality);

        encoder
            .encode_image(&img)
            .map_err(|e| TileError::EncodeError {
                message: e.to_string(),
            })?;

        Ok(Bytes::from(output))
    }
}

// =============================================================================
// Utility Functions
// =============================================================================

/// Composite one premultiplied ARGB pixel over an opaque background.
#[inline]
pub fn composite_over(argb: u32, background: [u8; 3]) -> [u8; 3] {
    let alpha = argb >> 24;
    let inverse = 255 - alpha;
    let channel = |shift: u32, bg: u8| {
        let src = (argb >> shift) & 0xFF;
        (src + (bg as u32 * inverse + 127) / 255).min(255) as u8
    };
    [
        channel(16, background[0]),
        channel(8, background[1]),
        channel(0, background[2]),
    ]
}

/// Validate JPEG quality parameter.
///
/// Returns `true` if quality is in the valid range (1-100).
#[inline]
pub fn is_valid_quality(quality: u8) -> bool {
    (MIN_JPEG_QUALITY..=MAX_JPEG_QUALITY).contains(&quality)
}

/// Clamp quality to valid range.
///
/// Values below 1 become 1, values above 100 become 100.
#[inline]
pub fn clamp_quality(quality: u8) -> u8 {
    quality.clamp(MIN_JPEG_QUALITY, MAX_JPEG_QUALITY)
}

// =============================================================================
// Tests
// =============================================================================
