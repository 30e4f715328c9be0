//! Slide library backed by the `image` crate.
//!
//! Opens ordinary raster files (TIFF, PNG, JPEG) and synthesises a pyramid by
//! repeatedly halving the image until the coarsest level fits within
//! `min_level_size` pixels on its longest edge. The format is detected from
//! file content, so pending files keep working despite their marker suffix.
//!
//! The whole image is decoded into memory, which is fine for exported
//! regions and tests but not for multi-gigabyte scanner output; those go
//! through a native [`SlideLibrary`] binding instead.

use std::collections::BTreeMap;
use std::path::Path;

use image::imageops::{self, FilterType};
use image::{ImageError, ImageReader, RgbaImage};

use crate::error::SlideError;

use super::native::{
    level_downsample_key, level_height_key, level_tile_height_key, level_tile_width_key,
    level_width_key, NativeSlide, SlideLibrary, PROPERTY_BACKGROUND_COLOR, PROPERTY_LEVEL_COUNT,
};

/// Default longest edge of the coarsest synthesised level.
pub const DEFAULT_MIN_LEVEL_SIZE: u32 = 512;

/// Upper bound on synthesised levels.
const MAX_LEVELS: usize = 16;

// =============================================================================
// ImageSlideLibrary
// =============================================================================

/// Opens raster images as single-file slides.
#[derive(Debug, Clone)]
pub struct ImageSlideLibrary {
    min_level_size: u32,
    tile_hint: Option<(u32, u32)>,
    background: Option<String>,
}

impl ImageSlideLibrary {
    /// Create a library with default pyramid settings.
    pub fn new() -> Self {
        Self {
            min_level_size: DEFAULT_MIN_LEVEL_SIZE,
            tile_hint: None,
            background: None,
        }
    }

    /// Stop halving once the longest edge is at most `size` pixels.
    pub fn with_min_level_size(mut self, size: u32) -> Self {
        self.min_level_size = size.max(1);
        self
    }

    /// Declare a native tile size on every opened slide.
    pub fn with_tile_hint(mut self, width: u32, height: u32) -> Self {
        self.tile_hint = Some((width, height));
        self
    }

    /// Declare a background colour (`RRGGBB`) on every opened slide.
    pub fn with_background(mut self, color: impl Into<String>) -> Self {
        self.background = Some(color.into());
        self
    }
}

impl Default for ImageSlideLibrary {
    fn default() -> Self {
        Self::new()
    }
}

impl SlideLibrary for ImageSlideLibrary {
    type Slide = ImageSlide;

    fn open(&self, path: &Path) -> Result<ImageSlide, SlideError> {
        let reader = ImageReader::open(path)
            .and_then(|r| r.with_guessed_format())
            .map_err(|e| SlideError::Open {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        if reader.format().is_none() {
            return Err(SlideError::Unsupported {
                path: path.to_path_buf(),
                reason: "unrecognised image format".to_string(),
            });
        }

        let image = reader.decode().map_err(|e| match e {
            ImageError::Unsupported(u) => SlideError::Unsupported {
                path: path.to_path_buf(),
                reason: u.to_string(),
            },
            other => SlideError::Open {
                path: path.to_path_buf(),
                message: other.to_string(),
            },
        })?;

        Ok(ImageSlide::from_rgba(
            image.to_rgba8(),
            self.min_level_size,
            self.tile_hint,
            self.background.clone(),
        ))
    }
}

// =============================================================================
// ImageSlide
// =============================================================================

/// An in-memory raster pyramid.
pub struct ImageSlide {
    levels: Vec<RgbaImage>,
    properties: BTreeMap<String, String>,
}

impl ImageSlide {
    fn from_rgba(
        base: RgbaImage,
        min_level_size: u32,
        tile_hint: Option<(u32, u32)>,
        background: Option<String>,
    ) -> Self {
        let mut levels = vec![base];
        while levels.len() < MAX_LEVELS {
            let last = &levels[levels.len() - 1];
            let (width, height) = last.dimensions();
            if width.max(height) <= min_level_size || width < 2 || height < 2 {
                break;
            }
            let next = imageops::resize(last, width / 2, height / 2, FilterType::Triangle);
            levels.push(next);
        }

        let mut properties = BTreeMap::new();
        properties.insert(PROPERTY_LEVEL_COUNT.to_string(), levels.len().to_string());

        let base_width = levels[0].width() as f64;
        for (index, level) in levels.iter().enumerate() {
            properties.insert(level_width_key(index), level.width().to_string());
            properties.insert(level_height_key(index), level.height().to_string());
            properties.insert(
                level_downsample_key(index),
                (base_width / level.width() as f64).to_string(),
            );
        }

        if let Some((width, height)) = tile_hint {
            properties.insert(level_tile_width_key(0), width.to_string());
            properties.insert(level_tile_height_key(0), height.to_string());
        }
        if let Some(color) = background {
            properties.insert(PROPERTY_BACKGROUND_COLOR.to_string(), color);
        }

        Self { levels, properties }
    }

    /// All declared properties.
    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    fn downsample(&self, level: usize) -> f64 {
        self.levels[0].width() as f64 / self.levels[level].width().max(1) as f64
    }
}

impl NativeSlide for ImageSlide {
    fn property(&self, key: &str) -> Option<String> {
        self.properties.get(key).cloned()
    }

    fn level_count(&self) -> usize {
        self.levels.len()
    }

    fn level_dimensions(&self, level: usize) -> Option<(u64, u64)> {
        self.levels
            .get(level)
            .map(|img| (img.width() as u64, img.height() as u64))
    }

    fn paint_region(
        &self,
        dest: &mut [u32],
        x: u64,
        y: u64,
        level: usize,
        width: u32,
        height: u32,
    ) -> Result<(), SlideError> {
        let image = self.levels.get(level).ok_or(SlideError::LevelOutOfRange {
            level,
            count: self.levels.len(),
        })?;

        let expected = width as usize * height as usize;
        if dest.len() != expected {
            return Err(SlideError::Region {
                message: format!(
                    "destination holds {} pixels, region needs {}",
                    dest.len(),
                    expected
                ),
            });
        }

        let downsample = self.downsample(level);
        let start_x = (x as f64 / downsample) as u64;
        let start_y = (y as f64 / downsample) as u64;
        let (level_width, level_height) = (image.width() as u64, image.height() as u64);

        for row in 0..height as u64 {
            let sy = start_y + row;
            let line = &mut dest[(row * width as u64) as usize..][..width as usize];
            for (col, out) in line.iter_mut().enumerate() {
                let sx = start_x + col as u64;
                *out = if sx < level_width && sy < level_height {
                    premultiplied_argb(image.get_pixel(sx as u32, sy as u32).0)
                } else {
                    0
                };
            }
        }

        Ok(())
    }
}

fn premultiplied_argb([r, g, b, a]: [u8; 4]) -> u32 {
    let scale = |c: u8| (c as u32 * a as u32 + 127) / 255;
    (a as u32) << 24 | scale(r) << 16 | scale(g) << 8 | scale(b)
}

// =============================================================================
// Tests
// =============================================================================
