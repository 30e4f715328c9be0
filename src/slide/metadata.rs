//! Slide metadata derived once when a slide is opened.
//!
//! Optional properties resolve to documented defaults instead of failing:
//!
//! - tile size: [`DEFAULT_TILE_SIZE`] when the slide declares no tile hint,
//!   or one larger than [`MAX_TILE_SIZE`]
//! - background: none, the renderer then fills with [`DEFAULT_BACKGROUND`]
//! - bounds: none, the bounds scale multiplier is 1.0
//! - downsample: the ratio of level-0 width to level width when not declared

use std::str::FromStr;

use serde::Serialize;
use tracing::debug;

use crate::error::SlideError;

use super::native::{
    level_downsample_key, level_tile_height_key, level_tile_width_key, level_width_key,
    NativeSlide, PROPERTY_BACKGROUND_COLOR, PROPERTY_BOUNDS_HEIGHT, PROPERTY_BOUNDS_WIDTH,
    PROPERTY_BOUNDS_X, PROPERTY_BOUNDS_Y, PROPERTY_LEVEL_COUNT,
};

/// Tile edge length used when the slide declares no tile size.
pub const DEFAULT_TILE_SIZE: u32 = 256;

/// Largest tile edge accepted from a slide's tile hint.
pub const MAX_TILE_SIZE: u32 = 8192;

/// Fill colour for areas outside the slide when it declares no background.
pub const DEFAULT_BACKGROUND: [u8; 3] = [0xFF, 0xFF, 0xFF];

/// Raw geometry of one pyramid level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LevelDimensions {
    /// Width in pixels
    pub width: u64,

    /// Height in pixels
    pub height: u64,

    /// Downsample factor relative to level 0
    pub downsample: f64,
}

/// Region of interest declared by the slide, in level-0 pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Bounds {
    pub x: u64,
    pub y: u64,
    pub width: u64,
    pub height: u64,
}

/// Metadata the pyramid builder needs from an opened slide.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlideMetadata {
    /// Levels ordered from full resolution (index 0) to coarsest
    pub levels: Vec<LevelDimensions>,

    /// Tile width used for the output grid
    pub tile_width: u32,

    /// Tile height used for the output grid
    pub tile_height: u32,

    /// Background colour declared by the slide
    pub background: Option<[u8; 3]>,

    /// Region of interest, if the slide declares one
    pub bounds: Option<Bounds>,
}

impl SlideMetadata {
    /// Read metadata from an opened slide.
    ///
    /// `default_tile` is used when the slide has no (or an unusable) tile hint.
    ///
    /// # Errors
    ///
    /// Fails if the slide has no levels, a level has no dimensions, or a
    /// declared downsample is not a number.
    pub fn read<S: NativeSlide + ?Sized>(
        slide: &S,
        default_tile: (u32, u32),
    ) -> Result<Self, SlideError> {
        let count = slide.level_count();
        if count == 0 {
            return Err(SlideError::MissingProperty(PROPERTY_LEVEL_COUNT.to_string()));
        }

        let (base_width, base_height) = slide
            .level_dimensions(0)
            .ok_or(SlideError::LevelOutOfRange { level: 0, count })?;
        if base_width == 0 || base_height == 0 {
            return Err(SlideError::InvalidProperty {
                key: level_width_key(0),
                value: format!("{}x{}", base_width, base_height),
            });
        }

        let mut levels = Vec::with_capacity(count);
        for level in 0..count {
            let (width, height) = slide
                .level_dimensions(level)
                .ok_or(SlideError::LevelOutOfRange { level, count })?;

            let key = level_downsample_key(level);
            let downsample = match parse_property::<f64, _>(slide, &key)? {
                Some(value) if value.is_finite() && value > 0.0 => value,
                Some(value) => {
                    return Err(SlideError::InvalidProperty {
                        key,
                        value: value.to_string(),
                    })
                }
                None => {
                    debug!("{} not declared, deriving from dimensions", key);
                    base_width as f64 / width.max(1) as f64
                }
            };

            levels.push(LevelDimensions {
                width,
                height,
                downsample,
            });
        }

        let tile_width = tile_hint(slide, &level_tile_width_key(0)).unwrap_or(default_tile.0);
        let tile_height = tile_hint(slide, &level_tile_height_key(0)).unwrap_or(default_tile.1);

        let background = slide
            .property(PROPERTY_BACKGROUND_COLOR)
            .and_then(|value| match parse_hex_color(&value) {
                Some(color) => Some(color),
                None => {
                    debug!("Unable to parse background color {:?}", value);
                    None
                }
            });

        let bounds = read_bounds(slide, base_width, base_height);

        Ok(Self {
            levels,
            tile_width,
            tile_height,
            background,
            bounds,
        })
    }

    /// Number of pyramid levels.
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Dimensions of the full-resolution level.
    pub fn dimensions(&self) -> (u64, u64) {
        self.levels
            .first()
            .map(|l| (l.width, l.height))
            .unwrap_or((0, 0))
    }

    /// Multipliers applied to every level's dimensions.
    ///
    /// `(1.0, 1.0)` unless the slide declares a region of interest that
    /// differs from its full extent.
    pub fn bounds_scale(&self) -> (f64, f64) {
        let (width, height) = self.dimensions();
        match self.bounds {
            Some(b) if (b.width, b.height) != (width, height) && width > 0 && height > 0 => (
                b.width as f64 / width as f64,
                b.height as f64 / height as f64,
            ),
            _ => (1.0, 1.0),
        }
    }

    /// Level-0 origin of the region to tile.
    pub fn origin(&self) -> (u64, u64) {
        self.bounds.map(|b| (b.x, b.y)).unwrap_or((0, 0))
    }
}

/// Parse an `RRGGBB` colour, with or without a leading `#`.
pub fn parse_hex_color(value: &str) -> Option<[u8; 3]> {
    let hex = value.trim().trim_start_matches('#');
    if hex.len() != 6 {
        return None;
    }
    let rgb = u32::from_str_radix(hex, 16).ok()?;
    Some([(rgb >> 16) as u8, (rgb >> 8) as u8, rgb as u8])
}

fn parse_property<T, S>(slide: &S, key: &str) -> Result<Option<T>, SlideError>
where
    T: FromStr,
    S: NativeSlide + ?Sized,
{
    match slide.property(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| SlideError::InvalidProperty {
                key: key.to_string(),
                value: raw,
            }),
    }
}

/// Tile hints fall back to the default on any parse problem.
fn tile_hint<S: NativeSlide + ?Sized>(slide: &S, key: &str) -> Option<u32> {
    match parse_property::<u32, _>(slide, key) {
        Ok(Some(size)) if (1..=MAX_TILE_SIZE).contains(&size) => Some(size),
        Ok(Some(size)) => {
            debug!("Ignoring tile hint {} = {}", key, size);
            None
        }
        Ok(None) => None,
        Err(e) => {
            debug!("Ignoring tile hint: {}", e);
            None
        }
    }
}

fn read_bounds<S: NativeSlide + ?Sized>(
    slide: &S,
    base_width: u64,
    base_height: u64,
) -> Option<Bounds> {
    let read = |key: &str| parse_property::<u64, _>(slide, key).ok().flatten();

    let width = read(PROPERTY_BOUNDS_WIDTH);
    let height = read(PROPERTY_BOUNDS_HEIGHT);
    if width.is_none() && height.is_none() {
        return None;
    }

    Some(Bounds {
        x: read(PROPERTY_BOUNDS_X).unwrap_or(0),
        y: read(PROPERTY_BOUNDS_Y).unwrap_or(0),
        width: width.filter(|w| *w > 0).unwrap_or(base_width),
        height: height.filter(|h| *h > 0).unwrap_or(base_height),
    })
}

// =============================================================================
// Tests
// =============================================================================
