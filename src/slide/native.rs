//! Traits for the native slide-reading collaborator.
//!
//! The pipeline never decodes slide formats itself. It talks to a slide
//! library through two traits:
//!
//! - [`SlideLibrary`] opens a file and hands back a native slide
//! - [`NativeSlide`] exposes properties, level geometry and region painting
//!
//! This mirrors the OpenSlide API surface (`open`, `get_property_value`,
//! `get_level_count`, `get_level_dimensions`, `read_region`) so a binding to
//! such a library can be plugged in without touching the pipeline. The
//! bundled [`crate::slide::ImageSlideLibrary`] implements it for ordinary
//! raster files.
//!
//! Dropping a [`NativeSlide`] closes it. The slide cache guarantees that this
//! happens exactly once and only when no render holds a reference.

use std::path::Path;

use crate::error::SlideError;

// =============================================================================
// Property Keys
// =============================================================================

/// Number of pyramid levels.
pub const PROPERTY_LEVEL_COUNT: &str = "openslide.level-count";

/// Background colour as `RRGGBB` hex.
pub const PROPERTY_BACKGROUND_COLOR: &str = "openslide.background-color";

/// Region of interest origin X in level-0 pixels.
pub const PROPERTY_BOUNDS_X: &str = "openslide.bounds-x";

/// Region of interest origin Y in level-0 pixels.
pub const PROPERTY_BOUNDS_Y: &str = "openslide.bounds-y";

/// Region of interest width in level-0 pixels.
pub const PROPERTY_BOUNDS_WIDTH: &str = "openslide.bounds-width";

/// Region of interest height in level-0 pixels.
pub const PROPERTY_BOUNDS_HEIGHT: &str = "openslide.bounds-height";

/// Key for the downsample factor of a level.
pub fn level_downsample_key(level: usize) -> String {
    format!("openslide.level[{}].downsample", level)
}

/// Key for the width of a level.
pub fn level_width_key(level: usize) -> String {
    format!("openslide.level[{}].width", level)
}

/// Key for the height of a level.
pub fn level_height_key(level: usize) -> String {
    format!("openslide.level[{}].height", level)
}

/// Key for the native tile width hint of a level.
pub fn level_tile_width_key(level: usize) -> String {
    format!("openslide.level[{}].tile-width", level)
}

/// Key for the native tile height hint of a level.
pub fn level_tile_height_key(level: usize) -> String {
    format!("openslide.level[{}].tile-height", level)
}

// =============================================================================
// Traits
// =============================================================================

/// An opened slide owned by a native library.
///
/// Implementations must allow concurrent reads from many threads: the cache
/// shares one opened slide between all tile renders of a level.
pub trait NativeSlide: Send + Sync + 'static {
    /// Get a string property by key, or `None` if the slide does not declare it.
    fn property(&self, key: &str) -> Option<String>;

    /// Get the number of pyramid levels.
    ///
    /// Level 0 is always the highest resolution.
    fn level_count(&self) -> usize;

    /// Get `(width, height)` of a level in pixels, or `None` if out of range.
    fn level_dimensions(&self, level: usize) -> Option<(u64, u64)>;

    /// Paint a region into `dest` as premultiplied ARGB.
    ///
    /// `x` and `y` are level-0 coordinates of the top-left corner; `width`
    /// and `height` are in pixels of `level`. Pixels outside the slide are
    /// written as fully transparent (`0`).
    ///
    /// # Errors
    ///
    /// Returns an error if `dest` does not hold exactly `width * height`
    /// pixels, the level is out of range, or the library fails to decode.
    fn paint_region(
        &self,
        dest: &mut [u32],
        x: u64,
        y: u64,
        level: usize,
        width: u32,
        height: u32,
    ) -> Result<(), SlideError>;
}

/// A native slide library that can open slide files.
pub trait SlideLibrary: Send + Sync + 'static {
    /// The type of slide this library opens.
    type Slide: NativeSlide;

    /// Open a slide.
    ///
    /// This is expensive and blocking; callers run it off the async runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is unreadable, unsupported or corrupt.
    fn open(&self, path: &Path) -> Result<Self::Slide, SlideError>;
}
