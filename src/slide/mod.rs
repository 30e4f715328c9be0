//! Slide access layer.
//!
//! Everything that reads pixels or metadata from a slide goes through this
//! module:
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │    Pyramid Builder / Tile Renderer      │
//! └────────────────────┬────────────────────┘
//!                      │ acquire / lease
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │              SlideCache                 │
//! │  (singleflight opens, ref-counted LRU)  │
//! └────────────────────┬────────────────────┘
//!                      │ open
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │       SlideLibrary / NativeSlide        │
//! │  (native reader, e.g. ImageSlideLibrary)│
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use slide_tiler::slide::{ImageSlideLibrary, SlideCache};
//!
//! let cache = SlideCache::new(ImageSlideLibrary::new());
//!
//! // Opens on first use, shared afterwards
//! let lease = cache.acquire(Path::new("slides/sample.tif")).await?;
//! println!("{} levels", lease.metadata().level_count());
//!
//! // Dropping the lease releases it
//! drop(lease);
//! ```

mod cache;
mod metadata;
pub mod native;
mod raster;

pub use cache::{SlideCache, SlideHandle, SlideLease, DEFAULT_SLIDE_CACHE_CAPACITY};
pub use metadata::{
    parse_hex_color, Bounds, LevelDimensions, SlideMetadata, DEFAULT_BACKGROUND,
    DEFAULT_TILE_SIZE, MAX_TILE_SIZE,
};
pub use native::{NativeSlide, SlideLibrary};
pub use raster::{ImageSlide, ImageSlideLibrary, DEFAULT_MIN_LEVEL_SIZE};
