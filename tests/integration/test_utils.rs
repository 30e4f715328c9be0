//! Test utilities for integration tests.
//!
//! This module provides a fault-injecting slide library and helpers for
//! writing raster slides and reading level archives back.

use image::{Rgba, RgbaImage};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use slide_tiler::error::SlideError;
use slide_tiler::pyramid::{BuilderConfig, PyramidBuilder};
use slide_tiler::slide::{ImageSlide, ImageSlideLibrary, NativeSlide, SlideCache, SlideLibrary};

// =============================================================================
// Fault-injecting Slide Library
// =============================================================================

/// Wraps [`ImageSlideLibrary`] and injects failures or delays.
///
/// Opens are counted so tests can verify cache behaviour.
#[derive(Clone)]
pub struct FaultyLibrary {
    inner: ImageSlideLibrary,
    fail_at: Option<(usize, u64, u64)>,
    paint_delay: Option<Duration>,
    opens: Arc<AtomicUsize>,
    paints: Arc<AtomicUsize>,
}

impl FaultyLibrary {
    pub fn new(inner: ImageSlideLibrary) -> Self {
        Self {
            inner,
            fail_at: None,
            paint_delay: None,
            opens: Arc::new(AtomicUsize::new(0)),
            paints: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fail the tile painted at `(level, x, y)` (level-0 coordinates).
    pub fn failing_at(mut self, level: usize, x: u64, y: u64) -> Self {
        self.fail_at = Some((level, x, y));
        self
    }

    /// Sleep this long in every paint.
    pub fn with_paint_delay(mut self, delay: Duration) -> Self {
        self.paint_delay = Some(delay);
        self
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn paint_count(&self) -> usize {
        self.paints.load(Ordering::SeqCst)
    }
}

pub struct FaultySlide {
    inner: ImageSlide,
    fail_at: Option<(usize, u64, u64)>,
    paint_delay: Option<Duration>,
    paints: Arc<AtomicUsize>,
}

impl SlideLibrary for FaultyLibrary {
    type Slide = FaultySlide;

    fn open(&self, path: &Path) -> Result<FaultySlide, SlideError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(FaultySlide {
            inner: self.inner.open(path)?,
            fail_at: self.fail_at,
            paint_delay: self.paint_delay,
            paints: self.paints.clone(),
        })
    }
}

impl NativeSlide for FaultySlide {
    fn property(&self, key: &str) -> Option<String> {
        self.inner.property(key)
    }

    fn level_count(&self) -> usize {
        self.inner.level_count()
    }

    fn level_dimensions(&self, level: usize) -> Option<(u64, u64)> {
        self.inner.level_dimensions(level)
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
        self.paints.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.paint_delay {
            std::thread::sleep(delay);
        }
        if self.fail_at == Some((level, x, y)) {
            return Err(SlideError::Region {
                message: "injected read failure".to_string(),
            });
        }
        self.inner.paint_region(dest, x, y, level, width, height)
    }
}

// =============================================================================
// Workspace
// =============================================================================

/// Temporary slides and output directories.
pub struct Workspace {
    _root: tempfile::TempDir,
    pub slides: PathBuf,
    pub output: PathBuf,
}

impl Workspace {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let slides = root.path().join("slides");
        let output = root.path().join("tiles");
        std::fs::create_dir_all(&slides).unwrap();
        std::fs::create_dir_all(&output).unwrap();
        Self {
            _root: root,
            slides,
            output,
        }
    }

    /// Write an opaque PNG slide filled with `color`.
    pub fn write_slide(&self, name: &str, width: u32, height: u32, color: [u8; 3]) -> PathBuf {
        let [r, g, b] = color;
        let img = RgbaImage::from_pixel(width, height, Rgba([r, g, b, 255]));
        self.save(name, &img)
    }

    /// Write a PNG slide whose right half is fully transparent.
    pub fn write_half_transparent_slide(&self, name: &str, width: u32, height: u32) -> PathBuf {
        let img = RgbaImage::from_fn(width, height, |x, _| {
            if x < width / 2 {
                Rgba([200, 30, 30, 255])
            } else {
                Rgba([0, 0, 0, 0])
            }
        });
        self.save(name, &img)
    }

    /// Write a file that is not an image.
    pub fn write_garbage(&self, name: &str) -> PathBuf {
        let path = self.slides.join(name);
        std::fs::write(&path, b"definitely not a slide").unwrap();
        path
    }

    pub fn archive(&self, slide_id: &str, level: usize) -> PathBuf {
        self.output
            .join(format!("{}-level-{}-tiles.tar", slide_id, level))
    }

    fn save(&self, name: &str, img: &RgbaImage) -> PathBuf {
        let path = self.slides.join(name);
        img.save_with_format(&path, image::ImageFormat::Png).unwrap();
        path
    }
}

/// Build a pyramid builder over `library` writing into `output`.
pub fn builder<L: SlideLibrary>(
    library: L,
    output: &Path,
    configure: impl FnOnce(BuilderConfig) -> BuilderConfig,
) -> PyramidBuilder<L> {
    let cache = Arc::new(SlideCache::new(library));
    PyramidBuilder::new(cache, configure(BuilderConfig::new(output).with_workers(4)))
}

/// Raster library with a coarsest level of at most 512 pixels.
pub fn raster_library() -> ImageSlideLibrary {
    ImageSlideLibrary::new().with_min_level_size(512)
}

// =============================================================================
// Archive Helpers
// =============================================================================

/// Read every entry of a tar archive, keyed by name.
pub fn read_archive(path: &Path) -> BTreeMap<String, Vec<u8>> {
    let file = std::fs::File::open(path).unwrap();
    let mut archive = tar::Archive::new(file);
    let mut entries = BTreeMap::new();
    for entry in archive.entries().unwrap() {
        let mut entry = entry.unwrap();
        let name = entry.path().unwrap().to_string_lossy().into_owned();
        let mut data = Vec::new();
        entry.read_to_end(&mut data).unwrap();
        assert!(entries.insert(name.clone(), data).is_none(), "duplicate entry {}", name);
    }
    entries
}

/// Decode a JPEG tile.
pub fn decode_tile(data: &[u8]) -> image::RgbImage {
    image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)
        .unwrap()
        .to_rgb8()
}

/// Assert a pixel is within `tolerance` of `expected` on every channel.
pub fn assert_color_near(actual: [u8; 3], expected: [u8; 3], tolerance: u8) {
    for (a, e) in actual.iter().zip(expected.iter()) {
        assert!(
            a.abs_diff(*e) <= tolerance,
            "pixel {:?} not within {} of {:?}",
            actual,
            tolerance,
            expected
        );
    }
}

/// Poll `condition` until it holds or `timeout` expires.
pub async fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
