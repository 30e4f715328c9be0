//! Single-tile rendering.
//!
//! A render paints one region of an opened slide, flattens it over the
//! slide's background colour and encodes it as JPEG. It never touches an
//! archive; the pyramid builder decides where the tile goes.

use std::sync::Arc;

use bytes::Bytes;
use tracing::trace;

use crate::error::TileError;
use crate::slide::{NativeSlide, SlideHandle, DEFAULT_BACKGROUND};

use super::encoder::{clamp_quality, JpegTileEncoder, DEFAULT_JPEG_QUALITY};
use super::naming::tile_entry_name;

/// One tile to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileRequest {
    /// Slide identifier used in the entry name
    pub slide_id: Arc<str>,

    /// Pyramid level to read from
    pub level: usize,

    /// Level-0 x coordinate of the top-left corner
    pub x: u64,

    /// Level-0 y coordinate of the top-left corner
    pub y: u64,

    /// Tile width in pixels
    pub width: u32,

    /// Tile height in pixels
    pub height: u32,
}

impl TileRequest {
    /// Canonical archive entry name of this tile.
    pub fn entry_name(&self) -> String {
        tile_entry_name(
            &self.slide_id,
            self.x,
            self.y,
            self.level,
            self.width,
            self.height,
        )
    }
}

/// An encoded tile.
#[derive(Debug, Clone)]
pub struct Tile {
    /// Archive entry name
    pub name: String,

    /// JPEG bytes
    pub data: Bytes,
}

/// Renders tiles from slide handles.
#[derive(Debug, Clone)]
pub struct TileRenderer {
    encoder: JpegTileEncoder,
    quality: u8,
}

impl TileRenderer {
    /// Create a renderer encoding at `quality` (clamped to 1-100).
    pub fn new(quality: u8) -> Self {
        Self {
            encoder: JpegTileEncoder::new(),
            quality: clamp_quality(quality),
        }
    }

    /// JPEG quality used for every tile.
    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Render one tile.
    ///
    /// Blocks on the native library; call it from a blocking context.
    ///
    /// # Errors
    ///
    /// Returns [`TileError::Render`] if the region cannot be painted and
    /// [`TileError::EncodeError`] if JPEG encoding fails.
    pub fn render<S: NativeSlide>(
        &self,
        handle: &SlideHandle<S>,
        request: &TileRequest,
    ) -> Result<Tile, TileError> {
        let mut pixels = vec![0u32; request.width as usize * request.height as usize];

        handle
            .native()
            .paint_region(
                &mut pixels,
                request.x,
                request.y,
                request.level,
                request.width,
                request.height,
            )
            .map_err(|source| TileError::Render {
                level: request.level,
                x: request.x,
                y: request.y,
                source,
            })?;

        let background = handle.metadata().background.unwrap_or(DEFAULT_BACKGROUND);
        let data = self.encoder.encode_argb(
            &pixels,
            request.width,
            request.height,
            background,
            self.quality,
        )?;

        trace!(
            level = request.level,
            x = request.x,
            y = request.y,
            bytes = data.len(),
            "Rendered tile"
        );

        Ok(Tile {
            name: request.entry_name(),
            data,
        })
    }
}

impl Default for TileRenderer {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}
