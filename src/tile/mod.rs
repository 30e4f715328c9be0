//! Tile rendering layer.
//!
//! Turns a region of an opened slide into a named JPEG tile:
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            Pyramid Builder              │
//! └────────────────────┬────────────────────┘
//!                      │ TileRequest
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │             TileRenderer                │
//! │  ┌──────────────┐  ┌─────────────────┐  │
//! │  │ paint_region │  │  JPEG Encoder   │  │
//! │  │ (premult.    │  │  (flatten over  │  │
//! │  │  ARGB)       │  │   background)   │  │
//! │  └──────────────┘  └─────────────────┘  │
//! └────────────────────┬────────────────────┘
//!                      │ Tile { name, data }
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │            ArchiveWriter                │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`TileRenderer`]: Paints, flattens and encodes one tile
//! - [`JpegTileEncoder`]: Composites premultiplied ARGB over a background and encodes JPEG
//! - [`tile_entry_name`]: The naming contract shared with the serving layer

mod encoder;
mod naming;
mod renderer;

pub use encoder::{
    clamp_quality, composite_over, is_valid_quality, JpegTileEncoder, DEFAULT_JPEG_QUALITY,
    MAX_JPEG_QUALITY, MIN_JPEG_QUALITY,
};
pub use naming::{tile_entry_name, TILE_EXTENSION};
pub use renderer::{Tile, TileRenderer, TileRequest};
