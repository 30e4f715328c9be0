//! # Slide Tiler
//!
//! Builds tile pyramids for Whole Slide Images (WSI).
//!
//! Slides are uploaded into a watched directory with a pending marker
//! (`3f2a.svs.pending`). The tiler renders every level of each pending slide
//! into fixed-size JPEG tiles, stores each level as a tar archive next to
//! the other levels, and removes the pending marker once every level is
//! sealed. A serving layer then answers tile requests straight from the
//! archives.
//!
//! ## Features
//!
//! - **Shared slide handles**: one native open per slide, reference counted and LRU evicted
//! - **Parallel rendering**: tiles of a level are rendered on a bounded worker pool
//! - **Atomic archives**: each level is published only once completely written
//! - **Failure isolation**: a bad tile, level or slide never stops the pipeline
//! - **Directory watching**: new uploads are picked up as they arrive
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`slide`] - Native slide abstraction, metadata and the slide cache
//! - [`tile`] - Tile rendering, JPEG encoding and the tile naming contract
//! - [`archive`] - Per-level tar archive writer
//! - [`pyramid`] - Grid planning and the pyramid builder
//! - [`ingest`] - Pending slides, event sources, dispatch queue and watcher
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use slide_tiler::{BuilderConfig, ImageSlideLibrary, PendingSlide, PyramidBuilder, SlideCache};
//!
//! #[tokio::main]
//! async fn main() {
//!     let cache = Arc::new(SlideCache::new(ImageSlideLibrary::new()));
//!     let builder = PyramidBuilder::new(cache, BuilderConfig::new("tiles"));
//!
//!     let slide = PendingSlide::for_path("slides/3f2a.pending".as_ref(), ".pending");
//!     let report = builder.build(&slide).await.unwrap();
//!     println!("{} tiles written", report.tiles_written());
//! }
//! ```

pub mod archive;
pub mod config;
pub mod error;
pub mod ingest;
pub mod pyramid;
pub mod slide;
pub mod tile;

// Re-export commonly used types
pub use archive::{archive_file_name, ArchiveWriter, SealedArchive};
pub use config::{Cli, Command, InspectConfig, PipelineArgs, SlideArgs, TileConfig, WatchConfig};
pub use error::{ArchiveError, BuildError, SlideError, TileError, WatchError};
pub use ingest::{
    ChannelEventSource, Dispatcher, IngestEvent, IngestionEventSource, NotifyEventSource,
    PendingSlide, SlideProcessor, WatchSettings, Watcher,
};
pub use pyramid::{
    plan_levels, BuildReport, BuilderConfig, Level, LevelReport, LevelStatus, PyramidBuilder,
    SlideOutcome, TileTask,
};
pub use slide::{
    ImageSlideLibrary, NativeSlide, SlideCache, SlideHandle, SlideLease, SlideLibrary,
    SlideMetadata,
};
pub use tile::{tile_entry_name, Tile, TileRenderer, TileRequest};
