//! Configuration management for Slide Tiler.
//!
//! This module provides the command-line interface:
//! - Command-line arguments via clap
//! - Environment variables with `TILER_` prefix
//! - Sensible defaults for all optional settings
//!
//! # Commands
//!
//! - `slide-tiler tile <path>` - Build the pyramid of one slide and exit
//! - `slide-tiler watch` - Build every pending slide that appears in a directory
//! - `slide-tiler inspect <path>` - Print a slide's metadata and tile grid
//!
//! # Environment Variables
//!
//! - `TILER_OUTPUT_DIR` - Directory for level archives (default: tiles)
//! - `TILER_JPEG_QUALITY` - JPEG quality of tiles (default: 80)
//! - `TILER_WORKERS` - Concurrent tile renders (default: CPU count)
//! - `TILER_LEVEL_TIMEOUT` - Seconds allowed per level (default: 300)
//! - `TILER_CACHE_SLIDES` - Open slides kept in cache (default: 8)
//! - `TILER_TILE_SIZE` - Tile size when a slide declares none (default: 256)
//! - `TILER_MIN_LEVEL_SIZE` - Smallest synthesised level edge (default: 512)
//! - `TILER_SLIDES_DIR` - Watched directory (default: slides)
//! - `TILER_PENDING_SUFFIX` - Pending marker suffix (default: .pending)
//! - `TILER_STALE_AFTER_DAYS` - Warn about slides pending longer (default: 14, 0 disables)

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::ingest::{WatchSettings, DEFAULT_PENDING_SUFFIX};
use crate::pyramid::{default_workers, BuilderConfig};
use crate::slide::{
    ImageSlideLibrary, DEFAULT_MIN_LEVEL_SIZE, DEFAULT_SLIDE_CACHE_CAPACITY, DEFAULT_TILE_SIZE,
    MAX_TILE_SIZE,
};
use crate::tile::{is_valid_quality, DEFAULT_JPEG_QUALITY};

// =============================================================================
// Default Values
// =============================================================================

/// Default output directory for level archives.
pub const DEFAULT_OUTPUT_DIR: &str = "tiles";

/// Default watched directory.
pub const DEFAULT_SLIDES_DIR: &str = "slides";

/// Default time allowed per level, in seconds.
pub const DEFAULT_LEVEL_TIMEOUT_SECS: u64 = 300;

/// Default age in days after which pending slides are reported.
pub const DEFAULT_STALE_AFTER_DAYS: u64 = 14;

// =============================================================================
// CLI Arguments
// =============================================================================

/// Slide Tiler - Builds tile pyramids for Whole Slide Images.
///
/// Renders every level of a slide into JPEG tiles and stores each level as a
/// tar archive ready to be served.
#[derive(Parser, Debug, Clone)]
#[command(name = "slide-tiler")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Build the tile pyramid of one slide and exit.
    Tile(TileConfig),

    /// Watch a directory and build every pending slide.
    Watch(WatchConfig),

    /// Print a slide's metadata and planned tile grid.
    Inspect(InspectConfig),
}

/// Settings shared by every command that builds pyramids.
#[derive(Args, Debug, Clone)]
pub struct PipelineArgs {
    // =========================================================================
    // Output Configuration
    // =========================================================================
    /// Directory receiving the level archives.
    #[arg(short, long, default_value = DEFAULT_OUTPUT_DIR, env = "TILER_OUTPUT_DIR")]
    pub output_dir: PathBuf,

    /// JPEG quality for tile encoding (1-100).
    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY, env = "TILER_JPEG_QUALITY")]
    pub jpeg_quality: u8,

    /// Skip writing the per-slide build manifest.
    #[arg(long, default_value_t = false)]
    pub no_manifest: bool,

    // =========================================================================
    // Worker Configuration
    // =========================================================================
    /// Maximum number of tiles rendered concurrently.
    ///
    /// Defaults to the number of available CPUs.
    #[arg(long, env = "TILER_WORKERS")]
    pub workers: Option<usize>,

    /// Seconds allowed for all tiles of one level.
    #[arg(long, default_value_t = DEFAULT_LEVEL_TIMEOUT_SECS, env = "TILER_LEVEL_TIMEOUT")]
    pub level_timeout: u64,

    // =========================================================================
    // Slide Configuration
    // =========================================================================
    #[command(flatten)]
    pub slides: SlideArgs,
}

/// How slides are opened.
#[derive(Args, Debug, Clone)]
pub struct SlideArgs {
    /// Maximum number of idle slides kept open.
    #[arg(long, default_value_t = DEFAULT_SLIDE_CACHE_CAPACITY, env = "TILER_CACHE_SLIDES")]
    pub cache_slides: usize,

    /// Tile size used when a slide declares none.
    #[arg(long, default_value_t = DEFAULT_TILE_SIZE, env = "TILER_TILE_SIZE")]
    pub tile_size: u32,

    /// Stop adding pyramid levels to raster slides below this edge length.
    #[arg(long, default_value_t = DEFAULT_MIN_LEVEL_SIZE, env = "TILER_MIN_LEVEL_SIZE")]
    pub min_level_size: u32,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl SlideArgs {
    pub fn validate(&self) -> Result<(), String> {
        if self.cache_slides == 0 {
            return Err("cache_slides must be greater than 0".to_string());
        }
        if self.tile_size == 0 || self.tile_size > MAX_TILE_SIZE {
            return Err(format!("tile_size must be between 1 and {}", MAX_TILE_SIZE));
        }
        if self.min_level_size == 0 {
            return Err("min_level_size must be greater than 0".to_string());
        }
        Ok(())
    }

    /// The raster slide library configured by these arguments.
    pub fn library(&self) -> ImageSlideLibrary {
        ImageSlideLibrary::new().with_min_level_size(self.min_level_size)
    }
}

impl PipelineArgs {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if !is_valid_quality(self.jpeg_quality) {
            return Err("jpeg_quality must be between 1 and 100".to_string());
        }
        if self.workers == Some(0) {
            return Err("workers must be greater than 0".to_string());
        }
        if self.level_timeout == 0 {
            return Err("level_timeout must be greater than 0".to_string());
        }
        self.slides.validate()
    }

    /// Builder settings for these arguments.
    pub fn builder_config(&self) -> BuilderConfig {
        BuilderConfig::new(&self.output_dir)
            .with_jpeg_quality(self.jpeg_quality)
            .with_workers(self.workers.unwrap_or_else(default_workers))
            .with_level_timeout(Duration::from_secs(self.level_timeout))
            .with_manifest(!self.no_manifest)
    }
}

/// Arguments of `slide-tiler tile`.
#[derive(Args, Debug, Clone)]
pub struct TileConfig {
    /// Slide file to tile. A pending suffix is removed on success.
    pub path: PathBuf,

    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

impl TileConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !self.path.is_file() {
            return Err(format!("{} is not a file", self.path.display()));
        }
        self.pipeline.validate()
    }
}

/// Arguments of `slide-tiler watch`.
#[derive(Args, Debug, Clone)]
pub struct WatchConfig {
    /// Directory where slides are uploaded.
    #[arg(long, default_value = DEFAULT_SLIDES_DIR, env = "TILER_SLIDES_DIR")]
    pub slides_dir: PathBuf,

    /// File name suffix marking a slide as pending.
    #[arg(long, default_value = DEFAULT_PENDING_SUFFIX, env = "TILER_PENDING_SUFFIX")]
    pub pending_suffix: String,

    /// Warn about slides pending for more than this many days (0 disables).
    #[arg(long, default_value_t = DEFAULT_STALE_AFTER_DAYS, env = "TILER_STALE_AFTER_DAYS")]
    pub stale_after_days: u64,

    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

impl WatchConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.pending_suffix.is_empty() {
            return Err("pending_suffix must not be empty".to_string());
        }
        if !self.slides_dir.is_dir() {
            return Err(format!(
                "{} is not a directory. Set --slides-dir or TILER_SLIDES_DIR",
                self.slides_dir.display()
            ));
        }
        self.pipeline.validate()
    }

    /// Watcher settings for these arguments.
    pub fn watch_settings(&self) -> WatchSettings {
        let stale_after = (self.stale_after_days > 0)
            .then(|| Duration::from_secs(self.stale_after_days * 24 * 60 * 60));
        WatchSettings::new(&self.slides_dir)
            .with_pending_suffix(&self.pending_suffix)
            .with_stale_after(stale_after)
    }
}

/// Arguments of `slide-tiler inspect`.
#[derive(Args, Debug, Clone)]
pub struct InspectConfig {
    /// Slide file to inspect.
    pub path: PathBuf,

    /// Print JSON instead of a table.
    #[arg(long, default_value_t = false)]
    pub json: bool,

    #[command(flatten)]
    pub slides: SlideArgs,
}

// =============================================================================
// Tests
// =============================================================================
