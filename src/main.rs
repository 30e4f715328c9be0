//! Slide Tiler - Builds tile pyramids for Whole Slide Images.
//!
//! This binary wires the slide cache, pyramid builder and ingestion watcher
//! together for each command.

use clap::Parser;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use slide_tiler::{
    config::{Cli, Command, InspectConfig, SlideArgs, TileConfig, WatchConfig},
    ingest::{NotifyEventSource, PendingSlide, Watcher, DEFAULT_PENDING_SUFFIX},
    pyramid::{plan_levels, BuildReport, Level, LevelStatus, PyramidBuilder},
    slide::{ImageSlideLibrary, SlideCache, SlideMetadata},
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Tile(config) => run_tile(config).await,
        Command::Watch(config) => run_watch(config).await,
        Command::Inspect(config) => run_inspect(config).await,
    }
}

fn build_cache(args: &SlideArgs) -> Arc<SlideCache<ImageSlideLibrary>> {
    Arc::new(
        SlideCache::with_capacity(args.library(), args.cache_slides)
            .with_default_tile_size(args.tile_size, args.tile_size),
    )
}

// =============================================================================
// Tile Command
// =============================================================================

async fn run_tile(config: TileConfig) -> ExitCode {
    init_logging(config.pipeline.slides.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let builder_config = config.pipeline.builder_config();
    info!("Output directory: {}", builder_config.output_dir.display());
    info!("Workers: {}", builder_config.workers);

    let builder = PyramidBuilder::new(build_cache(&config.pipeline.slides), builder_config);
    let slide = PendingSlide::for_path(&config.path, DEFAULT_PENDING_SUFFIX);

    match builder.build(&slide).await {
        Ok(report) => {
            print_report(&report);
            if report.is_done() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            error!("Error while generating tiles for {}: {}", config.path.display(), e);
            ExitCode::FAILURE
        }
    }
}

fn print_report(report: &BuildReport) {
    println!("Slide {}: {:?}", report.slide_id, report.outcome);
    for level in &report.levels {
        let status = match &level.status {
            LevelStatus::Sealed { archive, .. } => format!("sealed {}", archive.display()),
            LevelStatus::ArchiveFailed { error } => format!("archive failed: {}", error),
            LevelStatus::TimedOut { outstanding } => {
                format!("timed out, {} tiles outstanding", outstanding)
            }
        };
        println!(
            "  level {:>2}: {:>5}/{:<5} tiles, {} failed, {}",
            level.level,
            level.written,
            level.scheduled,
            level.failures.len(),
            status
        );
    }
}

// =============================================================================
// Watch Command
// =============================================================================

async fn run_watch(config: WatchConfig) -> ExitCode {
    init_logging(config.pipeline.slides.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let builder_config = config.pipeline.builder_config();
    info!("Configuration:");
    info!("  Slides directory: {}", config.slides_dir.display());
    info!("  Output directory: {}", builder_config.output_dir.display());
    info!("  Pending suffix: {}", config.pending_suffix);
    info!("  Workers: {}", builder_config.workers);
    info!("  Level timeout: {}s", builder_config.level_timeout.as_secs());

    let builder = Arc::new(PyramidBuilder::new(
        build_cache(&config.pipeline.slides),
        builder_config,
    ));
    let watcher = Watcher::new(config.watch_settings(), builder);

    let mut source = match NotifyEventSource::subscribe(&config.slides_dir) {
        Ok(source) => source,
        Err(e) => {
            error!("{}. Tiler unavailable.", e);
            return ExitCode::FAILURE;
        }
    };

    let outcome = tokio::select! {
        result = watcher.watch_forever(&mut source) => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };

    match outcome {
        Some(Ok(never)) => match never {},
        // Already logged by the watcher
        Some(Err(_)) => ExitCode::FAILURE,
        None => {
            warn!("Interrupted, finishing queued slides");
            watcher.shutdown().await;
            ExitCode::SUCCESS
        }
    }
}

// =============================================================================
// Inspect Command
// =============================================================================

async fn run_inspect(config: InspectConfig) -> ExitCode {
    if config.slides.verbose {
        init_logging(true);
    }

    if let Err(e) = config.slides.validate() {
        eprintln!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let cache = build_cache(&config.slides);
    let lease = match cache.acquire(&config.path).await {
        Ok(lease) => lease,
        Err(e) => {
            eprintln!("✗ {}", e);
            return ExitCode::FAILURE;
        }
    };

    let metadata = lease.metadata();
    let levels = plan_levels(metadata);

    if config.json {
        let doc = serde_json::json!({
            "path": config.path,
            "metadata": metadata,
            "levels": levels,
        });
        match serde_json::to_string_pretty(&doc) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("✗ {}", e);
                return ExitCode::FAILURE;
            }
        }
        return ExitCode::SUCCESS;
    }

    print_inspection(&config.path, metadata, &levels);
    ExitCode::SUCCESS
}

fn print_inspection(path: &Path, metadata: &SlideMetadata, levels: &[Level]) {
    let (width, height) = metadata.dimensions();
    println!("Slide: {}", path.display());
    println!("  Dimensions: {}x{}", width, height);
    println!("  Tile size: {}x{}", metadata.tile_width, metadata.tile_height);
    match metadata.background {
        Some([r, g, b]) => println!("  Background: #{:02X}{:02X}{:02X}", r, g, b),
        None => println!("  Background: (default)"),
    }
    if let Some(bounds) = metadata.bounds {
        println!(
            "  Bounds: {}x{} at ({}, {})",
            bounds.width, bounds.height, bounds.x, bounds.y
        );
    }
    println!();

    let mut total = 0;
    for level in levels {
        println!(
            "  level {:>2}: {:>7}x{:<7} downsample {:>4}  {:>4}x{:<4} tiles",
            level.index, level.width, level.height, level.downsample, level.cols, level.rows
        );
        total += level.tile_count();
    }
    println!();
    println!("  {} tiles in {} levels", total, levels.len());
}

// =============================================================================
// Helpers
// =============================================================================

fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "slide_tiler=debug"
    } else {
        "slide_tiler=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
