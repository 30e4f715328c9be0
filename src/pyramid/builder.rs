//! Slide pyramid builder.
//!
//! Builds every level of one slide into its own tar archive:
//!
//! ```text
//! Opening ──▶ ┌─ Scheduling ──▶ Rendering ──▶ Sealing ─┐ ──▶ Done
//!    │        └──────────────── next level ◀───────────┘      │
//!    │                    │ timeout                           │
//!    └────────────────────┴─────────────────────────────────▶ Failed
//! ```
//!
//! Levels are built coarsest first. The tiles of a level are rendered on the
//! blocking pool, at most `workers` at a time, and the builder waits for all
//! of them with a per-level timeout.
//!
//! Failure scopes:
//!
//! - a tile that fails to render or store is recorded and skipped
//! - a level whose archive cannot be created or sealed fails; the next level
//!   is still built
//! - a level that times out fails and the remaining levels are skipped
//! - a slide that cannot be opened fails before anything is written
//!
//! Only a slide with every level sealed leaves the pending set.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::archive::ArchiveWriter;
use crate::error::{ArchiveError, BuildError, TileError};
use crate::ingest::PendingSlide;
use crate::slide::{SlideCache, SlideLease, SlideLibrary};
use crate::tile::{TileRenderer, DEFAULT_JPEG_QUALITY};

use super::geometry::{plan_levels, Level, TileTask};
use super::report::{BuildReport, LevelReport, LevelStatus, SlideOutcome, TileFailure};

/// Default time allowed for all tiles of one level.
pub const DEFAULT_LEVEL_TIMEOUT: Duration = Duration::from_secs(300);

/// Suffix of the per-slide build manifest.
pub const MANIFEST_SUFFIX: &str = ".manifest.json";

/// Number of render workers used when none is configured.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

// =============================================================================
// Configuration
// =============================================================================

/// Settings for [`PyramidBuilder`].
#[derive(Debug, Clone)]
pub struct BuilderConfig {
    /// Directory receiving the level archives
    pub output_dir: PathBuf,

    /// JPEG quality of the tiles
    pub jpeg_quality: u8,

    /// Maximum number of tiles rendered at once
    pub workers: usize,

    /// Time allowed for all tiles of one level
    pub level_timeout: Duration,

    /// Whether to write `{slide_id}.manifest.json` after each build
    pub write_manifest: bool,
}

impl BuilderConfig {
    /// Defaults for everything but the output directory.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            workers: default_workers(),
            level_timeout: DEFAULT_LEVEL_TIMEOUT,
            write_manifest: true,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_level_timeout(mut self, timeout: Duration) -> Self {
        self.level_timeout = timeout;
        self
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality;
        self
    }

    pub fn with_manifest(mut self, enabled: bool) -> Self {
        self.write_manifest = enabled;
        self
    }
}

// =============================================================================
// PyramidBuilder
// =============================================================================

/// Builds tile archives for slides, one slide at a time.
pub struct PyramidBuilder<L: SlideLibrary> {
    cache: Arc<SlideCache<L>>,
    renderer: Arc<TileRenderer>,
    config: BuilderConfig,
    pool: Arc<Semaphore>,
}

impl<L: SlideLibrary> PyramidBuilder<L> {
    /// Create a builder reading slides through `cache`.
    pub fn new(cache: Arc<SlideCache<L>>, config: BuilderConfig) -> Self {
        let workers = config.workers.max(1);
        Self {
            cache,
            renderer: Arc::new(TileRenderer::new(config.jpeg_quality)),
            pool: Arc::new(Semaphore::new(workers)),
            config,
        }
    }

    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<SlideCache<L>> {
        &self.cache
    }

    /// Build every level of a slide.
    ///
    /// Returns a report for any slide that could be opened, whether or not
    /// all its levels succeeded.
    ///
    /// # Errors
    ///
    /// [`BuildError::NativeDecode`] if the slide cannot be opened (nothing
    /// is written and the pending file is untouched) and
    /// [`BuildError::Pending`] if a fully built slide cannot be renamed out
    /// of the pending set.
    pub async fn build(&self, slide: &PendingSlide) -> Result<BuildReport, BuildError> {
        let started = Instant::now();
        let slide_id = slide.slide_id().clone();
        info!("Tiling slide {} ({})", slide_id, slide.path().display());

        let lease = self.cache.acquire(slide.path()).await?;
        let levels = plan_levels(lease.metadata());
        debug!(
            slide_id = %slide_id,
            "Planned {} levels, tile size {}x{}",
            levels.len(),
            lease.metadata().tile_width,
            lease.metadata().tile_height
        );

        let mut reports = Vec::with_capacity(levels.len());
        for level in &levels {
            let report = self.build_level(&lease, &slide_id, level).await;
            let timed_out = matches!(report.status, LevelStatus::TimedOut { .. });
            reports.push(report);
            if timed_out {
                warn!(
                    slide_id = %slide_id,
                    "Skipping {} remaining levels after timeout",
                    levels.len() - reports.len()
                );
                break;
            }
        }
        drop(lease);

        let all_sealed = reports.len() == levels.len() && reports.iter().all(|r| r.is_sealed());
        let mut report = BuildReport {
            slide_id: slide_id.to_string(),
            source: slide.path().to_path_buf(),
            levels: reports,
            outcome: if all_sealed {
                SlideOutcome::Done
            } else {
                SlideOutcome::Failed
            },
        };

        let completed = if all_sealed {
            match slide.complete().await {
                Ok(path) => {
                    if path != slide.path() {
                        self.cache.invalidate(slide.path()).await;
                        debug!("Slide {} moved to {}", slide_id, path.display());
                    }
                    Ok(())
                }
                Err(e) => {
                    report.outcome = SlideOutcome::Failed;
                    Err(e)
                }
            }
        } else {
            Ok(())
        };

        if self.config.write_manifest {
            self.write_manifest(&report).await;
        }

        completed?;

        match report.outcome {
            SlideOutcome::Done => info!(
                "Finished slide {}: {} tiles in {} levels, {} failed tiles ({:.1}s)",
                slide_id,
                report.tiles_written(),
                report.levels.len(),
                report.tile_failures(),
                started.elapsed().as_secs_f64()
            ),
            SlideOutcome::Failed => error!(
                slide_id = %slide_id,
                "Slide {} failed, leaving it pending ({:.1}s)",
                slide.path().display(),
                started.elapsed().as_secs_f64()
            ),
        }

        Ok(report)
    }

    /// Build one level. Never fails; the outcome is in the report.
    async fn build_level(
        &self,
        lease: &SlideLease<L::Slide>,
        slide_id: &Arc<str>,
        level: &Level,
    ) -> LevelReport {
        info!(
            "Slide {} level {}: {}x{} px, {}x{} tiles, downsample {}",
            slide_id, level.index, level.width, level.height, level.cols, level.rows, level.downsample
        );

        // Scheduling
        let writer = match ArchiveWriter::create(&self.config.output_dir, slide_id, level.index) {
            Ok(writer) => Arc::new(writer),
            Err(e) => {
                error!(slide_id = %slide_id, level = level.index, "Archive error: {}", e);
                return LevelReport::new(
                    level,
                    LevelStatus::ArchiveFailed {
                        error: e.to_string(),
                    },
                );
            }
        };

        let outstanding: Arc<Mutex<HashSet<TileTask>>> =
            Arc::new(Mutex::new(level.tasks().collect()));
        let mut tasks = JoinSet::new();
        let mut scheduled = 0u64;

        for task in level.tasks() {
            let request = level.request(&task, slide_id);
            let pool = self.pool.clone();
            let renderer = self.renderer.clone();
            let writer = writer.clone();
            let lease = lease.clone();
            let outstanding = outstanding.clone();

            tasks.spawn(async move {
                let result = match pool.acquire_owned().await {
                    Ok(permit) => tokio::task::spawn_blocking(move || {
                        let _permit = permit;
                        let tile = renderer.render(&lease, &request)?;
                        writer.append(&tile.name, &tile.data)?;
                        Ok(())
                    })
                    .await
                    .unwrap_or_else(|e| {
                        Err(TileError::Aborted {
                            message: e.to_string(),
                        })
                    }),
                    Err(e) => Err(TileError::Aborted {
                        message: e.to_string(),
                    }),
                };
                lock(&outstanding).remove(&task);
                (task, result)
            });
            scheduled += 1;
        }

        // Rendering
        let mut written = 0u64;
        let mut failures = Vec::new();
        let barrier = tokio::time::timeout(self.config.level_timeout, async {
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((_, Ok(()))) => written += 1,
                    Ok((task, Err(e))) => {
                        warn!(
                            slide_id = %slide_id,
                            level = task.level,
                            row = task.row,
                            col = task.col,
                            "Tile failed: {}",
                            e
                        );
                        failures.push(TileFailure {
                            task,
                            error: e.to_string(),
                        });
                    }
                    Err(e) => {
                        error!(slide_id = %slide_id, level = level.index, "Tile task died: {}", e);
                    }
                }
            }
        })
        .await;

        if barrier.is_err() {
            writer.abandon();
            tasks.abort_all();

            let mut remaining: Vec<TileTask> = lock(&outstanding).iter().copied().collect();
            remaining.sort();
            error!(
                slide_id = %slide_id,
                level = level.index,
                "Level timed out after {:?} with {} of {} tiles outstanding",
                self.config.level_timeout,
                remaining.len(),
                scheduled
            );
            for task in &remaining {
                warn!(
                    slide_id = %slide_id,
                    level = task.level,
                    row = task.row,
                    col = task.col,
                    "Tile still outstanding at timeout"
                );
            }

            let mut report = LevelReport::new(
                level,
                LevelStatus::TimedOut {
                    outstanding: remaining.len(),
                },
            );
            report.scheduled = scheduled;
            report.written = written;
            report.failures = failures;
            return report;
        }

        // A task that died without reporting still owes an outcome
        let mut lost: Vec<TileTask> = lock(&outstanding).drain().collect();
        lost.sort();
        failures.extend(lost.into_iter().map(|task| TileFailure {
            task,
            error: "render task aborted".to_string(),
        }));

        // Sealing
        let sealer = writer.clone();
        let sealed = tokio::task::spawn_blocking(move || sealer.seal())
            .await
            .unwrap_or_else(|e| {
                Err(ArchiveError::Seal {
                    path: writer.path().to_path_buf(),
                    message: e.to_string(),
                })
            });

        let status = match sealed {
            Ok(archive) => {
                debug!(
                    "Sealed {} ({} tiles, sha256 {})",
                    archive.path.display(),
                    archive.entries,
                    archive.sha256
                );
                LevelStatus::Sealed {
                    archive: archive.path,
                    sha256: archive.sha256,
                }
            }
            Err(e) => {
                error!(slide_id = %slide_id, level = level.index, "Archive error: {}", e);
                LevelStatus::ArchiveFailed {
                    error: e.to_string(),
                }
            }
        };

        let mut report = LevelReport::new(level, status);
        report.scheduled = scheduled;
        report.written = written;
        report.failures = failures;
        report
    }

    async fn write_manifest(&self, report: &BuildReport) {
        let path = self
            .config
            .output_dir
            .join(format!("{}{}", report.slide_id, MANIFEST_SUFFIX));

        let json = match serde_json::to_vec_pretty(report) {
            Ok(json) => json,
            Err(e) => {
                warn!(slide_id = %report.slide_id, "Failed to serialize manifest: {}", e);
                return;
            }
        };

        if let Err(e) = tokio::fs::write(&path, json).await {
            warn!(
                slide_id = %report.slide_id,
                "Failed to write manifest {}: {}",
                path.display(),
                e
            );
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// =============================================================================
// Tests
// =============================================================================
