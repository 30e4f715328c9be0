//! Build outcomes.
//!
//! A [`BuildReport`] is what a slide build produces: one [`LevelReport`] per
//! attempted level plus the overall outcome. It is also serialised as the
//! slide's build manifest.

use std::path::PathBuf;

use serde::Serialize;

use super::geometry::{Level, TileTask};

/// A tile that could not be rendered or stored.
#[derive(Debug, Clone, Serialize)]
pub struct TileFailure {
    #[serde(flatten)]
    pub task: TileTask,
    pub error: String,
}

/// How a level ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LevelStatus {
    /// The archive was sealed and published
    Sealed { archive: PathBuf, sha256: String },

    /// The archive could not be created or sealed
    ArchiveFailed { error: String },

    /// Tiles were still outstanding when the level timeout expired
    TimedOut { outstanding: usize },
}

/// Result of building one level.
#[derive(Debug, Clone, Serialize)]
pub struct LevelReport {
    pub level: usize,
    pub width: u64,
    pub height: u64,
    pub downsample: u64,
    pub cols: u64,
    pub rows: u64,

    /// Tasks handed to the worker pool
    pub scheduled: u64,

    /// Tiles written to the archive
    pub written: u64,

    /// Tiles that failed, in completion order
    pub failures: Vec<TileFailure>,

    #[serde(flatten)]
    pub status: LevelStatus,
}

impl LevelReport {
    pub(crate) fn new(level: &Level, status: LevelStatus) -> Self {
        Self {
            level: level.index,
            width: level.width,
            height: level.height,
            downsample: level.downsample,
            cols: level.cols,
            rows: level.rows,
            scheduled: 0,
            written: 0,
            failures: Vec::new(),
            status,
        }
    }

    /// Whether the level archive was published.
    pub fn is_sealed(&self) -> bool {
        matches!(self.status, LevelStatus::Sealed { .. })
    }
}

/// Overall outcome of a slide build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlideOutcome {
    /// Every level was sealed and the slide left the pending set
    Done,

    /// At least one level failed; the slide stays pending
    Failed,
}

/// Report of one slide build.
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub slide_id: String,

    /// Pending file the build started from
    pub source: PathBuf,

    /// Attempted levels, coarsest first
    pub levels: Vec<LevelReport>,

    pub outcome: SlideOutcome,
}

impl BuildReport {
    pub fn is_done(&self) -> bool {
        self.outcome == SlideOutcome::Done
    }

    /// Total tiles written across all levels.
    pub fn tiles_written(&self) -> u64 {
        self.levels.iter().map(|l| l.written).sum()
    }

    /// Total tile failures across all levels.
    pub fn tile_failures(&self) -> usize {
        self.levels.iter().map(|l| l.failures.len()).sum()
    }
}
