//! Pyramid building.
//!
//! - [`plan_levels`]: tile grid of every level, coarsest first
//! - [`PyramidBuilder`]: renders and archives every level of a slide
//! - [`BuildReport`]: per-level outcome, also written as the build manifest

mod builder;
mod geometry;
mod report;

pub use builder::{
    default_workers, BuilderConfig, PyramidBuilder, DEFAULT_LEVEL_TIMEOUT, MANIFEST_SUFFIX,
};
pub use geometry::{grid_dimension, plan_levels, Level, TileTask};
pub use report::{BuildReport, LevelReport, LevelStatus, SlideOutcome, TileFailure};
