//! Tile grid planning.
//!
//! Turns slide metadata into the list of levels to build and the tiles of
//! each level. Pure arithmetic, no I/O.

use std::sync::Arc;

use serde::Serialize;

use crate::slide::SlideMetadata;
use crate::tile::TileRequest;

/// One pyramid level as the builder sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Level {
    /// Level index, 0 is full resolution
    pub index: usize,

    /// Width to tile, after the bounds scale
    pub width: u64,

    /// Height to tile, after the bounds scale
    pub height: u64,

    /// Integer downsample relative to level 0
    pub downsample: u64,

    pub tile_width: u32,
    pub tile_height: u32,

    /// Number of tile columns
    pub cols: u64,

    /// Number of tile rows
    pub rows: u64,

    /// Level-0 x of the region's top-left corner
    pub origin_x: u64,

    /// Level-0 y of the region's top-left corner
    pub origin_y: u64,
}

/// One cell of a level's tile grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TileTask {
    pub level: usize,
    pub row: u64,
    pub col: u64,
}

/// Number of tiles needed to cover `extent` pixels.
///
/// Ceiling division: a partial tile at the edge counts, nothing more.
#[inline]
pub fn grid_dimension(extent: u64, tile: u32) -> u64 {
    if tile == 0 {
        return 0;
    }
    extent.div_ceil(tile as u64)
}

/// Plan every level of a slide, coarsest first.
pub fn plan_levels(metadata: &SlideMetadata) -> Vec<Level> {
    let (scale_x, scale_y) = metadata.bounds_scale();
    let (origin_x, origin_y) = metadata.origin();
    let tile_width = metadata.tile_width;
    let tile_height = metadata.tile_height;

    metadata
        .levels
        .iter()
        .enumerate()
        .rev()
        .map(|(index, dims)| {
            let width = (dims.width as f64 * scale_x) as u64;
            let height = (dims.height as f64 * scale_y) as u64;
            Level {
                index,
                width,
                height,
                downsample: (dims.downsample as u64).max(1),
                tile_width,
                tile_height,
                cols: grid_dimension(width, tile_width),
                rows: grid_dimension(height, tile_height),
                origin_x,
                origin_y,
            }
        })
        .collect()
}

impl Level {
    /// Number of tiles in this level.
    pub fn tile_count(&self) -> u64 {
        self.cols * self.rows
    }

    /// Every tile of the level, row by row.
    pub fn tasks(&self) -> impl Iterator<Item = TileTask> + '_ {
        (0..self.rows).flat_map(move |row| {
            (0..self.cols).map(move |col| TileTask {
                level: self.index,
                row,
                col,
            })
        })
    }

    /// Level-0 coordinates of a tile's top-left corner.
    pub fn tile_origin(&self, task: &TileTask) -> (u64, u64) {
        (
            self.origin_x + task.col * self.tile_width as u64 * self.downsample,
            self.origin_y + task.row * self.tile_height as u64 * self.downsample,
        )
    }

    /// Render request for one tile. Edge tiles keep the full tile size.
    pub fn request(&self, task: &TileTask, slide_id: &Arc<str>) -> TileRequest {
        let (x, y) = self.tile_origin(task);
        TileRequest {
            slide_id: slide_id.clone(),
            level: self.index,
            x,
            y,
            width: self.tile_width,
            height: self.tile_height,
        }
    }
}
