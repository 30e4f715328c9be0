//! Canonical tile entry names.
//!
//! The serving layer answers `GET .../tile/{x}/{y}/{level}/{w}/{h}` by
//! rebuilding the same name and looking it up in the sealed archive. Both
//! sides must use [`tile_entry_name`]; changing the format orphans every
//! archive already on disk.

/// File extension of encoded tiles.
pub const TILE_EXTENSION: &str = "jpg";

/// Build the archive entry name of a tile.
///
/// `tile_x` and `tile_y` are the level-0 pixel coordinates of the tile's
/// top-left corner, `tile_width` and `tile_height` the tile size in pixels.
pub fn tile_entry_name(
    slide_id: &str,
    tile_x: u64,
    tile_y: u64,
    level: usize,
    tile_width: u32,
    tile_height: u32,
) -> String {
    format!(
        "{}-{}-{}-{}-{}-{}.{}",
        slide_id, tile_x, tile_y, level, tile_width, tile_height, TILE_EXTENSION
    )
}
