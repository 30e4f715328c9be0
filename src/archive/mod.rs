//! Level archives.
//!
//! Each pyramid level of a slide is stored as one tar file named
//! `{slide_id}-level-{level}-tiles.tar`, holding one JPEG entry per tile.

mod writer;

pub use writer::{archive_file_name, ArchiveWriter, SealedArchive, PARTIAL_SUFFIX};
