use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by a native slide library while opening or reading a slide.
///
/// Any of these at open time means the slide is unreadable, unsupported or
/// corrupt. They abort the build of that slide only.
#[derive(Debug, Clone, Error)]
pub enum SlideError {
    /// The file could not be opened or decoded
    #[error("Failed to open slide {path}: {message}")]
    Open { path: PathBuf, message: String },

    /// The file is readable but not in a supported format
    #[error("Unsupported slide {path}: {reason}")]
    Unsupported { path: PathBuf, reason: String },

    /// A property the pipeline cannot default is absent
    #[error("Missing slide property: {0}")]
    MissingProperty(String),

    /// A property is present but cannot be parsed
    #[error("Invalid value for slide property {key}: {value:?}")]
    InvalidProperty { key: String, value: String },

    /// Requested level does not exist
    #[error("Level {level} out of range (slide has {count} levels)")]
    LevelOutOfRange { level: usize, count: usize },

    /// Reading pixels from an opened slide failed
    #[error("Failed to read region: {message}")]
    Region { message: String },
}

/// Errors that can occur while rendering a single tile.
#[derive(Debug, Clone, Error)]
pub enum TileError {
    /// The native library could not paint the requested region
    #[error("Render error at level {level} ({x}, {y}): {source}")]
    Render {
        level: usize,
        x: u64,
        y: u64,
        #[source]
        source: SlideError,
    },

    /// Failed to encode the raster as JPEG
    #[error("Failed to encode tile: {message}")]
    EncodeError { message: String },

    /// The rendered tile could not be added to the level archive
    #[error("Failed to store tile: {0}")]
    Archive(#[from] ArchiveError),

    /// The render task died before reporting an outcome
    #[error("Render task aborted: {message}")]
    Aborted { message: String },
}

/// Errors from the per-level tar archive writer.
#[derive(Debug, Clone, Error)]
pub enum ArchiveError {
    /// The archive file could not be created
    #[error("Failed to create archive {path}: {message}")]
    Create { path: PathBuf, message: String },

    /// Writing one entry failed; the archive is poisoned
    #[error("Failed to append {entry}: {message}")]
    Append { entry: String, message: String },

    /// Finishing, syncing or publishing the archive failed
    #[error("Failed to seal archive {path}: {message}")]
    Seal { path: PathBuf, message: String },

    /// An earlier append failed, so the container cannot be sealed
    #[error("Archive {path} is poisoned by an earlier write failure")]
    Poisoned { path: PathBuf },

    /// The archive no longer accepts entries (sealed or abandoned)
    #[error("Archive {path} is closed")]
    Closed { path: PathBuf },
}

/// Slide-level build failures.
///
/// Level failures (timeouts, archive errors) are not errors at this level:
/// they are recorded in the build report.
#[derive(Debug, Clone, Error)]
pub enum BuildError {
    /// The slide could not be opened or its metadata could not be read
    #[error("Native decode error: {0}")]
    NativeDecode(#[from] SlideError),

    /// The pending file could not be moved out of the pending set
    #[error("Failed to complete pending slide {path}: {message}")]
    Pending { path: PathBuf, message: String },
}

/// Errors from the ingestion watcher.
#[derive(Debug, Clone, Error)]
pub enum WatchError {
    /// Subscribing to filesystem events failed
    #[error("Failed to watch {path}: {message}")]
    Subscribe { path: PathBuf, message: String },

    /// The event subscription is gone; the process must be restarted
    #[error("Watch subscription lost: {message}")]
    SubscriptionLost { message: String },

    /// Listing the watched directory failed
    #[error("Failed to scan {path}: {message}")]
    Scan { path: PathBuf, message: String },
}

impl WatchError {
    /// Whether this error ends the watch loop for good.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            WatchError::SubscriptionLost { .. } | WatchError::Subscribe { .. }
        )
    }
}
