//! Slides waiting to be tiled.
//!
//! A slide is pending while its file name carries the pending suffix, e.g.
//! `3f2a.svs.pending`. A successful build renames it to `3f2a.svs`, which
//! takes it out of the pending set.
//!
//! The slide id is the file name without the pending suffix. Extensions are
//! kept, so `a.svs.pending` and `a.tif.pending` never share archives.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::error::BuildError;

/// Suffix that marks a slide as pending.
pub const DEFAULT_PENDING_SUFFIX: &str = ".pending";

/// A slide file waiting for (or undergoing) tiling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSlide {
    path: PathBuf,
    slide_id: Arc<str>,
    /// Length of the pending suffix, 0 if the file is not marked
    suffix_len: usize,
}

impl PendingSlide {
    /// Recognise a pending slide by its suffix.
    ///
    /// Returns `None` if the file name does not end with `suffix` or nothing
    /// is left once it is removed.
    pub fn from_path(path: &Path, suffix: &str) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let stripped = name.strip_suffix(suffix)?;
        if stripped.is_empty() || suffix.is_empty() {
            return None;
        }
        Some(Self {
            path: path.to_path_buf(),
            slide_id: Arc::from(stripped),
            suffix_len: suffix.len(),
        })
    }

    /// Wrap any slide file, pending or not.
    ///
    /// Used for one-shot builds. If the name carries `suffix` the slide is
    /// completed by renaming it as usual; otherwise completing is a no-op.
    pub fn for_path(path: &Path, suffix: &str) -> Self {
        Self::from_path(path, suffix).unwrap_or_else(|| {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            Self {
                path: path.to_path_buf(),
                slide_id: Arc::from(name),
                suffix_len: 0,
            }
        })
    }

    /// Current path of the slide file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Identifier used in archive and tile names.
    pub fn slide_id(&self) -> &Arc<str> {
        &self.slide_id
    }

    /// Whether the file carries the pending suffix.
    pub fn is_marked(&self) -> bool {
        self.suffix_len > 0
    }

    /// Path the slide will have once it leaves the pending set.
    pub fn completed_path(&self) -> PathBuf {
        if !self.is_marked() {
            return self.path.clone();
        }
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let keep = name.len().saturating_sub(self.suffix_len);
        self.path.with_file_name(&name[..keep])
    }

    /// Take the slide out of the pending set.
    ///
    /// Returns the slide's new path.
    pub async fn complete(&self) -> Result<PathBuf, BuildError> {
        let target = self.completed_path();
        if target != self.path {
            tokio::fs::rename(&self.path, &target)
                .await
                .map_err(|e| BuildError::Pending {
                    path: self.path.clone(),
                    message: e.to_string(),
                })?;
        }
        Ok(target)
    }

    /// Time since the file was last modified.
    pub async fn age(&self) -> Option<Duration> {
        let modified = tokio::fs::metadata(&self.path).await.ok()?.modified().ok()?;
        SystemTime::now().duration_since(modified).ok()
    }
}
