//! Per-level tar archive writer.
//!
//! Every pyramid level is written to its own tar file. Entries are appended
//! from many render workers at once; the writer serialises them behind a
//! mutex so the container stays well formed.
//!
//! # Lifecycle
//!
//! ```text
//!            append*             seal
//!   Open ──────────────▶ Open ──────────▶ Sealed   (published .tar)
//!     │                    │
//!     │       abandon      │
//!     └────────────────────┴────────────▶ Abandoned (partial removed)
//! ```
//!
//! While open the archive lives at `{id}-level-{L}-tiles.tar.partial`. Sealing
//! finishes the tar stream, syncs it to disk and renames it to its final name,
//! so a reader never sees a truncated archive under the published name.
//!
//! A failed append poisons the writer: the tar stream may hold a partial
//! entry, so `seal` refuses to publish it.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use sha2::{Digest, Sha256};
use tar::{Builder, EntryType, Header};
use tracing::{debug, warn};

use crate::error::ArchiveError;

/// Suffix of archives that are still being written.
pub const PARTIAL_SUFFIX: &str = ".partial";

/// File name of the sealed archive for one level.
pub fn archive_file_name(slide_id: &str, level: usize) -> String {
    format!("{}-level-{}-tiles.tar", slide_id, level)
}

/// A sealed, published level archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedArchive {
    /// Final path of the archive
    pub path: PathBuf,

    /// Number of entries written
    pub entries: usize,

    /// Hex SHA-256 of the archive file
    pub sha256: String,
}

enum State {
    Open(Builder<BufWriter<File>>),
    Sealed,
    Abandoned,
}

struct Inner {
    state: State,
    entries: usize,
    poisoned: bool,
}

/// Writer for one level's tar archive.
pub struct ArchiveWriter {
    partial_path: PathBuf,
    final_path: PathBuf,
    inner: Mutex<Inner>,
}

impl ArchiveWriter {
    /// Open a new level archive in `output_dir`.
    ///
    /// A leftover partial file from an earlier run is truncated.
    pub fn create(output_dir: &Path, slide_id: &str, level: usize) -> Result<Self, ArchiveError> {
        let final_path = output_dir.join(archive_file_name(slide_id, level));
        let partial_path = output_dir.join(format!(
            "{}{}",
            archive_file_name(slide_id, level),
            PARTIAL_SUFFIX
        ));

        let create_err = |e: io::Error| ArchiveError::Create {
            path: partial_path.clone(),
            message: e.to_string(),
        };

        fs::create_dir_all(output_dir).map_err(create_err)?;
        let file = File::create(&partial_path).map_err(create_err)?;

        debug!("Created archive {}", partial_path.display());

        Ok(Self {
            partial_path: partial_path.clone(),
            final_path,
            inner: Mutex::new(Inner {
                state: State::Open(Builder::new(BufWriter::new(file))),
                entries: 0,
                poisoned: false,
            }),
        })
    }

    /// Path the archive is published under once sealed.
    pub fn path(&self) -> &Path {
        &self.final_path
    }

    /// Path of the archive while it is being written.
    pub fn partial_path(&self) -> &Path {
        &self.partial_path
    }

    /// Number of entries appended so far.
    pub fn entry_count(&self) -> usize {
        self.lock().entries
    }

    /// Append one entry. Blocks while another append is in progress.
    ///
    /// # Errors
    ///
    /// [`ArchiveError::Closed`] once the writer is sealed or abandoned,
    /// [`ArchiveError::Poisoned`] after an earlier failure and
    /// [`ArchiveError::Append`] if this write fails.
    pub fn append(&self, name: &str, data: &[u8]) -> Result<(), ArchiveError> {
        let mut inner = self.lock();
        if inner.poisoned {
            return Err(ArchiveError::Poisoned {
                path: self.partial_path.clone(),
            });
        }

        let builder = match &mut inner.state {
            State::Open(builder) => builder,
            State::Sealed | State::Abandoned => {
                return Err(ArchiveError::Closed {
                    path: self.partial_path.clone(),
                })
            }
        };

        // Fixed ownership and mtime keep archives byte-identical across runs
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);

        match builder.append_data(&mut header, name, data) {
            Ok(()) => {
                inner.entries += 1;
                Ok(())
            }
            Err(e) => {
                inner.poisoned = true;
                warn!(entry = name, error = %e, "Archive append failed");
                Err(ArchiveError::Append {
                    entry: name.to_string(),
                    message: e.to_string(),
                })
            }
        }
    }

    /// Finish, sync and publish the archive.
    ///
    /// On failure the partial file is removed and nothing is published.
    pub fn seal(&self) -> Result<SealedArchive, ArchiveError> {
        let mut inner = self.lock();
        let builder = match std::mem::replace(&mut inner.state, State::Sealed) {
            State::Open(builder) => builder,
            previous => {
                inner.state = previous;
                return Err(ArchiveError::Closed {
                    path: self.partial_path.clone(),
                });
            }
        };

        if inner.poisoned {
            drop(builder);
            self.remove_partial();
            return Err(ArchiveError::Poisoned {
                path: self.partial_path.clone(),
            });
        }

        match self.finish(builder) {
            Ok(sha256) => {
                debug!(
                    "Sealed archive {} ({} entries)",
                    self.final_path.display(),
                    inner.entries
                );
                Ok(SealedArchive {
                    path: self.final_path.clone(),
                    entries: inner.entries,
                    sha256,
                })
            }
            Err(e) => {
                self.remove_partial();
                Err(ArchiveError::Seal {
                    path: self.final_path.clone(),
                    message: e.to_string(),
                })
            }
        }
    }

    /// Stop writing and delete the partial file.
    ///
    /// Later appends fail with [`ArchiveError::Closed`]. Does nothing if the
    /// archive is already sealed.
    pub fn abandon(&self) {
        let mut inner = self.lock();
        if let State::Open(_) = inner.state {
            inner.state = State::Abandoned;
            self.remove_partial();
            debug!("Abandoned archive {}", self.partial_path.display());
        }
    }

    fn finish(&self, builder: Builder<BufWriter<File>>) -> io::Result<String> {
        let file = builder
            .into_inner()?
            .into_inner()
            .map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&self.partial_path, &self.final_path)?;

        let mut hasher = Sha256::new();
        let mut sealed = File::open(&self.final_path)?;
        io::copy(&mut sealed, &mut hasher)?;
        hasher.flush()?;
        Ok(hex::encode(hasher.finalize()))
    }

    fn remove_partial(&self) {
        if let Err(e) = fs::remove_file(&self.partial_path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(
                    "Failed to remove partial archive {}: {}",
                    self.partial_path.display(),
                    e
                );
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock leaves the state consistent enough
        // to abandon or report; don't propagate the poison.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for ArchiveWriter {
    fn drop(&mut self) {
        self.abandon();
    }
}

impl std::fmt::Debug for ArchiveWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveWriter")
            .field("path", &self.final_path)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::sync::Arc;

    fn read_entries(path: &Path) -> Vec<(String, Vec<u8>)> {
        let mut archive = tar::Archive::new(File::open(path).unwrap());
        archive
            .entries()
            .unwrap()
            .map(|entry| {
                let mut entry = entry.unwrap();
                let name = entry.path().unwrap().to_string_lossy().into_owned();
                let mut data = Vec::new();
                entry.read_to_end(&mut data).unwrap();
                (name, data)
            })
            .collect()
    }

    #[test]
    fn test_archive_file_name() {
        assert_eq!(archive_file_name("abc", 2), "abc-level-2-tiles.tar");
    }

    #[test]
    fn test_append_and_seal() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArchiveWriter::create(dir.path(), "s1", 0).unwrap();
        assert!(writer.partial_path().exists());
        assert!(!writer.path().exists());

        writer.append("s1-0-0-0-256-256.jpg", b"first").unwrap();
        writer.append("s1-256-0-0-256-256.jpg", b"second").unwrap();
        assert_eq!(writer.entry_count(), 2);

        let sealed = writer.seal().unwrap();
        assert_eq!(sealed.entries, 2);
        assert_eq!(sealed.path, dir.path().join("s1-level-0-tiles.tar"));
        assert!(!dir.path().join("s1-level-0-tiles.tar.partial").exists());

        let bytes = fs::read(&sealed.path).unwrap();
        assert_eq!(sealed.sha256, hex::encode(Sha256::digest(&bytes)));

        let entries = read_entries(&sealed.path);
        assert_eq!(
            entries,
            vec![
                ("s1-0-0-0-256-256.jpg".to_string(), b"first".to_vec()),
                ("s1-256-0-0-256-256.jpg".to_string(), b"second".to_vec()),
            ]
        );
    }

    #[test]
    fn test_empty_archive_seals() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArchiveWriter::create(dir.path(), "s1", 3).unwrap();
        let sealed = writer.seal().unwrap();
        assert_eq!(sealed.entries, 0);
        assert!(read_entries(&sealed.path).is_empty());
    }

    #[test]
    fn test_identical_input_gives_identical_archive() {
        let dir = tempfile::tempdir().unwrap();

        let first = ArchiveWriter::create(dir.path(), "s1", 0).unwrap();
        first.append("a.jpg", b"data").unwrap();
        let first = first.seal().unwrap();

        let second = ArchiveWriter::create(dir.path(), "s1", 0).unwrap();
        second.append("a.jpg", b"data").unwrap();
        let second = second.seal().unwrap();

        assert_eq!(first.sha256, second.sha256);
    }

    #[test]
    fn test_concurrent_appends() {
        let dir = tempfile::tempdir().unwrap();
        let writer = Arc::new(ArchiveWriter::create(dir.path(), "s1", 0).unwrap());

        std::thread::scope(|scope| {
            for t in 0..4 {
                let writer = writer.clone();
                scope.spawn(move || {
                    for i in 0..25 {
                        let payload = vec![t as u8; 700 + i];
                        writer.append(&format!("t{}-{}.jpg", t, i), &payload).unwrap();
                    }
                });
            }
        });

        let sealed = writer.seal().unwrap();
        assert_eq!(sealed.entries, 100);

        let entries = read_entries(&sealed.path);
        assert_eq!(entries.len(), 100);
        for (name, data) in entries {
            let t: u8 = name[1..2].parse().unwrap();
            assert!(data.iter().all(|b| *b == t), "corrupt entry {}", name);
        }
    }

    #[test]
    fn test_append_after_seal_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArchiveWriter::create(dir.path(), "s1", 0).unwrap();
        writer.seal().unwrap();

        assert!(matches!(
            writer.append("late.jpg", b"x"),
            Err(ArchiveError::Closed { .. })
        ));
        assert!(matches!(writer.seal(), Err(ArchiveError::Closed { .. })));
    }

    #[test]
    fn test_abandon_removes_partial() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArchiveWriter::create(dir.path(), "s1", 1).unwrap();
        writer.append("a.jpg", b"data").unwrap();

        writer.abandon();
        assert!(!writer.partial_path().exists());
        assert!(!writer.path().exists());
        assert!(matches!(
            writer.append("b.jpg", b"data"),
            Err(ArchiveError::Closed { .. })
        ));
        assert!(matches!(writer.seal(), Err(ArchiveError::Closed { .. })));
    }

    #[test]
    fn test_failed_append_poisons() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArchiveWriter::create(dir.path(), "s1", 0).unwrap();
        writer.append("ok.jpg", b"data").unwrap();

        // tar refuses parent components in entry names
        assert!(matches!(
            writer.append("../escape.jpg", b"data"),
            Err(ArchiveError::Append { .. })
        ));
        assert!(matches!(
            writer.append("after.jpg", b"data"),
            Err(ArchiveError::Poisoned { .. })
        ));

        assert!(matches!(writer.seal(), Err(ArchiveError::Poisoned { .. })));
        assert!(!writer.path().exists());
        assert!(!writer.partial_path().exists());
    }

    #[test]
    fn test_drop_unsealed_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let partial = {
            let writer = ArchiveWriter::create(dir.path(), "s1", 0).unwrap();
            writer.append("a.jpg", b"data").unwrap();
            writer.partial_path().to_path_buf()
        };
        assert!(!partial.exists());
    }
}
