//! Ingestion watcher.
//!
//! Finds pending slides in the watched directory and hands them to the
//! dispatcher: once at startup, and then whenever the event source announces
//! a new file.

use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::error::WatchError;

use super::dispatch::{DispatchStats, Dispatcher, SlideProcessor};
use super::pending::{PendingSlide, DEFAULT_PENDING_SUFFIX};
use super::source::{IngestEvent, IngestionEventSource};

/// Age after which a slide still pending is reported.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(14 * 24 * 60 * 60);

/// Settings for [`Watcher`].
#[derive(Debug, Clone)]
pub struct WatchSettings {
    /// Directory holding uploaded slides
    pub slides_dir: PathBuf,

    /// File name suffix marking a slide as pending
    pub pending_suffix: String,

    /// Warn about slides pending for longer than this
    pub stale_after: Option<Duration>,
}

impl WatchSettings {
    pub fn new(slides_dir: impl Into<PathBuf>) -> Self {
        Self {
            slides_dir: slides_dir.into(),
            pending_suffix: DEFAULT_PENDING_SUFFIX.to_string(),
            stale_after: Some(DEFAULT_STALE_AFTER),
        }
    }

    pub fn with_pending_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.pending_suffix = suffix.into();
        self
    }

    pub fn with_stale_after(mut self, stale_after: Option<Duration>) -> Self {
        self.stale_after = stale_after;
        self
    }
}

/// Watches a directory and builds every pending slide that shows up.
pub struct Watcher {
    settings: WatchSettings,
    dispatcher: Dispatcher,
}

impl Watcher {
    /// Create a watcher building slides with `processor`.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new<P: SlideProcessor>(settings: WatchSettings, processor: Arc<P>) -> Self {
        Self {
            settings,
            dispatcher: Dispatcher::start(processor),
        }
    }

    pub fn settings(&self) -> &WatchSettings {
        &self.settings
    }

    /// Number of slides queued or being built.
    pub fn queued(&self) -> usize {
        self.dispatcher.pending()
    }

    /// List the watched directory and queue every pending slide.
    ///
    /// Returns the number of slides newly queued.
    pub async fn scan_once(&self) -> Result<usize, WatchError> {
        info!("Checking for pending slides ...");

        let dir = &self.settings.slides_dir;
        let scan_err = |e: std::io::Error| WatchError::Scan {
            path: dir.clone(),
            message: e.to_string(),
        };

        let mut found = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await.map_err(scan_err)?;
        while let Some(entry) = entries.next_entry().await.map_err(scan_err)? {
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            if !is_file {
                continue;
            }
            if let Some(slide) = PendingSlide::from_path(&entry.path(), &self.settings.pending_suffix) {
                found.push(slide);
            }
        }

        if found.is_empty() {
            info!("No pending slides.");
            return Ok(0);
        }

        found.sort_by(|a, b| a.path().cmp(b.path()));
        info!("Found {} pending slides, adding to queue.", found.len());

        let mut queued = 0;
        for slide in found {
            self.warn_if_stale(&slide).await;
            if self.dispatcher.submit(slide) {
                queued += 1;
            }
        }
        Ok(queued)
    }

    /// Scan, then queue every pending slide the source announces.
    ///
    /// Only returns when the subscription is lost; the error is always fatal
    /// and the process should be restarted.
    pub async fn watch_forever<E: IngestionEventSource>(
        &self,
        source: &mut E,
    ) -> Result<Infallible, WatchError> {
        self.scan_logged().await;
        info!("Waiting for slides ...");

        loop {
            match source.next_event().await {
                Ok(Some(IngestEvent::Created(path))) => self.handle_created(&path),
                Ok(Some(IngestEvent::Rescan)) => {
                    warn!("File events may have been lost, rescanning");
                    self.scan_logged().await;
                }
                Ok(None) => {
                    let err = WatchError::SubscriptionLost {
                        message: "event source closed".to_string(),
                    };
                    error!("{}. Please restart the tiler instance.", err);
                    return Err(err);
                }
                Err(e) => {
                    error!("{}. Please restart the tiler instance.", e);
                    return Err(e);
                }
            }
        }
    }

    /// Finish queued builds and stop.
    pub async fn shutdown(self) -> DispatchStats {
        let stats = self.dispatcher.shutdown().await;
        info!(
            "Watcher stopped: {} slides built, {} failed",
            stats.built, stats.failed
        );
        stats
    }

    fn handle_created(&self, path: &Path) {
        match PendingSlide::from_path(path, &self.settings.pending_suffix) {
            Some(slide) => {
                info!("Found new slide {}. Added to generation queue.", path.display());
                self.dispatcher.submit(slide);
            }
            None => debug!("Ignoring {}", path.display()),
        }
    }

    /// Scan errors during watching are logged, not fatal.
    async fn scan_logged(&self) {
        if let Err(e) = self.scan_once().await {
            error!("{}", e);
        }
    }

    async fn warn_if_stale(&self, slide: &PendingSlide) {
        if let Some(age) = self.stale_age(slide).await {
            warn!(
                slide_id = %slide.slide_id(),
                "{} has been pending for {} days",
                slide.path().display(),
                age.as_secs() / 86_400
            );
        }
    }

    /// Age of a slide pending for longer than `stale_after`.
    async fn stale_age(&self, slide: &PendingSlide) -> Option<Duration> {
        let limit = self.settings.stale_after?;
        slide.age().await.filter(|age| *age > limit)
    }
}
