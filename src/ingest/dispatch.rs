//! Single-slot build queue.
//!
//! Slides are built one at a time, in the order they were submitted. A slide
//! stays claimed from submission until its build ends, so announcing the same
//! file twice (scan plus event, duplicate events) queues it once.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::BuildError;
use crate::pyramid::{BuildReport, PyramidBuilder};
use crate::slide::SlideLibrary;

use super::pending::PendingSlide;

/// Builds one pending slide.
#[async_trait]
pub trait SlideProcessor: Send + Sync + 'static {
    async fn process(&self, slide: &PendingSlide) -> Result<BuildReport, BuildError>;
}

#[async_trait]
impl<L: SlideLibrary> SlideProcessor for PyramidBuilder<L> {
    async fn process(&self, slide: &PendingSlide) -> Result<BuildReport, BuildError> {
        self.build(slide).await
    }
}

/// Counters returned when the dispatcher shuts down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Slides whose every level was sealed
    pub built: usize,

    /// Slides that failed to open or had a failed level
    pub failed: usize,
}

/// Queue feeding a single build worker.
pub struct Dispatcher {
    queue: mpsc::UnboundedSender<PendingSlide>,
    claimed: Arc<Mutex<HashSet<PathBuf>>>,
    worker: JoinHandle<DispatchStats>,
}

impl Dispatcher {
    /// Spawn the build worker.
    pub fn start<P: SlideProcessor>(processor: Arc<P>) -> Self {
        let (queue, mut rx) = mpsc::unbounded_channel::<PendingSlide>();
        let claimed = Arc::new(Mutex::new(HashSet::new()));
        let worker_claims = claimed.clone();

        let worker = tokio::spawn(async move {
            let mut stats = DispatchStats::default();
            while let Some(slide) = rx.recv().await {
                // Each build gets its own task so a panic only fails that slide
                let build = {
                    let processor = processor.clone();
                    let slide = slide.clone();
                    tokio::spawn(async move { processor.process(&slide).await })
                };

                match build.await {
                    Ok(Ok(report)) if report.is_done() => stats.built += 1,
                    Ok(Ok(_)) => stats.failed += 1,
                    Ok(Err(e)) => {
                        error!(
                            slide_id = %slide.slide_id(),
                            "Error while generating tiles for {}: {}",
                            slide.path().display(),
                            e
                        );
                        stats.failed += 1;
                    }
                    Err(e) => {
                        error!(
                            slide_id = %slide.slide_id(),
                            "Build of {} died: {}",
                            slide.path().display(),
                            e
                        );
                        stats.failed += 1;
                    }
                }
                lock(&worker_claims).remove(slide.path());
            }
            stats
        });

        Self {
            queue,
            claimed,
            worker,
        }
    }

    /// Queue a slide for building.
    ///
    /// Returns `false` if the slide is already queued or being built.
    pub fn submit(&self, slide: PendingSlide) -> bool {
        let path = slide.path().to_path_buf();
        if !lock(&self.claimed).insert(path.clone()) {
            debug!("{} is already queued", path.display());
            return false;
        }

        match self.queue.send(slide) {
            Ok(()) => {
                info!("Adding {} to queue.", path.display());
                true
            }
            Err(_) => {
                error!("Build worker is gone, dropping {}", path.display());
                lock(&self.claimed).remove(&path);
                false
            }
        }
    }

    /// Number of slides queued or being built.
    pub fn pending(&self) -> usize {
        lock(&self.claimed).len()
    }

    /// Finish every queued slide and stop the worker.
    pub async fn shutdown(self) -> DispatchStats {
        drop(self.queue);
        match self.worker.await {
            Ok(stats) => stats,
            Err(e) => {
                error!("Build worker failed: {}", e);
                DispatchStats::default()
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
