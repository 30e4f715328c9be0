//! Sources of ingestion events.
//!
//! The watcher does not care where "a file appeared" comes from. Production
//! uses [`NotifyEventSource`] on top of the OS file watcher; tests and
//! embedders push events through a [`ChannelEventSource`].

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::WatchError;

/// Something happened in the watched directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestEvent {
    /// A file appeared (created or renamed into place)
    Created(PathBuf),

    /// Events may have been dropped; the directory must be listed again
    Rescan,
}

/// A stream of ingestion events.
#[async_trait]
pub trait IngestionEventSource: Send {
    /// Wait for the next event.
    ///
    /// `Ok(None)` means the source has ended and will produce nothing more.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::SubscriptionLost`] if the underlying
    /// subscription failed.
    async fn next_event(&mut self) -> Result<Option<IngestEvent>, WatchError>;
}

// =============================================================================
// NotifyEventSource
// =============================================================================

/// Event source backed by the platform file watcher.
pub struct NotifyEventSource {
    // Dropping the watcher ends the subscription
    _watcher: RecommendedWatcher,
    events: mpsc::UnboundedReceiver<notify::Result<Event>>,
    queued: VecDeque<IngestEvent>,
}

impl NotifyEventSource {
    /// Start watching `dir` (not recursively).
    pub fn subscribe(dir: &Path) -> Result<Self, WatchError> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                // The receiver is gone only once the source is dropped
                let _ = tx.send(res);
            },
            Config::default(),
        )
        .map_err(|e| WatchError::Subscribe {
            path: dir.to_path_buf(),
            message: format!("Failed to create watcher: {}", e),
        })?;

        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|e| WatchError::Subscribe {
                path: dir.to_path_buf(),
                message: e.to_string(),
            })?;

        info!("Watching {}", dir.display());

        Ok(Self {
            _watcher: watcher,
            events: rx,
            queued: VecDeque::new(),
        })
    }
}

#[async_trait]
impl IngestionEventSource for NotifyEventSource {
    async fn next_event(&mut self) -> Result<Option<IngestEvent>, WatchError> {
        loop {
            if let Some(event) = self.queued.pop_front() {
                return Ok(Some(event));
            }

            match self.events.recv().await {
                None => return Ok(None),
                Some(Err(e)) => {
                    return Err(WatchError::SubscriptionLost {
                        message: e.to_string(),
                    })
                }
                Some(Ok(event)) => self.queued.extend(convert_event(event)),
            }
        }
    }
}

/// Map a notify event to the ingestion events it implies.
fn convert_event(event: Event) -> Vec<IngestEvent> {
    if event.need_rescan() {
        debug!("File watcher requested a rescan");
        return vec![IngestEvent::Rescan];
    }

    match event.kind {
        EventKind::Create(_) => event.paths.into_iter().map(IngestEvent::Created).collect(),
        // Only the destination of a rename is a new file
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            event.paths.into_iter().map(IngestEvent::Created).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => event
            .paths
            .into_iter()
            .last()
            .map(IngestEvent::Created)
            .into_iter()
            .collect(),
        _ => Vec::new(),
    }
}

// =============================================================================
// ChannelEventSource
// =============================================================================

/// Event source fed through a channel.
///
/// Dropping every sender ends the source.
pub struct ChannelEventSource {
    events: mpsc::UnboundedReceiver<IngestEvent>,
}

impl ChannelEventSource {
    pub fn new() -> (mpsc::UnboundedSender<IngestEvent>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { events: rx })
    }
}

#[async_trait]
impl IngestionEventSource for ChannelEventSource {
    async fn next_event(&mut self) -> Result<Option<IngestEvent>, WatchError> {
        Ok(self.events.recv().await)
    }
}
