//! Ingestion of pending slides.
//!
//! ```text
//! ┌──────────────────────┐    Created / Rescan    ┌─────────────┐
//! │ IngestionEventSource │ ─────────────────────▶ │   Watcher   │
//! │ (notify, channel)    │                        │ (scan+route)│
//! └──────────────────────┘                        └──────┬──────┘
//!                                                        │ submit
//!                                                        ▼
//!                                                 ┌─────────────┐
//!                                                 │ Dispatcher  │
//!                                                 │ (one slide  │
//!                                                 │  at a time) │
//!                                                 └──────┬──────┘
//!                                                        │ process
//!                                                        ▼
//!                                                 SlideProcessor
//!                                                 (PyramidBuilder)
//! ```

mod dispatch;
mod pending;
mod source;
mod watcher;

pub use dispatch::{DispatchStats, Dispatcher, SlideProcessor};
pub use pending::{PendingSlide, DEFAULT_PENDING_SUFFIX};
pub use source::{ChannelEventSource, IngestEvent, IngestionEventSource, NotifyEventSource};
pub use watcher::{WatchSettings, Watcher, DEFAULT_STALE_AFTER};
