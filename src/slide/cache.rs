//! Cache of opened slide handles.
//!
//! Opening a slide is the most expensive thing the pipeline does, so every
//! component goes through [`SlideCache`] instead of opening slides itself.
//! The cache provides:
//!
//! - Singleflight opens: concurrent `acquire` calls for one path share a
//!   single native open
//! - Reference counting: every [`SlideLease`] counts as one outstanding use
//! - LRU eviction of idle handles once the capacity is exceeded
//!
//! # Eviction
//!
//! The LRU recency list is the last-access record: `acquire` promotes an
//! entry, eviction walks from the least recently used end and picks the first
//! entry with no outstanding leases. Entries in use are never evicted, so the
//! cache can temporarily hold more than `capacity` handles when all of them
//! are busy.
//!
//! A native slide is closed by dropping it. Because leases share ownership of
//! their entry, the drop happens exactly once: when the entry has been evicted
//! (or the cache dropped) and the last lease is gone.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use lru::LruCache;
use tokio::sync::{Mutex, OnceCell, RwLock};
use tracing::{debug, info};

use crate::error::SlideError;

use super::metadata::{SlideMetadata, DEFAULT_TILE_SIZE};
use super::native::SlideLibrary;

/// Default number of open slides kept by the cache.
pub const DEFAULT_SLIDE_CACHE_CAPACITY: usize = 8;

// =============================================================================
// SlideHandle
// =============================================================================

/// An opened native slide plus the metadata derived from it.
///
/// Read-only after open; shared by all renders of a slide.
pub struct SlideHandle<S> {
    path: PathBuf,
    native: S,
    metadata: SlideMetadata,
}

impl<S> SlideHandle<S> {
    /// Path the slide was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The native slide.
    pub fn native(&self) -> &S {
        &self.native
    }

    /// Metadata read when the slide was opened.
    pub fn metadata(&self) -> &SlideMetadata {
        &self.metadata
    }
}

struct CacheEntry<S> {
    handle: SlideHandle<S>,
    refs: AtomicUsize,
}

impl<S> CacheEntry<S> {
    fn refs(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }
}

// =============================================================================
// SlideLease
// =============================================================================

/// A counted shared reference to a cached slide.
///
/// The cache will not evict the slide while any lease is alive. Cloning a
/// lease takes another reference; dropping it releases one.
pub struct SlideLease<S> {
    entry: Arc<CacheEntry<S>>,
}

impl<S> SlideLease<S> {
    fn new(entry: Arc<CacheEntry<S>>) -> Self {
        entry.refs.fetch_add(1, Ordering::AcqRel);
        Self { entry }
    }

    /// Number of outstanding leases on this slide, including this one.
    pub fn ref_count(&self) -> usize {
        self.entry.refs()
    }
}

impl<S> Clone for SlideLease<S> {
    fn clone(&self) -> Self {
        Self::new(self.entry.clone())
    }
}

impl<S> Drop for SlideLease<S> {
    fn drop(&mut self) {
        self.entry.refs.fetch_sub(1, Ordering::AcqRel);
    }
}

impl<S> Deref for SlideLease<S> {
    type Target = SlideHandle<S>;

    fn deref(&self) -> &SlideHandle<S> {
        &self.entry.handle
    }
}

// =============================================================================
// SlideCache
// =============================================================================

type OpenResult<S> = Result<Arc<CacheEntry<S>>, SlideError>;

/// Bounded cache of opened slides.
pub struct SlideCache<L: SlideLibrary> {
    /// The native library used to open slides
    library: Arc<L>,

    /// Opened slides indexed by path, in recency order
    entries: RwLock<LruCache<PathBuf, Arc<CacheEntry<L::Slide>>>>,

    /// In-flight opens for singleflight
    in_flight: Mutex<HashMap<PathBuf, Arc<OnceCell<OpenResult<L::Slide>>>>>,

    /// Maximum number of idle slides kept open
    capacity: NonZeroUsize,

    /// Tile size assumed when a slide declares none
    default_tile: (u32, u32),
}

impl<L: SlideLibrary> SlideCache<L> {
    /// Create a cache with the default capacity.
    pub fn new(library: L) -> Self {
        Self::with_capacity(library, DEFAULT_SLIDE_CACHE_CAPACITY)
    }

    /// Create a cache holding at most `capacity` idle slides (minimum 1).
    pub fn with_capacity(library: L, capacity: usize) -> Self {
        Self {
            library: Arc::new(library),
            entries: RwLock::new(LruCache::unbounded()),
            in_flight: Mutex::new(HashMap::new()),
            capacity: NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            default_tile: (DEFAULT_TILE_SIZE, DEFAULT_TILE_SIZE),
        }
    }

    /// Use a different tile size for slides that declare none.
    pub fn with_default_tile_size(mut self, width: u32, height: u32) -> Self {
        self.default_tile = (width, height);
        self
    }

    /// The slide library behind this cache.
    pub fn library(&self) -> &L {
        &self.library
    }

    /// Get a lease on a slide, opening it if it is not cached.
    ///
    /// Concurrent calls for the same path wait on a single open. A failed
    /// open is not remembered: the next call tries again.
    ///
    /// # Errors
    ///
    /// Returns the library's error if the slide is unreadable, unsupported
    /// or corrupt, or if its metadata cannot be read.
    pub async fn acquire(&self, path: &Path) -> Result<SlideLease<L::Slide>, SlideError> {
        // Fast path: already open
        {
            let mut entries = self.entries.write().await;
            if let Some(entry) = entries.get(path) {
                return Ok(SlideLease::new(entry.clone()));
            }
        }

        // Slow path: join or start the open. The leader publishes to `entries`
        // before clearing `in_flight`, so checking both under this lock cannot
        // miss a finished open.
        let cell = {
            let mut in_flight = self.in_flight.lock().await;
            match in_flight.get(path) {
                Some(cell) => cell.clone(),
                None => {
                    {
                        let mut entries = self.entries.write().await;
                        if let Some(entry) = entries.get(path) {
                            return Ok(SlideLease::new(entry.clone()));
                        }
                    }
                    let cell = Arc::new(OnceCell::new());
                    in_flight.insert(path.to_path_buf(), cell.clone());
                    cell
                }
            }
        };

        let result = cell
            .get_or_init(|| self.open_entry(path.to_path_buf()))
            .await
            .clone();

        let lease = match result {
            Ok(entry) => Ok(self.admit(path, entry).await),
            Err(e) => Err(e),
        };

        {
            let mut in_flight = self.in_flight.lock().await;
            if in_flight
                .get(path)
                .is_some_and(|current| Arc::ptr_eq(current, &cell))
            {
                in_flight.remove(path);
            }
        }

        lease
    }

    /// Give a lease back. Equivalent to dropping it.
    pub fn release(&self, lease: SlideLease<L::Slide>) {
        drop(lease);
    }

    /// Open a slide on the blocking pool and read its metadata.
    async fn open_entry(&self, path: PathBuf) -> OpenResult<L::Slide> {
        let library = self.library.clone();
        let default_tile = self.default_tile;
        let task_path = path.clone();

        let handle = tokio::task::spawn_blocking(move || {
            let native = library.open(&task_path)?;
            let metadata = SlideMetadata::read(&native, default_tile)?;
            Ok::<_, SlideError>(SlideHandle {
                path: task_path,
                native,
                metadata,
            })
        })
        .await
        .map_err(|e| SlideError::Open {
            path: path.clone(),
            message: format!("open task failed: {}", e),
        })??;

        info!(
            "Opened slide {} ({} levels)",
            path.display(),
            handle.metadata.level_count()
        );

        Ok(Arc::new(CacheEntry {
            handle,
            refs: AtomicUsize::new(0),
        }))
    }

    /// Insert an opened entry (unless one is already cached) and lease it.
    async fn admit(&self, path: &Path, entry: Arc<CacheEntry<L::Slide>>) -> SlideLease<L::Slide> {
        let mut entries = self.entries.write().await;
        let entry = match entries.get(path) {
            Some(existing) => existing.clone(),
            None => {
                entries.put(path.to_path_buf(), entry.clone());
                entry
            }
        };
        let lease = SlideLease::new(entry);
        self.evict_idle(&mut entries);
        lease
    }

    /// Evict least recently used idle entries until within capacity.
    fn evict_idle(&self, entries: &mut LruCache<PathBuf, Arc<CacheEntry<L::Slide>>>) {
        while entries.len() > self.capacity.get() {
            let victim = entries
                .iter()
                .rev()
                .find(|(_, entry)| entry.refs() == 0)
                .map(|(path, _)| path.clone());

            match victim {
                Some(path) => {
                    entries.pop(&path);
                    debug!("Evicted slide {}", path.display());
                }
                None => {
                    debug!(
                        "Slide cache over capacity ({} > {}), all slides in use",
                        entries.len(),
                        self.capacity
                    );
                    break;
                }
            }
        }
    }

    /// Drop a slide from the cache if it is idle.
    ///
    /// Returns `true` if the slide was removed. A slide with outstanding
    /// leases stays cached.
    pub async fn invalidate(&self, path: &Path) -> bool {
        let mut entries = self.entries.write().await;
        match entries.peek(path) {
            Some(entry) if entry.refs() == 0 => {
                entries.pop(path);
                true
            }
            _ => false,
        }
    }

    /// Drop all idle slides.
    pub async fn clear(&self) {
        let mut entries = self.entries.write().await;
        let idle: Vec<PathBuf> = entries
            .iter()
            .filter(|(_, entry)| entry.refs() == 0)
            .map(|(path, _)| path.clone())
            .collect();
        for path in idle {
            entries.pop(&path);
        }
    }

    /// Get the number of cached slides.
    pub async fn cached_count(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Check whether a slide is cached without touching its recency.
    pub async fn contains(&self, path: &Path) -> bool {
        self.entries.read().await.contains(path)
    }

    /// Get the configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }
}

// =============================================================================
// Tests
// =============================================================================
