//! Texture Cache
//!
//! Bounded-resource cache of open texture files and the data blocks read
//! or synthesized from them.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                             Cache                                    │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  cache lock ─► CacheState                                            │
//! │                 ├─ file table   path ─► File | Failed                │
//! │                 ├─ object table id ─► {payload, refcount, parent}    │
//! │                 ├─ child slots  (parent, slot) ─► id                 │
//! │                 └─ LRU lists    unused files │ unused data           │
//! │                                                                      │
//! │  open lock  ─► serializes first opens (I/O outside the cache lock)   │
//! │                                                                      │
//! │  File ─┬─ Level ─── Face ─── Tile                                    │
//! │        ├─ Reduction ─── Tile (reduced tiled)                         │
//! │        └─ MetaData ─── LargeMeta                                     │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Limits
//!
//! - `max_files`: once more files are open than this, unused files are
//!   evicted oldest first
//! - `max_mem`: unused data blocks are evicted oldest first while their
//!   total size exceeds this, but never below `min_data_count` blocks
//!
//! # Lock Order
//!
//! open lock → cache lock, and per-reader read/reduce lock → cache lock.
//! The cache lock is never held across I/O, inflate or reduction work.

mod lru;
mod metrics;
pub(crate) mod state;

pub use metrics::{CacheMetrics, CacheStats, MetricsSnapshot};

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::error::{Error, Result};
use crate::io::{FsInputHandler, InputHandler, InputStream};
use crate::reader::{Reader, ReaderInner};
use state::{CacheState, Limits, ObjectId, Payload, Slot};

/// Default number of open files
pub const DEFAULT_MAX_FILES: usize = 100;

/// Default unused-data budget (100 MiB)
pub const DEFAULT_MAX_MEM: usize = 100 * 1024 * 1024;

/// Upper bound on the retained-block floor
pub const MAX_MIN_DATA_COUNT: usize = 1000;

// =============================================================================
// Configuration
// =============================================================================

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of open files
    pub max_files: usize,
    /// Maximum bytes of unused data kept cached
    pub max_mem: usize,
    /// Directories searched for relative paths that fail to open directly
    pub search_path: Vec<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_files: DEFAULT_MAX_FILES,
            max_mem: DEFAULT_MAX_MEM,
            search_path: Vec::new(),
        }
    }
}

impl CacheConfig {
    /// Validate limits
    pub fn validate(&self) -> Result<()> {
        if self.max_files == 0 {
            return Err(Error::Config("max_files must be at least 1".into()));
        }
        if self.max_mem == 0 {
            return Err(Error::Config("max_mem must be at least 1 byte".into()));
        }
        Ok(())
    }

    /// Unused data blocks always retained, sized relative to `max_files`
    pub fn min_data_count(&self) -> usize {
        (10 * self.max_files).min(MAX_MIN_DATA_COUNT)
    }

    /// Parse a `:`- or `;`-separated directory list
    pub fn with_search_path_str(mut self, dirs: &str) -> Self {
        self.search_path = dirs
            .split([':', ';'])
            .filter(|d| !d.is_empty())
            .map(PathBuf::from)
            .collect();
        self
    }

    fn limits(&self) -> Limits {
        Limits {
            max_files: self.max_files,
            max_mem: self.max_mem,
            min_data_count: self.min_data_count(),
        }
    }
}

// =============================================================================
// Shared State
// =============================================================================

pub(crate) struct CacheShared {
    state: Mutex<CacheState>,
    open_lock: Mutex<()>,
    io: Arc<dyn InputHandler>,
    search_path: Vec<PathBuf>,
    metrics: Arc<CacheMetrics>,
}

/// Output of a gated build, ready to publish
pub(crate) struct Built {
    pub payload: Payload,
    pub size: usize,
    pub pins: Vec<ObjectId>,
}

impl Built {
    pub(crate) fn new(payload: Payload, size: usize) -> Self {
        Self {
            payload,
            size,
            pins: Vec::new(),
        }
    }

    /// Hold a reference on `ids` for the lifetime of the published object
    pub(crate) fn pinning(mut self, ids: Vec<ObjectId>) -> Self {
        self.pins = ids;
        self
    }
}

impl CacheShared {
    /// Run `f` under the cache lock, dropping destroyed payloads afterwards
    fn with_state<R>(&self, f: impl FnOnce(&mut CacheState) -> R) -> R {
        let (out, garbage) = {
            let mut st = self.state.lock();
            let out = f(&mut st);
            (out, st.take_garbage())
        };
        drop(garbage);
        out
    }

    fn release(&self, id: ObjectId) {
        self.with_state(|st| st.release(id));
    }

    fn lookup_file(self: &Arc<Self>, path: &str) -> Option<Result<Reader>> {
        let found = self.with_state(|st| st.lookup_file(path))?;
        Some(found.map(|(id, inner)| Reader::new(Handle::adopt(self.clone(), id), inner)))
    }

    /// Reference the child in `(parent, slot)` if it is populated
    pub(crate) fn acquire(self: &Arc<Self>, parent: ObjectId, slot: Slot) -> Option<(Handle, Payload)> {
        self.with_state(|st| st.acquire(parent, slot))
            .map(|(id, payload)| (Handle::adopt(self.clone(), id), payload))
    }

    /// Build-then-publish under `gate`
    ///
    /// The slot is re-checked after the gate is acquired, so a result
    /// published by another thread meanwhile is adopted and `build` never
    /// runs twice for one slot.
    pub(crate) fn build_gated<G>(
        self: &Arc<Self>,
        parent: ObjectId,
        slot: Slot,
        gate: &Mutex<G>,
        build: impl FnOnce(&mut G) -> Result<Built>,
    ) -> Result<(Handle, Payload)> {
        let mut guard = gate.lock();
        if let Some(found) = self.acquire(parent, slot) {
            return Ok(found);
        }
        let built = build(&mut guard)?;
        let (id, payload) = self.with_state(|st| {
            st.publish(parent, slot, built.payload, built.size, built.pins)
        });
        drop(guard);
        Ok((Handle::adopt(self.clone(), id), payload))
    }

    /// Open `path` directly, then relative to each search directory
    fn open_stream(&self, path: &str) -> Result<Box<dyn InputStream>> {
        let requested = Path::new(path);
        match self.io.open(requested) {
            Ok(stream) => Ok(stream),
            Err(e) if e.kind() == io::ErrorKind::NotFound && requested.is_relative() => {
                for dir in &self.search_path {
                    let candidate = dir.join(requested);
                    if let Ok(stream) = self.io.open(&candidate) {
                        debug!(path, resolved = %candidate.display(), "Resolved via search path");
                        return Ok(stream);
                    }
                }
                Err(Error::Io(e))
            }
            Err(e) => Err(Error::Io(e)),
        }
    }
}

// =============================================================================
// Handle
// =============================================================================

/// One counted reference on a cached object
///
/// Cloning adds a reference; dropping releases it.
pub(crate) struct Handle {
    shared: Arc<CacheShared>,
    id: ObjectId,
}

impl Handle {
    /// Take ownership of a reference already counted in the table
    pub(crate) fn adopt(shared: Arc<CacheShared>, id: ObjectId) -> Self {
        Self { shared, id }
    }

    pub(crate) fn id(&self) -> ObjectId {
        self.id
    }

    pub(crate) fn shared(&self) -> &Arc<CacheShared> {
        &self.shared
    }
}

impl Clone for Handle {
    fn clone(&self) -> Self {
        self.shared.with_state(|st| st.add_ref(self.id));
        Self {
            shared: self.shared.clone(),
            id: self.id,
        }
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        self.shared.release(self.id);
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Handle").field(&self.id.0).finish()
    }
}

// =============================================================================
// Cache
// =============================================================================

/// Shared texture cache; clones refer to the same cache
#[derive(Clone)]
pub struct Cache {
    shared: Arc<CacheShared>,
}

impl Cache {
    /// Create a cache reading from the local filesystem
    pub fn new(config: CacheConfig) -> Result<Self> {
        Self::with_input_handler(config, Arc::new(FsInputHandler))
    }

    /// Create a cache reading through a custom input handler
    pub fn with_input_handler(config: CacheConfig, io: Arc<dyn InputHandler>) -> Result<Self> {
        config.validate()?;
        let metrics = Arc::new(CacheMetrics::new());
        debug!(
            max_files = config.max_files,
            max_mem = config.max_mem,
            handler = io.name(),
            "Creating texture cache"
        );
        Ok(Self {
            shared: Arc::new(CacheShared {
                state: Mutex::new(CacheState::new(config.limits(), metrics.clone())),
                open_lock: Mutex::new(()),
                io,
                search_path: config.search_path,
                metrics,
            }),
        })
    }

    /// Get the reader for `path`, opening the file on first use
    ///
    /// Concurrent first requests for one path open it exactly once. A path
    /// whose open failed keeps failing with [`Error::PreviouslyFailed`]
    /// until it is purged.
    pub fn get(&self, path: &str) -> Result<Reader> {
        if let Some(found) = self.shared.lookup_file(path) {
            return found;
        }

        let _opening = self.shared.open_lock.lock();
        if let Some(found) = self.shared.lookup_file(path) {
            return found;
        }

        let opened = self
            .shared
            .open_stream(path)
            .and_then(|stream| ReaderInner::open(path, stream));

        match opened {
            Ok(inner) => {
                let inner = Arc::new(inner);
                let id = self.shared.with_state(|st| {
                    let id = st.insert_file(path, inner.clone());
                    st.purge_files();
                    id
                });
                info!(
                    path,
                    faces = inner.num_faces(),
                    levels = inner.num_levels(),
                    "Opened texture"
                );
                Ok(Reader::new(Handle::adopt(self.shared.clone(), id), inner))
            }
            Err(e) => {
                error!(path, error = %e, "Failed to open texture");
                self.shared
                    .with_state(|st| st.mark_failed(path, e.to_string()));
                Err(match e {
                    Error::Io(io) => Error::OpenFailed {
                        path: path.to_string(),
                        reason: io.to_string(),
                    },
                    other => other,
                })
            }
        }
    }

    /// Detach `path` from the file table
    ///
    /// An unreferenced file is destroyed immediately; a referenced one lives
    /// until its last handle is released. Failed opens are forgotten.
    pub fn purge(&self, path: &str) -> bool {
        self.shared.with_state(|st| st.purge_path(path))
    }

    /// Detach every file from the file table
    pub fn purge_all(&self) {
        debug!("Purging all files");
        self.shared.with_state(|st| st.purge_all());
    }

    /// Change the open-file limit, evicting as needed
    pub fn set_max_files(&self, max_files: usize) -> Result<()> {
        if max_files == 0 {
            return Err(Error::Config("max_files must be at least 1".into()));
        }
        self.shared.with_state(|st| {
            let mut limits = st.limits();
            limits.max_files = max_files;
            limits.min_data_count = (10 * max_files).min(MAX_MIN_DATA_COUNT);
            st.set_limits(limits);
        });
        Ok(())
    }

    /// Change the unused-data budget, evicting as needed
    pub fn set_max_mem(&self, max_mem: usize) -> Result<()> {
        if max_mem == 0 {
            return Err(Error::Config("max_mem must be at least 1 byte".into()));
        }
        self.shared.with_state(|st| {
            let mut limits = st.limits();
            limits.max_mem = max_mem;
            st.set_limits(limits);
        });
        Ok(())
    }

    /// Occupancy and counters
    pub fn stats(&self) -> CacheStats {
        let counters = self.shared.metrics.snapshot();
        self.shared.with_state(|st| {
            let limits = st.limits();
            CacheStats {
                open_files: st.open_files(),
                unused_files: st.unused_files(),
                unused_data_count: st.unused_data_count(),
                unused_data_size: st.unused_data_size(),
                tracked_objects: st.tracked_objects(),
                max_files: limits.max_files,
                max_mem: limits.max_mem,
                min_data_count: limits.min_data_count,
                counters,
            }
        })
    }

    /// Live counters
    pub fn metrics(&self) -> &CacheMetrics {
        &self.shared.metrics
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache").field("stats", &self.stats()).finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
