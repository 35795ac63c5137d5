//! Texture Reader
//!
//! One [`Reader`] per open file. Opening parses the header, section
//! offsets, face table, constant pixel table, level directory and edit
//! records; levels, face blocks, tiles, reductions and metadata are loaded
//! lazily on first request and tracked by the cache.
//!
//! # Locks
//!
//! - `read_lock` serializes stream access for this file only
//! - `reduce_lock` serializes reduction and blend synthesis for this file
//!
//! Both are taken before the cache lock, never after it.

mod data;
pub(crate) mod level;
pub(crate) mod open;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::error;

use crate::cache::Handle;
use crate::error::{Error, Result};
use crate::format::{
    BorderMode, DataType, ExtHeader, FaceDataHeader, FaceInfo, Header, LevelInfo, MeshType,
};
use crate::io::BlockReader;

// =============================================================================
// Sections
// =============================================================================

/// Absolute file offsets of each section
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Sections {
    pub face_info_pos: u64,
    pub const_data_pos: u64,
    pub level_info_pos: u64,
    pub level_data_pos: u64,
    pub metadata_pos: u64,
    pub lmd_header_pos: u64,
    pub lmd_data_pos: u64,
    pub edit_data_pos: u64,
}

/// Replacement level-0 block for an edited face
#[derive(Debug, Clone, Copy)]
pub(crate) struct FaceEdit {
    pub pos: u64,
    pub face_id: u32,
    pub fdh: FaceDataHeader,
}

/// Location of an edited metadata block
#[derive(Debug, Clone, Copy)]
pub(crate) struct MetaEdit {
    pub pos: u64,
    pub zip_size: u32,
    pub mem_size: u32,
}

// =============================================================================
// Reader Metrics
// =============================================================================

/// Per-reader counters
#[derive(Debug, Default)]
pub struct ReaderMetrics {
    block_reads: AtomicU64,
    bytes_read: AtomicU64,
    level_loads: AtomicU64,
    face_loads: AtomicU64,
    tile_loads: AtomicU64,
    reductions: AtomicU64,
    blends: AtomicU64,
    metadata_reads: AtomicU64,
}

impl ReaderMetrics {
    pub(crate) fn record_read(&self, bytes: usize) {
        self.block_reads.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_level_load(&self) {
        self.level_loads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_face_load(&self) {
        self.face_loads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_tile_load(&self) {
        self.tile_loads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reduction(&self) {
        self.reductions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_blend(&self) {
        self.blends.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_metadata_read(&self) {
        self.metadata_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ReaderStats {
        ReaderStats {
            block_reads: self.block_reads.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            level_loads: self.level_loads.load(Ordering::Relaxed),
            face_loads: self.face_loads.load(Ordering::Relaxed),
            tile_loads: self.tile_loads.load(Ordering::Relaxed),
            reductions: self.reductions.load(Ordering::Relaxed),
            blends: self.blends.load(Ordering::Relaxed),
            metadata_reads: self.metadata_reads.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of per-reader counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReaderStats {
    pub block_reads: u64,
    pub bytes_read: u64,
    pub level_loads: u64,
    pub face_loads: u64,
    pub tile_loads: u64,
    pub reductions: u64,
    pub blends: u64,
    pub metadata_reads: u64,
}

// =============================================================================
// Reader State
// =============================================================================

/// Parsed, immutable state of one open file plus its locks
pub(crate) struct ReaderInner {
    pub(crate) path: String,
    pub(crate) header: Header,
    pub(crate) ext: ExtHeader,
    pub(crate) mesh_type: MeshType,
    pub(crate) data_type: DataType,
    pub(crate) pixel_size: usize,
    pub(crate) sections: Sections,
    pub(crate) face_info: Vec<FaceInfo>,
    /// Resolution-ordered id of each face
    pub(crate) rface_ids: Vec<u32>,
    pub(crate) const_data: Vec<u8>,
    pub(crate) level_info: Vec<LevelInfo>,
    pub(crate) level_pos: Vec<u64>,
    pub(crate) face_edits: Vec<FaceEdit>,
    pub(crate) meta_edits: Vec<MetaEdit>,
    pub(crate) has_edits: bool,
    pub(crate) read_lock: Mutex<BlockReader>,
    pub(crate) reduce_lock: Mutex<()>,
    failed: AtomicBool,
    last_error: Mutex<Option<String>>,
    pub(crate) metrics: ReaderMetrics,
}

impl ReaderInner {
    pub(crate) fn num_faces(&self) -> u32 {
        self.header.nfaces
    }

    pub(crate) fn num_levels(&self) -> u16 {
        self.header.nlevels
    }

    pub(crate) fn num_channels(&self) -> usize {
        self.header.nchannels as usize
    }

    pub(crate) fn face(&self, face_id: u32) -> Result<&FaceInfo> {
        self.face_info
            .get(face_id as usize)
            .ok_or(Error::FaceOutOfRange {
                face_id,
                num_faces: self.header.nfaces,
            })
    }

    pub(crate) fn const_pixel(&self, face_id: u32) -> &[u8] {
        let start = face_id as usize * self.pixel_size;
        &self.const_data[start..start + self.pixel_size]
    }

    /// Fail fast once a mid-read error has been recorded
    pub(crate) fn ensure_ok(&self) -> Result<()> {
        if self.failed.load(Ordering::Acquire) {
            return Err(Error::ReaderFailed {
                path: self.path.clone(),
            });
        }
        Ok(())
    }

    /// Record a mid-read failure; data loaded earlier stays valid
    pub(crate) fn track<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            error!(path = %self.path, error = %e, "Read failed");
            *self.last_error.lock() = Some(e.to_string());
            self.failed.store(true, Ordering::Release);
        }
        result
    }

    pub(crate) fn is_ok(&self) -> bool {
        !self.failed.load(Ordering::Acquire)
    }

    pub(crate) fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }
}

impl std::fmt::Debug for ReaderInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaderInner")
            .field("path", &self.path)
            .field("mesh_type", &self.mesh_type)
            .field("data_type", &self.data_type)
            .field("nfaces", &self.header.nfaces)
            .finish()
    }
}

// =============================================================================
// Reader
// =============================================================================

/// Counted handle on an open texture file
///
/// Cloning adds a reference; dropping or [`Reader::release`] removes it.
#[derive(Clone)]
pub struct Reader {
    pub(crate) handle: Handle,
    pub(crate) inner: Arc<ReaderInner>,
}

impl Reader {
    pub(crate) fn new(handle: Handle, inner: Arc<ReaderInner>) -> Self {
        Self { handle, inner }
    }

    /// Release this reference
    pub fn release(self) {}

    /// Path the file was requested under
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    pub fn mesh_type(&self) -> MeshType {
        self.inner.mesh_type
    }

    pub fn data_type(&self) -> DataType {
        self.inner.data_type
    }

    pub fn num_channels(&self) -> usize {
        self.inner.num_channels()
    }

    /// Alpha channel index, if the texture has one
    pub fn alpha_channel(&self) -> Option<usize> {
        let alpha = self.inner.header.alpha_chan;
        (alpha >= 0).then_some(alpha as usize)
    }

    pub fn num_faces(&self) -> u32 {
        self.inner.num_faces()
    }

    pub fn num_levels(&self) -> u16 {
        self.inner.num_levels()
    }

    /// Bytes per pixel
    pub fn pixel_size(&self) -> usize {
        self.inner.pixel_size
    }

    /// True when any edit record was applied
    pub fn has_edits(&self) -> bool {
        self.inner.has_edits
    }

    /// True when reduced levels are stored
    pub fn has_mip_maps(&self) -> bool {
        self.inner.header.nlevels > 1
    }

    pub fn u_border_mode(&self) -> BorderMode {
        BorderMode::from_u32(self.inner.ext.u_border_mode)
    }

    pub fn v_border_mode(&self) -> BorderMode {
        BorderMode::from_u32(self.inner.ext.v_border_mode)
    }

    /// Resolution, adjacency and flags of `face_id`
    pub fn face_info(&self, face_id: u32) -> Result<FaceInfo> {
        self.inner.face(face_id).copied()
    }

    /// Absolute section offsets
    pub fn sections(&self) -> Sections {
        self.inner.sections
    }

    /// False once a mid-read failure has been recorded
    pub fn is_ok(&self) -> bool {
        self.inner.is_ok()
    }

    /// Message of the most recent mid-read failure
    pub fn last_error(&self) -> Option<String> {
        self.inner.last_error()
    }

    /// Per-reader counters
    pub fn stats(&self) -> ReaderStats {
        self.inner.metrics.snapshot()
    }
}

impl std::fmt::Debug for Reader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reader")
            .field("path", &self.inner.path)
            .field("handle", &self.handle)
            .finish()
    }
}
