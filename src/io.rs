//! Input Handlers & Block Reading
//!
//! The cache never touches the filesystem directly; every open goes through
//! an [`InputHandler`]. [`FsInputHandler`] reads from disk and
//! [`MemoryInputHandler`] serves byte buffers registered under a path,
//! counting opens per path.
//!
//! [`BlockReader`] wraps one open stream and tracks its position so that
//! sequential block reads skip redundant seeks. A reader keeps its
//! `BlockReader` behind its read lock.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::compression::inflate;
use crate::error::{Error, Result};

// =============================================================================
// Traits
// =============================================================================

/// Seekable byte stream returned by an input handler
pub trait InputStream: Read + Seek + Send {}

impl<T: Read + Seek + Send> InputStream for T {}

/// Source of texture file streams
pub trait InputHandler: Send + Sync {
    /// Open `path` for reading
    fn open(&self, path: &Path) -> io::Result<Box<dyn InputStream>>;

    /// Handler name for diagnostics
    fn name(&self) -> &'static str;
}

// =============================================================================
// Filesystem Handler
// =============================================================================

/// Buffered reads from the local filesystem
#[derive(Debug, Default, Clone, Copy)]
pub struct FsInputHandler;

impl InputHandler for FsInputHandler {
    fn open(&self, path: &Path) -> io::Result<Box<dyn InputStream>> {
        let file = File::open(path)?;
        Ok(Box::new(BufReader::with_capacity(64 * 1024, file)))
    }

    fn name(&self) -> &'static str {
        "fs"
    }
}

// =============================================================================
// In-Memory Handler
// =============================================================================

/// In-memory file store, useful for embedding and tests
#[derive(Default)]
pub struct MemoryInputHandler {
    files: RwLock<HashMap<PathBuf, Bytes>>,
    opens: RwLock<HashMap<PathBuf, Arc<AtomicU64>>>,
    total_opens: AtomicU64,
}

impl MemoryInputHandler {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the contents served for `path`
    pub fn insert(&self, path: impl Into<PathBuf>, data: impl Into<Bytes>) {
        self.files.write().insert(path.into(), data.into());
    }

    /// Remove `path`; later opens fail with `NotFound`
    pub fn remove(&self, path: impl AsRef<Path>) -> bool {
        self.files.write().remove(path.as_ref()).is_some()
    }

    /// Number of successful and failed open attempts on `path`
    pub fn open_count(&self, path: impl AsRef<Path>) -> u64 {
        self.opens
            .read()
            .get(path.as_ref())
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Open attempts across all paths
    pub fn total_opens(&self) -> u64 {
        self.total_opens.load(Ordering::SeqCst)
    }

    fn count_open(&self, path: &Path) {
        self.total_opens.fetch_add(1, Ordering::SeqCst);
        if let Some(counter) = self.opens.read().get(path) {
            counter.fetch_add(1, Ordering::SeqCst);
            return;
        }
        self.opens
            .write()
            .entry(path.to_path_buf())
            .or_default()
            .fetch_add(1, Ordering::SeqCst);
    }
}

impl InputHandler for MemoryInputHandler {
    fn open(&self, path: &Path) -> io::Result<Box<dyn InputStream>> {
        self.count_open(path);
        let data = self.files.read().get(path).cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("{} not found", path.display()))
        })?;
        Ok(Box::new(Cursor::new(data)))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

// =============================================================================
// Block Reader
// =============================================================================

/// Positioned reads over one open stream
pub struct BlockReader {
    stream: Box<dyn InputStream>,
    pos: u64,
    len: u64,
}

impl BlockReader {
    /// Wrap an open stream, measuring its length
    pub fn new(mut stream: Box<dyn InputStream>) -> Result<Self> {
        let len = stream.seek(SeekFrom::End(0))?;
        stream.seek(SeekFrom::Start(0))?;
        Ok(Self {
            stream,
            pos: 0,
            len,
        })
    }

    /// Total stream length
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Current stream position
    pub fn tell(&self) -> u64 {
        self.pos
    }

    /// Move to `pos` unless already there
    pub fn seek(&mut self, pos: u64) -> Result<()> {
        if pos != self.pos {
            self.stream.seek(SeekFrom::Start(pos))?;
            self.pos = pos;
        }
        Ok(())
    }

    /// Read exactly `len` bytes at `pos`
    pub fn read_at(&mut self, pos: u64, len: usize) -> Result<Vec<u8>> {
        self.seek(pos)?;
        self.read_next(len)
    }

    /// Read exactly `len` bytes at the current position
    pub fn read_next(&mut self, len: usize) -> Result<Vec<u8>> {
        let at = self.pos;
        if at.saturating_add(len as u64) > self.len {
            return Err(Error::Truncated { pos: at });
        }
        let mut buf = vec![0u8; len];
        if let Err(e) = self.stream.read_exact(&mut buf) {
            // Position is unknown after a short read.
            self.pos = u64::MAX;
            return Err(match e.kind() {
                io::ErrorKind::UnexpectedEof => Error::Truncated { pos: at },
                _ => Error::Io(e),
            });
        }
        self.pos = at + len as u64;
        Ok(buf)
    }

    /// Read a zlib block of `zip_size` bytes at `pos`, inflating to `mem_size`
    pub fn read_zipped(&mut self, pos: u64, zip_size: usize, mem_size: usize) -> Result<Vec<u8>> {
        let packed = self.read_at(pos, zip_size)?;
        inflate(&packed, mem_size)
    }
}

impl std::fmt::Debug for BlockReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockReader")
            .field("pos", &self.pos)
            .field("len", &self.len)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
