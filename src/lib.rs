//! ptex-cache - Bounded Texture Cache for Per-Face Textures
//!
//! A shared, thread-safe cache and lazy reader for Ptex-style texture files:
//! each mesh face carries its own texel grid plus stored mip levels, and the
//! cache pages face blocks, tiles, reductions and metadata in on demand
//! while holding open files and memory under configured limits.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                             Cache                                │
//! │  ┌────────────┐   ┌──────────────────┐   ┌──────────────────┐    │
//! │  │ File table │──▶│ Reader (per file)│──▶│ Levels / Faces / │    │
//! │  │ path → obj │   │ header, sections │   │ Tiles/Reductions │    │
//! │  └────────────┘   └──────────────────┘   │ Metadata         │    │
//! │        ▲                                 └──────────────────┘    │
//! │        └──────── LRU eviction (max files, max memory) ◀──────────┤
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`cache`] - Cache core, file table, eviction and counters
//! - [`compression`] - zlib block codec
//! - [`error`] - Error types
//! - [`face`] - Face data handles (constant, packed, tiled, reduced)
//! - [`format`] - On-disk records
//! - [`io`] - Input handler seam and block reading
//! - [`metadata`] - Per-file key/value metadata
//! - [`pixel`] - Pixel format utilities
//! - [`reader`] - Lazy per-file reader and resolution policy

pub mod cache;
pub mod compression;
pub mod error;
pub mod face;
pub mod format;
pub mod io;
pub mod metadata;
pub mod pixel;
pub mod reader;

// Re-export commonly used types
pub use cache::{Cache, CacheConfig, CacheStats, MetricsSnapshot};
pub use compression::{Compressor, ZlibCompressor};
pub use error::{Error, Result};
pub use face::FaceData;
pub use format::{BorderMode, DataType, FaceInfo, MeshType, Res};
pub use io::{FsInputHandler, InputHandler, InputStream, MemoryInputHandler};
pub use metadata::{MetaData, MetaDataType, MetaValue};
pub use reader::{Reader, ReaderStats, Sections};
