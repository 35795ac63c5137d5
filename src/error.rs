//! Error types for the texture cache

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while opening or reading cached textures
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // =========================================================================
    // Open Errors
    // =========================================================================
    /// Opening a file failed
    #[error("Failed to open {path}: {reason}")]
    OpenFailed { path: String, reason: String },

    /// A previous open attempt on this path failed and was not purged
    #[error("Previous open of {path} failed; purge the path to retry")]
    PreviouslyFailed { path: String },

    /// Not a texture file
    #[error("Bad magic number {0:#010x}")]
    BadMagic(u32),

    /// File version is not supported
    #[error("Unsupported file version {0}")]
    UnsupportedVersion(u32),

    /// Host byte order is not little-endian
    #[error("Big-endian hosts are not supported")]
    UnsupportedEndianness,

    /// Header fields are out of range
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    // =========================================================================
    // Read Errors
    // =========================================================================
    /// Fewer bytes were available than a block declared
    #[error("Unexpected end of file at offset {pos}")]
    Truncated { pos: u64 },

    /// A zlib block failed to inflate
    #[error("Decompression failed: {reason}")]
    DecompressionFailed { reason: String },

    /// A decoded block is structurally invalid
    #[error("Corrupt data: {0}")]
    CorruptData(String),

    /// The reader saw an earlier mid-read failure
    #[error("Reader for {path} is in a failed state")]
    ReaderFailed { path: String },

    // =========================================================================
    // Contract Violations
    // =========================================================================
    /// Face id outside the face table
    #[error("Face id {face_id} out of range (file has {num_faces} faces)")]
    FaceOutOfRange { face_id: u32, num_faces: u32 },

    /// Tile index outside a tiled face
    #[error("Tile {index} out of range (face has {num_tiles} tiles)")]
    TileOutOfRange { index: usize, num_tiles: usize },

    /// Texel coordinates outside a face
    #[error("Texel ({u}, {v}) outside {ures}x{vres} face")]
    PixelOutOfRange {
        u: usize,
        v: usize,
        ures: usize,
        vres: usize,
    },

    /// Requested resolution is larger than the stored face
    #[error("Enlargement of face {face_id} to {ulog2}x{vlog2} (log2) not supported")]
    EnlargementNotSupported { face_id: u32, ulog2: i8, vlog2: i8 },

    /// Requested resolution is smaller than a blended half level
    #[error("Reduction of face {face_id} below one texel ({ulog2}x{vlog2} log2) not supported")]
    SubTexelReduction { face_id: u32, ulog2: i8, vlog2: i8 },

    /// Triangle faces only reduce symmetrically
    #[error("Anisotropic reduction of triangle face {face_id} not supported")]
    AnisotropicTriangleReduction { face_id: u32 },

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}
