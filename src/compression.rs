//! Block Compression
//!
//! Every compressed section of a texture file (face info table, constant
//! pixel table, level headers, face blocks, metadata) is a zlib stream
//! whose inflated size is known up front.
//!
//! # Example
//!
//! ```
//! use ptex_cache::compression::{Compressor, ZlibCompressor};
//!
//! let codec = ZlibCompressor::new();
//! let data = b"texel texel texel texel texel texel";
//! let packed = codec.compress(data).unwrap();
//! let unpacked = codec.decompress(&packed, data.len()).unwrap();
//! assert_eq!(unpacked.as_slice(), data);
//! ```

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::{Error, Result};

/// Upper bound on how far deflate can expand its input
pub const MAX_INFLATE_RATIO: usize = 1032;

// =============================================================================
// Compressor Trait
// =============================================================================

/// Codec for sized compressed blocks
pub trait Compressor: Send + Sync {
    /// Human-readable codec name
    fn name(&self) -> &'static str;

    /// Compress data
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Decompress data that must inflate to exactly `expected_len` bytes
    fn decompress(&self, data: &[u8], expected_len: usize) -> Result<Vec<u8>>;
}

// =============================================================================
// Zlib Compressor
// =============================================================================

/// zlib codec used by the on-disk format
#[derive(Debug, Clone, Copy)]
pub struct ZlibCompressor {
    level: u32,
}

impl ZlibCompressor {
    /// Create with the default compression level
    pub fn new() -> Self {
        Self { level: 6 }
    }

    /// Create with a custom compression level (0-9)
    pub fn with_level(level: u32) -> Self {
        Self {
            level: level.min(9),
        }
    }
}

impl Default for ZlibCompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl Compressor for ZlibCompressor {
    fn name(&self) -> &'static str {
        "zlib"
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(self.level));
        encoder.write_all(data)?;
        Ok(encoder.finish()?)
    }

    fn decompress(&self, data: &[u8], expected_len: usize) -> Result<Vec<u8>> {
        if expected_len > data.len().saturating_mul(MAX_INFLATE_RATIO) {
            return Err(Error::DecompressionFailed {
                reason: format!(
                    "{} compressed bytes cannot inflate to {}",
                    data.len(),
                    expected_len
                ),
            });
        }
        let mut out = Vec::with_capacity(expected_len);
        // One extra byte lets an oversized stream be detected.
        let mut decoder = ZlibDecoder::new(data).take(expected_len as u64 + 1);
        decoder
            .read_to_end(&mut out)
            .map_err(|e| Error::DecompressionFailed {
                reason: e.to_string(),
            })?;
        if out.len() != expected_len {
            return Err(Error::DecompressionFailed {
                reason: format!(
                    "inflated to {} bytes, expected {}",
                    out.len().min(expected_len + 1),
                    expected_len
                ),
            });
        }
        Ok(out)
    }
}

/// Inflate a sized zlib block with the default codec
pub fn inflate(data: &[u8], expected_len: usize) -> Result<Vec<u8>> {
    ZlibCompressor::new().decompress(data, expected_len)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const TEST_DATA: &[u8] = b"constant texels compress well. \
        constant texels compress well. constant texels compress well.";

    #[test]
    fn test_zlib_roundtrip() {
        let codec = ZlibCompressor::new();
        let packed = codec.compress(TEST_DATA).unwrap();
        assert!(packed.len() < TEST_DATA.len());
        assert_eq!(codec.decompress(&packed, TEST_DATA.len()).unwrap(), TEST_DATA);
    }

    #[test]
    fn test_impossible_expansion_is_rejected_up_front() {
        let codec = ZlibCompressor::new();
        let packed = codec.compress(TEST_DATA).unwrap();
        assert_matches!(
            codec.decompress(&packed, usize::MAX / 2),
            Err(Error::DecompressionFailed { .. })
        );
        assert_matches!(codec.decompress(&[], 1), Err(Error::DecompressionFailed { .. }));
    }

    #[test]
    fn test_size_mismatch_is_rejected() {
        let codec = ZlibCompressor::new();
        let packed = codec.compress(TEST_DATA).unwrap();
        assert_matches!(
            codec.decompress(&packed, TEST_DATA.len() - 1),
            Err(Error::DecompressionFailed { .. })
        );
        assert_matches!(
            codec.decompress(&packed, TEST_DATA.len() + 1),
            Err(Error::DecompressionFailed { .. })
        );
    }

    #[test]
    fn test_garbage_stream_is_rejected() {
        assert_matches!(
            inflate(&[0xde, 0xad, 0xbe, 0xef], 16),
            Err(Error::DecompressionFailed { .. })
        );
    }

    #[test]
    fn test_level_is_clamped() {
        let codec = ZlibCompressor::with_level(42);
        assert_eq!(codec.level, 9);
        assert_eq!(codec.name(), "zlib");
    }
}
