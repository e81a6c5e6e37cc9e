//! Gzip compression for frame payloads.
//!
//! Compression is opportunistic: the encoder keeps whichever of the
//! compressed and uncompressed forms is smaller, and the wire carries no
//! marker saying which one was chosen. The decoder therefore always tries to
//! inflate and falls back to the raw bytes when the input is not gzip.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{ChatLinkError, Result};

/// Gzip magic bytes
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Smallest possible gzip member: 10-byte header plus 8-byte trailer
const GZIP_MIN_LEN: usize = 18;

/// Default compression level (0-9)
pub const DEFAULT_LEVEL: u32 = 6;

/// Default upper bound on an inflated frame (16 MiB)
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Outcome of a lenient decompression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decompression {
    /// Input was a gzip member and inflated cleanly.
    Decompressed(Vec<u8>),
    /// Input was not gzip (or would not inflate); carried through unchanged.
    RawFallback(Vec<u8>),
}

impl Decompression {
    /// The resulting bytes, whichever path was taken
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Decompressed(bytes) | Self::RawFallback(bytes) => bytes,
        }
    }

    /// Whether inflation actually happened
    pub fn is_decompressed(&self) -> bool {
        matches!(self, Self::Decompressed(_))
    }
}

/// Gzip codec
#[derive(Debug, Clone)]
pub struct GzipCodec {
    /// Compression level (0-9)
    pub level: u32,
    /// Maximum inflated size accepted by the decoder
    pub max_output: usize,
}

impl Default for GzipCodec {
    fn default() -> Self {
        Self {
            level: DEFAULT_LEVEL,
            max_output: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl GzipCodec {
    /// Create new gzip codec with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Create codec with custom level
    pub fn with_level(level: u32) -> Self {
        Self {
            level: level.min(9),
            ..Default::default()
        }
    }

    /// Set the inflated size limit
    pub fn with_max_output(mut self, max_output: usize) -> Self {
        self.max_output = max_output;
        self
    }

    /// Compress bytes to a gzip member
    pub fn compress_bytes(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::new(self.level));
        encoder
            .write_all(data)
            .map_err(|e| ChatLinkError::Compression(e.to_string()))?;
        encoder
            .finish()
            .map_err(|e| ChatLinkError::Compression(e.to_string()))
    }

    /// Compress, keeping the input when compression does not shrink it.
    ///
    /// Returns the chosen bytes and whether they are compressed.
    pub fn compress_opportunistic(&self, data: &[u8]) -> Result<(Vec<u8>, bool)> {
        let compressed = self.compress_bytes(data)?;
        if compressed.len() < data.len() {
            Ok((compressed, true))
        } else {
            Ok((data.to_vec(), false))
        }
    }

    /// Inflate a gzip member.
    pub fn decompress_bytes(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < GZIP_MIN_LEN || data[..2] != GZIP_MAGIC {
            return Err(ChatLinkError::Compression("not a gzip member".to_string()));
        }

        let limit = self.max_output as u64;
        let mut decompressed = Vec::new();
        GzDecoder::new(data)
            .take(limit + 1)
            .read_to_end(&mut decompressed)
            .map_err(|e| ChatLinkError::Compression(e.to_string()))?;

        if decompressed.len() as u64 > limit {
            return Err(ChatLinkError::Compression(format!(
                "inflated frame exceeds {} bytes",
                self.max_output
            )));
        }
        Ok(decompressed)
    }

    /// Inflate, falling back to the input bytes when they are not gzip.
    pub fn decompress_lenient(&self, data: &[u8]) -> Decompression {
        match self.decompress_bytes(data) {
            Ok(bytes) => Decompression::Decompressed(bytes),
            Err(e) => {
                tracing::trace!(len = data.len(), error = %e, "Frame not compressed, using raw bytes");
                Decompression::RawFallback(data.to_vec())
            },
        }
    }
}
