use crate::error::CompressionError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;
use tracing::debug;

/// Compression algorithm selection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    /// No compression
    None,
    /// zlib/deflate (default, readable by other zlib-based clients)
    #[default]
    Zlib,
    /// LZ4 - Fast compression/decompression
    Lz4,
    /// Zstandard - Better compression ratio
    Zstd,
}

impl CompressionAlgorithm {
    /// Build the compressor for this algorithm (`None` for [`CompressionAlgorithm::None`])
    pub fn compressor(self, zstd_level: i32) -> Option<Arc<dyn Compressor>> {
        match self {
            Self::None => None,
            Self::Zlib => Some(Arc::new(ZlibCompressor::default())),
            Self::Lz4 => Some(Arc::new(Lz4Compressor::default())),
            Self::Zstd => Some(Arc::new(ZstdCompressor::new(zstd_level))),
        }
    }
}

impl fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Zlib => write!(f, "zlib"),
            Self::Lz4 => write!(f, "lz4"),
            Self::Zstd => write!(f, "zstd"),
        }
    }
}

impl std::str::FromStr for CompressionAlgorithm {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "none" | "off" => Ok(Self::None),
            "zlib" | "deflate" => Ok(Self::Zlib),
            "lz4" => Ok(Self::Lz4),
            "zstd" | "zstandard" => Ok(Self::Zstd),
            _ => Err(format!("Unknown compression algorithm: {value}")),
        }
    }
}

/// Compression strategy used by the value codec
///
/// `decompress` must fail with [`CompressionError`] when the input is not in
/// this compressor's format; the codec relies on that to read values that were
/// stored uncompressed.
pub trait Compressor: Send + Sync + fmt::Debug {
    fn algorithm(&self) -> CompressionAlgorithm;

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError>;

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError>;
}

/// zlib stream compressor
#[derive(Debug, Clone)]
pub struct ZlibCompressor {
    level: flate2::Compression,
}

impl ZlibCompressor {
    pub fn new(level: u32) -> Self {
        Self {
            level: flate2::Compression::new(level.min(9)),
        }
    }
}

impl Default for ZlibCompressor {
    fn default() -> Self {
        Self {
            level: flate2::Compression::default(),
        }
    }
}

impl Compressor for ZlibCompressor {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::Zlib
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), self.level);
        encoder
            .write_all(data)
            .map_err(|e| CompressionError::compress("zlib", e))?;
        let compressed = encoder
            .finish()
            .map_err(|e| CompressionError::compress("zlib", e))?;

        debug!(
            "zlib compressed: {} → {} bytes (ratio: {:.2}x)",
            data.len(),
            compressed.len(),
            compression_ratio(data.len(), compressed.len())
        );
        Ok(compressed)
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        let mut decoder = flate2::read::ZlibDecoder::new(data);
        let mut decompressed = Vec::new();
        decoder
            .read_to_end(&mut decompressed)
            .map_err(|e| CompressionError::decompress("zlib", e))?;

        debug!(
            "zlib decompressed: {} → {} bytes",
            data.len(),
            decompressed.len()
        );
        Ok(decompressed)
    }
}

/// LZ4 frame compressor
#[derive(Debug, Clone)]
pub struct Lz4Compressor {
    level: u32,
}

impl Lz4Compressor {
    pub fn new(level: u32) -> Self {
        Self { level }
    }
}

impl Default for Lz4Compressor {
    fn default() -> Self {
        // Fast compression
        Self { level: 4 }
    }
}

impl Compressor for Lz4Compressor {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::Lz4
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        let mut encoder = lz4::EncoderBuilder::new()
            .level(self.level)
            .build(Vec::new())
            .map_err(|e| CompressionError::compress("lz4", e))?;

        encoder
            .write_all(data)
            .map_err(|e| CompressionError::compress("lz4", e))?;
        let (compressed, result) = encoder.finish();
        result.map_err(|e| CompressionError::compress("lz4", e))?;

        debug!(
            "LZ4 compressed: {} → {} bytes (ratio: {:.2}x)",
            data.len(),
            compressed.len(),
            compression_ratio(data.len(), compressed.len())
        );
        Ok(compressed)
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        let mut decoder =
            lz4::Decoder::new(data).map_err(|e| CompressionError::decompress("lz4", e))?;
        let mut decompressed = Vec::new();
        decoder
            .read_to_end(&mut decompressed)
            .map_err(|e| CompressionError::decompress("lz4", e))?;

        debug!(
            "LZ4 decompressed: {} → {} bytes",
            data.len(),
            decompressed.len()
        );
        Ok(decompressed)
    }
}

/// Zstandard compressor
#[derive(Debug, Clone)]
pub struct ZstdCompressor {
    level: i32,
}

impl ZstdCompressor {
    pub fn new(level: i32) -> Self {
        Self { level }
    }
}

impl Default for ZstdCompressor {
    fn default() -> Self {
        // Balanced compression
        Self { level: 3 }
    }
}

impl Compressor for ZstdCompressor {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::Zstd
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        let compressed =
            zstd::encode_all(data, self.level).map_err(|e| CompressionError::compress("zstd", e))?;

        debug!(
            "Zstd compressed: {} → {} bytes (ratio: {:.2}x)",
            data.len(),
            compressed.len(),
            compression_ratio(data.len(), compressed.len())
        );
        Ok(compressed)
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        let decompressed =
            zstd::decode_all(data).map_err(|e| CompressionError::decompress("zstd", e))?;

        debug!(
            "Zstd decompressed: {} → {} bytes",
            data.len(),
            decompressed.len()
        );
        Ok(decompressed)
    }
}

fn compression_ratio(original: usize, compressed: usize) -> f64 {
    if compressed == 0 {
        return 1.0;
    }
    original as f64 / compressed as f64
}
