//! Pluggable value compression

mod compressor;

pub use compressor::{
    CompressionAlgorithm, Compressor, Lz4Compressor, ZlibCompressor, ZstdCompressor,
};
