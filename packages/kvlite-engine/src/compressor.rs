//! Streaming compression (C3, §4.3).

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use kvlite_core::{KvLiteError, KvLiteResult};

/// Streaming compress/decompress over byte buffers.
///
/// Used only via scoped wrapping (the caller writes into the wrapper, then
/// finalizes it) so the underlying stream is flushed before the outer
/// buffer is read, mirroring spec.md's "used only via scoped acquisition"
/// requirement for the compressor/pool pairing.
pub trait Compressor: Send + Sync {
    /// Compresses `input` into a fresh buffer.
    fn compress(&self, input: &[u8]) -> KvLiteResult<Vec<u8>>;

    /// Decompresses `input` into a fresh buffer.
    fn decompress(&self, input: &[u8]) -> KvLiteResult<Vec<u8>>;
}

/// Gzip-based compressor (`flate2`).
#[derive(Debug, Clone, Copy, Default)]
pub struct GzipCompressor;

impl Compressor for GzipCompressor {
    fn compress(&self, input: &[u8]) -> KvLiteResult<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(input)
            .map_err(|e| KvLiteError::Serialization(e.into()))?;
        encoder
            .finish()
            .map_err(|e| KvLiteError::Serialization(e.into()))
    }

    fn decompress(&self, input: &[u8]) -> KvLiteResult<Vec<u8>> {
        let mut decoder = GzDecoder::new(input);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| KvLiteError::Serialization(e.into()))?;
        Ok(out)
    }
}

/// Identity compressor, used in tests to isolate compression from the
/// behavior under test.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCompressor;

impl Compressor for NoopCompressor {
    fn compress(&self, input: &[u8]) -> KvLiteResult<Vec<u8>> {
        Ok(input.to_vec())
    }

    fn decompress(&self, input: &[u8]) -> KvLiteResult<Vec<u8>> {
        Ok(input.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gzip_round_trips() {
        let compressor = GzipCompressor;
        let input = b"the quick brown fox jumps over the lazy dog".repeat(50);
        let compressed = compressor.compress(&input).unwrap();
        let decompressed = compressor.decompress(&compressed).unwrap();
        assert_eq!(decompressed, input);
    }

    #[test]
    fn gzip_shrinks_repetitive_data() {
        let compressor = GzipCompressor;
        let input = vec![b'x'; 8192];
        let compressed = compressor.compress(&input).unwrap();
        assert!(compressed.len() < input.len());
    }

    #[test]
    fn gzip_decompress_rejects_garbage() {
        let compressor = GzipCompressor;
        assert!(compressor.decompress(b"not gzip data").is_err());
    }

    #[test]
    fn noop_round_trips_unchanged() {
        let compressor = NoopCompressor;
        let input = b"raw bytes".to_vec();
        assert_eq!(compressor.compress(&input).unwrap(), input);
        assert_eq!(compressor.decompress(&input).unwrap(), input);
    }
}
