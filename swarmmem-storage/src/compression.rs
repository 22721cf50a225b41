//! Payload compression. Applied by the facade's `set` path when a plaintext
//! exceeds `SwarmMemConfig::compression_threshold_bytes`, before encryption
//! (ciphertext does not compress).

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use swarmmem_core::Compression;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum CompressionError {
    #[error("lz4 decompression failed: {reason}")]
    Lz4 { reason: String },
    #[error("gzip compression failed: {reason}")]
    Gzip { reason: String },
}

pub fn compress(mode: Compression, plaintext: &[u8]) -> Result<Vec<u8>, CompressionError> {
    match mode {
        Compression::None => Ok(plaintext.to_vec()),
        Compression::Lz4 => Ok(lz4_flex::compress_prepend_size(plaintext)),
        Compression::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder
                .write_all(plaintext)
                .map_err(|e| CompressionError::Gzip { reason: e.to_string() })?;
            encoder
                .finish()
                .map_err(|e| CompressionError::Gzip { reason: e.to_string() })
        }
    }
}

pub fn decompress(mode: Compression, payload: &[u8]) -> Result<Vec<u8>, CompressionError> {
    match mode {
        Compression::None => Ok(payload.to_vec()),
        Compression::Lz4 => lz4_flex::decompress_size_prepended(payload)
            .map_err(|e| CompressionError::Lz4 { reason: e.to_string() }),
        Compression::Gzip => {
            let mut decoder = GzDecoder::new(payload);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| CompressionError::Gzip { reason: e.to_string() })?;
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_is_identity() {
        let data = b"hello world";
        assert_eq!(compress(Compression::None, data).unwrap(), data);
        assert_eq!(decompress(Compression::None, data).unwrap(), data);
    }

    #[test]
    fn test_lz4_roundtrip() {
        let data = b"the quick brown fox jumps over the lazy dog".repeat(20);
        let compressed = compress(Compression::Lz4, &data).unwrap();
        assert_eq!(decompress(Compression::Lz4, &compressed).unwrap(), data);
    }

    #[test]
    fn test_gzip_roundtrip() {
        let data = b"the quick brown fox jumps over the lazy dog".repeat(20);
        let compressed = compress(Compression::Gzip, &data).unwrap();
        assert_eq!(decompress(Compression::Gzip, &compressed).unwrap(), data);
    }

    #[test]
    fn test_lz4_rejects_corrupt_input() {
        assert!(decompress(Compression::Lz4, &[0xff, 0xff, 0xff]).is_err());
    }
}
