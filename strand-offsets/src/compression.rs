//! Gzip wrapping for encoded payloads.

use std::io::{Read, Write};

use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{NotViable, OffsetError, OffsetResult};

/// Compresses an uncompressed strategy payload.
///
/// # Errors
/// Returns `NotViable::Compression` if the encoder fails.
pub fn compress(payload: &[u8]) -> Result<Bytes, NotViable> {
    let not_viable = |e: std::io::Error| NotViable::Compression {
        message: e.to_string(),
    };
    let mut encoder = GzEncoder::new(Vec::with_capacity(payload.len() / 2 + 32), Compression::best());
    encoder.write_all(payload).map_err(not_viable)?;
    encoder.finish().map(Bytes::from).map_err(not_viable)
}

/// Inflates a compressed payload.
///
/// # Errors
/// Returns `OffsetError::Decompression` if the data is not valid gzip.
pub fn decompress(payload: &[u8]) -> OffsetResult<Bytes> {
    let mut decoder = GzDecoder::new(payload);
    let mut out = Vec::with_capacity(payload.len() * 4);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| OffsetError::Decompression {
            message: e.to_string(),
        })?;
    Ok(Bytes::from(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compress_decompress() {
        let payload = vec![0xAB_u8; 1024];
        let compressed = compress(&payload).unwrap();
        assert!(compressed.len() < payload.len());
        assert_eq!(decompress(&compressed).unwrap().as_ref(), payload.as_slice());
    }

    #[test]
    fn test_decompress_garbage_fails() {
        let err = decompress(b"not gzip").unwrap_err();
        assert!(matches!(err, OffsetError::Decompression { .. }));
    }
}
