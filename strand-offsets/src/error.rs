//! Offset encoding error types.

use thiserror::Error;

use crate::encoding::{OffsetEncoding, Version};

/// Result type for offset encoding operations.
pub type OffsetResult<T> = Result<T, OffsetError>;

/// A single strategy cannot represent its input.
///
/// Recovered locally: the simultaneous encoder drops the strategy and keeps going.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NotViable {
    /// The offset range is longer than the length prefix can describe.
    #[error("bitset {version} cannot hold {length} offsets (max {max})")]
    BitSetLength {
        /// Field width in use.
        version: Version,
        /// Requested number of offsets.
        length: u64,
        /// Largest representable length.
        max: u64,
    },

    /// A run is longer than a run field can describe.
    #[error("run-length {version} cannot hold a run of {run} (max {max})")]
    RunLength {
        /// Field width in use.
        version: Version,
        /// Length of the offending run.
        run: u64,
        /// Largest representable run.
        max: u64,
    },

    /// Compressing the uncompressed payload failed.
    #[error("compression failed: {message}")]
    Compression {
        /// Underlying I/O message.
        message: String,
    },
}

/// Errors that can occur while encoding or decoding commit metadata.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OffsetError {
    /// Every strategy failed for this input.
    #[error(
        "no encoding possible for {incompletes} incomplete offsets over {length} offsets from base {base}"
    )]
    NoEncodingPossible {
        /// Base offset of the encoded range.
        base: u64,
        /// Number of offsets in the range.
        length: u64,
        /// Number of incomplete offsets in the range.
        incompletes: u64,
    },

    /// The leading byte is not a known encoding.
    #[error("unknown encoding magic byte {magic:#04x}")]
    UnknownMagic {
        /// The byte found.
        magic: u8,
    },

    /// The encoding is known but cannot be decoded into incompletes.
    #[error("encoding {encoding} is not supported for decoding")]
    UnsupportedEncoding {
        /// The encoding found.
        encoding: OffsetEncoding,
    },

    /// Metadata had no magic byte.
    #[error("empty encoded payload")]
    Empty,

    /// The payload ended before its declared content.
    #[error("{encoding} payload truncated: needed {needed} bytes, had {available}")]
    Truncated {
        /// Encoding being decoded.
        encoding: OffsetEncoding,
        /// Bytes required.
        needed: usize,
        /// Bytes present.
        available: usize,
    },

    /// A length or run field held a negative value.
    #[error("{encoding} payload has negative field {value}")]
    NegativeField {
        /// Encoding being decoded.
        encoding: OffsetEncoding,
        /// The value read.
        value: i64,
    },

    /// The metadata string was not valid base64.
    #[error("invalid base64 metadata: {message}")]
    Base64 {
        /// Decoder message.
        message: String,
    },

    /// A compressed payload could not be inflated.
    #[error("decompression failed: {message}")]
    Decompression {
        /// Underlying I/O message.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = OffsetError::UnknownMagic { magic: 0x5a };
        assert_eq!(err.to_string(), "unknown encoding magic byte 0x5a");

        let err = NotViable::RunLength {
            version: Version::V1,
            run: 40_000,
            max: 32_767,
        };
        assert!(err.to_string().contains("v1"));
        assert!(err.to_string().contains("40000"));
    }

    #[test]
    fn test_error_equality() {
        let a = OffsetError::NoEncodingPossible {
            base: 1,
            length: 2,
            incompletes: 3,
        };
        assert_eq!(a.clone(), a);
        assert_ne!(a, OffsetError::Empty);
    }
}
