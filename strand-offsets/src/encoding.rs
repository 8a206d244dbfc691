//! Encoding strategy tags and their magic bytes.

use std::fmt;

use crate::error::{OffsetError, OffsetResult};

/// Width of the length or run fields in an encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Version {
    /// 16-bit fields. Overflows beyond 32,767 offsets.
    V1,
    /// 32-bit fields.
    V2,
}

impl Version {
    /// Largest value a length or run field can hold.
    #[must_use]
    pub const fn max_field(self) -> u64 {
        match self {
            // Fields are signed on the wire.
            Self::V1 => i16::MAX as u64,
            Self::V2 => i32::MAX as u64,
        }
    }

    /// Bytes per length or run field.
    #[must_use]
    pub const fn field_width(self) -> usize {
        match self {
            Self::V1 => 2,
            Self::V2 => 4,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V1 => write!(f, "v1"),
            Self::V2 => write!(f, "v2"),
        }
    }
}

/// A wire encoding, identified by its leading magic byte.
///
/// Declaration order is the tie-break order when two strategies produce
/// payloads of equal size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OffsetEncoding {
    /// One byte per offset. Decode only.
    ByteArray,
    /// Compressed [`Self::ByteArray`]. Decode only.
    ByteArrayCompressed,
    /// Bit per offset with a 16-bit length prefix.
    BitSet,
    /// Compressed [`Self::BitSet`].
    BitSetCompressed,
    /// Alternating 16-bit run lengths.
    RunLength,
    /// Compressed [`Self::RunLength`].
    RunLengthCompressed,
    /// Bit per offset with a 32-bit length prefix.
    BitSetV2,
    /// Compressed [`Self::BitSetV2`].
    BitSetV2Compressed,
    /// Alternating 32-bit run lengths.
    RunLengthV2,
    /// Compressed [`Self::RunLengthV2`].
    RunLengthV2Compressed,
    /// Kafka Streams metadata, never produced here.
    KafkaStreams,
    /// Kafka Streams v2 metadata, never produced here.
    KafkaStreamsV2,
}

impl OffsetEncoding {
    /// All encodings, in tie-break order.
    pub const ALL: [Self; 12] = [
        Self::ByteArray,
        Self::ByteArrayCompressed,
        Self::BitSet,
        Self::BitSetCompressed,
        Self::RunLength,
        Self::RunLengthCompressed,
        Self::BitSetV2,
        Self::BitSetV2Compressed,
        Self::RunLengthV2,
        Self::RunLengthV2Compressed,
        Self::KafkaStreams,
        Self::KafkaStreamsV2,
    ];

    /// Returns the leading tag byte.
    #[must_use]
    pub const fn magic(self) -> u8 {
        match self {
            Self::ByteArray => b'L',
            Self::ByteArrayCompressed => 0xEE,
            Self::BitSet => b'l',
            Self::BitSetCompressed => b'a',
            Self::RunLength => b'n',
            Self::RunLengthCompressed => b'J',
            Self::BitSetV2 => b'o',
            Self::BitSetV2Compressed => b's',
            Self::RunLengthV2 => b'e',
            Self::RunLengthV2Compressed => b'p',
            Self::KafkaStreams => 1,
            Self::KafkaStreamsV2 => 2,
        }
    }

    /// Looks up an encoding by its magic byte.
    ///
    /// # Errors
    /// Returns `UnknownMagic` if no encoding uses this byte.
    pub fn from_magic(magic: u8) -> OffsetResult<Self> {
        Self::ALL
            .into_iter()
            .find(|e| e.magic() == magic)
            .ok_or(OffsetError::UnknownMagic { magic })
    }

    /// Returns the field width version.
    #[must_use]
    pub const fn version(self) -> Version {
        match self {
            Self::ByteArray
            | Self::ByteArrayCompressed
            | Self::BitSet
            | Self::BitSetCompressed
            | Self::RunLength
            | Self::RunLengthCompressed
            | Self::KafkaStreams => Version::V1,
            Self::BitSetV2
            | Self::BitSetV2Compressed
            | Self::RunLengthV2
            | Self::RunLengthV2Compressed
            | Self::KafkaStreamsV2 => Version::V2,
        }
    }

    /// Returns true if the payload is gzip compressed.
    #[must_use]
    pub const fn is_compressed(self) -> bool {
        matches!(
            self,
            Self::ByteArrayCompressed
                | Self::BitSetCompressed
                | Self::RunLengthCompressed
                | Self::BitSetV2Compressed
                | Self::RunLengthV2Compressed
        )
    }

    /// Returns the compressed sibling, if this encoding has one.
    #[must_use]
    pub const fn compressed(self) -> Option<Self> {
        match self {
            Self::ByteArray => Some(Self::ByteArrayCompressed),
            Self::BitSet => Some(Self::BitSetCompressed),
            Self::RunLength => Some(Self::RunLengthCompressed),
            Self::BitSetV2 => Some(Self::BitSetV2Compressed),
            Self::RunLengthV2 => Some(Self::RunLengthV2Compressed),
            _ => None,
        }
    }

    /// Returns the uncompressed form of this encoding.
    #[must_use]
    pub const fn uncompressed(self) -> Self {
        match self {
            Self::ByteArrayCompressed => Self::ByteArray,
            Self::BitSetCompressed => Self::BitSet,
            Self::RunLengthCompressed => Self::RunLength,
            Self::BitSetV2Compressed => Self::BitSetV2,
            Self::RunLengthV2Compressed => Self::RunLengthV2,
            other => other,
        }
    }

    /// Returns true for metadata written by Kafka Streams.
    #[must_use]
    pub const fn is_foreign(self) -> bool {
        matches!(self, Self::KafkaStreams | Self::KafkaStreamsV2)
    }
}

impl fmt::Display for OffsetEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
