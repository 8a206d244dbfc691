//! A strategy tag paired with its payload, and the wire framing around it.

use bytes::{BufMut, Bytes, BytesMut};
use strand_core::Offset;

use crate::compression::decompress;
use crate::encoding::OffsetEncoding;
use crate::error::{OffsetError, OffsetResult};
use crate::types::HighestOffsetAndIncompletes;
use crate::{bitset, byte_array, run_length};

/// The output of one encoder: which strategy, and the bytes it produced.
///
/// The wire form is the magic byte of the encoding followed by the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedOffsetPair {
    encoding: OffsetEncoding,
    payload: Bytes,
}

impl EncodedOffsetPair {
    /// Pairs an encoding with its payload.
    #[must_use]
    pub const fn new(encoding: OffsetEncoding, payload: Bytes) -> Self {
        Self { encoding, payload }
    }

    /// Returns the encoding.
    #[must_use]
    pub const fn encoding(&self) -> OffsetEncoding {
        self.encoding
    }

    /// Returns the payload, without magic byte.
    #[must_use]
    pub const fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Payload size in bytes; what strategy selection compares.
    #[must_use]
    pub fn size(&self) -> usize {
        self.payload.len()
    }

    /// Frames the pair for the wire.
    #[must_use]
    pub fn to_wire(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(1 + self.payload.len());
        buf.put_u8(self.encoding.magic());
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Splits wire bytes into encoding and payload.
    ///
    /// # Errors
    /// Returns `Empty` for zero bytes and `UnknownMagic` for an unrecognised tag.
    pub fn from_wire(wire: &[u8]) -> OffsetResult<Self> {
        let (&magic, payload) = wire.split_first().ok_or(OffsetError::Empty)?;
        let encoding = OffsetEncoding::from_magic(magic)?;
        Ok(Self::new(encoding, Bytes::copy_from_slice(payload)))
    }

    /// Decodes the payload back into highest-seen and incomplete offsets.
    ///
    /// # Errors
    /// Returns `UnsupportedEncoding` for foreign formats, or a decode error if
    /// the payload is malformed.
    pub fn decode(&self, base: Offset) -> OffsetResult<HighestOffsetAndIncompletes> {
        if self.encoding.is_foreign() {
            return Err(OffsetError::UnsupportedEncoding {
                encoding: self.encoding,
            });
        }
        let inflated;
        let payload: &[u8] = if self.encoding.is_compressed() {
            inflated = decompress(&self.payload)?;
            &inflated
        } else {
            &self.payload
        };

        let encoding = self.encoding.uncompressed();
        match encoding {
            OffsetEncoding::ByteArray => Ok(byte_array::decode(base, payload)),
            OffsetEncoding::BitSet | OffsetEncoding::BitSetV2 => {
                bitset::decode(encoding, base, payload)
            }
            OffsetEncoding::RunLength | OffsetEncoding::RunLengthV2 => {
                run_length::decode(encoding, base, payload)
            }
            other => Err(OffsetError::UnsupportedEncoding { encoding: other }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::compress;

    #[test]
    fn test_wire_framing() {
        let pair = EncodedOffsetPair::new(OffsetEncoding::BitSetV2, Bytes::from_static(&[0, 0, 0, 1, 1]));
        let wire = pair.to_wire();
        assert_eq!(wire[0], b'o');
        assert_eq!(wire.len(), pair.size() + 1);
        assert_eq!(EncodedOffsetPair::from_wire(&wire).unwrap(), pair);
    }

    #[test]
    fn test_from_wire_rejects_empty_and_unknown() {
        assert_eq!(EncodedOffsetPair::from_wire(&[]), Err(OffsetError::Empty));
        assert_eq!(
            EncodedOffsetPair::from_wire(&[b'?', 1, 2]),
            Err(OffsetError::UnknownMagic { magic: b'?' })
        );
    }

    #[test]
    fn test_decode_compressed_payload() {
        // Run-length v1: 2 incomplete, 3 complete.
        let raw = [0, 2, 0, 3];
        let pair = EncodedOffsetPair::new(
            OffsetEncoding::RunLengthCompressed,
            compress(&raw).unwrap(),
        );
        let decoded = pair.decode(Offset::new(7)).unwrap();
        assert_eq!(decoded.highest_seen, Some(Offset::new(11)));
        assert_eq!(decoded.incompletes.iter().collect::<Vec<_>>(), vec![7, 8]);
    }

    #[test]
    fn test_decode_foreign_is_unsupported() {
        let pair = EncodedOffsetPair::new(OffsetEncoding::KafkaStreams, Bytes::new());
        assert_eq!(
            pair.decode(Offset::new(0)),
            Err(OffsetError::UnsupportedEncoding {
                encoding: OffsetEncoding::KafkaStreams
            })
        );
    }

    #[test]
    fn test_decode_legacy_byte_array() {
        let pair = EncodedOffsetPair::new(OffsetEncoding::ByteArray, Bytes::from_static(&[1, 0]));
        let decoded = pair.decode(Offset::new(3)).unwrap();
        assert_eq!(decoded.incompletes.iter().collect::<Vec<_>>(), vec![4]);
    }
}
