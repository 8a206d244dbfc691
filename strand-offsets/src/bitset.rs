//! Bit-per-offset encoding.
//!
//! Payload layout: a signed big-endian length field (16-bit for v1, 32-bit for
//! v2) followed by the bitset bytes. Bit `i` lives in byte `i / 8` at bit
//! position `i % 8`; a set bit means complete. The payload always carries
//! `ceil(length / 8)` bitset bytes, and a decoder rejects anything shorter,
//! so decoding work is bounded by the bytes actually present.
//!
//! Best when completion is scattered.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use roaring::RoaringTreemap;
use strand_core::Offset;

use crate::encoder::OffsetEncoder;
use crate::encoding::{OffsetEncoding, Version};
use crate::error::{NotViable, OffsetError, OffsetResult};
use crate::types::HighestOffsetAndIncompletes;

/// Encodes a range as one bit per offset.
#[derive(Debug)]
pub struct BitSetEncoder {
    version: Version,
    length: u64,
    bits: Vec<u8>,
    encoded: Option<Bytes>,
}

impl BitSetEncoder {
    /// Creates an encoder for a range of `length` offsets.
    ///
    /// # Errors
    /// Returns `NotViable::BitSetLength` if the length field cannot hold `length`.
    pub fn new(version: Version, length: u64) -> Result<Self, NotViable> {
        let max = version.max_field();
        if length > max {
            return Err(NotViable::BitSetLength {
                version,
                length,
                max,
            });
        }
        // Safety: length <= i32::MAX so the byte count fits in usize.
        #[allow(clippy::cast_possible_truncation)]
        let byte_len = length.div_ceil(8) as usize;
        Ok(Self {
            version,
            length,
            bits: vec![0; byte_len],
            encoded: None,
        })
    }
}

impl OffsetEncoder for BitSetEncoder {
    fn encoding(&self) -> OffsetEncoding {
        match self.version {
            Version::V1 => OffsetEncoding::BitSet,
            Version::V2 => OffsetEncoding::BitSetV2,
        }
    }

    fn encode_incomplete(&mut self, relative_offset: u64) -> Result<(), NotViable> {
        debug_assert!(relative_offset < self.length);
        Ok(())
    }

    fn encode_complete(&mut self, relative_offset: u64) -> Result<(), NotViable> {
        // TigerStyle: Assert preconditions.
        assert!(
            relative_offset < self.length,
            "relative offset {relative_offset} outside bitset of {}",
            self.length
        );
        #[allow(clippy::cast_possible_truncation)]
        let byte = (relative_offset / 8) as usize;
        self.bits[byte] |= 1 << (relative_offset % 8);
        Ok(())
    }

    fn serialise(&mut self) -> Result<Bytes, NotViable> {
        let mut buf = BytesMut::with_capacity(self.version.field_width() + self.bits.len());
        // Safety: length was bounded by the version's field maximum in `new`.
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        match self.version {
            Version::V1 => buf.put_i16(self.length as i16),
            Version::V2 => buf.put_i32(self.length as i32),
        }
        buf.put_slice(&self.bits);
        let bytes = buf.freeze();
        self.encoded = Some(bytes.clone());
        Ok(bytes)
    }

    fn encoded_size(&self) -> Option<usize> {
        self.encoded.as_ref().map(Bytes::len)
    }
}

/// Decodes a bitset payload whose first bit is `base`.
///
/// # Errors
/// Returns an error if the length field is missing or negative, or if the
/// payload holds fewer bits than the length field claims.
pub fn decode(
    encoding: OffsetEncoding,
    base: Offset,
    mut payload: &[u8],
) -> OffsetResult<HighestOffsetAndIncompletes> {
    let version = encoding.version();
    let width = version.field_width();
    if payload.len() < width {
        return Err(OffsetError::Truncated {
            encoding,
            needed: width,
            available: payload.len(),
        });
    }
    let length = match version {
        Version::V1 => i64::from(payload.get_i16()),
        Version::V2 => i64::from(payload.get_i32()),
    };
    let length = u64::try_from(length).map_err(|_| OffsetError::NegativeField {
        encoding,
        value: length,
    })?;

    let bits = payload;
    // length <= i32::MAX, so the byte count fits in usize.
    let needed = usize::try_from(length.div_ceil(8)).unwrap_or(usize::MAX);
    if bits.len() < needed {
        return Err(OffsetError::Truncated {
            encoding,
            needed: width.saturating_add(needed),
            available: width + bits.len(),
        });
    }

    // Clear bits become incomplete ranges, one insert per run.
    let mut incompletes = RoaringTreemap::new();
    let mut run_start = None;
    for i in 0..length {
        #[allow(clippy::cast_possible_truncation)]
        let complete = bits[(i / 8) as usize] & (1 << (i % 8)) != 0;
        match (complete, run_start) {
            (false, None) => run_start = Some(i),
            (true, Some(start)) => {
                incompletes.insert_range(base.get() + start..base.get() + i);
                run_start = None;
            }
            _ => {}
        }
    }
    if let Some(start) = run_start {
        incompletes.insert_range(base.get() + start..base.get() + length);
    }
    let highest_seen = (base.get() + length).checked_sub(1).map(Offset::new);
    Ok(HighestOffsetAndIncompletes::new(highest_seen, incompletes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(version: Version, length: u64, incompletes: &[u64]) -> Bytes {
        let mut encoder = BitSetEncoder::new(version, length).unwrap();
        for i in 0..length {
            if incompletes.contains(&i) {
                encoder.encode_incomplete(i).unwrap();
            } else {
                encoder.encode_complete(i).unwrap();
            }
        }
        encoder.serialise().unwrap()
    }

    #[test]
    fn test_bit_array_matches_completes() {
        // Completes {1,2,3,5,9}, incompletes {0,4,6,7,8,10}.
        let payload = encode(Version::V1, 11, &[0, 4, 6, 7, 8, 10]);
        assert_eq!(payload.as_ref(), &[0x00, 0x0B, 0b0010_1110, 0b0000_0010]);

        let decoded = decode(OffsetEncoding::BitSet, Offset::new(0), &payload).unwrap();
        assert_eq!(decoded.highest_seen, Some(Offset::new(10)));
        assert_eq!(
            decoded.incompletes.iter().collect::<Vec<_>>(),
            vec![0, 4, 6, 7, 8, 10]
        );
    }

    #[test]
    fn test_v2_length_prefix() {
        let payload = encode(Version::V2, 3, &[]);
        assert_eq!(payload.as_ref(), &[0, 0, 0, 3, 0b0000_0111]);
    }

    #[test]
    fn test_trailing_incompletes_kept_in_payload() {
        let payload = encode(Version::V1, 64, &(8..64).collect::<Vec<_>>());
        assert_eq!(payload.len(), 2 + 8);

        let decoded = decode(OffsetEncoding::BitSet, Offset::new(100), &payload).unwrap();
        assert_eq!(decoded.highest_seen, Some(Offset::new(163)));
        assert_eq!(decoded.incompletes.len(), 56);
        assert!(decoded.incompletes.contains(108));
        assert!(!decoded.incompletes.contains(107));
    }

    #[test]
    fn test_length_beyond_payload_rejected() {
        // Claims 2^27 offsets but carries no bitset bytes.
        let err = decode(OffsetEncoding::BitSetV2, Offset::new(0), &[0x08, 0, 0, 0]).unwrap_err();
        assert_eq!(
            err,
            OffsetError::Truncated {
                encoding: OffsetEncoding::BitSetV2,
                needed: 4 + (1 << 24),
                available: 4,
            }
        );

        // One byte short of the 11 bits it claims.
        assert!(matches!(
            decode(OffsetEncoding::BitSet, Offset::new(0), &[0x00, 0x0B, 0xFF]),
            Err(OffsetError::Truncated { needed: 4, available: 3, .. })
        ));
    }

    #[test]
    fn test_incomplete_runs_decoded() {
        // Completes {0, 5}; runs 1..5 and 6..12 are incomplete.
        let payload = encode(Version::V2, 12, &[1, 2, 3, 4, 6, 7, 8, 9, 10, 11]);
        let decoded = decode(OffsetEncoding::BitSetV2, Offset::new(1_000), &payload).unwrap();
        assert_eq!(
            decoded.incompletes.iter().collect::<Vec<_>>(),
            vec![1_001, 1_002, 1_003, 1_004, 1_006, 1_007, 1_008, 1_009, 1_010, 1_011]
        );
    }

    #[test]
    fn test_v1_length_overflow_not_viable() {
        let err = BitSetEncoder::new(Version::V1, 40_000).unwrap_err();
        assert_eq!(
            err,
            NotViable::BitSetLength {
                version: Version::V1,
                length: 40_000,
                max: 32_767,
            }
        );
        assert!(BitSetEncoder::new(Version::V2, 40_000).is_ok());
    }

    #[test]
    fn test_empty_range() {
        let payload = encode(Version::V1, 0, &[]);
        let decoded = decode(OffsetEncoding::BitSet, Offset::new(5), &payload).unwrap();
        assert_eq!(decoded.highest_seen, Some(Offset::new(4)));
        assert!(decoded.incompletes.is_empty());
    }

    #[test]
    fn test_truncated_and_negative_rejected() {
        assert!(matches!(
            decode(OffsetEncoding::BitSetV2, Offset::new(0), &[0, 1]),
            Err(OffsetError::Truncated { needed: 4, .. })
        ));
        assert!(matches!(
            decode(OffsetEncoding::BitSet, Offset::new(0), &[0xFF, 0xFF]),
            Err(OffsetError::NegativeField { value: -1, .. })
        ));
    }
}
