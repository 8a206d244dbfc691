//! Run-length encoding.
//!
//! Payload layout: alternating run lengths as signed big-endian integers
//! (16-bit for v1, 32-bit for v2). The first run counts incompletes, so a
//! range starting with a complete offset begins with a zero entry.
//!
//! Best when completion happens in long contiguous blocks.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use roaring::RoaringTreemap;
use strand_core::Offset;
use tracing::trace;

use crate::encoder::OffsetEncoder;
use crate::encoding::{OffsetEncoding, Version};
use crate::error::{NotViable, OffsetError, OffsetResult};
use crate::types::HighestOffsetAndIncompletes;

/// Encodes a range as alternating incomplete/complete run lengths.
#[derive(Debug)]
pub struct RunLengthEncoder {
    version: Version,
    runs: Vec<u64>,
    current_run: u64,
    current_is_complete: bool,
    previous_relative: Option<u64>,
    encoded: Option<Bytes>,
}

impl RunLengthEncoder {
    /// Creates an empty encoder.
    #[must_use]
    pub const fn new(version: Version) -> Self {
        Self {
            version,
            runs: Vec::new(),
            current_run: 0,
            current_is_complete: false,
            previous_relative: None,
            encoded: None,
        }
    }

    /// Run lengths recorded so far, excluding the open tail run.
    #[must_use]
    pub fn runs(&self) -> &[u64] {
        &self.runs
    }

    fn encode_run(&mut self, complete: bool, relative_offset: u64) -> Result<(), NotViable> {
        let delta = relative_offset + 1 - self.previous_relative.map_or(0, |p| p + 1);
        if complete == self.current_is_complete {
            let run = self.current_run + delta;
            let max = self.version.max_field();
            if run > max {
                return Err(NotViable::RunLength {
                    version: self.version,
                    run,
                    max,
                });
            }
            self.current_run = run;
        } else {
            self.current_is_complete = complete;
            self.runs.push(self.current_run);
            self.current_run = 1;
        }
        self.previous_relative = Some(relative_offset);
        Ok(())
    }
}

impl OffsetEncoder for RunLengthEncoder {
    fn encoding(&self) -> OffsetEncoding {
        match self.version {
            Version::V1 => OffsetEncoding::RunLength,
            Version::V2 => OffsetEncoding::RunLengthV2,
        }
    }

    fn encode_incomplete(&mut self, relative_offset: u64) -> Result<(), NotViable> {
        self.encode_run(false, relative_offset)
    }

    fn encode_complete(&mut self, relative_offset: u64) -> Result<(), NotViable> {
        self.encode_run(true, relative_offset)
    }

    fn serialise(&mut self) -> Result<Bytes, NotViable> {
        if let Some(encoded) = &self.encoded {
            return Ok(encoded.clone());
        }
        let width = self.version.field_width();
        let mut buf = BytesMut::with_capacity((self.runs.len() + 1) * width);
        for &run in self.runs.iter().chain(std::iter::once(&self.current_run)) {
            // Runs were bounded by the version's field maximum as they grew.
            #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
            match self.version {
                Version::V1 => buf.put_i16(run as i16),
                Version::V2 => buf.put_i32(run as i32),
            }
        }
        let bytes = buf.freeze();
        self.encoded = Some(bytes.clone());
        Ok(bytes)
    }

    fn encoded_size(&self) -> Option<usize> {
        self.encoded.as_ref().map(Bytes::len)
    }
}

/// Decodes a run-length payload whose first run starts at `base`.
///
/// # Errors
/// Returns an error if the payload is not a whole number of entries or holds
/// a negative run.
pub fn decode(
    encoding: OffsetEncoding,
    base: Offset,
    mut payload: &[u8],
) -> OffsetResult<HighestOffsetAndIncompletes> {
    let version = encoding.version();
    let width = version.field_width();
    if payload.len() % width != 0 {
        return Err(OffsetError::Truncated {
            encoding,
            needed: payload.len().next_multiple_of(width),
            available: payload.len(),
        });
    }

    let mut incompletes = RoaringTreemap::new();
    let mut highest_seen = base.get().checked_sub(1);
    let mut cursor = base.get();
    let mut run_is_complete = false;

    while payload.has_remaining() {
        let run = match version {
            Version::V1 => i64::from(payload.get_i16()),
            Version::V2 => i64::from(payload.get_i32()),
        };
        let run = u64::try_from(run).map_err(|_| OffsetError::NegativeField {
            encoding,
            value: run,
        })?;

        if run_is_complete {
            trace!(run, offset = cursor, "Skipping completed offsets");
            cursor += run;
            highest_seen = cursor.checked_sub(1);
        } else if run > 0 {
            trace!(run, offset = cursor, "Adding incomplete offsets");
            incompletes.insert_range(cursor..cursor + run);
            cursor += run;
            highest_seen = Some(cursor - 1);
        }
        run_is_complete = !run_is_complete;
    }

    Ok(HighestOffsetAndIncompletes::new(
        highest_seen.map(Offset::new),
        incompletes,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(encoder: &mut RunLengthEncoder, pattern: &str) -> Result<(), NotViable> {
        for (i, c) in (0u64..).zip(pattern.chars()) {
            match c {
                'x' => encoder.encode_complete(i)?,
                _ => encoder.encode_incomplete(i)?,
            }
        }
        Ok(())
    }

    fn runs_of(payload: &[u8]) -> Vec<i16> {
        payload
            .chunks(2)
            .map(|c| i16::from_be_bytes([c[0], c[1]]))
            .collect()
    }

    #[test]
    fn test_runs_start_with_incomplete() {
        let mut encoder = RunLengthEncoder::new(Version::V1);
        feed(&mut encoder, "ooxxxo").unwrap();
        let payload = encoder.serialise().unwrap();
        assert_eq!(runs_of(&payload), vec![2, 3, 1]);
    }

    #[test]
    fn test_leading_complete_emits_zero_run() {
        let mut encoder = RunLengthEncoder::new(Version::V1);
        feed(&mut encoder, "xxo").unwrap();
        let payload = encoder.serialise().unwrap();
        assert_eq!(runs_of(&payload), vec![0, 2, 1]);
    }

    #[test]
    fn test_serialise_is_idempotent() {
        let mut encoder = RunLengthEncoder::new(Version::V1);
        feed(&mut encoder, "oxo").unwrap();
        let first = encoder.serialise().unwrap();
        let second = encoder.serialise().unwrap();
        assert_eq!(first, second);
        assert_eq!(encoder.encoded_size(), Some(6));
    }

    #[test]
    fn test_decode_recovers_pattern() {
        let pattern = "oxxoooxxxxo";
        let mut encoder = RunLengthEncoder::new(Version::V2);
        feed(&mut encoder, pattern).unwrap();
        let payload = encoder.serialise().unwrap();

        let decoded = decode(OffsetEncoding::RunLengthV2, Offset::new(50), &payload).unwrap();
        assert_eq!(decoded.highest_seen, Some(Offset::new(60)));
        assert_eq!(decoded.to_bitmap_string(Offset::new(50)), pattern);
    }

    #[test]
    fn test_trailing_complete_run_sets_highest() {
        let mut encoder = RunLengthEncoder::new(Version::V1);
        feed(&mut encoder, "oxx").unwrap();
        let payload = encoder.serialise().unwrap();
        let decoded = decode(OffsetEncoding::RunLength, Offset::new(10), &payload).unwrap();
        assert_eq!(decoded.highest_seen, Some(Offset::new(12)));
        assert_eq!(decoded.incompletes.iter().collect::<Vec<_>>(), vec![10]);
    }

    #[test]
    fn test_v1_run_overflow_not_viable() {
        let mut v1 = RunLengthEncoder::new(Version::V1);
        let mut v2 = RunLengthEncoder::new(Version::V2);
        let mut v1_result = Ok(());
        for i in 0..40_000 {
            if v1_result.is_ok() {
                v1_result = v1.encode_complete(i);
            }
            v2.encode_complete(i).unwrap();
        }
        assert!(matches!(
            v1_result,
            Err(NotViable::RunLength {
                version: Version::V1,
                ..
            })
        ));
        let payload = v2.serialise().unwrap();
        let decoded = decode(OffsetEncoding::RunLengthV2, Offset::new(0), &payload).unwrap();
        assert_eq!(decoded.highest_seen, Some(Offset::new(39_999)));
        assert!(decoded.incompletes.is_empty());
    }

    #[test]
    fn test_ragged_payload_rejected() {
        assert!(matches!(
            decode(OffsetEncoding::RunLengthV2, Offset::new(0), &[0, 0, 1]),
            Err(OffsetError::Truncated { .. })
        ));
    }
}
