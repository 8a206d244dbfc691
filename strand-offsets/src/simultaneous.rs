//! Runs every strategy over the same input and keeps the smallest result.
//!
//! ```text
//!   incompletes ──▶ for each offset in [base, highest_succeeded]
//!                     ├─▶ BitSet v1 ──┬─▶ raw
//!                     ├─▶ BitSet v2   └─▶ gzip
//!                     ├─▶ RunLength v1
//!                     └─▶ RunLength v2
//!                                         ──▶ min by payload size ──▶ magic ∥ payload
//! ```
//!
//! A strategy that cannot represent the input is dropped, not fatal. Only when
//! nothing survives does encoding fail.

use bytes::Bytes;
use roaring::RoaringTreemap;
use strand_core::Offset;
use tracing::debug;

use crate::bitset::BitSetEncoder;
use crate::compression::compress;
use crate::encoder::OffsetEncoder;
use crate::encoding::{OffsetEncoding, Version};
use crate::error::{NotViable, OffsetError, OffsetResult};
use crate::pair::EncodedOffsetPair;
use crate::run_length::RunLengthEncoder;

/// The result of running all strategies over one partition's offsets.
#[derive(Debug)]
pub struct OffsetSimultaneousEncoder {
    base: Offset,
    length: u64,
    incompletes_in_range: u64,
    pairs: Vec<EncodedOffsetPair>,
    failures: Vec<(OffsetEncoding, NotViable)>,
}

impl OffsetSimultaneousEncoder {
    /// Encodes offsets `[base, highest_succeeded]`; anything in `incompletes`
    /// is incomplete, everything else in the range is complete.
    ///
    /// Offsets above `highest_succeeded` are not encoded: after a restore they
    /// are simply polled again.
    #[must_use]
    pub fn new(
        base: Offset,
        highest_succeeded: Option<Offset>,
        incompletes: &RoaringTreemap,
    ) -> Self {
        let length = highest_succeeded
            .filter(|h| *h >= base)
            .map_or(0, |h| h.get() - base.get() + 1);

        let mut failures = Vec::new();
        let mut encoders: Vec<Box<dyn OffsetEncoder>> = Vec::with_capacity(4);
        for version in [Version::V1, Version::V2] {
            match BitSetEncoder::new(version, length) {
                Ok(encoder) => encoders.push(Box::new(encoder)),
                Err(e) => {
                    let encoding = match version {
                        Version::V1 => OffsetEncoding::BitSet,
                        Version::V2 => OffsetEncoding::BitSetV2,
                    };
                    debug!(%encoding, error = %e, "Encoder not viable");
                    failures.push((encoding, e));
                }
            }
        }
        encoders.push(Box::new(RunLengthEncoder::new(Version::V1)));
        encoders.push(Box::new(RunLengthEncoder::new(Version::V2)));

        let mut incompletes_in_range = 0;
        for relative in 0..length {
            let incomplete = incompletes.contains(base.get() + relative);
            if incomplete {
                incompletes_in_range += 1;
            }
            encoders.retain_mut(|encoder| {
                let step = if incomplete {
                    encoder.encode_incomplete(relative)
                } else {
                    encoder.encode_complete(relative)
                };
                match step {
                    Ok(()) => true,
                    Err(e) => {
                        debug!(encoding = %encoder.encoding(), error = %e, "Encoder not viable");
                        failures.push((encoder.encoding(), e));
                        false
                    }
                }
            });
            if encoders.is_empty() {
                break;
            }
        }

        let mut pairs = Vec::with_capacity(encoders.len() * 2);
        for encoder in &mut encoders {
            let encoding = encoder.encoding();
            let raw = match encoder.serialise() {
                Ok(raw) => raw,
                Err(e) => {
                    failures.push((encoding, e));
                    continue;
                }
            };
            if let Some(compressed_encoding) = encoding.compressed() {
                match compress(&raw) {
                    Ok(compressed) => {
                        pairs.push(EncodedOffsetPair::new(compressed_encoding, compressed));
                    }
                    Err(e) => failures.push((compressed_encoding, e)),
                }
            }
            pairs.push(EncodedOffsetPair::new(encoding, raw));
        }
        pairs.sort_by_key(EncodedOffsetPair::encoding);

        Self {
            base,
            length,
            incompletes_in_range,
            pairs,
            failures,
        }
    }

    /// First offset of the encoded range.
    #[must_use]
    pub const fn base(&self) -> Offset {
        self.base
    }

    /// Number of offsets encoded.
    #[must_use]
    pub const fn length(&self) -> u64 {
        self.length
    }

    /// Every payload that was produced, in tie-break order.
    #[must_use]
    pub fn pairs(&self) -> &[EncodedOffsetPair] {
        &self.pairs
    }

    /// Strategies that dropped out, and why.
    #[must_use]
    pub fn failures(&self) -> &[(OffsetEncoding, NotViable)] {
        &self.failures
    }

    /// The smallest payload. Ties go to the earliest encoding in declaration order.
    ///
    /// # Errors
    /// Returns `NoEncodingPossible` if every strategy failed.
    pub fn smallest(&self) -> OffsetResult<&EncodedOffsetPair> {
        self.pairs
            .iter()
            .min_by_key(|p| p.size())
            .ok_or(OffsetError::NoEncodingPossible {
                base: self.base.get(),
                length: self.length,
                incompletes: self.incompletes_in_range,
            })
    }

    /// The smallest payload framed with its magic byte.
    ///
    /// # Errors
    /// Returns `NoEncodingPossible` if every strategy failed.
    pub fn pack_smallest(&self) -> OffsetResult<Bytes> {
        let smallest = self.smallest()?;
        debug!(
            encoding = %smallest.encoding(),
            size = smallest.size(),
            base = %self.base,
            length = self.length,
            "Selected offset encoding"
        );
        Ok(smallest.to_wire())
    }
}
