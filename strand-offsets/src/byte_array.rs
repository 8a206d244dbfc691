//! Legacy one-byte-per-offset payloads.
//!
//! Older writers emitted one byte per offset, `1` meaning complete. Nothing
//! here produces this format any more, but committed metadata in the wild may
//! still carry it.

use roaring::RoaringTreemap;
use strand_core::Offset;

use crate::types::HighestOffsetAndIncompletes;

/// Decodes a byte-per-offset payload whose first byte is `base`.
#[must_use]
pub fn decode(base: Offset, payload: &[u8]) -> HighestOffsetAndIncompletes {
    let mut incompletes = RoaringTreemap::new();
    for (relative, byte) in (0u64..).zip(payload) {
        if *byte != 1 {
            incompletes.insert(base.get() + relative);
        }
    }
    let highest_seen = (base.get() + payload.len() as u64)
        .checked_sub(1)
        .map(Offset::new);
    HighestOffsetAndIncompletes::new(highest_seen, incompletes)
}
