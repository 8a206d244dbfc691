//! Decoded offset state.

use roaring::RoaringTreemap;
use strand_core::Offset;

/// The result of decoding commit metadata: what a partition had seen and what
/// was still incomplete when the metadata was written.
///
/// This is the exact inverse of what a partition tracks, and is used to
/// rehydrate partition state after a restart or rebalance.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HighestOffsetAndIncompletes {
    /// Highest offset the writer had seen. `None` if it had seen nothing.
    pub highest_seen: Option<Offset>,
    /// Absolute offsets that were observed but not yet complete.
    pub incompletes: RoaringTreemap,
}

impl HighestOffsetAndIncompletes {
    /// Nothing seen and nothing incomplete.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Everything below `committed` is complete and nothing at or above it has been seen.
    #[must_use]
    pub fn from_committed(committed: Offset) -> Self {
        Self {
            highest_seen: committed.get().checked_sub(1).map(Offset::new),
            incompletes: RoaringTreemap::new(),
        }
    }

    /// Creates a decoded state from its parts.
    #[must_use]
    pub const fn new(highest_seen: Option<Offset>, incompletes: RoaringTreemap) -> Self {
        Self {
            highest_seen,
            incompletes,
        }
    }

    /// Renders offsets `[base, highest_seen]` as `x` (complete) and `o` (incomplete).
    ///
    /// Used to compare the logical content of two encodings.
    #[must_use]
    pub fn to_bitmap_string(&self, base: Offset) -> String {
        let Some(highest) = self.highest_seen else {
            return String::new();
        };
        (base.get()..=highest.get())
            .map(|o| if self.incompletes.contains(o) { 'o' } else { 'x' })
            .collect()
    }
}
