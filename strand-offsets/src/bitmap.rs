//! `RoaringTreemap` utilities for incomplete offset tracking.
//!
//! Incomplete offsets are stored as absolute u64 values in a `RoaringTreemap`,
//! which keeps dense runs of incompletes compact and gives ordered iteration.

use roaring::RoaringTreemap;
use strand_core::Offset;

/// Extension trait for `RoaringTreemap` offset operations.
pub trait OffsetSet {
    /// Inserts an offset. Returns true if it was not present.
    fn insert_offset(&mut self, offset: Offset) -> bool;

    /// Removes an offset. Returns true if it was present.
    fn remove_offset(&mut self, offset: Offset) -> bool;

    /// Checks membership.
    fn contains_offset(&self, offset: Offset) -> bool;

    /// Returns the lowest offset, if any.
    fn first_offset(&self) -> Option<Offset>;

    /// Removes every offset below `low`. Returns how many were removed.
    fn truncate_below(&mut self, low: Offset) -> u64;

    /// Returns the offsets in `[low, high]`, ascending.
    fn offsets_between(&self, low: Offset, high: Offset) -> Vec<Offset>;

    /// Returns a copy holding only offsets at or below `high`.
    fn at_or_below(&self, high: Offset) -> RoaringTreemap;
}

impl OffsetSet for RoaringTreemap {
    fn insert_offset(&mut self, offset: Offset) -> bool {
        self.insert(offset.get())
    }

    fn remove_offset(&mut self, offset: Offset) -> bool {
        self.remove(offset.get())
    }

    fn contains_offset(&self, offset: Offset) -> bool {
        self.contains(offset.get())
    }

    fn first_offset(&self) -> Option<Offset> {
        self.min().map(Offset::new)
    }

    fn truncate_below(&mut self, low: Offset) -> u64 {
        self.remove_range(..low.get())
    }

    fn offsets_between(&self, low: Offset, high: Offset) -> Vec<Offset> {
        if low > high {
            return Vec::new();
        }
        self.iter()
            .skip_while(|o| *o < low.get())
            .take_while(|o| *o <= high.get())
            .map(Offset::new)
            .collect()
    }

    fn at_or_below(&self, high: Offset) -> Self {
        self.iter().take_while(|o| *o <= high.get()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(offsets: &[u64]) -> RoaringTreemap {
        offsets.iter().copied().collect()
    }

    #[test]
    fn test_insert_remove_contains() {
        let mut incompletes = RoaringTreemap::new();
        assert!(incompletes.insert_offset(Offset::new(5)));
        assert!(!incompletes.insert_offset(Offset::new(5)));
        assert!(incompletes.contains_offset(Offset::new(5)));
        assert!(incompletes.remove_offset(Offset::new(5)));
        assert!(!incompletes.remove_offset(Offset::new(5)));
        assert!(incompletes.first_offset().is_none());
    }

    #[test]
    fn test_truncate_below() {
        let mut incompletes = set(&[11, 15, 20, 60]);
        assert_eq!(incompletes.truncate_below(Offset::new(20)), 2);
        assert_eq!(incompletes.first_offset(), Some(Offset::new(20)));
        assert_eq!(incompletes.len(), 2);
    }

    #[test]
    fn test_offsets_between() {
        let incompletes = set(&[11, 15, 20, 60, 80]);
        let between = incompletes.offsets_between(Offset::new(12), Offset::new(60));
        assert_eq!(between, vec![Offset::new(15), Offset::new(20), Offset::new(60)]);
        assert!(incompletes
            .offsets_between(Offset::new(61), Offset::new(12))
            .is_empty());
    }

    #[test]
    fn test_at_or_below() {
        let incompletes = set(&[1, 5, 9]);
        let below = incompletes.at_or_below(Offset::new(5));
        assert_eq!(below.iter().collect::<Vec<_>>(), vec![1, 5]);
    }
}
