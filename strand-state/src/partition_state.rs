//! Per-partition completion tracking.
//!
//! A partition tracks the highest offset it has seen, the highest offset that
//! succeeded, and every observed offset that has not completed yet. The
//! commit point is the lowest incomplete offset, or one past the highest seen
//! when nothing is incomplete.
//!
//! ```text
//!   committed          commit point                highest succeeded   highest seen
//!       │                   │                              │                │
//!   ────┴───────────────────o──x──x──o──x──o──x──x──x──x───┴──o──o──o──o────┴──▶
//!                           └────────── encoded into metadata ─┘
//! ```
//!
//! Offsets that were never observed (compaction, retention gaps) are never
//! added to the incomplete set, so they can not hold back the commit point.

use std::collections::BTreeSet;

use roaring::RoaringTreemap;
use strand_core::{Epoch, Offset, PolledRecord, TopicPartition};
use strand_offsets::{HighestOffsetAndIncompletes, OffsetError, OffsetMapCodec, OffsetSet};
use tracing::{debug, trace, warn};

// -----------------------------------------------------------------------------
// Commit Data
// -----------------------------------------------------------------------------

/// What to commit for one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitData {
    /// The commit point.
    pub offset: Offset,
    /// Encoded incompletes, if any and if they fit.
    pub metadata: Option<String>,
    /// Set when no strategy could encode the incompletes.
    pub encoding_error: Option<OffsetError>,
    /// Mutation generation at collection, used to clear the dirty flag safely.
    pub generation: u64,
}

// -----------------------------------------------------------------------------
// Active Partition
// -----------------------------------------------------------------------------

/// Tracking state of an assigned partition.
#[derive(Debug, Clone)]
pub struct ActivePartition {
    tp: TopicPartition,
    epoch: Epoch,
    incompletes: RoaringTreemap,
    highest_seen: Option<Offset>,
    highest_succeeded: Option<Offset>,
    dirty: bool,
    generation: u64,
    allowed_more_records: bool,
    /// Offset the first poll is expected at. Cleared once it arrives.
    expected_bootstrap: Option<Offset>,
}

impl ActivePartition {
    /// Creates a partition with nothing seen, starting at `committed`.
    #[must_use]
    pub fn new(tp: TopicPartition, epoch: Epoch, committed: Offset) -> Self {
        Self::restore(tp, epoch, committed, HighestOffsetAndIncompletes::from_committed(committed))
    }

    /// Rehydrates a partition from its committed offset and decoded metadata.
    #[must_use]
    pub fn restore(
        tp: TopicPartition,
        epoch: Epoch,
        committed: Offset,
        decoded: HighestOffsetAndIncompletes,
    ) -> Self {
        let HighestOffsetAndIncompletes {
            highest_seen,
            mut incompletes,
        } = decoded;
        // Anything below the committed offset is complete by definition.
        incompletes.truncate_below(committed);

        Self {
            tp,
            epoch,
            incompletes,
            highest_seen,
            highest_succeeded: highest_seen,
            dirty: false,
            generation: 0,
            allowed_more_records: true,
            expected_bootstrap: Some(committed),
        }
    }

    /// The partition.
    #[must_use]
    pub const fn tp(&self) -> &TopicPartition {
        &self.tp
    }

    /// The assignment epoch.
    #[must_use]
    pub const fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Highest offset seen.
    #[must_use]
    pub const fn highest_seen(&self) -> Option<Offset> {
        self.highest_seen
    }

    /// Highest offset that succeeded.
    #[must_use]
    pub const fn highest_succeeded(&self) -> Option<Offset> {
        self.highest_succeeded
    }

    /// Incomplete offsets.
    #[must_use]
    pub const fn incompletes(&self) -> &RoaringTreemap {
        &self.incompletes
    }

    /// Returns true if completions have not been committed.
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Lowest offset not known complete.
    #[must_use]
    pub fn commit_point(&self) -> Offset {
        self.incompletes
            .first_offset()
            .unwrap_or_else(|| self.highest_seen.map_or(Offset::new(0), Offset::next))
    }

    fn mark_dirty(&mut self) {
        self.dirty = true;
        self.generation = self.generation.wrapping_add(1);
    }

    fn raise_highest_succeeded(&mut self, offset: Offset) {
        if self.highest_succeeded.map_or(true, |h| offset > h) {
            self.highest_succeeded = Some(offset);
        }
    }

    /// Returns true if `offset` was seen and already completed.
    #[must_use]
    pub fn is_record_previously_completed(&self, offset: Offset) -> bool {
        match self.highest_seen {
            Some(highest) => offset <= highest && !self.incompletes.contains_offset(offset),
            None => false,
        }
    }

    /// Returns true if completing `offset` could move the commit point or
    /// shrink the metadata.
    #[must_use]
    pub fn is_blocking_progress(&self, offset: Offset) -> bool {
        self.highest_succeeded.map_or(false, |h| offset < h)
    }

    /// Registers a polled batch and returns the records that need processing.
    ///
    /// Records must be in ascending offset order. Records already known
    /// complete are skipped. Tracked incompletes inside the batch's offset
    /// range that the batch does not contain were compacted away and are
    /// dropped.
    pub fn register_polled_batch(&mut self, records: Vec<PolledRecord>) -> Vec<PolledRecord> {
        let (Some(first), Some(last)) = (records.first(), records.last()) else {
            return Vec::new();
        };
        let (low, high) = (first.offset, last.offset);
        debug_assert!(low <= high, "batch not in offset order");

        if let Some(expected) = self.expected_bootstrap.take() {
            self.apply_bootstrap(expected, low);
        }
        self.prune_compacted(low, high, &records);

        let mut work = Vec::with_capacity(records.len());
        for record in records {
            // TigerStyle: Assert preconditions.
            debug_assert_eq!(record.tp, self.tp, "record for wrong partition");
            let offset = record.offset;
            if self.is_record_previously_completed(offset) {
                trace!(partition = %self.tp, offset = %offset, "Skipping previously completed record");
                continue;
            }
            if self.incompletes.insert_offset(offset) {
                self.mark_dirty();
            }
            if self.highest_seen.map_or(true, |h| offset > h) {
                self.highest_seen = Some(offset);
            }
            work.push(record);
        }
        work
    }

    fn apply_bootstrap(&mut self, expected: Offset, polled: Offset) {
        if polled > expected {
            let dropped = self.incompletes.truncate_below(polled);
            warn!(
                partition = %self.tp,
                expected = %expected,
                polled = %polled,
                dropped,
                "First poll above committed offset, truncating incompletes"
            );
            if self.highest_seen.map_or(true, |h| h < polled.prev()) && polled.get() > 0 {
                self.highest_seen = Some(polled.prev());
            }
            if let Some(seen) = self.highest_seen {
                if self.incompletes.is_empty() {
                    self.raise_highest_succeeded(seen);
                }
            }
            self.mark_dirty();
        } else if polled < expected {
            warn!(
                partition = %self.tp,
                expected = %expected,
                polled = %polled,
                "First poll below committed offset, restarting tracking"
            );
            self.incompletes.clear();
            let before = polled.get().checked_sub(1).map(Offset::new);
            self.highest_seen = before;
            self.highest_succeeded = before;
            self.mark_dirty();
        }
    }

    fn prune_compacted(&mut self, low: Offset, high: Offset, records: &[PolledRecord]) {
        let tracked = self.incompletes.offsets_between(low, high);
        if tracked.is_empty() {
            return;
        }
        let polled: BTreeSet<Offset> = records.iter().map(|r| r.offset).collect();
        for offset in tracked {
            if !polled.contains(&offset) {
                debug!(partition = %self.tp, offset = %offset, "Dropping compacted incomplete offset");
                self.incompletes.remove_offset(offset);
                self.raise_highest_succeeded(offset);
                self.mark_dirty();
            }
        }
    }

    /// Marks `offset` complete. Returns false if it was not incomplete.
    pub fn on_success(&mut self, offset: Offset) -> bool {
        if !self.incompletes.remove_offset(offset) {
            return false;
        }
        self.raise_highest_succeeded(offset);
        self.mark_dirty();
        true
    }

    /// Builds what to commit, applying the metadata budget.
    ///
    /// With nothing incomplete the commit carries no metadata.
    pub fn commit_data(&mut self, codec: &OffsetMapCodec) -> CommitData {
        let offset = self.commit_point();
        let generation = self.generation;
        if self.incompletes.is_empty() {
            self.allowed_more_records = true;
            return CommitData {
                offset,
                metadata: None,
                encoding_error: None,
                generation,
            };
        }

        match codec.encode_for_commit(offset, self.highest_succeeded, &self.incompletes) {
            Ok(encoded) => {
                self.allowed_more_records = encoded.allowed_more_records;
                CommitData {
                    offset,
                    metadata: encoded.metadata,
                    encoding_error: None,
                    generation,
                }
            }
            Err(e) => {
                warn!(
                    partition = %self.tp,
                    offset = %offset,
                    incompletes = self.incompletes.len(),
                    error = %e,
                    "No offset encoding possible, committing without metadata"
                );
                self.allowed_more_records = false;
                CommitData {
                    offset,
                    metadata: None,
                    encoding_error: Some(e),
                    generation,
                }
            }
        }
    }

    /// Clears the dirty flag if nothing changed since `generation` was collected.
    pub fn on_offset_commit_success(&mut self, generation: u64) {
        if self.generation == generation {
            self.dirty = false;
        }
    }
}

// -----------------------------------------------------------------------------
// Partition State
// -----------------------------------------------------------------------------

/// State of a partition: assigned and tracked, or removed.
///
/// `Removed` answers every query with an inert result, so late work for a
/// revoked partition can flow through without special cases.
#[derive(Debug, Clone)]
pub enum PartitionState {
    /// The partition is assigned.
    Active(ActivePartition),
    /// The partition was revoked or lost.
    Removed,
}

impl PartitionState {
    /// Returns true if the partition is no longer assigned.
    #[must_use]
    pub const fn is_removed(&self) -> bool {
        matches!(self, Self::Removed)
    }

    /// Returns the active state, if assigned.
    #[must_use]
    pub const fn as_active(&self) -> Option<&ActivePartition> {
        match self {
            Self::Active(active) => Some(active),
            Self::Removed => None,
        }
    }

    /// Returns true if work stamped with `epoch` must be discarded.
    #[must_use]
    pub fn is_stale(&self, epoch: Epoch) -> bool {
        match self {
            Self::Active(active) => active.epoch != epoch,
            Self::Removed => true,
        }
    }

    /// Registers a polled batch stamped with `epoch`.
    pub fn register_polled_batch(
        &mut self,
        epoch: Epoch,
        records: Vec<PolledRecord>,
    ) -> Vec<PolledRecord> {
        match self {
            Self::Active(active) if active.epoch == epoch => active.register_polled_batch(records),
            Self::Active(active) => {
                debug!(
                    partition = %active.tp,
                    batch_epoch = %epoch,
                    epoch = %active.epoch,
                    count = records.len(),
                    "Dropping polled batch from an old assignment"
                );
                Vec::new()
            }
            Self::Removed => {
                debug!(count = records.len(), "Dropping polled batch for removed partition");
                Vec::new()
            }
        }
    }

    /// Marks `offset` complete.
    pub fn on_success(&mut self, offset: Offset) -> bool {
        match self {
            Self::Active(active) => active.on_success(offset),
            Self::Removed => false,
        }
    }

    /// Lowest offset not known complete.
    #[must_use]
    pub fn commit_point(&self) -> Option<Offset> {
        self.as_active().map(ActivePartition::commit_point)
    }

    /// Returns true if the partition may take more records.
    #[must_use]
    pub const fn is_allowed_more_records(&self) -> bool {
        match self {
            Self::Active(active) => active.allowed_more_records,
            Self::Removed => true,
        }
    }

    /// Returns true if `offset` is below the highest succeeded offset.
    #[must_use]
    pub fn is_blocking_progress(&self, offset: Offset) -> bool {
        self.as_active().map_or(false, |a| a.is_blocking_progress(offset))
    }

    /// Returns true if `offset` was already completed.
    #[must_use]
    pub fn is_record_previously_completed(&self, offset: Offset) -> bool {
        self.as_active()
            .map_or(false, |a| a.is_record_previously_completed(offset))
    }

    /// Number of incomplete offsets.
    #[must_use]
    pub fn number_of_incompletes(&self) -> u64 {
        self.as_active().map_or(0, |a| a.incompletes.len())
    }

    /// Returns true if completions have not been committed.
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        match self {
            Self::Active(active) => active.dirty,
            Self::Removed => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMMITTED: u64 = 11;
    const HIGHEST_SEEN: u64 = 101;
    const TRACKED: [u64; 10] = [11, 15, 20, 60, 80, 95, 96, 97, 98, 100];

    fn tp() -> TopicPartition {
        TopicPartition::new("topic", 0)
    }

    fn records(offsets: impl IntoIterator<Item = u64>) -> Vec<PolledRecord> {
        offsets
            .into_iter()
            .map(|o| PolledRecord::new(tp(), o, "v"))
            .collect()
    }

    fn restored() -> ActivePartition {
        let decoded = HighestOffsetAndIncompletes::new(
            Some(Offset::new(HIGHEST_SEEN)),
            TRACKED.iter().copied().collect(),
        );
        ActivePartition::restore(tp(), Epoch::new(1), Offset::new(COMMITTED), decoded)
    }

    fn incompletes(state: &ActivePartition) -> Vec<u64> {
        state.incompletes().iter().collect()
    }

    #[test]
    fn test_commit_point_fresh() {
        let state = ActivePartition::new(tp(), Epoch::new(1), Offset::new(0));
        assert_eq!(state.commit_point(), Offset::new(0));

        let state = ActivePartition::new(tp(), Epoch::new(1), Offset::new(42));
        assert_eq!(state.commit_point(), Offset::new(42));
    }

    #[test]
    fn test_out_of_order_success() {
        let mut state = ActivePartition::new(tp(), Epoch::new(1), Offset::new(0));
        let work = state.register_polled_batch(records(0..5));
        assert_eq!(work.len(), 5);
        assert_eq!(state.commit_point(), Offset::new(0));

        assert!(state.on_success(Offset::new(2)));
        assert!(state.on_success(Offset::new(1)));
        assert_eq!(state.commit_point(), Offset::new(0));
        assert_eq!(state.highest_succeeded(), Some(Offset::new(2)));

        assert!(state.on_success(Offset::new(0)));
        assert_eq!(state.commit_point(), Offset::new(3));

        // Duplicate completion is a no-op.
        assert!(!state.on_success(Offset::new(0)));

        assert!(state.on_success(Offset::new(3)));
        assert!(state.on_success(Offset::new(4)));
        assert_eq!(state.commit_point(), Offset::new(5));
        assert!(state.incompletes().is_empty());
    }

    #[test]
    fn test_compacted_topic() {
        let mut state = restored();
        let missing = [80, 95, 97];
        let polled = (COMMITTED..=HIGHEST_SEEN - 2).filter(|o| !missing.contains(o));

        let work = state.register_polled_batch(records(polled));

        assert_eq!(state.commit_point(), Offset::new(COMMITTED));
        let expected: Vec<u64> = TRACKED.iter().copied().filter(|o| !missing.contains(o)).collect();
        assert_eq!(incompletes(&state), expected);
        // Only still-incomplete records are re-offered.
        let offered: Vec<u64> = work.iter().map(|r| r.offset.get()).collect();
        assert_eq!(offered, vec![11, 15, 20, 60, 96, 98]);
    }

    #[test]
    fn test_committed_offset_lower() {
        let mut state = restored();
        let lower = COMMITTED - 5;

        let work = state.register_polled_batch(records(lower..=HIGHEST_SEEN));

        assert_eq!(state.commit_point(), Offset::new(lower));
        assert_eq!(incompletes(&state), (lower..=HIGHEST_SEEN).collect::<Vec<_>>());
        assert_eq!(work.len() as u64, HIGHEST_SEEN - lower + 1);
    }

    #[test]
    fn test_bootstrap_poll_offset_higher() {
        let mut state = restored();
        let higher = 20;

        state.register_polled_batch(records(higher..=HIGHEST_SEEN));

        assert_eq!(state.commit_point(), Offset::new(higher));
        let expected: Vec<u64> = TRACKED.iter().copied().filter(|o| *o >= higher).collect();
        assert_eq!(incompletes(&state), expected);
    }

    #[test]
    fn test_bootstrap_higher_with_nothing_tracked() {
        let mut state = ActivePartition::new(tp(), Epoch::new(1), Offset::new(10));
        state.register_polled_batch(records(50..52));
        assert_eq!(state.commit_point(), Offset::new(50));
        assert!(state.on_success(Offset::new(50)));
        assert!(state.on_success(Offset::new(51)));
        assert_eq!(state.commit_point(), Offset::new(52));
    }

    #[test]
    fn test_replay_of_completed_skipped() {
        let mut state = ActivePartition::new(tp(), Epoch::new(1), Offset::new(0));
        state.register_polled_batch(records(0..4));
        state.on_success(Offset::new(1));

        let work = state.register_polled_batch(records(0..4));
        let offered: Vec<u64> = work.iter().map(|r| r.offset.get()).collect();
        assert_eq!(offered, vec![0, 2, 3]);
        assert!(state.is_record_previously_completed(Offset::new(1)));
        assert!(!state.is_record_previously_completed(Offset::new(9)));
    }

    #[test]
    fn test_highest_seen_never_decreases() {
        let mut state = ActivePartition::new(tp(), Epoch::new(1), Offset::new(0));
        state.register_polled_batch(records(0..10));
        state.register_polled_batch(records(3..5));
        assert_eq!(state.highest_seen(), Some(Offset::new(9)));
    }

    #[test]
    fn test_stale_epoch_batch_dropped() {
        let mut state = PartitionState::Active(ActivePartition::new(tp(), Epoch::new(2), Offset::new(0)));
        assert!(state.register_polled_batch(Epoch::new(1), records(0..3)).is_empty());
        assert_eq!(state.number_of_incompletes(), 0);
        assert!(state.is_stale(Epoch::new(1)));
        assert!(!state.is_stale(Epoch::new(2)));
    }

    #[test]
    fn test_removed_is_inert() {
        let mut state = PartitionState::Removed;
        assert!(state.is_removed());
        assert!(state.is_stale(Epoch::new(0)));
        assert!(state.register_polled_batch(Epoch::new(0), records(0..3)).is_empty());
        assert!(!state.on_success(Offset::new(0)));
        assert_eq!(state.commit_point(), None);
        assert!(!state.is_dirty());
        assert!(state.is_allowed_more_records());
    }

    #[test]
    fn test_commit_data_round_trips_through_restore() {
        let codec = OffsetMapCodec::default();
        let mut state = ActivePartition::new(tp(), Epoch::new(1), Offset::new(100));
        state.register_polled_batch(records(100..120));
        for o in [101, 102, 105, 110, 111] {
            state.on_success(Offset::new(o));
        }

        let data = state.commit_data(&codec);
        assert_eq!(data.offset, Offset::new(100));
        let metadata = data.metadata.unwrap();

        let decoded = codec.decode(data.offset, &metadata).unwrap();
        let restored = ActivePartition::restore(tp(), Epoch::new(2), data.offset, decoded);
        assert_eq!(restored.commit_point(), Offset::new(100));
        assert_eq!(restored.highest_seen(), Some(Offset::new(111)));
        assert!(restored.is_record_previously_completed(Offset::new(105)));
        assert!(!restored.is_record_previously_completed(Offset::new(106)));
        // Above highest succeeded is re-polled as new work.
        assert!(!restored.is_record_previously_completed(Offset::new(115)));
    }

    #[test]
    fn test_commit_without_incompletes_has_no_metadata() {
        let codec = OffsetMapCodec::default();
        let mut state = ActivePartition::new(tp(), Epoch::new(1), Offset::new(0));
        state.register_polled_batch(records(0..2));
        state.on_success(Offset::new(0));
        state.on_success(Offset::new(1));

        let data = state.commit_data(&codec);
        assert_eq!(data.offset, Offset::new(2));
        assert_eq!(data.metadata, None);
        assert_eq!(data.encoding_error, None);
    }

    #[test]
    fn test_dirty_cleared_only_if_unchanged() {
        let codec = OffsetMapCodec::default();
        let mut state = ActivePartition::new(tp(), Epoch::new(1), Offset::new(0));
        state.register_polled_batch(records(0..3));
        assert!(state.is_dirty());

        let data = state.commit_data(&codec);
        state.on_success(Offset::new(2));
        state.on_offset_commit_success(data.generation);
        assert!(state.is_dirty());

        let data = state.commit_data(&codec);
        state.on_offset_commit_success(data.generation);
        assert!(!state.is_dirty());
    }

    #[test]
    fn test_metadata_pressure_disallows_more_records() {
        // Tiny budget: any metadata is over the pressure threshold.
        let codec = OffsetMapCodec::new(64, 4, strand_core::InvalidMetadataPolicy::Fail);
        let mut state = ActivePartition::new(tp(), Epoch::new(1), Offset::new(0));
        state.register_polled_batch(records(0..10));
        state.on_success(Offset::new(9));

        let data = state.commit_data(&codec);
        assert!(data.metadata.is_some());
        let wrapped = PartitionState::Active(state);
        assert!(!wrapped.is_allowed_more_records());
        assert!(wrapped.is_blocking_progress(Offset::new(0)));
        assert!(!wrapped.is_blocking_progress(Offset::new(9)));
    }
}
