//! Partition state manager.
//!
//! Owns the state of every partition this consumer has been assigned, and
//! the epoch counter of each. Epochs outlive assignments: revoking a
//! partition bumps its epoch and leaves a `Removed` state behind, so work
//! that arrives late is recognised as stale.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use strand_core::{Epoch, Offset, PolledRecord, TopicPartition};
use strand_offsets::OffsetMapCodec;
use tracing::{debug, info, warn};

use crate::error::{StateError, StateResult};
use crate::partition_state::{ActivePartition, CommitData, PartitionState};

type StateHandle = Arc<Mutex<PartitionState>>;

/// A partition being assigned, with what the broker had committed for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignedPartition {
    /// The partition.
    pub tp: TopicPartition,
    /// Committed offset, or where consumption starts if none was committed.
    pub committed: Offset,
    /// Committed metadata string.
    pub metadata: Option<String>,
}

impl AssignedPartition {
    /// Creates an assignment without metadata.
    #[must_use]
    pub const fn new(tp: TopicPartition, committed: Offset) -> Self {
        Self {
            tp,
            committed,
            metadata: None,
        }
    }

    /// Sets the committed metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: impl Into<String>) -> Self {
        self.metadata = Some(metadata.into());
        self
    }
}

#[derive(Debug, Default)]
struct Partitions {
    states: HashMap<TopicPartition, StateHandle>,
    epochs: HashMap<TopicPartition, Epoch>,
}

impl Partitions {
    fn bump_epoch(&mut self, tp: &TopicPartition) -> Epoch {
        let epoch = self.epochs.entry(tp.clone()).or_default();
        *epoch = epoch.next();
        *epoch
    }
}

/// Tracks the state of every partition.
#[derive(Debug)]
pub struct PartitionStateManager {
    codec: OffsetMapCodec,
    max_partitions: u32,
    partitions: RwLock<Partitions>,
}

impl PartitionStateManager {
    /// Creates a manager.
    #[must_use]
    pub fn new(codec: OffsetMapCodec, max_partitions: u32) -> Self {
        Self {
            codec,
            max_partitions,
            partitions: RwLock::new(Partitions::default()),
        }
    }

    /// The metadata codec.
    #[must_use]
    pub const fn codec(&self) -> &OffsetMapCodec {
        &self.codec
    }

    fn state(&self, tp: &TopicPartition) -> Option<StateHandle> {
        self.partitions.read().states.get(tp).cloned()
    }

    // -------------------------------------------------------------------------
    // Rebalance
    // -------------------------------------------------------------------------

    /// Assigns partitions, restoring each from its committed offset and metadata.
    ///
    /// All metadata is decoded before any state changes, so a failure leaves
    /// the manager untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if metadata can not be decoded under the configured
    /// policy, or if the partition limit would be exceeded.
    pub fn on_partitions_assigned(&self, assigned: &[AssignedPartition]) -> StateResult<()> {
        let mut restored = Vec::with_capacity(assigned.len());
        for assignment in assigned {
            let decoded = match &assignment.metadata {
                Some(metadata) => self
                    .codec
                    .decode(assignment.committed, metadata)
                    .map_err(|source| StateError::Restore {
                        tp: assignment.tp.clone(),
                        source,
                    })?,
                None => strand_offsets::HighestOffsetAndIncompletes::from_committed(
                    assignment.committed,
                ),
            };
            restored.push((assignment, decoded));
        }

        let mut partitions = self.partitions.write();
        let new_count = assigned
            .iter()
            .filter(|a| !partitions.states.contains_key(&a.tp))
            .count();
        let count = (partitions.states.len() + new_count) as u64;
        if count > u64::from(self.max_partitions) {
            return Err(StateError::TooManyPartitions {
                count,
                max: self.max_partitions,
            });
        }

        for (assignment, decoded) in restored {
            let epoch = partitions.bump_epoch(&assignment.tp);
            let incompletes = decoded.incompletes.len();
            let state = ActivePartition::restore(
                assignment.tp.clone(),
                epoch,
                assignment.committed,
                decoded,
            );
            info!(
                partition = %assignment.tp,
                epoch = %epoch,
                committed = %assignment.committed,
                incompletes,
                "Partition assigned"
            );
            partitions
                .states
                .insert(assignment.tp.clone(), Arc::new(Mutex::new(PartitionState::Active(state))));
        }
        Ok(())
    }

    /// Marks partitions revoked. Their in-flight work becomes stale.
    pub fn on_partitions_revoked(&self, tps: &[TopicPartition]) {
        self.remove(tps, "revoked");
    }

    /// Marks partitions lost. Their in-flight work becomes stale.
    pub fn on_partitions_lost(&self, tps: &[TopicPartition]) {
        self.remove(tps, "lost");
    }

    fn remove(&self, tps: &[TopicPartition], reason: &'static str) {
        let mut partitions = self.partitions.write();
        for tp in tps {
            let epoch = partitions.bump_epoch(tp);
            if let Some(state) = partitions.states.get(tp) {
                *state.lock() = PartitionState::Removed;
            }
            info!(partition = %tp, epoch = %epoch, reason, "Partition removed");
        }
    }

    // -------------------------------------------------------------------------
    // Work
    // -------------------------------------------------------------------------

    /// Current epoch of a partition. Zero if it was never assigned.
    #[must_use]
    pub fn epoch_of(&self, tp: &TopicPartition) -> Epoch {
        self.partitions
            .read()
            .epochs
            .get(tp)
            .copied()
            .unwrap_or_default()
    }

    /// Registers a batch polled under `epoch` and returns the records that
    /// need processing.
    pub fn register_polled_batch(
        &self,
        tp: &TopicPartition,
        epoch: Epoch,
        records: Vec<PolledRecord>,
    ) -> Vec<PolledRecord> {
        match self.state(tp) {
            Some(state) => state.lock().register_polled_batch(epoch, records),
            None => {
                warn!(partition = %tp, count = records.len(), "Dropping batch for unknown partition");
                Vec::new()
            }
        }
    }

    /// Returns true if work stamped with `epoch` for `tp` must be discarded.
    #[must_use]
    pub fn check_if_work_is_stale(&self, tp: &TopicPartition, epoch: Epoch) -> bool {
        self.state(tp).map_or(true, |s| s.lock().is_stale(epoch))
    }

    /// Marks an offset complete.
    pub fn on_success(&self, tp: &TopicPartition, offset: Offset) -> bool {
        self.state(tp).is_some_and(|s| s.lock().on_success(offset))
    }

    /// Returns true if `tp` may take more records.
    #[must_use]
    pub fn is_allowed_more_records(&self, tp: &TopicPartition) -> bool {
        self.state(tp).map_or(true, |s| s.lock().is_allowed_more_records())
    }

    /// Returns true if completing `offset` could advance `tp`'s commit state.
    #[must_use]
    pub fn is_blocking_progress(&self, tp: &TopicPartition, offset: Offset) -> bool {
        self.state(tp).is_some_and(|s| s.lock().is_blocking_progress(offset))
    }

    /// Commit point of a partition, if assigned.
    #[must_use]
    pub fn commit_point(&self, tp: &TopicPartition) -> Option<Offset> {
        self.state(tp).and_then(|s| s.lock().commit_point())
    }

    // -------------------------------------------------------------------------
    // Commits
    // -------------------------------------------------------------------------

    /// Builds commit data for every dirty partition.
    #[must_use]
    pub fn collect_dirty_commit_data(&self) -> Vec<(TopicPartition, CommitData)> {
        let handles: Vec<(TopicPartition, StateHandle)> = self
            .partitions
            .read()
            .states
            .iter()
            .map(|(tp, s)| (tp.clone(), Arc::clone(s)))
            .collect();

        let mut data = Vec::new();
        for (tp, handle) in handles {
            let mut state = handle.lock();
            if let PartitionState::Active(active) = &mut *state {
                if active.is_dirty() {
                    data.push((tp, active.commit_data(&self.codec)));
                }
            }
        }
        data.sort_by(|a, b| a.0.cmp(&b.0));
        debug!(partitions = data.len(), "Collected dirty commit data");
        data
    }

    /// Clears dirty flags after a successful commit.
    pub fn on_offset_commit_success(&self, committed: &[(TopicPartition, CommitData)]) {
        for (tp, data) in committed {
            if let Some(handle) = self.state(tp) {
                if let PartitionState::Active(active) = &mut *handle.lock() {
                    active.on_offset_commit_success(data.generation);
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Counters
    // -------------------------------------------------------------------------

    /// Total incomplete offsets across partitions.
    #[must_use]
    pub fn number_of_incompletes(&self) -> u64 {
        self.partitions
            .read()
            .states
            .values()
            .map(|s| s.lock().number_of_incompletes())
            .sum()
    }

    /// Returns true if any partition has incomplete offsets.
    #[must_use]
    pub fn has_incompletes(&self) -> bool {
        self.number_of_incompletes() > 0
    }

    /// Returns true if any partition has uncommitted completions.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.partitions
            .read()
            .states
            .values()
            .any(|s| s.lock().is_dirty())
    }

    /// Number of currently assigned partitions.
    #[must_use]
    pub fn partition_count(&self) -> usize {
        self.partitions
            .read()
            .states
            .values()
            .filter(|s| !s.lock().is_removed())
            .count()
    }

    /// Currently assigned partitions, sorted.
    #[must_use]
    pub fn assigned_partitions(&self) -> Vec<TopicPartition> {
        let mut tps: Vec<TopicPartition> = self
            .partitions
            .read()
            .states
            .iter()
            .filter(|(_, s)| !s.lock().is_removed())
            .map(|(tp, _)| tp.clone())
            .collect();
        tps.sort();
        tps
    }
}
