//! Broker client seams.
//!
//! The control loop talks to the broker only through these traits.
//! Production code wraps a real client; tests and the bench binary use
//! [`crate::simulated::SimulatedBroker`].
//!
//! # Design
//!
//! Rebalances are reported in-band: a poll returns the assignment changes
//! that happened during it alongside the records, in the order they
//! happened. The controller applies the events before registering records,
//! so records are always stamped with the epoch of the assignment they were
//! fetched under.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use strand_core::{Offset, PolledRecord, TopicPartition};
use strand_state::{AssignedPartition, CommitData};

use crate::error::RuntimeResult;

// -----------------------------------------------------------------------------
// Poll Results
// -----------------------------------------------------------------------------

/// An assignment change observed during a poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebalanceEvent {
    /// Partitions were assigned, with their committed offsets and metadata.
    Assigned(Vec<AssignedPartition>),
    /// Partitions were revoked cleanly.
    Revoked(Vec<TopicPartition>),
    /// Partitions were lost without a chance to commit.
    Lost(Vec<TopicPartition>),
}

/// Everything a single poll returned.
#[derive(Debug, Clone, Default)]
pub struct PolledBatch {
    /// Assignment changes, in the order they happened.
    pub events: Vec<RebalanceEvent>,
    /// Fetched records per partition, each in offset order.
    pub records: BTreeMap<TopicPartition, Vec<PolledRecord>>,
}

impl PolledBatch {
    /// Creates an empty batch.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builder: add an event.
    #[must_use]
    pub fn with_event(mut self, event: RebalanceEvent) -> Self {
        self.events.push(event);
        self
    }

    /// Builder: add a record.
    #[must_use]
    pub fn with_record(mut self, record: PolledRecord) -> Self {
        self.records.entry(record.tp.clone()).or_default().push(record);
        self
    }

    /// Number of records fetched.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.records.values().map(Vec::len).sum()
    }

    /// Returns true if the poll returned nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.records.values().all(Vec::is_empty)
    }
}

// -----------------------------------------------------------------------------
// Commit Payloads
// -----------------------------------------------------------------------------

/// A committed position for one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetAndMetadata {
    /// Next offset to consume.
    pub offset: Offset,
    /// Encoded incomplete offsets above `offset`, if any.
    pub metadata: Option<String>,
}

impl From<&CommitData> for OffsetAndMetadata {
    fn from(data: &CommitData) -> Self {
        Self {
            offset: data.offset,
            metadata: data.metadata.clone(),
        }
    }
}

/// Offsets to commit, keyed by partition.
pub type CommitOffsets = BTreeMap<TopicPartition, OffsetAndMetadata>;

/// Builds a commit payload from collected commit data.
#[must_use]
pub fn commit_offsets(data: &[(TopicPartition, CommitData)]) -> CommitOffsets {
    data.iter()
        .map(|(tp, d)| (tp.clone(), OffsetAndMetadata::from(d)))
        .collect()
}

/// Consumer group identity, needed to commit offsets inside a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMetadata {
    /// Consumer group name.
    pub group_id: String,
    /// Group generation.
    pub generation: u64,
    /// This member's id.
    pub member_id: String,
}

/// A record to produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerRecord {
    /// Destination topic.
    pub topic: String,
    /// Optional key.
    pub key: Option<Bytes>,
    /// Payload.
    pub value: Bytes,
}

impl ProducerRecord {
    /// Creates a keyless record.
    #[must_use]
    pub fn new(topic: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            key: None,
            value: value.into(),
        }
    }

    /// Builder: set the key.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<Bytes>) -> Self {
        self.key = Some(key.into());
        self
    }
}

// -----------------------------------------------------------------------------
// Traits
// -----------------------------------------------------------------------------

/// Consumer side of a broker client.
///
/// # Implementation Notes
///
/// Implementations must be `Send + Sync`. The controller holds the client in
/// an `Arc` and calls it only from its own task, apart from [`Self::wakeup`].
#[async_trait]
pub trait ConsumerClient: Send + Sync + 'static {
    /// Fetches records and reports assignment changes.
    ///
    /// # Errors
    ///
    /// Returns an error if the fetch fails.
    async fn poll(&self, timeout: Duration) -> RuntimeResult<PolledBatch>;

    /// Commits offsets and waits for the broker to acknowledge.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit is rejected.
    async fn commit_sync(&self, offsets: CommitOffsets) -> RuntimeResult<()>;

    /// Sends a commit without waiting for the broker to acknowledge.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit could not be sent.
    async fn commit_async(&self, offsets: CommitOffsets) -> RuntimeResult<()>;

    /// Currently assigned partitions.
    fn assignment(&self) -> Vec<TopicPartition>;

    /// Stops fetching from `tps`.
    fn pause(&self, tps: &[TopicPartition]);

    /// Resumes fetching from `tps`.
    fn resume(&self, tps: &[TopicPartition]);

    /// Interrupts a blocked poll.
    fn wakeup(&self);

    /// Group identity for transactional commits.
    fn group_metadata(&self) -> GroupMetadata;
}

/// Transactional producer side of a broker client.
#[async_trait]
pub trait ProducerClient: Send + Sync + 'static {
    /// Opens a transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if a transaction is already open or the broker refuses.
    async fn begin_transaction(&self) -> RuntimeResult<()>;

    /// Sends a record inside the open transaction. Returns its offset.
    ///
    /// # Errors
    ///
    /// Returns an error if no transaction is open or the send fails.
    async fn send(&self, record: ProducerRecord) -> RuntimeResult<Offset>;

    /// Adds consumer offsets to the open transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if no transaction is open.
    async fn send_offsets_to_transaction(
        &self,
        offsets: CommitOffsets,
        group: &GroupMetadata,
    ) -> RuntimeResult<()>;

    /// Commits the open transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if no transaction is open or the commit fails.
    async fn commit_transaction(&self) -> RuntimeResult<()>;

    /// Aborts the open transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if no transaction is open.
    async fn abort_transaction(&self) -> RuntimeResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_polled_batch_builder() {
        let tp = TopicPartition::new("t", 0);
        let batch = PolledBatch::empty()
            .with_event(RebalanceEvent::Revoked(vec![tp.clone()]))
            .with_record(PolledRecord::new(tp.clone(), 0, "a"))
            .with_record(PolledRecord::new(tp.clone(), 1, "b"));

        assert!(!batch.is_empty());
        assert_eq!(batch.record_count(), 2);
        assert_eq!(batch.records[&tp].len(), 2);
        assert!(PolledBatch::empty().is_empty());
    }

    #[test]
    fn test_commit_offsets_from_commit_data() {
        let tp = TopicPartition::new("t", 1);
        let data = vec![(
            tp.clone(),
            CommitData {
                offset: Offset::new(7),
                metadata: Some("AQ==".to_string()),
                encoding_error: None,
                generation: 3,
            },
        )];
        let offsets = commit_offsets(&data);
        assert_eq!(offsets[&tp].offset, Offset::new(7));
        assert_eq!(offsets[&tp].metadata.as_deref(), Some("AQ=="));
    }
}
