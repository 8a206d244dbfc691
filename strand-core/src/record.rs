//! Records as delivered by the broker client.
//!
//! The engine never inspects record values. It needs the partition, the
//! offset, and (for key ordering) the key.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::PartitionId;

/// Offset in a partition log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Offset(u64);

impl Offset {
    /// Creates an offset from a raw value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw offset value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns the next offset.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Returns the previous offset, saturating at zero.
    #[must_use]
    pub const fn prev(self) -> Self {
        Self(self.0.saturating_sub(1))
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Offset {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// A topic and partition pair.
///
/// The topic name is reference counted so that cloning a `TopicPartition` into
/// every work container and shard key stays cheap.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TopicPartition {
    topic: Arc<str>,
    partition: PartitionId,
}

impl TopicPartition {
    /// Creates a new topic partition.
    #[must_use]
    pub fn new(topic: impl Into<Arc<str>>, partition: u64) -> Self {
        Self {
            topic: topic.into(),
            partition: PartitionId::new(partition),
        }
    }

    /// Returns the topic name.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Returns the shared topic name.
    #[must_use]
    pub fn topic_arc(&self) -> Arc<str> {
        Arc::clone(&self.topic)
    }

    /// Returns the partition number.
    #[must_use]
    pub const fn partition(&self) -> PartitionId {
        self.partition
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition.get())
    }
}

/// A record returned by a broker poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolledRecord {
    /// Partition the record was read from.
    pub tp: TopicPartition,
    /// Offset in the partition.
    pub offset: Offset,
    /// Optional key, used for key ordering.
    pub key: Option<Bytes>,
    /// The record payload.
    pub value: Bytes,
    /// Broker timestamp in microseconds since the Unix epoch.
    pub timestamp_us: u64,
}

impl PolledRecord {
    /// Creates a record with a value only.
    #[must_use]
    pub fn new(tp: TopicPartition, offset: u64, value: impl Into<Bytes>) -> Self {
        Self {
            tp,
            offset: Offset::new(offset),
            key: None,
            value: value.into(),
            timestamp_us: 0,
        }
    }

    /// Sets the key.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<Bytes>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Sets the timestamp.
    #[must_use]
    pub const fn with_timestamp(mut self, timestamp_us: u64) -> Self {
        self.timestamp_us = timestamp_us;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_arithmetic() {
        assert_eq!(Offset::new(5).next(), Offset::new(6));
        assert_eq!(Offset::new(0).prev(), Offset::new(0));
        assert_eq!(format!("{}", Offset::new(42)), "42");
    }

    #[test]
    fn test_topic_partition_structural_equality() {
        let a = TopicPartition::new("orders", 3);
        let b = TopicPartition::new(String::from("orders"), 3);
        assert_eq!(a, b);
        assert_eq!(format!("{a}"), "orders-3");
        assert!(TopicPartition::new("orders", 2) < a);
    }

    #[test]
    fn test_record_builder() {
        let record = PolledRecord::new(TopicPartition::new("t", 0), 10, "v")
            .with_key("k")
            .with_timestamp(99);
        assert_eq!(record.offset, Offset::new(10));
        assert_eq!(record.key, Some(Bytes::from("k")));
        assert_eq!(record.timestamp_us, 99);
    }
}
