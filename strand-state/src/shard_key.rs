//! Shard identity.
//!
//! Partition and unordered processing share one queue per partition; they
//! differ only in how many queued records may be in flight at once. Key
//! ordering gets one queue per record key within a partition.

use std::fmt;

use bytes::Bytes;
use strand_core::{ProcessingOrder, TopicPartition};

use crate::work_container::WorkContainer;

/// Identity of an ordering unit.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ShardKey {
    /// All records of a partition.
    TopicPartition(TopicPartition),
    /// All records of a partition with the same key. A null key is its own key.
    Key {
        /// The partition.
        tp: TopicPartition,
        /// The record key.
        key: Option<Bytes>,
    },
}

impl ShardKey {
    /// Computes the shard key of a container for an ordering mode.
    #[must_use]
    pub fn of(wc: &WorkContainer, ordering: ProcessingOrder) -> Self {
        match ordering {
            ProcessingOrder::Key => Self::Key {
                tp: wc.tp().clone(),
                key: wc.key().cloned(),
            },
            ProcessingOrder::Partition | ProcessingOrder::Unordered => {
                Self::TopicPartition(wc.tp().clone())
            }
        }
    }

    /// The partition the shard belongs to.
    #[must_use]
    pub const fn tp(&self) -> &TopicPartition {
        match self {
            Self::TopicPartition(tp) | Self::Key { tp, .. } => tp,
        }
    }
}

impl fmt::Display for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TopicPartition(tp) => write!(f, "{tp}"),
            Self::Key { tp, key: Some(key) } => write!(f, "{tp}/{key:?}"),
            Self::Key { tp, key: None } => write!(f, "{tp}/<null>"),
        }
    }
}
