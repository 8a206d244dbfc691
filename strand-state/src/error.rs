//! Work tracking error types.

use strand_core::TopicPartition;
use strand_flow::FlowError;
use strand_offsets::OffsetError;
use thiserror::Error;

/// Result type for work tracking operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur while tracking work.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateError {
    /// Committed metadata for an assigned partition could not be restored.
    #[error("failed to restore offsets for {tp}: {source}")]
    Restore {
        /// The partition being assigned.
        tp: TopicPartition,
        /// The decode failure.
        #[source]
        source: OffsetError,
    },

    /// Engine configuration was rejected.
    #[error("invalid configuration: {source}")]
    InvalidConfig {
        /// The validation failure.
        #[source]
        source: strand_core::Error,
    },

    /// The load factor configuration was rejected.
    #[error("invalid load factor: {source}")]
    InvalidLoadFactor {
        /// The validation failure.
        #[source]
        source: FlowError,
    },

    /// Too many partitions are assigned.
    #[error("too many partitions assigned: {count} > {max}")]
    TooManyPartitions {
        /// Partitions that would be tracked.
        count: u64,
        /// Maximum allowed.
        max: u32,
    },
}

impl From<strand_core::Error> for StateError {
    fn from(source: strand_core::Error) -> Self {
        Self::InvalidConfig { source }
    }
}

impl From<FlowError> for StateError {
    fn from(source: FlowError) -> Self {
        Self::InvalidLoadFactor { source }
    }
}
