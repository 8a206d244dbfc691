//! Partition numbers and assignment epochs.
//!
//! Both are plain `u64`s on the wire. Wrapping them keeps an epoch from
//! being passed where a partition number is expected, and the reverse.

use std::fmt;

/// Partition number within a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct PartitionId(u64);

impl PartitionId {
    /// Wraps a raw partition number.
    #[must_use]
    pub const fn new(partition: u64) -> Self {
        Self(partition)
    }

    /// The raw partition number.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Assignment generation of a partition.
///
/// Starts at zero and is bumped on every assignment, revocation and loss.
/// Work carries the epoch it was polled under; a result whose epoch no
/// longer matches its partition's is stale and gets dropped.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct Epoch(u64);

impl Epoch {
    /// Wraps a raw epoch.
    #[must_use]
    pub const fn new(epoch: u64) -> Self {
        Self(epoch)
    }

    /// The raw epoch.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// The epoch after this one.
    ///
    /// # Panics
    /// Panics if the epoch is `u64::MAX`.
    #[must_use]
    pub const fn next(self) -> Self {
        // TigerStyle: Assert preconditions.
        assert!(self.0 < u64::MAX, "epoch overflow");
        Self(self.0 + 1)
    }
}

impl fmt::Debug for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "epoch({})", self.0)
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}
