//! Time-ordered queue of failed records awaiting retry.
//!
//! Failed containers stay in their shard; this queue only indexes when each
//! becomes eligible again so the control loop knows how long it may sleep.

use std::collections::BTreeSet;

use strand_core::{Offset, TopicPartition};

/// Ordered by due time, then offset, then partition.
type RetryEntry = (u64, Offset, TopicPartition);

/// Index of pending retries.
#[derive(Debug, Default)]
pub struct RetryQueue {
    entries: BTreeSet<RetryEntry>,
}

impl RetryQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a retry due at `due_at_us`.
    pub fn insert(&mut self, due_at_us: u64, tp: TopicPartition, offset: Offset) -> bool {
        self.entries.insert((due_at_us, offset, tp))
    }

    /// Removes a retry. Returns false if it was not queued.
    pub fn remove(&mut self, due_at_us: u64, tp: &TopicPartition, offset: Offset) -> bool {
        self.entries.remove(&(due_at_us, offset, tp.clone()))
    }

    /// Removes every retry for a partition.
    pub fn remove_partition(&mut self, tp: &TopicPartition) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(_, _, entry_tp)| entry_tp != tp);
        before - self.entries.len()
    }

    /// Earliest due time.
    #[must_use]
    pub fn earliest_due_us(&self) -> Option<u64> {
        self.entries.first().map(|(due, _, _)| *due)
    }

    /// Number of queued retries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordered_by_due_then_offset() {
        let tp = TopicPartition::new("t", 0);
        let mut queue = RetryQueue::new();
        queue.insert(300, tp.clone(), Offset::new(1));
        queue.insert(100, tp.clone(), Offset::new(9));
        queue.insert(100, tp.clone(), Offset::new(2));

        assert_eq!(queue.earliest_due_us(), Some(100));
        let order: Vec<u64> = queue.entries.iter().map(|(_, o, _)| o.get()).collect();
        assert_eq!(order, vec![2, 9, 1]);

        assert!(queue.remove(100, &tp, Offset::new(2)));
        assert!(!queue.remove(100, &tp, Offset::new(2)));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_remove_partition() {
        let a = TopicPartition::new("t", 0);
        let b = TopicPartition::new("t", 1);
        let mut queue = RetryQueue::new();
        queue.insert(1, a.clone(), Offset::new(1));
        queue.insert(2, b, Offset::new(1));
        queue.insert(3, a.clone(), Offset::new(2));

        assert_eq!(queue.remove_partition(&a), 2);
        assert_eq!(queue.earliest_due_us(), Some(2));
    }
}
