//! Sharded work selection.
//!
//! Shards live in an ordered map so that selection can resume where the
//! previous pass stopped. Each shard has its own lock; the map lock is only
//! held to find or create shards.
//!
//! # Selection
//!
//! Selection is depth first: each shard gives up everything it can before
//! the next shard is visited. A pass that fills `max` before visiting every
//! shard remembers the next shard and starts there on the following pass.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use strand_core::{ProcessingOrder, TopicPartition};
use strand_flow::LoopingResumingIterator;
use tracing::{debug, trace};

use crate::retry_queue::RetryQueue;
use crate::shard::ProcessingShard;
use crate::shard_key::ShardKey;
use crate::work_container::WorkContainer;

type ShardHandle = Arc<Mutex<ProcessingShard>>;

/// Owns every shard and the retry index.
#[derive(Debug)]
pub struct ShardManager {
    ordering: ProcessingOrder,
    shards: RwLock<BTreeMap<ShardKey, ShardHandle>>,
    retry_queue: Mutex<RetryQueue>,
    resume_from: Mutex<Option<ShardKey>>,
}

impl ShardManager {
    /// Creates a manager for an ordering mode.
    #[must_use]
    pub fn new(ordering: ProcessingOrder) -> Self {
        Self {
            ordering,
            shards: RwLock::new(BTreeMap::new()),
            retry_queue: Mutex::new(RetryQueue::new()),
            resume_from: Mutex::new(None),
        }
    }

    /// The ordering mode.
    #[must_use]
    pub const fn ordering(&self) -> ProcessingOrder {
        self.ordering
    }

    /// Queues a container in its shard. Returns false if its offset was
    /// already queued or in flight.
    pub fn add_work(&self, wc: WorkContainer) -> bool {
        let key = ShardKey::of(&wc, self.ordering);
        let existing = self.shards.read().get(&key).cloned();
        let shard = existing.unwrap_or_else(|| {
            let mut shards = self.shards.write();
            Arc::clone(
                shards
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(Mutex::new(ProcessingShard::new(key, self.ordering)))),
            )
        });
        // Bound to a local so the guard drops before `shard`.
        let added = shard.lock().add(wc);
        added
    }

    /// Selects up to `max` containers, depth first across shards.
    ///
    /// `could_be_taken` lets the caller veto work, for example for stale or
    /// back-pressured partitions.
    pub fn select_work(
        &self,
        max: usize,
        current_time_us: u64,
        mut could_be_taken: impl FnMut(&WorkContainer) -> bool,
    ) -> Vec<WorkContainer> {
        let snapshot: Vec<(ShardKey, ShardHandle)> = {
            let shards = self.shards.read();
            let resume = self.resume_from.lock().clone();
            LoopingResumingIterator::new(&*shards, resume.as_ref())
                .filter_map(|key| shards.get(&key).map(|s| (key, Arc::clone(s))))
                .collect()
        };

        let mut work = Vec::new();
        let mut next_resume = None;
        for (idx, (key, shard)) in snapshot.iter().enumerate() {
            if work.len() >= max {
                next_resume = Some(key.clone());
                break;
            }
            let taken = shard
                .lock()
                .take_available(max - work.len(), current_time_us, &mut could_be_taken);
            if !taken.is_empty() {
                trace!(shard = %key, count = taken.len(), "Took work from shard");
            }
            work.extend(taken);
            if work.len() >= max {
                next_resume = snapshot.get(idx + 1).map(|(k, _)| k.clone());
                break;
            }
        }
        *self.resume_from.lock() = next_resume;

        let mut retries = self.retry_queue.lock();
        for wc in &work {
            if let Some(due) = wc.retry_due_at_us() {
                retries.remove(due, wc.tp(), wc.offset());
            }
        }
        work
    }

    /// Removes a succeeded container from its shard. Idempotent.
    pub fn on_success(&self, wc: &WorkContainer) -> bool {
        let key = ShardKey::of(wc, self.ordering);
        let Some(shard) = self.shards.read().get(&key).cloned() else {
            return false;
        };
        let removed = shard.lock().on_success(wc.offset());
        if removed {
            if let Some(due) = wc.retry_due_at_us() {
                self.retry_queue.lock().remove(due, wc.tp(), wc.offset());
            }
            self.remove_if_empty(&key);
        }
        removed
    }

    /// Returns a failed container to its shard, eligible again after
    /// `retry_delay`. Idempotent: a container whose slot is gone is dropped.
    pub fn on_failure(&self, mut wc: WorkContainer, retry_delay: Duration) -> bool {
        let key = ShardKey::of(&wc, self.ordering);
        let Some(shard) = self.shards.read().get(&key).cloned() else {
            return false;
        };
        wc.requeue_after_failure(retry_delay);
        let due = wc.retry_due_at_us();
        let (tp, offset) = (wc.tp().clone(), wc.offset());
        let requeued = shard.lock().on_failure(wc);
        if requeued {
            if let Some(due) = due {
                self.retry_queue.lock().insert(due, tp, offset);
            }
        }
        requeued
    }

    /// Returns a container that exhausted its retries to its shard without
    /// scheduling a retry. It stays incomplete and keeps its slot.
    pub fn park(&self, mut wc: WorkContainer) -> bool {
        let key = ShardKey::of(&wc, self.ordering);
        let Some(shard) = self.shards.read().get(&key).cloned() else {
            return false;
        };
        wc.end_flight();
        let parked = shard.lock().on_failure(wc);
        parked
    }

    fn remove_if_empty(&self, key: &ShardKey) {
        let mut shards = self.shards.write();
        let empty = shards.get(key).is_some_and(|s| s.lock().is_empty());
        if empty {
            shards.remove(key);
        }
    }

    /// Drops every shard and retry of a partition. Returns the number of
    /// queued containers dropped.
    pub fn remove_partition(&self, tp: &TopicPartition) -> usize {
        let mut dropped = 0;
        {
            let mut shards = self.shards.write();
            shards.retain(|key, shard| {
                if key.tp() == tp {
                    dropped += shard.lock().queued_count();
                    false
                } else {
                    true
                }
            });
        }
        let retries = self.retry_queue.lock().remove_partition(tp);
        debug!(partition = %tp, dropped, retries, "Removed partition work");
        dropped
    }

    /// Time until the earliest retry is due, if any retry is pending.
    #[must_use]
    pub fn lowest_retry_time(&self, current_time_us: u64) -> Option<Duration> {
        self.retry_queue
            .lock()
            .earliest_due_us()
            .map(|due| Duration::from_micros(due.saturating_sub(current_time_us)))
    }

    /// Number of shards.
    #[must_use]
    pub fn number_of_shards(&self) -> usize {
        self.shards.read().len()
    }

    /// Number of containers waiting to be selected.
    #[must_use]
    pub fn number_of_queued_work(&self) -> u64 {
        self.shards
            .read()
            .values()
            .map(|s| s.lock().queued_count() as u64)
            .sum()
    }

    /// Returns true if anything is waiting to be selected.
    #[must_use]
    pub fn work_is_waiting(&self) -> bool {
        self.shards.read().values().any(|s| s.lock().queued_count() > 0)
    }
}

#[cfg(test)]
mod tests {
    use strand_core::{Epoch, PolledRecord};

    use super::*;

    fn wc(partition: u64, offset: u64, key: &'static str) -> WorkContainer {
        WorkContainer::new(
            Epoch::new(1),
            PolledRecord::new(TopicPartition::new("t", partition), offset, "v").with_key(key),
        )
    }

    fn offsets(work: &[WorkContainer]) -> Vec<(u64, u64)> {
        work.iter()
            .map(|w| (w.tp().partition().get(), w.offset().get()))
            .collect()
    }

    #[test]
    fn test_partition_order_one_per_partition() {
        let sm = ShardManager::new(ProcessingOrder::Partition);
        for o in 0..3 {
            assert!(sm.add_work(wc(0, o, "a")));
            assert!(sm.add_work(wc(1, o, "a")));
        }
        assert_eq!(sm.number_of_shards(), 2);

        let work = sm.select_work(10, 0, |_| true);
        assert_eq!(offsets(&work), vec![(0, 0), (1, 0)]);
        assert_eq!(sm.number_of_queued_work(), 4);
    }

    #[test]
    fn test_key_order_parallel_across_keys() {
        let sm = ShardManager::new(ProcessingOrder::Key);
        sm.add_work(wc(0, 0, "a"));
        sm.add_work(wc(0, 1, "b"));
        sm.add_work(wc(0, 2, "a"));
        assert_eq!(sm.number_of_shards(), 2);

        let work = sm.select_work(10, 0, |_| true);
        assert_eq!(offsets(&work), vec![(0, 0), (0, 1)]);

        // Offset 2 waits behind offset 0 with the same key.
        assert!(sm.select_work(10, 0, |_| true).is_empty());
        assert!(sm.on_success(&work[0]));
        let work = sm.select_work(10, 0, |_| true);
        assert_eq!(offsets(&work), vec![(0, 2)]);
    }

    #[test]
    fn test_unordered_depth_first() {
        let sm = ShardManager::new(ProcessingOrder::Unordered);
        for o in 0..4 {
            sm.add_work(wc(0, o, "a"));
            sm.add_work(wc(1, o, "a"));
        }
        let work = sm.select_work(3, 0, |_| true);
        assert_eq!(offsets(&work), vec![(0, 0), (0, 1), (0, 2)]);
    }

    #[test]
    fn test_selection_resumes_after_last_shard() {
        let sm = ShardManager::new(ProcessingOrder::Partition);
        for p in 0..3 {
            sm.add_work(wc(p, 0, "a"));
            sm.add_work(wc(p, 1, "a"));
        }
        let first = sm.select_work(1, 0, |_| true);
        assert_eq!(offsets(&first), vec![(0, 0)]);
        let second = sm.select_work(1, 0, |_| true);
        assert_eq!(offsets(&second), vec![(1, 0)]);

        sm.on_success(&first[0]);
        let third = sm.select_work(5, 0, |_| true);
        assert_eq!(offsets(&third), vec![(2, 0), (0, 1)]);
    }

    #[test]
    fn test_retry_queue_tracks_failures() {
        let sm = ShardManager::new(ProcessingOrder::Partition);
        sm.add_work(wc(0, 0, "a"));
        let mut work = sm.select_work(1, 0, |_| true);
        let mut failed = work.remove(0);
        failed.on_user_function_failure(1_000);

        assert!(sm.on_failure(failed, Duration::from_millis(5)));
        assert_eq!(sm.lowest_retry_time(2_000), Some(Duration::from_micros(4_000)));
        assert!(sm.select_work(1, 5_999, |_| true).is_empty());

        let retried = sm.select_work(1, 6_000, |_| true);
        assert_eq!(retried.len(), 1);
        assert_eq!(sm.lowest_retry_time(6_000), None);

        assert!(sm.on_success(&retried[0]));
        assert!(!sm.on_success(&retried[0]));
        assert_eq!(sm.number_of_shards(), 0);
    }

    #[test]
    fn test_remove_partition() {
        let sm = ShardManager::new(ProcessingOrder::Key);
        sm.add_work(wc(0, 0, "a"));
        sm.add_work(wc(0, 1, "b"));
        sm.add_work(wc(1, 0, "a"));
        let in_flight = sm.select_work(1, 0, |_| true);

        assert_eq!(sm.remove_partition(&TopicPartition::new("t", 0)), 1);
        assert_eq!(sm.number_of_shards(), 1);
        // Late result for the removed partition is ignored.
        assert!(!sm.on_success(&in_flight[0]));
        assert!(!sm.on_failure(in_flight[0].clone(), Duration::ZERO));
    }

    #[test]
    fn test_park_keeps_slot_without_retry() {
        let sm = ShardManager::new(ProcessingOrder::Partition);
        sm.add_work(wc(0, 0, "a"));
        sm.add_work(wc(0, 1, "a"));
        let mut failed = sm.select_work(1, 0, |_| true).remove(0);
        failed.on_user_function_failure(0);

        assert!(sm.park(failed));
        assert_eq!(sm.lowest_retry_time(0), None);
        assert_eq!(sm.number_of_queued_work(), 2);
        // The parked head still blocks its shard when vetoed.
        assert!(sm.select_work(5, 0, |w| w.failed_attempts() == 0).is_empty());
    }

    #[test]
    fn test_veto() {
        let sm = ShardManager::new(ProcessingOrder::Partition);
        sm.add_work(wc(0, 0, "a"));
        sm.add_work(wc(1, 0, "a"));
        let work = sm.select_work(10, 0, |w| w.tp().partition().get() == 1);
        assert_eq!(offsets(&work), vec![(1, 0)]);
        assert!(sm.work_is_waiting());
    }
}
