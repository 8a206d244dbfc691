//! A queue of work for one ordering unit.
//!
//! Offsets are kept in two ordered indexes: queued (the shard owns the
//! container) and in flight (a worker owns it). Selection only walks the
//! queued index, so its cost does not grow with work in flight. In ordered
//! modes only the lowest tracked offset may be taken, so a record is never
//! offered while its predecessor in the same shard is still outstanding.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use strand_core::{Offset, ProcessingOrder};

use crate::shard_key::ShardKey;
use crate::work_container::WorkContainer;

/// Offset-ordered work queue for one shard key.
#[derive(Debug)]
pub struct ProcessingShard {
    key: ShardKey,
    ordering: ProcessingOrder,
    queued: BTreeMap<Offset, WorkContainer>,
    in_flight: BTreeSet<Offset>,
}

impl ProcessingShard {
    /// Creates an empty shard.
    #[must_use]
    pub const fn new(key: ShardKey, ordering: ProcessingOrder) -> Self {
        Self {
            key,
            ordering,
            queued: BTreeMap::new(),
            in_flight: BTreeSet::new(),
        }
    }

    /// The shard key.
    #[must_use]
    pub const fn key(&self) -> &ShardKey {
        &self.key
    }

    /// Queues a container. Returns false if its offset is already tracked.
    pub fn add(&mut self, wc: WorkContainer) -> bool {
        // TigerStyle: Assert preconditions.
        debug_assert_eq!(wc.tp(), self.key.tp(), "container for wrong shard");
        if self.in_flight.contains(&wc.offset()) {
            return false;
        }
        match self.queued.entry(wc.offset()) {
            Entry::Vacant(e) => {
                e.insert(wc);
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    /// Takes up to `max` containers that are available at `current_time_us`
    /// and accepted by `could_be_taken`, marking them in flight.
    pub fn take_available(
        &mut self,
        max: usize,
        current_time_us: u64,
        could_be_taken: &mut impl FnMut(&WorkContainer) -> bool,
    ) -> Vec<WorkContainer> {
        if max == 0 {
            return Vec::new();
        }
        let ordered = !matches!(self.ordering, ProcessingOrder::Unordered);

        let mut chosen = Vec::new();
        if ordered {
            // Only the head may be released, and only if it is not in flight.
            let head = self.queued.first_key_value().filter(|(offset, _)| {
                self.in_flight.first().map_or(true, |busy| *offset < busy)
            });
            if let Some((&offset, wc)) = head {
                if wc.is_available(current_time_us) && could_be_taken(wc) {
                    chosen.push(offset);
                }
            }
        } else {
            for (&offset, wc) in &self.queued {
                if chosen.len() >= max {
                    break;
                }
                if wc.is_available(current_time_us) && could_be_taken(wc) {
                    chosen.push(offset);
                }
            }
        }

        let mut taken = Vec::with_capacity(chosen.len());
        for offset in chosen {
            if let Some(mut wc) = self.queued.remove(&offset) {
                wc.on_queued_for_execution();
                self.in_flight.insert(offset);
                taken.push(wc);
            }
        }
        taken
    }

    /// Removes a completed in-flight offset. Returns false if it was not in flight.
    pub fn on_success(&mut self, offset: Offset) -> bool {
        self.in_flight.remove(&offset)
    }

    /// Returns a failed container to the queue. Returns false if its offset
    /// was not in flight, in which case the container is dropped.
    pub fn on_failure(&mut self, wc: WorkContainer) -> bool {
        if !self.in_flight.remove(&wc.offset()) {
            return false;
        }
        self.queued.insert(wc.offset(), wc);
        true
    }

    /// Number of containers waiting to be taken.
    #[must_use]
    pub fn queued_count(&self) -> usize {
        self.queued.len()
    }

    /// Number of containers held by workers.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Returns true if nothing is queued or in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queued.is_empty() && self.in_flight.is_empty()
    }
}
