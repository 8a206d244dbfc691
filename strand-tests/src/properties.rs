//! Invariants of out-of-order work tracking.
//!
//! The checker observes a workload from the outside: what was handed to
//! workers, what came back, and what was committed. It keeps its own model
//! of which offsets ever succeeded and flags any state the engine reports
//! that the model can not justify.
//!
//! # Properties
//!
//! 1. A record is never in flight twice under the same assignment.
//! 2. In ordered modes, a shard never has two records in flight.
//! 3. Within a shard, records are offered in offset order.
//! 4. A record the last commit declared complete is never offered again.
//! 5. Results are stale exactly when their partition moved since polling.
//! 6. Commit points never decrease.
//! 7. Everything below a commit point succeeded.
//! 8. Metadata never claims an unprocessed offset is complete.

use std::collections::{BTreeMap, HashMap};

use roaring::RoaringTreemap;
use strand_core::{Epoch, Offset, ProcessingOrder, TopicPartition};
use strand_offsets::OffsetMapCodec;
use strand_state::{CommitData, ResultOutcome, ShardKey, WorkContainer, WorkManager};

// ============================================================================
// Violations
// ============================================================================

/// All possible invariant violations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// The same record was handed out while already in flight.
    DuplicateInFlight {
        /// Partition.
        tp: TopicPartition,
        /// Offset.
        offset: u64,
    },
    /// Two records of one ordered shard were in flight together.
    OrderingViolated {
        /// Shard.
        shard: String,
        /// Newly offered offset.
        offset: u64,
        /// Offset already in flight.
        in_flight: u64,
    },
    /// A shard offered a lower offset after a higher one.
    OfferRegressed {
        /// Shard.
        shard: String,
        /// Newly offered offset.
        offset: u64,
        /// Previously offered offset.
        previous: u64,
    },
    /// A committed-complete record was offered again.
    ReprocessedCommitted {
        /// Partition.
        tp: TopicPartition,
        /// Offset.
        offset: u64,
    },
    /// A result was or was not dropped as stale, against expectation.
    StaleMismatch {
        /// Partition.
        tp: TopicPartition,
        /// Offset.
        offset: u64,
        /// Whether the checker expected a stale result.
        expected_stale: bool,
    },
    /// The engine's in-flight counter disagrees with the workload.
    InFlightMismatch {
        /// Engine's count.
        reported: u64,
        /// Workload's count.
        expected: u64,
    },
    /// A commit moved backwards.
    CommitPointDecreased {
        /// Partition.
        tp: TopicPartition,
        /// Previous commit point.
        old: u64,
        /// New commit point.
        new: u64,
    },
    /// A commit point passed an offset that never succeeded.
    CommittedIncomplete {
        /// Partition.
        tp: TopicPartition,
        /// Offset never succeeded.
        offset: u64,
        /// The commit point.
        commit_point: u64,
    },
    /// Metadata marked an offset complete that never succeeded.
    MetadataClaimsUnprocessed {
        /// Partition.
        tp: TopicPartition,
        /// Offset.
        offset: u64,
    },
    /// Metadata listed an incomplete offset below the commit point.
    MetadataBelowCommit {
        /// Partition.
        tp: TopicPartition,
        /// Offset.
        offset: u64,
        /// The commit point.
        commit_point: u64,
    },
    /// Metadata produced by the engine could not be decoded.
    MetadataUndecodable {
        /// Partition.
        tp: TopicPartition,
        /// Decode error.
        message: String,
    },
}

/// A result about to be handed back to the engine.
#[derive(Debug, Clone)]
pub struct Returned {
    /// Partition.
    pub tp: TopicPartition,
    /// Offset.
    pub offset: Offset,
    /// Epoch the record was polled under.
    pub epoch: Epoch,
    /// Whether the user function succeeded.
    pub succeeded: bool,
}

impl Returned {
    /// Captures a container's identity before it is handed back.
    #[must_use]
    pub fn of(wc: &WorkContainer, succeeded: bool) -> Self {
        Self {
            tp: wc.tp().clone(),
            offset: wc.offset(),
            epoch: wc.epoch(),
            succeeded,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct CommittedView {
    commit_point: u64,
    complete_above: RoaringTreemap,
}

// ============================================================================
// Property Checker
// ============================================================================

/// Observes a workload and records invariant violations.
#[derive(Debug)]
pub struct PropertyChecker {
    ordering: ProcessingOrder,
    in_flight: BTreeMap<(TopicPartition, Offset, Epoch), ShardKey>,
    last_offered: HashMap<(ShardKey, Epoch), Offset>,
    ever_succeeded: BTreeMap<TopicPartition, RoaringTreemap>,
    committed: BTreeMap<TopicPartition, CommittedView>,
    violations: Vec<Violation>,
    /// Number of checks performed.
    pub checks_performed: u64,
    /// Number of commits checked.
    pub commits_checked: u64,
}

impl PropertyChecker {
    /// Creates a checker for an ordering mode.
    #[must_use]
    pub fn new(ordering: ProcessingOrder) -> Self {
        Self {
            ordering,
            in_flight: BTreeMap::new(),
            last_offered: HashMap::new(),
            ever_succeeded: BTreeMap::new(),
            committed: BTreeMap::new(),
            violations: Vec::new(),
            checks_performed: 0,
            commits_checked: 0,
        }
    }

    /// Returns true if no violation was found.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    /// Violations found so far.
    #[must_use]
    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    /// Number of records the workload holds in flight.
    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.len() as u64
    }

    /// Offsets of `tp` that ever succeeded.
    #[must_use]
    pub fn succeeded(&self, tp: &TopicPartition) -> Option<&RoaringTreemap> {
        self.ever_succeeded.get(tp)
    }

    /// Checks a record the engine just handed out.
    pub fn on_selected(&mut self, wc: &WorkContainer) {
        self.checks_performed += 1;
        let tp = wc.tp().clone();
        let offset = wc.offset();
        let epoch = wc.epoch();
        let shard = ShardKey::of(wc, self.ordering);

        if self.in_flight.contains_key(&(tp.clone(), offset, epoch)) {
            self.violations.push(Violation::DuplicateInFlight {
                tp: tp.clone(),
                offset: offset.get(),
            });
        }

        if self.ordering != ProcessingOrder::Unordered {
            let busy = self
                .in_flight
                .iter()
                .find(|((_, _, e), s)| *e == epoch && **s == shard)
                .map(|((_, o, _), _)| *o);
            if let Some(busy) = busy {
                self.violations.push(Violation::OrderingViolated {
                    shard: shard.to_string(),
                    offset: offset.get(),
                    in_flight: busy.get(),
                });
            }
            let previous = self.last_offered.insert((shard.clone(), epoch), offset);
            if let Some(previous) = previous.filter(|p| *p > offset) {
                self.violations.push(Violation::OfferRegressed {
                    shard: shard.to_string(),
                    offset: offset.get(),
                    previous: previous.get(),
                });
            }
        }

        if let Some(view) = self.committed.get(&tp) {
            if offset.get() < view.commit_point || view.complete_above.contains(offset.get()) {
                self.violations.push(Violation::ReprocessedCommitted {
                    tp: tp.clone(),
                    offset: offset.get(),
                });
            }
        }

        self.in_flight.insert((tp, offset, epoch), shard);
    }

    /// Checks how the engine routed a result.
    pub fn on_returned(&mut self, returned: &Returned, current_epoch: Epoch, outcome: ResultOutcome) {
        self.checks_performed += 1;
        self.in_flight
            .remove(&(returned.tp.clone(), returned.offset, returned.epoch));

        let expected_stale = returned.epoch != current_epoch;
        if expected_stale != (outcome == ResultOutcome::Stale) {
            self.violations.push(Violation::StaleMismatch {
                tp: returned.tp.clone(),
                offset: returned.offset.get(),
                expected_stale,
            });
        }
        if outcome == ResultOutcome::Succeeded {
            self.ever_succeeded
                .entry(returned.tp.clone())
                .or_default()
                .insert(returned.offset.get());
        }
    }

    /// Checks the engine's in-flight counter.
    pub fn check_in_flight(&mut self, wm: &WorkManager) {
        self.checks_performed += 1;
        let reported = wm.number_records_out_for_processing();
        let expected = self.in_flight_count();
        if reported != expected {
            self.violations
                .push(Violation::InFlightMismatch { reported, expected });
        }
    }

    /// Checks a commit the engine produced.
    pub fn on_commit(&mut self, tp: &TopicPartition, data: &CommitData, codec: &OffsetMapCodec) {
        self.checks_performed += 1;
        self.commits_checked += 1;
        let commit_point = data.offset.get();
        let previous = self.committed.get(tp).map_or(0, |v| v.commit_point);
        let empty = RoaringTreemap::new();
        let succeeded = self.ever_succeeded.get(tp).unwrap_or(&empty);

        if commit_point < previous {
            self.violations.push(Violation::CommitPointDecreased {
                tp: tp.clone(),
                old: previous,
                new: commit_point,
            });
        }
        for offset in previous..commit_point {
            if !succeeded.contains(offset) {
                self.violations.push(Violation::CommittedIncomplete {
                    tp: tp.clone(),
                    offset,
                    commit_point,
                });
                break;
            }
        }

        let mut complete_above = RoaringTreemap::new();
        if let Some(metadata) = &data.metadata {
            match codec.decode(data.offset, metadata) {
                Ok(decoded) => {
                    if let Some(low) = decoded.incompletes.min().filter(|o| *o < commit_point) {
                        self.violations.push(Violation::MetadataBelowCommit {
                            tp: tp.clone(),
                            offset: low,
                            commit_point,
                        });
                    }
                    let highest = decoded.highest_seen.map_or(0, |h| h.get() + 1);
                    for offset in commit_point..highest {
                        if decoded.incompletes.contains(offset) {
                            continue;
                        }
                        if succeeded.contains(offset) {
                            complete_above.insert(offset);
                        } else {
                            self.violations.push(Violation::MetadataClaimsUnprocessed {
                                tp: tp.clone(),
                                offset,
                            });
                        }
                    }
                }
                Err(e) => self.violations.push(Violation::MetadataUndecodable {
                    tp: tp.clone(),
                    message: e.to_string(),
                }),
            }
        }

        self.committed.insert(
            tp.clone(),
            CommittedView {
                commit_point: commit_point.max(previous),
                complete_above,
            },
        );
    }
}
