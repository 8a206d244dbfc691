//! Seeded workload driver for the work tracking engine.
//!
//! The driver plays both sides: it is the broker handing out records and
//! rebalancing partitions, and it is the worker pool processing them. Every
//! choice comes from a seeded RNG so a failing seed replays exactly.
//!
//! ```text
//!            poll                 select              complete
//!   log ──────────────▶ WorkManager ──────▶ in flight ─────────▶ WorkManager
//!    ▲                       │                                       │
//!    │  assign(committed)    │ commit                                │
//!    └───────────────────────┴───────────────────────────────────────┘
//! ```

use std::collections::{BTreeMap, BTreeSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use strand_core::{EngineConfig, Offset, PolledRecord, ProcessingOrder, TopicPartition};
use strand_offsets::OffsetMapCodec;
use strand_state::{AssignedPartition, EpochAndRecords, WorkContainer, WorkManager};

use crate::properties::{PropertyChecker, Returned};
use crate::scenarios::{key_for, partitions};

// ============================================================================
// Configuration
// ============================================================================

/// Shape of a workload.
#[derive(Debug, Clone)]
pub struct WorkloadConfig {
    /// Ordering mode under test.
    pub ordering: ProcessingOrder,
    /// Number of partitions.
    pub partitions: u64,
    /// Records per partition.
    pub records_per_partition: u64,
    /// Distinct keys per partition.
    pub keys: u64,
    /// Probability that a user function call succeeds.
    pub success_rate: f64,
    /// Random steps before the workload is driven to completion.
    pub steps: u32,
    /// Whether partitions are revoked and lost during the run.
    pub rebalances: bool,
}

impl WorkloadConfig {
    /// A small workload for the given ordering mode.
    #[must_use]
    pub const fn new(ordering: ProcessingOrder) -> Self {
        Self {
            ordering,
            partitions: 3,
            records_per_partition: 60,
            keys: 4,
            success_rate: 0.8,
            steps: 400,
            rebalances: true,
        }
    }

    /// Sets the number of random steps.
    #[must_use]
    pub const fn with_steps(mut self, steps: u32) -> Self {
        self.steps = steps;
        self
    }

    /// Disables rebalances.
    #[must_use]
    pub const fn without_rebalances(mut self) -> Self {
        self.rebalances = false;
        self
    }
}

/// Counters gathered over a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkloadStats {
    /// Records registered by polls.
    pub registered: u64,
    /// Records handed out.
    pub selected: u64,
    /// Successful results.
    pub succeeded: u64,
    /// Failed results.
    pub failed: u64,
    /// Results dropped as stale.
    pub stale: u64,
    /// Commits performed.
    pub commits: u64,
    /// Partitions revoked.
    pub revokes: u64,
    /// Partitions lost.
    pub losses: u64,
}

/// One commit, as the broker saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitEntry {
    /// Partition.
    pub tp: TopicPartition,
    /// Commit point.
    pub offset: u64,
    /// Encoded incompletes.
    pub metadata: Option<String>,
}

// ============================================================================
// Driver
// ============================================================================

/// Drives a `WorkManager` through a seeded workload.
pub struct WorkloadDriver {
    config: WorkloadConfig,
    rng: StdRng,
    wm: WorkManager,
    codec: OffsetMapCodec,
    checker: PropertyChecker,
    now_us: u64,
    /// Next fetch position of each assigned partition.
    positions: BTreeMap<TopicPartition, u64>,
    unassigned: BTreeSet<TopicPartition>,
    committed: BTreeMap<TopicPartition, (Offset, Option<String>)>,
    in_flight: Vec<WorkContainer>,
    history: Vec<CommitEntry>,
    stats: WorkloadStats,
}

impl WorkloadDriver {
    /// Creates a driver with every partition assigned from offset zero.
    ///
    /// # Panics
    ///
    /// Panics if the engine rejects the configuration or the assignment.
    #[must_use]
    pub fn new(seed: u64, config: WorkloadConfig) -> Self {
        let engine = EngineConfig::for_testing().with_ordering(config.ordering);
        let codec = OffsetMapCodec::from_config(&engine);
        let wm = WorkManager::new(engine, 0).expect("valid test config");
        let mut driver = Self {
            checker: PropertyChecker::new(config.ordering),
            rng: StdRng::seed_from_u64(seed),
            wm,
            codec,
            now_us: 0,
            positions: BTreeMap::new(),
            unassigned: partitions(config.partitions).into_iter().collect(),
            committed: BTreeMap::new(),
            in_flight: Vec::new(),
            history: Vec::new(),
            stats: WorkloadStats::default(),
            config,
        };
        let all: Vec<TopicPartition> = driver.unassigned.iter().cloned().collect();
        for tp in all {
            driver.assign(&tp);
        }
        driver
    }

    /// The property checker.
    #[must_use]
    pub const fn checker(&self) -> &PropertyChecker {
        &self.checker
    }

    /// The engine under test.
    #[must_use]
    pub const fn work_manager(&self) -> &WorkManager {
        &self.wm
    }

    /// Run counters.
    #[must_use]
    pub const fn stats(&self) -> &WorkloadStats {
        &self.stats
    }

    /// Every commit, in order.
    #[must_use]
    pub fn history(&self) -> &[CommitEntry] {
        &self.history
    }

    /// Last committed offset of `tp`.
    #[must_use]
    pub fn committed_offset(&self, tp: &TopicPartition) -> Option<u64> {
        self.committed.get(tp).map(|(o, _)| o.get())
    }

    /// Runs the random steps.
    pub fn run(&mut self) {
        for _ in 0..self.config.steps {
            self.step();
        }
    }

    /// Runs the random steps, then processes and commits every record.
    ///
    /// Returns true if every partition committed its whole log.
    pub fn run_to_completion(&mut self) -> bool {
        self.run();
        self.drain()
    }

    /// Performs one random operation.
    pub fn step(&mut self) {
        let roll = self.rng.gen_range(0..100);
        match roll {
            0..=29 => self.poll(),
            30..=54 => {
                let max = self.rng.gen_range(1..=8);
                self.select(max);
            }
            55..=79 => self.complete_random(),
            80..=87 => self.commit(),
            88..=91 if self.config.rebalances => self.revoke_random(),
            92..=93 if self.config.rebalances => self.lose_random(),
            94..=95 if self.config.rebalances => self.assign_random(),
            _ => self.advance(),
        }
        self.checker.check_in_flight(&self.wm);
    }

    // ------------------------------------------------------------------------
    // Broker side
    // ------------------------------------------------------------------------

    fn poll(&mut self) {
        let assigned: Vec<TopicPartition> = self.positions.keys().cloned().collect();
        for tp in assigned {
            if !self.wm.is_allowed_more_records(&tp) {
                continue;
            }
            let position = self.positions[&tp];
            let end = self.config.records_per_partition;
            if position >= end {
                continue;
            }
            let batch = self.rng.gen_range(1..=8).min(end - position);
            let records = (position..position + batch)
                .map(|o| {
                    PolledRecord::new(tp.clone(), o, format!("v-{o}"))
                        .with_key(key_for(&tp, o, self.config.keys))
                })
                .collect();
            let epoch = self.wm.epoch_of(&tp);
            self.stats.registered += self.wm.register_work(EpochAndRecords {
                tp: tp.clone(),
                epoch,
                records,
            }) as u64;
            self.positions.insert(tp, position + batch);
        }
    }

    fn assign(&mut self, tp: &TopicPartition) {
        let (offset, metadata) = self
            .committed
            .get(tp)
            .cloned()
            .unwrap_or((Offset::new(0), None));
        let mut assignment = AssignedPartition::new(tp.clone(), offset);
        if let Some(metadata) = metadata {
            assignment = assignment.with_metadata(metadata);
        }
        self.wm
            .on_partitions_assigned(&[assignment])
            .expect("own metadata always restores");
        self.unassigned.remove(tp);
        self.positions.insert(tp.clone(), offset.get());
    }

    fn pick(&mut self, from: Vec<TopicPartition>) -> Option<TopicPartition> {
        if from.is_empty() {
            return None;
        }
        let i = self.rng.gen_range(0..from.len());
        from.into_iter().nth(i)
    }

    fn revoke_random(&mut self) {
        let assigned = self.positions.keys().cloned().collect();
        let Some(tp) = self.pick(assigned) else {
            return;
        };
        // A cooperative revoke commits before letting go.
        self.commit();
        self.wm.on_partitions_revoked(std::slice::from_ref(&tp));
        self.positions.remove(&tp);
        self.unassigned.insert(tp);
        self.stats.revokes += 1;
    }

    fn lose_random(&mut self) {
        let assigned = self.positions.keys().cloned().collect();
        let Some(tp) = self.pick(assigned) else {
            return;
        };
        self.wm.on_partitions_lost(std::slice::from_ref(&tp));
        self.positions.remove(&tp);
        self.unassigned.insert(tp);
        self.stats.losses += 1;
    }

    fn assign_random(&mut self) {
        let unassigned = self.unassigned.iter().cloned().collect();
        if let Some(tp) = self.pick(unassigned) {
            self.assign(&tp);
        }
    }

    fn commit(&mut self) {
        let data = self.wm.collect_commit_data();
        if data.is_empty() {
            return;
        }
        for (tp, commit) in &data {
            self.checker.on_commit(tp, commit, &self.codec);
            self.committed
                .insert(tp.clone(), (commit.offset, commit.metadata.clone()));
            self.history.push(CommitEntry {
                tp: tp.clone(),
                offset: commit.offset.get(),
                metadata: commit.metadata.clone(),
            });
        }
        self.wm.on_offset_commit_success(&data);
        self.stats.commits += 1;
    }

    fn advance(&mut self) {
        self.now_us += self.rng.gen_range(1_000..=20_000);
    }

    // ------------------------------------------------------------------------
    // Worker side
    // ------------------------------------------------------------------------

    fn select(&mut self, max: usize) {
        let work = self.wm.get_work(max, self.now_us);
        for wc in work {
            self.checker.on_selected(&wc);
            self.stats.selected += 1;
            self.in_flight.push(wc);
        }
    }

    fn complete_random(&mut self) {
        if self.in_flight.is_empty() {
            return;
        }
        let i = self.rng.gen_range(0..self.in_flight.len());
        let succeeded = self.rng.gen_bool(self.config.success_rate);
        self.complete(i, succeeded);
    }

    fn complete(&mut self, i: usize, succeeded: bool) {
        let mut wc = self.in_flight.swap_remove(i);
        if succeeded {
            wc.on_user_function_success(self.now_us);
        } else {
            wc.on_user_function_failure(self.now_us);
        }
        let returned = Returned::of(&wc, succeeded);
        let outcome = self.wm.handle_result(wc);
        let current = self.wm.epoch_of(&returned.tp);
        self.checker.on_returned(&returned, current, outcome);
        match outcome {
            strand_state::ResultOutcome::Succeeded => self.stats.succeeded += 1,
            strand_state::ResultOutcome::Failed => self.stats.failed += 1,
            strand_state::ResultOutcome::Stale => self.stats.stale += 1,
        }
    }

    // ------------------------------------------------------------------------
    // Completion
    // ------------------------------------------------------------------------

    fn is_complete(&self) -> bool {
        self.unassigned.is_empty()
            && self.in_flight.is_empty()
            && self.positions.keys().all(|tp| {
                self.committed_offset(tp) == Some(self.config.records_per_partition)
            })
    }

    fn drain(&mut self) -> bool {
        let unassigned: Vec<TopicPartition> = self.unassigned.iter().cloned().collect();
        for tp in unassigned {
            self.assign(&tp);
        }
        let retry_us = u64::try_from(self.wm.config().default_retry_delay.as_micros())
            .unwrap_or(u64::MAX);
        let max = self.wm.config().max_concurrency as usize;
        for _ in 0..10_000 {
            if self.is_complete() {
                return true;
            }
            self.now_us += retry_us;
            self.poll();
            self.select(max);
            while !self.in_flight.is_empty() {
                self.complete(0, true);
            }
            self.commit();
            self.checker.check_in_flight(&self.wm);
        }
        self.is_complete()
    }
}
