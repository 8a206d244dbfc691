//! Work manager.
//!
//! The composition root of work tracking. Polled records flow into the
//! partition states (which decide what needs processing) and then into the
//! shards (which decide when each record may be processed). Results flow
//! back into both.
//!
//! ```text
//!   poll ──▶ register_work ──▶ PartitionStateManager ──▶ ShardManager
//!                                                            │
//!   worker ◀──────────────────── get_work ◀──────────────────┘
//!     │
//!     └────▶ handle_result ──▶ stale? drop : PartitionState + ShardManager
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use strand_core::{EngineConfig, Epoch, Offset, PolledRecord, TopicPartition};
use strand_flow::{DynamicLoadFactor, LoadFactorConfig};
use strand_offsets::OffsetMapCodec;
use tracing::{debug, trace, warn};

use crate::error::StateResult;
use crate::partition_manager::{AssignedPartition, PartitionStateManager};
use crate::partition_state::CommitData;
use crate::shard_manager::ShardManager;
use crate::work_container::{WorkContainer, WorkOutcome};

/// Computes the retry delay for a failed record.
pub type RetryDelayProvider = Arc<dyn Fn(&WorkContainer) -> Duration + Send + Sync>;

/// How a returned container was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultOutcome {
    /// The offset was marked complete.
    Succeeded,
    /// The record was re-queued for retry.
    Failed,
    /// The partition was revoked or reassigned since the record was polled.
    Stale,
}

/// A polled batch for one partition, stamped with the epoch it was polled under.
#[derive(Debug, Clone)]
pub struct EpochAndRecords {
    /// The partition.
    pub tp: TopicPartition,
    /// Epoch of the partition when polled.
    pub epoch: Epoch,
    /// Records in offset order.
    pub records: Vec<PolledRecord>,
}

/// Tracks work from poll to commit.
pub struct WorkManager {
    config: EngineConfig,
    pm: PartitionStateManager,
    sm: ShardManager,
    load_factor: Mutex<DynamicLoadFactor>,
    retry_delay_provider: Option<RetryDelayProvider>,
    out_for_processing: AtomicU64,
}

impl std::fmt::Debug for WorkManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkManager")
            .field("ordering", &self.config.ordering)
            .field("out_for_processing", &self.out_for_processing)
            .finish_non_exhaustive()
    }
}

fn duration_us(d: Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}

impl WorkManager {
    /// Creates a work manager.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: EngineConfig, current_time_us: u64) -> StateResult<Self> {
        config.validate()?;
        let load_factor = LoadFactorConfig::new(
            config.load_factor_initial,
            config.load_factor_step,
            config.load_factor_max,
        )
        .with_warmup_us(duration_us(config.load_factor_warmup))
        .with_cooldown_us(duration_us(config.load_factor_cooldown));
        load_factor.validate()?;

        Ok(Self {
            pm: PartitionStateManager::new(OffsetMapCodec::from_config(&config), config.limits.max_partitions),
            sm: ShardManager::new(config.ordering),
            load_factor: Mutex::new(DynamicLoadFactor::new(load_factor, current_time_us)),
            retry_delay_provider: None,
            out_for_processing: AtomicU64::new(0),
            config,
        })
    }

    /// Sets a per-record retry delay, overriding the configured default.
    #[must_use]
    pub fn with_retry_delay_provider(mut self, provider: RetryDelayProvider) -> Self {
        self.retry_delay_provider = Some(provider);
        self
    }

    /// The configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The partition state manager.
    #[must_use]
    pub const fn partitions(&self) -> &PartitionStateManager {
        &self.pm
    }

    /// The shard manager.
    #[must_use]
    pub const fn shards(&self) -> &ShardManager {
        &self.sm
    }

    // -------------------------------------------------------------------------
    // Rebalance
    // -------------------------------------------------------------------------

    /// Assigns partitions.
    ///
    /// # Errors
    ///
    /// Returns an error if committed metadata can not be restored.
    pub fn on_partitions_assigned(&self, assigned: &[AssignedPartition]) -> StateResult<()> {
        // Anything still queued from a previous assignment is stale.
        for a in assigned {
            self.sm.remove_partition(&a.tp);
        }
        self.pm.on_partitions_assigned(assigned)
    }

    /// Revokes partitions. In-flight work for them is discarded on return.
    pub fn on_partitions_revoked(&self, tps: &[TopicPartition]) {
        self.pm.on_partitions_revoked(tps);
        for tp in tps {
            self.sm.remove_partition(tp);
        }
    }

    /// Drops lost partitions. In-flight work for them is discarded on return.
    pub fn on_partitions_lost(&self, tps: &[TopicPartition]) {
        self.pm.on_partitions_lost(tps);
        for tp in tps {
            self.sm.remove_partition(tp);
        }
    }

    /// Current epoch of a partition, for stamping polled batches.
    #[must_use]
    pub fn epoch_of(&self, tp: &TopicPartition) -> Epoch {
        self.pm.epoch_of(tp)
    }

    // -------------------------------------------------------------------------
    // Work
    // -------------------------------------------------------------------------

    /// Registers a polled batch. Returns the number of records queued.
    pub fn register_work(&self, batch: EpochAndRecords) -> usize {
        let EpochAndRecords { tp, epoch, records } = batch;
        let polled = records.len();
        let work = self.pm.register_polled_batch(&tp, epoch, records);
        let mut queued = 0;
        for record in work {
            if self.sm.add_work(WorkContainer::new(epoch, record)) {
                queued += 1;
            }
        }
        trace!(partition = %tp, polled, queued, "Registered polled batch");
        queued
    }

    /// Takes up to `max` records to process.
    pub fn get_work(&self, max: usize, current_time_us: u64) -> Vec<WorkContainer> {
        if max < 1 {
            return Vec::new();
        }
        let work = self
            .sm
            .select_work(max, current_time_us, |wc| self.could_be_taken(wc));
        let out = self
            .out_for_processing
            .fetch_add(work.len() as u64, Ordering::AcqRel)
            + work.len() as u64;
        if !work.is_empty() {
            debug!(
                got = work.len(),
                requested = max,
                in_flight = out,
                "Selected work"
            );
        }
        work
    }

    fn could_be_taken(&self, wc: &WorkContainer) -> bool {
        if self.pm.check_if_work_is_stale(wc.tp(), wc.epoch()) {
            return false;
        }
        if let Some(max) = self.config.max_failure_attempts {
            if wc.failed_attempts() >= max {
                return false;
            }
        }
        self.pm.is_allowed_more_records(wc.tp())
            || self.pm.is_blocking_progress(wc.tp(), wc.offset())
    }

    /// Routes a returned container.
    ///
    /// # Panics
    ///
    /// Panics if the container has no outcome recorded.
    pub fn handle_result(&self, mut wc: WorkContainer) -> ResultOutcome {
        // TigerStyle: Assert preconditions.
        assert!(
            wc.outcome() != WorkOutcome::Pending,
            "work returned without an outcome: {wc}"
        );
        wc.end_flight();
        // Never handed out by `get_work` if this would underflow.
        let _ = self
            .out_for_processing
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(1)));

        if self.pm.check_if_work_is_stale(wc.tp(), wc.epoch()) {
            debug!(work = %wc, epoch = %wc.epoch(), "Dropping result from an old assignment");
            return ResultOutcome::Stale;
        }

        match wc.outcome() {
            WorkOutcome::Succeeded => {
                self.pm.on_success(wc.tp(), wc.offset());
                self.sm.on_success(&wc);
                ResultOutcome::Succeeded
            }
            WorkOutcome::Failed | WorkOutcome::Pending => {
                let exhausted = self
                    .config
                    .max_failure_attempts
                    .is_some_and(|max| wc.failed_attempts() >= max);
                if exhausted {
                    warn!(
                        work = %wc,
                        attempts = wc.failed_attempts(),
                        "Record exhausted its retries and stays incomplete"
                    );
                    self.sm.park(wc);
                } else {
                    let delay = self.retry_delay(&wc);
                    self.sm.on_failure(wc, delay);
                }
                ResultOutcome::Failed
            }
        }
    }

    fn retry_delay(&self, wc: &WorkContainer) -> Duration {
        self.retry_delay_provider
            .as_ref()
            .map_or(self.config.default_retry_delay, |provider| provider(wc))
    }

    // -------------------------------------------------------------------------
    // Commits
    // -------------------------------------------------------------------------

    /// Builds commit data for every dirty partition.
    #[must_use]
    pub fn collect_commit_data(&self) -> Vec<(TopicPartition, CommitData)> {
        self.pm.collect_dirty_commit_data()
    }

    /// Records a successful commit.
    pub fn on_offset_commit_success(&self, committed: &[(TopicPartition, CommitData)]) {
        self.pm.on_offset_commit_success(committed);
    }

    /// Returns true if `tp` may take more records.
    #[must_use]
    pub fn is_allowed_more_records(&self, tp: &TopicPartition) -> bool {
        self.pm.is_allowed_more_records(tp)
    }

    /// Commit point of a partition, if assigned.
    #[must_use]
    pub fn commit_point(&self, tp: &TopicPartition) -> Option<Offset> {
        self.pm.commit_point(tp)
    }

    // -------------------------------------------------------------------------
    // Back-pressure
    // -------------------------------------------------------------------------

    /// Current load factor.
    #[must_use]
    pub fn load_factor(&self) -> u32 {
        self.load_factor.lock().current()
    }

    fn target_queued(&self) -> u64 {
        u64::from(self.config.max_concurrency) * u64::from(self.load_factor())
    }

    /// Returns true if enough work is queued to keep the workers busy.
    #[must_use]
    pub fn is_sufficiently_loaded(&self) -> bool {
        self.number_of_queued_work() > self.target_queued()
    }

    /// Returns true if polling should pause.
    #[must_use]
    pub fn should_throttle(&self) -> bool {
        self.is_sufficiently_loaded()
    }

    /// Steps the load factor if the queue ran dry. Returns true if it stepped.
    pub fn step_load_factor(&self, current_time_us: u64) -> bool {
        if self.number_of_queued_work() >= u64::from(self.config.max_concurrency) {
            return false;
        }
        self.load_factor.lock().try_step(current_time_us)
    }

    /// Returns true if the in-flight count meets the target concurrency.
    #[must_use]
    pub fn is_work_in_flight_meeting_target(&self) -> bool {
        self.number_records_out_for_processing() >= u64::from(self.config.max_concurrency)
    }

    /// Time until the earliest retry is due.
    #[must_use]
    pub fn lowest_retry_time(&self, current_time_us: u64) -> Option<Duration> {
        self.sm.lowest_retry_time(current_time_us)
    }

    // -------------------------------------------------------------------------
    // Counters
    // -------------------------------------------------------------------------

    /// Records handed to workers and not yet returned.
    #[must_use]
    pub fn number_records_out_for_processing(&self) -> u64 {
        self.out_for_processing.load(Ordering::Acquire)
    }

    /// Records queued and not yet selected.
    #[must_use]
    pub fn number_of_queued_work(&self) -> u64 {
        self.sm.number_of_queued_work()
    }

    /// Incomplete offsets across partitions.
    #[must_use]
    pub fn total_incomplete(&self) -> u64 {
        self.pm.number_of_incompletes()
    }

    /// Returns true if any partition has incomplete offsets.
    #[must_use]
    pub fn has_incompletes(&self) -> bool {
        self.pm.has_incompletes()
    }

    /// Returns true if any partition has uncommitted completions.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.pm.is_dirty()
    }

    /// Returns true if records are queued or in flight.
    #[must_use]
    pub fn has_work(&self) -> bool {
        self.number_records_out_for_processing() > 0 || self.sm.work_is_waiting()
    }
}
