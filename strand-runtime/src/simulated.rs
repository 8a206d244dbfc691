//! In-memory simulated broker.
//!
//! Implements both [`ConsumerClient`] and [`ProducerClient`] over shared
//! in-memory partition logs. Clones share state, so a test can keep one
//! handle to script records and rebalances while the controller owns
//! another.
//!
//! # Rebalances
//!
//! [`SimulatedBroker::assign`], [`SimulatedBroker::revoke`] and
//! [`SimulatedBroker::lose`] queue assignment changes. They are applied at
//! the start of the next poll and reported in its [`PolledBatch`]. A newly
//! assigned partition starts fetching from its committed offset.
//!
//! # Faults
//!
//! Faults are deterministic for a given seed. Forced faults fire exactly
//! once; rate-based faults use a seeded hash of an operation counter.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard};
use strand_core::{Offset, PolledRecord, TopicPartition};
use strand_state::AssignedPartition;
use tracing::{debug, info};

use crate::broker::{
    CommitOffsets, ConsumerClient, GroupMetadata, OffsetAndMetadata, PolledBatch,
    ProducerClient, ProducerRecord, RebalanceEvent,
};
use crate::error::{RuntimeError, RuntimeResult};

/// Default maximum records returned by one poll.
pub const DEFAULT_MAX_POLL_RECORDS: usize = 500;

// -----------------------------------------------------------------------------
// Fault Configuration
// -----------------------------------------------------------------------------

/// Fault injection settings for the simulated broker.
#[derive(Debug, Clone, Default)]
pub struct BrokerFaultConfig {
    /// Probability that a poll fails.
    pub poll_fail_rate: f64,
    /// Probability that a commit fails.
    pub commit_fail_rate: f64,
    /// Probability that a produce fails.
    pub send_fail_rate: f64,
    /// Fail the next poll.
    pub force_poll_fail: bool,
    /// Fail the next commit (consumer or transactional).
    pub force_commit_fail: bool,
}

impl BrokerFaultConfig {
    /// No faults.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Occasional commit and produce faults.
    #[must_use]
    pub const fn flaky() -> Self {
        Self {
            poll_fail_rate: 0.0,
            commit_fail_rate: 0.05,
            send_fail_rate: 0.02,
            force_poll_fail: false,
            force_commit_fail: false,
        }
    }

    /// Builder: set commit fail rate.
    #[must_use]
    pub const fn with_commit_fail_rate(mut self, rate: f64) -> Self {
        self.commit_fail_rate = rate;
        self
    }

    /// Builder: set poll fail rate.
    #[must_use]
    pub const fn with_poll_fail_rate(mut self, rate: f64) -> Self {
        self.poll_fail_rate = rate;
        self
    }
}

// -----------------------------------------------------------------------------
// Inspection Types
// -----------------------------------------------------------------------------

/// How a commit reached the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitKind {
    /// `commit_sync`.
    Sync,
    /// `commit_async`.
    Async,
    /// A committed transaction.
    Transaction,
}

/// One accepted commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    /// How it was committed.
    pub kind: CommitKind,
    /// What was committed.
    pub offsets: CommitOffsets,
}

#[derive(Debug)]
enum PendingRebalance {
    Assign(Vec<TopicPartition>),
    Revoke(Vec<TopicPartition>),
    Lose(Vec<TopicPartition>),
}

#[derive(Debug, Default)]
struct Transaction {
    records: Vec<ProducerRecord>,
    offsets: CommitOffsets,
}

#[derive(Debug)]
struct BrokerState {
    logs: BTreeMap<TopicPartition, Vec<PolledRecord>>,
    positions: BTreeMap<TopicPartition, Offset>,
    paused: BTreeSet<TopicPartition>,
    committed: BTreeMap<TopicPartition, OffsetAndMetadata>,
    pending: VecDeque<PendingRebalance>,
    history: Vec<CommitRecord>,
    transaction: Option<Transaction>,
    produced: Vec<ProducerRecord>,
    committed_transactions: u64,
    aborted_transactions: u64,
    generation: u64,
    max_poll_records: usize,
}

impl BrokerState {
    fn new() -> Self {
        Self {
            logs: BTreeMap::new(),
            positions: BTreeMap::new(),
            paused: BTreeSet::new(),
            committed: BTreeMap::new(),
            pending: VecDeque::new(),
            history: Vec::new(),
            transaction: None,
            produced: Vec::new(),
            committed_transactions: 0,
            aborted_transactions: 0,
            generation: 0,
            max_poll_records: DEFAULT_MAX_POLL_RECORDS,
        }
    }

    fn apply_rebalance(&mut self, pending: PendingRebalance) -> Option<RebalanceEvent> {
        self.generation += 1;
        match pending {
            PendingRebalance::Assign(tps) => {
                let assigned: Vec<AssignedPartition> = tps
                    .into_iter()
                    .map(|tp| {
                        let committed = self.committed.get(&tp);
                        let offset = committed.map_or(Offset::new(0), |c| c.offset);
                        let mut assignment = AssignedPartition::new(tp.clone(), offset);
                        if let Some(metadata) = committed.and_then(|c| c.metadata.clone()) {
                            assignment = assignment.with_metadata(metadata);
                        }
                        self.positions.insert(tp, offset);
                        assignment
                    })
                    .collect();
                (!assigned.is_empty()).then_some(RebalanceEvent::Assigned(assigned))
            }
            PendingRebalance::Revoke(tps) => {
                let revoked = self.unassign(tps);
                (!revoked.is_empty()).then_some(RebalanceEvent::Revoked(revoked))
            }
            PendingRebalance::Lose(tps) => {
                let lost = self.unassign(tps);
                (!lost.is_empty()).then_some(RebalanceEvent::Lost(lost))
            }
        }
    }

    fn unassign(&mut self, tps: Vec<TopicPartition>) -> Vec<TopicPartition> {
        tps.into_iter()
            .filter(|tp| {
                self.paused.remove(tp);
                self.positions.remove(tp).is_some()
            })
            .collect()
    }

    fn fetch(&mut self) -> BTreeMap<TopicPartition, Vec<PolledRecord>> {
        let mut budget = self.max_poll_records;
        let mut fetched = BTreeMap::new();
        for (tp, position) in &mut self.positions {
            if budget == 0 {
                break;
            }
            if self.paused.contains(tp) {
                continue;
            }
            let Some(log) = self.logs.get(tp) else {
                continue;
            };
            let start = log.partition_point(|r| r.offset < *position);
            let records: Vec<PolledRecord> = log[start..].iter().take(budget).cloned().collect();
            if let Some(last) = records.last() {
                *position = last.offset.next();
                budget -= records.len();
                fetched.insert(tp.clone(), records);
            }
        }
        fetched
    }

    fn record_commit(&mut self, kind: CommitKind, offsets: CommitOffsets) {
        for (tp, committed) in &offsets {
            self.committed.insert(tp.clone(), committed.clone());
        }
        self.history.push(CommitRecord { kind, offsets });
    }
}

// -----------------------------------------------------------------------------
// Simulated Broker
// -----------------------------------------------------------------------------

/// In-memory broker for tests and benchmarks.
///
/// Clones share state via `Arc`.
#[derive(Debug, Clone)]
pub struct SimulatedBroker {
    state: Arc<Mutex<BrokerState>>,
    fault_config: Arc<Mutex<BrokerFaultConfig>>,
    seed: u64,
    counter: Arc<AtomicU64>,
    wakeups: Arc<AtomicU64>,
}

impl SimulatedBroker {
    /// Creates a broker with no faults.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self::with_faults(seed, BrokerFaultConfig::none())
    }

    /// Creates a broker with fault injection.
    #[must_use]
    pub fn with_faults(seed: u64, config: BrokerFaultConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState::new())),
            fault_config: Arc::new(Mutex::new(config)),
            seed,
            counter: Arc::new(AtomicU64::new(0)),
            wakeups: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Builder: limit records per poll.
    ///
    /// # Panics
    ///
    /// Panics if `max` is zero.
    #[must_use]
    pub fn with_max_poll_records(self, max: usize) -> Self {
        // TigerStyle: Assert preconditions.
        assert!(max > 0, "max poll records must be positive");
        self.state.lock().max_poll_records = max;
        self
    }

    /// Returns fault config for modification.
    pub fn fault_config(&self) -> MutexGuard<'_, BrokerFaultConfig> {
        self.fault_config.lock()
    }

    /// Uses `(seed + counter) * M` so faults replay for a given seed.
    fn should_inject_fault(&self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        if rate >= 1.0 {
            return true;
        }
        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        let hash = self
            .seed
            .wrapping_add(counter)
            .wrapping_mul(0x9e37_79b9_7f4a_7c15);
        #[allow(clippy::cast_precision_loss)]
        let normalized = (hash as f64) / (u64::MAX as f64);
        normalized < rate
    }

    fn check_commit_fault(&self, operation: &'static str) -> RuntimeResult<()> {
        let rate = {
            let mut config = self.fault_config.lock();
            if config.force_commit_fail {
                config.force_commit_fail = false;
                return Err(RuntimeError::broker(operation, "simulated failure (forced)"));
            }
            config.commit_fail_rate
        };
        if self.should_inject_fault(rate) {
            return Err(RuntimeError::broker(operation, "simulated failure (random)"));
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Scripting
    // -------------------------------------------------------------------------

    /// Appends a record at the end of a partition log. Returns its offset.
    pub fn append(&self, tp: &TopicPartition, value: impl Into<Bytes>) -> Offset {
        self.append_with_key(tp, None, value)
    }

    /// Appends a keyed record. Returns its offset.
    pub fn append_keyed(
        &self,
        tp: &TopicPartition,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
    ) -> Offset {
        self.append_with_key(tp, Some(key.into()), value)
    }

    fn append_with_key(
        &self,
        tp: &TopicPartition,
        key: Option<Bytes>,
        value: impl Into<Bytes>,
    ) -> Offset {
        let mut state = self.state.lock();
        let log = state.logs.entry(tp.clone()).or_default();
        let offset = log.last().map_or(Offset::new(0), |r| r.offset.next());
        let mut record = PolledRecord::new(tp.clone(), offset.get(), value);
        record.key = key;
        log.push(record);
        offset
    }

    /// Appends `count` records with values `"{prefix}-{n}"`.
    pub fn append_many(&self, tp: &TopicPartition, count: u64, prefix: &str) {
        for n in 0..count {
            self.append(tp, format!("{prefix}-{n}"));
        }
    }

    /// Removes records from a log, as compaction would.
    pub fn compact(&self, tp: &TopicPartition, offsets: &[u64]) {
        if let Some(log) = self.state.lock().logs.get_mut(tp) {
            log.retain(|r| !offsets.contains(&r.offset.get()));
        }
    }

    /// Queues an assignment, applied on the next poll.
    pub fn assign(&self, tps: Vec<TopicPartition>) {
        self.state.lock().pending.push_back(PendingRebalance::Assign(tps));
    }

    /// Queues a clean revocation, applied on the next poll.
    pub fn revoke(&self, tps: Vec<TopicPartition>) {
        self.state.lock().pending.push_back(PendingRebalance::Revoke(tps));
    }

    /// Queues a partition loss, applied on the next poll.
    pub fn lose(&self, tps: Vec<TopicPartition>) {
        self.state.lock().pending.push_back(PendingRebalance::Lose(tps));
    }

    /// Sets a committed position, as if another member had committed it.
    pub fn seed_commit(&self, tp: TopicPartition, committed: OffsetAndMetadata) {
        self.state.lock().committed.insert(tp, committed);
    }

    // -------------------------------------------------------------------------
    // Inspection (bypasses faults)
    // -------------------------------------------------------------------------

    /// Every accepted commit, oldest first.
    #[must_use]
    pub fn commit_history(&self) -> Vec<CommitRecord> {
        self.state.lock().history.clone()
    }

    /// Latest committed position of a partition.
    #[must_use]
    pub fn committed(&self, tp: &TopicPartition) -> Option<OffsetAndMetadata> {
        self.state.lock().committed.get(tp).cloned()
    }

    /// Latest committed offset of a partition.
    #[must_use]
    pub fn committed_offset(&self, tp: &TopicPartition) -> Option<Offset> {
        self.committed(tp).map(|c| c.offset)
    }

    /// Offset after the last record of a partition log.
    #[must_use]
    pub fn log_end(&self, tp: &TopicPartition) -> Offset {
        self.state
            .lock()
            .logs
            .get(tp)
            .and_then(|log| log.last())
            .map_or(Offset::new(0), |r| r.offset.next())
    }

    /// Currently paused partitions.
    #[must_use]
    pub fn paused_partitions(&self) -> Vec<TopicPartition> {
        self.state.lock().paused.iter().cloned().collect()
    }

    /// Records produced by committed transactions.
    #[must_use]
    pub fn produced(&self) -> Vec<ProducerRecord> {
        self.state.lock().produced.clone()
    }

    /// Returns true if a transaction is open.
    #[must_use]
    pub fn transaction_open(&self) -> bool {
        self.state.lock().transaction.is_some()
    }

    /// Number of committed transactions.
    #[must_use]
    pub fn committed_transactions(&self) -> u64 {
        self.state.lock().committed_transactions
    }

    /// Number of aborted transactions.
    #[must_use]
    pub fn aborted_transactions(&self) -> u64 {
        self.state.lock().aborted_transactions
    }

    /// Number of wakeups received.
    #[must_use]
    pub fn wakeups(&self) -> u64 {
        self.wakeups.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ConsumerClient for SimulatedBroker {
    async fn poll(&self, _timeout: Duration) -> RuntimeResult<PolledBatch> {
        let rate = {
            let mut config = self.fault_config.lock();
            if config.force_poll_fail {
                config.force_poll_fail = false;
                return Err(RuntimeError::broker("poll", "simulated failure (forced)"));
            }
            config.poll_fail_rate
        };
        if self.should_inject_fault(rate) {
            return Err(RuntimeError::broker("poll", "simulated failure (random)"));
        }

        let mut state = self.state.lock();
        let mut batch = PolledBatch::empty();
        while let Some(pending) = state.pending.pop_front() {
            if let Some(event) = state.apply_rebalance(pending) {
                info!(event = ?event, "Simulated rebalance");
                batch.events.push(event);
            }
        }
        batch.records = state.fetch();
        Ok(batch)
    }

    async fn commit_sync(&self, offsets: CommitOffsets) -> RuntimeResult<()> {
        self.check_commit_fault("commit_sync")?;
        self.state.lock().record_commit(CommitKind::Sync, offsets);
        Ok(())
    }

    async fn commit_async(&self, offsets: CommitOffsets) -> RuntimeResult<()> {
        self.check_commit_fault("commit_async")?;
        self.state.lock().record_commit(CommitKind::Async, offsets);
        Ok(())
    }

    fn assignment(&self) -> Vec<TopicPartition> {
        self.state.lock().positions.keys().cloned().collect()
    }

    fn pause(&self, tps: &[TopicPartition]) {
        let mut state = self.state.lock();
        for tp in tps {
            if state.positions.contains_key(tp) {
                state.paused.insert(tp.clone());
            }
        }
    }

    fn resume(&self, tps: &[TopicPartition]) {
        let mut state = self.state.lock();
        for tp in tps {
            state.paused.remove(tp);
        }
    }

    fn wakeup(&self) {
        self.wakeups.fetch_add(1, Ordering::Relaxed);
    }

    fn group_metadata(&self) -> GroupMetadata {
        GroupMetadata {
            group_id: "strand-simulated".to_string(),
            generation: self.state.lock().generation,
            member_id: format!("member-{}", self.seed),
        }
    }
}

#[async_trait]
impl ProducerClient for SimulatedBroker {
    async fn begin_transaction(&self) -> RuntimeResult<()> {
        let mut state = self.state.lock();
        if state.transaction.is_some() {
            return Err(RuntimeError::producer(
                "begin_transaction",
                "transaction already open",
            ));
        }
        state.transaction = Some(Transaction::default());
        Ok(())
    }

    async fn send(&self, record: ProducerRecord) -> RuntimeResult<Offset> {
        let rate = self.fault_config.lock().send_fail_rate;
        if self.should_inject_fault(rate) {
            return Err(RuntimeError::producer("send", "simulated failure (random)"));
        }
        let mut state = self.state.lock();
        let BrokerState {
            transaction,
            produced,
            ..
        } = &mut *state;
        let Some(txn) = transaction.as_mut() else {
            return Err(RuntimeError::producer("send", "no open transaction"));
        };
        txn.records.push(record);
        let offset = produced.len() + txn.records.len() - 1;
        Ok(Offset::new(offset as u64))
    }

    async fn send_offsets_to_transaction(
        &self,
        offsets: CommitOffsets,
        _group: &GroupMetadata,
    ) -> RuntimeResult<()> {
        let mut state = self.state.lock();
        let Some(txn) = state.transaction.as_mut() else {
            return Err(RuntimeError::producer(
                "send_offsets_to_transaction",
                "no open transaction",
            ));
        };
        txn.offsets.extend(offsets);
        Ok(())
    }

    async fn commit_transaction(&self) -> RuntimeResult<()> {
        self.check_commit_fault("commit_transaction")?;
        let mut state = self.state.lock();
        let Some(txn) = state.transaction.take() else {
            return Err(RuntimeError::producer(
                "commit_transaction",
                "no open transaction",
            ));
        };
        state.produced.extend(txn.records);
        if !txn.offsets.is_empty() {
            state.record_commit(CommitKind::Transaction, txn.offsets);
        }
        state.committed_transactions += 1;
        debug!(
            transactions = state.committed_transactions,
            "Committed simulated transaction"
        );
        Ok(())
    }

    async fn abort_transaction(&self) -> RuntimeResult<()> {
        let mut state = self.state.lock();
        if state.transaction.take().is_none() {
            return Err(RuntimeError::producer(
                "abort_transaction",
                "no open transaction",
            ));
        }
        state.aborted_transactions += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tp(p: u64) -> TopicPartition {
        TopicPartition::new("t", p)
    }

    #[tokio::test]
    async fn test_assign_then_fetch() {
        let broker = SimulatedBroker::new(1);
        broker.append_many(&tp(0), 3, "v");
        broker.assign(vec![tp(0)]);

        let batch = broker.poll(Duration::ZERO).await.unwrap();
        assert_eq!(
            batch.events,
            vec![RebalanceEvent::Assigned(vec![AssignedPartition::new(
                tp(0),
                Offset::new(0)
            )])]
        );
        assert_eq!(batch.record_count(), 3);

        // Position advanced.
        assert!(broker.poll(Duration::ZERO).await.unwrap().is_empty());
        broker.append(&tp(0), "late");
        let batch = broker.poll(Duration::ZERO).await.unwrap();
        assert_eq!(batch.records[&tp(0)][0].offset, Offset::new(3));
    }

    #[tokio::test]
    async fn test_reassign_restarts_from_commit() {
        let broker = SimulatedBroker::new(1);
        broker.append_many(&tp(0), 5, "v");
        broker.seed_commit(
            tp(0),
            OffsetAndMetadata {
                offset: Offset::new(2),
                metadata: Some("meta".to_string()),
            },
        );
        broker.assign(vec![tp(0)]);

        let batch = broker.poll(Duration::ZERO).await.unwrap();
        assert_eq!(
            batch.events,
            vec![RebalanceEvent::Assigned(vec![
                AssignedPartition::new(tp(0), Offset::new(2)).with_metadata("meta")
            ])]
        );
        let offsets: Vec<u64> = batch.records[&tp(0)].iter().map(|r| r.offset.get()).collect();
        assert_eq!(offsets, vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn test_pause_and_poll_limit() {
        let broker = SimulatedBroker::new(1).with_max_poll_records(2);
        broker.append_many(&tp(0), 3, "a");
        broker.append_many(&tp(1), 3, "b");
        broker.assign(vec![tp(0), tp(1)]);
        broker.poll(Duration::ZERO).await.unwrap();

        broker.pause(&[tp(0)]);
        let batch = broker.poll(Duration::ZERO).await.unwrap();
        assert!(!batch.records.contains_key(&tp(0)));
        assert_eq!(batch.records[&tp(1)].len(), 2);
        assert_eq!(broker.paused_partitions(), vec![tp(0)]);

        broker.resume(&[tp(0)]);
        let batch = broker.poll(Duration::ZERO).await.unwrap();
        assert_eq!(batch.records[&tp(0)][0].offset, Offset::new(2));
    }

    #[tokio::test]
    async fn test_revoke_and_lose() {
        let broker = SimulatedBroker::new(1);
        broker.assign(vec![tp(0), tp(1)]);
        broker.revoke(vec![tp(0)]);
        broker.lose(vec![tp(1), tp(2)]);

        let batch = broker.poll(Duration::ZERO).await.unwrap();
        assert_eq!(batch.events.len(), 3);
        assert_eq!(batch.events[1], RebalanceEvent::Revoked(vec![tp(0)]));
        assert_eq!(batch.events[2], RebalanceEvent::Lost(vec![tp(1)]));
        assert!(broker.assignment().is_empty());
    }

    #[tokio::test]
    async fn test_compaction_gaps() {
        let broker = SimulatedBroker::new(1);
        broker.append_many(&tp(0), 5, "v");
        broker.compact(&tp(0), &[1, 3]);
        broker.assign(vec![tp(0)]);
        let batch = broker.poll(Duration::ZERO).await.unwrap();
        let offsets: Vec<u64> = batch.records[&tp(0)].iter().map(|r| r.offset.get()).collect();
        assert_eq!(offsets, vec![0, 2, 4]);
        assert_eq!(broker.log_end(&tp(0)), Offset::new(5));
    }

    #[tokio::test]
    async fn test_forced_faults_fire_once() {
        let broker = SimulatedBroker::new(1);
        broker.fault_config().force_poll_fail = true;
        broker.fault_config().force_commit_fail = true;

        assert!(broker.poll(Duration::ZERO).await.is_err());
        assert!(broker.poll(Duration::ZERO).await.is_ok());
        assert!(broker.commit_sync(CommitOffsets::new()).await.is_err());
        assert!(broker.commit_sync(CommitOffsets::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_transaction_lifecycle() {
        let broker = SimulatedBroker::new(1);
        assert!(broker.send(ProducerRecord::new("out", "x")).await.is_err());

        broker.begin_transaction().await.unwrap();
        assert!(broker.begin_transaction().await.is_err());
        broker.send(ProducerRecord::new("out", "x")).await.unwrap();
        let mut offsets = CommitOffsets::new();
        offsets.insert(
            tp(0),
            OffsetAndMetadata {
                offset: Offset::new(4),
                metadata: None,
            },
        );
        let group = broker.group_metadata();
        broker.send_offsets_to_transaction(offsets, &group).await.unwrap();
        assert!(broker.produced().is_empty());

        broker.commit_transaction().await.unwrap();
        assert_eq!(broker.produced().len(), 1);
        assert_eq!(broker.committed_offset(&tp(0)), Some(Offset::new(4)));
        assert_eq!(broker.commit_history()[0].kind, CommitKind::Transaction);

        broker.begin_transaction().await.unwrap();
        broker.send(ProducerRecord::new("out", "y")).await.unwrap();
        broker.abort_transaction().await.unwrap();
        assert_eq!(broker.produced().len(), 1);
        assert_eq!(broker.aborted_transactions(), 1);
    }

    #[test]
    fn test_fault_rates_deterministic() {
        let a = SimulatedBroker::new(42);
        let b = SimulatedBroker::new(42);
        let draws_a: Vec<bool> = (0..64).map(|_| a.should_inject_fault(0.3)).collect();
        let draws_b: Vec<bool> = (0..64).map(|_| b.should_inject_fault(0.3)).collect();
        assert_eq!(draws_a, draws_b);
        assert!(draws_a.iter().any(|d| *d));
        assert!(!a.should_inject_fault(0.0));
    }
}
