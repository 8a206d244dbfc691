//! Offset committer.
//!
//! Collects commit data for every dirty partition and hands it to the
//! broker in the configured commit mode:
//!
//! | Mode                             | Broker calls                                      |
//! |----------------------------------|---------------------------------------------------|
//! | `PeriodicConsumerSync`           | `commit_sync`                                     |
//! | `PeriodicConsumerAsync`          | `commit_async`                                    |
//! | `PeriodicTransactionalProducer`  | `send_offsets_to_transaction`, `commit_transaction`, `begin_transaction` (`abort_transaction` on failure) |
//!
//! Partitions are only marked clean after the broker call returns, and only
//! if nothing completed in them since the data was collected.
//!
//! A failed transactional commit aborts the transaction and opens a fresh
//! one. The sends in the aborted transaction are gone while their records
//! already count as complete, so the caller must treat the error as fatal.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use strand_core::{CommitMode, EngineConfig, TopicPartition};
use strand_state::{CommitData, WorkManager};
use tracing::{debug, info, warn};

use crate::broker::{commit_offsets, ConsumerClient, ProducerClient};
use crate::error::{RuntimeError, RuntimeResult};
use crate::produce_lock::ProduceLock;

/// Commits completed offsets.
pub struct OffsetCommitter {
    mode: CommitMode,
    commit_timeout: Duration,
    lock_timeout: Duration,
    wm: Arc<WorkManager>,
    consumer: Arc<dyn ConsumerClient>,
    producer: Option<Arc<dyn ProducerClient>>,
    lock: ProduceLock,
    encoding_failures: AtomicU64,
}

impl std::fmt::Debug for OffsetCommitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OffsetCommitter")
            .field("mode", &self.mode)
            .field("commit_timeout", &self.commit_timeout)
            .finish_non_exhaustive()
    }
}

impl OffsetCommitter {
    /// Creates a committer.
    ///
    /// # Errors
    ///
    /// Returns `MissingProducer` if the mode is transactional and no producer
    /// is given.
    pub fn new(
        config: &EngineConfig,
        wm: Arc<WorkManager>,
        consumer: Arc<dyn ConsumerClient>,
        producer: Option<Arc<dyn ProducerClient>>,
        lock: ProduceLock,
    ) -> RuntimeResult<Self> {
        if config.commit_mode.is_transactional() && producer.is_none() {
            return Err(RuntimeError::MissingProducer);
        }
        Ok(Self {
            mode: config.commit_mode,
            commit_timeout: config.offset_commit_timeout,
            lock_timeout: config.produce_lock_timeout,
            wm,
            consumer,
            producer,
            lock,
            encoding_failures: AtomicU64::new(0),
        })
    }

    /// The commit mode.
    #[must_use]
    pub const fn mode(&self) -> CommitMode {
        self.mode
    }

    /// Partition commits that went out without metadata because no encoding
    /// could hold their incompletes.
    #[must_use]
    pub fn encoding_failures(&self) -> u64 {
        self.encoding_failures.load(Ordering::Relaxed)
    }

    /// Opens the first transaction. Does nothing outside transactional mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the producer refuses.
    pub async fn start(&self) -> RuntimeResult<()> {
        if let Some(producer) = self.transactional_producer() {
            self.bounded(producer.begin_transaction()).await?;
            info!("Opened first transaction");
        }
        Ok(())
    }

    /// Commits every dirty partition. Returns the number of partitions
    /// committed.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker call fails or times out, or if the
    /// produce lock can not be taken in time. A transaction that fails to
    /// commit has already been aborted when this returns.
    pub async fn retrieve_offsets_and_commit(&self) -> RuntimeResult<usize> {
        self.commit(false).await
    }

    /// Commits for the last time. In transactional mode the open transaction
    /// is committed even if no offsets are dirty, and no new one is opened.
    ///
    /// # Errors
    ///
    /// Same as [`Self::retrieve_offsets_and_commit`].
    pub async fn commit_final(&self) -> RuntimeResult<usize> {
        self.commit(true).await
    }

    async fn commit(&self, is_final: bool) -> RuntimeResult<usize> {
        match self.transactional_producer() {
            Some(producer) => self.commit_transaction(producer, is_final).await,
            None => self.commit_consumer().await,
        }
    }

    /// Aborts the open transaction, if any. Does nothing outside
    /// transactional mode.
    pub async fn abort(&self) {
        if let Some(producer) = self.transactional_producer() {
            match self.bounded(producer.abort_transaction()).await {
                Ok(()) => info!("Aborted open transaction"),
                Err(e) => debug!(error = %e, "No transaction to abort"),
            }
        }
    }

    fn transactional_producer(&self) -> Option<&Arc<dyn ProducerClient>> {
        if self.mode.is_transactional() {
            self.producer.as_ref()
        } else {
            None
        }
    }

    async fn commit_consumer(&self) -> RuntimeResult<usize> {
        let data = self.wm.collect_commit_data();
        if data.is_empty() {
            return Ok(0);
        }
        let offsets = commit_offsets(&data);
        match self.mode {
            CommitMode::PeriodicConsumerSync => {
                self.bounded(self.consumer.commit_sync(offsets)).await?;
            }
            CommitMode::PeriodicConsumerAsync | CommitMode::PeriodicTransactionalProducer => {
                self.bounded(self.consumer.commit_async(offsets)).await?;
            }
        }
        Ok(self.on_committed(&data))
    }

    async fn commit_transaction(
        &self,
        producer: &Arc<dyn ProducerClient>,
        is_final: bool,
    ) -> RuntimeResult<usize> {
        let _guard = self.lock.acquire_commit(self.lock_timeout).await?;
        // Collected under the lock so no send races the offsets.
        let data = self.wm.collect_commit_data();
        if data.is_empty() && !is_final {
            return Ok(0);
        }
        if let Err(e) = self.finish_transaction(producer, &data).await {
            self.abort_failed(producer, is_final, &e).await;
            return Err(e);
        }
        let committed = self.on_committed(&data);
        if !is_final {
            self.bounded(producer.begin_transaction()).await?;
        }
        Ok(committed)
    }

    async fn finish_transaction(
        &self,
        producer: &Arc<dyn ProducerClient>,
        data: &[(TopicPartition, CommitData)],
    ) -> RuntimeResult<()> {
        if !data.is_empty() {
            let group = self.consumer.group_metadata();
            self.bounded(producer.send_offsets_to_transaction(commit_offsets(data), &group))
                .await?;
        }
        self.bounded(producer.commit_transaction()).await
    }

    async fn abort_failed(
        &self,
        producer: &Arc<dyn ProducerClient>,
        is_final: bool,
        cause: &RuntimeError,
    ) {
        warn!(error = %cause, "Transactional commit failed, aborting");
        if let Err(e) = self.bounded(producer.abort_transaction()).await {
            warn!(error = %e, "Abort after failed commit failed");
        }
        if !is_final {
            if let Err(e) = self.bounded(producer.begin_transaction()).await {
                warn!(error = %e, "Could not reopen transaction after abort");
            }
        }
    }

    fn on_committed(&self, data: &[(TopicPartition, CommitData)]) -> usize {
        self.wm.on_offset_commit_success(data);
        self.note_encoding_failures(data);
        debug!(partitions = data.len(), mode = ?self.mode, "Committed offsets");
        data.len()
    }

    fn note_encoding_failures(&self, data: &[(TopicPartition, CommitData)]) {
        for (tp, committed) in data {
            if let Some(e) = &committed.encoding_error {
                self.encoding_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    partition = %tp,
                    offset = %committed.offset,
                    error = %e,
                    "Committed without metadata, completed records above the commit point will be reprocessed"
                );
            }
        }
    }

    async fn bounded<T>(&self, call: impl Future<Output = RuntimeResult<T>>) -> RuntimeResult<T> {
        tokio::time::timeout(self.commit_timeout, call)
            .await
            .map_err(|_| RuntimeError::CommitTimeout {
                waited: self.commit_timeout,
            })?
    }
}

#[cfg(test)]
mod tests {
    use strand_core::{Offset, PolledRecord, ProcessingOrder};
    use strand_offsets::OffsetError;
    use strand_state::{AssignedPartition, EpochAndRecords};

    use super::*;
    use crate::simulated::SimulatedBroker;

    fn tp() -> TopicPartition {
        TopicPartition::new("t", 0)
    }

    fn setup(mode: CommitMode) -> (Arc<WorkManager>, SimulatedBroker, OffsetCommitter) {
        let config = EngineConfig::for_testing()
            .with_ordering(ProcessingOrder::Unordered)
            .with_commit_mode(mode);
        let wm = Arc::new(WorkManager::new(config.clone(), 0).unwrap());
        wm.on_partitions_assigned(&[AssignedPartition::new(tp(), Offset::new(0))])
            .unwrap();
        let broker = SimulatedBroker::new(1);
        let committer = OffsetCommitter::new(
            &config,
            Arc::clone(&wm),
            Arc::new(broker.clone()),
            Some(Arc::new(broker.clone())),
            ProduceLock::new(),
        )
        .unwrap();
        (wm, broker, committer)
    }

    fn complete(wm: &WorkManager, offsets: std::ops::Range<u64>, done: &[u64]) {
        wm.register_work(EpochAndRecords {
            tp: tp(),
            epoch: wm.epoch_of(&tp()),
            records: offsets.map(|o| PolledRecord::new(tp(), o, "v")).collect(),
        });
        for mut wc in wm.get_work(100, 0) {
            if done.contains(&wc.offset().get()) {
                wc.on_user_function_success(0);
            } else {
                wc.on_user_function_failure(0);
            }
            wm.handle_result(wc);
        }
    }

    #[tokio::test]
    async fn test_nothing_dirty_skips_broker() {
        let (_wm, broker, committer) = setup(CommitMode::PeriodicConsumerSync);
        assert_eq!(committer.retrieve_offsets_and_commit().await.unwrap(), 0);
        assert!(broker.commit_history().is_empty());
    }

    #[tokio::test]
    async fn test_sync_commit_clears_dirty() {
        let (wm, broker, committer) = setup(CommitMode::PeriodicConsumerSync);
        complete(&wm, 0..3, &[0, 2]);

        assert_eq!(committer.retrieve_offsets_and_commit().await.unwrap(), 1);
        let history = broker.commit_history();
        assert_eq!(history.len(), 1);
        let committed = &history[0].offsets[&tp()];
        assert_eq!(committed.offset, Offset::new(1));
        assert!(committed.metadata.is_some());
        assert!(!wm.is_dirty());

        // Clean: no second call.
        assert_eq!(committer.retrieve_offsets_and_commit().await.unwrap(), 0);
        assert_eq!(broker.commit_history().len(), 1);
    }

    #[tokio::test]
    async fn test_transactional_commit_cycle() {
        let (wm, broker, committer) = setup(CommitMode::PeriodicTransactionalProducer);
        committer.start().await.unwrap();
        assert!(broker.transaction_open());

        complete(&wm, 0..2, &[0, 1]);
        assert_eq!(committer.retrieve_offsets_and_commit().await.unwrap(), 1);
        assert_eq!(broker.committed_transactions(), 1);
        assert!(broker.transaction_open());
        assert_eq!(broker.committed_offset(&tp()), Some(Offset::new(2)));

        assert_eq!(committer.commit_final().await.unwrap(), 0);
        assert_eq!(broker.committed_transactions(), 2);
        assert!(!broker.transaction_open());
    }

    #[tokio::test]
    async fn test_transactional_requires_producer() {
        let config =
            EngineConfig::for_testing().with_commit_mode(CommitMode::PeriodicTransactionalProducer);
        let wm = Arc::new(WorkManager::new(config.clone(), 0).unwrap());
        let broker = SimulatedBroker::new(1);
        let err = OffsetCommitter::new(&config, wm, Arc::new(broker), None, ProduceLock::new())
            .unwrap_err();
        assert!(matches!(err, RuntimeError::MissingProducer));
    }

    #[tokio::test]
    async fn test_failed_commit_stays_dirty() {
        let (wm, broker, committer) = setup(CommitMode::PeriodicConsumerAsync);
        complete(&wm, 0..1, &[0]);
        broker.fault_config().force_commit_fail = true;

        assert!(committer.retrieve_offsets_and_commit().await.is_err());
        assert!(wm.is_dirty());
        assert_eq!(committer.retrieve_offsets_and_commit().await.unwrap(), 1);
        assert!(!wm.is_dirty());
    }

    #[tokio::test]
    async fn test_failed_transaction_is_aborted_and_reopened() {
        let (wm, broker, committer) = setup(CommitMode::PeriodicTransactionalProducer);
        committer.start().await.unwrap();
        complete(&wm, 0..2, &[0, 1]);
        broker.fault_config().force_commit_fail = true;

        let err = committer.retrieve_offsets_and_commit().await.unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Broker {
                operation: "commit_transaction",
                ..
            }
        ));
        assert_eq!(broker.aborted_transactions(), 1);
        assert_eq!(broker.committed_transactions(), 0);
        assert!(broker.transaction_open());
        assert_eq!(broker.committed_offset(&tp()), None);
        assert!(wm.is_dirty());

        // The fresh transaction carries only the offsets sent into it.
        assert_eq!(committer.retrieve_offsets_and_commit().await.unwrap(), 1);
        assert_eq!(broker.committed_transactions(), 1);
        assert_eq!(broker.commit_history().len(), 1);
        assert_eq!(broker.committed_offset(&tp()), Some(Offset::new(2)));
    }

    #[tokio::test]
    async fn test_failed_final_transaction_is_not_reopened() {
        let (wm, broker, committer) = setup(CommitMode::PeriodicTransactionalProducer);
        committer.start().await.unwrap();
        complete(&wm, 0..1, &[0]);
        broker.fault_config().force_commit_fail = true;

        assert!(committer.commit_final().await.is_err());
        assert_eq!(broker.aborted_transactions(), 1);
        assert!(!broker.transaction_open());
    }

    #[tokio::test]
    async fn test_abort_closes_open_transaction() {
        let (_wm, broker, committer) = setup(CommitMode::PeriodicTransactionalProducer);
        committer.start().await.unwrap();
        committer.abort().await;
        assert_eq!(broker.aborted_transactions(), 1);
        assert!(!broker.transaction_open());

        // Nothing open: a second abort is a no-op.
        committer.abort().await;
        assert_eq!(broker.aborted_transactions(), 1);
    }

    #[tokio::test]
    async fn test_unencodable_commits_are_counted() {
        let (_wm, _broker, committer) = setup(CommitMode::PeriodicConsumerSync);
        let unencodable = CommitData {
            offset: Offset::new(0),
            metadata: None,
            encoding_error: Some(OffsetError::NoEncodingPossible {
                base: 0,
                length: 1 << 32,
                incompletes: 1,
            }),
            generation: 1,
        };
        let encoded = CommitData {
            offset: Offset::new(4),
            metadata: Some("bwAAAAEB".to_string()),
            encoding_error: None,
            generation: 1,
        };

        committer.note_encoding_failures(&[
            (tp(), unencodable.clone()),
            (TopicPartition::new("t", 1), encoded),
        ]);
        assert_eq!(committer.encoding_failures(), 1);
        committer.note_encoding_failures(&[(tp(), unencodable)]);
        assert_eq!(committer.encoding_failures(), 2);
    }
}
