//! The control loop.
//!
//! One task owns the consumer and the work manager's registration side.
//! User functions run on a [`JoinSet`] and report back over an `mpsc`
//! channel, so the loop never blocks on a slow record.
//!
//! ```text
//!          ┌──────────────────── control loop ────────────────────┐
//!          │                                                      │
//!   broker ─▶ poll ─▶ rebalance events ─▶ register_work           │
//!          │                                   │                  │
//!          │          pause/resume ◀── back-pressure              │
//!          │                                   ▼                  │
//!          │                               get_work ──▶ JoinSet ──┼─▶ user fn
//!          │                                                      │      │
//!          │  commit (every commit_interval)   tally ◀── outcome ◀─┼─ mpsc┘
//!          └──────────────────────────────────────────────────────┘
//! ```
//!
//! Each worker folds its own result with `handle_result` before reporting
//! back. Produce guards taken by the user function are released only after
//! that, so a transactional commit that gets the lock always sees the
//! offsets of every send it is about to commit.
//!
//! # Closing
//!
//! [`ControllerHandle::close`] asks the loop to stop. With
//! [`DrainMode::Drain`] fetching stops and everything already polled is
//! processed. With [`DrainMode::DontDrain`] only records already handed to
//! workers are waited for. Both end with a final commit.

use std::collections::BTreeSet;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use strand_core::{EngineConfig, PolledRecord, TopicPartition};
use strand_flow::{RateLimiter, ThrottledLog};
use strand_state::{
    EpochAndRecords, ResultOutcome, RetryDelayProvider, WorkContainer, WorkManager,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::broker::{ConsumerClient, PolledBatch, ProducerClient, RebalanceEvent};
use crate::committer::OffsetCommitter;
use crate::error::{RuntimeError, RuntimeResult};
use crate::produce_lock::{HeldGuards, ProduceLock, ProducerHandle};
use crate::state::{DrainMode, RunState};

/// Longest the loop sleeps between polls when nothing else wakes it.
pub const MAX_IDLE_WAIT: Duration = Duration::from_millis(10);

/// Shortest sleep, so vetoed but due retries do not spin the loop.
const MIN_WAIT: Duration = Duration::from_millis(1);

/// A failing consumer commit is retried every interval; its warning is not.
const COMMIT_WARNING_INTERVAL: Duration = Duration::from_secs(5);

fn elapsed_us(base: Instant) -> u64 {
    u64::try_from(base.elapsed().as_micros()).unwrap_or(u64::MAX)
}

fn duration_us(d: Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}

fn tally(outcome: ResultOutcome, summary: &mut RunSummary) {
    match outcome {
        ResultOutcome::Succeeded => summary.succeeded += 1,
        ResultOutcome::Failed => summary.failed += 1,
        ResultOutcome::Stale => summary.stale += 1,
    }
}

// -----------------------------------------------------------------------------
// Signals and Summary
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
struct ControlSignal {
    paused: bool,
    close: Option<DrainMode>,
}

/// Counters reported when the loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Records polled and queued.
    pub registered: u64,
    /// Successful user function calls.
    pub succeeded: u64,
    /// Failed user function calls.
    pub failed: u64,
    /// Results dropped because their partition moved.
    pub stale: u64,
    /// Commits that reached the broker.
    pub commits: u64,
    /// Partition commits made without metadata because no encoding fit.
    pub encoding_failures: u64,
}

// -----------------------------------------------------------------------------
// Handle
// -----------------------------------------------------------------------------

/// Controls a running [`Controller`] from other tasks.
#[derive(Clone)]
pub struct ControllerHandle {
    signal: Arc<watch::Sender<ControlSignal>>,
    state: Arc<Mutex<RunState>>,
    wm: Arc<WorkManager>,
    consumer: Arc<dyn ConsumerClient>,
}

impl std::fmt::Debug for ControllerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerHandle")
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl ControllerHandle {
    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> RunState {
        *self.state.lock()
    }

    /// The work manager, for inspection.
    #[must_use]
    pub fn work_manager(&self) -> &Arc<WorkManager> {
        &self.wm
    }

    /// Stops fetching. Queued and in-flight work continues.
    pub fn pause(&self) {
        self.signal.send_modify(|s| s.paused = true);
    }

    /// Resumes fetching after [`Self::pause`].
    pub fn resume(&self) {
        self.signal.send_modify(|s| s.paused = false);
    }

    /// Asks the loop to close. A later `DontDrain` overrides an earlier
    /// `Drain`.
    ///
    /// # Errors
    ///
    /// Returns `Closed` if the controller already stopped.
    pub fn close(&self, mode: DrainMode) -> RuntimeResult<()> {
        if self.state() == RunState::Closed {
            return Err(RuntimeError::Closed);
        }
        self.signal.send_modify(|s| {
            s.close = match (s.close, mode) {
                (Some(DrainMode::DontDrain), _) | (_, DrainMode::DontDrain) => {
                    Some(DrainMode::DontDrain)
                }
                _ => Some(DrainMode::Drain),
            };
        });
        self.consumer.wakeup();
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Controller
// -----------------------------------------------------------------------------

/// Runs user functions over polled records and commits their progress.
pub struct Controller {
    config: EngineConfig,
    consumer: Arc<dyn ConsumerClient>,
    producer: Option<Arc<dyn ProducerClient>>,
    lock: ProduceLock,
    wm: Arc<WorkManager>,
    state: Arc<Mutex<RunState>>,
    signal: Arc<watch::Sender<ControlSignal>>,
    commit_warnings: Mutex<ThrottledLog>,
    base: Instant,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("state", &*self.state.lock())
            .field("work_manager", &self.wm)
            .finish_non_exhaustive()
    }
}

impl Controller {
    /// Creates a controller.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: EngineConfig, consumer: Arc<dyn ConsumerClient>) -> RuntimeResult<Self> {
        let wm = Arc::new(WorkManager::new(config.clone(), 0)?);
        let (signal, _) = watch::channel(ControlSignal::default());
        Ok(Self {
            config,
            consumer,
            producer: None,
            lock: ProduceLock::new(),
            wm,
            state: Arc::new(Mutex::new(RunState::Unused)),
            signal: Arc::new(signal),
            commit_warnings: Mutex::new(ThrottledLog::new(duration_us(COMMIT_WARNING_INTERVAL))),
            base: Instant::now(),
        })
    }

    /// Builder: set the transactional producer.
    #[must_use]
    pub fn with_producer(mut self, producer: Arc<dyn ProducerClient>) -> Self {
        self.producer = Some(producer);
        self
    }

    /// Builder: set a per-record retry delay.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_retry_delay_provider(mut self, provider: RetryDelayProvider) -> RuntimeResult<Self> {
        self.wm = Arc::new(WorkManager::new(self.config.clone(), 0)?.with_retry_delay_provider(provider));
        Ok(self)
    }

    /// A handle for pausing and closing the controller.
    #[must_use]
    pub fn handle(&self) -> ControllerHandle {
        ControllerHandle {
            signal: Arc::clone(&self.signal),
            state: Arc::clone(&self.state),
            wm: Arc::clone(&self.wm),
            consumer: Arc::clone(&self.consumer),
        }
    }

    /// A producer handle for user functions, if a producer is set.
    #[must_use]
    pub fn producer_handle(&self) -> Option<ProducerHandle> {
        self.producer.as_ref().map(|producer| {
            ProducerHandle::new(
                Arc::clone(producer),
                self.lock.clone(),
                self.config.produce_lock_timeout,
            )
        })
    }

    /// The work manager.
    #[must_use]
    pub const fn work_manager(&self) -> &Arc<WorkManager> {
        &self.wm
    }

    fn state(&self) -> RunState {
        *self.state.lock()
    }

    fn transition(&self, to: RunState) -> RuntimeResult<()> {
        let mut state = self.state.lock();
        let from = *state;
        if !from.can_transition_to(to) {
            return Err(RuntimeError::InvalidTransition { from, to });
        }
        *state = to;
        info!(%from, %to, "Controller state changed");
        Ok(())
    }

    fn now_us(&self) -> u64 {
        elapsed_us(self.base)
    }

    /// Runs `user_fn` over every polled record until closed.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker fails, if committed metadata can not be
    /// restored, if a transactional commit fails, or if the produce lock times
    /// out. An open transaction is aborted before the error is returned.
    pub async fn run<F, Fut, E>(self, user_fn: F) -> RuntimeResult<RunSummary>
    where
        F: Fn(PolledRecord) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let committer = OffsetCommitter::new(
            &self.config,
            Arc::clone(&self.wm),
            Arc::clone(&self.consumer),
            self.producer.clone(),
            self.lock.clone(),
        )?;
        self.transition(RunState::Running)?;

        let mut workers = JoinSet::new();
        let mut summary = RunSummary::default();
        let result = self
            .control_loop(Arc::new(user_fn), &committer, &mut workers, &mut summary)
            .await;

        match result {
            Ok(()) => {
                let committed = committer.commit_final().await?;
                if committed > 0 {
                    summary.commits += 1;
                }
                summary.encoding_failures = committer.encoding_failures();
                self.transition(RunState::Closed)?;
                info!(
                    succeeded = summary.succeeded,
                    failed = summary.failed,
                    stale = summary.stale,
                    commits = summary.commits,
                    encoding_failures = summary.encoding_failures,
                    "Controller closed"
                );
                Ok(summary)
            }
            Err(e) => {
                error!(error = %e, "Control loop failed, closing");
                workers.shutdown().await;
                committer.abort().await;
                *self.state.lock() = RunState::Closed;
                Err(e)
            }
        }
    }

    async fn control_loop<F, Fut, E>(
        &self,
        user_fn: Arc<F>,
        committer: &OffsetCommitter,
        workers: &mut JoinSet<()>,
        summary: &mut RunSummary,
    ) -> RuntimeResult<()>
    where
        F: Fn(PolledRecord) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        committer.start().await?;
        let (tx, mut rx) = mpsc::unbounded_channel::<ResultOutcome>();
        let mut signals = self.signal.subscribe();
        let mut commit_limiter = RateLimiter::new(duration_us(self.config.commit_interval));
        let mut paused = BTreeSet::new();

        loop {
            let signal = *signals.borrow_and_update();
            self.apply_signal(signal)?;
            let state = self.state();

            let mut polled = 0;
            if matches!(state, RunState::Running | RunState::Paused | RunState::Draining) {
                self.update_paused_partitions(&mut paused, state);
                let batch = self.consumer.poll(Duration::ZERO).await?;
                polled = batch.record_count();
                summary.registered += self.handle_batch(batch, committer, summary).await?;
                // Newly assigned partitions start unpaused.
                self.update_paused_partitions(&mut paused, state);
            }

            let mut dispatched = 0;
            if state != RunState::Closing {
                let now = self.now_us();
                let out = self.wm.number_records_out_for_processing();
                let capacity = u64::from(self.config.max_concurrency).saturating_sub(out);
                let work = self
                    .wm
                    .get_work(usize::try_from(capacity).unwrap_or(usize::MAX), now);
                dispatched = work.len();
                for wc in work {
                    self.spawn_worker(workers, &user_fn, &tx, wc);
                }
            }
            while let Ok(outcome) = rx.try_recv() {
                tally(outcome, summary);
            }

            if self.is_finished(state, dispatched) {
                if state == RunState::Draining {
                    self.transition(RunState::Closing)?;
                    continue;
                }
                // Nothing is out, so every worker is past handle_result.
                while let Some(joined) = workers.join_next().await {
                    if let Err(e) = joined {
                        error!(error = %e, "Worker task ended abnormally");
                    }
                }
                while let Ok(outcome) = rx.try_recv() {
                    tally(outcome, summary);
                }
                return Ok(());
            }

            let now = self.now_us();
            if self.wm.is_dirty() && commit_limiter.perform_if_ready(now, || ()).is_some() {
                self.commit(committer, summary).await?;
            }
            if polled > 0 {
                self.wm.step_load_factor(now);
            }

            let wait = self.next_wait(&commit_limiter, now);
            tokio::select! {
                Some(outcome) = rx.recv() => tally(outcome, summary),
                Some(joined) = workers.join_next(), if !workers.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Worker task ended abnormally");
                    }
                }
                _ = signals.changed() => {}
                () = tokio::time::sleep(wait) => {}
            }
        }
    }

    fn apply_signal(&self, signal: ControlSignal) -> RuntimeResult<()> {
        let current = self.state();
        match (signal.close, current) {
            (Some(DrainMode::Drain), RunState::Running | RunState::Paused) => {
                self.transition(RunState::Draining)
            }
            (
                Some(DrainMode::DontDrain),
                RunState::Running | RunState::Paused | RunState::Draining,
            ) => self.transition(RunState::Closing),
            (None, RunState::Running) if signal.paused => self.transition(RunState::Paused),
            (None, RunState::Paused) if !signal.paused => self.transition(RunState::Running),
            _ => Ok(()),
        }
    }

    async fn handle_batch(
        &self,
        batch: PolledBatch,
        committer: &OffsetCommitter,
        summary: &mut RunSummary,
    ) -> RuntimeResult<u64> {
        for event in batch.events {
            match event {
                RebalanceEvent::Assigned(assigned) => {
                    self.wm.on_partitions_assigned(&assigned)?;
                    info!(count = assigned.len(), "Partitions assigned");
                }
                RebalanceEvent::Revoked(tps) => {
                    // Last chance to commit what these partitions completed.
                    self.commit(committer, summary).await?;
                    self.wm.on_partitions_revoked(&tps);
                    info!(count = tps.len(), "Partitions revoked");
                }
                RebalanceEvent::Lost(tps) => {
                    self.wm.on_partitions_lost(&tps);
                    warn!(count = tps.len(), "Partitions lost");
                }
            }
        }

        let mut registered = 0;
        for (tp, records) in batch.records {
            let epoch = self.wm.epoch_of(&tp);
            registered += self.wm.register_work(EpochAndRecords { tp, epoch, records }) as u64;
        }
        Ok(registered)
    }

    fn update_paused_partitions(&self, paused: &mut BTreeSet<TopicPartition>, state: RunState) {
        let assigned: BTreeSet<TopicPartition> =
            self.wm.partitions().assigned_partitions().into_iter().collect();
        // The broker forgets pauses of partitions it took away.
        paused.retain(|tp| assigned.contains(tp));

        let pause_all = !state.is_fetching() || self.wm.should_throttle();
        let mut to_pause = Vec::new();
        let mut to_resume = Vec::new();
        for tp in assigned {
            let want_paused = pause_all || !self.wm.is_allowed_more_records(&tp);
            if want_paused && !paused.contains(&tp) {
                to_pause.push(tp);
            } else if !want_paused && paused.contains(&tp) {
                to_resume.push(tp);
            }
        }
        if !to_pause.is_empty() {
            debug!(count = to_pause.len(), "Pausing partitions");
            self.consumer.pause(&to_pause);
            paused.extend(to_pause);
        }
        if !to_resume.is_empty() {
            debug!(count = to_resume.len(), "Resuming partitions");
            self.consumer.resume(&to_resume);
            for tp in &to_resume {
                paused.remove(tp);
            }
        }
    }

    fn spawn_worker<F, Fut, E>(
        &self,
        workers: &mut JoinSet<()>,
        user_fn: &Arc<F>,
        tx: &mpsc::UnboundedSender<ResultOutcome>,
        mut wc: WorkContainer,
    ) where
        F: Fn(PolledRecord) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let user_fn = Arc::clone(user_fn);
        let tx = tx.clone();
        let wm = Arc::clone(&self.wm);
        let base = self.base;
        workers.spawn(async move {
            let held = HeldGuards::new();
            let call = (*user_fn)(wc.record().clone());
            let outcome = held.scope(AssertUnwindSafe(call).catch_unwind()).await;
            let now = elapsed_us(base);
            match outcome {
                Ok(Ok(())) => wc.on_user_function_success(now),
                Ok(Err(e)) => {
                    warn!(work = %wc, error = %e, "User function failed");
                    wc.on_user_function_failure(now);
                }
                Err(_) => {
                    error!(work = %wc, "User function panicked");
                    wc.on_user_function_failure(now);
                }
            }
            let result = wm.handle_result(wc);
            held.release();
            // The receiver only goes away once the loop has exited.
            let _ = tx.send(result);
        });
    }

    async fn commit(&self, committer: &OffsetCommitter, summary: &mut RunSummary) -> RuntimeResult<()> {
        match committer.retrieve_offsets_and_commit().await {
            Ok(0) => Ok(()),
            Ok(_) => {
                summary.commits += 1;
                Ok(())
            }
            Err(e) if e.is_retriable() && !committer.mode().is_transactional() => {
                let admitted = self.commit_warnings.lock().admit(self.now_us());
                if let Some(suppressed) = admitted {
                    warn!(error = %e, suppressed, "Offset commit failed, retrying next interval");
                }
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn is_finished(&self, state: RunState, dispatched: usize) -> bool {
        if self.wm.number_records_out_for_processing() > 0 {
            return false;
        }
        match state {
            RunState::Closing => true,
            RunState::Draining => {
                let queued = self.wm.number_of_queued_work();
                // Whatever is left can never be taken: exhausted or vetoed.
                let stuck = dispatched == 0
                    && self.wm.lowest_retry_time(self.now_us()).is_none()
                    && !self.wm.is_dirty();
                queued == 0 || stuck
            }
            _ => false,
        }
    }

    fn next_wait(&self, commit_limiter: &RateLimiter, now: u64) -> Duration {
        let mut wait = MAX_IDLE_WAIT;
        if let Some(retry) = self.wm.lowest_retry_time(now) {
            wait = wait.min(retry);
        }
        if self.wm.is_dirty() {
            let elapsed = commit_limiter.elapsed_us(now).unwrap_or(u64::MAX);
            let remaining = commit_limiter.interval_us().saturating_sub(elapsed);
            wait = wait.min(Duration::from_micros(remaining));
        }
        wait.max(MIN_WAIT)
    }
}
