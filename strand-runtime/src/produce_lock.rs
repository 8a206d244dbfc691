//! Produce lock for transactional commits.
//!
//! In transactional mode, records produced by user functions and the
//! consumer offsets they complete must land in the same transaction. The
//! committer therefore needs a moment where no send is in flight: it takes
//! the lock exclusively, while sends share it.
//!
//! ```text
//!   send ──┐                         ┌── send (waits)
//!   send ──┼── shared ──▶ released ──▶ commit (exclusive) ──▶ released
//!   send ──┘                         └── send (waits)
//! ```
//!
//! The lock is fair: once the committer is waiting, new sends queue behind
//! it, so a steady stream of sends can not starve a commit.
//!
//! A send's guard must outlive the send itself. Until the record's result
//! is folded into work tracking, its offset is not part of any commit, so a
//! commit taken in between would carry the output without the offset. A
//! worker therefore runs the user function inside [`HeldGuards::scope`]:
//! sends made there park their guard in the scope, and the worker releases
//! them only after the result is handled.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use strand_core::Offset;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::trace;

use crate::broker::{ProducerClient, ProducerRecord};
use crate::error::{RuntimeError, RuntimeResult};

/// Shared guard held while a record is sent.
#[derive(Debug)]
pub struct ProduceGuard {
    _guard: OwnedRwLockReadGuard<()>,
}

/// Exclusive guard held while offsets are committed.
#[derive(Debug)]
pub struct CommitGuard {
    _guard: OwnedRwLockWriteGuard<()>,
}

tokio::task_local! {
    static HELD: HeldGuards;
}

/// Produce guards taken on behalf of one record.
#[derive(Debug, Clone, Default)]
pub struct HeldGuards {
    guards: Arc<Mutex<Vec<ProduceGuard>>>,
}

impl HeldGuards {
    /// Creates an empty holder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `fut` so that sends inside it park their guards here.
    pub async fn scope<F: Future>(&self, fut: F) -> F::Output {
        HELD.scope(self.clone(), fut).await
    }

    /// Number of guards parked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.guards.lock().len()
    }

    /// Returns true if no guard is parked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.guards.lock().is_empty()
    }

    /// Drops every parked guard, letting a waiting commit proceed.
    pub fn release(&self) {
        let released = std::mem::take(&mut *self.guards.lock());
        if !released.is_empty() {
            trace!(guards = released.len(), "Released produce guards");
        }
    }

    fn keep(&self, guard: ProduceGuard) {
        self.guards.lock().push(guard);
    }
}

/// Reader-writer lock between producers and the committer.
#[derive(Debug, Clone, Default)]
pub struct ProduceLock {
    lock: Arc<RwLock<()>>,
}

impl ProduceLock {
    /// Creates an unlocked lock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires a shared guard for sending.
    ///
    /// # Errors
    ///
    /// Returns `ProduceLockTimeout` if a commit holds the lock past `timeout`.
    pub async fn acquire_produce(&self, timeout: Duration) -> RuntimeResult<ProduceGuard> {
        let guard = tokio::time::timeout(timeout, Arc::clone(&self.lock).read_owned())
            .await
            .map_err(|_| RuntimeError::ProduceLockTimeout { waited: timeout })?;
        Ok(ProduceGuard { _guard: guard })
    }

    /// Acquires the exclusive guard for committing.
    ///
    /// # Errors
    ///
    /// Returns `ProduceLockTimeout` if sends hold the lock past `timeout`.
    pub async fn acquire_commit(&self, timeout: Duration) -> RuntimeResult<CommitGuard> {
        let guard = tokio::time::timeout(timeout, Arc::clone(&self.lock).write_owned())
            .await
            .map_err(|_| RuntimeError::ProduceLockTimeout { waited: timeout })?;
        trace!("Acquired commit lock");
        Ok(CommitGuard { _guard: guard })
    }
}

/// A producer that sends under the produce lock.
///
/// Cloned into user functions so that their sends are fenced against
/// transactional commits.
#[derive(Clone)]
pub struct ProducerHandle {
    producer: Arc<dyn ProducerClient>,
    lock: ProduceLock,
    timeout: Duration,
}

impl std::fmt::Debug for ProducerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerHandle")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ProducerHandle {
    /// Creates a handle.
    #[must_use]
    pub fn new(producer: Arc<dyn ProducerClient>, lock: ProduceLock, timeout: Duration) -> Self {
        Self {
            producer,
            lock,
            timeout,
        }
    }

    /// Sends a record inside the current transaction.
    ///
    /// Inside a [`HeldGuards::scope`] the guard is parked in the scope and
    /// later sends for the same record reuse it. Outside one, the guard is
    /// dropped once the send returns.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock times out or the send fails.
    pub async fn send(&self, record: ProducerRecord) -> RuntimeResult<Offset> {
        if let Ok(held) = HELD.try_with(HeldGuards::clone) {
            // A second shared acquire could queue behind a waiting commit
            // that is itself waiting for the guard already held.
            if held.is_empty() {
                held.keep(self.lock.acquire_produce(self.timeout).await?);
            }
            return self.producer.send(record).await;
        }
        let _guard = self.lock.acquire_produce(self.timeout).await?;
        self.producer.send(record).await
    }
}
