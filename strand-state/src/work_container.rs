//! Per-record lifecycle.
//!
//! A `WorkContainer` is owned by exactly one place at a time: its shard while
//! queued, the worker while in flight, and the work manager while its result
//! is routed. Ownership moves by value, so there is never a second writer.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use strand_core::{Epoch, Offset, PolledRecord, TopicPartition};

/// Outcome of the user function for the latest attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkOutcome {
    /// Not yet attempted, or re-queued after a failure.
    #[default]
    Pending,
    /// The user function succeeded.
    Succeeded,
    /// The user function failed.
    Failed,
}

/// A polled record and its processing history.
#[derive(Clone)]
pub struct WorkContainer {
    epoch: Epoch,
    record: PolledRecord,
    failed_attempts: u32,
    last_failed_at_us: Option<u64>,
    retry_due_at_us: Option<u64>,
    succeeded_at_us: Option<u64>,
    outcome: WorkOutcome,
    in_flight: bool,
}

impl WorkContainer {
    /// Creates a container for a record polled under `epoch`.
    #[must_use]
    pub const fn new(epoch: Epoch, record: PolledRecord) -> Self {
        Self {
            epoch,
            record,
            failed_attempts: 0,
            last_failed_at_us: None,
            retry_due_at_us: None,
            succeeded_at_us: None,
            outcome: WorkOutcome::Pending,
            in_flight: false,
        }
    }

    /// Assignment epoch the record was polled under.
    #[must_use]
    pub const fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// The record.
    #[must_use]
    pub const fn record(&self) -> &PolledRecord {
        &self.record
    }

    /// Partition of the record.
    #[must_use]
    pub const fn tp(&self) -> &TopicPartition {
        &self.record.tp
    }

    /// Offset of the record.
    #[must_use]
    pub const fn offset(&self) -> Offset {
        self.record.offset
    }

    /// Key of the record.
    #[must_use]
    pub const fn key(&self) -> Option<&Bytes> {
        self.record.key.as_ref()
    }

    /// Number of failed attempts so far.
    #[must_use]
    pub const fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    /// When the latest failure was recorded.
    #[must_use]
    pub const fn last_failed_at_us(&self) -> Option<u64> {
        self.last_failed_at_us
    }

    /// When the success was recorded.
    #[must_use]
    pub const fn succeeded_at_us(&self) -> Option<u64> {
        self.succeeded_at_us
    }

    /// When the record may next be attempted. `None` if it never failed.
    #[must_use]
    pub const fn retry_due_at_us(&self) -> Option<u64> {
        self.retry_due_at_us
    }

    /// Latest outcome.
    #[must_use]
    pub const fn outcome(&self) -> WorkOutcome {
        self.outcome
    }

    /// Returns true while a worker holds the record.
    #[must_use]
    pub const fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Returns true if the record failed at least once.
    #[must_use]
    pub const fn has_previously_failed(&self) -> bool {
        self.failed_attempts > 0
    }

    /// Time since the latest failure, if any.
    #[must_use]
    pub fn time_since_failure(&self, current_time_us: u64) -> Option<Duration> {
        self.last_failed_at_us
            .map(|at| Duration::from_micros(current_time_us.saturating_sub(at)))
    }

    /// Returns true once the retry delay after the latest failure has passed.
    #[must_use]
    pub const fn is_delay_passed(&self, current_time_us: u64) -> bool {
        match self.retry_due_at_us {
            Some(due) => current_time_us >= due,
            None => true,
        }
    }

    /// Returns true if the record may be handed to a worker now.
    #[must_use]
    pub const fn is_available(&self, current_time_us: u64) -> bool {
        !self.in_flight
            && !matches!(self.outcome, WorkOutcome::Succeeded)
            && self.is_delay_passed(current_time_us)
    }

    /// Marks the record as taken by a worker.
    pub fn on_queued_for_execution(&mut self) {
        // TigerStyle: Assert preconditions.
        debug_assert!(!self.in_flight, "container taken twice");
        self.in_flight = true;
        self.outcome = WorkOutcome::Pending;
    }

    /// Records a successful user function run.
    pub fn on_user_function_success(&mut self, current_time_us: u64) {
        self.succeeded_at_us = Some(current_time_us);
        self.outcome = WorkOutcome::Succeeded;
    }

    /// Records a failed user function run.
    pub fn on_user_function_failure(&mut self, current_time_us: u64) {
        self.failed_attempts = self.failed_attempts.saturating_add(1);
        self.last_failed_at_us = Some(current_time_us);
        self.outcome = WorkOutcome::Failed;
    }

    /// Returns the record to the queue with a retry delay from its latest failure.
    pub(crate) fn requeue_after_failure(&mut self, retry_delay: Duration) {
        let delay_us = u64::try_from(retry_delay.as_micros()).unwrap_or(u64::MAX);
        let failed_at = self.last_failed_at_us.unwrap_or(0);
        self.retry_due_at_us = Some(failed_at.saturating_add(delay_us));
        self.in_flight = false;
    }

    /// Clears the in-flight flag.
    pub(crate) fn end_flight(&mut self) {
        self.in_flight = false;
    }
}

impl fmt::Debug for WorkContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkContainer")
            .field("tp", &self.record.tp)
            .field("offset", &self.record.offset)
            .field("epoch", &self.epoch)
            .field("failed_attempts", &self.failed_attempts)
            .field("outcome", &self.outcome)
            .field("in_flight", &self.in_flight)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for WorkContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.record.tp, self.record.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container() -> WorkContainer {
        WorkContainer::new(
            Epoch::new(1),
            PolledRecord::new(TopicPartition::new("t", 0), 5, "v"),
        )
    }

    #[test]
    fn test_fresh_container_available() {
        let wc = container();
        assert!(wc.is_available(0));
        assert!(!wc.has_previously_failed());
        assert_eq!(wc.outcome(), WorkOutcome::Pending);
        assert_eq!(format!("{wc}"), "t-0@5");
    }

    #[test]
    fn test_in_flight_not_available() {
        let mut wc = container();
        wc.on_queued_for_execution();
        assert!(wc.is_in_flight());
        assert!(!wc.is_available(0));
    }

    #[test]
    fn test_failure_delays_retry() {
        let mut wc = container();
        wc.on_queued_for_execution();
        wc.on_user_function_failure(1_000);
        wc.requeue_after_failure(Duration::from_millis(2));

        assert_eq!(wc.failed_attempts(), 1);
        assert_eq!(wc.retry_due_at_us(), Some(3_000));
        assert!(!wc.is_available(2_999));
        assert!(wc.is_available(3_000));
        assert_eq!(wc.time_since_failure(1_500), Some(Duration::from_micros(500)));
    }

    #[test]
    fn test_succeeded_not_available() {
        let mut wc = container();
        wc.on_queued_for_execution();
        wc.on_user_function_success(10);
        wc.end_flight();
        assert_eq!(wc.succeeded_at_us(), Some(10));
        assert!(!wc.is_available(u64::MAX));
    }
}
