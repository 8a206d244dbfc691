//! Runtime error types.

use std::time::Duration;

use strand_state::StateError;
use thiserror::Error;

use crate::state::RunState;

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Errors that can occur while running the control loop.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The consumer client failed.
    #[error("consumer {operation} failed: {message}")]
    Broker {
        /// Operation that failed.
        operation: &'static str,
        /// Error message.
        message: String,
    },

    /// The producer client failed.
    #[error("producer {operation} failed: {message}")]
    Producer {
        /// Operation that failed.
        operation: &'static str,
        /// Error message.
        message: String,
    },

    /// The produce lock could not be acquired in time.
    #[error("timed out acquiring produce lock after {waited:?}")]
    ProduceLockTimeout {
        /// How long the caller waited.
        waited: Duration,
    },

    /// An offset commit did not complete in time.
    #[error("offset commit timed out after {waited:?}")]
    CommitTimeout {
        /// How long the commit was given.
        waited: Duration,
    },

    /// Work tracking rejected an operation.
    #[error("work tracking failed: {source}")]
    State {
        /// The underlying error.
        #[from]
        source: StateError,
    },

    /// A lifecycle transition is not allowed.
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition {
        /// Current state.
        from: RunState,
        /// Requested state.
        to: RunState,
    },

    /// Transactional commits were configured without a producer.
    #[error("transactional commit mode requires a producer")]
    MissingProducer,

    /// The controller is closed.
    #[error("controller is closed")]
    Closed,
}

impl RuntimeError {
    /// Shorthand for a consumer failure.
    #[must_use]
    pub fn broker(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Broker {
            operation,
            message: message.into(),
        }
    }

    /// Shorthand for a producer failure.
    #[must_use]
    pub fn producer(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Producer {
            operation,
            message: message.into(),
        }
    }

    /// Returns true if a consumer offset commit that failed this way can be
    /// retried at the next interval.
    ///
    /// A produce lock timeout is never retriable. It fails the poll or commit
    /// cycle that hit it.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::Broker { .. } | Self::CommitTimeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RuntimeError::broker("poll", "connection reset");
        assert_eq!(err.to_string(), "consumer poll failed: connection reset");

        let err = RuntimeError::InvalidTransition {
            from: RunState::Closed,
            to: RunState::Running,
        };
        assert_eq!(err.to_string(), "invalid state transition: closed -> running");
    }

    #[test]
    fn test_retriable() {
        assert!(RuntimeError::CommitTimeout {
            waited: Duration::from_millis(5)
        }
        .is_retriable());
        assert!(RuntimeError::broker("commit_async", "rebalancing").is_retriable());

        assert!(!RuntimeError::ProduceLockTimeout {
            waited: Duration::from_millis(5)
        }
        .is_retriable());
        assert!(!RuntimeError::producer("send", "fenced").is_retriable());
        assert!(!RuntimeError::Closed.is_retriable());
    }

    #[test]
    fn test_from_state_error() {
        let err: RuntimeError = StateError::TooManyPartitions { count: 3, max: 2 }.into();
        assert!(matches!(err, RuntimeError::State { .. }));
    }
}
