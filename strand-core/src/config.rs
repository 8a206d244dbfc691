//! Engine configuration.
//!
//! One struct carries every tunable the engine reads. Builders follow the
//! `with_*` convention and `validate` checks the values against [`Limits`].

use std::time::Duration;

use crate::{Error, Limits, Result};

/// How records are grouped for ordered release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProcessingOrder {
    /// No ordering; any queued record of a partition may be in flight.
    Unordered,
    /// Records with the same key are processed one at a time, in offset order.
    #[default]
    Key,
    /// Records of a partition are processed one at a time, in offset order.
    Partition,
}

/// How completed offsets are committed back to the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CommitMode {
    /// Blocking consumer commit.
    PeriodicConsumerSync,
    /// Non-blocking consumer commit.
    #[default]
    PeriodicConsumerAsync,
    /// Offsets are committed as part of a producer transaction.
    PeriodicTransactionalProducer,
}

impl CommitMode {
    /// Returns true if this mode commits through the producer.
    #[must_use]
    pub const fn is_transactional(self) -> bool {
        matches!(self, Self::PeriodicTransactionalProducer)
    }
}

/// What to do with commit metadata that was not written by strand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum InvalidMetadataPolicy {
    /// Fail the restore.
    #[default]
    Fail,
    /// Treat the partition as having nothing incomplete beyond the committed offset.
    Ignore,
}

/// Configuration for the work-tracking engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Ordering guarantee.
    pub ordering: ProcessingOrder,
    /// Target number of records in flight.
    pub max_concurrency: u32,
    /// Commit strategy.
    pub commit_mode: CommitMode,
    /// Delay before a failed record is offered again.
    pub default_retry_delay: Duration,
    /// Failed attempts after which a record is no longer offered.
    pub max_failure_attempts: Option<u32>,
    /// Interval between periodic commits.
    pub commit_interval: Duration,
    /// Maximum encoded metadata length per partition.
    pub max_metadata_size: usize,
    /// Fraction of `max_metadata_size` above which a partition stops taking new work.
    pub metadata_pressure_threshold: f64,
    /// Handling of foreign commit metadata.
    pub invalid_metadata_policy: InvalidMetadataPolicy,
    /// How long the committer waits for in-flight transactional sends.
    pub produce_lock_timeout: Duration,
    /// How long a commit may take before it is reported as failed.
    pub offset_commit_timeout: Duration,
    /// Starting load factor.
    pub load_factor_initial: u32,
    /// Load factor increment per step.
    pub load_factor_step: u32,
    /// Load factor ceiling.
    pub load_factor_max: u32,
    /// Time after start before the load factor may step.
    pub load_factor_warmup: Duration,
    /// Minimum time between load factor steps.
    pub load_factor_cooldown: Duration,
    /// Hard bounds.
    pub limits: Limits,
}

/// Default metadata budget; brokers commonly cap commit metadata at 4KB.
pub const DEFAULT_MAX_METADATA_SIZE: usize = 4096;

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ordering: ProcessingOrder::default(),
            max_concurrency: 16,
            commit_mode: CommitMode::default(),
            default_retry_delay: Duration::from_secs(1),
            max_failure_attempts: None,
            commit_interval: Duration::from_millis(100),
            max_metadata_size: DEFAULT_MAX_METADATA_SIZE,
            metadata_pressure_threshold: 0.75,
            invalid_metadata_policy: InvalidMetadataPolicy::default(),
            produce_lock_timeout: Duration::from_secs(1),
            offset_commit_timeout: Duration::from_secs(10),
            load_factor_initial: 2,
            load_factor_step: 1,
            load_factor_max: 100,
            load_factor_warmup: Duration::from_secs(2),
            load_factor_cooldown: Duration::from_secs(2),
            limits: Limits::new(),
        }
    }
}

impl EngineConfig {
    /// Creates a configuration for testing: short delays, small budgets.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            max_concurrency: 4,
            default_retry_delay: Duration::from_millis(10),
            commit_interval: Duration::from_millis(5),
            produce_lock_timeout: Duration::from_millis(100),
            offset_commit_timeout: Duration::from_millis(500),
            load_factor_warmup: Duration::from_millis(10),
            load_factor_cooldown: Duration::from_millis(10),
            ..Self::default()
        }
    }

    /// Sets the ordering guarantee.
    #[must_use]
    pub const fn with_ordering(mut self, ordering: ProcessingOrder) -> Self {
        self.ordering = ordering;
        self
    }

    /// Sets the target concurrency.
    #[must_use]
    pub const fn with_max_concurrency(mut self, max_concurrency: u32) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// Sets the commit mode.
    #[must_use]
    pub const fn with_commit_mode(mut self, commit_mode: CommitMode) -> Self {
        self.commit_mode = commit_mode;
        self
    }

    /// Sets the default retry delay.
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.default_retry_delay = delay;
        self
    }

    /// Sets the failed-attempt cap.
    #[must_use]
    pub const fn with_max_failure_attempts(mut self, attempts: Option<u32>) -> Self {
        self.max_failure_attempts = attempts;
        self
    }

    /// Sets the commit interval.
    #[must_use]
    pub const fn with_commit_interval(mut self, interval: Duration) -> Self {
        self.commit_interval = interval;
        self
    }

    /// Sets the metadata budget.
    #[must_use]
    pub const fn with_max_metadata_size(mut self, size: usize) -> Self {
        self.max_metadata_size = size;
        self
    }

    /// Sets the policy for foreign commit metadata.
    #[must_use]
    pub const fn with_invalid_metadata_policy(mut self, policy: InvalidMetadataPolicy) -> Self {
        self.invalid_metadata_policy = policy;
        self
    }

    /// Sets the produce lock acquisition timeout.
    #[must_use]
    pub const fn with_produce_lock_timeout(mut self, timeout: Duration) -> Self {
        self.produce_lock_timeout = timeout;
        self
    }

    /// Returns the metadata length above which a partition is under back-pressure.
    #[must_use]
    #[allow(clippy::cast_precision_loss)] // Metadata sizes are a few KB.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn metadata_pressure_bytes(&self) -> usize {
        (self.max_metadata_size as f64 * self.metadata_pressure_threshold) as usize
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns an error if any value is zero where a positive value is needed,
    /// out of range, or above its hard limit.
    pub fn validate(&self) -> Result<()> {
        self.limits.validate()?;

        if self.max_concurrency == 0 {
            return Err(Error::InvalidArgument {
                name: "max_concurrency",
                reason: "must be positive",
            });
        }
        if self.max_concurrency > self.limits.max_concurrency {
            return Err(Error::LimitExceeded {
                limit: "max_concurrency",
                max: u64::from(self.limits.max_concurrency),
                actual: u64::from(self.max_concurrency),
            });
        }
        if self.max_metadata_size == 0 {
            return Err(Error::InvalidArgument {
                name: "max_metadata_size",
                reason: "must be positive",
            });
        }
        if self.max_metadata_size > self.limits.max_metadata_bytes as usize {
            return Err(Error::LimitExceeded {
                limit: "max_metadata_size",
                max: u64::from(self.limits.max_metadata_bytes),
                actual: self.max_metadata_size as u64,
            });
        }
        if !(self.metadata_pressure_threshold > 0.0 && self.metadata_pressure_threshold <= 1.0) {
            return Err(Error::InvalidArgument {
                name: "metadata_pressure_threshold",
                reason: "must be in (0, 1]",
            });
        }
        if self.commit_interval.is_zero() {
            return Err(Error::InvalidArgument {
                name: "commit_interval",
                reason: "must be positive",
            });
        }
        if self.produce_lock_timeout.is_zero() || self.offset_commit_timeout.is_zero() {
            return Err(Error::InvalidArgument {
                name: "timeout",
                reason: "must be positive",
            });
        }
        let retry_us = u64::try_from(self.default_retry_delay.as_micros()).unwrap_or(u64::MAX);
        if retry_us > self.limits.max_retry_delay_us {
            return Err(Error::LimitExceeded {
                limit: "default_retry_delay",
                max: self.limits.max_retry_delay_us,
                actual: retry_us,
            });
        }
        if self.load_factor_initial == 0 || self.load_factor_initial > self.load_factor_max {
            return Err(Error::InvalidArgument {
                name: "load_factor_initial",
                reason: "must be positive and at most load_factor_max",
            });
        }
        if self.load_factor_step == 0 {
            return Err(Error::InvalidArgument {
                name: "load_factor_step",
                reason: "must be positive",
            });
        }
        if self.load_factor_max > self.limits.max_load_factor {
            return Err(Error::LimitExceeded {
                limit: "load_factor_max",
                max: u64::from(self.limits.max_load_factor),
                actual: u64::from(self.load_factor_max),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        assert!(EngineConfig::default().validate().is_ok());
        assert!(EngineConfig::for_testing().validate().is_ok());
    }

    #[test]
    fn test_pressure_bytes() {
        let config = EngineConfig::default();
        assert_eq!(config.metadata_pressure_bytes(), 3072);
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let config = EngineConfig::default().with_max_concurrency(0);
        assert_eq!(
            config.validate(),
            Err(Error::InvalidArgument {
                name: "max_concurrency",
                reason: "must be positive",
            })
        );
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let config = EngineConfig {
            metadata_pressure_threshold: 1.5,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_metadata_above_limit_rejected() {
        let config = EngineConfig::default().with_max_metadata_size(2 * 1024 * 1024);
        assert!(matches!(
            config.validate(),
            Err(Error::LimitExceeded {
                limit: "max_metadata_size",
                ..
            })
        ));
    }

    #[test]
    fn test_zero_load_factor_step_rejected() {
        let config = EngineConfig {
            load_factor_step: 0,
            ..EngineConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(Error::InvalidArgument {
                name: "load_factor_step",
                reason: "must be positive",
            })
        );
    }

    #[test]
    fn test_builders() {
        let config = EngineConfig::default()
            .with_ordering(ProcessingOrder::Partition)
            .with_commit_mode(CommitMode::PeriodicTransactionalProducer)
            .with_invalid_metadata_policy(InvalidMetadataPolicy::Ignore);
        assert_eq!(config.ordering, ProcessingOrder::Partition);
        assert!(config.commit_mode.is_transactional());
        assert_eq!(config.invalid_metadata_policy, InvalidMetadataPolicy::Ignore);
    }
}
