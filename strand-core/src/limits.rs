//! Hard bounds that configuration is validated against.
//!
//! Following TigerStyle: put limits on everything. Tunables live in
//! [`crate::EngineConfig`]; these are the ceilings a tunable may not cross.

/// System-wide limits for strand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Maximum target concurrency.
    pub max_concurrency: u32,
    /// Maximum bytes of commit metadata per partition.
    pub max_metadata_bytes: u32,
    /// Maximum retry delay in microseconds.
    pub max_retry_delay_us: u64,
    /// Maximum load factor ceiling.
    pub max_load_factor: u32,
    /// Maximum number of partitions tracked at once.
    pub max_partitions: u32,
}

impl Limits {
    /// Creates limits with safe defaults.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            // 100k workers is well past any sane thread or task pool.
            max_concurrency: 100_000,
            // Brokers reject commit metadata beyond a few KB; 1MB is a hard stop.
            max_metadata_bytes: 1024 * 1024,
            // One hour.
            max_retry_delay_us: 60 * 60 * 1_000_000,
            max_load_factor: 1_000,
            max_partitions: 100_000,
        }
    }

    /// Validates that all limits are internally consistent.
    ///
    /// # Errors
    /// Returns an error if any limit is zero.
    pub const fn validate(&self) -> crate::Result<()> {
        if self.max_concurrency == 0 {
            return Err(crate::Error::InvalidArgument {
                name: "max_concurrency",
                reason: "must be positive",
            });
        }
        if self.max_metadata_bytes == 0 {
            return Err(crate::Error::InvalidArgument {
                name: "max_metadata_bytes",
                reason: "must be positive",
            });
        }
        if self.max_load_factor == 0 {
            return Err(crate::Error::InvalidArgument {
                name: "max_load_factor",
                reason: "must be positive",
            });
        }
        if self.max_partitions == 0 {
            return Err(crate::Error::InvalidArgument {
                name: "max_partitions",
                reason: "must be positive",
            });
        }
        Ok(())
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self::new()
    }
}
