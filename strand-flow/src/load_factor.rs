//! Dynamic load factor.
//!
//! The engine asks the broker for `target_concurrency × load_factor` queued
//! records. Before the real processing latency is known a high factor
//! over-fetches, so the factor starts low and steps up once the pipeline has
//! warmed up, at most once per cool-down, until it reaches its ceiling.
//!
//! ```text
//!   WarmingUp ──(warmup elapsed)──▶ Stepping ──(factor == max)──▶ Steady
//!                                    │    ▲
//!                                    └────┘ one step per cool-down
//! ```

use tracing::debug;

use crate::error::{FlowError, FlowResult};

/// Configuration for the load factor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadFactorConfig {
    /// Starting factor.
    pub initial: u32,
    /// Increment per step.
    pub step: u32,
    /// Ceiling.
    pub max: u32,
    /// Time after creation before the first step (microseconds).
    pub warmup_us: u64,
    /// Minimum time between steps (microseconds).
    pub cooldown_us: u64,
}

impl LoadFactorConfig {
    /// Creates a configuration.
    #[must_use]
    pub const fn new(initial: u32, step: u32, max: u32) -> Self {
        Self {
            initial,
            step,
            max,
            warmup_us: 2_000_000,
            cooldown_us: 2_000_000,
        }
    }

    /// Sets the warm-up period.
    #[must_use]
    pub const fn with_warmup_us(mut self, warmup_us: u64) -> Self {
        self.warmup_us = warmup_us;
        self
    }

    /// Sets the cool-down period.
    #[must_use]
    pub const fn with_cooldown_us(mut self, cooldown_us: u64) -> Self {
        self.cooldown_us = cooldown_us;
        self
    }

    /// Creates a configuration for testing.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self {
            initial: 2,
            step: 1,
            max: 5,
            warmup_us: 1_000,
            cooldown_us: 1_000,
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns an error if the initial factor is zero or above the ceiling,
    /// or the step is zero.
    pub fn validate(&self) -> FlowResult<()> {
        if self.initial == 0 || self.initial > self.max {
            return Err(FlowError::InvalidConfig {
                message: format!(
                    "initial load factor {} must be in 1..={}",
                    self.initial, self.max
                ),
            });
        }
        if self.step == 0 {
            return Err(FlowError::InvalidConfig {
                message: "load factor step must be positive".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for LoadFactorConfig {
    fn default() -> Self {
        Self::new(2, 1, 100)
    }
}

/// Phase of the load factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadFactorState {
    /// Too early to step.
    WarmingUp,
    /// May step once per cool-down.
    Stepping,
    /// At the ceiling.
    Steady,
}

/// A load factor that steps up over time.
#[derive(Debug)]
pub struct DynamicLoadFactor {
    config: LoadFactorConfig,
    current: u32,
    state: LoadFactorState,
    started_at_us: u64,
    last_step_us: Option<u64>,
}

impl DynamicLoadFactor {
    /// Creates a load factor that starts warming up at `current_time_us`.
    #[must_use]
    pub fn new(config: LoadFactorConfig, current_time_us: u64) -> Self {
        let current = config.initial.min(config.max);
        let state = if current >= config.max {
            LoadFactorState::Steady
        } else {
            LoadFactorState::WarmingUp
        };
        Self {
            config,
            current,
            state,
            started_at_us: current_time_us,
            last_step_us: None,
        }
    }

    /// Current factor.
    #[must_use]
    pub const fn current(&self) -> u32 {
        self.current
    }

    /// Current phase, as of the last call that observed time.
    #[must_use]
    pub const fn state(&self) -> LoadFactorState {
        self.state
    }

    /// Returns true once the ceiling is reached.
    #[must_use]
    pub const fn is_max_reached(&self) -> bool {
        self.current >= self.config.max
    }

    /// Pure check: may the factor step at `current_time_us`?
    #[must_use]
    pub const fn should_step(&self, current_time_us: u64) -> bool {
        if self.is_max_reached() {
            return false;
        }
        let warmed_up =
            current_time_us.saturating_sub(self.started_at_us) >= self.config.warmup_us;
        let cooled_down = match self.last_step_us {
            Some(last) => current_time_us.saturating_sub(last) >= self.config.cooldown_us,
            None => true,
        };
        warmed_up && cooled_down
    }

    /// Steps the factor if allowed. Returns true if it stepped.
    pub fn try_step(&mut self, current_time_us: u64) -> bool {
        if !self.should_step(current_time_us) {
            if self.state == LoadFactorState::WarmingUp
                && current_time_us.saturating_sub(self.started_at_us) >= self.config.warmup_us
            {
                self.state = LoadFactorState::Stepping;
            }
            return false;
        }

        let previous = self.current;
        self.current = self.current.saturating_add(self.config.step).min(self.config.max);
        self.last_step_us = Some(current_time_us);
        self.state = if self.is_max_reached() {
            LoadFactorState::Steady
        } else {
            LoadFactorState::Stepping
        };
        debug!(from = previous, to = self.current, "Stepped up load factor");
        true
    }
}
