//! Interval rate limiter.
//!
//! Gates periodic actions such as offset commits. The first call always
//! fires; after that an action fires only once the interval has fully
//! elapsed since the previous firing.
//!
//! [`ThrottledLog`] builds on it for warnings that can repeat every loop
//! iteration: one line per interval, carrying how many were held back.

/// Fires an action at most once per interval.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    interval_us: u64,
    last_fired_us: Option<u64>,
}

impl RateLimiter {
    /// Creates a limiter with the given interval.
    #[must_use]
    pub const fn new(interval_us: u64) -> Self {
        Self {
            interval_us,
            last_fired_us: None,
        }
    }

    /// Interval in microseconds.
    #[must_use]
    pub const fn interval_us(&self) -> u64 {
        self.interval_us
    }

    /// Returns true if an action may fire at `current_time_us`.
    #[must_use]
    pub const fn is_ready(&self, current_time_us: u64) -> bool {
        match self.last_fired_us {
            None => true,
            Some(last) => current_time_us.saturating_sub(last) > self.interval_us,
        }
    }

    /// Time since the last firing, or `None` if it never fired.
    #[must_use]
    pub const fn elapsed_us(&self, current_time_us: u64) -> Option<u64> {
        match self.last_fired_us {
            Some(last) => Some(current_time_us.saturating_sub(last)),
            None => None,
        }
    }

    /// Runs `action` if ready and records the firing time.
    pub fn perform_if_ready<R>(
        &mut self,
        current_time_us: u64,
        action: impl FnOnce() -> R,
    ) -> Option<R> {
        if !self.is_ready(current_time_us) {
            return None;
        }
        self.last_fired_us = Some(current_time_us);
        Some(action())
    }

    /// Forgets the last firing so the next call fires immediately.
    pub fn reset(&mut self) {
        self.last_fired_us = None;
    }
}

/// Admits a repeating log line at most once per interval.
#[derive(Debug, Clone)]
pub struct ThrottledLog {
    limiter: RateLimiter,
    suppressed: u64,
}

impl ThrottledLog {
    /// Creates a throttle with the given interval.
    #[must_use]
    pub const fn new(interval_us: u64) -> Self {
        Self {
            limiter: RateLimiter::new(interval_us),
            suppressed: 0,
        }
    }

    /// Records one occurrence at `current_time_us`.
    ///
    /// Returns the number of occurrences suppressed since the last admitted
    /// one if this one should be logged, or `None` if it is suppressed.
    pub fn admit(&mut self, current_time_us: u64) -> Option<u64> {
        let suppressed = self.suppressed;
        if let Some(held_back) = self.limiter.perform_if_ready(current_time_us, || suppressed) {
            self.suppressed = 0;
            Some(held_back)
        } else {
            self.suppressed += 1;
            None
        }
    }

    /// Occurrences suppressed since the last admitted one.
    #[must_use]
    pub const fn suppressed(&self) -> u64 {
        self.suppressed
    }
}
