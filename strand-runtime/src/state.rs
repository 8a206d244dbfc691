//! Controller lifecycle.
//!
//! ```text
//!   Unused ──▶ Running ◀──▶ Paused
//!     │          │            │
//!     │          ├──▶ Draining ◀┘
//!     │          │       │
//!     │          └──▶ Closing ◀─── (Paused)
//!     │                  │
//!     └─────────────▶ Closed
//! ```

use std::fmt;

/// Lifecycle state of a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    /// Created, not started.
    Unused,
    /// Polling and processing.
    Running,
    /// Processing continues but nothing new is fetched.
    Paused,
    /// Finishing queued and in-flight work before closing.
    Draining,
    /// Waiting for in-flight work, then committing for the last time.
    Closing,
    /// Stopped.
    Closed,
}

impl RunState {
    /// Returns true if moving to `next` is allowed.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Unused, Self::Running | Self::Closed)
                | (Self::Running, Self::Paused | Self::Draining | Self::Closing)
                | (Self::Paused, Self::Running | Self::Draining | Self::Closing)
                | (Self::Draining, Self::Closing)
                | (Self::Closing, Self::Closed)
        )
    }

    /// Returns true while new records may be fetched.
    #[must_use]
    pub const fn is_fetching(self) -> bool {
        matches!(self, Self::Running)
    }

    /// Returns true once a close has begun.
    #[must_use]
    pub const fn is_closing(self) -> bool {
        matches!(self, Self::Draining | Self::Closing | Self::Closed)
    }

    /// Lower-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unused => "unused",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Draining => "draining",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How much work to finish when closing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DrainMode {
    /// Process everything already polled before closing.
    #[default]
    Drain,
    /// Only wait for records already handed to workers.
    DontDrain,
}
