//! Strand Flow - pacing utilities for the processing engine.
//!
//! # Components
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  DynamicLoadFactor      how far ahead of concurrency to   │
//! │                         queue polled records              │
//! │                                                           │
//! │  RateLimiter            how often periodic work (commits) │
//! │                         may run                           │
//! │                                                           │
//! │  LoopingResumingIterator  fair round-robin over shards    │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Every time-dependent operation takes `current_time_us` from the caller,
//! so simulations and tests control the clock.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod error;
pub mod load_factor;
pub mod looping;
pub mod rate_limiter;

pub use error::{FlowError, FlowResult};
pub use load_factor::{DynamicLoadFactor, LoadFactorConfig, LoadFactorState};
pub use looping::LoopingResumingIterator;
pub use rate_limiter::{RateLimiter, ThrottledLog};
