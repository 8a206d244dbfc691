//! Strand Runtime - the async control loop and its broker seams.
//!
//! Connects work tracking to a broker: polls records, runs a user function
//! per record with bounded concurrency, and commits progress in one of
//! three commit modes.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                          Controller                            │
//! │   RunState machine, poll loop, JoinSet workers, mpsc results   │
//! │        │                    │                     │            │
//! │        ▼                    ▼                     ▼            │
//! │  ConsumerClient       WorkManager          OffsetCommitter     │
//! │  (poll, pause,        (strand-state)       sync | async |      │
//! │   commit)                                  transactional       │
//! │                                                   │            │
//! │                            ProducerClient ◀── ProduceLock      │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`simulated::SimulatedBroker`] implements both client traits in memory
//! for tests and the `strand-bench` binary.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod broker;
pub mod committer;
pub mod controller;
pub mod error;
pub mod produce_lock;
pub mod simulated;
pub mod state;

pub use broker::{
    commit_offsets, CommitOffsets, ConsumerClient, GroupMetadata, OffsetAndMetadata, PolledBatch,
    ProducerClient, ProducerRecord, RebalanceEvent,
};
pub use committer::OffsetCommitter;
pub use controller::{Controller, ControllerHandle, RunSummary};
pub use error::{RuntimeError, RuntimeResult};
pub use produce_lock::{CommitGuard, HeldGuards, ProduceGuard, ProduceLock, ProducerHandle};
pub use simulated::{BrokerFaultConfig, CommitKind, CommitRecord, SimulatedBroker};
pub use state::{DrainMode, RunState};
