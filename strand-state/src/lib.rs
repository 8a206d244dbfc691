//! Strand State - work tracking for out-of-order processing.
//!
//! Records polled from a broker are processed concurrently and complete in
//! any order. This crate tracks which offsets of each partition are still
//! incomplete, decides which queued records may be handed to workers without
//! breaking the configured ordering, and computes what may be committed.
//!
//! # Components
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         WorkManager                           │
//! │        registration, selection, result routing, load          │
//! │              │                              │                 │
//! │              ▼                              ▼                 │
//! │   PartitionStateManager               ShardManager            │
//! │   epochs, rebalances, commits         shards, retry index     │
//! │              │                              │                 │
//! │              ▼                              ▼                 │
//! │   PartitionState                      ProcessingShard         │
//! │   Active | Removed                    offset-ordered slots    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Concurrency
//!
//! Each partition state and each shard has its own lock, so the poll path
//! and the completion path only contend when they touch the same partition
//! or shard. Work containers move by value and are never shared.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod partition_manager;
pub mod partition_state;
pub mod retry_queue;
pub mod shard;
pub mod shard_key;
pub mod shard_manager;
pub mod work_container;
pub mod work_manager;

pub use error::{StateError, StateResult};
pub use partition_manager::{AssignedPartition, PartitionStateManager};
pub use partition_state::{ActivePartition, CommitData, PartitionState};
pub use retry_queue::RetryQueue;
pub use shard::ProcessingShard;
pub use shard_key::ShardKey;
pub use shard_manager::ShardManager;
pub use work_container::{WorkContainer, WorkOutcome};
pub use work_manager::{EpochAndRecords, ResultOutcome, RetryDelayProvider, WorkManager};
