//! Strand Core - identifiers, records, and configuration shared by every strand crate.
//!
//! Strand processes records pulled from a partitioned log concurrently while
//! keeping per-key or per-partition ordering, and tracks out-of-order completion
//! precisely enough to commit a safe low-watermark back to the broker.
//!
//! This crate holds only plain data: no I/O, no clocks, no locks.
//!
//! # Design Principles (TigerStyle)
//!
//! - **Strongly-typed IDs**: an `Epoch` is never confused with a `PartitionId`
//! - **Explicit limits**: configuration is validated against hard bounds
//! - **Explicit time**: callers pass `current_time_us`, nothing reads a clock here

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod config;
mod error;
mod limits;
mod record;
mod types;

pub use config::{
    CommitMode, EngineConfig, InvalidMetadataPolicy, ProcessingOrder, DEFAULT_MAX_METADATA_SIZE,
};
pub use error::{Error, Result};
pub use limits::Limits;
pub use record::{Offset, PolledRecord, TopicPartition};
pub use types::{Epoch, PartitionId};
