//! Strand Offsets - compact encoding of incomplete offsets for commit metadata.
//!
//! A partition that completes records out of order can only commit its
//! low-watermark. Everything above it that already succeeded would be
//! reprocessed after a restart unless the commit also records which offsets
//! above the watermark are still incomplete. This crate writes that record
//! into the broker's commit metadata string, which is small and bounded.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                      OffsetMapCodec                         │
//! │    base64, size budget, back-pressure, foreign metadata     │
//! │                            │                                │
//! │                            ▼                                │
//! │               OffsetSimultaneousEncoder                     │
//! │        runs every strategy, keeps the smallest payload      │
//! │         │               │                │                  │
//! │         ▼               ▼                ▼                  │
//! │   BitSetEncoder   RunLengthEncoder    gzip wrapper          │
//! │     (v1, v2)         (v1, v2)                               │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! Wire format: `base64(magic ∥ payload)`. The magic byte names the winning
//! strategy so decoding needs no other context than the committed offset.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod bitmap;
pub mod bitset;
pub mod byte_array;
pub mod codec;
pub mod compression;
pub mod encoder;
pub mod encoding;
pub mod error;
pub mod pair;
pub mod run_length;
pub mod simultaneous;
pub mod types;

pub use bitmap::OffsetSet;
pub use bitset::BitSetEncoder;
pub use codec::{CommitMetadata, OffsetMapCodec};
pub use encoder::OffsetEncoder;
pub use encoding::{OffsetEncoding, Version};
pub use error::{NotViable, OffsetError, OffsetResult};
pub use pair::EncodedOffsetPair;
pub use run_length::RunLengthEncoder;
pub use simultaneous::OffsetSimultaneousEncoder;
pub use types::HighestOffsetAndIncompletes;
