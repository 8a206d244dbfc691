//! Commit metadata codec.
//!
//! Turns a partition's incomplete offsets into the string stored in the
//! broker's commit metadata field, and back. The string is
//! `base64(magic ∥ payload)` and must stay under a size budget; the budget
//! is the reason the multi-strategy encoder exists.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use roaring::RoaringTreemap;
use strand_core::{EngineConfig, InvalidMetadataPolicy, Offset, DEFAULT_MAX_METADATA_SIZE};
use tracing::{debug, warn};

use crate::error::{OffsetError, OffsetResult};
use crate::pair::EncodedOffsetPair;
use crate::simultaneous::OffsetSimultaneousEncoder;
use crate::types::HighestOffsetAndIncompletes;

/// Metadata ready to be committed, plus the back-pressure verdict for the partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitMetadata {
    /// The encoded string, or `None` if it was dropped for size.
    pub metadata: Option<String>,
    /// False when the metadata is close to or over budget; the partition
    /// should stop taking new work until incompletes drain.
    pub allowed_more_records: bool,
}

/// Encodes and decodes offset metadata under a size budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetMapCodec {
    max_metadata_size: usize,
    pressure_bytes: usize,
    policy: InvalidMetadataPolicy,
}

impl Default for OffsetMapCodec {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_METADATA_SIZE,
            DEFAULT_MAX_METADATA_SIZE * 3 / 4,
            InvalidMetadataPolicy::Fail,
        )
    }
}

impl OffsetMapCodec {
    /// Creates a codec.
    #[must_use]
    pub fn new(max_metadata_size: usize, pressure_bytes: usize, policy: InvalidMetadataPolicy) -> Self {
        // TigerStyle: Assert preconditions.
        assert!(max_metadata_size > 0, "metadata budget must be positive");
        assert!(
            pressure_bytes <= max_metadata_size,
            "pressure threshold above budget"
        );
        Self {
            max_metadata_size,
            pressure_bytes,
            policy,
        }
    }

    /// Creates a codec from engine configuration.
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.max_metadata_size,
            config.metadata_pressure_bytes(),
            config.invalid_metadata_policy,
        )
    }

    /// Returns the metadata budget.
    #[must_use]
    pub const fn max_metadata_size(&self) -> usize {
        self.max_metadata_size
    }

    /// Encodes `[base, highest_succeeded]` into a metadata string.
    ///
    /// # Errors
    /// Returns `NoEncodingPossible` if every strategy failed.
    pub fn encode(
        &self,
        base: Offset,
        highest_succeeded: Option<Offset>,
        incompletes: &RoaringTreemap,
    ) -> OffsetResult<String> {
        let encoder = OffsetSimultaneousEncoder::new(base, highest_succeeded, incompletes);
        let wire = encoder.pack_smallest()?;
        Ok(STANDARD.encode(wire))
    }

    /// Encodes metadata and applies the size budget.
    ///
    /// Over the pressure threshold the partition loses permission to take
    /// more records. Over the budget the metadata is dropped entirely and the
    /// commit carries only the offset.
    ///
    /// # Errors
    /// Returns `NoEncodingPossible` if every strategy failed. The caller
    /// should commit the offset alone and stop taking records.
    pub fn encode_for_commit(
        &self,
        base: Offset,
        highest_succeeded: Option<Offset>,
        incompletes: &RoaringTreemap,
    ) -> OffsetResult<CommitMetadata> {
        let metadata = self.encode(base, highest_succeeded, incompletes)?;
        let size = metadata.len();

        if size > self.max_metadata_size {
            warn!(
                size,
                max = self.max_metadata_size,
                base = %base,
                "Offset metadata over budget, committing without it"
            );
            return Ok(CommitMetadata {
                metadata: None,
                allowed_more_records: false,
            });
        }

        let allowed_more_records = size <= self.pressure_bytes;
        if !allowed_more_records {
            debug!(
                size,
                threshold = self.pressure_bytes,
                base = %base,
                "Offset metadata near budget, applying back-pressure"
            );
        }
        Ok(CommitMetadata {
            metadata: Some(metadata),
            allowed_more_records,
        })
    }

    /// Decodes metadata committed alongside offset `committed`.
    ///
    /// Empty metadata means nothing at or above `committed` was seen. Foreign
    /// or unrecognisable metadata is handled per the configured policy.
    /// Corrupt payloads in a recognised encoding always fail.
    ///
    /// # Errors
    /// Returns a decode error for corrupt payloads, or for foreign metadata
    /// under [`InvalidMetadataPolicy::Fail`].
    pub fn decode(&self, committed: Offset, metadata: &str) -> OffsetResult<HighestOffsetAndIncompletes> {
        if metadata.is_empty() {
            return Ok(HighestOffsetAndIncompletes::from_committed(committed));
        }
        let result = STANDARD
            .decode(metadata)
            .map_err(|e| OffsetError::Base64 {
                message: e.to_string(),
            })
            .and_then(|wire| EncodedOffsetPair::from_wire(&wire))
            .and_then(|pair| pair.decode(committed));

        match result {
            Err(
                e @ (OffsetError::Base64 { .. }
                | OffsetError::Empty
                | OffsetError::UnknownMagic { .. }
                | OffsetError::UnsupportedEncoding { .. }),
            ) => match self.policy {
                InvalidMetadataPolicy::Ignore => {
                    warn!(error = %e, committed = %committed, "Ignoring unrecognised offset metadata");
                    Ok(HighestOffsetAndIncompletes::from_committed(committed))
                }
                InvalidMetadataPolicy::Fail => Err(e),
            },
            other => other,
        }
    }
}
