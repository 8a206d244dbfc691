//! The strategy interface shared by every offset encoder.

use bytes::Bytes;

use crate::encoding::OffsetEncoding;
use crate::error::NotViable;

/// One binary strategy for writing the complete/incomplete sequence of a
/// range of offsets.
///
/// Offsets are fed in ascending relative order, each exactly once, through
/// either [`encode_incomplete`](Self::encode_incomplete) or
/// [`encode_complete`](Self::encode_complete). Any call may report that the
/// strategy cannot represent the input; the caller then discards the encoder.
pub trait OffsetEncoder: Send {
    /// The uncompressed encoding this strategy produces.
    fn encoding(&self) -> OffsetEncoding;

    /// Records that `relative_offset` is still incomplete.
    ///
    /// # Errors
    /// Returns `NotViable` if the strategy cannot represent the input.
    fn encode_incomplete(&mut self, relative_offset: u64) -> Result<(), NotViable>;

    /// Records that `relative_offset` is complete.
    ///
    /// # Errors
    /// Returns `NotViable` if the strategy cannot represent the input.
    fn encode_complete(&mut self, relative_offset: u64) -> Result<(), NotViable>;

    /// Finishes encoding and returns the payload, without magic byte.
    ///
    /// # Errors
    /// Returns `NotViable` if the final payload cannot be represented.
    fn serialise(&mut self) -> Result<Bytes, NotViable>;

    /// Size of the serialised payload, once [`serialise`](Self::serialise) succeeded.
    fn encoded_size(&self) -> Option<usize>;
}
