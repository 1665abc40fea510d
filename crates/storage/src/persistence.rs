//! The persistence seam: an append-only, height-indexed store of block
//! pairs. Implementations are synchronous blocking I/O; the service calls
//! them from its commit path, which is already serialized.

use concord_types::{BlockHeight, BlockPair};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store codec version {found} is not supported")]
    CodecVersionMismatch { found: u16 },
    #[error("store header is malformed")]
    BadHeader,
    #[error("record at height {0} failed its integrity check")]
    CorruptRecord(BlockHeight),
    #[error("record decode failed: {0}")]
    Decode(String),
    #[error("append at height {actual} would break contiguity at tip {tip}")]
    NonContiguousAppend { tip: BlockHeight, actual: BlockHeight },
}

/// Append-only block store indexed by height.
pub trait BlockPersistence: Send + Sync {
    /// Append the next block. The pair's height must be exactly
    /// `tip_height() + 1`; anything else is a caller bug surfaced as
    /// [`PersistenceError::NonContiguousAppend`].
    fn append_block(&self, pair: &BlockPair) -> Result<(), PersistenceError>;

    /// The block at `height`, or `None` past the tip. Height 0 is always
    /// `None`; genesis has no stored block.
    fn block_at(&self, height: BlockHeight) -> Result<Option<BlockPair>, PersistenceError>;

    /// Up to `max` consecutive blocks starting at `first`.
    fn blocks_in_range(
        &self,
        first: BlockHeight,
        max: usize,
    ) -> Result<Vec<BlockPair>, PersistenceError>;

    /// Height of the last stored block; 0 when empty.
    fn tip_height(&self) -> Result<BlockHeight, PersistenceError>;

    fn last_block(&self) -> Result<Option<BlockPair>, PersistenceError> {
        let tip = self.tip_height()?;
        if tip.is_genesis() {
            return Ok(None);
        }
        self.block_at(tip)
    }
}
