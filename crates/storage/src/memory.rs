//! In-memory block persistence, used by tests and by nodes that opt out of
//! durability.

use crate::persistence::{BlockPersistence, PersistenceError};
use concord_types::{BlockHeight, BlockPair};
use parking_lot::RwLock;

/// Blocks in a vector, index `i` holding height `i + 1`.
#[derive(Default)]
pub struct InMemoryBlockPersistence {
    blocks: RwLock<Vec<BlockPair>>,
}

impl InMemoryBlockPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlockPersistence for InMemoryBlockPersistence {
    fn append_block(&self, pair: &BlockPair) -> Result<(), PersistenceError> {
        let mut blocks = self.blocks.write();
        let tip = BlockHeight(blocks.len() as u64);
        if pair.height() != tip.next() {
            return Err(PersistenceError::NonContiguousAppend {
                tip,
                actual: pair.height(),
            });
        }
        blocks.push(pair.clone());
        Ok(())
    }

    fn block_at(&self, height: BlockHeight) -> Result<Option<BlockPair>, PersistenceError> {
        if height.is_genesis() {
            return Ok(None);
        }
        Ok(self.blocks.read().get(height.0 as usize - 1).cloned())
    }

    fn blocks_in_range(
        &self,
        first: BlockHeight,
        max: usize,
    ) -> Result<Vec<BlockPair>, PersistenceError> {
        if first.is_genesis() || max == 0 {
            return Ok(Vec::new());
        }
        let blocks = self.blocks.read();
        let start = first.0 as usize - 1;
        if start >= blocks.len() {
            return Ok(Vec::new());
        }
        let end = (start + max).min(blocks.len());
        Ok(blocks[start..end].to_vec())
    }

    fn tip_height(&self) -> Result<BlockHeight, PersistenceError> {
        Ok(BlockHeight(self.blocks.read().len() as u64))
    }
}
