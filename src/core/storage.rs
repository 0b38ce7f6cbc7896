//! Storage sink for finalized blocks.
//!
//! The persistence format is outside this crate; the trait is the seam a
//! real engine plugs into. The in-memory implementation records appended
//! blocks so tests and the dev node can observe what was produced.

use crate::core::block::Block;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage rejected block at height {height}: {reason}")]
    Rejected { height: u64, reason: String },
}

/// Accepts finalized blocks. Implementations must be shareable across
/// the server's tasks.
pub trait Storage: Send + Sync {
    fn put(&self, block: Block) -> Result<(), StorageError>;
}

/// Keeps blocks in a vector, in append order.
#[derive(Default)]
pub struct MemoryStorage {
    blocks: Mutex<Vec<Block>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blocks.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Storage for MemoryStorage {
    fn put(&self, block: Block) -> Result<(), StorageError> {
        self.blocks.lock().unwrap().push(block);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::block::Header;
    use crate::types::hash::Hash;

    #[test]
    fn put_records_blocks_in_order() {
        let storage = MemoryStorage::new();
        assert!(storage.is_empty());

        for height in 0..3 {
            let block = Block::new(
                Header {
                    version: 1,
                    height,
                    timestamp: 0,
                    previous_block: Hash::zero(),
                    data_hash: Hash::zero(),
                },
                vec![],
            );
            storage.put(block).unwrap();
        }
        assert_eq!(storage.len(), 3);
    }
}
