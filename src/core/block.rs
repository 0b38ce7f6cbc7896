//! Minimal block container handed from the validator loop to storage.
//!
//! Consensus rules live outside this crate; the block exists so the
//! server wiring and the storage sink have a concrete type to move.

use crate::core::transaction::Transaction;
use crate::types::encoding::Encode;
use crate::types::hash::{Hash, HashCache};
use blocknet_derive::BinaryCodec;

/// Block metadata and chain linkage.
#[derive(Debug, Clone, PartialEq, BinaryCodec)]
pub struct Header {
    pub version: u32,
    /// Index in the chain; genesis is 0.
    pub height: u64,
    /// Unix timestamp in seconds.
    pub timestamp: u64,
    /// Hash of the parent block header.
    pub previous_block: Hash,
    /// Commitment over the block's transactions.
    pub data_hash: Hash,
}

impl Header {
    fn compute_hash(&self) -> Hash {
        let mut h = Hash::sha3();
        self.encode(&mut h);
        h.finalize()
    }
}

/// A produced block: header plus the transactions drained from the pool.
#[derive(Debug, Clone, PartialEq, BinaryCodec)]
pub struct Block {
    pub header: Header,
    pub transactions: Vec<Transaction>,

    cached_hash: HashCache,
}

impl Block {
    pub fn new(mut header: Header, transactions: Vec<Transaction>) -> Self {
        header.data_hash = Self::data_hash(&transactions);
        Self {
            header,
            transactions,
            cached_hash: HashCache::new(),
        }
    }

    /// Header hash, memoized after the first computation.
    pub fn hash(&self) -> Hash {
        self.cached_hash.get_or_compute(|| self.header.compute_hash())
    }

    /// Commitment over the transaction list.
    pub fn data_hash(transactions: &[Transaction]) -> Hash {
        let mut h = Hash::sha3();
        for tx in transactions {
            tx.hash().encode(&mut h);
        }
        h.finalize()
    }
}
