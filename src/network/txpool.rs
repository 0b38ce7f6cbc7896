//! Pool of verified transactions awaiting block inclusion.

use crate::core::transaction::Transaction;
use crate::types::hash::Hash;
use dashmap::DashMap;
use std::sync::RwLock;

/// Default pool capacity hint.
pub const TXPOOL_CAPACITY: usize = 100_000;

/// Thread-safe pending-transaction pool.
///
/// Duplicate detection is O(1) by content hash; insertion order is kept
/// so block construction is deterministic.
pub struct TxPool {
    by_hash: DashMap<Hash, Transaction>,
    order: RwLock<Vec<Hash>>,
}

impl TxPool {
    pub fn new(capacity: Option<usize>) -> Self {
        let capacity = capacity.unwrap_or(TXPOOL_CAPACITY);
        Self {
            by_hash: DashMap::with_capacity(capacity),
            order: RwLock::new(Vec::with_capacity(capacity)),
        }
    }

    pub fn contains(&self, hash: Hash) -> bool {
        self.by_hash.contains_key(&hash)
    }

    /// Adds a transaction unless its hash is already present.
    pub fn append(&self, tx: Transaction) {
        let hash = tx.hash();
        if self.by_hash.insert(hash, tx).is_none() {
            self.order.write().unwrap().push(hash);
        }
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }

    /// Drains the pool, returning transactions in insertion order.
    pub fn take_all(&self) -> Vec<Transaction> {
        let mut order = self.order.write().unwrap();
        let drained = order
            .drain(..)
            .filter_map(|hash| self.by_hash.remove(&hash).map(|(_, tx)| tx))
            .collect();
        drained
    }

    /// Removes everything without returning it.
    pub fn flush(&self) {
        self.by_hash.clear();
        self.order.write().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::key_pair::PrivateKey;

    fn signed_tx(data: &[u8], nonce: u64) -> Transaction {
        let mut tx = Transaction::with_nonce(data.to_vec(), nonce);
        tx.sign(&PrivateKey::new());
        tx
    }

    #[test]
    fn append_and_contains() {
        let pool = TxPool::new(None);
        let tx = signed_tx(b"hello", 1);
        let hash = tx.hash();

        assert!(!pool.contains(hash));
        pool.append(tx);
        assert!(pool.contains(hash));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn duplicates_are_ignored() {
        let pool = TxPool::new(None);
        let tx = signed_tx(b"same", 2);

        pool.append(tx.clone());
        pool.append(tx);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn same_data_different_signers_are_distinct() {
        let pool = TxPool::new(None);
        pool.append(signed_tx(b"data", 3));
        pool.append(signed_tx(b"data", 4));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn take_all_preserves_insertion_order() {
        let pool = TxPool::new(None);
        let txs: Vec<Transaction> = (0..50).map(|i| signed_tx(&[i as u8], i)).collect();
        for tx in &txs {
            pool.append(tx.clone());
        }

        let drained = pool.take_all();
        assert_eq!(drained.len(), txs.len());
        for (got, expected) in drained.iter().zip(&txs) {
            assert_eq!(got.hash(), expected.hash());
        }
        assert!(pool.is_empty());
    }

    #[test]
    fn flush_empties_the_pool() {
        let pool = TxPool::new(Some(16));
        for i in 0..5 {
            pool.append(signed_tx(b"x", i));
        }
        pool.flush();
        assert!(pool.is_empty());
        assert!(pool.take_all().is_empty());
    }
}
