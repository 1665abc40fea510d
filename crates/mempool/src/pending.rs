//! The pending pool: admitted transactions waiting to be ordered.
//!
//! A hash map holds the entries; a sequence-keyed queue preserves insertion
//! order for FIFO batch extraction from the oldest end. Both structures are
//! updated together by every mutation, and byte accounting always equals
//! the sum of the current entries' encoded sizes.

use crate::{metrics, TransactionRejected};
use concord_types::{PublicKey, Sha256, SignedTransaction, TimestampNano, TransactionStatus};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

pub(crate) struct PendingEntry {
    pub transaction: Arc<SignedTransaction>,
    /// Public key of the gateway node that first admitted the transaction.
    pub gateway_public_key: PublicKey,
    pub time_added: TimestampNano,
    pub size_in_bytes: usize,
    seq: u64,
}

/// Insertion-ordered pending pool with byte accounting.
pub struct PendingPool {
    by_hash: HashMap<Sha256, PendingEntry>,
    queue: BTreeMap<u64, Sha256>,
    next_seq: u64,
    current_size_in_bytes: usize,
    capacity_in_bytes: usize,
}

impl PendingPool {
    pub fn new(capacity_in_bytes: usize) -> Self {
        Self {
            by_hash: HashMap::new(),
            queue: BTreeMap::new(),
            next_seq: 0,
            current_size_in_bytes: 0,
            capacity_in_bytes,
        }
    }

    /// Admit a transaction. Rejects duplicates and admissions that would
    /// push the pool past its byte budget.
    pub fn add(
        &mut self,
        transaction: Arc<SignedTransaction>,
        gateway_public_key: PublicKey,
    ) -> Result<Sha256, TransactionRejected> {
        let size = transaction.size_in_bytes();
        if self.current_size_in_bytes + size > self.capacity_in_bytes {
            return Err(TransactionRejected::new(
                TransactionStatus::RejectedCongestion,
            ));
        }
        let txhash = transaction.hash();
        if self.by_hash.contains_key(&txhash) {
            return Err(TransactionRejected::new(
                TransactionStatus::DuplicateTransactionAlreadyPending,
            ));
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.insert(seq, txhash);
        self.by_hash.insert(
            txhash,
            PendingEntry {
                transaction,
                gateway_public_key,
                time_added: TimestampNano::now(),
                size_in_bytes: size,
                seq,
            },
        );
        self.current_size_in_bytes += size;
        Ok(txhash)
    }

    /// Remove one transaction, keeping map, queue, and accounting in step.
    pub fn remove(&mut self, txhash: &Sha256) -> Option<Arc<SignedTransaction>> {
        let entry = self.by_hash.remove(txhash)?;
        self.queue.remove(&entry.seq);
        self.current_size_in_bytes -= entry.size_in_bytes;
        Some(entry.transaction)
    }

    pub fn has(&self, txhash: &Sha256) -> bool {
        self.by_hash.contains_key(txhash)
    }

    pub fn get(&self, txhash: &Sha256) -> Option<Arc<SignedTransaction>> {
        self.by_hash.get(txhash).map(|e| e.transaction.clone())
    }

    pub(crate) fn entry(&self, txhash: &Sha256) -> Option<&PendingEntry> {
        self.by_hash.get(txhash)
    }

    /// Oldest-first batch up to both caps. Does not remove; entries leave
    /// the pool on commit or expiry.
    pub fn batch(&self, max_count: usize, max_bytes: usize) -> Vec<Arc<SignedTransaction>> {
        let mut batch = Vec::new();
        let mut accumulated = 0usize;
        for txhash in self.queue.values() {
            if batch.len() >= max_count {
                break;
            }
            let entry = self
                .by_hash
                .get(txhash)
                .expect("queue and map are in lockstep");
            if max_bytes > 0 && accumulated + entry.size_in_bytes > max_bytes {
                break;
            }
            accumulated += entry.size_in_bytes;
            let queued_nanos = TimestampNano::now().0.saturating_sub(entry.time_added.0);
            metrics::get()
                .transaction_time_in_queue
                .observe(queued_nanos as f64 / 1e9);
            batch.push(entry.transaction.clone());
        }
        batch
    }

    /// Remove every transaction whose body timestamp predates `cutoff`.
    pub fn expire_older_than(&mut self, cutoff: TimestampNano) -> Vec<Arc<SignedTransaction>> {
        let expired_hashes: Vec<Sha256> = self
            .queue
            .values()
            .filter(|txhash| {
                self.by_hash
                    .get(txhash)
                    .map(|e| e.transaction.transaction.timestamp < cutoff)
                    .unwrap_or(false)
            })
            .copied()
            .collect();
        expired_hashes
            .iter()
            .filter_map(|txhash| self.remove(txhash))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }

    pub fn size_in_bytes(&self) -> usize {
        self.current_size_in_bytes
    }

    #[cfg(test)]
    pub(crate) fn accounted_size_matches_entries(&self) -> bool {
        let sum: usize = self.by_hash.values().map(|e| e.size_in_bytes).sum();
        sum == self.current_size_in_bytes && self.by_hash.len() == self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_types::test_utils::{keypair_from_seed, signed_transaction_at};
    use concord_types::VirtualChainId;

    fn tx(salt: u64) -> Arc<SignedTransaction> {
        let kp = keypair_from_seed(1);
        Arc::new(signed_transaction_at(
            &kp,
            VirtualChainId(42),
            TimestampNano(1_000 + salt),
            salt,
        ))
    }

    fn gateway() -> PublicKey {
        keypair_from_seed(1).public_key()
    }

    #[test]
    fn fifo_batch_extraction() {
        let mut pool = PendingPool::new(1 << 20);
        let txs: Vec<_> = (0..5).map(tx).collect();
        for t in &txs {
            pool.add(t.clone(), gateway()).unwrap();
        }
        let batch = pool.batch(3, 0);
        let hashes: Vec<_> = batch.iter().map(|t| t.hash()).collect();
        assert_eq!(
            hashes,
            txs[..3].iter().map(|t| t.hash()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn duplicate_admission_is_rejected() {
        let mut pool = PendingPool::new(1 << 20);
        let t = tx(1);
        pool.add(t.clone(), gateway()).unwrap();
        let err = pool.add(t, gateway()).unwrap_err();
        assert_eq!(
            err.status,
            TransactionStatus::DuplicateTransactionAlreadyPending
        );
    }

    #[test]
    fn congestion_at_exact_capacity() {
        let probe = tx(0);
        let size = probe.size_in_bytes();

        // Capacity for exactly two transactions of this shape.
        let mut pool = PendingPool::new(size * 2);
        pool.add(tx(1), gateway()).unwrap();
        pool.add(tx(2), gateway()).unwrap();
        let err = pool.add(tx(3), gateway()).unwrap_err();
        assert_eq!(err.status, TransactionStatus::RejectedCongestion);

        // Freeing one slot admits again.
        let victim = pool.batch(1, 0)[0].hash();
        pool.remove(&victim).unwrap();
        pool.add(tx(3), gateway()).unwrap();
    }

    #[test]
    fn byte_accounting_survives_add_remove_expire() {
        let mut pool = PendingPool::new(1 << 20);
        for salt in 0..10 {
            pool.add(tx(salt), gateway()).unwrap();
        }
        assert!(pool.accounted_size_matches_entries());

        let some_hash = pool.batch(1, 0)[0].hash();
        pool.remove(&some_hash).unwrap();
        assert!(pool.accounted_size_matches_entries());

        // Expire the oldest half by body timestamp.
        let removed = pool.expire_older_than(TimestampNano(1_005));
        assert_eq!(removed.len(), 4);
        assert!(pool.accounted_size_matches_entries());
        assert_eq!(pool.len(), 5);
    }

    #[test]
    fn batch_respects_byte_cap() {
        let mut pool = PendingPool::new(1 << 20);
        let probe_size = tx(0).size_in_bytes();
        for salt in 1..=5 {
            pool.add(tx(salt), gateway()).unwrap();
        }
        let batch = pool.batch(10, probe_size * 2);
        assert_eq!(batch.len(), 2);
    }
}
