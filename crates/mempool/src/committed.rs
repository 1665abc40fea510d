//! The committed pool: receipts retained for the query window.

use concord_types::{BlockHeight, Sha256, TimestampNano, TransactionReceipt};
use std::collections::HashMap;

/// One committed transaction's record.
#[derive(Debug, Clone)]
pub struct CommittedTransaction {
    pub receipt: TransactionReceipt,
    pub block_height: BlockHeight,
    pub block_timestamp: TimestampNano,
    /// Local time the commit was recorded; drives retention.
    pub committed_at: TimestampNano,
}

/// Receipts of recently committed transactions, kept long enough to answer
/// status queries and to deduplicate late duplicates.
#[derive(Default)]
pub struct CommittedPool {
    by_hash: HashMap<Sha256, CommittedTransaction>,
}

impl CommittedPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &mut self,
        receipt: TransactionReceipt,
        block_height: BlockHeight,
        block_timestamp: TimestampNano,
    ) {
        self.by_hash.insert(
            receipt.txhash,
            CommittedTransaction {
                receipt,
                block_height,
                block_timestamp,
                committed_at: TimestampNano::now(),
            },
        );
    }

    pub fn has(&self, txhash: &Sha256) -> bool {
        self.by_hash.contains_key(txhash)
    }

    pub fn get(&self, txhash: &Sha256) -> Option<&CommittedTransaction> {
        self.by_hash.get(txhash)
    }

    /// Drop records committed before `cutoff`; returns how many went.
    pub fn expire_committed_before(&mut self, cutoff: TimestampNano) -> usize {
        let before = self.by_hash.len();
        self.by_hash.retain(|_, record| record.committed_at >= cutoff);
        before - self.by_hash.len()
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_types::ExecutionResult;

    fn receipt(byte: u8) -> TransactionReceipt {
        TransactionReceipt {
            txhash: Sha256::of(&[byte]),
            execution_result: ExecutionResult::Success,
            output_arguments: vec![],
            output_events: vec![],
        }
    }

    #[test]
    fn stores_and_finds_receipts() {
        let mut pool = CommittedPool::new();
        pool.add(receipt(1), BlockHeight(3), TimestampNano(100));
        assert!(pool.has(&Sha256::of(&[1])));
        let found = pool.get(&Sha256::of(&[1])).unwrap();
        assert_eq!(found.block_height, BlockHeight(3));
    }

    #[test]
    fn expiry_drops_only_old_records() {
        let mut pool = CommittedPool::new();
        pool.add(receipt(1), BlockHeight(1), TimestampNano(1));
        pool.add(receipt(2), BlockHeight(2), TimestampNano(2));

        // Both records were committed "now"; a cutoff in the distant future
        // removes them, a cutoff in the past removes none.
        assert_eq!(pool.expire_committed_before(TimestampNano(1)), 0);
        assert_eq!(pool.len(), 2);
        let far_future = TimestampNano::now().saturating_add(std::time::Duration::from_secs(3600));
        assert_eq!(pool.expire_committed_before(far_future), 2);
        assert!(pool.is_empty());
    }
}
