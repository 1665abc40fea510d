//! The native key/value processor.
//!
//! Supports one contract model: `put(key, value)` writes, `get(key)` reads.
//! Unknown methods revert. Execution never touches the live state store
//! directly; it reads the pre-execution snapshot and accumulates diffs, so
//! re-execution during results-block validation is side-effect free.

use crate::{PreOrderVerdict, QueryResult, TransactionSetResult, VirtualMachine, VmError};
use async_trait::async_trait;
use concord_state::StateStorage;
use concord_types::{
    BlockHeight, ContractStateDiff, ExecutionResult, SignedTransaction, StateRecord,
    TimestampNano, TransactionReceipt,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::trace;

type PreOrderRule = dyn Fn(&SignedTransaction) -> bool + Send + Sync;

/// Deterministic in-process VM over the versioned state store.
pub struct NativeVm {
    state: Arc<StateStorage>,
    /// Extra pre-order predicate, used by tests to simulate contract-level
    /// rejections. Default accepts everything with a valid signature.
    pre_order_rule: Option<Box<PreOrderRule>>,
}

impl NativeVm {
    pub fn new(state: Arc<StateStorage>) -> Self {
        Self {
            state,
            pre_order_rule: None,
        }
    }

    /// Install an additional pre-order predicate.
    pub fn with_pre_order_rule(
        state: Arc<StateStorage>,
        rule: impl Fn(&SignedTransaction) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            state,
            pre_order_rule: Some(Box::new(rule)),
        }
    }

    fn execute_one(
        &self,
        tx: &SignedTransaction,
        prev_height: BlockHeight,
        overlay: &mut BTreeMap<(String, Vec<u8>), Vec<u8>>,
    ) -> Result<TransactionReceipt, VmError> {
        let body = &tx.transaction;
        let (result, output) = match body.method_name.as_str() {
            "put" => match body.input_arguments.as_slice() {
                [key, value] => {
                    overlay.insert(
                        (body.contract_name.clone(), key.clone()),
                        value.clone(),
                    );
                    (ExecutionResult::Success, Vec::new())
                }
                _ => (ExecutionResult::Reverted, Vec::new()),
            },
            "get" => match body.input_arguments.as_slice() {
                [key] => {
                    let overlaid = overlay
                        .get(&(body.contract_name.clone(), key.clone()))
                        .cloned();
                    let value = match overlaid {
                        Some(value) => Some(value),
                        None => self.state.read_key(
                            Some(prev_height),
                            &body.contract_name,
                            key,
                        )?,
                    };
                    (
                        ExecutionResult::Success,
                        vec![value.unwrap_or_default()],
                    )
                }
                _ => (ExecutionResult::Reverted, Vec::new()),
            },
            _ => (ExecutionResult::Reverted, Vec::new()),
        };
        Ok(TransactionReceipt {
            txhash: tx.hash(),
            execution_result: result,
            output_arguments: output,
            output_events: Vec::new(),
        })
    }
}

#[async_trait]
impl VirtualMachine for NativeVm {
    async fn process_transaction_set(
        &self,
        block_height: BlockHeight,
        _block_timestamp: TimestampNano,
        transactions: &[SignedTransaction],
    ) -> Result<TransactionSetResult, VmError> {
        let prev_height = block_height.prev().unwrap_or(BlockHeight::GENESIS);
        let mut overlay: BTreeMap<(String, Vec<u8>), Vec<u8>> = BTreeMap::new();
        let mut receipts = Vec::with_capacity(transactions.len());
        for tx in transactions {
            receipts.push(self.execute_one(tx, prev_height, &mut overlay)?);
        }

        // Fold the overlay into per-contract diffs, sorted for determinism.
        let mut by_contract: BTreeMap<String, Vec<StateRecord>> = BTreeMap::new();
        for ((contract, key), value) in overlay {
            by_contract
                .entry(contract)
                .or_default()
                .push(StateRecord { key, value });
        }
        let contract_state_diffs = by_contract
            .into_iter()
            .map(|(contract_name, records)| ContractStateDiff {
                contract_name,
                records,
            })
            .collect();

        trace!(%block_height, receipts = receipts.len(), "transaction set processed");
        Ok(TransactionSetResult {
            transaction_receipts: receipts,
            contract_state_diffs,
        })
    }

    async fn pre_order_check(
        &self,
        transactions: &[SignedTransaction],
        _block_height: BlockHeight,
        _block_timestamp: TimestampNano,
    ) -> Result<Vec<PreOrderVerdict>, VmError> {
        Ok(transactions
            .iter()
            .map(|tx| {
                let accepted = tx.verify_signature()
                    && self.pre_order_rule.as_ref().map_or(true, |rule| rule(tx));
                if accepted {
                    PreOrderVerdict::Valid
                } else {
                    PreOrderVerdict::Rejected
                }
            })
            .collect())
    }

    async fn run_query(&self, query: &SignedTransaction) -> Result<QueryResult, VmError> {
        let body = &query.transaction;
        if body.method_name != "get" {
            return Err(VmError::Query(format!(
                "unsupported query method {}",
                body.method_name
            )));
        }
        let [key] = body.input_arguments.as_slice() else {
            return Err(VmError::Query("get takes exactly one argument".into()));
        };
        let value = self.state.read_key(None, &body.contract_name, key)?;
        Ok(QueryResult {
            success: value.is_some(),
            output_arguments: vec![value.unwrap_or_default()],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_state::StateStorageConfig;
    use concord_types::test_utils::keypair_from_seed;
    use concord_types::{KeyPair, Transaction, VirtualChainId, PROTOCOL_VERSION};

    fn tx(kp: &KeyPair, method: &str, args: Vec<Vec<u8>>, salt: u64) -> SignedTransaction {
        let body = Transaction {
            protocol_version: PROTOCOL_VERSION,
            virtual_chain_id: VirtualChainId(42),
            timestamp: TimestampNano(1),
            contract_name: "kv".into(),
            method_name: method.into(),
            input_arguments: args,
            signer_public_key: kp.public_key(),
            salt,
        };
        SignedTransaction::sign(body, kp)
    }

    fn vm() -> (NativeVm, Arc<StateStorage>) {
        let state = Arc::new(StateStorage::new(StateStorageConfig::default()));
        (NativeVm::new(state.clone()), state)
    }

    #[tokio::test]
    async fn execution_is_deterministic() {
        let kp = keypair_from_seed(1);
        let (vm, _) = vm();
        let set = vec![
            tx(&kp, "put", vec![b"a".to_vec(), b"1".to_vec()], 1),
            tx(&kp, "get", vec![b"a".to_vec()], 2),
        ];
        let first = vm
            .process_transaction_set(BlockHeight(1), TimestampNano(5), &set)
            .await
            .unwrap();
        let second = vm
            .process_transaction_set(BlockHeight(1), TimestampNano(5), &set)
            .await
            .unwrap();
        assert_eq!(first, second);
        // The get inside the set observes the earlier put.
        assert_eq!(first.transaction_receipts[1].output_arguments, vec![b"1".to_vec()]);
    }

    #[tokio::test]
    async fn unknown_method_reverts_without_diffs() {
        let kp = keypair_from_seed(1);
        let (vm, _) = vm();
        let set = vec![tx(&kp, "frobnicate", vec![], 1)];
        let result = vm
            .process_transaction_set(BlockHeight(1), TimestampNano(5), &set)
            .await
            .unwrap();
        assert_eq!(
            result.transaction_receipts[0].execution_result,
            ExecutionResult::Reverted
        );
        assert!(result.contract_state_diffs.is_empty());
    }

    #[tokio::test]
    async fn pre_order_rejects_bad_signatures_and_rule_failures() {
        let kp = keypair_from_seed(1);
        let state = Arc::new(StateStorage::new(StateStorageConfig::default()));
        let vm = NativeVm::with_pre_order_rule(state, |tx| tx.transaction.salt != 13);

        let good = tx(&kp, "put", vec![b"k".to_vec(), b"v".to_vec()], 1);
        let unlucky = tx(&kp, "put", vec![b"k".to_vec(), b"v".to_vec()], 13);
        let mut forged = tx(&kp, "put", vec![b"k".to_vec(), b"v".to_vec()], 2);
        forged.transaction.salt = 3;

        let verdicts = vm
            .pre_order_check(&[good, unlucky, forged], BlockHeight(1), TimestampNano(1))
            .await
            .unwrap();
        assert_eq!(
            verdicts,
            vec![
                PreOrderVerdict::Valid,
                PreOrderVerdict::Rejected,
                PreOrderVerdict::Rejected,
            ]
        );
    }

    #[tokio::test]
    async fn queries_read_latest_state() {
        let kp = keypair_from_seed(1);
        let (vm, state) = vm();
        let put = tx(&kp, "put", vec![b"a".to_vec(), b"7".to_vec()], 1);
        let result = vm
            .process_transaction_set(BlockHeight(1), TimestampNano(5), &[put])
            .await
            .unwrap();
        state
            .write_at(BlockHeight(1), &result.contract_state_diffs)
            .unwrap();

        let query = vm
            .run_query(&tx(&kp, "get", vec![b"a".to_vec()], 9))
            .await
            .unwrap();
        assert!(query.success);
        assert_eq!(query.output_arguments, vec![b"7".to_vec()]);
    }
}
