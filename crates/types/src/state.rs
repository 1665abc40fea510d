//! Contract state diffs carried inside results blocks.

use crate::hash::Sha256;
use sbor::prelude::BasicSbor;

/// One key/value write.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct StateRecord {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// All writes a block applies to one contract, in execution order.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct ContractStateDiff {
    pub contract_name: String,
    pub records: Vec<StateRecord>,
}

impl ContractStateDiff {
    /// Digest used as this diff's Merkle leaf.
    pub fn leaf(&self) -> Sha256 {
        Sha256::of_encodable(self)
    }
}
