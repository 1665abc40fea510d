//! Receipt inclusion proofs.
//!
//! A receipt proof carries the receipt itself, the Merkle branch into its
//! block's receipts tree, and the block proof over the containing pair.
//! The serialized form is length-delimited: each component is emitted as
//! `u32 len | SBOR bytes`, so consumers never have to guess where one
//! component ends and the next begins.

use concord_types::{BlockHeight, BlockProof, MerkleProof, Sha256, TransactionReceipt};

/// Proof that a receipt is included in a committed block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptProof {
    pub block_height: BlockHeight,
    pub receipt: TransactionReceipt,
    pub merkle_proof: MerkleProof,
    pub block_proof: BlockProof,
}

impl ReceiptProof {
    /// Check this proof against the containing block's receipts root.
    pub fn verify(&self, receipts_merkle_root: Sha256) -> bool {
        self.merkle_proof
            .verify(receipts_merkle_root, self.receipt.leaf())
    }

    /// Length-delimited serialization: `u32 len | bytes` per component, in
    /// receipt / merkle-branch / block-proof order.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for component in [
            sbor::basic_encode(&self.receipt).expect("receipt should be encodable"),
            sbor::basic_encode(&self.merkle_proof).expect("proof should be encodable"),
            sbor::basic_encode(&self.block_proof).expect("proof should be encodable"),
        ] {
            out.extend_from_slice(&(component.len() as u32).to_le_bytes());
            out.extend_from_slice(&component);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_types::{merkle_inclusion_proof, merkle_root, ExecutionResult};

    fn receipt(byte: u8) -> TransactionReceipt {
        TransactionReceipt {
            txhash: Sha256::of(&[byte]),
            execution_result: ExecutionResult::Success,
            output_arguments: vec![],
            output_events: vec![],
        }
    }

    #[test]
    fn verifies_against_the_receipts_root() {
        let receipts: Vec<_> = (0..4).map(receipt).collect();
        let leaves: Vec<_> = receipts.iter().map(|r| r.leaf()).collect();
        let root = merkle_root(&leaves);

        let proof = ReceiptProof {
            block_height: BlockHeight(3),
            receipt: receipts[2].clone(),
            merkle_proof: merkle_inclusion_proof(&leaves, 2).unwrap(),
            block_proof: BlockProof::default(),
        };
        assert!(proof.verify(root));
        assert!(!proof.verify(Sha256::of(b"other root")));
    }

    #[test]
    fn serialized_form_is_length_delimited() {
        let receipts: Vec<_> = (0..2).map(receipt).collect();
        let leaves: Vec<_> = receipts.iter().map(|r| r.leaf()).collect();
        let proof = ReceiptProof {
            block_height: BlockHeight(1),
            receipt: receipts[0].clone(),
            merkle_proof: merkle_inclusion_proof(&leaves, 0).unwrap(),
            block_proof: BlockProof::default(),
        };

        let bytes = proof.to_bytes();
        // Walk the three components by their length prefixes.
        let mut cursor = 0usize;
        for _ in 0..3 {
            let len = u32::from_le_bytes(bytes[cursor..cursor + 4].try_into().unwrap()) as usize;
            cursor += 4 + len;
        }
        assert_eq!(cursor, bytes.len());
    }
}
