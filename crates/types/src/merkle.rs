//! Ordered Merkle trees.
//!
//! Leaves are 32-byte digests supplied by the caller (typically
//! `Sha256::of_encodable` over receipts or state diffs). Interior nodes are
//! `sha256(left || right)`; a node without a sibling is promoted to the next
//! level unchanged. The root of an empty tree is the zero digest.

use crate::hash::Sha256;
use sbor::prelude::BasicSbor;

/// Which side the sibling digest sits on when recomputing the parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BasicSbor)]
pub enum MerkleSide {
    Left,
    Right,
}

/// One level of an inclusion proof.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct MerkleStep {
    pub sibling: Sha256,
    pub side: MerkleSide,
}

/// Inclusion proof for a single leaf, ordered from leaf level to root.
#[derive(Debug, Clone, PartialEq, Eq, Default, BasicSbor)]
pub struct MerkleProof {
    pub steps: Vec<MerkleStep>,
}

impl MerkleProof {
    /// Recompute the root implied by `leaf` and this proof.
    pub fn apply(&self, leaf: Sha256) -> Sha256 {
        let mut current = leaf;
        for step in &self.steps {
            current = match step.side {
                MerkleSide::Left => Sha256::of_digests([&step.sibling, &current]),
                MerkleSide::Right => Sha256::of_digests([&current, &step.sibling]),
            };
        }
        current
    }

    /// Check that `leaf` is included under `root`.
    pub fn verify(&self, root: Sha256, leaf: Sha256) -> bool {
        self.apply(leaf) == root
    }
}

/// Root of the ordered tree over `leaves`.
pub fn merkle_root(leaves: &[Sha256]) -> Sha256 {
    if leaves.is_empty() {
        return Sha256::ZERO;
    }
    let mut level = leaves.to_vec();
    while level.len() > 1 {
        level = parent_level(&level);
    }
    level[0]
}

/// Inclusion proof for `leaves[index]`, or `None` if out of range.
pub fn merkle_inclusion_proof(leaves: &[Sha256], index: usize) -> Option<MerkleProof> {
    if index >= leaves.len() {
        return None;
    }
    let mut steps = Vec::new();
    let mut level = leaves.to_vec();
    let mut position = index;
    while level.len() > 1 {
        let sibling_position = position ^ 1;
        if sibling_position < level.len() {
            let side = if sibling_position < position {
                MerkleSide::Left
            } else {
                MerkleSide::Right
            };
            steps.push(MerkleStep {
                sibling: level[sibling_position],
                side,
            });
        }
        position /= 2;
        level = parent_level(&level);
    }
    Some(MerkleProof { steps })
}

fn parent_level(level: &[Sha256]) -> Vec<Sha256> {
    level
        .chunks(2)
        .map(|pair| match pair {
            [left, right] => Sha256::of_digests([left, right]),
            [lone] => *lone,
            _ => unreachable!("chunks(2) yields one or two items"),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves(n: usize) -> Vec<Sha256> {
        (0..n).map(|i| Sha256::of(&[i as u8])).collect()
    }

    #[test]
    fn empty_tree_has_zero_root() {
        assert_eq!(merkle_root(&[]), Sha256::ZERO);
    }

    #[test]
    fn single_leaf_is_its_own_root() {
        let l = leaves(1);
        assert_eq!(merkle_root(&l), l[0]);
    }

    #[test]
    fn root_is_a_pure_function_of_the_leaf_sequence() {
        let a = leaves(7);
        assert_eq!(merkle_root(&a), merkle_root(&a.clone()));

        let mut reordered = a.clone();
        reordered.swap(2, 3);
        assert_ne!(merkle_root(&a), merkle_root(&reordered));
    }

    #[test]
    fn proofs_verify_for_every_leaf_at_odd_and_even_sizes() {
        for n in 1..=9 {
            let l = leaves(n);
            let root = merkle_root(&l);
            for (i, leaf) in l.iter().enumerate() {
                let proof = merkle_inclusion_proof(&l, i).expect("index in range");
                assert!(proof.verify(root, *leaf), "n={n} i={i}");
            }
        }
    }

    #[test]
    fn proof_fails_against_wrong_leaf() {
        let l = leaves(5);
        let root = merkle_root(&l);
        let proof = merkle_inclusion_proof(&l, 2).unwrap();
        assert!(!proof.verify(root, l[3]));
    }

    #[test]
    fn out_of_range_index_has_no_proof() {
        let l = leaves(3);
        assert!(merkle_inclusion_proof(&l, 3).is_none());
        assert!(merkle_inclusion_proof(&[], 0).is_none());
    }
}
