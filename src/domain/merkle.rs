//! Sorted-pair Merkle engine
//!
//! Internal nodes hash the *sorted* pair:
//!
//! ```text
//! node(a, b) = keccak256(min(a, b) || max(a, b))
//! ```
//!
//! Because siblings commute, a proof is a bare list of sibling hashes with no
//! position flags, which is what lets the QR payload carry proofs compactly.
//! Odd levels duplicate their last node. A single-leaf tree is its own root
//! with an empty proof. The cross-batch (ultimate) tree never produces an
//! empty proof: a lone root is padded with `keccak256(root)` so every batch
//! has at least one sibling to present.

use crate::crypto::hash::{keccak256_concat, Hash256};

/// Hash a sorted pair into a parent node
pub fn hash_pair(a: &Hash256, b: &Hash256) -> Hash256 {
    if a <= b {
        keccak256_concat(&[a, b])
    } else {
        keccak256_concat(&[b, a])
    }
}

/// Padding leaf appended when the ultimate tree has exactly one member
pub fn padding_leaf(root: &Hash256) -> Hash256 {
    crate::crypto::hash::keccak256(root)
}

/// A fully materialized tree; level 0 holds the leaves
#[derive(Debug, Clone)]
pub struct MerkleTree {
    levels: Vec<Vec<Hash256>>,
}

impl MerkleTree {
    /// Build a tree over the given leaves, in order.
    ///
    /// Returns `None` for an empty leaf set, which has no root.
    pub fn build(leaves: &[Hash256]) -> Option<Self> {
        if leaves.is_empty() {
            return None;
        }

        let mut levels = vec![leaves.to_vec()];
        while levels.last().map(Vec::len) != Some(1) {
            let mut current = levels.last().cloned().unwrap_or_default();
            if current.len() % 2 == 1 {
                current.push(*current.last().expect("level is non-empty"));
            }
            let next: Vec<Hash256> = current
                .chunks_exact(2)
                .map(|pair| hash_pair(&pair[0], &pair[1]))
                .collect();
            levels.push(next);
        }

        Some(Self { levels })
    }

    /// Build the cross-batch tree; pads a single member so the proof is
    /// never empty. Returns the tree and whether padding was applied.
    pub fn build_ultimate(roots: &[Hash256]) -> Option<(Self, bool)> {
        if roots.is_empty() {
            return None;
        }
        if roots.len() == 1 {
            let padded = vec![roots[0], padding_leaf(&roots[0])];
            return Self::build(&padded).map(|t| (t, true));
        }
        Self::build(roots).map(|t| (t, false))
    }

    pub fn root(&self) -> Hash256 {
        self.levels
            .last()
            .and_then(|level| level.first())
            .copied()
            .expect("built trees always have a root")
    }

    pub fn leaf_count(&self) -> usize {
        self.levels.first().map(Vec::len).unwrap_or(0)
    }

    /// Sibling path for the leaf at `index`, bottom-up.
    pub fn proof_at(&self, index: usize) -> Option<Vec<Hash256>> {
        if index >= self.leaf_count() {
            return None;
        }

        let mut proof = Vec::new();
        let mut position = index;

        for level in &self.levels[..self.levels.len() - 1] {
            let sibling_index = position ^ 1;
            let sibling = if sibling_index < level.len() {
                level[sibling_index]
            } else {
                // Odd level: the duplicated last node is its own sibling.
                level[position]
            };
            proof.push(sibling);
            position /= 2;
        }

        Some(proof)
    }

    /// Proof for the first occurrence of `leaf`.
    pub fn proof(&self, leaf: &Hash256) -> Option<Vec<Hash256>> {
        let index = self.levels.first()?.iter().position(|l| l == leaf)?;
        self.proof_at(index)
    }
}

/// Recompute the path from a leaf through its siblings and compare the root.
///
/// An empty proof is valid exactly when the leaf is the root.
pub fn verify_proof(leaf: &Hash256, proof: &[Hash256], root: &Hash256) -> bool {
    let mut current = *leaf;
    for sibling in proof {
        current = hash_pair(&current, sibling);
    }
    current == *root
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash::keccak256;

    fn leaf(tag: &str) -> Hash256 {
        keccak256(tag.as_bytes())
    }

    #[test]
    fn test_empty_tree_has_no_root() {
        assert!(MerkleTree::build(&[]).is_none());
    }

    #[test]
    fn test_single_leaf_is_root() {
        let l = leaf("only");
        let tree = MerkleTree::build(&[l]).unwrap();
        assert_eq!(tree.root(), l);
        assert_eq!(tree.proof_at(0).unwrap(), Vec::<Hash256>::new());
        assert!(verify_proof(&l, &[], &l));
    }

    #[test]
    fn test_two_leaf_root_is_sorted_pair() {
        let (a, b) = (leaf("a"), leaf("b"));
        let tree = MerkleTree::build(&[a, b]).unwrap();
        assert_eq!(tree.root(), hash_pair(&a, &b));
        // Leaf order does not change the root under sorted pairing.
        let swapped = MerkleTree::build(&[b, a]).unwrap();
        assert_eq!(tree.root(), swapped.root());
    }

    #[test]
    fn test_odd_count_duplicates_last_leaf() {
        let leaves = [leaf("a"), leaf("b"), leaf("c")];
        let tree = MerkleTree::build(&leaves).unwrap();

        let left = hash_pair(&leaves[0], &leaves[1]);
        let right = hash_pair(&leaves[2], &leaves[2]);
        assert_eq!(tree.root(), hash_pair(&left, &right));
    }

    #[test]
    fn test_five_leaf_proof_depth_and_verification() {
        let leaves: Vec<Hash256> = ["a0", "b0", "c0", "d0", "e0"]
            .iter()
            .map(|t| leaf(t))
            .collect();
        let tree = MerkleTree::build(&leaves).unwrap();
        let root = tree.root();

        let proof = tree.proof(&leaves[2]).unwrap();
        assert_eq!(proof.len(), 3);
        assert!(verify_proof(&leaves[2], &proof, &root));

        // A leaf the tree never saw must fail against the same proof.
        assert!(!verify_proof(&leaf("f0"), &proof, &root));
    }

    #[test]
    fn test_all_leaves_prove_against_root() {
        let leaves: Vec<Hash256> = (0..7).map(|i| leaf(&format!("leaf-{i}"))).collect();
        let tree = MerkleTree::build(&leaves).unwrap();
        let root = tree.root();

        for (i, l) in leaves.iter().enumerate() {
            let proof = tree.proof_at(i).unwrap();
            assert!(verify_proof(l, &proof, &root), "leaf {i} failed");
        }
    }

    #[test]
    fn test_proof_is_positionless() {
        // Reversing leaves flips every position, yet the same sibling list
        // still verifies - the property the QR payload depends on.
        let leaves: Vec<Hash256> = (0..4).map(|i| leaf(&format!("p{i}"))).collect();
        let tree = MerkleTree::build(&leaves).unwrap();

        let mut reversed = leaves.clone();
        reversed.reverse();
        let mirrored = MerkleTree::build(&reversed).unwrap();
        assert_eq!(tree.root(), mirrored.root());

        let proof = tree.proof(&leaves[1]).unwrap();
        assert!(verify_proof(&leaves[1], &proof, &mirrored.root()));
    }

    #[test]
    fn test_tampered_proof_fails() {
        let leaves: Vec<Hash256> = (0..4).map(|i| leaf(&format!("t{i}"))).collect();
        let tree = MerkleTree::build(&leaves).unwrap();
        let mut proof = tree.proof_at(0).unwrap();
        proof[0][0] ^= 0x01;
        assert!(!verify_proof(&leaves[0], &proof, &tree.root()));
    }

    #[test]
    fn test_ultimate_single_member_is_padded() {
        let mri = leaf("lone-batch-root");
        let (tree, padded) = MerkleTree::build_ultimate(&[mri]).unwrap();

        assert!(padded);
        let proof = tree.proof(&mri).unwrap();
        assert_eq!(proof, vec![padding_leaf(&mri)]);
        assert_eq!(tree.root(), hash_pair(&mri, &padding_leaf(&mri)));
        assert!(verify_proof(&mri, &proof, &tree.root()));
    }

    #[test]
    fn test_ultimate_multi_member_not_padded() {
        let roots = [leaf("b1"), leaf("b2"), leaf("b3")];
        let (tree, padded) = MerkleTree::build_ultimate(&roots).unwrap();

        assert!(!padded);
        for root in &roots {
            let proof = tree.proof(root).unwrap();
            assert!(!proof.is_empty());
            assert!(verify_proof(root, &proof, &tree.root()));
        }
    }

    #[test]
    fn test_root_equals_leaf_accepts_empty_proof() {
        // The verifier treats MRI == MRU as the valid empty-proof case.
        let mri = leaf("self-rooted");
        assert!(verify_proof(&mri, &[], &mri));
        assert!(!verify_proof(&mri, &[], &leaf("other")));
    }
}
