/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Simple binary Merkle tree over byte slices, used to commit to the parts of a block.
//!
//! Leaves are hashed as `SHA256(0x00 || leaf)` and inner nodes as `SHA256(0x01 || left || right)`.
//! A tree over `n` items is split at the largest power of two strictly smaller than `n`.

use borsh::{BorshDeserialize, BorshSerialize};

use super::{
    crypto_primitives::{CryptoHasher, Digest},
    data_types::CryptoHash,
};

const LEAF_PREFIX: u8 = 0;
const INNER_PREFIX: u8 = 1;

/// Proof that a leaf is the `index`-th of `total` leaves under some root.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct MerkleProof {
    pub total: u32,
    pub index: u32,
    pub leaf_hash: CryptoHash,
    pub aunts: Vec<CryptoHash>,
}

impl MerkleProof {
    /// Check that this proof proves `leaf` under `root`.
    pub fn verify(&self, root: &CryptoHash, leaf: &[u8]) -> bool {
        if self.index >= self.total || leaf_hash(leaf) != self.leaf_hash {
            return false;
        }
        compute_hash_from_aunts(self.index, self.total, self.leaf_hash, &self.aunts).as_ref() == Some(root)
    }
}

/// Compute the root of the Merkle tree over `items`. The root of an empty tree is the hash of
/// nothing.
pub fn root_from_byte_slices(items: &[&[u8]]) -> CryptoHash {
    match items.len() {
        0 => empty_hash(),
        1 => leaf_hash(items[0]),
        n => {
            let k = split_point(n);
            let left = root_from_byte_slices(&items[..k]);
            let right = root_from_byte_slices(&items[k..]);
            inner_hash(&left, &right)
        }
    }
}

/// Compute the root of the Merkle tree over `items` together with one proof per item.
pub fn proofs_from_byte_slices(items: &[&[u8]]) -> (CryptoHash, Vec<MerkleProof>) {
    let total = items.len() as u32;
    let (root, trails) = trails_from_byte_slices(items);
    let proofs = trails
        .into_iter()
        .enumerate()
        .map(|(index, (leaf_hash, aunts))| MerkleProof {
            total,
            index: index as u32,
            leaf_hash,
            aunts,
        })
        .collect();
    (root, proofs)
}

// For every leaf, returns its hash and the sibling hashes on its path to the root, ordered from the
// leaf upwards.
fn trails_from_byte_slices(items: &[&[u8]]) -> (CryptoHash, Vec<(CryptoHash, Vec<CryptoHash>)>) {
    match items.len() {
        0 => (empty_hash(), Vec::new()),
        1 => {
            let hash = leaf_hash(items[0]);
            (hash, vec![(hash, Vec::new())])
        }
        n => {
            let k = split_point(n);
            let (left_root, mut left) = trails_from_byte_slices(&items[..k]);
            let (right_root, mut right) = trails_from_byte_slices(&items[k..]);
            for (_, aunts) in left.iter_mut() {
                aunts.push(right_root);
            }
            for (_, aunts) in right.iter_mut() {
                aunts.push(left_root);
            }
            left.append(&mut right);
            (inner_hash(&left_root, &right_root), left)
        }
    }
}

fn compute_hash_from_aunts(
    index: u32,
    total: u32,
    leaf_hash: CryptoHash,
    aunts: &[CryptoHash],
) -> Option<CryptoHash> {
    if index >= total || total == 0 {
        return None;
    }
    match total {
        1 => aunts.is_empty().then_some(leaf_hash),
        _ => {
            let (last, rest) = aunts.split_last()?;
            let k = split_point(total as usize) as u32;
            if index < k {
                let left = compute_hash_from_aunts(index, k, leaf_hash, rest)?;
                Some(inner_hash(&left, last))
            } else {
                let right = compute_hash_from_aunts(index - k, total - k, leaf_hash, rest)?;
                Some(inner_hash(last, &right))
            }
        }
    }
}

// Largest power of two strictly smaller than `n`. Requires `n >= 2`.
fn split_point(n: usize) -> usize {
    let mut k = 1;
    while k * 2 < n {
        k *= 2;
    }
    k
}

fn empty_hash() -> CryptoHash {
    CryptoHash::new(CryptoHasher::new().finalize().into())
}

fn leaf_hash(leaf: &[u8]) -> CryptoHash {
    let mut hasher = CryptoHasher::new();
    hasher.update([LEAF_PREFIX]);
    hasher.update(leaf);
    CryptoHash::new(hasher.finalize().into())
}

fn inner_hash(left: &CryptoHash, right: &CryptoHash) -> CryptoHash {
    let mut hasher = CryptoHasher::new();
    hasher.update([INNER_PREFIX]);
    hasher.update(left.bytes());
    hasher.update(right.bytes());
    CryptoHash::new(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_proof_verifies_against_the_root() {
        for n in 1..=9usize {
            let items: Vec<Vec<u8>> = (0..n).map(|i| vec![i as u8; i + 1]).collect();
            let slices: Vec<&[u8]> = items.iter().map(|v| v.as_slice()).collect();
            let (root, proofs) = proofs_from_byte_slices(&slices);
            assert_eq!(root, root_from_byte_slices(&slices));
            for (proof, item) in proofs.iter().zip(&items) {
                assert!(proof.verify(&root, item), "n = {}, index = {}", n, proof.index);
            }
        }
    }

    #[test]
    fn proof_rejects_a_different_leaf() {
        let items: Vec<&[u8]> = vec![b"a", b"b", b"c"];
        let (root, proofs) = proofs_from_byte_slices(&items);
        assert!(!proofs[1].verify(&root, b"x"));
        assert!(!proofs[1].verify(&root, b"a"));
    }
}
