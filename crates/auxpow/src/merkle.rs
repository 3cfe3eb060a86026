//! Binary merkle trees over transaction hashes.
//!
//! Odd levels pair their last node with itself before hashing up. Both the
//! main chain and the merged-mining parent build their transaction trees this
//! way, so branches produced here re-derive exactly the roots those chains
//! validate.

use thiserror::Error;

use crate::crypto::hash_pair;
use crate::{Hash256, MerkleBranch};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MerkleError {
    #[error("empty leaf set")]
    EmptyLeafSet,

    #[error("leaf index {index} out of range for {len} leaves")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("malformed partial merkle proof: {0}")]
    MalformedPartialProof(&'static str),
}

fn next_level(level: &[Hash256]) -> Vec<Hash256> {
    level
        .chunks(2)
        .map(|pair| {
            let left = &pair[0];
            let right = pair.get(1).unwrap_or(left);
            hash_pair(left, right)
        })
        .collect()
}

pub fn compute_root(leaves: &[Hash256]) -> Result<Hash256, MerkleError> {
    if leaves.is_empty() {
        return Err(MerkleError::EmptyLeafSet);
    }
    let mut level = leaves.to_vec();
    while level.len() > 1 {
        level = next_level(&level);
    }
    Ok(level[0])
}

/// Sibling path for `leaves[index]` together with the tree root.
pub fn build_branch(leaves: &[Hash256], index: usize) -> Result<(MerkleBranch, Hash256), MerkleError> {
    if leaves.is_empty() {
        return Err(MerkleError::EmptyLeafSet);
    }
    if index >= leaves.len() {
        return Err(MerkleError::IndexOutOfRange { index, len: leaves.len() });
    }

    let mut hashes = Vec::new();
    let mut level = leaves.to_vec();
    let mut pos = index;
    while level.len() > 1 {
        let sibling = pos ^ 1;
        hashes.push(*level.get(sibling).unwrap_or(&level[pos]));
        level = next_level(&level);
        pos >>= 1;
    }

    Ok((MerkleBranch::new(hashes, index as u32), level[0]))
}

/// Folds `branch` onto `leaf` and returns the resulting root.
pub fn root_from_branch(leaf: &Hash256, branch: &[Hash256], index: u32) -> Hash256 {
    let mut current = *leaf;
    let mut index = index;
    for sibling in branch {
        current = if index & 1 == 1 {
            hash_pair(sibling, &current)
        } else {
            hash_pair(&current, sibling)
        };
        index >>= 1;
    }
    current
}

/// Recombines `leaf` with `branch` and compares against `expected_root`.
///
/// Index bits above the branch height are rejected so a branch has exactly
/// one valid index.
pub fn verify_branch(leaf: &Hash256, branch: &MerkleBranch, expected_root: &Hash256) -> bool {
    if branch.hashes.len() < 32 && (branch.index >> branch.hashes.len()) != 0 {
        return false;
    }
    root_from_branch(leaf, &branch.hashes, branch.index) == *expected_root
}
