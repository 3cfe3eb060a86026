//! Partial merkle trees as delivered by SPV peers.
//!
//! A proof carries the block's transaction count, a depth-first list of flag
//! bits and the hashes of every pruned subtree. Walking it reproduces the
//! merkle root and the matched leaves; the nodes visited on the way are kept
//! so a full [`MerkleBranch`] can be re-derived for any matched transaction.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::codec::{self, Decodable, Decoder, Encodable, Encoder};
use crate::crypto::hash_pair;
use crate::merkle::MerkleError;
use crate::{Hash256, MerkleBranch};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialMerkleProof {
    pub block_hash: Hash256,
    pub height: u32,
    pub transactions: u32,
    pub hashes: Vec<Hash256>,
    pub flags: Vec<u8>,
}

/// Result of walking a [`PartialMerkleProof`].
#[derive(Clone, Debug)]
pub struct ExtractedTree {
    pub root: Hash256,
    /// (leaf index, leaf hash) in tree order
    pub matches: Vec<(u32, Hash256)>,
    transactions: u32,
    nodes: HashMap<(u32, u32), Hash256>,
}

fn tree_width(transactions: u32, height: u32) -> u32 {
    ((transactions as u64 + (1u64 << height) - 1) >> height) as u32
}

fn tree_height(transactions: u32) -> u32 {
    let mut height = 0;
    while tree_width(transactions, height) > 1 {
        height += 1;
    }
    height
}

impl PartialMerkleProof {
    /// Builds a proof over `leaves` revealing every leaf whose `matches` flag
    /// is set.
    pub fn build(
        block_hash: Hash256,
        height: u32,
        leaves: &[Hash256],
        matches: &[bool],
    ) -> Result<Self, MerkleError> {
        if leaves.is_empty() {
            return Err(MerkleError::EmptyLeafSet);
        }
        if matches.len() != leaves.len() {
            return Err(MerkleError::MalformedPartialProof("match vector length"));
        }

        let mut builder = Builder {
            leaves,
            matches,
            bits: Vec::new(),
            hashes: Vec::new(),
        };
        let transactions = leaves.len() as u32;
        builder.traverse(transactions, tree_height(transactions), 0);

        let mut flags = vec![0u8; builder.bits.len().div_ceil(8)];
        for (i, bit) in builder.bits.iter().enumerate() {
            if *bit {
                flags[i / 8] |= 1 << (i % 8);
            }
        }

        Ok(Self {
            block_hash,
            height,
            transactions,
            hashes: builder.hashes,
            flags,
        })
    }

    pub fn extract(&self) -> Result<ExtractedTree, MerkleError> {
        if self.transactions == 0 {
            return Err(MerkleError::MalformedPartialProof("no transactions"));
        }
        if self.hashes.len() as u64 > self.transactions as u64 {
            return Err(MerkleError::MalformedPartialProof("more hashes than transactions"));
        }
        if self.flags.len() * 8 < self.hashes.len() {
            return Err(MerkleError::MalformedPartialProof("fewer flag bits than hashes"));
        }

        let mut walk = Walk {
            proof: self,
            bits_used: 0,
            hashes_used: 0,
            matches: Vec::new(),
            nodes: HashMap::new(),
        };
        let root = walk.traverse(tree_height(self.transactions), 0)?;

        if walk.hashes_used != self.hashes.len() {
            return Err(MerkleError::MalformedPartialProof("unused hashes"));
        }
        if walk.bits_used.div_ceil(8) != self.flags.len() {
            return Err(MerkleError::MalformedPartialProof("unused flag bytes"));
        }

        Ok(ExtractedTree {
            root,
            matches: walk.matches,
            transactions: self.transactions,
            nodes: walk.nodes,
        })
    }
}

struct Builder<'a> {
    leaves: &'a [Hash256],
    matches: &'a [bool],
    bits: Vec<bool>,
    hashes: Vec<Hash256>,
}

impl Builder<'_> {
    fn subtree_hash(&self, transactions: u32, height: u32, pos: u32) -> Hash256 {
        if height == 0 {
            return self.leaves[pos as usize];
        }
        let left = self.subtree_hash(transactions, height - 1, pos * 2);
        let right = if pos * 2 + 1 < tree_width(transactions, height - 1) {
            self.subtree_hash(transactions, height - 1, pos * 2 + 1)
        } else {
            left
        };
        hash_pair(&left, &right)
    }

    fn traverse(&mut self, transactions: u32, height: u32, pos: u32) {
        let start = (pos as u64) << height;
        let end = (((pos as u64) + 1) << height).min(transactions as u64);
        let parent_of_match = (start..end).any(|i| self.matches[i as usize]);
        self.bits.push(parent_of_match);

        if height == 0 || !parent_of_match {
            let hash = self.subtree_hash(transactions, height, pos);
            self.hashes.push(hash);
            return;
        }
        self.traverse(transactions, height - 1, pos * 2);
        if pos * 2 + 1 < tree_width(transactions, height - 1) {
            self.traverse(transactions, height - 1, pos * 2 + 1);
        }
    }
}

struct Walk<'a> {
    proof: &'a PartialMerkleProof,
    bits_used: usize,
    hashes_used: usize,
    matches: Vec<(u32, Hash256)>,
    nodes: HashMap<(u32, u32), Hash256>,
}

impl Walk<'_> {
    fn next_bit(&mut self) -> Result<bool, MerkleError> {
        let byte = self
            .proof
            .flags
            .get(self.bits_used / 8)
            .ok_or(MerkleError::MalformedPartialProof("ran out of flag bits"))?;
        let bit = (byte >> (self.bits_used % 8)) & 1 == 1;
        self.bits_used += 1;
        Ok(bit)
    }

    fn traverse(&mut self, height: u32, pos: u32) -> Result<Hash256, MerkleError> {
        let flag = self.next_bit()?;

        if height == 0 || !flag {
            let hash = *self
                .proof
                .hashes
                .get(self.hashes_used)
                .ok_or(MerkleError::MalformedPartialProof("ran out of hashes"))?;
            self.hashes_used += 1;
            if height == 0 && flag {
                self.matches.push((pos, hash));
            }
            self.nodes.insert((height, pos), hash);
            return Ok(hash);
        }

        let left = self.traverse(height - 1, pos * 2)?;
        let right = if pos * 2 + 1 < tree_width(self.proof.transactions, height - 1) {
            let right = self.traverse(height - 1, pos * 2 + 1)?;
            // identical children would let two different trees share a root
            if right == left {
                return Err(MerkleError::MalformedPartialProof("duplicate right child"));
            }
            right
        } else {
            left
        };

        let hash = hash_pair(&left, &right);
        self.nodes.insert((height, pos), hash);
        Ok(hash)
    }
}

impl ExtractedTree {
    pub fn contains(&self, txid: &Hash256) -> bool {
        self.matches.iter().any(|(_, hash)| hash == txid)
    }

    /// Full sibling path for a matched transaction.
    pub fn branch_for(&self, txid: &Hash256) -> Option<MerkleBranch> {
        let (index, _) = self.matches.iter().find(|(_, hash)| hash == txid)?;
        let height = tree_height(self.transactions);

        let mut hashes = Vec::with_capacity(height as usize);
        for level in 0..height {
            let pos = index >> level;
            let mut sibling = pos ^ 1;
            if sibling >= tree_width(self.transactions, level) {
                sibling = pos;
            }
            hashes.push(*self.nodes.get(&(level, sibling))?);
        }
        Some(MerkleBranch::new(hashes, *index))
    }
}

impl Encodable for PartialMerkleProof {
    fn encode_to(&self, enc: &mut Encoder) {
        self.block_hash.encode_to(enc);
        enc.write_u32_le(self.height);
        enc.write_u32_le(self.transactions);
        enc.write_seq(&self.hashes);
        enc.write_var_bytes(&self.flags);
    }
}

impl Decodable for PartialMerkleProof {
    fn decode_from(dec: &mut Decoder<'_>) -> codec::Result<Self> {
        Ok(Self {
            block_hash: Hash256::decode_from(dec)?,
            height: dec.read_u32_le()?,
            transactions: dec.read_u32_le()?,
            hashes: dec.read_seq()?,
            flags: dec.read_var_bytes()?,
        })
    }
}
