//! Merged-mining proof: a block of this chain committed into the coinbase of
//! a parent-chain block.

use crate::btc::{self, BtcHeader, BtcTransaction};
use crate::codec::{self, Decodable, Decoder, Encodable, Encoder};
use crate::merkle::root_from_branch;
use crate::{Hash256, MerkleBranch, ProofError};

/// Magic bytes preceding the aux merkle root in the parent coinbase script.
pub const MERGED_MINING_HEADER: [u8; 4] = [0xfa, 0xbe, b'm', b'm'];

/// Aux trees deeper than this cannot encode their size in the coinbase.
pub const MAX_AUX_BRANCH_LEN: usize = 30;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuxPow {
    pub parent_coinbase_tx: BtcTransaction,
    pub parent_hash: Hash256,
    /// coinbase tx -> parent block merkle root
    pub parent_coinbase_branch: MerkleBranch,
    /// aux block hash -> aux tree root committed in the coinbase
    pub aux_branch: MerkleBranch,
    pub parent_header: BtcHeader,
}

impl Default for AuxPow {
    fn default() -> Self {
        Self {
            parent_coinbase_tx: btc::empty_coinbase(),
            parent_hash: Hash256::ZERO,
            parent_coinbase_branch: MerkleBranch::default(),
            aux_branch: MerkleBranch::default(),
            parent_header: btc::empty_header(),
        }
    }
}

/// Slot of a chain inside the aux merkle tree, derived from the coinbase
/// nonce and the chain id so that two chains cannot claim the same slot.
pub fn expected_aux_index(nonce: u32, chain_id: u32, branch_len: u32) -> u32 {
    let mut rand = nonce;
    rand = rand.wrapping_mul(1_103_515_245).wrapping_add(12_345);
    rand = rand.wrapping_add(chain_id);
    rand = rand.wrapping_mul(1_103_515_245).wrapping_add(12_345);
    match 1u32.checked_shl(branch_len) {
        Some(size) => rand % size,
        None => rand,
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

impl AuxPow {
    /// Root of the aux tree this proof claims for `aux_block_hash`.
    pub fn aux_root(&self, aux_block_hash: &Hash256) -> Hash256 {
        root_from_branch(aux_block_hash, &self.aux_branch.hashes, self.aux_branch.index)
    }

    /// Verifies that `aux_block_hash` is committed by the parent block and
    /// that the parent block carries enough work.
    pub fn check(&self, aux_block_hash: &Hash256, chain_id: u32) -> Result<(), ProofError> {
        if self.parent_coinbase_branch.index != 0 {
            return Err(ProofError::NotCoinbase);
        }
        let coinbase_root = root_from_branch(
            &btc::txid(&self.parent_coinbase_tx),
            &self.parent_coinbase_branch.hashes,
            self.parent_coinbase_branch.index,
        );
        if coinbase_root != btc::merkle_root(&self.parent_header) {
            return Err(ProofError::CoinbaseBranchMismatch);
        }

        if self.aux_branch.len() > MAX_AUX_BRANCH_LEN {
            return Err(ProofError::AuxBranchTooLong(self.aux_branch.len()));
        }

        let script = self
            .parent_coinbase_tx
            .input
            .first()
            .ok_or(ProofError::EmptyCoinbase)?
            .script_sig
            .as_bytes();

        let header_pos = find(script, &MERGED_MINING_HEADER).ok_or(ProofError::MissingMergedMiningHeader)?;
        if find(&script[header_pos + 1..], &MERGED_MINING_HEADER).is_some() {
            return Err(ProofError::MultipleMergedMiningHeaders);
        }

        // the root is committed in display byte order
        let aux_root = self.aux_root(aux_block_hash).reversed();
        let root_pos = find(script, &aux_root).ok_or(ProofError::MissingAuxRoot)?;
        if header_pos + MERGED_MINING_HEADER.len() != root_pos {
            return Err(ProofError::MisplacedAuxRoot);
        }

        let tail = &script[root_pos + 32..];
        if tail.len() < 8 {
            return Err(ProofError::TruncatedCommitment);
        }
        let size = u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]);
        let nonce = u32::from_le_bytes([tail[4], tail[5], tail[6], tail[7]]);

        let branch_len = self.aux_branch.len() as u32;
        let expected_size = 1u32 << branch_len;
        if size != expected_size {
            return Err(ProofError::TreeSizeMismatch { found: size, expected: expected_size });
        }

        let expected_index = expected_aux_index(nonce, chain_id, branch_len);
        if self.aux_branch.index != expected_index {
            return Err(ProofError::UnexpectedAuxIndex {
                found: self.aux_branch.index,
                expected: expected_index,
            });
        }

        if btc::block_hash(&self.parent_header) != self.parent_hash {
            return Err(ProofError::ParentHashMismatch);
        }
        if !btc::meets_target(&self.parent_header) {
            return Err(ProofError::InsufficientWork);
        }

        Ok(())
    }
}

impl Encodable for AuxPow {
    fn encode_to(&self, enc: &mut Encoder) {
        self.parent_coinbase_tx.encode_to(enc);
        self.parent_hash.encode_to(enc);
        self.parent_coinbase_branch.encode_to(enc);
        self.aux_branch.encode_to(enc);
        self.parent_header.encode_to(enc);
    }
}

impl Decodable for AuxPow {
    fn decode_from(dec: &mut Decoder<'_>) -> codec::Result<Self> {
        Ok(Self {
            parent_coinbase_tx: BtcTransaction::decode_from(dec)?,
            parent_hash: Hash256::decode_from(dec)?,
            parent_coinbase_branch: MerkleBranch::decode_from(dec)?,
            aux_branch: MerkleBranch::decode_from(dec)?,
            parent_header: BtcHeader::decode_from(dec)?,
        })
    }
}
