//! Proof that a side-mining transaction is included in a main-chain block.
//! This is the payload a side chain's `submitauxblock` accepts.

use crate::codec::{self, Decodable, Decoder, Encodable, Encoder};
use crate::header::MainBlockHeader;
use crate::merkle::verify_branch;
use crate::transaction::Transaction;
use crate::MerkleBranch;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SideAuxPow {
    pub side_aux_block_tx: Transaction,
    /// side-mining tx -> `main_block_header.transactions_root`
    pub branch: MerkleBranch,
    pub main_block_header: MainBlockHeader,
}

impl SideAuxPow {
    pub fn new(side_aux_block_tx: Transaction, branch: MerkleBranch, main_block_header: MainBlockHeader) -> Self {
        Self {
            side_aux_block_tx,
            branch,
            main_block_header,
        }
    }

    /// True when the branch resolves the transaction to the header's root.
    pub fn verify(&self) -> bool {
        verify_branch(
            &self.side_aux_block_tx.hash(),
            &self.branch,
            &self.main_block_header.transactions_root,
        )
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.encode())
    }
}

impl Encodable for SideAuxPow {
    fn encode_to(&self, enc: &mut Encoder) {
        self.side_aux_block_tx.encode_to(enc);
        self.branch.encode_to(enc);
        self.main_block_header.encode_to(enc);
    }
}

impl Decodable for SideAuxPow {
    fn decode_from(dec: &mut Decoder<'_>) -> codec::Result<Self> {
        Ok(Self {
            side_aux_block_tx: Transaction::decode_from(dec)?,
            branch: MerkleBranch::decode_from(dec)?,
            main_block_header: MainBlockHeader::decode_from(dec)?,
        })
    }
}
