//! Merged-mining proofs for the cross-chain arbiter.
//!
//! Consensus codec, merkle branches, and the `AuxPow` / `SideAuxPow` proof
//! types exchanged with the main chain and its side chains.

pub mod auxpow;
pub mod btc;
pub mod codec;
pub mod crypto;
pub mod header;
pub mod merkle;
pub mod partial;
pub mod sideauxpow;
pub mod transaction;
mod types;

pub use auxpow::AuxPow;
pub use bitcoin;
pub use btc::{BtcHeader, BtcTransaction};
pub use codec::{CodecError, Decodable, Decoder, Encodable, Encoder};
pub use header::MainBlockHeader;
pub use merkle::{build_branch, compute_root, verify_branch, MerkleError};
pub use partial::{ExtractedTree, PartialMerkleProof};
pub use sideauxpow::SideAuxPow;
pub use transaction::{Attribute, Input, OutPoint, Output, Program, SideMiningPayload, Transaction};
pub use types::{Hash256, MerkleBranch};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProofError {
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("merkle error: {0}")]
    Merkle(#[from] MerkleError),

    #[error("parent coinbase branch index must be 0")]
    NotCoinbase,

    #[error("coinbase branch does not resolve to the parent merkle root")]
    CoinbaseBranchMismatch,

    #[error("parent coinbase has no inputs")]
    EmptyCoinbase,

    #[error("aux branch too long: {0}")]
    AuxBranchTooLong(usize),

    #[error("merged mining header missing from coinbase script")]
    MissingMergedMiningHeader,

    #[error("multiple merged mining headers in coinbase script")]
    MultipleMergedMiningHeaders,

    #[error("aux merkle root missing from coinbase script")]
    MissingAuxRoot,

    #[error("aux merkle root must directly follow the merged mining header")]
    MisplacedAuxRoot,

    #[error("coinbase script too short for aux tree size and nonce")]
    TruncatedCommitment,

    #[error("aux tree size {found}, expected {expected}")]
    TreeSizeMismatch { found: u32, expected: u32 },

    #[error("aux index {found}, expected {expected}")]
    UnexpectedAuxIndex { found: u32, expected: u32 },

    #[error("parent hash does not match parent header")]
    ParentHashMismatch,

    #[error("parent header does not meet its proof-of-work target")]
    InsufficientWork,
}

pub type Result<T> = std::result::Result<T, ProofError>;
