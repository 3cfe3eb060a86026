//! Turns main-chain inclusion notifications for side-mining transactions
//! into `submitauxblock` calls on the matching side chain.

use std::collections::HashMap;
use std::sync::Arc;

use auxpow::{CodecError, Hash256, MainBlockHeader, MerkleError, PartialMerkleProof, SideAuxPow, Transaction};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::rpc::{RpcError, SideChainRpc};
use crate::spv::SpvService;

/// A transaction seen in a main-chain block together with the proof that
/// the block contains it.
#[derive(Clone, Debug)]
pub struct Notification {
    pub proof: PartialMerkleProof,
    pub tx: Transaction,
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("header lookup failed: {0}")]
    Header(RpcError),

    #[error("codec: {0}")]
    Codec(#[from] CodecError),

    #[error("malformed proof: {0}")]
    Merkle(#[from] MerkleError),

    #[error("header hash {found} does not match proof block {expected}")]
    HeaderMismatch { expected: Hash256, found: Hash256 },

    #[error("proof root {found} does not match header root {expected}")]
    RootMismatch { expected: Hash256, found: Hash256 },

    #[error("transaction {0} is not matched by the proof")]
    NotInProof(Hash256),

    #[error("rebuilt branch does not resolve to the header root")]
    BranchMismatch,

    #[error("transaction {0} is not a side-mining transaction")]
    NotSideMining(Hash256),

    #[error("no side chain configured for genesis {0}")]
    UnknownSideChain(Hash256),

    #[error("submitauxblock: {0}")]
    Submit(RpcError),
}

impl SubmitError {
    /// Proof failures never become valid on retry.
    pub fn is_verification(&self) -> bool {
        matches!(
            self,
            SubmitError::Merkle(_)
                | SubmitError::HeaderMismatch { .. }
                | SubmitError::RootMismatch { .. }
                | SubmitError::NotInProof(_)
                | SubmitError::BranchMismatch
        )
    }
}

/// What was sent to a side chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submitted {
    pub side_genesis_hash: Hash256,
    pub side_block_hash: Hash256,
    pub side_aux_pow: SideAuxPow,
}

pub struct SubmissionPipeline {
    spv: Arc<dyn SpvService>,
    side_chains: HashMap<Hash256, Arc<dyn SideChainRpc>>,
}

impl SubmissionPipeline {
    /// `side_chains` maps a side chain's genesis block hash to its node.
    pub fn new(spv: Arc<dyn SpvService>, side_chains: HashMap<Hash256, Arc<dyn SideChainRpc>>) -> Self {
        Self { spv, side_chains }
    }

    /// Verifies the notification against the main-chain header and builds
    /// the proof the side chain expects.
    pub async fn build(&self, notification: &Notification) -> Result<(SideAuxPow, Hash256, Hash256), SubmitError> {
        let Notification { proof, tx } = notification;

        if !tx.is_side_mining() {
            return Err(SubmitError::NotSideMining(tx.hash()));
        }

        let spv_header = self.spv.get_header(&proof.block_hash).await.map_err(SubmitError::Header)?;
        let header = MainBlockHeader::try_from(&spv_header)?;
        if header.hash() != proof.block_hash {
            return Err(SubmitError::HeaderMismatch {
                expected: proof.block_hash,
                found: header.hash(),
            });
        }

        let tree = proof.extract()?;
        if tree.root != header.transactions_root {
            return Err(SubmitError::RootMismatch {
                expected: header.transactions_root,
                found: tree.root,
            });
        }

        let txid = tx.hash();
        let branch = tree.branch_for(&txid).ok_or(SubmitError::NotInProof(txid))?;

        let side_aux_pow = SideAuxPow::new(tx.clone(), branch, header);
        if !side_aux_pow.verify() {
            return Err(SubmitError::BranchMismatch);
        }

        let payload = tx.side_mining_payload()?;
        Ok((side_aux_pow, payload.side_genesis_hash, payload.side_block_hash))
    }

    pub async fn process(&self, notification: &Notification) -> Result<Submitted, SubmitError> {
        let (side_aux_pow, side_genesis_hash, side_block_hash) = self.build(notification).await?;

        let rpc = self
            .side_chains
            .get(&side_genesis_hash)
            .ok_or(SubmitError::UnknownSideChain(side_genesis_hash))?;

        rpc.submit_aux_block(&side_block_hash.to_hex(), &side_aux_pow.to_hex())
            .await
            .map_err(SubmitError::Submit)?;

        Ok(Submitted {
            side_genesis_hash,
            side_block_hash,
            side_aux_pow,
        })
    }

    /// Handles notifications one at a time until the channel closes or
    /// `cancel` fires. Failed notifications are dropped.
    pub async fn run(self, mut notifications: mpsc::Receiver<Notification>, cancel: CancellationToken) {
        info!("submission: started");
        loop {
            let notification = tokio::select! {
                _ = cancel.cancelled() => break,
                n = notifications.recv() => match n {
                    Some(n) => n,
                    None => break,
                },
            };

            let txid = notification.tx.hash();
            match self.process(&notification).await {
                Ok(done) => info!(
                    %txid,
                    side_genesis=%done.side_genesis_hash,
                    side_block=%done.side_block_hash,
                    "submission: aux block submitted"
                ),
                Err(e) if e.is_verification() => warn!(%txid, "submission: dropping unverifiable notification: {e}"),
                Err(e) => error!(%txid, "submission: failed, dropping notification: {e}"),
            }
        }
        info!("submission: stopped");
    }
}
