//! Main-chain poller feeding the submission pipeline.
//!
//! Walks main-chain blocks from the stored cursor, picks out side-mining
//! transactions for configured side chains and sends each one, with a
//! partial merkle proof of its block, as a [`Notification`]. The cursor
//! moves past a block only after all of its notifications are queued.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use auxpow::{Decodable, Decoder, Hash256, MainBlockHeader, MerkleError, PartialMerkleProof, Transaction};
use serde_json::json;
use store::{MainChainStore, StoreError};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::rpc::{JsonRpcClient, RpcError};
use crate::submission::Notification;

/// A decoded main-chain block.
#[derive(Clone, Debug)]
pub struct MainChainBlock {
    pub header: MainBlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Decodable for MainChainBlock {
    fn decode_from(dec: &mut Decoder<'_>) -> auxpow::codec::Result<Self> {
        Ok(Self {
            header: MainBlockHeader::decode_from(dec)?,
            transactions: dec.read_seq()?,
        })
    }
}

#[async_trait]
pub trait MainChainRpc: Send + Sync {
    /// Number of blocks on the main chain.
    async fn get_block_count(&self) -> Result<u32, RpcError>;
    async fn get_block_at(&self, height: u32) -> Result<MainChainBlock, RpcError>;
}

#[async_trait]
impl MainChainRpc for JsonRpcClient {
    async fn get_block_count(&self) -> Result<u32, RpcError> {
        self.call("getblockcount", json!({})).await
    }

    async fn get_block_at(&self, height: u32) -> Result<MainChainBlock, RpcError> {
        let block_hash: String = self.call("getblockhash", json!({ "height": height })).await?;
        let raw = self.get_raw_block(&block_hash).await?;
        MainChainBlock::decode(&raw).map_err(|e| RpcError::Decode(e.to_string()))
    }
}

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("rpc: {0}")]
    Rpc(#[from] RpcError),

    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("proof: {0}")]
    Merkle(#[from] MerkleError),

    #[error("asked for main block {expected}, node returned {found}")]
    UnexpectedHeight { expected: u32, found: u32 },

    #[error("notification channel closed")]
    ChannelClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchProgress {
    Idle { height: u32 },
    CaughtUp { from: u32, to: u32, notified: usize },
    Interrupted { from: u32, to: u32 },
}

pub struct MainChainWatcher {
    rpc: Arc<dyn MainChainRpc>,
    store: MainChainStore,
    side_genesis: HashSet<Hash256>,
    notify: mpsc::Sender<Notification>,
}

impl MainChainWatcher {
    /// `side_genesis` lists the genesis hashes of the side chains served.
    pub fn new(
        rpc: Arc<dyn MainChainRpc>,
        store: MainChainStore,
        side_genesis: impl IntoIterator<Item = Hash256>,
        notify: mpsc::Sender<Notification>,
    ) -> Self {
        Self {
            rpc,
            store,
            side_genesis: side_genesis.into_iter().collect(),
            notify,
        }
    }

    /// Side-mining transactions in `block` that target a served side chain.
    fn matches(&self, block: &MainChainBlock) -> Vec<bool> {
        block
            .transactions
            .iter()
            .map(|tx| {
                if !tx.is_side_mining() {
                    return false;
                }
                match tx.side_mining_payload() {
                    Ok(payload) => self.side_genesis.contains(&payload.side_genesis_hash),
                    Err(e) => {
                        warn!(txid=%tx.hash(), height = block.header.height, "main_watch: bad side-mining payload: {e}");
                        false
                    }
                }
            })
            .collect()
    }

    pub async fn watch_once(&self, cancel: &CancellationToken) -> Result<WatchProgress, WatchError> {
        let chain_height = tokio::select! {
            _ = cancel.cancelled() => {
                let height = self.store.current_height(0).await?;
                return Ok(WatchProgress::Interrupted { from: height, to: height });
            }
            height = self.rpc.get_block_count() => height?,
        };
        let start = self.store.current_height(0).await?;
        if start >= chain_height {
            return Ok(WatchProgress::Idle { height: start });
        }

        let mut current = start;
        let mut notified = 0;
        while current < chain_height {
            if cancel.is_cancelled() {
                return Ok(WatchProgress::Interrupted { from: start, to: current });
            }
            let block = tokio::select! {
                _ = cancel.cancelled() => return Ok(WatchProgress::Interrupted { from: start, to: current }),
                block = self.rpc.get_block_at(current) => block?,
            };
            if block.header.height != current {
                return Err(WatchError::UnexpectedHeight {
                    expected: current,
                    found: block.header.height,
                });
            }

            let matches = self.matches(&block);
            if matches.iter().any(|m| *m) {
                let hashes: Vec<Hash256> = block.transactions.iter().map(Transaction::hash).collect();
                let proof = PartialMerkleProof::build(block.header.hash(), block.header.height, &hashes, &matches)?;
                for (tx, _) in block.transactions.iter().zip(&matches).filter(|(_, m)| **m) {
                    let notification = Notification {
                        proof: proof.clone(),
                        tx: tx.clone(),
                    };
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(WatchProgress::Interrupted { from: start, to: current }),
                        sent = self.notify.send(notification) => sent.map_err(|_| WatchError::ChannelClosed)?,
                    }
                    notified += 1;
                    debug!(txid=%tx.hash(), height = current, "main_watch: side-mining tx queued");
                }
            }

            current = self.store.current_height(current + 1).await?;
        }

        Ok(WatchProgress::CaughtUp { from: start, to: current, notified })
    }

    /// Polls until `cancel` fires or the pipeline goes away.
    pub async fn run(self, interval: Duration, cancel: CancellationToken) {
        info!("main_watch: started");
        loop {
            match self.watch_once(&cancel).await {
                Ok(WatchProgress::Idle { height }) => debug!(height, "main_watch: up to date"),
                Ok(WatchProgress::CaughtUp { from, to, notified }) => {
                    info!(from, to, notified, "main_watch: caught up")
                }
                Ok(WatchProgress::Interrupted { .. }) => break,
                Err(WatchError::ChannelClosed) => {
                    warn!("main_watch: submission pipeline gone");
                    break;
                }
                Err(e) => warn!("main_watch: tick failed: {e}"),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        info!("main_watch: stopped");
    }
}
