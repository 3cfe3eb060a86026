//! Per side chain catch-up loop.
//!
//! Each tick compares the chain height with the stored cursor and, while
//! behind, fetches blocks in height order. For every block the UTXO effects
//! are written first and the cursor is advanced afterwards, so a crash in
//! between replays the block, which is harmless: inserts are idempotent and
//! deleting an unknown outpoint is a no-op.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use auxpow::transaction::tx_type;
use store::{AddressUtxo, SideChainStore, StoreError, UtxoInput};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SideChainConfig;
use crate::rpc::{parse_amount, BlockInfo, RpcError, SideChainRpc};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("rpc: {0}")]
    Rpc(#[from] RpcError),

    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("asked for block {expected}, node returned {found}")]
    UnexpectedHeight { expected: u32, found: u32 },
}

/// Outcome of one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncProgress {
    Idle { height: u32 },
    CaughtUp { from: u32, to: u32 },
    /// Cancelled mid catch-up; `to` is the committed cursor.
    Interrupted { from: u32, to: u32 },
}

pub struct ChainSyncer {
    name: String,
    genesis_block_address: String,
    monitored: HashSet<String>,
    coinbase_maturity: u32,
    rpc: Arc<dyn SideChainRpc>,
    store: SideChainStore,
}

impl ChainSyncer {
    pub fn new(
        chain: &SideChainConfig,
        rpc: Arc<dyn SideChainRpc>,
        store: SideChainStore,
        coinbase_maturity: u32,
    ) -> Self {
        Self {
            name: chain.name.clone(),
            genesis_block_address: chain.genesis_block_address.clone(),
            monitored: chain.monitored_addresses.iter().cloned().collect(),
            coinbase_maturity,
            rpc,
            store,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Brings the cursor up to the chain height. Stops at the first failing
    /// block; everything before it stays committed. `cancel` is checked
    /// between blocks and aborts any in-flight RPC call.
    pub async fn sync_once(&self, cancel: &CancellationToken) -> Result<SyncProgress, SyncError> {
        let chain_height = tokio::select! {
            _ = cancel.cancelled() => {
                let height = self.store.current_side_height(&self.genesis_block_address, 0).await?;
                return Ok(SyncProgress::Interrupted { from: height, to: height });
            }
            height = self.rpc.get_current_height() => height?,
        };
        let start = self.store.current_side_height(&self.genesis_block_address, 0).await?;
        if start >= chain_height {
            return Ok(SyncProgress::Idle { height: start });
        }

        debug!(chain=%self.name, from = start, to = chain_height, "catching up");
        let mut current = start;
        while current < chain_height {
            if cancel.is_cancelled() {
                return Ok(SyncProgress::Interrupted { from: start, to: current });
            }
            let block = tokio::select! {
                _ = cancel.cancelled() => return Ok(SyncProgress::Interrupted { from: start, to: current }),
                block = self.rpc.get_block_by_height(current) => block?,
            };
            if block.height != current {
                return Err(SyncError::UnexpectedHeight {
                    expected: current,
                    found: block.height,
                });
            }

            self.process_block(&block).await?;
            current = self
                .store
                .current_side_height(&self.genesis_block_address, block.height + 1)
                .await?;
            info!(chain=%self.name, height = block.height, txs = block.tx.len(), "block processed");
        }

        Ok(SyncProgress::CaughtUp { from: start, to: current })
    }

    /// Records monitored outputs and drops spent ones. An output whose
    /// amount does not parse is logged and skipped so one bad entry cannot
    /// pin the cursor.
    async fn process_block(&self, block: &BlockInfo) -> Result<(), SyncError> {
        let mut received = Vec::new();
        for tx in &block.tx {
            for output in &tx.vout {
                if !self.monitored.contains(&output.address) {
                    continue;
                }
                let amount = match parse_amount(&output.value) {
                    Ok(amount) => amount,
                    Err(e) => {
                        warn!(chain=%self.name, txid=%tx.txid, n = output.n, value=%output.value, "skipping output: {e}");
                        continue;
                    }
                };
                let sequence = if tx.tx_type == tx_type::COIN_BASE {
                    block.height.saturating_add(self.coinbase_maturity)
                } else {
                    output.outputlock
                };
                received.push(AddressUtxo {
                    input: UtxoInput {
                        tx_id: tx.txid.clone(),
                        index: output.n,
                        sequence,
                    },
                    amount,
                    genesis_block_address: self.genesis_block_address.clone(),
                    destroy_address: output.address.clone(),
                });
            }
        }
        if !received.is_empty() {
            self.store.add_address_utxos(&received).await?;
            debug!(chain=%self.name, height = block.height, utxos = received.len(), "utxos recorded");
        }

        let spent: Vec<(String, u16)> = block
            .tx
            .iter()
            .flat_map(|tx| tx.vin.iter().map(|input| (input.txid.clone(), input.vout)))
            .collect();
        if !spent.is_empty() {
            let removed = self
                .store
                .remove_address_utxos(&spent, &self.genesis_block_address)
                .await?;
            let count = removed.iter().filter(|hit| **hit).count();
            if count > 0 {
                debug!(chain=%self.name, height = block.height, utxos = count, "utxos spent");
            }
        }
        Ok(())
    }

    /// Ticks until `cancel` fires. Failures are logged and retried on the
    /// next tick.
    pub async fn run(self, interval: Duration, cancel: CancellationToken) {
        info!(chain=%self.name, "sync_loop: started");
        loop {
            match self.sync_once(&cancel).await {
                Ok(SyncProgress::Idle { height }) => debug!(chain=%self.name, height, "up to date"),
                Ok(SyncProgress::CaughtUp { from, to }) => info!(chain=%self.name, from, to, "caught up"),
                Ok(SyncProgress::Interrupted { from, to }) => {
                    info!(chain=%self.name, from, to, "catch-up interrupted");
                    break;
                }
                Err(e) => warn!(chain=%self.name, "sync tick failed: {e}"),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        info!(chain=%self.name, "sync_loop: stopped");
    }
}
