use std::sync::Arc;

use anyhow::{Context, Result};
use store::{FinishedTxStore, MainChainStore, RegisteredSideChainStore, ShutdownCoordinator, SideChainStore};
use tracing::{info, warn};

use crate::config::AppConfig;

pub type SharedState = Arc<AppState>;

/// Stores shared by every task. Each store registers itself with
/// `shutdown` when opened.
pub struct AppState {
    pub main_chain: MainChainStore,
    pub side_chain: SideChainStore,
    pub finished: FinishedTxStore,
    pub registered: RegisteredSideChainStore,
    pub shutdown: ShutdownCoordinator,
}

impl AppState {
    pub async fn open(cfg: &AppConfig) -> Result<Self> {
        std::fs::create_dir_all(&cfg.data_dir)
            .with_context(|| format!("Failed to create data dir {}", cfg.data_dir.display()))?;

        let shutdown = ShutdownCoordinator::new();
        let dir = &cfg.data_dir;
        let main_chain = MainChainStore::open(&dir.join("main_chain.db"), &shutdown)
            .await
            .context("Failed to open main chain store")?;
        let side_chain = SideChainStore::open(&dir.join("side_chain.db"), &shutdown)
            .await
            .context("Failed to open side chain store")?;
        let finished = FinishedTxStore::open(&dir.join("finished_txs.db"), &shutdown)
            .await
            .context("Failed to open finished tx store")?;
        let registered = RegisteredSideChainStore::open(&dir.join("registered_side_chains.db"), &shutdown)
            .await
            .context("Failed to open registered side chain store")?;

        Ok(Self {
            main_chain,
            side_chain,
            finished,
            registered,
            shutdown,
        })
    }

    /// Logs where the stores left off, failed settlements, and configured
    /// side chains that have no registration record yet.
    pub async fn startup_report(&self, cfg: &AppConfig) -> Result<()> {
        let main_height = self.main_chain.current_height(0).await?;
        let pending = self.main_chain.get_all_main_chain_tx_hashes().await?.len();
        info!(main_height, pending_deposits = pending, "main chain store");

        for chain in &cfg.side_chains {
            let height = self.side_chain.current_side_height(&chain.genesis_block_address, 0).await?;
            info!(chain=%chain.name, height, "side chain cursor");
        }

        let failed_deposits = self.finished.get_deposit_txs(false).await?.len();
        let failed_withdraws = self.finished.get_withdraw_txs(false).await?.len();
        if failed_deposits > 0 || failed_withdraws > 0 {
            warn!(failed_deposits, failed_withdraws, "finished store holds failed settlements");
        }

        for chain in &cfg.side_chains {
            let genesis = chain.genesis_block_hash.to_hex();
            if self.registered.has_registered_side_chain(&genesis).await? {
                info!(chain=%chain.name, %genesis, "side chain registered");
            } else {
                warn!(chain=%chain.name, %genesis, "side chain not registered on the main chain");
            }
        }
        Ok(())
    }
}
