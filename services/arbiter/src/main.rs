use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use arbiter::config::AppConfig;
use arbiter::main_watch::MainChainWatcher;
use arbiter::rpc::{JsonRpcClient, SideChainRpc};
use arbiter::state::{AppState, SharedState};
use arbiter::submission::SubmissionPipeline;
use arbiter::sync_loop::ChainSyncer;
use auxpow::Hash256;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const NOTIFICATION_BUFFER: usize = 64;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cfg = AppConfig::from_env()?;

    // --- Stores (fatal if any cannot be opened) ---
    let state: SharedState = Arc::new(AppState::open(&cfg).await?);
    state.startup_report(&cfg).await?;

    let cancel = CancellationToken::new();
    let mut tasks = Vec::new();

    // --- One sync loop per side chain ---
    let mut side_chains: HashMap<Hash256, Arc<dyn SideChainRpc>> = HashMap::new();
    for chain in &cfg.side_chains {
        let rpc: Arc<dyn SideChainRpc> = Arc::new(
            JsonRpcClient::new(&chain.rpc_url, cfg.rpc_timeout)
                .with_context(|| format!("Failed to build RPC client for {}", chain.name))?,
        );
        side_chains.insert(chain.genesis_block_hash, rpc.clone());

        let syncer = ChainSyncer::new(chain, rpc, state.side_chain.clone(), cfg.coinbase_maturity);
        tasks.push(tokio::spawn(syncer.run(cfg.sync_interval, cancel.clone())));
    }

    // --- Main-chain watcher feeding the submission pipeline ---
    match &cfg.main_rpc_url {
        Some(url) => {
            let main_rpc = Arc::new(JsonRpcClient::new(url, cfg.rpc_timeout).context("Failed to build main chain RPC client")?);
            let (notify_tx, notify_rx) = mpsc::channel(NOTIFICATION_BUFFER);
            let genesis: Vec<Hash256> = side_chains.keys().copied().collect();
            let watcher = MainChainWatcher::new(main_rpc.clone(), state.main_chain.clone(), genesis, notify_tx);
            let pipeline = SubmissionPipeline::new(main_rpc, side_chains);
            tasks.push(tokio::spawn(watcher.run(cfg.sync_interval, cancel.clone())));
            tasks.push(tokio::spawn(pipeline.run(notify_rx, cancel.clone())));
        }
        None => info!("submission: disabled (no ARBITER_MAIN_RPC_URL)"),
    }

    info!(side_chains = cfg.side_chains.len(), "arbiter running");
    shutdown_signal().await;
    info!("shutdown requested");

    cancel.cancel();
    let failed = arbiter::join_tasks(tasks).await;
    if failed > 0 {
        error!(failed, "tasks ended abnormally");
    }
    state.shutdown.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("ctrl_c handler failed: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("SIGTERM handler failed: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
