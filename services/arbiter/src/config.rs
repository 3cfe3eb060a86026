use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use auxpow::Hash256;
use serde::Deserialize;

/// One monitored side chain, as listed in `ARBITER_SIDE_CHAINS`.
#[derive(Clone, Debug, Deserialize)]
pub struct SideChainConfig {
    pub name: String,
    pub genesis_block_address: String,
    pub genesis_block_hash: Hash256,
    pub rpc_url: String,
    /// Outputs paid to these addresses are tracked as UTXOs.
    #[serde(default)]
    pub monitored_addresses: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub sync_interval: Duration,
    pub rpc_timeout: Duration,
    pub coinbase_maturity: u32,
    pub side_chains: Vec<SideChainConfig>,
    pub main_rpc_url: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process
    /// environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_dir = PathBuf::from(lookup("ARBITER_DATA_DIR").unwrap_or_else(|| "./data".to_string()));
        let sync_interval = Duration::from_millis(parse_or(&lookup, "ARBITER_SYNC_INTERVAL_MS", 1000)?);
        let rpc_timeout = Duration::from_secs(parse_or(&lookup, "ARBITER_RPC_TIMEOUT_SECS", 10)?);
        let coinbase_maturity = parse_or(&lookup, "ARBITER_COINBASE_MATURITY", 100)?;

        let raw = lookup("ARBITER_SIDE_CHAINS").context("Missing required env var: ARBITER_SIDE_CHAINS")?;
        let side_chains: Vec<SideChainConfig> =
            serde_json::from_str(&raw).context("ARBITER_SIDE_CHAINS must be a JSON array of side chains")?;

        let main_rpc_url = lookup("ARBITER_MAIN_RPC_URL").filter(|v| !v.is_empty());

        // Tiny sanity checks (fail fast, fail loud)
        if side_chains.is_empty() {
            bail!("ARBITER_SIDE_CHAINS lists no side chains");
        }
        if sync_interval.is_zero() {
            bail!("ARBITER_SYNC_INTERVAL_MS must be positive");
        }
        if rpc_timeout.is_zero() {
            bail!("ARBITER_RPC_TIMEOUT_SECS must be positive");
        }

        let mut addresses = HashSet::new();
        let mut hashes = HashSet::new();
        for chain in &side_chains {
            check_url(&format!("rpc_url of side chain {}", chain.name), &chain.rpc_url)?;
            if !addresses.insert(chain.genesis_block_address.as_str()) {
                bail!("duplicate genesis_block_address {}", chain.genesis_block_address);
            }
            if !hashes.insert(chain.genesis_block_hash) {
                bail!("duplicate genesis_block_hash {}", chain.genesis_block_hash);
            }
        }
        if let Some(url) = &main_rpc_url {
            check_url("ARBITER_MAIN_RPC_URL", url)?;
        }

        Ok(Self {
            data_dir,
            sync_interval,
            rpc_timeout,
            coinbase_maturity,
            side_chains,
            main_rpc_url,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(v) => v.parse().with_context(|| format!("invalid value for {key}: {v}")),
        None => Ok(default),
    }
}

fn check_url(what: &str, url: &str) -> Result<()> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        bail!("{what} must start with http:// or https://");
    }
    Ok(())
}
