//! Side-chain JSON-RPC surface and its reqwest implementation.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("rpc error {code}: {message}")]
    Remote { code: i64, message: String },

    #[error("{0} returned no result")]
    EmptyResult(String),

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("aux block rejected: {0}")]
    Rejected(String),
}

impl From<reqwest::Error> for RpcError {
    fn from(e: reqwest::Error) -> Self {
        RpcError::Transport(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputInfo {
    pub txid: String,
    pub vout: u16,
    #[serde(default)]
    pub sequence: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputInfo {
    /// Decimal amount, e.g. `"5.00000000"`.
    pub value: String,
    pub n: u16,
    pub address: String,
    #[serde(default)]
    pub outputlock: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInfo {
    pub txid: String,
    #[serde(rename = "type")]
    pub tx_type: u8,
    #[serde(default)]
    pub vin: Vec<InputInfo>,
    #[serde(default)]
    pub vout: Vec<OutputInfo>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub hash: String,
    pub height: u32,
    #[serde(default)]
    pub tx: Vec<TransactionInfo>,
}

/// What the arbiter needs from a side chain node.
#[async_trait]
pub trait SideChainRpc: Send + Sync {
    /// Number of blocks on the chain, i.e. the next height to be mined.
    async fn get_current_height(&self) -> Result<u32>;
    async fn get_block_by_height(&self, height: u32) -> Result<BlockInfo>;
    async fn submit_aux_block(&self, block_hash: &str, side_aux_pow: &str) -> Result<()>;
}

/// Parses a decimal amount with at most 8 fractional digits into the
/// smallest unit.
pub fn parse_amount(value: &str) -> Result<i64> {
    const DECIMALS: usize = 8;
    let invalid = || RpcError::InvalidAmount(value.to_string());

    let (whole, frac) = value.split_once('.').unwrap_or((value, ""));
    if whole.is_empty() || frac.len() > DECIMALS {
        return Err(invalid());
    }
    if !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    let whole: i64 = whole.parse().map_err(|_| invalid())?;
    let frac: i64 = if frac.is_empty() {
        0
    } else {
        let padded = format!("{:0<width$}", frac, width = DECIMALS);
        padded.parse().map_err(|_| invalid())?
    };

    whole
        .checked_mul(100_000_000)
        .and_then(|v| v.checked_add(frac))
        .ok_or_else(invalid)
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

/// Named-parameter JSON-RPC client (`{"method": ..., "params": {...}}`).
#[derive(Clone)]
pub struct JsonRpcClient {
    url: String,
    client: reqwest::Client,
}

impl JsonRpcClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { url: url.into(), client })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let body = json!({ "method": method, "params": params });
        debug!(url=%self.url, method, "rpc call");

        let resp = self.client.post(&self.url).json(&body).send().await?.error_for_status()?;
        let envelope: RpcResponse<T> = resp.json().await.map_err(|e| RpcError::Decode(e.to_string()))?;

        if let Some(err) = envelope.error {
            return Err(RpcError::Remote {
                code: err.code,
                message: err.message,
            });
        }
        envelope.result.ok_or_else(|| RpcError::EmptyResult(method.to_string()))
    }

    /// Serialized block as returned by `getblock` with verbosity 0.
    pub async fn get_raw_block(&self, block_hash: &str) -> Result<Vec<u8>> {
        let raw: String = self
            .call("getblock", json!({ "blockhash": block_hash, "verbosity": 0 }))
            .await?;
        hex::decode(raw).map_err(|e| RpcError::Decode(e.to_string()))
    }
}

#[async_trait]
impl SideChainRpc for JsonRpcClient {
    async fn get_current_height(&self) -> Result<u32> {
        self.call("getblockcount", json!({})).await
    }

    async fn get_block_by_height(&self, height: u32) -> Result<BlockInfo> {
        self.call("getblockbyheight", json!({ "height": height })).await
    }

    async fn submit_aux_block(&self, block_hash: &str, side_aux_pow: &str) -> Result<()> {
        let ack: Value = self
            .call(
                "submitauxblock",
                json!({ "blockhash": block_hash, "sideauxpow": side_aux_pow }),
            )
            .await?;
        match ack {
            Value::Bool(false) => Err(RpcError::Rejected(block_hash.to_string())),
            _ => Ok(()),
        }
    }
}
