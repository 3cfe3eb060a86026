//! Main-chain header source consumed by the submission pipeline.

use async_trait::async_trait;
use auxpow::{AuxPow, CodecError, Decodable, Decoder, Encodable, Hash256, MainBlockHeader};

use crate::rpc::{JsonRpcClient, RpcError};

/// Header as handed out by the SPV layer: plain fields plus the raw
/// merged-mining proof.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpvHeader {
    pub version: u32,
    pub previous: Hash256,
    pub merkle_root: Hash256,
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
    pub height: u32,
    pub aux_pow: Vec<u8>,
}

impl TryFrom<&SpvHeader> for MainBlockHeader {
    type Error = CodecError;

    fn try_from(h: &SpvHeader) -> Result<Self, Self::Error> {
        Ok(MainBlockHeader {
            version: h.version,
            previous: h.previous,
            transactions_root: h.merkle_root,
            timestamp: h.timestamp,
            bits: h.bits,
            nonce: h.nonce,
            height: h.height,
            aux_pow: AuxPow::decode(&h.aux_pow)?,
        })
    }
}

impl From<&MainBlockHeader> for SpvHeader {
    fn from(h: &MainBlockHeader) -> Self {
        SpvHeader {
            version: h.version,
            previous: h.previous,
            merkle_root: h.transactions_root,
            timestamp: h.timestamp,
            bits: h.bits,
            nonce: h.nonce,
            height: h.height,
            aux_pow: h.aux_pow.encode(),
        }
    }
}

#[async_trait]
pub trait SpvService: Send + Sync {
    async fn get_header(&self, block_hash: &Hash256) -> Result<SpvHeader, RpcError>;
}

/// Reads headers from a main-chain node: the raw block starts with the
/// serialized header.
#[async_trait]
impl SpvService for JsonRpcClient {
    async fn get_header(&self, block_hash: &Hash256) -> Result<SpvHeader, RpcError> {
        let raw = self.get_raw_block(&block_hash.to_hex()).await?;
        let mut dec = Decoder::new(&raw);
        let header = MainBlockHeader::decode_from(&mut dec).map_err(|e| RpcError::Decode(e.to_string()))?;
        if header.hash() != *block_hash {
            return Err(RpcError::Decode(format!("node returned block {} for {block_hash}", header.hash())));
        }
        Ok(SpvHeader::from(&header))
    }
}
