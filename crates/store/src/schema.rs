use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Deposit observed on the main chain, waiting to be sent to a side chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MainChainTx {
    pub tx_hash: String,
    pub genesis_block_address: String,
    pub tx: Vec<u8>,             // serialized main-chain transaction
    pub merkle_proof: Vec<u8>,   // serialized inclusion proof
}

/// Withdraw observed on a side chain, waiting to be paid out on the main chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideChainTx {
    pub tx_hash: String,
    pub genesis_block_address: String,
    pub tx: Vec<u8>,
    pub block_height: u32,
}

/// Outpoint of a tracked output. `sequence` is the height at which the
/// output becomes spendable.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UtxoInput {
    pub tx_id: String,
    pub index: u16,
    pub sequence: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressUtxo {
    pub input: UtxoInput,
    pub amount: i64,
    pub genesis_block_address: String,
    pub destroy_address: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositTx {
    pub tx_hash: String,
    pub genesis_block_address: String,
    pub succeeded: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositRecord {
    pub tx_hash: String,
    pub genesis_block_address: String,
    pub succeeded: bool,
    pub recorded_at: DateTime<Utc>,
}

/// Finished withdraw joined with the side-chain transaction it settled.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawRecord {
    pub tx_hash: String,
    pub side_chain_tx: Vec<u8>,
    pub succeeded: bool,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredSideChain {
    pub tx_hash: String,
    pub genesis_block_hash: String,
    pub register_info: Vec<u8>,
    pub height: u32,
}
