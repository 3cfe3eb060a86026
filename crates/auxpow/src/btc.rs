//! Parent-chain coinbase and header. Both are `bitcoin` consensus types;
//! this module bridges them into the local codec and [`Hash256`].

use bitcoin::block::{self, Header};
use bitcoin::consensus::encode::{deserialize_partial, serialize};
use bitcoin::hashes::Hash;
use bitcoin::{absolute, transaction, BlockHash, CompactTarget, ScriptBuf, Sequence, TxIn, TxMerkleNode, Witness};

use crate::codec::{self, CodecError, Decodable, Decoder, Encodable, Encoder};
use crate::Hash256;

pub use bitcoin::block::Header as BtcHeader;
pub use bitcoin::Transaction as BtcTransaction;

pub const BTC_HEADER_LEN: usize = 80;

pub fn txid(tx: &BtcTransaction) -> Hash256 {
    Hash256(tx.compute_txid().to_byte_array())
}

pub fn block_hash(header: &BtcHeader) -> Hash256 {
    Hash256(header.block_hash().to_byte_array())
}

pub fn merkle_root(header: &BtcHeader) -> Hash256 {
    Hash256(header.merkle_root.to_byte_array())
}

/// True when the header hash is at or below the target its own `bits` encode.
pub fn meets_target(header: &BtcHeader) -> bool {
    header.validate_pow(header.target()).is_ok()
}

/// Coinbase with one null input and an empty script, used as a placeholder
/// proof.
pub fn empty_coinbase() -> BtcTransaction {
    BtcTransaction {
        version: transaction::Version::ONE,
        lock_time: absolute::LockTime::ZERO,
        input: vec![TxIn {
            previous_output: bitcoin::OutPoint::null(),
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: vec![],
    }
}

pub fn empty_header() -> BtcHeader {
    Header {
        version: block::Version::ONE,
        prev_blockhash: BlockHash::all_zeros(),
        merkle_root: TxMerkleNode::all_zeros(),
        time: 0,
        bits: CompactTarget::from_consensus(0),
        nonce: 0,
    }
}

fn read_consensus<T: bitcoin::consensus::Decodable>(dec: &mut Decoder<'_>, what: &'static str) -> codec::Result<T> {
    dec.read_external(|buf| deserialize_partial(buf).map_err(|e| CodecError::InvalidData(what, e.to_string())))
}

impl Encodable for BtcTransaction {
    fn encode_to(&self, enc: &mut Encoder) {
        enc.write_bytes(&serialize(self));
    }
}

impl Decodable for BtcTransaction {
    const MIN_ENCODED_LEN: usize = 10;

    fn decode_from(dec: &mut Decoder<'_>) -> codec::Result<Self> {
        read_consensus(dec, "parent coinbase")
    }
}

impl Encodable for BtcHeader {
    fn encode_to(&self, enc: &mut Encoder) {
        enc.write_bytes(&serialize(self));
    }
}

impl Decodable for BtcHeader {
    const MIN_ENCODED_LEN: usize = BTC_HEADER_LEN;

    fn decode_from(dec: &mut Decoder<'_>) -> codec::Result<Self> {
        read_consensus(dec, "parent header")
    }
}
