//! Main-chain transactions as they appear on the wire.

use crate::codec::{self, CodecError, Decodable, Decoder, Encodable, Encoder};
use crate::crypto::sha256d;
use crate::Hash256;

pub mod tx_type {
    pub const COIN_BASE: u8 = 0x00;
    pub const REGISTER_ASSET: u8 = 0x01;
    pub const TRANSFER_ASSET: u8 = 0x02;
    pub const RECORD: u8 = 0x03;
    pub const DEPLOY: u8 = 0x04;
    pub const SIDE_CHAIN_POW: u8 = 0x05;
    pub const RECHARGE_TO_SIDE_CHAIN: u8 = 0x06;
    pub const WITHDRAW_FROM_SIDE_CHAIN: u8 = 0x07;
    pub const TRANSFER_CROSS_CHAIN_ASSET: u8 = 0x08;
}

pub const PROGRAM_HASH_LEN: usize = 21;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct OutPoint {
    pub tx_id: Hash256,
    pub index: u16,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Input {
    pub previous: OutPoint,
    pub sequence: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Output {
    pub asset_id: Hash256,
    /// fixed-point, 8 decimal places
    pub value: i64,
    pub output_lock: u32,
    pub program_hash: [u8; PROGRAM_HASH_LEN],
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attribute {
    pub usage: u8,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Program {
    pub code: Vec<u8>,
    pub parameter: Vec<u8>,
}

/// The payload is kept as the raw bytes its type serializes to. It has no
/// length prefix on the wire, so decoding walks the per-type layout in
/// [`read_payload`]; typed views such as [`SideMiningPayload`] parse it on
/// demand.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub tx_type: u8,
    pub payload_version: u8,
    pub payload: Vec<u8>,
    pub attributes: Vec<Attribute>,
    pub inputs: Vec<Input>,
    pub outputs: Vec<Output>,
    pub lock_time: u32,
    pub programs: Vec<Program>,
}

impl Transaction {
    fn encode_unsigned(&self, enc: &mut Encoder) {
        enc.write_u8(self.tx_type);
        enc.write_u8(self.payload_version);
        enc.write_bytes(&self.payload);
        enc.write_seq(&self.attributes);
        enc.write_seq(&self.inputs);
        enc.write_seq(&self.outputs);
        enc.write_u32_le(self.lock_time);
    }

    /// Transaction id: double hash of everything except the programs.
    pub fn hash(&self) -> Hash256 {
        let mut enc = Encoder::new();
        self.encode_unsigned(&mut enc);
        sha256d(&enc.into_inner())
    }

    pub fn is_coinbase(&self) -> bool {
        self.tx_type == tx_type::COIN_BASE
    }

    pub fn is_side_mining(&self) -> bool {
        self.tx_type == tx_type::SIDE_CHAIN_POW
    }

    pub fn side_mining_payload(&self) -> codec::Result<SideMiningPayload> {
        if !self.is_side_mining() {
            return Err(CodecError::InvalidData(
                "side mining payload",
                format!("transaction type {:#04x}", self.tx_type),
            ));
        }
        SideMiningPayload::from_payload(&self.payload)
    }
}

impl Encodable for OutPoint {
    fn encode_to(&self, enc: &mut Encoder) {
        self.tx_id.encode_to(enc);
        enc.write_u16_le(self.index);
    }
}

impl Decodable for OutPoint {
    const MIN_ENCODED_LEN: usize = 34;

    fn decode_from(dec: &mut Decoder<'_>) -> codec::Result<Self> {
        Ok(Self {
            tx_id: Hash256::decode_from(dec)?,
            index: dec.read_u16_le()?,
        })
    }
}

impl Encodable for Input {
    fn encode_to(&self, enc: &mut Encoder) {
        self.previous.encode_to(enc);
        enc.write_u32_le(self.sequence);
    }
}

impl Decodable for Input {
    const MIN_ENCODED_LEN: usize = 38;

    fn decode_from(dec: &mut Decoder<'_>) -> codec::Result<Self> {
        Ok(Self {
            previous: OutPoint::decode_from(dec)?,
            sequence: dec.read_u32_le()?,
        })
    }
}

impl Encodable for Output {
    fn encode_to(&self, enc: &mut Encoder) {
        self.asset_id.encode_to(enc);
        enc.write_i64_le(self.value);
        enc.write_u32_le(self.output_lock);
        enc.write_bytes(&self.program_hash);
    }
}

impl Decodable for Output {
    const MIN_ENCODED_LEN: usize = 32 + 8 + 4 + PROGRAM_HASH_LEN;

    fn decode_from(dec: &mut Decoder<'_>) -> codec::Result<Self> {
        Ok(Self {
            asset_id: Hash256::decode_from(dec)?,
            value: dec.read_i64_le()?,
            output_lock: dec.read_u32_le()?,
            program_hash: dec.read_array()?,
        })
    }
}

impl Encodable for Attribute {
    fn encode_to(&self, enc: &mut Encoder) {
        enc.write_u8(self.usage);
        enc.write_var_bytes(&self.data);
    }
}

impl Decodable for Attribute {
    const MIN_ENCODED_LEN: usize = 2;

    fn decode_from(dec: &mut Decoder<'_>) -> codec::Result<Self> {
        Ok(Self {
            usage: dec.read_u8()?,
            data: dec.read_var_bytes()?,
        })
    }
}

impl Encodable for Program {
    fn encode_to(&self, enc: &mut Encoder) {
        enc.write_var_bytes(&self.parameter);
        enc.write_var_bytes(&self.code);
    }
}

impl Decodable for Program {
    const MIN_ENCODED_LEN: usize = 2;

    fn decode_from(dec: &mut Decoder<'_>) -> codec::Result<Self> {
        let parameter = dec.read_var_bytes()?;
        let code = dec.read_var_bytes()?;
        Ok(Self { code, parameter })
    }
}

impl Encodable for Transaction {
    fn encode_to(&self, enc: &mut Encoder) {
        self.encode_unsigned(enc);
        enc.write_seq(&self.programs);
    }
}

impl Decodable for Transaction {
    const MIN_ENCODED_LEN: usize = 10;

    fn decode_from(dec: &mut Decoder<'_>) -> codec::Result<Self> {
        let tx_type = dec.read_u8()?;
        let payload_version = dec.read_u8()?;
        Ok(Self {
            tx_type,
            payload_version,
            payload: read_payload(dec, tx_type, payload_version)?,
            attributes: dec.read_seq()?,
            inputs: dec.read_seq()?,
            outputs: dec.read_seq()?,
            lock_time: dec.read_u32_le()?,
            programs: dec.read_seq()?,
        })
    }
}

const RECHARGE_PAYLOAD_V0: u8 = 0x00;

/// Reads the payload of a `tx_type` transaction and returns its raw bytes.
pub fn read_payload(dec: &mut Decoder<'_>, tx_type: u8, payload_version: u8) -> codec::Result<Vec<u8>> {
    dec.capture(|dec| match tx_type {
        tx_type::COIN_BASE => dec.read_var_bytes().map(drop),
        tx_type::REGISTER_ASSET => {
            dec.read_var_bytes()?; // name
            dec.read_var_bytes()?; // description
            dec.read_array::<3>()?; // precision, asset type, record type
            dec.read_i64_le()?;
            dec.read_array::<PROGRAM_HASH_LEN>().map(drop)
        }
        tx_type::TRANSFER_ASSET => Ok(()),
        tx_type::RECORD => {
            dec.read_var_bytes()?;
            dec.read_var_bytes().map(drop)
        }
        tx_type::SIDE_CHAIN_POW => SideMiningPayload::decode_from(dec).map(drop),
        tx_type::RECHARGE_TO_SIDE_CHAIN if payload_version == RECHARGE_PAYLOAD_V0 => {
            dec.read_var_bytes()?; // merkle proof
            dec.read_var_bytes().map(drop)
        }
        tx_type::RECHARGE_TO_SIDE_CHAIN => Hash256::decode_from(dec).map(drop),
        tx_type::WITHDRAW_FROM_SIDE_CHAIN => {
            dec.read_u32_le()?;
            dec.read_var_bytes()?; // genesis block address
            dec.read_seq::<Hash256>().map(drop)
        }
        tx_type::TRANSFER_CROSS_CHAIN_ASSET => {
            let count = dec.read_len(10)?;
            for _ in 0..count {
                dec.read_var_bytes()?; // cross chain address
                dec.read_var_uint()?; // output index
                dec.read_i64_le()?;
            }
            Ok(())
        }
        other => Err(CodecError::InvalidData("payload", format!("unsupported transaction type {other:#04x}"))),
    })
}

/// Payload of a side-mining transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SideMiningPayload {
    pub side_block_hash: Hash256,
    pub side_genesis_hash: Hash256,
    pub block_height: u32,
    pub signed_data: Vec<u8>,
}

impl SideMiningPayload {
    /// Byte offset of the side block hash inside the payload.
    pub const SIDE_BLOCK_HASH_OFFSET: usize = 0;
    /// Byte offset of the side chain genesis hash inside the payload.
    pub const SIDE_GENESIS_HASH_OFFSET: usize = 32;

    pub fn from_payload(payload: &[u8]) -> codec::Result<Self> {
        Self::decode(payload)
    }
}

impl Encodable for SideMiningPayload {
    fn encode_to(&self, enc: &mut Encoder) {
        self.side_block_hash.encode_to(enc);
        self.side_genesis_hash.encode_to(enc);
        enc.write_u32_le(self.block_height);
        enc.write_var_bytes(&self.signed_data);
    }
}

impl Decodable for SideMiningPayload {
    fn decode_from(dec: &mut Decoder<'_>) -> codec::Result<Self> {
        Ok(Self {
            side_block_hash: Hash256::decode_from(dec)?,
            side_genesis_hash: Hash256::decode_from(dec)?,
            block_height: dec.read_u32_le()?,
            signed_data: dec.read_var_bytes()?,
        })
    }
}
