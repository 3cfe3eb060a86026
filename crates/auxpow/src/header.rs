use crate::auxpow::AuxPow;
use crate::codec::{self, CodecError, Decodable, Decoder, Encodable, Encoder};
use crate::crypto::sha256d;
use crate::{Hash256, ProofError};

/// Trailing marker written after the embedded aux proof.
const AUX_POW_TERMINATOR: u8 = 1;

/// Main-chain block header with its merged-mining proof.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MainBlockHeader {
    pub version: u32,
    pub previous: Hash256,
    pub transactions_root: Hash256,
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
    pub height: u32,
    pub aux_pow: AuxPow,
}

impl MainBlockHeader {
    fn encode_no_aux(&self, enc: &mut Encoder) {
        enc.write_u32_le(self.version);
        self.previous.encode_to(enc);
        self.transactions_root.encode_to(enc);
        enc.write_u32_le(self.timestamp);
        enc.write_u32_le(self.bits);
        enc.write_u32_le(self.nonce);
        enc.write_u32_le(self.height);
    }

    /// Block hash; the aux proof is not part of it.
    pub fn hash(&self) -> Hash256 {
        let mut enc = Encoder::new();
        self.encode_no_aux(&mut enc);
        sha256d(&enc.into_inner())
    }

    pub fn check_aux_pow(&self, chain_id: u32) -> Result<(), ProofError> {
        self.aux_pow.check(&self.hash(), chain_id)
    }
}

impl Encodable for MainBlockHeader {
    fn encode_to(&self, enc: &mut Encoder) {
        self.encode_no_aux(enc);
        self.aux_pow.encode_to(enc);
        enc.write_u8(AUX_POW_TERMINATOR);
    }
}

impl Decodable for MainBlockHeader {
    fn decode_from(dec: &mut Decoder<'_>) -> codec::Result<Self> {
        let header = Self {
            version: dec.read_u32_le()?,
            previous: Hash256::decode_from(dec)?,
            transactions_root: Hash256::decode_from(dec)?,
            timestamp: dec.read_u32_le()?,
            bits: dec.read_u32_le()?,
            nonce: dec.read_u32_le()?,
            height: dec.read_u32_le()?,
            aux_pow: AuxPow::decode_from(dec)?,
        };
        let terminator = dec.read_u8()?;
        if terminator != AUX_POW_TERMINATOR {
            return Err(CodecError::InvalidData("block header", format!("terminator {terminator:#04x}")));
        }
        Ok(header)
    }
}
