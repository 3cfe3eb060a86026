//! Core types shared by the proof model

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::codec::{self, CodecError, Decodable, Decoder, Encodable, Encoder};

/// 32-byte hash in internal (little-endian) byte order.
///
/// The textual form reverses the bytes, matching how node RPCs print block
/// and transaction ids. Only the raw bytes are ever serialized on the wire.
#[derive(Clone, Copy, Default, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub const ZERO: Hash256 = Hash256([0u8; 32]);

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Bytes in display order (most significant first).
    pub fn reversed(&self) -> [u8; 32] {
        let mut out = self.0;
        out.reverse();
        out
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.reversed())
    }

    pub fn from_hex(s: &str) -> Result<Self, CodecError> {
        let raw = hex::decode(s).map_err(|e| CodecError::InvalidData("hash256", e.to_string()))?;
        let mut bytes: [u8; 32] = raw
            .try_into()
            .map_err(|v: Vec<u8>| CodecError::InvalidData("hash256", format!("{} bytes", v.len())))?;
        bytes.reverse();
        Ok(Hash256(bytes))
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Hash256(bytes)
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", self.to_hex())
    }
}

impl FromStr for Hash256 {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Hash256::from_hex(s)
    }
}

impl Serialize for Hash256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Hash256::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

impl Encodable for Hash256 {
    fn encode_to(&self, enc: &mut Encoder) {
        enc.write_bytes(&self.0);
    }
}

impl Decodable for Hash256 {
    const MIN_ENCODED_LEN: usize = 32;

    fn decode_from(dec: &mut Decoder<'_>) -> codec::Result<Self> {
        Ok(Hash256(dec.read_array()?))
    }
}

/// Sibling hashes from leaf to root plus the leaf position.
///
/// Bit `i` of `index` tells whether the running hash is the right (1) or
/// left (0) child at level `i`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleBranch {
    pub hashes: Vec<Hash256>,
    pub index: u32,
}

impl MerkleBranch {
    pub fn new(hashes: Vec<Hash256>, index: u32) -> Self {
        Self { hashes, index }
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}

/// Count-prefixed hashes followed by a `u32` index, the layout both proof
/// types use for their branches.
impl Encodable for MerkleBranch {
    fn encode_to(&self, enc: &mut Encoder) {
        enc.write_seq(&self.hashes);
        enc.write_u32_le(self.index);
    }
}

impl Decodable for MerkleBranch {
    const MIN_ENCODED_LEN: usize = 5;

    fn decode_from(dec: &mut Decoder<'_>) -> codec::Result<Self> {
        let hashes = dec.read_seq()?;
        let index = dec.read_u32_le()?;
        Ok(Self { hashes, index })
    }
}
