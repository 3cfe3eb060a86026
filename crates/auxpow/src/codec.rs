//! Consensus binary codec.
//!
//! Integers are fixed-width little-endian, hashes are written verbatim and
//! every variable-length sequence is prefixed with a var-uint count:
//!
//! | value             | encoding           |
//! |-------------------|--------------------|
//! | `< 0xFD`          | 1 byte             |
//! | `<= 0xFFFF`       | `0xFD` + `u16` LE  |
//! | `<= 0xFFFF_FFFF`  | `0xFE` + `u32` LE  |
//! | otherwise         | `0xFF` + `u64` LE  |

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("unexpected end of buffer: needed {needed} bytes, {remaining} left")]
    EndOfBuffer { needed: usize, remaining: usize },

    #[error("trailing data: {0} bytes")]
    TrailingBytes(usize),

    #[error("non-canonical var-uint")]
    NonCanonicalVarUint,

    #[error("length exceeded: {0} > {1}")]
    LengthExceeded(u64, usize),

    #[error("invalid data in {0}: {1}")]
    InvalidData(&'static str, String),
}

pub type Result<T> = std::result::Result<T, CodecError>;

/// Append-only writer over a growable buffer.
#[derive(Default)]
pub struct Encoder {
    buf: BytesMut,
}

impl Encoder {
    pub fn new() -> Self {
        Self { buf: BytesMut::new() }
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn write_u16_le(&mut self, v: u16) {
        self.buf.put_u16_le(v);
    }

    pub fn write_u32_le(&mut self, v: u32) {
        self.buf.put_u32_le(v);
    }

    pub fn write_i32_le(&mut self, v: i32) {
        self.buf.put_i32_le(v);
    }

    pub fn write_u64_le(&mut self, v: u64) {
        self.buf.put_u64_le(v);
    }

    pub fn write_i64_le(&mut self, v: i64) {
        self.buf.put_i64_le(v);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    pub fn write_var_uint(&mut self, v: u64) {
        if v < 0xFD {
            self.buf.put_u8(v as u8);
        } else if v <= 0xFFFF {
            self.buf.put_u8(0xFD);
            self.buf.put_u16_le(v as u16);
        } else if v <= 0xFFFF_FFFF {
            self.buf.put_u8(0xFE);
            self.buf.put_u32_le(v as u32);
        } else {
            self.buf.put_u8(0xFF);
            self.buf.put_u64_le(v);
        }
    }

    pub fn write_var_bytes(&mut self, bytes: &[u8]) {
        self.write_var_uint(bytes.len() as u64);
        self.buf.put_slice(bytes);
    }

    /// Count-prefixed sequence.
    pub fn write_seq<T: Encodable>(&mut self, items: &[T]) {
        self.write_var_uint(items.len() as u64);
        for item in items {
            item.encode_to(self);
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf.to_vec()
    }
}

/// Cursor over a borrowed byte slice. Every read checks the remaining length
/// first so malformed input surfaces as [`CodecError`] instead of a panic.
pub struct Decoder<'a> {
    buf: &'a [u8],
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    pub fn is_empty(&self) -> bool {
        !self.buf.has_remaining()
    }

    /// Fails if any input is left unread.
    pub fn finish(self) -> Result<()> {
        match self.buf.remaining() {
            0 => Ok(()),
            n => Err(CodecError::TrailingBytes(n)),
        }
    }

    fn need(&self, needed: usize) -> Result<()> {
        let remaining = self.buf.remaining();
        if remaining < needed {
            return Err(CodecError::EndOfBuffer { needed, remaining });
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_u16_le(&mut self) -> Result<u16> {
        self.need(2)?;
        Ok(self.buf.get_u16_le())
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        self.need(4)?;
        Ok(self.buf.get_u32_le())
    }

    pub fn read_i32_le(&mut self) -> Result<i32> {
        self.need(4)?;
        Ok(self.buf.get_i32_le())
    }

    pub fn read_u64_le(&mut self) -> Result<u64> {
        self.need(8)?;
        Ok(self.buf.get_u64_le())
    }

    pub fn read_i64_le(&mut self) -> Result<i64> {
        self.need(8)?;
        Ok(self.buf.get_i64_le())
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        self.need(N)?;
        let mut out = [0u8; N];
        self.buf.copy_to_slice(&mut out);
        Ok(out)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        self.need(len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head.to_vec())
    }

    pub fn read_var_uint(&mut self) -> Result<u64> {
        let tag = self.read_u8()?;
        let (value, min) = match tag {
            0xFD => (self.read_u16_le()? as u64, 0xFD),
            0xFE => (self.read_u32_le()? as u64, 0x1_0000),
            0xFF => (self.read_u64_le()?, 0x1_0000_0000),
            small => return Ok(small as u64),
        };
        if value < min {
            return Err(CodecError::NonCanonicalVarUint);
        }
        Ok(value)
    }

    /// Reads a count prefix and rejects it when `count * min_item_size`
    /// cannot possibly fit in the rest of the input.
    pub fn read_len(&mut self, min_item_size: usize) -> Result<usize> {
        let count = self.read_var_uint()?;
        let remaining = self.buf.remaining();
        let fits = count
            .checked_mul(min_item_size.max(1) as u64)
            .map(|bytes| bytes <= remaining as u64)
            .unwrap_or(false);
        if !fits {
            return Err(CodecError::LengthExceeded(count, remaining));
        }
        Ok(count as usize)
    }

    pub fn read_var_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.read_len(1)?;
        self.read_bytes(len)
    }

    pub fn read_seq<T: Decodable>(&mut self) -> Result<Vec<T>> {
        let count = self.read_len(T::MIN_ENCODED_LEN)?;
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(T::decode_from(self)?);
        }
        Ok(items)
    }

    /// Runs `walk` over the input and returns the raw bytes it consumed.
    pub fn capture<F>(&mut self, walk: F) -> Result<Vec<u8>>
    where
        F: FnOnce(&mut Decoder<'a>) -> Result<()>,
    {
        let before = self.buf;
        walk(self)?;
        let used = before.len() - self.buf.len();
        Ok(before[..used].to_vec())
    }

    /// Hands the unread input to a foreign decoder that reports how many
    /// bytes it used.
    pub fn read_external<T, F>(&mut self, parse: F) -> Result<T>
    where
        F: FnOnce(&'a [u8]) -> Result<(T, usize)>,
    {
        let (value, used) = parse(self.buf)?;
        self.need(used)?;
        self.buf.advance(used);
        Ok(value)
    }
}

pub trait Encodable {
    fn encode_to(&self, enc: &mut Encoder);

    fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        self.encode_to(&mut enc);
        enc.into_inner()
    }
}

pub trait Decodable: Sized {
    /// Lower bound on the encoded size of one value, used to reject absurd
    /// sequence counts before allocating.
    const MIN_ENCODED_LEN: usize = 1;

    fn decode_from(dec: &mut Decoder<'_>) -> Result<Self>;

    /// Decodes a complete value; trailing bytes are an error.
    fn decode(bytes: &[u8]) -> Result<Self> {
        let mut dec = Decoder::new(bytes);
        let value = Self::decode_from(&mut dec)?;
        dec.finish()?;
        Ok(value)
    }
}
