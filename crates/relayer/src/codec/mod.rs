//! Wire codec for the composite values both chains exchange.
//!
//! Byte strings are length-prefixed with the 0xFD/0xFE/0xFF variable-length
//! integer convention; fixed-width integers are little-endian; 255-bit
//! amounts are 32 big-endian bytes.

use alloy_primitives::{B256, U256};

use crate::error::{RelayError, Result};

pub mod merkle;

/// Cursor-based reader over a borrowed byte slice.
pub struct Source<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Source<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(RelayError::Truncated {
                offset: self.pos,
                needed: n - self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn read_byte(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u16_le(&mut self) -> Result<u16> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_i32_le(&mut self) -> Result<i32> {
        Ok(self.read_u32_le()? as i32)
    }

    pub fn read_u64_le(&mut self) -> Result<u64> {
        let b = self.read_bytes(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_le_bytes(arr))
    }

    /// First byte is the discriminator: below 0xFD it is the value itself,
    /// 0xFD/0xFE/0xFF select a 2/4/8-byte little-endian extension.
    pub fn read_var_uint(&mut self) -> Result<u64> {
        match self.read_byte()? {
            0xFD => Ok(self.read_u16_le()? as u64),
            0xFE => Ok(self.read_u32_le()? as u64),
            0xFF => self.read_u64_le(),
            literal => Ok(literal as u64),
        }
    }

    pub fn read_var_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.read_var_uint()?;
        self.read_bytes(len as usize)
    }

    pub fn read_var_string(&mut self) -> Result<String> {
        let bytes = self.read_var_bytes()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| RelayError::ChainData(format!("invalid utf-8 string: {e}")))
    }

    /// 32 big-endian bytes as an unsigned integer.
    pub fn read_u255(&mut self) -> Result<U256> {
        Ok(U256::from_be_slice(self.read_bytes(32)?))
    }

    pub fn read_hash(&mut self) -> Result<B256> {
        Ok(B256::from_slice(self.read_bytes(32)?))
    }
}

/// Append-only writer mirroring [`Source`].
#[derive(Default)]
pub struct Sink {
    buf: Vec<u8>,
}

impl Sink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_byte(&mut self, b: u8) {
        self.buf.push(b);
    }

    pub fn write_u16_le(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_u32_le(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_i32_le(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_u64_le(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Minimal-width encoding: the discriminator escalates only when the
    /// value does not fit the previous width.
    pub fn write_var_uint(&mut self, v: u64) {
        if v < 0xFD {
            self.write_byte(v as u8);
        } else if v <= 0xFFFF {
            self.write_byte(0xFD);
            self.write_u16_le(v as u16);
        } else if v <= 0xFFFF_FFFF {
            self.write_byte(0xFE);
            self.write_u32_le(v as u32);
        } else {
            self.write_byte(0xFF);
            self.write_u64_le(v);
        }
    }

    pub fn write_var_bytes(&mut self, bytes: &[u8]) {
        self.write_var_uint(bytes.len() as u64);
        self.write_bytes(bytes);
    }

    pub fn write_var_string(&mut self, s: &str) {
        self.write_var_bytes(s.as_bytes());
    }

    pub fn write_hash(&mut self, h: &B256) {
        self.write_bytes(h.as_slice());
    }
}
