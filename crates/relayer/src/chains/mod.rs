//! Thin adapters over the two chains' JSON-RPC surfaces.
//!
//! The clients shape requests and parse responses; retry policy and error
//! classification live in the sync engine.

pub mod relay;
pub mod target;

use crate::error::{RelayError, Result};

/// Compare an RPC-form contract hash against 20 raw script-hash bytes.
/// RPC responses print hashes big-endian (optionally 0x-prefixed) while
/// wire and config forms are little-endian, so both orientations match.
pub fn contract_hex_matches(hex_str: &str, contract: &[u8; 20]) -> bool {
    let trimmed = hex_str.trim_start_matches("0x");
    let Ok(bytes) = const_hex::decode(trimmed) else {
        return false;
    };
    if bytes.len() != 20 {
        return false;
    }
    bytes == contract || bytes.iter().rev().eq(contract.iter())
}

/// Decode a displayed (big-endian) 32-byte hash into wire (little-endian)
/// order.
pub fn wire_hash_from_rpc(hex_str: &str) -> Result<[u8; 32]> {
    let trimmed = hex_str.trim_start_matches("0x");
    let bytes = const_hex::decode(trimmed)
        .map_err(|e| RelayError::ChainData(format!("hash {hex_str}: {e}")))?;
    let mut out: [u8; 32] = bytes
        .try_into()
        .map_err(|_| RelayError::ChainData(format!("hash {hex_str}: not 32 bytes")))?;
    out.reverse();
    Ok(out)
}
