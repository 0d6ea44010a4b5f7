//! Native-contract invocation transactions for the relay chain.

use alloy_primitives::B256;
use sha2::{Digest, Sha256};

use crate::codec::Sink;
use crate::error::Result;
use crate::wallet::Account;

/// Native contract hosting the peer-chain light clients.
pub const HEADER_SYNC_CONTRACT: [u8; 20] = contract_address(0x04);
/// Native contract verifying and dispatching cross-chain requests.
pub const CROSS_CHAIN_MANAGER_CONTRACT: [u8; 20] = contract_address(0x05);

pub const SYNC_BLOCK_HEADER: &str = "syncBlockHeader";
pub const IMPORT_OUTER_TRANSFER: &str = "importOuterTransfer";

/// Storage prefixes inside the header-sync contract.
pub const CONSENSUS_PEER_PREFIX: &[u8] = b"consensusPeer";
pub const HEADER_INDEX_PREFIX: &[u8] = b"headerIndex";

const TX_TYPE_INVOKE: u8 = 0xd1;
const SYSCALL: u8 = 0x68;
const NATIVE_INVOKE_NAME: &[u8] = b"Native.Invoke";
const INVOKE_GAS_LIMIT: u64 = 200_000;

const fn contract_address(tag: u8) -> [u8; 20] {
    let mut addr = [0u8; 20];
    addr[0] = tag;
    addr
}

/// Argument struct for `syncBlockHeader`.
pub fn sync_block_header_args(chain_id: u64, relayer: &[u8; 20], headers: &[Vec<u8>]) -> Vec<u8> {
    let mut sink = Sink::new();
    sink.write_u64_le(chain_id);
    sink.write_var_bytes(relayer);
    sink.write_var_uint(headers.len() as u64);
    for header in headers {
        sink.write_var_bytes(header);
    }
    sink.into_bytes()
}

/// Argument struct for `importOuterTransfer`.
pub fn import_outer_transfer_args(
    source_chain_id: u64,
    height: u32,
    proof: &[u8],
    relayer: &[u8; 20],
    cross_chain_msg: &[u8],
) -> Vec<u8> {
    let mut sink = Sink::new();
    sink.write_u64_le(source_chain_id);
    // Source transaction bytes travel inside the proof for this chain pair.
    sink.write_var_bytes(&[]);
    sink.write_u32_le(height);
    sink.write_var_bytes(proof);
    sink.write_var_bytes(relayer);
    sink.write_var_bytes(cross_chain_msg);
    sink.into_bytes()
}

/// `args || method || contract || version || SYSCALL Native.Invoke`.
fn native_invoke_code(contract: &[u8; 20], method: &str, args: &[u8]) -> Vec<u8> {
    let mut sink = Sink::new();
    sink.write_var_bytes(args);
    sink.write_var_bytes(method.as_bytes());
    sink.write_var_bytes(contract);
    sink.write_byte(0); // native contract version
    sink.write_byte(SYSCALL);
    sink.write_var_bytes(NATIVE_INVOKE_NAME);
    sink.into_bytes()
}

/// Build, sign and serialize a native invocation, returning the raw
/// transaction hex and its hash.
pub fn build_signed_native_tx(
    contract: &[u8; 20],
    method: &str,
    args: &[u8],
    nonce: u32,
    account: &Account,
) -> Result<(String, String)> {
    let code = native_invoke_code(contract, method, args);

    let mut unsigned = Sink::new();
    unsigned.write_byte(0); // version
    unsigned.write_byte(TX_TYPE_INVOKE);
    unsigned.write_u32_le(nonce);
    unsigned.write_u64_le(0); // gas price
    unsigned.write_u64_le(INVOKE_GAS_LIMIT);
    unsigned.write_bytes(&account.script_hash()); // payer
    unsigned.write_var_bytes(&code);
    unsigned.write_byte(0); // attributes
    let unsigned = unsigned.into_bytes();

    let digest = tx_digest(&unsigned);
    let signature = account.sign_digest(digest)?;

    let mut full = Sink::new();
    full.write_bytes(&unsigned);
    // One single-key signature block: M = 1 of 1.
    full.write_var_uint(1);
    full.write_var_uint(1);
    full.write_var_bytes(&signature);
    full.write_var_uint(1);
    full.write_var_bytes(&account.public_key());
    full.write_var_uint(1);

    Ok((const_hex::encode(full.into_bytes()), display_hash(digest)))
}

fn tx_digest(unsigned: &[u8]) -> B256 {
    let first = Sha256::digest(unsigned);
    B256::from_slice(&Sha256::digest(first))
}

/// Hashes are displayed reversed, matching the RPC form.
fn display_hash(digest: B256) -> String {
    let mut bytes = digest.0;
    bytes.reverse();
    const_hex::encode(bytes)
}
