//! Contract-filter behavior of the proof builder.

use alloy_primitives::B256;

use crosslink_relayer::chains::relay::{RelayClient, types::RelayHeader};
use crosslink_relayer::codec::{Sink, merkle};
use crosslink_relayer::proofs::{CrossChainTxParameter, ProofBuilder, ToMerkleValue};

fn encode_merkle_value(value: &ToMerkleValue) -> Vec<u8> {
    let mut sink = Sink::new();
    sink.write_var_bytes(&value.tx_hash);
    sink.write_u64_le(value.from_chain_id);
    sink.write_var_bytes(&value.tx_param.tx_hash);
    sink.write_var_bytes(&value.tx_param.cross_chain_id);
    sink.write_var_bytes(&value.tx_param.from_contract);
    sink.write_u64_le(value.tx_param.to_chain_id);
    sink.write_var_bytes(&value.tx_param.to_contract);
    sink.write_var_bytes(&value.tx_param.method);
    sink.write_var_bytes(&value.tx_param.args);
    sink.into_bytes()
}

fn request_for(to_contract: [u8; 20]) -> ToMerkleValue {
    ToMerkleValue {
        tx_hash: vec![0x01; 32],
        from_chain_id: 1,
        tx_param: CrossChainTxParameter {
            tx_hash: vec![0x02; 32],
            cross_chain_id: vec![0x0A],
            from_contract: vec![0x03; 20],
            to_chain_id: 4,
            to_contract: to_contract.to_vec(),
            method: b"unlock".to_vec(),
            args: Vec::new(),
        },
    }
}

/// A single-leaf audit path and the header committing its root.
fn path_and_header(to_contract: [u8; 20]) -> (Vec<u8>, RelayHeader) {
    let leaf = encode_merkle_value(&request_for(to_contract));
    let mut sink = Sink::new();
    sink.write_var_bytes(&leaf);
    let path = sink.into_bytes();
    let root = merkle::hash_leaf(&leaf);

    let header = RelayHeader {
        version: 0,
        chain_id: 1,
        prev_block_hash: B256::ZERO,
        transactions_root: B256::ZERO,
        cross_state_root: root,
        block_root: B256::ZERO,
        timestamp: 0,
        height: 100,
        consensus_data: 0,
        consensus_payload: Vec::new(),
        next_bookkeeper: [0u8; 20],
        bookkeepers: Vec::new(),
        sig_data: Vec::new(),
    };
    (path, header)
}

fn builder_client() -> RelayClient {
    // Never contacted: the filter decision is local.
    RelayClient::new("http://127.0.0.1:1").unwrap()
}

#[test]
fn mismatched_contract_is_filtered() {
    let monitored = [0x42u8; 20];
    let (path, header) = path_and_header([0x99u8; 20]);
    let client = builder_client();
    let builder = ProofBuilder::new(&client, Some(monitored));
    assert!(!builder.passes_filter(&path, &header).unwrap());
}

#[test]
fn matching_contract_passes() {
    let monitored = [0x42u8; 20];
    let (path, header) = path_and_header(monitored);
    let client = builder_client();
    let builder = ProofBuilder::new(&client, Some(monitored));
    assert!(builder.passes_filter(&path, &header).unwrap());
}

#[test]
fn no_filter_passes_without_verification() {
    let client = builder_client();
    let builder = ProofBuilder::new(&client, None);
    // Even a garbage path passes: the filter never runs.
    let (_, header) = path_and_header([0u8; 20]);
    assert!(builder.passes_filter(&[0xFF, 0x00], &header).unwrap());
}

#[test]
fn corrupted_path_is_an_error() {
    let monitored = [0x42u8; 20];
    let (mut path, header) = path_and_header(monitored);
    let last = path.len() - 1;
    path[last] ^= 0x01;
    let client = builder_client();
    let builder = ProofBuilder::new(&client, Some(monitored));
    assert!(builder.passes_filter(&path, &header).is_err());
}
