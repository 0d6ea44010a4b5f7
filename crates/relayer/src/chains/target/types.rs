//! Target-chain RPC DTOs and the wire forms the engine re-serializes.

use serde::Deserialize;

use crate::chains::wire_hash_from_rpc;
use crate::codec::Sink;
use crate::error::{RelayError, Result};
use crate::wallet::address_to_script_hash;

pub const INVOCATION_TX_TYPE: &str = "InvocationTransaction";
pub const VM_STATE_FAULT: &str = "FAULT";

#[derive(Debug, Clone, Deserialize)]
pub struct TargetBlock {
    pub hash: String,
    pub index: u32,
    #[serde(rename = "nextconsensus")]
    pub next_consensus: String,
    #[serde(default)]
    pub tx: Vec<TargetTxEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TargetTxEntry {
    pub txid: String,
    #[serde(rename = "type")]
    pub tx_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WitnessDto {
    pub invocation: String,
    pub verification: String,
}

/// Verbose block header as returned by the RPC; convertible back into the
/// wire form the relay chain's light client verifies.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetBlockHeader {
    pub version: u32,
    #[serde(rename = "previousblockhash")]
    pub prev_hash: String,
    #[serde(rename = "merkleroot")]
    pub merkle_root: String,
    pub time: u32,
    pub index: u32,
    /// Consensus data, big-endian hex.
    pub nonce: String,
    #[serde(rename = "nextconsensus")]
    pub next_consensus: String,
    pub script: WitnessDto,
}

impl TargetBlockHeader {
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut sink = Sink::new();
        sink.write_u32_le(self.version);
        sink.write_bytes(&wire_hash_from_rpc(&self.prev_hash)?);
        sink.write_bytes(&wire_hash_from_rpc(&self.merkle_root)?);
        sink.write_u32_le(self.time);
        sink.write_u32_le(self.index);
        let consensus_data = u64::from_str_radix(self.nonce.trim_start_matches("0x"), 16)
            .map_err(|e| RelayError::ChainData(format!("header nonce: {e}")))?;
        sink.write_u64_le(consensus_data);
        sink.write_bytes(&address_to_script_hash(&self.next_consensus)?);
        sink.write_byte(0x01);
        write_witness(&mut sink, &self.script)?;
        Ok(sink.into_bytes())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationLog {
    pub txid: String,
    #[serde(default)]
    pub executions: Vec<Execution>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Execution {
    #[serde(rename = "vmstate")]
    pub vm_state: String,
    #[serde(default)]
    pub notifications: Vec<Notification>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Notification {
    pub contract: String,
    pub state: StackItem,
}

/// A VM stack item: a type tag and an untyped value.
#[derive(Debug, Clone, Deserialize)]
pub struct StackItem {
    #[serde(rename = "type")]
    pub item_type: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

impl StackItem {
    pub fn is_array(&self) -> bool {
        self.item_type == "Array"
    }

    /// The nested items of an `Array` value.
    pub fn items(&self) -> Result<Vec<StackItem>> {
        serde_json::from_value(self.value.clone())
            .map_err(|e| RelayError::ChainData(format!("stack array: {e}")))
    }

    /// The hex payload of a `ByteArray` value.
    pub fn as_hex(&self) -> Option<&str> {
        self.value.as_str()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StateHeight {
    #[serde(rename = "blockheight")]
    pub block_height: u32,
    #[serde(rename = "stateheight")]
    pub state_height: u32,
}

/// A consensus-signed state root, convertible back into the wire form used
/// as the cross-chain message.
#[derive(Debug, Clone, Deserialize)]
pub struct StateRoot {
    pub version: u32,
    pub index: u32,
    #[serde(rename = "prehash")]
    pub pre_hash: String,
    #[serde(rename = "stateroot")]
    pub state_root: String,
    #[serde(default)]
    pub witness: Option<WitnessDto>,
}

impl StateRoot {
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut sink = Sink::new();
        sink.write_byte(self.version as u8);
        sink.write_u32_le(self.index);
        sink.write_bytes(&wire_hash_from_rpc(&self.pre_hash)?);
        sink.write_bytes(&wire_hash_from_rpc(&self.state_root)?);
        match &self.witness {
            Some(witness) => {
                sink.write_var_uint(1);
                write_witness(&mut sink, witness)?;
            }
            None => sink.write_var_uint(0),
        }
        Ok(sink.into_bytes())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProofResponse {
    pub proof: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvokeResult {
    pub state: String,
    #[serde(rename = "gas_consumed")]
    pub gas_consumed: String,
    #[serde(default)]
    pub stack: Vec<StackItem>,
}

impl InvokeResult {
    pub fn faulted(&self) -> bool {
        self.state.contains(VM_STATE_FAULT)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnspentsResponse {
    pub address: String,
    #[serde(default)]
    pub balance: Vec<AssetBalance>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetBalance {
    #[serde(rename = "asset_hash")]
    pub asset_hash: String,
    pub amount: f64,
    #[serde(default)]
    pub unspent: Vec<UnspentDto>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnspentDto {
    pub txid: String,
    pub n: u16,
    pub value: f64,
}

fn write_witness(sink: &mut Sink, witness: &WitnessDto) -> Result<()> {
    let invocation = const_hex::decode(&witness.invocation)
        .map_err(|e| RelayError::ChainData(format!("invocation script hex: {e}")))?;
    let verification = const_hex::decode(&witness.verification)
        .map_err(|e| RelayError::ChainData(format!("verification script hex: {e}")))?;
    sink.write_var_bytes(&invocation);
    sink.write_var_bytes(&verification);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Source;
    use crate::wallet::script_hash_to_address;

    #[test]
    fn header_serializes_to_wire_form() {
        let next_consensus = script_hash_to_address(&[0x11; 20]);
        let header = TargetBlockHeader {
            version: 0,
            prev_hash: format!("0x{}", "22".repeat(32)),
            merkle_root: "33".repeat(32),
            time: 1_600_000_123,
            index: 777,
            nonce: "00000000000000ff".into(),
            next_consensus,
            script: WitnessDto {
                invocation: "4001".repeat(2),
                verification: "21ac".into(),
            },
        };
        let bytes = header.serialize().unwrap();
        let mut source = Source::new(&bytes);
        assert_eq!(source.read_u32_le().unwrap(), 0);
        // hashes are reversed into wire order
        assert_eq!(source.read_bytes(32).unwrap(), &[0x22; 32]);
        assert_eq!(source.read_bytes(32).unwrap(), &[0x33; 32]);
        assert_eq!(source.read_u32_le().unwrap(), 1_600_000_123);
        assert_eq!(source.read_u32_le().unwrap(), 777);
        assert_eq!(source.read_u64_le().unwrap(), 0xff);
        assert_eq!(source.read_bytes(20).unwrap(), &[0x11; 20]);
        assert_eq!(source.read_byte().unwrap(), 0x01);
        assert_eq!(source.read_var_bytes().unwrap().len(), 4);
        assert_eq!(source.read_var_bytes().unwrap(), &[0x21, 0xAC]);
        assert!(source.is_empty());
    }

    #[test]
    fn state_root_without_witness() {
        let root = StateRoot {
            version: 1,
            index: 42,
            pre_hash: "aa".repeat(32),
            state_root: "bb".repeat(32),
            witness: None,
        };
        let bytes = root.serialize().unwrap();
        let mut source = Source::new(&bytes);
        assert_eq!(source.read_byte().unwrap(), 1);
        assert_eq!(source.read_u32_le().unwrap(), 42);
        assert_eq!(source.read_bytes(32).unwrap(), &[0xAA; 32]);
        assert_eq!(source.read_bytes(32).unwrap(), &[0xBB; 32]);
        assert_eq!(source.read_var_uint().unwrap(), 0);
        assert!(source.is_empty());
    }

    #[test]
    fn stack_item_array_access() {
        let item: StackItem = serde_json::from_value(serde_json::json!({
            "type": "Array",
            "value": [
                {"type": "ByteArray", "value": "abcd"},
                {"type": "Integer", "value": "5"},
            ],
        }))
        .unwrap();
        assert!(item.is_array());
        let items = item.items().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_hex(), Some("abcd"));
    }
}
