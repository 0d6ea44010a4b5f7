//! Relay-chain data types: the wire header and the event DTOs.

use alloy_primitives::B256;
use serde::Deserialize;

use crate::codec::{Sink, Source};
use crate::error::{RelayError, Result};

/// A signed relay-chain block header.
///
/// `cross_state_root` commits the cross-chain requests executed at the
/// previous height; `consensus_payload` may carry a new epoch configuration.
#[derive(Debug, Clone)]
pub struct RelayHeader {
    pub version: u32,
    pub chain_id: u64,
    pub prev_block_hash: B256,
    pub transactions_root: B256,
    pub cross_state_root: B256,
    pub block_root: B256,
    pub timestamp: u32,
    pub height: u32,
    pub consensus_data: u64,
    pub consensus_payload: Vec<u8>,
    pub next_bookkeeper: [u8; 20],
    pub bookkeepers: Vec<Vec<u8>>,
    pub sig_data: Vec<Vec<u8>>,
}

impl RelayHeader {
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let mut source = Source::new(bytes);
        Self::read(&mut source)
    }

    pub(crate) fn read(source: &mut Source<'_>) -> Result<Self> {
        let version = source.read_u32_le()?;
        let chain_id = source.read_u64_le()?;
        let prev_block_hash = source.read_hash()?;
        let transactions_root = source.read_hash()?;
        let cross_state_root = source.read_hash()?;
        let block_root = source.read_hash()?;
        let timestamp = source.read_u32_le()?;
        let height = source.read_u32_le()?;
        let consensus_data = source.read_u64_le()?;
        let consensus_payload = source.read_var_bytes()?.to_vec();
        let mut next_bookkeeper = [0u8; 20];
        next_bookkeeper.copy_from_slice(source.read_bytes(20)?);

        let bookkeeper_count = source.read_var_uint()?;
        let mut bookkeepers = Vec::with_capacity(bookkeeper_count as usize);
        for _ in 0..bookkeeper_count {
            bookkeepers.push(source.read_var_bytes()?.to_vec());
        }
        let sig_count = source.read_var_uint()?;
        let mut sig_data = Vec::with_capacity(sig_count as usize);
        for _ in 0..sig_count {
            sig_data.push(source.read_var_bytes()?.to_vec());
        }

        Ok(Self {
            version,
            chain_id,
            prev_block_hash,
            transactions_root,
            cross_state_root,
            block_root,
            timestamp,
            height,
            consensus_data,
            consensus_payload,
            next_bookkeeper,
            bookkeepers,
            sig_data,
        })
    }

    /// The unsigned body, which is what the bookkeepers sign over.
    pub fn message(&self) -> Vec<u8> {
        let mut sink = Sink::new();
        sink.write_u32_le(self.version);
        sink.write_u64_le(self.chain_id);
        sink.write_hash(&self.prev_block_hash);
        sink.write_hash(&self.transactions_root);
        sink.write_hash(&self.cross_state_root);
        sink.write_hash(&self.block_root);
        sink.write_u32_le(self.timestamp);
        sink.write_u32_le(self.height);
        sink.write_u64_le(self.consensus_data);
        sink.write_var_bytes(&self.consensus_payload);
        sink.write_bytes(&self.next_bookkeeper);
        sink.into_bytes()
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut sink = Sink::new();
        sink.write_bytes(&self.message());
        sink.write_var_uint(self.bookkeepers.len() as u64);
        for key in &self.bookkeepers {
            sink.write_var_bytes(key);
        }
        sink.write_var_uint(self.sig_data.len() as u64);
        for sig in &self.sig_data {
            sink.write_var_bytes(sig);
        }
        sink.into_bytes()
    }

    /// Decode the consensus payload; `Some` only at an epoch boundary.
    pub fn new_chain_config(&self) -> Result<Option<NewChainConfig>> {
        if self.consensus_payload.is_empty() {
            return Ok(None);
        }
        let info: ConsensusPayload = serde_json::from_slice(&self.consensus_payload)
            .map_err(|e| RelayError::ChainData(format!("consensus payload: {e}")))?;
        Ok(info.new_chain_config)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ConsensusPayload {
    #[serde(default)]
    new_chain_config: Option<NewChainConfig>,
}

/// The bookkeeper set taking over at an epoch boundary.
#[derive(Debug, Clone, Deserialize)]
pub struct NewChainConfig {
    pub peers: Vec<PeerInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PeerInfo {
    pub index: u32,
    /// Hex-serialized public key.
    pub id: String,
}

/// One transaction's contract events as reported by the relay chain.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EventLog {
    pub tx_hash: String,
    /// 1 on successful execution.
    pub state: i64,
    #[serde(default)]
    pub notify: Vec<Notify>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Notify {
    pub contract_address: String,
    #[serde(default)]
    pub states: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StatesProof {
    pub audit_path: String,
}

/// The synchronized target-chain consensus anchor stored on the relay
/// chain: `u64_le(chain_id) || u32_le(height) || var_string(peer)`.
#[derive(Debug, Clone)]
pub struct ConsensusAnchor {
    pub chain_id: u64,
    pub height: u32,
    pub peer: String,
}

impl ConsensusAnchor {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut source = Source::new(bytes);
        Ok(Self {
            chain_id: source.read_u64_le()?,
            height: source.read_u32_le()?,
            peer: source.read_var_string()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> RelayHeader {
        RelayHeader {
            version: 0,
            chain_id: 0,
            prev_block_hash: B256::repeat_byte(0x11),
            transactions_root: B256::repeat_byte(0x22),
            cross_state_root: B256::repeat_byte(0x33),
            block_root: B256::repeat_byte(0x44),
            timestamp: 1_600_000_000,
            height: 12345,
            consensus_data: 0xfeed,
            consensus_payload: br#"{"leader":3}"#.to_vec(),
            next_bookkeeper: [0x55; 20],
            bookkeepers: vec![vec![0x02; 33], vec![0x03; 33]],
            sig_data: vec![vec![0xAA; 64]],
        }
    }

    #[test]
    fn serialize_deserialize_round_trip() {
        let header = sample_header();
        let parsed = RelayHeader::deserialize(&header.serialize()).unwrap();
        assert_eq!(parsed.height, header.height);
        assert_eq!(parsed.cross_state_root, header.cross_state_root);
        assert_eq!(parsed.bookkeepers, header.bookkeepers);
        assert_eq!(parsed.sig_data, header.sig_data);
        assert_eq!(parsed.message(), header.message());
    }

    #[test]
    fn message_is_a_prefix_of_serialize() {
        let header = sample_header();
        let full = header.serialize();
        let message = header.message();
        assert_eq!(&full[..message.len()], &message[..]);
    }

    #[test]
    fn payload_without_config_decodes_to_none() {
        let header = sample_header();
        assert!(header.new_chain_config().unwrap().is_none());
    }

    #[test]
    fn payload_with_config_decodes_peers() {
        let mut header = sample_header();
        header.consensus_payload =
            br#"{"new_chain_config":{"peers":[{"index":1,"id":"0123"}]}}"#.to_vec();
        let config = header.new_chain_config().unwrap().unwrap();
        assert_eq!(config.peers.len(), 1);
        assert_eq!(config.peers[0].id, "0123");
    }

    #[test]
    fn anchor_decode() {
        let mut sink = crate::codec::Sink::new();
        sink.write_u64_le(4);
        sink.write_u32_le(700);
        sink.write_var_string("peer-id");
        let anchor = ConsensusAnchor::decode(&sink.into_bytes()).unwrap();
        assert_eq!(anchor.chain_id, 4);
        assert_eq!(anchor.height, 700);
        assert_eq!(anchor.peer, "peer-id");
    }
}
