//! Relay-chain JSON-RPC client.

pub mod tx;
pub mod types;

use std::time::Duration;

use jsonrpsee::{
    core::client::ClientT,
    http_client::{HttpClient, HttpClientBuilder},
    rpc_params,
};

use crate::error::{RelayError, Result};
use crate::wallet::Account;
use types::{ConsensusAnchor, EventLog, RelayHeader, StatesProof};

#[derive(Clone)]
pub struct RelayClient {
    http: HttpClient,
}

impl RelayClient {
    pub fn new(url: &str) -> Result<Self> {
        let http = HttpClientBuilder::default()
            .build(url)
            .map_err(RelayError::from)?;
        Ok(Self { http })
    }

    pub async fn get_current_block_height(&self) -> Result<u32> {
        Ok(self.http.request("getblockheight", rpc_params![]).await?)
    }

    pub async fn get_header_by_height(&self, height: u32) -> Result<RelayHeader> {
        let raw: String = self
            .http
            .request("getheaderbyheight", rpc_params![height])
            .await?;
        let bytes = const_hex::decode(&raw)
            .map_err(|e| RelayError::ChainData(format!("header hex: {e}")))?;
        RelayHeader::deserialize(&bytes)
    }

    /// The block's header; transactions are not needed by the engine.
    pub async fn get_block_header_at(&self, height: u32) -> Result<RelayHeader> {
        let raw: String = self
            .http
            .request("getblockbyheight", rpc_params![height])
            .await?;
        let bytes = const_hex::decode(&raw)
            .map_err(|e| RelayError::ChainData(format!("block hex: {e}")))?;
        // The header is the block's prefix; the transaction list after it
        // is left unread.
        let mut source = crate::codec::Source::new(&bytes);
        RelayHeader::read(&mut source)
    }

    pub async fn get_smart_contract_event_by_block(&self, height: u32) -> Result<Vec<EventLog>> {
        let events: Option<Vec<EventLog>> = self
            .http
            .request("getsmartcodeeventbyheight", rpc_params![height])
            .await?;
        Ok(events.unwrap_or_default())
    }

    pub async fn get_smart_contract_event(&self, tx_hash: &str) -> Result<Option<EventLog>> {
        Ok(self
            .http
            .request("getsmartcodeevent", rpc_params![tx_hash])
            .await?)
    }

    pub async fn get_cross_states_proof(&self, height: u32, key: &str) -> Result<Vec<u8>> {
        let proof: StatesProof = self
            .http
            .request("getcrossstatesproof", rpc_params![height, key])
            .await?;
        const_hex::decode(&proof.audit_path)
            .map_err(|e| RelayError::ChainData(format!("audit path hex: {e}")))
    }

    /// Inclusion proof of the block root at `height` under the block root
    /// committed at `root_height`.
    pub async fn get_merkle_proof(&self, height: u32, root_height: u32) -> Result<Vec<u8>> {
        let proof: StatesProof = self
            .http
            .request("getmerkleproof", rpc_params![height, root_height])
            .await?;
        const_hex::decode(&proof.audit_path)
            .map_err(|e| RelayError::ChainData(format!("merkle proof hex: {e}")))
    }

    pub async fn get_storage(&self, contract: &[u8; 20], key: &[u8]) -> Result<Option<Vec<u8>>> {
        let value: Option<String> = self
            .http
            .request(
                "getstorage",
                rpc_params![const_hex::encode(contract), const_hex::encode(key)],
            )
            .await?;
        match value {
            Some(hex) if !hex.is_empty() => Ok(Some(const_hex::decode(&hex).map_err(|e| {
                RelayError::ChainData(format!("storage hex: {e}"))
            })?)),
            _ => Ok(None),
        }
    }

    pub async fn send_raw_transaction(&self, raw_hex: &str) -> Result<String> {
        Ok(self
            .http
            .request("sendrawtransaction", rpc_params![raw_hex])
            .await?)
    }

    /// Block until `blocks` new blocks are produced, or `timeout` elapses.
    pub async fn wait_for_generate_block(&self, timeout: Duration, blocks: u32) -> Result<()> {
        let start_height = self.get_current_block_height().await?;
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            tokio::time::sleep(Duration::from_secs(1)).await;
            if self.get_current_block_height().await? >= start_height + blocks {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(start_height, blocks, "timed out waiting for blocks");
                return Ok(());
            }
        }
    }

    /// The target-chain height the relay chain's light client has reached,
    /// as the next header to sync. Zero when no header has been synced.
    pub async fn get_synced_target_height(&self, target_chain_id: u64) -> Result<u32> {
        let mut key = Vec::from(tx::CONSENSUS_PEER_PREFIX);
        key.extend_from_slice(&target_chain_id.to_le_bytes());
        let value = self
            .get_storage(&tx::HEADER_SYNC_CONTRACT, &key)
            .await?
            .ok_or_else(|| {
                RelayError::ChainData("no consensus anchor for the target chain".into())
            })?;
        let anchor = ConsensusAnchor::decode(&value)?;
        Ok(anchor.height + 1)
    }

    /// Whether a target header at `height` is already persisted on the
    /// relay chain.
    pub async fn target_header_present(&self, target_chain_id: u64, height: u32) -> Result<bool> {
        let mut key = Vec::from(tx::HEADER_INDEX_PREFIX);
        key.extend_from_slice(&target_chain_id.to_le_bytes());
        key.extend_from_slice(&height.to_le_bytes());
        Ok(self
            .get_storage(&tx::HEADER_SYNC_CONTRACT, &key)
            .await?
            .is_some())
    }

    pub async fn submit_sync_block_header(
        &self,
        target_chain_id: u64,
        headers: &[Vec<u8>],
        account: &Account,
    ) -> Result<String> {
        let args = tx::sync_block_header_args(target_chain_id, &account.script_hash(), headers);
        let (raw, hash) = tx::build_signed_native_tx(
            &tx::HEADER_SYNC_CONTRACT,
            tx::SYNC_BLOCK_HEADER,
            &args,
            next_nonce(),
            account,
        )?;
        let accepted = self.send_raw_transaction(&raw).await?;
        tracing::debug!(local = %hash, accepted = %accepted, "header sync broadcast");
        Ok(accepted)
    }

    pub async fn submit_import_outer_transfer(
        &self,
        source_chain_id: u64,
        height: u32,
        proof: &[u8],
        cross_chain_msg: &[u8],
        account: &Account,
    ) -> Result<String> {
        let args = tx::import_outer_transfer_args(
            source_chain_id,
            height,
            proof,
            &account.script_hash(),
            cross_chain_msg,
        );
        let (raw, hash) = tx::build_signed_native_tx(
            &tx::CROSS_CHAIN_MANAGER_CONTRACT,
            tx::IMPORT_OUTER_TRANSFER,
            &args,
            next_nonce(),
            account,
        )?;
        let accepted = self.send_raw_transaction(&raw).await?;
        tracing::debug!(local = %hash, accepted = %accepted, "import broadcast");
        Ok(accepted)
    }
}

fn next_nonce() -> u32 {
    rand::random()
}

/// The relay chain's own cross-chain-manager event key, compared against
/// notification contract addresses.
pub fn is_cross_chain_manager(contract_hex: &str) -> bool {
    super::contract_hex_matches(contract_hex, &tx::CROSS_CHAIN_MANAGER_CONTRACT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consensus_peer_key_layout() {
        let mut key = Vec::from(tx::CONSENSUS_PEER_PREFIX);
        key.extend_from_slice(&4u64.to_le_bytes());
        assert_eq!(&key[..13], b"consensusPeer");
        assert_eq!(key.len(), 13 + 8);
        assert_eq!(key[13], 4);
    }

    #[test]
    fn cross_chain_manager_matcher() {
        let hex = const_hex::encode(tx::CROSS_CHAIN_MANAGER_CONTRACT);
        assert!(is_cross_chain_manager(&hex));
        assert!(!is_cross_chain_manager(&const_hex::encode(
            tx::HEADER_SYNC_CONTRACT
        )));
    }
}
