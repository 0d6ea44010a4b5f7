//! Target-chain JSON-RPC client.

pub mod script;
pub mod tx;
pub mod types;

use jsonrpsee::{
    core::client::ClientT,
    http_client::{HttpClient, HttpClientBuilder},
    rpc_params,
};

use crate::db::UtxoKey;
use crate::error::{RelayError, Result};
use types::{
    ApplicationLog, InvokeResult, ProofResponse, StateHeight, StateRoot, TargetBlock,
    TargetBlockHeader, UnspentsResponse,
};

#[derive(Clone)]
pub struct TargetClient {
    http: HttpClient,
}

impl TargetClient {
    pub fn new(url: &str) -> Result<Self> {
        let http = HttpClientBuilder::default()
            .build(url)
            .map_err(RelayError::from)?;
        Ok(Self { http })
    }

    pub async fn get_block_count(&self) -> Result<u32> {
        Ok(self.http.request("getblockcount", rpc_params![]).await?)
    }

    pub async fn get_block_by_index(&self, index: u32) -> Result<TargetBlock> {
        // verbosity 1: decoded JSON
        Ok(self.http.request("getblock", rpc_params![index, 1]).await?)
    }

    pub async fn get_block_header_by_index(&self, index: u32) -> Result<TargetBlockHeader> {
        Ok(self
            .http
            .request("getblockheader", rpc_params![index, 1])
            .await?)
    }

    pub async fn get_application_log(&self, txid: &str) -> Result<ApplicationLog> {
        Ok(self
            .http
            .request("getapplicationlog", rpc_params![txid])
            .await?)
    }

    /// The highest height whose state root is already computed.
    pub async fn get_state_height(&self) -> Result<u32> {
        let heights: StateHeight = self.http.request("getstateheight", rpc_params![]).await?;
        Ok(heights.state_height)
    }

    pub async fn get_state_root_by_index(&self, index: u32) -> Result<StateRoot> {
        Ok(self.http.request("getstateroot", rpc_params![index]).await?)
    }

    /// Storage inclusion proof of `key` in `contract` under `state_root`.
    pub async fn get_proof(
        &self,
        state_root: &str,
        contract: &str,
        key: &str,
    ) -> Result<Vec<u8>> {
        let response: ProofResponse = self
            .http
            .request("getproof", rpc_params![state_root, contract, key])
            .await?;
        const_hex::decode(&response.proof)
            .map_err(|e| RelayError::ChainData(format!("proof hex: {e}")))
    }

    pub async fn invoke_function(
        &self,
        contract: &str,
        method: &str,
        args: Vec<serde_json::Value>,
    ) -> Result<InvokeResult> {
        Ok(self
            .http
            .request("invokefunction", rpc_params![contract, method, args])
            .await?)
    }

    /// Dry-run a script for its gas cost.
    pub async fn invoke_script(&self, script: &[u8]) -> Result<InvokeResult> {
        Ok(self
            .http
            .request("invokescript", rpc_params![const_hex::encode(script)])
            .await?)
    }

    pub async fn get_unspents(&self, address: &str) -> Result<UnspentsResponse> {
        Ok(self.http.request("getunspents", rpc_params![address]).await?)
    }

    pub async fn send_raw_transaction(&self, raw_hex: &str) -> Result<()> {
        let accepted: bool = self
            .http
            .request("sendrawtransaction", rpc_params![raw_hex])
            .await?;
        if !accepted {
            return Err(RelayError::Submission(
                "Block or transaction validation failed".into(),
            ));
        }
        Ok(())
    }

    /// Fee-asset outputs spendable by `address`, in fixed8.
    pub async fn get_fee_unspents(&self, address: &str) -> Result<Vec<tx::SpendableOutput>> {
        let response = self.get_unspents(address).await?;
        let mut outputs = Vec::new();
        for balance in &response.balance {
            if !fee_asset_matches(&balance.asset_hash) {
                continue;
            }
            for unspent in &balance.unspent {
                outputs.push(tx::SpendableOutput {
                    key: UtxoKey {
                        txid: unspent.txid.trim_start_matches("0x").to_owned(),
                        index: unspent.n as i32,
                    },
                    value: tx::fixed8_from_f64(unspent.value),
                });
            }
        }
        Ok(outputs)
    }
}

fn fee_asset_matches(asset_hash: &str) -> bool {
    let trimmed = asset_hash.trim_start_matches("0x");
    let Ok(bytes) = const_hex::decode(trimmed) else {
        return false;
    };
    if bytes.len() != 32 {
        return false;
    }
    bytes == tx::FEE_ASSET || bytes.iter().rev().eq(tx::FEE_ASSET.iter())
}
