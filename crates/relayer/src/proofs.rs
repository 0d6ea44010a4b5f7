//! Proof bundles for importing relay-chain events onto the target chain.
//!
//! The destination verifier takes five byte-string parameters: the
//! cross-states audit path, the header committing its root, and, for
//! events older than the last synced epoch header, a block-root proof
//! with the trusted header and its signatures.

use alloy_primitives::U256;

use crate::chains::relay::{RelayClient, types::RelayHeader};
use crate::codec::{Source, merkle};
use crate::error::Result;
use crate::keys::eth_compatible;

/// The decoded leaf of the cross-states trie: one cross-chain request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToMerkleValue {
    /// Relay-chain transaction hash.
    pub tx_hash: Vec<u8>,
    pub from_chain_id: u64,
    pub tx_param: CrossChainTxParameter,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrossChainTxParameter {
    /// Source-chain transaction hash.
    pub tx_hash: Vec<u8>,
    pub cross_chain_id: Vec<u8>,
    pub from_contract: Vec<u8>,
    pub to_chain_id: u64,
    pub to_contract: Vec<u8>,
    pub method: Vec<u8>,
    pub args: Vec<u8>,
}

impl ToMerkleValue {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut source = Source::new(bytes);
        let tx_hash = source.read_var_bytes()?.to_vec();
        let from_chain_id = source.read_u64_le()?;
        let tx_param = CrossChainTxParameter::read(&mut source)?;
        Ok(Self {
            tx_hash,
            from_chain_id,
            tx_param,
        })
    }
}

impl CrossChainTxParameter {
    fn read(source: &mut Source<'_>) -> Result<Self> {
        Ok(Self {
            tx_hash: source.read_var_bytes()?.to_vec(),
            cross_chain_id: source.read_var_bytes()?.to_vec(),
            from_contract: source.read_var_bytes()?.to_vec(),
            to_chain_id: source.read_u64_le()?,
            to_contract: source.read_var_bytes()?.to_vec(),
            method: source.read_var_bytes()?.to_vec(),
            args: source.read_var_bytes()?.to_vec(),
        })
    }
}

/// Transfer arguments carried inside a request, decoded for logging.
#[derive(Debug, Clone)]
pub struct CrossChainArgs {
    pub asset_hash: Vec<u8>,
    pub to_address: Vec<u8>,
    pub amount: U256,
}

impl CrossChainArgs {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut source = Source::new(bytes);
        Ok(Self {
            asset_hash: source.read_var_bytes()?.to_vec(),
            to_address: source.read_var_bytes()?.to_vec(),
            amount: source.read_u255()?,
        })
    }
}

/// Concatenated recoverable signatures over a header.
pub fn sign_list(sig_data: &[Vec<u8>]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(sig_data.len() * 65);
    for sig in sig_data {
        out.extend_from_slice(&eth_compatible(sig)?);
    }
    Ok(out)
}

/// The five contract parameters of a verify-and-execute call, in order.
#[derive(Debug, Clone)]
pub struct ProofBundle {
    pub tx_proof: Vec<u8>,
    pub tx_proof_header: Vec<u8>,
    pub header_proof: Vec<u8>,
    pub current_header: Vec<u8>,
    pub sign_list: Vec<u8>,
}

impl ProofBundle {
    pub fn into_params(self) -> Vec<Vec<u8>> {
        vec![
            self.tx_proof,
            self.tx_proof_header,
            self.header_proof,
            self.current_header,
            self.sign_list,
        ]
    }
}

pub struct ProofBuilder<'a> {
    relay: &'a RelayClient,
    specific_contract: Option<[u8; 20]>,
}

impl<'a> ProofBuilder<'a> {
    pub fn new(relay: &'a RelayClient, specific_contract: Option<[u8; 20]>) -> Self {
        Self {
            relay,
            specific_contract,
        }
    }

    /// Assemble the bundle for the event at `key`/`tx_height`. Returns
    /// `None` when a configured contract filter rejects the event; the
    /// filter runs before any transaction construction.
    pub async fn build(
        &self,
        key: &str,
        tx_height: u32,
        last_synced: u32,
    ) -> Result<Option<ProofBundle>> {
        let audit_path = self.relay.get_cross_states_proof(tx_height, key).await?;
        // The header at the next height commits the cross-state root
        // covering tx_height.
        let verified_header = self.relay.get_header_by_height(tx_height + 1).await?;

        if !self.passes_filter(&audit_path, &verified_header)? {
            tracing::info!(tx_height, key, "event is not for the monitored contract");
            return Ok(None);
        }

        let (header_proof, current_header, signatures) = if tx_height >= last_synced {
            // Within the current epoch: the destination holds a sufficient
            // header, so its own signatures travel with the proof.
            (Vec::new(), Vec::new(), sign_list(&verified_header.sig_data)?)
        } else {
            let reliable_height = last_synced + 1;
            let header_proof = self
                .relay
                .get_merkle_proof(tx_height + 1, reliable_height)
                .await?;
            let reliable = self.relay.get_header_by_height(reliable_height).await?;
            let signatures = sign_list(&reliable.sig_data)?;
            (header_proof, reliable.message(), signatures)
        };

        Ok(Some(ProofBundle {
            tx_proof: audit_path,
            tx_proof_header: verified_header.message(),
            header_proof,
            current_header,
            sign_list: signatures,
        }))
    }

    /// Whether the event under `audit_path` is destined for the monitored
    /// contract. Always passes when no filter is configured.
    pub fn passes_filter(&self, audit_path: &[u8], header: &RelayHeader) -> Result<bool> {
        let Some(filter) = self.specific_contract else {
            return Ok(true);
        };
        let leaf = merkle::prove(audit_path, header.cross_state_root)?;
        let value = ToMerkleValue::decode(&leaf)?;
        if value.tx_param.to_contract != filter {
            return Ok(false);
        }
        if let Ok(args) = CrossChainArgs::decode(&value.tx_param.args) {
            tracing::debug!(
                asset = %const_hex::encode(&args.asset_hash),
                to = %const_hex::encode(&args.to_address),
                amount = %args.amount,
                "matched transfer request"
            );
        }
        Ok(true)
    }
}
