//! Process configuration, loaded once at startup from a JSON document.

use std::path::Path;

use serde::Deserialize;

use crate::error::{RelayError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub relay_rpc_url: String,
    pub relay_wallet_file: String,

    pub target_rpc_url: String,
    pub target_wallet_file: String,
    pub target_chain_id: u64,
    /// Script hash of the cross-chain management contract on the target
    /// chain, little-endian hex.
    pub target_ccmc: String,
    /// When non-empty, only events destined for this contract are relayed.
    #[serde(default)]
    pub specific_contract: String,
    pub target_sys_fee: f64,
    pub target_net_fee: f64,

    pub scan_interval_s: u64,
    pub retry_interval_s: u64,
    pub db_path: String,
    #[serde(default)]
    pub change_bookkeeper: bool,

    pub relay_start_height: u32,
    pub target_start_height: u32,

    #[serde(skip)]
    ccmc_bytes: [u8; 20],
    #[serde(skip)]
    specific_bytes: Option<[u8; 20]>,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read(path.as_ref()).map_err(|e| {
            RelayError::Config(format!("read {}: {e}", path.as_ref().display()))
        })?;
        let mut config: Self = serde_json::from_slice(&data)
            .map_err(|e| RelayError::Config(format!("parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&mut self) -> Result<()> {
        if self.relay_rpc_url.is_empty() || self.target_rpc_url.is_empty() {
            return Err(RelayError::Config("rpc urls must be set".into()));
        }
        if self.scan_interval_s == 0 || self.retry_interval_s == 0 {
            return Err(RelayError::Config("intervals must be nonzero".into()));
        }
        if self.db_path.is_empty() {
            return Err(RelayError::Config("db_path must be set".into()));
        }
        self.ccmc_bytes = decode_script_hash("target_ccmc", &self.target_ccmc)?;
        self.specific_bytes = if self.specific_contract.is_empty() {
            None
        } else {
            Some(decode_script_hash(
                "specific_contract",
                &self.specific_contract,
            )?)
        };
        Ok(())
    }

    /// The configured CCMC script hash, little-endian bytes.
    pub fn target_ccmc_bytes(&self) -> [u8; 20] {
        self.ccmc_bytes
    }

    /// The monitored contract's script hash, when a filter is configured.
    pub fn specific_contract_bytes(&self) -> Option<[u8; 20]> {
        self.specific_bytes
    }
}

fn decode_script_hash(field: &str, hex: &str) -> Result<[u8; 20]> {
    let bytes = const_hex::decode(hex)
        .map_err(|e| RelayError::Config(format!("{field}: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| RelayError::Config(format!("{field} must be a 20-byte script hash")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_json() -> serde_json::Value {
        serde_json::json!({
            "relay_rpc_url": "http://localhost:40336",
            "relay_wallet_file": "relay-wallet.json",
            "target_rpc_url": "http://localhost:20332",
            "target_wallet_file": "target-wallet.json",
            "target_chain_id": 4,
            "target_ccmc": "cd19a2132df1e35b5c6d82cf4e44b1f5bfa4c4df",
            "specific_contract": "",
            "target_sys_fee": 0.0,
            "target_net_fee": 0.001,
            "scan_interval_s": 2,
            "retry_interval_s": 2,
            "db_path": "./chain-db",
            "change_bookkeeper": false,
            "relay_start_height": 100,
            "target_start_height": 200,
        })
    }

    fn write_config(value: &serde_json::Value) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(value.to_string().as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_and_validates() {
        let file = write_config(&sample_json());
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.target_chain_id, 4);
        assert_eq!(config.target_ccmc_bytes()[0], 0xcd);
        assert!(config.specific_contract_bytes().is_none());
    }

    #[test]
    fn rejects_bad_ccmc() {
        let mut value = sample_json();
        value["target_ccmc"] = "abcd".into();
        let file = write_config(&value);
        assert!(matches!(
            Config::load(file.path()).unwrap_err(),
            RelayError::Config(_)
        ));
    }

    #[test]
    fn rejects_zero_interval() {
        let mut value = sample_json();
        value["scan_interval_s"] = 0.into();
        let file = write_config(&value);
        assert!(Config::load(file.path()).is_err());
    }
}
