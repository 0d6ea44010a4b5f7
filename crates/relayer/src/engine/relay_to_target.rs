//! Relay → target pipeline: scan relay blocks for proof requests, build
//! proof bundles and execute them on the target chain, rotate the
//! bookkeeper set at epoch boundaries, and retry parked events.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::{
    Context, SubmitStatus, TARGET_BLOCK_TIME, is_broadcast_rejection, is_retriable,
    sleep_or_shutdown,
};
use crate::chains::relay::{is_cross_chain_manager, types::Notify};
use crate::chains::target::script::invocation_script;
use crate::chains::target::tx::{build_invocation_tx, fixed8_from_f64};
use crate::db::{Direction, Submission};
use crate::error::{RelayError, Result};
use crate::keys::{VerifierKey, encode_bookkeepers};
use crate::proofs::{ProofBuilder, sign_list};

const DIR: Direction = Direction::RelayToTarget;

const VERIFY_AND_EXECUTE_TX: &str = "VerifyAndExecuteTx";
const CHANGE_BOOK_KEEPER: &str = "ChangeBookKeeper";
const CURRENT_SYNC_HEIGHT: &str = "currentSyncHeight";

/// The free execution allowance on the target chain, in fee units.
const FREE_GAS: f64 = 10.0;

pub async fn run_scan(ctx: Arc<Context>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    let mut scanner = Scanner::new(ctx).await?;
    info!(height = scanner.sync_height, "relay scan started");
    loop {
        if *shutdown.borrow() {
            break;
        }
        if let Err(err) = scanner.scan_once(&shutdown).await {
            error!(%err, "relay scan tick failed");
        }
        let interval = Duration::from_secs(scanner.ctx.config.scan_interval_s);
        if sleep_or_shutdown(&mut shutdown, interval).await {
            break;
        }
    }
    scanner.persist_progress().await?;
    info!(height = scanner.sync_height, "relay scan stopped");
    Ok(())
}

struct Scanner {
    ctx: Arc<Context>,
    /// Next relay height to process.
    sync_height: u32,
}

impl Scanner {
    async fn new(ctx: Arc<Context>) -> Result<Self> {
        let persisted = ctx.store.get_progress(DIR).await?.unwrap_or(0);
        let sync_height = persisted.max(ctx.config.relay_start_height);
        Ok(Self { ctx, sync_height })
    }

    async fn persist_progress(&self) -> Result<()> {
        self.ctx.store.put_progress(DIR, self.sync_height).await
    }

    async fn scan_once(&mut self, shutdown: &watch::Receiver<bool>) -> Result<()> {
        let current = match self.ctx.relay.get_current_block_height().await {
            Ok(height) => height,
            Err(err) => {
                warn!(%err, "relay height unavailable, skipping tick");
                return Ok(());
            }
        };
        while self.sync_height < current {
            if *shutdown.borrow() {
                break;
            }
            let height = self.sync_height;
            debug!(height, "processing relay block");
            self.handle_height(height).await?;
            self.sync_height = height + 1;
            self.persist_progress().await?;
        }
        Ok(())
    }

    async fn handle_height(&self, height: u32) -> Result<()> {
        let ctx = &self.ctx;
        let events = ctx.relay.get_smart_contract_event_by_block(height).await?;
        for event in &events {
            for notify in &event.notify {
                let Some((to_chain_id, key)) = make_proof_event(notify) else {
                    continue;
                };
                if to_chain_id != ctx.config.target_chain_id {
                    continue;
                }
                let last_synced = match target_synced_height(ctx).await {
                    Ok(synced) => synced,
                    Err(err) => {
                        error!(%err, "target sync height unavailable");
                        0
                    }
                };
                match sync_proof_to_target(ctx, &key, height, last_synced).await {
                    Ok(SubmitStatus::NeedRetry) => {
                        let submission = Submission {
                            height,
                            key: key.clone(),
                        };
                        ctx.store.put_retry(DIR, &submission).await?;
                        info!(height, key = %key, "parked for retry");
                    }
                    Ok(_) => {}
                    Err(err) => {
                        if is_broadcast_rejection(&err) {
                            // Broadcast failures are durable-retriable.
                            let submission = Submission {
                                height,
                                key: key.clone(),
                            };
                            ctx.store.put_retry(DIR, &submission).await?;
                        }
                        error!(height, key = %key, %err, "proof sync to target failed");
                    }
                }
            }
        }

        if ctx.config.change_bookkeeper {
            // Epoch rotations follow the block's events, like key headers.
            let header = ctx.relay.get_block_header_at(height).await?;
            if let Some(config) = header.new_chain_config()? {
                info!(height, peers = config.peers.len(), "epoch boundary, rotating bookkeepers");
                tokio::time::sleep(TARGET_BLOCK_TIME).await;
                if let Err(err) = change_book_keeper(ctx, &header.message(), &header.sig_data, &config).await {
                    error!(height, %err, "bookkeeper rotation failed");
                }
            }
        }
        Ok(())
    }
}

/// Match a cross-chain-manager `makeProof` notification, returning the
/// destination chain and the proof key.
fn make_proof_event(notify: &Notify) -> Option<(u64, String)> {
    if !is_cross_chain_manager(&notify.contract_address) {
        return None;
    }
    let states = notify.states.as_array()?;
    if states.first()?.as_str()? != "makeProof" {
        return None;
    }
    let to_chain_id = match states.get(2)? {
        serde_json::Value::Number(n) => n.as_u64()?,
        serde_json::Value::String(s) => s.parse().ok()?,
        _ => return None,
    };
    let key = states.get(5)?.as_str()?.to_owned();
    Some((to_chain_id, key))
}

/// The relay height up to which the target CCMC holds headers, as the next
/// header to sync. Zero when nothing is synced yet.
async fn target_synced_height(ctx: &Context) -> Result<u32> {
    let arg = serde_json::json!({
        "type": "Integer",
        "value": ctx.relay_chain_id.to_string(),
    });
    let result = ctx
        .target
        .invoke_function(&ccmc_display_hex(ctx), CURRENT_SYNC_HEIGHT, vec![arg])
        .await?;
    if result.faulted() {
        return Err(RelayError::Rpc("currentSyncHeight faulted".into()));
    }
    let Some(hex) = result.stack.first().and_then(|item| item.as_hex()) else {
        return Ok(0);
    };
    if hex.is_empty() {
        return Ok(0);
    }
    let bytes = const_hex::decode(hex)
        .map_err(|e| RelayError::ChainData(format!("sync height hex: {e}")))?;
    if bytes.len() > 8 {
        return Err(RelayError::ChainData("sync height overflows u64".into()));
    }
    let mut padded = [0u8; 8];
    padded[..bytes.len()].copy_from_slice(&bytes);
    Ok(u64::from_le_bytes(padded) as u32 + 1)
}

/// Build the proof bundle for `key` and execute it on the target chain.
/// Shared by the scanner and the retry loop.
async fn sync_proof_to_target(
    ctx: &Context,
    key: &str,
    tx_height: u32,
    last_synced: u32,
) -> Result<SubmitStatus> {
    let builder = ProofBuilder::new(&ctx.relay, ctx.config.specific_contract_bytes());
    let Some(bundle) = builder.build(key, tx_height, last_synced).await? else {
        return Ok(SubmitStatus::Filtered);
    };
    let script = invocation_script(
        &ctx.config.target_ccmc_bytes(),
        VERIFY_AND_EXECUTE_TX,
        &bundle.into_params(),
    );
    submit_invocation(ctx, &script).await
}

/// Rotate the target CCMC's bookkeeper set to the new epoch configuration.
async fn change_book_keeper(
    ctx: &Context,
    raw_header: &[u8],
    sig_data: &[Vec<u8>],
    config: &crate::chains::relay::types::NewChainConfig,
) -> Result<()> {
    let mut keys = Vec::with_capacity(config.peers.len());
    for peer in &config.peers {
        let bytes = const_hex::decode(&peer.id)
            .map_err(|e| RelayError::ChainData(format!("peer key hex: {e}")))?;
        keys.push(VerifierKey::parse(&bytes)?);
    }
    let bookkeepers = encode_bookkeepers(&keys);
    let signatures = sign_list(sig_data)?;

    let script = invocation_script(
        &ctx.config.target_ccmc_bytes(),
        CHANGE_BOOK_KEEPER,
        &[raw_header.to_vec(), bookkeepers, signatures],
    );
    match submit_invocation(ctx, &script).await? {
        SubmitStatus::Submitted => Ok(()),
        status => {
            warn!(?status, "bookkeeper rotation was not broadcast");
            Ok(())
        }
    }
}

/// Estimate gas, assemble a fee-covered transaction, sign, broadcast, and
/// mark the consumed outputs spent.
async fn submit_invocation(ctx: &Context, script: &[u8]) -> Result<SubmitStatus> {
    let invoke = ctx.target.invoke_script(script).await?;
    if invoke.faulted() {
        warn!(state = %invoke.state, "dry-run faulted, proceeding with estimate");
    }
    let gas_consumed: f64 = invoke
        .gas_consumed
        .parse()
        .map_err(|e| RelayError::ChainData(format!("gas estimate: {e}")))?;
    let declared_gas = fixed8_from_f64((gas_consumed - FREE_GAS).max(0.0).ceil());
    let fee = fixed8_from_f64(ctx.config.target_sys_fee)
        + fixed8_from_f64(ctx.config.target_net_fee);

    let listing = ctx
        .target
        .get_fee_unspents(&ctx.target_account.address())
        .await?;
    // Outputs we already spent but the listing still shows are excluded;
    // entries the listing no longer carries correct themselves here.
    let mut available = Vec::with_capacity(listing.len());
    for output in listing {
        if ctx.store.get_utxo(&output.key).await? == Some(true) {
            continue;
        }
        available.push(output);
    }

    let built = match build_invocation_tx(
        script,
        declared_gas,
        fee,
        &available,
        ctx.target_account.script_hash(),
    ) {
        Ok(built) => built,
        Err(err @ RelayError::InsufficientFunds { .. }) => {
            info!(%err, "cannot cover fees");
            return Ok(SubmitStatus::NeedRetry);
        }
        Err(err) => return Err(err),
    };

    let mut tx = built.tx;
    tx.sign(&ctx.target_account);
    let raw = const_hex::encode(tx.serialize());
    ctx.target.send_raw_transaction(&raw).await?;

    // Guard against double-spends before the transaction is mined.
    for key in &built.consumed {
        ctx.store.put_utxo(key, true).await?;
    }
    info!(tx_hash = %tx.hash_hex(), "target transaction broadcast");
    tokio::time::sleep(TARGET_BLOCK_TIME).await;
    Ok(SubmitStatus::Submitted)
}

fn ccmc_display_hex(ctx: &Context) -> String {
    let mut bytes = ctx.config.target_ccmc_bytes();
    bytes.reverse();
    format!("0x{}", const_hex::encode(bytes))
}

pub async fn run_retry(ctx: Arc<Context>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    info!("target retry loop started");
    loop {
        if *shutdown.borrow() {
            break;
        }
        if let Err(err) = retry_tx(&ctx, &mut shutdown).await {
            error!(%err, "retry pass failed");
        }
        let interval = Duration::from_secs(ctx.config.scan_interval_s);
        if sleep_or_shutdown(&mut shutdown, interval).await {
            break;
        }
    }
    info!("target retry loop stopped");
    Ok(())
}

async fn retry_tx(ctx: &Context, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
    let entries = ctx.store.iter_retry(DIR).await?;
    for submission in entries {
        if *shutdown.borrow() {
            break;
        }
        let last_synced = match target_synced_height(ctx).await {
            Ok(synced) => synced,
            Err(err) => {
                error!(%err, "target sync height unavailable");
                0
            }
        };
        match sync_proof_to_target(ctx, &submission.key, submission.height, last_synced).await {
            Ok(SubmitStatus::NeedRetry) => {
                debug!(height = submission.height, "fees still uncovered, keeping entry");
            }
            Ok(_) => {
                ctx.store.delete_retry(DIR, &submission).await?;
            }
            Err(err) if is_retriable(&err) || is_broadcast_rejection(&err) => {
                warn!(height = submission.height, %err, "resubmission rejected, keeping entry");
            }
            Err(err) => {
                error!(
                    height = submission.height,
                    key = %submission.key,
                    %err,
                    "dropping entry after fatal resubmission error"
                );
                ctx.store.delete_retry(DIR, &submission).await?;
            }
        }
        let interval = Duration::from_secs(ctx.config.retry_interval_s);
        if sleep_or_shutdown(shutdown, interval).await {
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notify(contract: &str, states: serde_json::Value) -> Notify {
        serde_json::from_value(serde_json::json!({
            "ContractAddress": contract,
            "States": states,
        }))
        .unwrap()
    }

    fn ccmc_hex() -> String {
        const_hex::encode(crate::chains::relay::tx::CROSS_CHAIN_MANAGER_CONTRACT)
    }

    #[test]
    fn make_proof_event_extracts_chain_and_key() {
        let n = notify(
            &ccmc_hex(),
            serde_json::json!(["makeProof", "01", 4, "cafe", "00", "0102050100000000000001"]),
        );
        assert_eq!(
            make_proof_event(&n),
            Some((4, "0102050100000000000001".into()))
        );
    }

    #[test]
    fn make_proof_accepts_numeric_strings() {
        let n = notify(
            &ccmc_hex(),
            serde_json::json!(["makeProof", "01", "4", "cafe", "00", "aa"]),
        );
        assert_eq!(make_proof_event(&n), Some((4, "aa".into())));
    }

    #[test]
    fn other_contracts_are_ignored() {
        let n = notify(
            "ffffffffffffffffffffffffffffffffffffffff",
            serde_json::json!(["makeProof", "01", 4, "cafe", "00", "aa"]),
        );
        assert_eq!(make_proof_event(&n), None);
    }

    #[test]
    fn other_methods_are_ignored() {
        let n = notify(
            &ccmc_hex(),
            serde_json::json!(["btcTxToRelay", "01", 4, "cafe", "00", "aa"]),
        );
        assert_eq!(make_proof_event(&n), None);
    }

    #[test]
    fn short_states_are_ignored() {
        let n = notify(&ccmc_hex(), serde_json::json!(["makeProof"]));
        assert_eq!(make_proof_event(&n), None);
    }
}
