//! Target → relay pipeline: scan target blocks for lock events, submit
//! their state proofs to the relay chain, sync key headers on validator
//! set changes, and confirm or retry past submissions.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::{
    Context, GENERATE_BLOCK_BLOCKS, GENERATE_BLOCK_TIMEOUT, RPC_PROBES, SubmitStatus,
    is_already_done, is_retriable, sleep_or_shutdown,
};
use crate::chains::contract_hex_matches;
use crate::chains::target::types::{
    INVOCATION_TX_TYPE, Notification, StackItem, TargetBlock, VM_STATE_FAULT,
};
use crate::db::{Direction, Submission};
use crate::error::{RelayError, Result};

const DIR: Direction = Direction::TargetToRelay;

/// Hex bytes of the lock-event marker string.
const CROSS_CHAIN_LOCK_EVENT_HEX: &str = "43726f7373436861696e4c6f636b4576656e74";
const LOCK_EVENT_FIELDS: usize = 6;
const LOCK_EVENT_KEY_INDEX: usize = 4;

pub async fn run_scan(ctx: Arc<Context>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    let mut scanner = Scanner::new(ctx).await?;
    scanner.seed_consensus_anchor().await;
    info!(height = scanner.sync_height, "target scan started");
    loop {
        if *shutdown.borrow() {
            break;
        }
        if let Err(err) = scanner.scan_once(&shutdown).await {
            error!(%err, "target scan tick failed");
        }
        if sleep_or_shutdown(&mut shutdown, scanner.scan_interval()).await {
            break;
        }
    }
    scanner.persist_progress().await?;
    info!(height = scanner.sync_height, "target scan stopped");
    Ok(())
}

struct Scanner {
    ctx: Arc<Context>,
    /// Next target height to process.
    sync_height: u32,
    /// Last known validator set identifier; headers are synced when it
    /// changes.
    next_consensus: String,
}

impl Scanner {
    async fn new(ctx: Arc<Context>) -> Result<Self> {
        let persisted = ctx.store.get_progress(DIR).await?.unwrap_or(0);
        let sync_height = persisted.max(ctx.config.target_start_height);
        Ok(Self {
            ctx,
            sync_height,
            next_consensus: String::new(),
        })
    }

    fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.ctx.config.scan_interval_s)
    }

    /// Seed the consensus anchor from the last processed block; with no
    /// processed block there is nothing to anchor against yet.
    async fn seed_consensus_anchor(&mut self) {
        if self.sync_height == 0 {
            return;
        }
        for attempt in 1..=RPC_PROBES {
            match self.ctx.target.get_block_by_index(self.sync_height - 1).await {
                Ok(block) => {
                    self.next_consensus = block.next_consensus;
                    return;
                }
                Err(err) => warn!(attempt, %err, "consensus anchor probe failed"),
            }
        }
        error!("could not seed the consensus anchor; first header sync may repeat");
    }

    async fn persist_progress(&self) -> Result<()> {
        self.ctx.store.put_progress(DIR, self.sync_height).await
    }

    async fn scan_once(&mut self, shutdown: &watch::Receiver<bool>) -> Result<()> {
        let Some(block_count) = self.probe_block_count().await else {
            warn!("block count unavailable, skipping tick");
            return Ok(());
        };
        let current = block_count.saturating_sub(1);
        while self.sync_height < current {
            if *shutdown.borrow() {
                break;
            }
            let height = self.sync_height;
            let Some(block) = self.probe_block(height).await else {
                break;
            };
            debug!(height, "processing target block");
            self.handle_block(&block).await?;

            // Headers follow events, never precede them: a receiver must
            // already hold the committing header for any proof it gets.
            if block.next_consensus != self.next_consensus {
                info!(height, "validator set changed, syncing key header");
                if let Err(err) = self.sync_header_to_relay(height).await {
                    error!(height, %err, "key header sync failed");
                }
                self.next_consensus = block.next_consensus.clone();
            }

            self.sync_height = height + 1;
            self.persist_progress().await?;
        }
        Ok(())
    }

    async fn probe_block_count(&self) -> Option<u32> {
        for attempt in 1..=RPC_PROBES {
            match self.ctx.target.get_block_count().await {
                Ok(count) if count > 0 => return Some(count),
                Ok(_) => debug!(attempt, "empty block count"),
                Err(err) => warn!(attempt, %err, "block count probe failed"),
            }
        }
        None
    }

    async fn probe_block(&self, height: u32) -> Option<TargetBlock> {
        for attempt in 1..=RPC_PROBES {
            match self.ctx.target.get_block_by_index(height).await {
                Ok(block) => return Some(block),
                Err(err) => warn!(height, attempt, %err, "block probe failed"),
            }
        }
        None
    }

    async fn handle_block(&self, block: &TargetBlock) -> Result<()> {
        let ctx = &self.ctx;
        let ccmc = ctx.config.target_ccmc_bytes();
        for entry in &block.tx {
            if entry.tx_type != INVOCATION_TX_TYPE {
                continue;
            }
            let log = ctx.target.get_application_log(&entry.txid).await?;
            for execution in &log.executions {
                if execution.vm_state.contains(VM_STATE_FAULT) {
                    continue;
                }
                for notification in &execution.notifications {
                    if !contract_hex_matches(&notification.contract, &ccmc) {
                        continue;
                    }
                    let key = match lock_event_key(&notification.state) {
                        Ok(Some(key)) => key,
                        Ok(None) => continue,
                        Err(err) => {
                            error!(txid = %entry.txid, %err, "malformed lock event, dropping");
                            continue;
                        }
                    };
                    if let Some(filter) = ctx.config.specific_contract_bytes() {
                        if !touches_contract(&execution.notifications, &filter) {
                            info!(txid = %entry.txid, "cross-chain tx is not for the monitored contract");
                            continue;
                        }
                    }
                    // Prove against the height the relay chain can already
                    // verify, whichever is later.
                    let synced = ctx
                        .relay
                        .get_synced_target_height(ctx.config.target_chain_id)
                        .await?;
                    let height = block.index.max(synced);
                    match sync_proof_to_relay(ctx, &key, height).await {
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
                            error!(
                                height = block.index,
                                txid = %entry.txid,
                                key = %key,
                                %err,
                                "proof sync to relay failed"
                            );
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Sync the target header at `height` to the relay chain, unless it is
    /// already present there.
    async fn sync_header_to_relay(&self, height: u32) -> Result<()> {
        let ctx = &self.ctx;
        if ctx
            .relay
            .target_header_present(ctx.config.target_chain_id, height)
            .await?
        {
            debug!(height, "header already on the relay chain");
            return Ok(());
        }
        let header = ctx.target.get_block_header_by_index(height).await?;
        let raw = header.serialize()?;
        let tx_hash = ctx
            .relay
            .submit_sync_block_header(ctx.config.target_chain_id, &[raw], &ctx.relay_account)
            .await?;
        info!(height, %tx_hash, "key header submitted");
        ctx.relay
            .wait_for_generate_block(GENERATE_BLOCK_TIMEOUT, GENERATE_BLOCK_BLOCKS)
            .await
    }
}

/// Submit the state proof for `key` at `height` to the relay chain.
/// Shared by the scanner and the retry loop.
async fn sync_proof_to_relay(ctx: &Context, key: &str, height: u32) -> Result<SubmitStatus> {
    // The cross-state root of a block is only computable after execution;
    // wait (bounded) for the state service to catch up.
    let mut reached = false;
    for _ in 0..RPC_PROBES {
        match ctx.target.get_state_height().await {
            Ok(state_height) if state_height >= height => {
                reached = true;
                break;
            }
            Ok(state_height) => {
                debug!(state_height, height, "waiting for the state root");
            }
            Err(err) => {
                warn!(%err, "state height unavailable");
                return Ok(SubmitStatus::NeedRetry);
            }
        }
        tokio::time::sleep(Duration::from_secs(ctx.config.scan_interval_s)).await;
    }
    if !reached {
        return Ok(SubmitStatus::NeedRetry);
    }

    let state_root = match ctx.target.get_state_root_by_index(height).await {
        Ok(root) => root,
        Err(err) => {
            warn!(height, %err, "state root unavailable");
            return Ok(SubmitStatus::NeedRetry);
        }
    };
    let cross_chain_msg = state_root.serialize()?;

    let proof = ctx
        .target
        .get_proof(
            state_root.state_root.trim_start_matches("0x"),
            &ccmc_display_hex(ctx),
            key,
        )
        .await?;

    match ctx
        .relay
        .submit_import_outer_transfer(
            ctx.config.target_chain_id,
            height,
            &proof,
            &cross_chain_msg,
            &ctx.relay_account,
        )
        .await
    {
        Ok(tx_hash) => {
            let submission = Submission {
                height,
                key: key.to_owned(),
            };
            ctx.store.put_check(DIR, &tx_hash, &submission).await?;
            info!(%tx_hash, height, "proof submitted to relay chain");
            Ok(SubmitStatus::Submitted)
        }
        Err(err) if is_retriable(&err) => {
            info!(%err, "relay-side resources exhausted");
            Ok(SubmitStatus::NeedRetry)
        }
        Err(err) if is_already_done(&err) => {
            debug!(height, key, "event already imported");
            Ok(SubmitStatus::AlreadyDone)
        }
        Err(err) => Err(err),
    }
}

/// The CCMC hash in the display orientation the state service expects.
fn ccmc_display_hex(ctx: &Context) -> String {
    let mut bytes = ctx.config.target_ccmc_bytes();
    bytes.reverse();
    format!("0x{}", const_hex::encode(bytes))
}

/// Extract the proof key from a CCMC notification. `Ok(None)` means the
/// notification is some other event; an error means the shape is wrong.
fn lock_event_key(state: &StackItem) -> Result<Option<String>> {
    if !state.is_array() {
        return Err(RelayError::ChainData(
            "notification state is not an array".into(),
        ));
    }
    let items = state.items()?;
    let Some(marker) = items.first().and_then(StackItem::as_hex) else {
        return Err(RelayError::ChainData("notification state is empty".into()));
    };
    if !marker.eq_ignore_ascii_case(CROSS_CHAIN_LOCK_EVENT_HEX) {
        return Ok(None);
    }
    if items.len() != LOCK_EVENT_FIELDS {
        return Err(RelayError::ChainData(format!(
            "lock event has {} fields, expected {LOCK_EVENT_FIELDS}",
            items.len()
        )));
    }
    let key = items[LOCK_EVENT_KEY_INDEX]
        .as_hex()
        .ok_or_else(|| RelayError::ChainData("lock event key is not a byte string".into()))?;
    Ok(Some(key.to_owned()))
}

/// Whether any notification of the transaction came from `contract`.
fn touches_contract(notifications: &[Notification], contract: &[u8; 20]) -> bool {
    notifications
        .iter()
        .any(|n| contract_hex_matches(&n.contract, contract))
}

pub async fn run_check_retry(ctx: Arc<Context>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    info!("confirmation loop started");
    loop {
        if *shutdown.borrow() {
            break;
        }
        if let Err(err) = check_done_tx(&ctx).await {
            error!(%err, "confirmation pass failed");
        }
        if let Err(err) = retry_tx(&ctx, &mut shutdown).await {
            error!(%err, "retry pass failed");
        }
        let interval = Duration::from_secs(ctx.config.scan_interval_s);
        if sleep_or_shutdown(&mut shutdown, interval).await {
            break;
        }
    }
    info!("confirmation loop stopped");
    Ok(())
}

/// Resolve pending submissions against their on-chain receipts. Failed
/// executions move to the retry queue; missing receipts stay pending.
async fn check_done_tx(ctx: &Context) -> Result<()> {
    for (tx_hash, submission) in ctx.store.iter_check(DIR).await? {
        match ctx.relay.get_smart_contract_event(&tx_hash).await? {
            None => {
                info!(%tx_hash, "receipt not yet available");
            }
            Some(event) if event.state != 1 => {
                warn!(
                    %tx_hash,
                    height = submission.height,
                    "submission failed on-chain, moving to retry"
                );
                ctx.store.move_check_to_retry(DIR, &tx_hash).await?;
            }
            Some(_) => {
                debug!(%tx_hash, "submission confirmed");
                ctx.store.delete_check(DIR, &tx_hash).await?;
            }
        }
    }
    Ok(())
}

async fn retry_tx(ctx: &Context, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
    let entries = ctx.store.iter_retry(DIR).await?;
    for submission in entries {
        if *shutdown.borrow() {
            break;
        }
        match sync_proof_to_relay(ctx, &submission.key, submission.height).await {
            Ok(SubmitStatus::NeedRetry) => {
                debug!(height = submission.height, "resources still exhausted, keeping entry");
            }
            Ok(_) => {
                ctx.store.delete_retry(DIR, &submission).await?;
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

    fn lock_state(marker: &str, fields: usize) -> StackItem {
        let mut values = vec![serde_json::json!({"type": "ByteArray", "value": marker})];
        for i in 1..fields {
            values.push(serde_json::json!({
                "type": "ByteArray",
                "value": format!("{i:02x}"),
            }));
        }
        serde_json::from_value(serde_json::json!({"type": "Array", "value": values})).unwrap()
    }

    #[test]
    fn lock_event_key_is_field_four() {
        let state = lock_state(CROSS_CHAIN_LOCK_EVENT_HEX, 6);
        assert_eq!(lock_event_key(&state).unwrap(), Some("04".into()));
    }

    #[test]
    fn other_events_are_skipped() {
        let state = lock_state("aabbcc", 6);
        assert_eq!(lock_event_key(&state).unwrap(), None);
    }

    #[test]
    fn wrong_arity_is_an_error() {
        let state = lock_state(CROSS_CHAIN_LOCK_EVENT_HEX, 5);
        assert!(lock_event_key(&state).is_err());
    }

    #[test]
    fn non_array_state_is_an_error() {
        let state: StackItem = serde_json::from_value(
            serde_json::json!({"type": "ByteArray", "value": "00"}),
        )
        .unwrap();
        assert!(lock_event_key(&state).is_err());
    }

    #[test]
    fn marker_match_is_case_insensitive() {
        let state = lock_state(&CROSS_CHAIN_LOCK_EVENT_HEX.to_uppercase(), 6);
        assert!(lock_event_key(&state).unwrap().is_some());
    }

    #[test]
    fn touches_contract_scans_all_notifications() {
        let contract = [0x0Au8; 20];
        let notifications: Vec<Notification> = serde_json::from_value(serde_json::json!([
            {"contract": "0xffffffffffffffffffffffffffffffffffffffff",
             "state": {"type": "Array", "value": []}},
            {"contract": const_hex::encode(contract),
             "state": {"type": "Array", "value": []}},
        ]))
        .unwrap();
        assert!(touches_contract(&notifications, &contract));
        assert!(!touches_contract(&notifications[..1].to_vec(), &contract));
    }
}
