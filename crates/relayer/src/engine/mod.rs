//! The sync engine: two directional pipelines, each a scan task plus a
//! confirmation/retry task.
//!
//! The persistence handle is the only state shared between tasks; each
//! pipeline owns its scan cursor.

pub mod relay_to_target;
pub mod target_to_relay;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::chains::{relay::RelayClient, target::TargetClient};
use crate::config::Config;
use crate::db::Store;
use crate::error::{RelayError, Result};
use crate::wallet::Account;

/// Empty or failed source-RPC responses are probed this many times before
/// the scan tick is skipped.
pub(crate) const RPC_PROBES: u32 = 5;
/// Quiet period after a target-chain broadcast.
pub(crate) const TARGET_BLOCK_TIME: Duration = Duration::from_secs(15);
pub(crate) const GENERATE_BLOCK_TIMEOUT: Duration = Duration::from_secs(90);
pub(crate) const GENERATE_BLOCK_BLOCKS: u32 = 3;

/// Destination-side resource exhaustion, reported through the relay chain.
const UTXO_EXHAUSTED: &str = "chooseUtxos, current utxo is not enough";
/// Idempotence marker: the event was already imported.
const TX_ALREADY_DONE: &str = "checkDoneTx, tx already done";

/// Everything a pipeline task needs, built once at startup.
pub struct Context {
    pub config: Config,
    pub store: Store,
    pub relay: RelayClient,
    pub target: TargetClient,
    pub relay_account: Account,
    pub target_account: Account,
    /// The relay chain's own federation id, read from its genesis header.
    pub relay_chain_id: u64,
}

/// Spawn the four pipeline tasks and wait for all of them to finish.
pub async fn run(ctx: Arc<Context>, shutdown: watch::Receiver<bool>) -> Result<()> {
    let handles = [
        tokio::spawn(target_to_relay::run_scan(ctx.clone(), shutdown.clone())),
        tokio::spawn(target_to_relay::run_check_retry(
            ctx.clone(),
            shutdown.clone(),
        )),
        tokio::spawn(relay_to_target::run_scan(ctx.clone(), shutdown.clone())),
        tokio::spawn(relay_to_target::run_retry(ctx.clone(), shutdown)),
    ];
    let mut first_error = None;
    for handle in handles {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                first_error.get_or_insert(err);
            }
            Err(join) => {
                first_error.get_or_insert(RelayError::Task(format!("pipeline task: {join}")));
            }
        }
    }
    ctx.store.close().await;
    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Sleep for `duration`, returning `true` when shutdown was requested
/// before or during the sleep.
pub(crate) async fn sleep_or_shutdown(
    shutdown: &mut watch::Receiver<bool>,
    duration: Duration,
) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = shutdown.changed() => true,
    }
}

/// Outcome of one submission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SubmitStatus {
    Submitted,
    /// Rejected by the configured contract filter.
    Filtered,
    /// The destination already holds this event or header.
    AlreadyDone,
    /// Destination resources are exhausted; park for the retry loop.
    NeedRetry,
}

/// Destination failures that park the event rather than fail it.
pub(crate) fn is_retriable(err: &RelayError) -> bool {
    match err {
        RelayError::InsufficientFunds { .. } => true,
        RelayError::Submission(msg) => msg.contains(UTXO_EXHAUSTED),
        _ => false,
    }
}

pub(crate) fn is_already_done(err: &RelayError) -> bool {
    matches!(err, RelayError::Submission(msg) if msg.contains(TX_ALREADY_DONE))
}

/// Whether the error came back from a destination broadcast (as opposed to
/// local proof or transaction construction).
pub(crate) fn is_broadcast_rejection(err: &RelayError) -> bool {
    matches!(err, RelayError::Submission(_))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utxo_exhaustion_is_retriable() {
        let err = RelayError::Submission(
            "invokeNativeContract error: chooseUtxos, current utxo is not enough".into(),
        );
        assert!(is_retriable(&err));
        assert!(!is_already_done(&err));
    }

    #[test]
    fn balance_shortfall_is_retriable() {
        let err = RelayError::InsufficientFunds {
            available: 5,
            required: 10,
        };
        assert!(is_retriable(&err));
        assert!(!is_broadcast_rejection(&err));
    }

    #[test]
    fn already_done_is_terminal_ok() {
        let err = RelayError::Submission("checkDoneTx, tx already done".into());
        assert!(is_already_done(&err));
        assert!(!is_retriable(&err));
    }

    #[test]
    fn other_failures_are_fatal() {
        let err = RelayError::Rpc("connection refused".into());
        assert!(!is_retriable(&err));
        assert!(!is_already_done(&err));
        assert!(!is_broadcast_rejection(&err));
    }
}
