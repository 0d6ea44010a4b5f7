//! Relayer binary: load configuration and wallets, open the store, and run
//! the sync engine until an exit signal.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use eyre::WrapErr;
use tracing_subscriber::filter::LevelFilter;

use crosslink_relayer::{
    Config, Context,
    chains::{relay::RelayClient, target::TargetClient},
    db::Store,
    engine,
    wallet::Account,
};

#[derive(Parser, Debug)]
#[command(name = "crosslink")]
#[command(about = "Bidirectional cross-chain relayer")]
struct Args {
    /// Log verbosity, 0 (errors only) through 7 (trace)
    #[arg(long, default_value_t = 2)]
    loglevel: u8,

    /// Path to the JSON configuration file
    #[arg(long, default_value = "./config.json")]
    config: PathBuf,

    /// Target-chain wallet password; prompted when omitted
    #[arg(long)]
    target_password: Option<String>,

    /// Relay-chain wallet password; prompted when omitted
    #[arg(long)]
    relay_password: Option<String>,
}

fn level_filter(loglevel: u8) -> LevelFilter {
    match loglevel {
        0 | 1 => LevelFilter::ERROR,
        2 => LevelFilter::WARN,
        3 => LevelFilter::INFO,
        4 | 5 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

fn password(provided: Option<String>, prompt: &str) -> eyre::Result<String> {
    match provided {
        Some(password) => Ok(password),
        None => rpassword::prompt_password(prompt).wrap_err("read password"),
    }
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(level_filter(args.loglevel).into())
                .from_env_lossy(),
        )
        .init();

    let config = Config::load(&args.config).wrap_err("load configuration")?;

    let relay_password = password(args.relay_password, "Relay wallet password: ")?;
    let relay_account =
        Account::open(&config.relay_wallet_file, &relay_password).wrap_err("relay wallet")?;
    let target_password = password(args.target_password, "Target wallet password: ")?;
    let target_account =
        Account::open(&config.target_wallet_file, &target_password).wrap_err("target wallet")?;

    let store = Store::open(&config.db_path).await.wrap_err("open store")?;
    let relay = RelayClient::new(&config.relay_rpc_url).wrap_err("relay client")?;
    let target = TargetClient::new(&config.target_rpc_url).wrap_err("target client")?;

    // The relay chain's federation id comes from its genesis header.
    let relay_chain_id = relay
        .get_header_by_height(0)
        .await
        .wrap_err("fetch relay genesis header")?
        .chain_id;

    tracing::info!(
        relay_chain_id,
        target_chain_id = config.target_chain_id,
        relay_account = %relay_account.address(),
        target_account = %target_account.address(),
        "starting relayer"
    );

    let ctx = Arc::new(Context {
        config,
        store,
        relay,
        target,
        relay_account,
        target_account,
        relay_chain_id,
    });

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        wait_for_exit_signal().await;
        tracing::info!("exit signal received, finishing current cycles");
        let _ = shutdown_tx.send(true);
    });

    engine::run(ctx, shutdown_rx).await.wrap_err("sync engine")?;
    tracing::info!("relayer stopped");
    Ok(())
}

async fn wait_for_exit_signal() {
    use tokio::signal::unix::{SignalKind, signal};
    let mut interrupt = match signal(SignalKind::interrupt()) {
        Ok(signal) => signal,
        Err(err) => {
            tracing::error!(%err, "cannot install SIGINT handler");
            return std::future::pending::<()>().await;
        }
    };
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(signal) => signal,
        Err(err) => {
            tracing::error!(%err, "cannot install SIGTERM handler");
            return std::future::pending::<()>().await;
        }
    };
    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(signal) => signal,
        Err(err) => {
            tracing::error!(%err, "cannot install SIGHUP handler");
            return std::future::pending::<()>().await;
        }
    };
    tokio::select! {
        _ = interrupt.recv() => {}
        _ = terminate.recv() => {}
        _ = hangup.recv() => {}
    }
}
