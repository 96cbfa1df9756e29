//! Gyre - cross-AMM arbitrage cycle detector
//!
//! A gyre is a current that circles back on itself. This bot hunts for the
//! same thing in AMM prices: token cycles whose rates multiply to more than
//! one, kept live per trade size, probed off-chain, and the best survivor
//! submitted as a private bundle.
//!
//! Pipeline: head tick -> adapters publish rates -> per-bucket graphs ->
//! bounded negative-cycle scan -> cycle registry -> probe -> live bundle.

use clap::{ArgAction, Parser};
use color_eyre::eyre::{eyre, Result};
use console::style;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use alloy_provider::{Provider, RootProvider};
use alloy_signer_local::PrivateKeySigner;

mod config;
mod executor;
mod feed;
mod graph;
mod model;
mod prices;
mod scheduler;
mod simulator;
mod tokens;

use config::Config;
use executor::{Executor, FlashbotsExecutor, NoopExecutor};
use feed::Store;
use prices::Prices;
use scheduler::Scheduler;
use simulator::{CallChecker, Checker};

/// Restart to pick up newly listed tokens and pools
const RESTART_AFTER: Duration = Duration::from_secs(12 * 3600);

#[derive(Parser)]
#[command(name = "gyre", about = "Cross-AMM arbitrage cycle detection and scheduling")]
struct Args {
    /// Enable live bundle submission
    #[arg(long, action = ArgAction::Set, default_value_t = true)]
    live: bool,

    /// Load JSON caches at startup
    #[arg(long, action = ArgAction::Set, default_value_t = true)]
    load: bool,

    /// Verbose per-cycle diagnostics
    #[arg(long, action = ArgAction::Set, default_value_t = false)]
    metrics: bool,

    /// Node endpoint, overrides RPC_URL
    #[arg(long)]
    ipc: Option<String>,

    /// Optional TOML config file
    #[arg(long)]
    config: Option<PathBuf>,
}

fn print_banner() {
    println!();
    println!("{}", style("=============================================").cyan());
    println!("{}", style("  GYRE - arbitrage cycle detector").cyan().bold());
    println!("{}", style("=============================================").cyan());
    println!();
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("gyre=info".parse()?),
        )
        .init();

    print_banner();

    let args = Args::parse();
    let mut cfg = Config::load(args.config.as_deref())?;
    cfg.live = args.live;
    cfg.load = args.load;
    cfg.metrics = args.metrics;
    if let Some(ipc) = args.ipc {
        cfg.ipc = ipc;
    }

    // Dial the node; startup is the only place a connection failure aborts
    let provider = Arc::new(RootProvider::new_http(cfg.ipc.parse()?));
    let mut tries = 0;
    let head = loop {
        match provider.get_block_number().await {
            Ok(n) => break n,
            Err(e) if tries < 5 => {
                tries += 1;
                warn!("dialing {} failed (try {tries}): {e}", cfg.ipc);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            Err(e) => return Err(eyre!("node {} unreachable: {e}", cfg.ipc)),
        }
    };
    info!(endpoint = %cfg.ipc, head, "node connected");

    if cfg.load {
        let store = Store::new(&cfg.data_dir);
        match store.load_tokens() {
            Ok(t) => info!("loaded {} cached tokens", t.len()),
            Err(e) => warn!("token cache unreadable: {e}"),
        }
        match store.load_pools() {
            Ok(p) => info!("loaded {} cached pools", p.len()),
            Err(e) => warn!("pool cache unreadable: {e}"),
        }
    }

    let checker: Arc<dyn Checker> = Arc::new(CallChecker::new(
        provider.clone(),
        cfg.checker_from,
        cfg.checker_contract,
    ));

    let live_executor: Arc<dyn Executor> = if cfg.live {
        match cfg.keeper_key.as_deref() {
            Some(key) => {
                let keeper: PrivateKeySigner =
                    key.parse().map_err(|e| eyre!("bad keeper key: {e}"))?;
                info!(keeper = %keeper.address(), relay = %cfg.relay_url, "live submission armed");
                Arc::new(FlashbotsExecutor::new(
                    provider.clone(),
                    cfg.relay_url.clone(),
                    keeper,
                    cfg.executor_contract,
                ))
            }
            None => {
                warn!("live mode requested without KEEPER_KEY, submissions disabled");
                cfg.live = false;
                Arc::new(NoopExecutor)
            }
        }
    } else {
        Arc::new(NoopExecutor)
    };

    let (sched, sched_handle) = Scheduler::new(&cfg, checker, live_executor);
    let (prices, buckets) = Prices::new(&cfg, tokens::WETH, Arc::new(sched_handle), true);
    info!(
        buckets = cfg.amount_buckets.len(),
        live = cfg.live,
        "pipeline assembled",
    );

    let root = CancellationToken::new();
    let mut tasks = JoinSet::new();

    tasks.spawn(sched.run(root.clone()));
    for bucket in buckets {
        tasks.spawn(bucket.run(root.clone()));
    }

    // Head ticks fan out to every bucket; AMM adapters publish rates through
    // the feed::EdgeSink side of `prices` out of process
    let (head_tx, mut head_rx) = mpsc::channel(1);
    tasks.spawn(feed::watch_heads(provider.clone(), head_tx, root.clone()));
    {
        let prices: Prices = prices.clone();
        let root = root.clone();
        tasks.spawn(async move {
            loop {
                tokio::select! {
                    _ = root.cancelled() => break,
                    Some(()) = head_rx.recv() => prices.broadcast_head(),
                }
            }
        });
    }

    let restart = tokio::time::sleep(RESTART_AFTER);
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt, shutting down");
        }
        _ = restart => {
            root.cancel();
            while tasks.join_next().await.is_some() {}
            return Err(eyre!("restart to pick up new tokens and pools"));
        }
    }

    root.cancel();
    while tasks.join_next().await.is_some() {}
    Ok(())
}
