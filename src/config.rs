//! Configuration
//!
//! Environment variables first (with `.env` support), optionally overlaid by
//! a TOML file, finally overridden by CLI flags in `main`. Every knob has a
//! production default; the binary runs with nothing configured except a
//! node endpoint worth talking to.

use crate::model::Notional;
use alloy_primitives::Address;
use eyre::{Result, WrapErr};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration struct
#[derive(Debug, Clone)]
pub struct Config {
    /// Node endpoint (HTTP)
    pub ipc: String,

    /// Gate real submissions
    pub live: bool,

    /// Load JSON caches at startup
    pub load: bool,

    /// Verbose per-cycle diagnostics
    pub metrics: bool,

    /// Bucket tick interval when not head-driven
    pub interval: Duration,

    /// Trade sizes to track, in ETH
    pub amount_buckets: Vec<f64>,

    /// Largest bucket eligible for probing and live submission
    pub max_live_amount: Notional,

    /// Concurrent probe permits
    pub probe_parallelism: usize,

    /// Minimum gap between two live submissions
    pub min_tx_wait: Duration,

    /// Negative-cycle scan deadline
    pub scan_deadline: Duration,

    /// Per-probe deadline
    pub probe_deadline: Duration,

    /// Returns at or above this are upstream bugs: held, never acted on
    pub return_ceiling: f64,

    /// How long a (return, hash) pair is barred from re-submission
    pub retry_suppression: Duration,

    /// Also run the unbounded cycle search on each scan
    pub deep_scan: bool,

    /// Private bundle relay
    pub relay_url: String,

    /// Sender used for checker eth_calls
    pub checker_from: Address,

    /// Helper contract the checker calls
    pub checker_contract: Address,

    /// Helper contract live bundles call
    pub executor_contract: Address,

    /// Keeper private key (hex); live submissions are disabled without it
    pub keeper_key: Option<String>,

    /// Directory for JSON caches
    pub data_dir: PathBuf,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Config {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let d = Config::default();

        Config {
            ipc: env::var("RPC_URL").unwrap_or(d.ipc),
            live: env_parse("LIVE", d.live),
            load: env_parse("LOAD", d.load),
            metrics: env_parse("METRICS", d.metrics),
            interval: Duration::from_millis(env_parse("INTERVAL_MS", 200)),
            amount_buckets: env::var("AMOUNT_BUCKETS")
                .ok()
                .map(|s| parse_buckets(&s))
                .unwrap_or(d.amount_buckets),
            max_live_amount: env::var("MAX_LIVE_AMOUNT")
                .ok()
                .and_then(|s| s.parse().ok())
                .and_then(Notional::from_eth)
                .unwrap_or(d.max_live_amount),
            probe_parallelism: env_parse("PROBE_PARALLELISM", d.probe_parallelism),
            min_tx_wait: Duration::from_millis(env_parse("MIN_TX_WAIT_MS", 1000)),
            scan_deadline: Duration::from_millis(env_parse("SCAN_DEADLINE_MS", 2000)),
            probe_deadline: Duration::from_millis(env_parse("PROBE_DEADLINE_MS", 1000)),
            return_ceiling: env_parse("RETURN_CEILING", d.return_ceiling),
            retry_suppression: Duration::from_millis(env_parse("RETRY_SUPPRESSION_MS", 10_000)),
            deep_scan: env_parse("DEEP_SCAN", d.deep_scan),
            relay_url: env::var("RELAY_URL").unwrap_or(d.relay_url),
            checker_from: env_parse("CHECKER_FROM", d.checker_from),
            checker_contract: env_parse("CHECKER_CONTRACT", d.checker_contract),
            executor_contract: env_parse("EXECUTOR_CONTRACT", d.executor_contract),
            keeper_key: env::var("KEEPER_KEY").ok(),
            data_dir: env::var("DATA_DIR").map(PathBuf::from).unwrap_or(d.data_dir),
        }
    }

    /// Environment config overlaid with an optional TOML file
    pub fn load(file: Option<&Path>) -> Result<Config> {
        let mut cfg = Config::from_env();
        let Some(path) = file else {
            return Ok(cfg);
        };

        let raw = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("reading config file {}", path.display()))?;
        let overlay: FileConfig = toml::from_str(&raw)
            .wrap_err_with(|| format!("parsing config file {}", path.display()))?;
        overlay.apply(&mut cfg)?;

        Ok(cfg)
    }
}

impl Default for Config {
    fn default() -> Config {
        Config {
            ipc: "http://localhost:8545".to_string(),
            live: false,
            load: true,
            metrics: false,
            interval: Duration::from_millis(200),
            amount_buckets: Notional::ALL.iter().map(|n| n.eth()).collect(),
            max_live_amount: Notional::MAX_LIVE,
            probe_parallelism: 10,
            min_tx_wait: Duration::from_secs(1),
            scan_deadline: Duration::from_secs(2),
            probe_deadline: Duration::from_secs(1),
            return_ceiling: 1.5,
            retry_suppression: Duration::from_secs(10),
            deep_scan: false,
            relay_url: crate::executor::RelayEndpoints::MAINNET.to_string(),
            checker_from: alloy_primitives::address!("f94e0580684b30c18249b270262232a5fd145611"),
            checker_contract: alloy_primitives::address!(
                "b8a68725d217e5cd7f7a13df51c2116ef3576917"
            ),
            executor_contract: Address::ZERO,
            keeper_key: None,
            data_dir: PathBuf::from("data"),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn parse_buckets(s: &str) -> Vec<f64> {
    s.split(',')
        .filter_map(|p| p.trim().parse().ok())
        .collect()
}

/// TOML overlay: every key optional, durations in milliseconds
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    ipc: Option<String>,
    live: Option<bool>,
    load: Option<bool>,
    metrics: Option<bool>,
    interval_ms: Option<u64>,
    amount_buckets: Option<Vec<f64>>,
    max_live_amount: Option<f64>,
    probe_parallelism: Option<usize>,
    min_tx_wait_ms: Option<u64>,
    scan_deadline_ms: Option<u64>,
    probe_deadline_ms: Option<u64>,
    return_ceiling: Option<f64>,
    retry_suppression_ms: Option<u64>,
    deep_scan: Option<bool>,
    relay_url: Option<String>,
    checker_from: Option<Address>,
    checker_contract: Option<Address>,
    executor_contract: Option<Address>,
    keeper_key: Option<String>,
    data_dir: Option<PathBuf>,
}

impl FileConfig {
    fn apply(self, cfg: &mut Config) -> Result<()> {
        macro_rules! set {
            ($field:ident) => {
                if let Some(v) = self.$field {
                    cfg.$field = v;
                }
            };
        }

        set!(ipc);
        set!(live);
        set!(load);
        set!(metrics);
        set!(amount_buckets);
        set!(probe_parallelism);
        set!(return_ceiling);
        set!(deep_scan);
        set!(relay_url);
        set!(checker_from);
        set!(checker_contract);
        set!(executor_contract);
        if let Some(v) = self.keeper_key {
            cfg.keeper_key = Some(v);
        }
        set!(data_dir);

        if let Some(ms) = self.interval_ms {
            cfg.interval = Duration::from_millis(ms);
        }
        if let Some(ms) = self.min_tx_wait_ms {
            cfg.min_tx_wait = Duration::from_millis(ms);
        }
        if let Some(ms) = self.scan_deadline_ms {
            cfg.scan_deadline = Duration::from_millis(ms);
        }
        if let Some(ms) = self.probe_deadline_ms {
            cfg.probe_deadline = Duration::from_millis(ms);
        }
        if let Some(ms) = self.retry_suppression_ms {
            cfg.retry_suppression = Duration::from_millis(ms);
        }
        if let Some(eth) = self.max_live_amount {
            cfg.max_live_amount = Notional::from_eth(eth)
                .ok_or_else(|| eyre::eyre!("max_live_amount {eth} is not a known bucket"))?;
        }

        Ok(())
    }
}
