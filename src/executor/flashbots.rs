//! Flashbots bundle submission
//!
//! Bundles go straight to the relay, never the public mempool: a failed
//! bundle costs nothing and is invisible to frontrunners. Requests are
//! authenticated with an ephemeral key generated at startup - the relay only
//! uses it for reputation, it never touches funds.
//!
//! Inclusion is detected the blunt way: wait for the target block, then see
//! whether the keeper's nonce advanced.

use crate::executor::Executor;
use crate::model::{Amm, Cycle, RunResult};
use crate::simulator::swapCall;
use alloy_consensus::{SignableTransaction, TxLegacy};
use alloy_eips::eip2718::Encodable2718;
use alloy_network::TxSignerSync;
use alloy_primitives::{keccak256, Address, U256};
use alloy_provider::{Provider, RootProvider};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::SolCall;
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::Client;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Flashbots relay endpoints
pub struct RelayEndpoints;

impl RelayEndpoints {
    /// Mainnet relay
    pub const MAINNET: &'static str = "https://relay.flashbots.net";
}

const CHAIN_ID: u64 = 1;
const BUNDLE_GAS_LIMIT: u64 = 1_500_000;
const RELAY_TIMEOUT: Duration = Duration::from_secs(5);
const INCLUSION_POLL: Duration = Duration::from_secs(1);

/// Client for signing and submitting arbitrage bundles
pub struct FlashbotsExecutor {
    provider: Arc<RootProvider>,
    http: Client,
    relay_url: String,
    /// Funds-bearing account that executes the cycle
    keeper: PrivateKeySigner,
    /// Ephemeral relay-auth identity
    auth: PrivateKeySigner,
    contract: Address,
    busy: Arc<AtomicBool>,
    next_id: AtomicU64,
}

/// Clears the busy flag however the submission ends, including a dropped
/// future when the cycle's token fires mid-flight
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl FlashbotsExecutor {
    pub fn new(
        provider: Arc<RootProvider>,
        relay_url: String,
        keeper: PrivateKeySigner,
        contract: Address,
    ) -> FlashbotsExecutor {
        let auth = PrivateKeySigner::random();
        info!(identity = %auth.address(), "relay auth key generated");

        FlashbotsExecutor {
            provider,
            http: Client::new(),
            relay_url,
            keeper,
            auth,
            contract,
            busy: Arc::new(AtomicBool::new(false)),
            next_id: AtomicU64::new(1),
        }
    }
}

impl Executor for FlashbotsExecutor {
    fn running(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    fn run(&self, cycle: Arc<Cycle>) -> BoxFuture<'static, eyre::Result<RunResult>> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return async { Err(eyre::eyre!("executor already running")) }.boxed();
        }
        let guard = BusyGuard(self.busy.clone());

        let provider = self.provider.clone();
        let http = self.http.clone();
        let relay_url = self.relay_url.clone();
        let keeper = self.keeper.clone();
        let auth = self.auth.clone();
        let contract = self.contract;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        async move {
            let _guard = guard;
            submit(provider, http, relay_url, keeper, auth, contract, cycle, id).await
        }
        .boxed()
    }
}

#[allow(clippy::too_many_arguments)]
async fn submit(
    provider: Arc<RootProvider>,
    http: Client,
    relay_url: String,
    keeper: PrivateKeySigner,
    auth: PrivateKeySigner,
    contract: Address,
    cycle: Arc<Cycle>,
    id: u64,
) -> eyre::Result<RunResult> {
    let nonce_before = provider.get_transaction_count(keeper.address()).await?;

    let call = swapCall {
        amountIn: cycle.amount.wei(),
        tokens: cycle.tokens.clone(),
        dexes: Amm::to_params(&cycle.amms),
    };

    let mut tx = TxLegacy {
        chain_id: Some(CHAIN_ID),
        nonce: nonce_before,
        gas_price: 0,
        gas_limit: BUNDLE_GAS_LIMIT,
        to: contract.into(),
        value: U256::ZERO,
        input: call.abi_encode().into(),
    };
    let sig = keeper.sign_transaction_sync(&mut tx)?;
    let raw = tx.into_signed(sig).encoded_2718();

    let head = provider.get_block_number().await?;
    let target = head + 1;

    let body = serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "eth_sendBundle",
        "params": [{
            "txs": [format!("0x{}", hex::encode(&raw))],
            "blockNumber": format!("0x{target:x}"),
        }],
    })
    .to_string();

    let signature = auth.sign_message_sync(keccak256(body.as_bytes()).as_slice())?;
    let header = format!(
        "{}:0x{}",
        auth.address(),
        hex::encode(signature.as_bytes())
    );

    debug!(hash = cycle.hash(), target, "sending bundle");
    let resp = http
        .post(&relay_url)
        .header("Content-Type", "application/json")
        .header("X-Flashbots-Signature", header)
        .timeout(RELAY_TIMEOUT)
        .body(body)
        .send()
        .await?;

    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        eyre::bail!("relay returned {status}: {text}");
    }

    let included = wait_for_inclusion(&provider, keeper.address(), nonce_before, target).await?;
    info!(hash = cycle.hash(), target, included, "bundle resolved");

    Ok(RunResult {
        success: included,
        error: None,
    })
}

async fn wait_for_inclusion(
    provider: &RootProvider,
    keeper: Address,
    nonce_before: u64,
    target: u64,
) -> eyre::Result<bool> {
    loop {
        let head = provider.get_block_number().await?;
        if head >= target {
            let nonce = provider.get_transaction_count(keeper).await?;
            return Ok(nonce > nonce_before);
        }
        tokio::time::sleep(INCLUSION_POLL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Half, Notional};
    use alloy_primitives::address;
    use petgraph::graph::NodeIndex;

    fn test_executor() -> FlashbotsExecutor {
        // points nowhere; these tests never let a submission reach the wire
        let provider = Arc::new(RootProvider::new_http(
            "http://127.0.0.1:1".parse().unwrap(),
        ));
        FlashbotsExecutor::new(
            provider,
            RelayEndpoints::MAINNET.to_string(),
            PrivateKeySigner::random(),
            address!("b8a68725d217e5cd7f7a13df51c2116ef3576917"),
        )
    }

    fn cycle() -> Arc<Cycle> {
        let legs = vec![
            Half {
                to: NodeIndex::new(0),
                weight: 0.1,
                amm: Amm::Sushiswap,
            },
            Half {
                to: NodeIndex::new(1),
                weight: -0.2,
                amm: Amm::UniswapV2,
            },
        ];
        let mut c = Cycle::new(legs, 1.1, Notional::Eth1, NodeIndex::new(0));
        c.set_route(
            vec![
                address!("c02aaa39b223fe8d0a0e5c4f27ead9083c756cc2"),
                address!("00000000000000000000000000000000000000aa"),
            ],
            vec![Amm::Sushiswap, Amm::UniswapV2],
        );
        Arc::new(c)
    }

    #[tokio::test]
    async fn test_single_flight() {
        let exec = test_executor();
        assert!(!exec.running());

        // first entry takes the flag even before the future is polled
        let first = exec.run(cycle());
        assert!(exec.running());

        // second entry is refused, not queued
        let err = exec.run(cycle()).await.unwrap_err();
        assert!(err.to_string().contains("already running"));

        // abandoning the first submission clears the flag
        drop(first);
        assert!(!exec.running());

        // and a fresh run may enter again
        let again = exec.run(cycle());
        assert!(exec.running());
        drop(again);
        assert!(!exec.running());
    }
}
