//! Probe dispatch
//!
//! A probe is a dry-run of a cycle through the off-chain checker. Each one
//! runs as a detached task holding a semaphore permit, bounded by the probe
//! deadline AND the cycle's cancel token - an evicted cycle aborts its
//! in-flight probe immediately. The outcome returns through the scheduler's
//! result channel; arrival order is not dispatch order and nothing here
//! assumes it is.

use crate::model::{Cycle, TestResult};
use crate::simulator::Checker;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::OwnedSemaphorePermit;
use tracing::{info, warn};

pub(crate) fn dispatch(
    cycle: Arc<Cycle>,
    predicted: f64,
    checker: Arc<dyn Checker>,
    deadline: Duration,
    result_tx: mpsc::Sender<HashMap<u64, TestResult>>,
    permit: OwnedSemaphorePermit,
) {
    tokio::spawn(async move {
        let _permit = permit;
        let started = Instant::now();
        let token = cycle.cancel_token();

        let check = checker.check(
            cycle.amount.wei(),
            cycle.tokens.clone(),
            cycle.amms.clone(),
        );

        let outcome = tokio::select! {
            _ = token.cancelled() => Err(eyre::eyre!("cycle evicted")),
            res = tokio::time::timeout(deadline, check) => match res {
                Ok(r) => r,
                Err(_) => Err(eyre::eyre!("probe deadline exceeded")),
            },
        };

        let dur_ms = started.elapsed().as_millis() as u64;
        let result = match outcome {
            Ok(realized) => {
                info!(
                    hash = cycle.hash(),
                    predicted,
                    realized,
                    amt = %cycle.amount,
                    len = cycle.tokens.len(),
                    dur_ms,
                    "probe ok",
                );
                TestResult {
                    success: true,
                    error: None,
                    ret: realized,
                    gas_used: 0,
                }
            }
            Err(e) => {
                warn!(
                    hash = cycle.hash(),
                    predicted,
                    amt = %cycle.amount,
                    len = cycle.tokens.len(),
                    dur_ms,
                    "probe failed: {e:#}",
                );
                TestResult {
                    success: false,
                    error: Some(format!("{e:#}")),
                    ret: 0.0,
                    gas_used: 0,
                }
            }
        };

        let _ = result_tx.send(HashMap::from([(cycle.hash(), result)])).await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Amm, Half, Notional};
    use alloy_primitives::{address, Address, U256};
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use petgraph::graph::NodeIndex;
    use tokio::sync::Semaphore;

    const W: Address = address!("c02aaa39b223fe8d0a0e5c4f27ead9083c756cc2");
    const A: Address = address!("00000000000000000000000000000000000000aa");

    struct SlowChecker;

    impl Checker for SlowChecker {
        fn check(
            &self,
            _amount_wei: U256,
            _tokens: Vec<Address>,
            _amms: Vec<Amm>,
        ) -> BoxFuture<'static, eyre::Result<f64>> {
            async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(0.5)
            }
            .boxed()
        }
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
        c.set_route(vec![W, A], vec![Amm::Sushiswap, Amm::UniswapV2]);
        Arc::new(c)
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_bounds_a_stuck_checker() {
        let (tx, mut rx) = mpsc::channel(1);
        let permits = Arc::new(Semaphore::new(1));
        let permit = permits.clone().try_acquire_owned().unwrap();

        dispatch(
            cycle(),
            1.1,
            Arc::new(SlowChecker),
            Duration::from_secs(1),
            tx,
            permit,
        );

        let results = rx.recv().await.unwrap();
        let res = results.values().next().unwrap();
        assert!(!res.success);
        assert!(res.error.as_deref().unwrap().contains("deadline"));

        // permit released with the task
        assert_eq!(permits.available_permits(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_aborts_inflight_probe() {
        let (tx, mut rx) = mpsc::channel(1);
        let permits = Arc::new(Semaphore::new(1));
        let permit = permits.clone().try_acquire_owned().unwrap();

        let c = cycle();
        dispatch(
            c.clone(),
            1.1,
            Arc::new(SlowChecker),
            Duration::from_secs(30),
            tx,
            permit,
        );

        c.cancel();
        let results = rx.recv().await.unwrap();
        let res = &results[&c.hash()];
        assert!(!res.success);
        assert!(res.error.as_deref().unwrap().contains("evicted"));
    }
}
