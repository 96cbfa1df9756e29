//! The probe checker
//!
//! A probe is an `eth_call` against an on-chain helper contract that walks
//! the cycle's hops with the real pool state and reports what actually comes
//! back. The node does the heavy lifting; this side only encodes the route
//! and scales the answer. Reverts surface as call errors whose message
//! carries the contract's revert string.

use crate::model::Amm;
use alloy_primitives::{Address, I256, U256};
use alloy_provider::{Provider, RootProvider};
use alloy_rpc_types::{TransactionInput, TransactionRequest};
use alloy_sol_types::{sol, SolCall};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;

sol! {
    /// Helper-contract entry point: runs the cycle and returns the realized
    /// profit scaled by 1e18 (1.0 = break-even)
    function swap(uint256 amountIn, address[] tokens, uint256[] dexes) returns (int256 ret);
}

/// Gas cap for the simulated call
const CALL_GAS_LIMIT: u64 = 1_500_000;

/// Dry-runs a cycle. `check` resolves to the realized return where 1.0 is
/// break-even; timeouts and reverts come back as errors.
pub trait Checker: Send + Sync {
    fn check(
        &self,
        amount_wei: U256,
        tokens: Vec<Address>,
        amms: Vec<Amm>,
    ) -> BoxFuture<'static, eyre::Result<f64>>;
}

/// The real checker: `eth_call` through the node
pub struct CallChecker {
    provider: Arc<RootProvider>,
    from: Address,
    contract: Address,
}

impl CallChecker {
    pub fn new(provider: Arc<RootProvider>, from: Address, contract: Address) -> CallChecker {
        CallChecker {
            provider,
            from,
            contract,
        }
    }
}

impl Checker for CallChecker {
    fn check(
        &self,
        amount_wei: U256,
        tokens: Vec<Address>,
        amms: Vec<Amm>,
    ) -> BoxFuture<'static, eyre::Result<f64>> {
        let provider = self.provider.clone();
        let from = self.from;
        let contract = self.contract;

        async move {
            let call = swapCall {
                amountIn: amount_wei,
                tokens,
                dexes: Amm::to_params(&amms),
            };

            let tx = TransactionRequest {
                from: Some(from),
                to: Some(contract.into()),
                gas: Some(CALL_GAS_LIMIT),
                input: TransactionInput::new(call.abi_encode().into()),
                ..Default::default()
            };

            let out = provider.call(tx).await?;
            let ret: I256 = swapCall::abi_decode_returns(&out)?;
            scaled_return(ret)
        }
        .boxed()
    }
}

/// 1e18-scaled contract int to a plain multiplier
fn scaled_return(wei: I256) -> eyre::Result<f64> {
    let raw: i128 = wei
        .try_into()
        .map_err(|_| eyre::eyre!("helper returned out-of-range value {wei}"))?;
    Ok(raw as f64 / 1e18)
}
