//! Market feeds
//!
//! The boundary where the outside world meets the pipeline:
//! - `EdgeSink` is the contract AMM adapters publish through, one call per
//!   pool change per notional bucket
//! - `heads` watches for new blocks and turns them into unit ticks
//! - `store` reads and writes the JSON caches under `data/`
//!
//! Reserve fetching and per-pool `amountOut` math live with the adapters,
//! not here; a rate arrives already adjusted for token decimals.

mod heads;
mod store;

pub use heads::watch_heads;
pub use store::{PoolRecord, Store, StoreError, TokenRecord};

use crate::model::{Amm, Notional};
use alloy_primitives::Address;

/// Where AMM adapters publish rate observations.
///
/// `rate` is out/in in the pool's native units, multiplied by
/// `10^(decimals_in - decimals_out)`, and must be positive; a zero rate is
/// treated as "price unknown" and dropped downstream.
pub trait EdgeSink: Send + Sync {
    fn update(&self, from: Address, to: Address, amm: Amm, rate: f64, amount: Notional);
}
