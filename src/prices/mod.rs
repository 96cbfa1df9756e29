//! Price fan-out
//!
//! One `Bucket` per notional amount, each with its own graph and cycle set.
//! `Prices` routes edge updates to the right bucket's queue and broadcasts
//! head-tick wakes to all of them. All routing is non-blocking: a full queue
//! drops the item, because prices are level-triggered - the next update or
//! the next tick carries the same information again.

mod bucket;

pub use bucket::Bucket;

use crate::config::Config;
use crate::model::{Amm, Cycle, Notional};
use alloy_primitives::Address;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Where admitted cycles go. Implemented by the real scheduler handle and by
/// a no-op for graphs that run without one.
pub trait CycleSink: Send + Sync {
    fn add(&self, cycles: Vec<Arc<Cycle>>);
    fn update(&self, returns: HashMap<u64, f64>);
    fn remove(&self, hashes: HashSet<u64>);
}

/// Sink that swallows everything
pub struct NoopSink;

impl CycleSink for NoopSink {
    fn add(&self, _cycles: Vec<Arc<Cycle>>) {}
    fn update(&self, _returns: HashMap<u64, f64>) {}
    fn remove(&self, _hashes: HashSet<u64>) {}
}

/// A single rate observation from an AMM adapter
#[derive(Debug, Clone, Copy)]
pub struct EdgeUpdate {
    pub from: Address,
    pub to: Address,
    pub amm: Amm,
    pub rate: f64,
}

#[derive(Clone)]
pub(crate) struct BucketHandle {
    pub update_tx: mpsc::Sender<EdgeUpdate>,
    pub wake_tx: mpsc::Sender<()>,
}

/// Routing front for all buckets
#[derive(Clone)]
pub struct Prices {
    buckets: HashMap<Notional, BucketHandle>,
}

impl Prices {
    /// Build one bucket per configured amount, wired to `sink`. The returned
    /// `Bucket`s still need to be spawned with [`Bucket::run`].
    pub fn new(
        cfg: &Config,
        reference: Address,
        sink: Arc<dyn CycleSink>,
        head_driven: bool,
    ) -> (Prices, Vec<Bucket>) {
        let mut handles = HashMap::new();
        let mut buckets = Vec::new();

        for &size in &cfg.amount_buckets {
            let Some(amount) = Notional::from_eth(size) else {
                warn!("unknown amount bucket {size}, skipping");
                continue;
            };
            let (bucket, handle) = Bucket::new(amount, reference, sink.clone(), cfg, head_driven);
            handles.insert(amount, handle);
            buckets.push(bucket);
        }

        (Prices { buckets: handles }, buckets)
    }

    /// Route a rate observation to its bucket
    pub fn update(&self, from: Address, to: Address, amm: Amm, rate: f64, amount: Notional) {
        let Some(handle) = self.buckets.get(&amount) else {
            return;
        };
        let u = EdgeUpdate {
            from,
            to,
            amm,
            rate,
        };
        if handle.update_tx.try_send(u).is_err() {
            debug!(bucket = %amount, "update queue full, dropping rate observation");
        }
    }

    /// Wake every bucket on a new head. Missed wakes are fine - the state a
    /// tick observes is whatever the graph holds when it runs.
    pub fn broadcast_head(&self) {
        for handle in self.buckets.values() {
            let _ = handle.wake_tx.try_send(());
        }
    }
}

impl crate::feed::EdgeSink for Prices {
    fn update(&self, from: Address, to: Address, amm: Amm, rate: f64, amount: Notional) {
        Prices::update(self, from, to, amm, rate, amount)
    }
}
