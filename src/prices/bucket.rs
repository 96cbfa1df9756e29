//! Per-bucket event loop
//!
//! All state for one notional amount - the price graph and the live cycle
//! set - is owned by a single task and mutated only inside its loop, so the
//! hot path needs no locks. Four inputs are multiplexed:
//!
//! - edge updates (bounded, 200): applied to the graph in arrival order
//! - cycle candidates (bounded, 100): admitted if unseen and above threshold
//! - the recompute tick: re-price every live cycle off the distance matrix
//! - the scan tick / head wake: snapshot the graph and enumerate cycles on a
//!   short-lived task
//!
//! Scans write back through the candidate channel, so an admission is always
//! observed after the edge updates that enabled it. A scan that outlives its
//! deadline is simply abandoned; the next tick starts a fresh one.

use crate::config::Config;
use crate::graph::{find_negative_cycle, negative_cycles, PriceGraph};
use crate::model::{Cycle, Notional};
use crate::prices::{BucketHandle, CycleSink, EdgeUpdate};
use alloy_primitives::Address;
use petgraph::graph::NodeIndex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

const UPDATE_BUFFER: usize = 200;
const CANDIDATE_BUFFER: usize = 100;

/// Effectively-never interval used when ticking is head-driven
const IDLE: Duration = Duration::from_secs(365 * 24 * 3600);

struct Registered {
    cycle: Arc<Cycle>,
    ret: f64,
}

/// One notional amount's graph, cycle registry and event loop
pub struct Bucket {
    amount: Notional,
    threshold: f64,
    graph: PriceGraph,
    cycles: HashMap<u64, Registered>,
    sink: Arc<dyn CycleSink>,

    update_rx: mpsc::Receiver<EdgeUpdate>,
    candidate_rx: mpsc::Receiver<Vec<Arc<Cycle>>>,
    wake_rx: mpsc::Receiver<()>,
    /// Handed to scan tasks so results re-enter through the loop
    candidate_tx: mpsc::Sender<Vec<Arc<Cycle>>>,

    interval: Duration,
    scan_deadline: Duration,
    deep_scan: bool,
    head_driven: bool,
    verbose: bool,
}

impl Bucket {
    pub(crate) fn new(
        amount: Notional,
        reference: Address,
        sink: Arc<dyn CycleSink>,
        cfg: &Config,
        head_driven: bool,
    ) -> (Bucket, BucketHandle) {
        let (update_tx, update_rx) = mpsc::channel(UPDATE_BUFFER);
        let (candidate_tx, candidate_rx) = mpsc::channel(CANDIDATE_BUFFER);
        let (wake_tx, wake_rx) = mpsc::channel(1);

        let bucket = Bucket {
            amount,
            threshold: amount.threshold(),
            graph: PriceGraph::new(reference),
            cycles: HashMap::new(),
            sink,
            update_rx,
            candidate_rx,
            wake_rx,
            candidate_tx,
            interval: cfg.interval,
            scan_deadline: cfg.scan_deadline,
            deep_scan: cfg.deep_scan,
            head_driven,
            verbose: cfg.metrics,
        };

        (bucket, BucketHandle { update_tx, wake_tx })
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        let tick = if self.head_driven { IDLE } else { self.interval };
        let start = tokio::time::Instant::now() + tick;
        let mut recompute_tick = tokio::time::interval_at(start, tick);
        let mut scan_tick = tokio::time::interval_at(start, tick);
        recompute_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        scan_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        debug!(bucket = %self.amount, threshold = self.threshold, "bucket loop started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,

                Some(update) = self.update_rx.recv() => {
                    self.apply_update(update);
                }

                Some(candidates) = self.candidate_rx.recv() => {
                    if candidates.is_empty() {
                        continue;
                    }
                    let added = self.admit(candidates);
                    if !added.is_empty() {
                        self.sink.add(added);
                    }
                }

                Some(()) = self.wake_rx.recv() => {
                    self.recompute_returns();
                    self.spawn_scan();
                }

                _ = recompute_tick.tick() => {
                    self.recompute_returns();
                }

                _ = scan_tick.tick() => {
                    self.spawn_scan();
                }
            }
        }

        debug!(bucket = %self.amount, "bucket loop stopped");
    }

    /// Convert a rate observation to a weight and apply the upsert policy.
    /// A zero rate marks an unset price and is dropped without comment.
    fn apply_update(&mut self, u: EdgeUpdate) {
        if u.rate == 0.0 {
            return;
        }

        let from = self.graph.ensure_vertex(u.from);
        let to = self.graph.ensure_vertex(u.to);
        self.graph.upsert_edge(from, to, u.amm, -u.rate.ln());
    }

    /// Register candidates that are new and clear the admission threshold;
    /// returns the ones actually added.
    fn admit(&mut self, candidates: Vec<Arc<Cycle>>) -> Vec<Arc<Cycle>> {
        let mut added = Vec::new();

        for c in candidates {
            if self.cycles.contains_key(&c.hash()) || c.gross_return < self.threshold {
                continue;
            }
            trace!(bucket = %self.amount, hash = c.hash(), ret = c.gross_return, "cycle admitted");
            self.cycles.insert(
                c.hash(),
                Registered {
                    ret: c.gross_return,
                    cycle: c.clone(),
                },
            );
            added.push(c);
        }

        added
    }

    /// Re-price every live cycle from the current single-hop distance
    /// matrix. Deliberately NOT the edge instances it was discovered on: if a better
    /// venue took over a hop since discovery, the cycle is re-priced on the
    /// better venue. Cycles falling under the threshold are evicted.
    fn recompute_returns(&mut self) {
        if self.cycles.is_empty() {
            return;
        }

        let dm = self.graph.distance_matrix();

        let mut updates: HashMap<u64, f64> = HashMap::new();
        let mut old_returns: HashMap<u64, f64> = HashMap::new();
        let mut evict: HashSet<u64> = HashSet::new();

        for (&hash, reg) in self.cycles.iter_mut() {
            let path = &reg.cycle.path;
            let mut total = 0.0;
            for i in 0..path.len() {
                let j = (i + 1) % path.len();
                if path[i].to == path[j].to {
                    continue;
                }
                total += dm[path[i].to.index()][path[j].to.index()];
            }

            let ret = (-total).exp();
            if ret != reg.ret {
                old_returns.insert(hash, reg.ret);
                reg.ret = ret;
                updates.insert(hash, ret);

                if ret < self.threshold {
                    evict.insert(hash);
                }
            }
        }

        if !updates.is_empty() {
            self.sink.update(updates);
        }
        if evict.is_empty() {
            return;
        }

        for &hash in &evict {
            if let Some(reg) = self.cycles.remove(&hash) {
                reg.cycle.cancel();

                let age_s = (reg.cycle.age().as_secs_f64() * 10.0).round() / 10.0;
                if self.verbose {
                    info!(
                        bucket = %self.amount,
                        hash,
                        len = reg.cycle.len(),
                        route = %crate::tokens::route(&reg.cycle.tokens),
                        old_return = old_returns.get(&hash).copied(),
                        age_s,
                        "cycle evicted",
                    );
                } else {
                    debug!(bucket = %self.amount, hash, age_s, "cycle evicted");
                }
            }
        }

        self.sink.remove(evict);
    }

    /// Snapshot the graph and enumerate on a short-lived task. Results come
    /// back through the candidate channel; a slow scan cannot hold up the
    /// next batch of edge updates.
    fn spawn_scan(&self) {
        let snapshot = self.graph.snapshot();
        let amount = self.amount;
        let deadline = Instant::now() + self.scan_deadline;
        let deep = self.deep_scan;
        let tx = self.candidate_tx.clone();

        tokio::spawn(async move {
            scan(snapshot, amount, deadline, deep, tx).await;
        });
    }
}

async fn scan(
    snapshot: PriceGraph,
    amount: Notional,
    deadline: Instant,
    deep: bool,
    tx: mpsc::Sender<Vec<Arc<Cycle>>>,
) {
    let started = Instant::now();
    let zero = NodeIndex::new(0);
    let mut found: Vec<Arc<Cycle>> = Vec::new();

    let res = negative_cycles(&snapshot, deadline, |legs| {
        let total: f64 = legs.iter().map(|h| h.weight).sum();
        let ret = (-total).exp();
        if total.is_finite() && ret > 1.0 {
            if let Some(c) = canonicalize(&snapshot, legs.to_vec(), ret, amount) {
                found.push(Arc::new(c));
            }
        }
        true
    });

    if let Err(e) = res {
        error!(bucket = %amount, "scan aborted, upstream adapter is emitting invalid rates: {e}");
        return;
    }

    if deep {
        if let Some(legs) = find_negative_cycle(&snapshot, zero) {
            let total: f64 = legs.iter().map(|h| h.weight).sum();
            let ret = (-total).exp();
            if total.is_finite() && ret > 1.0 {
                if let Some(c) = canonicalize(&snapshot, legs, ret, amount) {
                    found.push(Arc::new(c));
                }
            }
        }
    }

    debug!(
        bucket = %amount,
        found = found.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "scan done",
    );

    if !found.is_empty() {
        let _ = tx.send(found).await;
    }
}

/// Rotate the reference token to the front and attach route metadata. Cycles
/// that never touch the reference token are of no use and dropped.
fn canonicalize(
    snapshot: &PriceGraph,
    legs: Vec<crate::model::Half>,
    ret: f64,
    amount: Notional,
) -> Option<Cycle> {
    let mut c = Cycle::new(legs, ret, amount, NodeIndex::new(0));
    if !c.starts_with_ref {
        return None;
    }

    let tokens = c.path.iter().map(|h| snapshot.address(h.to)).collect();
    let amms = c.path.iter().map(|h| h.amm).collect();
    c.set_route(tokens, amms);
    Some(c)
}
