//! Cycle scheduler
//!
//! Owns the registry of every live cycle across all buckets and decides, on
//! a 5 ms cadence, which candidates get probed and which single survivor
//! goes out live. Four channels feed the loop (adds, return updates,
//! removals, probe results); registry state is touched only inside it.
//!
//! Probing policy: candidates are ranked ascending by current return -
//! low-confidence candidates get probed first, spreading simulation budget
//! across the long tail instead of hammering the top pick. Probes run as
//! detached tasks behind a permit semaphore and never block the loop.
//!
//! Live policy: at most one submission in flight, at most one per wait
//! window, never the same (return, hash) pair twice inside the suppression
//! window, and never a cycle whose probe reverted.

mod probe;

use crate::config::Config;
use crate::executor::Executor;
use crate::model::{Cycle, Notional, TestResult};
use crate::prices::CycleSink;
use crate::simulator::Checker;
use dashmap::{DashMap, DashSet};
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::Semaphore;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const CHANNEL_BUFFER: usize = 100;
const TICK: Duration = Duration::from_millis(5);
/// Ticks between diagnostic summaries (~10 s at the 5 ms cadence)
const REPORT_EVERY: u64 = 2000;

struct Tracked {
    cycle: Arc<Cycle>,
    ret: f64,
    test: Option<TestResult>,
}

/// Key for the retry-suppression set: a cycle is only re-submitted when its
/// probed return actually changed or the suppression window passed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct TriedKey {
    ret_bits: u64,
    hash: u64,
}

impl TriedKey {
    fn new(ret: f64, hash: u64) -> TriedKey {
        TriedKey {
            ret_bits: ret.to_bits(),
            hash,
        }
    }
}

/// Cheap clonable front for the scheduler loop
#[derive(Clone)]
pub struct SchedulerHandle {
    add_tx: mpsc::Sender<Vec<Arc<Cycle>>>,
    update_tx: mpsc::Sender<HashMap<u64, f64>>,
    remove_tx: mpsc::Sender<HashSet<u64>>,
    result_tx: mpsc::Sender<HashMap<u64, TestResult>>,
}

impl SchedulerHandle {
    /// Feed a probe result from outside the loop (used by adapters in tests)
    pub fn probe_result(&self, hash: u64, result: TestResult) {
        let _ = self.result_tx.try_send(HashMap::from([(hash, result)]));
    }
}

impl CycleSink for SchedulerHandle {
    fn add(&self, cycles: Vec<Arc<Cycle>>) {
        if self.add_tx.try_send(cycles).is_err() {
            warn!("scheduler add queue full, dropping cycle batch");
        }
    }

    fn update(&self, returns: HashMap<u64, f64>) {
        if self.update_tx.try_send(returns).is_err() {
            warn!("scheduler update queue full, dropping return batch");
        }
    }

    fn remove(&self, hashes: HashSet<u64>) {
        if self.remove_tx.try_send(hashes).is_err() {
            warn!("scheduler remove queue full, dropping removal batch");
        }
    }
}

pub struct Scheduler {
    cycles: HashMap<u64, Tracked>,
    checker: Arc<dyn Checker>,
    executor: Arc<dyn Executor>,

    add_rx: mpsc::Receiver<Vec<Arc<Cycle>>>,
    update_rx: mpsc::Receiver<HashMap<u64, f64>>,
    remove_rx: mpsc::Receiver<HashSet<u64>>,
    result_rx: mpsc::Receiver<HashMap<u64, TestResult>>,
    result_tx: mpsc::Sender<HashMap<u64, TestResult>>,

    probe_permits: Arc<Semaphore>,
    /// Hashes whose probe reverted; never touched again for the process life
    bad_cycles: DashSet<u64>,
    /// (probed return, hash) -> last submission attempt
    tried_cycles: DashMap<TriedKey, Instant>,
    last_live_tx: Option<Instant>,

    live: bool,
    max_live: Notional,
    min_tx_wait: Duration,
    probe_deadline: Duration,
    return_ceiling: f64,
    retry_suppression: Duration,
}

impl Scheduler {
    pub fn new(
        cfg: &Config,
        checker: Arc<dyn Checker>,
        executor: Arc<dyn Executor>,
    ) -> (Scheduler, SchedulerHandle) {
        let (add_tx, add_rx) = mpsc::channel(CHANNEL_BUFFER);
        let (update_tx, update_rx) = mpsc::channel(CHANNEL_BUFFER);
        let (remove_tx, remove_rx) = mpsc::channel(CHANNEL_BUFFER);
        let (result_tx, result_rx) = mpsc::channel(CHANNEL_BUFFER);

        let scheduler = Scheduler {
            cycles: HashMap::new(),
            checker,
            executor,
            add_rx,
            update_rx,
            remove_rx,
            result_rx,
            result_tx: result_tx.clone(),
            probe_permits: Arc::new(Semaphore::new(cfg.probe_parallelism)),
            bad_cycles: DashSet::new(),
            tried_cycles: DashMap::new(),
            last_live_tx: None,
            live: cfg.live,
            max_live: cfg.max_live_amount,
            min_tx_wait: cfg.min_tx_wait,
            probe_deadline: cfg.probe_deadline,
            return_ceiling: cfg.return_ceiling,
            retry_suppression: cfg.retry_suppression,
        };

        let handle = SchedulerHandle {
            add_tx,
            update_tx,
            remove_tx,
            result_tx,
        };

        (scheduler, handle)
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        let mut tick = tokio::time::interval(TICK);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut n: u64 = 0;

        info!(live = self.live, "scheduler started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,

                _ = tick.tick() => {
                    n += 1;
                    self.dispatch_probes();
                    if n % REPORT_EVERY == 0 {
                        self.report();
                    }
                    self.try_live();
                }

                Some(results) = self.result_rx.recv() => self.apply_results(results),

                Some(hashes) = self.remove_rx.recv() => {
                    for h in hashes {
                        self.cycles.remove(&h);
                    }
                }

                Some(returns) = self.update_rx.recv() => {
                    for (h, r) in returns {
                        if let Some(t) = self.cycles.get_mut(&h) {
                            t.ret = r;
                        }
                    }
                }

                Some(cycles) = self.add_rx.recv() => {
                    for c in cycles {
                        self.cycles.insert(
                            c.hash(),
                            Tracked { ret: c.gross_return, test: None, cycle: c },
                        );
                    }
                }
            }
        }

        info!("scheduler stopped");
    }

    /// Rank unprobed candidates ascending by return and dispatch as many as
    /// there are free permits
    fn dispatch_probes(&mut self) {
        let mut ranked: Vec<(u64, f64, Arc<Cycle>)> = self
            .cycles
            .iter()
            .filter(|(_, t)| t.test.is_none())
            .map(|(&h, t)| (h, t.ret, t.cycle.clone()))
            .collect();
        ranked.sort_by(|a, b| a.1.total_cmp(&b.1));

        for (hash, ret, cycle) in ranked {
            if !(ret > cycle.amount.threshold() && ret < self.return_ceiling) {
                continue;
            }
            if cycle.amount > self.max_live {
                continue;
            }
            if self.bad_cycles.contains(&hash) {
                continue;
            }

            let Ok(permit) = self.probe_permits.clone().try_acquire_owned() else {
                continue;
            };

            // mark in flight so later ticks skip it
            if let Some(t) = self.cycles.get_mut(&hash) {
                t.test = Some(TestResult::pending());
            }

            probe::dispatch(
                cycle,
                ret,
                self.checker.clone(),
                self.probe_deadline,
                self.result_tx.clone(),
                permit,
            );
        }
    }

    fn apply_results(&mut self, results: HashMap<u64, TestResult>) {
        for (hash, result) in results {
            let Some(t) = self.cycles.get_mut(&hash) else {
                continue;
            };

            if let Some(err) = result.error.as_deref() {
                if err.contains("execution reverted: ") {
                    warn!(hash, err, "probe reverted, marking cycle bad");
                    self.bad_cycles.insert(hash);
                }
            }

            t.test = Some(result);
        }
    }

    /// Pick the best probed cycle and, when every gate opens, hand it to the
    /// live executor on a detached task
    fn try_live(&mut self) {
        let mut best: Option<(Arc<Cycle>, f64)> = None;

        for (&hash, t) in &self.cycles {
            let Some(test) = &t.test else { continue };
            if !test.success || test.ret == 0.0 {
                continue;
            }
            let r = test.ret;

            if 1.0 + r <= t.cycle.amount.threshold() {
                continue;
            }
            if t.cycle.amount > self.max_live {
                continue;
            }
            // held above the ceiling: an upstream price that good is a bug
            if t.ret >= self.return_ceiling {
                continue;
            }
            if let Some(when) = self.tried_cycles.get(&TriedKey::new(r, hash)) {
                if when.elapsed() < self.retry_suppression {
                    continue;
                }
            }

            if best.as_ref().map_or(true, |(_, br)| r > *br) {
                best = Some((t.cycle.clone(), r));
            }
        }

        if !self.live || self.executor.running() {
            return;
        }
        let Some((cycle, ret)) = best else { return };
        if let Some(last) = self.last_live_tx {
            if last.elapsed() < self.min_tx_wait {
                return;
            }
        }
        if cycle.is_cancelled() {
            return;
        }

        info!(hash = cycle.hash(), amt = %cycle.amount, ret, "LIVE TX: starting");
        self.tried_cycles
            .insert(TriedKey::new(ret, cycle.hash()), Instant::now());
        self.last_live_tx = Some(Instant::now());

        let executor = self.executor.clone();
        tokio::spawn(async move {
            let token = cycle.cancel_token();
            tokio::select! {
                _ = token.cancelled() => {
                    warn!(hash = cycle.hash(), "LIVE TX: cycle evicted mid-submission");
                }
                res = executor.run(cycle.clone()) => match res {
                    Ok(r) => info!(hash = cycle.hash(), success = r.success, "LIVE TX: done"),
                    Err(e) => error!(hash = cycle.hash(), "LIVE TX: failed: {e}"),
                },
            }
        });
    }

    /// Periodic summary of everything that probed well
    fn report(&self) {
        let mut ops = String::new();
        for (&hash, t) in &self.cycles {
            let Some(test) = &t.test else { continue };
            if !test.success || test.ret == 0.0 {
                continue;
            }
            let _ = writeln!(
                ops,
                "age={:.1}s amt={} ret={:.5} gas={} hash={} len={} route={}",
                t.cycle.age().as_secs_f64(),
                t.cycle.amount,
                test.ret,
                test.gas_used,
                hash,
                t.cycle.tokens.len(),
                crate::tokens::route(&t.cycle.tokens),
            );
        }
        if !ops.is_empty() {
            info!("ARB OPS\n{ops}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::NoopExecutor;
    use crate::model::{Amm, Half, RunResult};
    use alloy_primitives::{address, Address, U256};
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use petgraph::graph::NodeIndex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    const W: Address = address!("c02aaa39b223fe8d0a0e5c4f27ead9083c756cc2");

    /// Checker that records calls and answers from a canned script
    #[derive(Default)]
    struct MockChecker {
        calls: Mutex<Vec<Vec<Address>>>,
        response: Mutex<Option<eyre::Result<f64>>>,
    }

    impl Checker for MockChecker {
        fn check(
            &self,
            _amount_wei: U256,
            tokens: Vec<Address>,
            _amms: Vec<Amm>,
        ) -> BoxFuture<'static, eyre::Result<f64>> {
            self.calls.lock().unwrap().push(tokens);
            let res = self
                .response
                .lock()
                .unwrap()
                .take()
                .unwrap_or(Ok(0.02));
            async move { res }.boxed()
        }
    }

    /// Executor that records runs
    #[derive(Default)]
    struct MockExecutor {
        busy: AtomicBool,
        runs: Mutex<Vec<u64>>,
    }

    impl Executor for MockExecutor {
        fn running(&self) -> bool {
            self.busy.load(Ordering::SeqCst)
        }

        fn run(&self, cycle: Arc<Cycle>) -> BoxFuture<'static, eyre::Result<RunResult>> {
            self.runs.lock().unwrap().push(cycle.hash());
            async move {
                Ok(RunResult {
                    success: true,
                    error: None,
                })
            }
            .boxed()
        }
    }

    fn mk_cycle(seed: u8, ret: f64, amount: Notional) -> Arc<Cycle> {
        let other = Address::with_last_byte(seed);
        let legs = vec![
            Half {
                to: NodeIndex::new(0),
                weight: 0.1,
                amm: Amm::Sushiswap,
            },
            Half {
                to: NodeIndex::new(seed as usize + 1),
                weight: -0.2,
                amm: Amm::UniswapV2,
            },
        ];
        let mut c = Cycle::new(legs, ret, amount, NodeIndex::new(0));
        c.set_route(vec![W, other], vec![Amm::Sushiswap, Amm::UniswapV2]);
        Arc::new(c)
    }

    fn live_config() -> Config {
        let mut cfg = Config::default();
        cfg.live = true;
        cfg
    }

    fn scheduler_with(
        cfg: &Config,
        checker: Arc<MockChecker>,
        executor: Arc<MockExecutor>,
    ) -> Scheduler {
        Scheduler::new(cfg, checker, executor).0
    }

    fn track(s: &mut Scheduler, c: Arc<Cycle>, test: Option<TestResult>) {
        s.cycles.insert(
            c.hash(),
            Tracked {
                ret: c.gross_return,
                test,
                cycle: c,
            },
        );
    }

    fn probed_ok(ret: f64) -> Option<TestResult> {
        Some(TestResult {
            success: true,
            error: None,
            ret,
            gas_used: 0,
        })
    }

    #[tokio::test]
    async fn test_probe_selection_is_ascending_by_return() {
        let mut cfg = live_config();
        cfg.probe_parallelism = 1; // one permit: only the first-ranked dispatches
        let checker = Arc::new(MockChecker::default());
        let executor = Arc::new(MockExecutor::default());
        let mut s = scheduler_with(&cfg, checker, executor);

        let low = mk_cycle(1, 1.02, Notional::Eth1);
        let high = mk_cycle(2, 1.08, Notional::Eth1);
        track(&mut s, low.clone(), None);
        track(&mut s, high.clone(), None);

        s.dispatch_probes();

        // lower return probed first by policy
        assert!(s.cycles[&low.hash()].test.is_some());
        assert!(s.cycles[&high.hash()].test.is_none());
    }

    #[tokio::test]
    async fn test_probe_skips_out_of_band_returns() {
        let cfg = live_config();
        let checker = Arc::new(MockChecker::default());
        let executor = Arc::new(MockExecutor::default());
        let mut s = scheduler_with(&cfg, checker, executor);

        // below the admission threshold, above the ceiling, above max live: none eligible
        let below = mk_cycle(1, 1.005, Notional::Eth1);
        let above = mk_cycle(2, 1.7, Notional::Eth1);
        track(&mut s, below.clone(), None);
        track(&mut s, above.clone(), None);

        let mut capped_cfg = live_config();
        capped_cfg.max_live_amount = Notional::Eth1;
        let too_big = mk_cycle(3, 1.05, Notional::Eth5);
        let checker = Arc::new(MockChecker::default());
        let executor = Arc::new(MockExecutor::default());
        let mut s2 = scheduler_with(&capped_cfg, checker, executor);
        track(&mut s2, too_big.clone(), None);

        s.dispatch_probes();
        s2.dispatch_probes();

        assert!(s.cycles[&below.hash()].test.is_none());
        assert!(s.cycles[&above.hash()].test.is_none());
        assert!(s2.cycles[&too_big.hash()].test.is_none());
    }

    #[tokio::test]
    async fn test_reverted_probe_marks_cycle_bad_forever() {
        let cfg = live_config();
        let checker = Arc::new(MockChecker::default());
        let executor = Arc::new(MockExecutor::default());
        let mut s = scheduler_with(&cfg, checker, executor.clone());

        let c = mk_cycle(1, 1.04, Notional::Eth1);
        track(&mut s, c.clone(), None);

        s.apply_results(HashMap::from([(
            c.hash(),
            TestResult {
                success: false,
                error: Some("execution reverted: FOO".to_string()),
                ret: 0.0,
                gas_used: 0,
            },
        )]));

        assert!(s.bad_cycles.contains(&c.hash()));

        // even if the result is cleared, a bad hash is never probed again
        s.cycles.get_mut(&c.hash()).unwrap().test = None;
        s.dispatch_probes();
        assert!(s.cycles[&c.hash()].test.is_none());

        // and never submitted
        s.try_live();
        assert!(executor.runs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_non_revert_errors_do_not_mark_bad() {
        let cfg = live_config();
        let checker = Arc::new(MockChecker::default());
        let executor = Arc::new(MockExecutor::default());
        let mut s = scheduler_with(&cfg, checker, executor);

        let c = mk_cycle(1, 1.04, Notional::Eth1);
        track(&mut s, c.clone(), None);

        s.apply_results(HashMap::from([(
            c.hash(),
            TestResult {
                success: false,
                error: Some("probe deadline exceeded".to_string()),
                ret: 0.0,
                gas_used: 0,
            },
        )]));

        assert!(!s.bad_cycles.contains(&c.hash()));
    }

    #[tokio::test]
    async fn test_live_gating_wait_window_and_best_pick() {
        let cfg = live_config();
        let checker = Arc::new(MockChecker::default());
        let executor = Arc::new(MockExecutor::default());
        let mut s = scheduler_with(&cfg, checker, executor.clone());

        let small = mk_cycle(1, 1.03, Notional::Eth1);
        let big = mk_cycle(2, 1.05, Notional::Eth1);
        track(&mut s, small.clone(), probed_ok(0.03));
        track(&mut s, big.clone(), probed_ok(0.05));

        // last live tx 0.2 s ago: inside the wait window, nothing goes out
        s.last_live_tx = Some(Instant::now() - Duration::from_millis(200));
        s.try_live();
        assert!(executor.runs.lock().unwrap().is_empty());

        // 1.1 s later: exactly one submission, and it is the 0.05 cycle
        s.last_live_tx = Some(Instant::now() - Duration::from_millis(1100));
        s.try_live();

        let deadline = Instant::now() + Duration::from_secs(1);
        loop {
            if !executor.runs.lock().unwrap().is_empty() {
                break;
            }
            assert!(Instant::now() < deadline, "no live run dispatched");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(*executor.runs.lock().unwrap(), vec![big.hash()]);

        // bookkeeping: retry pair recorded, wait window restarted
        assert!(s
            .tried_cycles
            .contains_key(&TriedKey::new(0.05, big.hash())));
        assert!(s.last_live_tx.unwrap().elapsed() < Duration::from_millis(500));

        // immediately after: wait window closed again
        s.try_live();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(executor.runs.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_retry_suppression_on_same_return_and_hash() {
        let mut cfg = live_config();
        cfg.min_tx_wait = Duration::from_millis(0);
        let checker = Arc::new(MockChecker::default());
        let executor = Arc::new(MockExecutor::default());
        let mut s = scheduler_with(&cfg, checker, executor.clone());

        let c = mk_cycle(1, 1.05, Notional::Eth1);
        track(&mut s, c.clone(), probed_ok(0.05));

        // the exact (return, hash) pair went out moments ago
        s.tried_cycles
            .insert(TriedKey::new(0.05, c.hash()), Instant::now());
        s.try_live();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(executor.runs.lock().unwrap().is_empty());

        // a different probed return for the same hash is a new attempt
        s.cycles.get_mut(&c.hash()).unwrap().test = probed_ok(0.06);
        s.try_live();
        let deadline = Instant::now() + Duration::from_secs(1);
        while executor.runs.lock().unwrap().is_empty() {
            assert!(Instant::now() < deadline, "updated return not submitted");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_no_submission_while_executor_running() {
        let cfg = live_config();
        let checker = Arc::new(MockChecker::default());
        let executor = Arc::new(MockExecutor::default());
        executor.busy.store(true, Ordering::SeqCst);
        let mut s = scheduler_with(&cfg, checker, executor.clone());

        let c = mk_cycle(1, 1.05, Notional::Eth1);
        track(&mut s, c, probed_ok(0.05));

        s.try_live();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(executor.runs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_live_disabled_never_submits() {
        let mut cfg = live_config();
        cfg.live = false;
        let checker = Arc::new(MockChecker::default());
        let executor = Arc::new(MockExecutor::default());
        let mut s = scheduler_with(&cfg, checker, executor.clone());

        let c = mk_cycle(1, 1.05, Notional::Eth1);
        track(&mut s, c, probed_ok(0.05));

        s.try_live();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(executor.runs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_cycle_not_submitted() {
        let cfg = live_config();
        let checker = Arc::new(MockChecker::default());
        let executor = Arc::new(MockExecutor::default());
        let mut s = scheduler_with(&cfg, checker, executor.clone());

        let c = mk_cycle(1, 1.05, Notional::Eth1);
        c.cancel();
        track(&mut s, c, probed_ok(0.05));

        s.try_live();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(executor.runs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_loop_wires_sink_to_registry() {
        let cfg = Config::default();
        let checker = Arc::new(MockChecker::default());
        let (s, handle) = Scheduler::new(&cfg, checker, Arc::new(NoopExecutor));

        let cancel = CancellationToken::new();
        let task = tokio::spawn(s.run(cancel.clone()));

        let c = mk_cycle(1, 1.04, Notional::Eth1);
        handle.add(vec![c.clone()]);
        handle.update(HashMap::from([(c.hash(), 1.06)]));
        handle.probe_result(
            c.hash(),
            TestResult {
                success: true,
                error: None,
                ret: 0.04,
                gas_used: 0,
            },
        );
        handle.remove(HashSet::from([c.hash()]));

        // nothing to assert from outside the loop except clean shutdown; the
        // registry internals are covered above
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        let _ = task.await;
    }
}
