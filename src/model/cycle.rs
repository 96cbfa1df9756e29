//! Cycles and their identity
//!
//! A cycle is a closed walk through one bucket's price graph. Two discoveries
//! of the same route must collapse into one tracked opportunity, so identity
//! is a hash of (notional, token addresses, AMM sequence) - never the weights,
//! the return, or the discovery time. The same route seen again at a different
//! price updates the existing cycle instead of re-adding it.
//!
//! Canonical form: the legs are rotated so the lowest vertex id leads, then
//! rotated again so the reference token (vertex 0) leads. Only cycles that
//! touch the reference token are kept downstream.

use crate::model::{Amm, Notional};
use alloy_primitives::Address;
use petgraph::graph::NodeIndex;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// One leg of a cycle: the vertex it lands on, the `-ln(rate)` weight paid to
/// get there, and the venue that owns the edge
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Half {
    pub to: NodeIndex,
    pub weight: f64,
    pub amm: Amm,
}

/// Outcome of a probe (simulated call) against a cycle
#[derive(Debug, Clone, PartialEq)]
pub struct TestResult {
    pub success: bool,
    pub error: Option<String>,
    /// Realized return where 1.0 = break-even
    pub ret: f64,
    pub gas_used: u64,
}

impl TestResult {
    /// Placeholder attached when a probe is dispatched, so the cycle is not
    /// selected again while the call is in flight
    pub fn pending() -> TestResult {
        TestResult {
            success: false,
            error: None,
            ret: 0.0,
            gas_used: 0,
        }
    }
}

/// Outcome of a live bundle submission
#[derive(Debug, Clone)]
pub struct RunResult {
    pub success: bool,
    pub error: Option<String>,
}

/// A tracked arbitrage cycle
pub struct Cycle {
    hash: u64,
    created: Instant,

    pub amount: Notional,
    pub starts_with_ref: bool,

    /// Legs in canonical order
    pub path: Vec<Half>,
    /// Token addresses traversed, aligned with `path`
    pub tokens: Vec<Address>,
    /// Venue per hop, aligned with `path`
    pub amms: Vec<Amm>,

    /// Multiplicative return at discovery time, `exp(-sum of weights)`
    pub gross_return: f64,

    cancel: CancellationToken,
    on_cancel: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Cycle {
    /// Canonicalize a closed walk. `reference` is the vertex id of the
    /// reference token (always 0 in a bucket graph); `starts_with_ref` is set
    /// only when the walk actually visits it.
    pub fn new(path: Vec<Half>, gross_return: f64, amount: Notional, reference: NodeIndex) -> Cycle {
        let mut c = Cycle {
            hash: 0,
            created: Instant::now(),
            amount,
            starts_with_ref: false,
            path,
            tokens: Vec::new(),
            amms: Vec::new(),
            gross_return,
            cancel: CancellationToken::new(),
            on_cancel: Mutex::new(None),
        };

        c.rotate_min_first();

        if let Some(at) = c.path.iter().rposition(|h| h.to == reference) {
            c.path.rotate_left(at);
            c.starts_with_ref = true;
        }

        c
    }

    /// Attach the traversed addresses and venues and seal the identity hash
    pub fn set_route(&mut self, tokens: Vec<Address>, amms: Vec<Amm>) {
        self.tokens = tokens;
        self.amms = amms;
        self.hash = identity_hash(self.amount, &self.tokens, &self.amms);
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }

    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    pub fn len(&self) -> usize {
        self.path.len()
    }

    pub fn is_equivalent(&self, other: &Cycle) -> bool {
        self.hash == other.hash
    }

    /// True when the cycle touches none of the given addresses
    pub fn excludes(&self, addrs: &[Address]) -> bool {
        !self.tokens.iter().any(|t| addrs.contains(t))
    }

    /// Token observed by in-flight probes and live submissions
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Hook fired once when the cycle is evicted
    pub fn set_on_cancel(&mut self, f: impl FnOnce() + Send + 'static) {
        *self.on_cancel.lock().unwrap() = Some(Box::new(f));
    }

    /// Fire the token and the eviction hook. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
        if let Some(f) = self.on_cancel.lock().unwrap().take() {
            f();
        }
    }

    fn rotate_min_first(&mut self) {
        let min = self
            .path
            .iter()
            .enumerate()
            .min_by_key(|(_, h)| h.to)
            .map(|(i, _)| i);
        if let Some(at) = min {
            self.path.rotate_left(at);
        }
    }
}

impl std::fmt::Debug for Cycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cycle")
            .field("hash", &self.hash)
            .field("amount", &self.amount)
            .field("return", &self.gross_return)
            .field("len", &self.path.len())
            .field("tokens", &self.tokens)
            .field("amms", &self.amms)
            .finish()
    }
}

/// 64-bit identity over (notional, ordered addresses, ordered AMMs).
/// Process-stable: two cycles built through different code paths but with the
/// same route always collide.
fn identity_hash(amount: Notional, tokens: &[Address], amms: &[Amm]) -> u64 {
    let mut h = DefaultHasher::new();
    amount.hash(&mut h);
    tokens.hash(&mut h);
    amms.hash(&mut h);
    h.finish()
}
