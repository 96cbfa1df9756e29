//! Notional-amount buckets
//!
//! Every trade size gets its own price graph and cycle set, because the
//! realizable rate for 10 ETH through a constant-product pool is not the rate
//! for 0.5 ETH. Each bucket carries an admission threshold that scales
//! inversely with size: a small trade has to clear a higher relative return
//! before it is worth tracking.

use alloy_primitives::U256;
use std::fmt;

/// Trade size in the reference token (WETH)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Notional {
    Eth0_5,
    Eth1,
    Eth2,
    Eth5,
    Eth10,
}

impl Notional {
    /// All buckets, smallest first
    pub const ALL: [Notional; 5] = [
        Notional::Eth0_5,
        Notional::Eth1,
        Notional::Eth2,
        Notional::Eth5,
        Notional::Eth10,
    ];

    /// Largest bucket eligible for live submission by default
    pub const MAX_LIVE: Notional = Notional::Eth10;

    /// Size in ETH
    pub fn eth(self) -> f64 {
        match self {
            Notional::Eth0_5 => 0.5,
            Notional::Eth1 => 1.0,
            Notional::Eth2 => 2.0,
            Notional::Eth5 => 5.0,
            Notional::Eth10 => 10.0,
        }
    }

    /// Minimum multiplicative return for a cycle in this bucket to be tracked
    pub fn threshold(self) -> f64 {
        1.0 + 0.01 / self.eth()
    }

    /// Size in wei, exact
    pub fn wei(self) -> U256 {
        // eth() * 1000 is integral for every bucket
        U256::from((self.eth() * 1000.0) as u64) * U256::from(10u64).pow(U256::from(15))
    }

    /// Bucket for a configured size, if it is one we know
    pub fn from_eth(eth: f64) -> Option<Notional> {
        Notional::ALL.iter().copied().find(|n| n.eth() == eth)
    }
}

impl fmt::Display for Notional {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Amt[{:.1}]", self.eth())
    }
}
