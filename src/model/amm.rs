//! AMM families
//!
//! A closed enumeration of the exchange families we trade across. The AMM is
//! part of edge identity (which venue owns the best rate for a pair) and part
//! of cycle identity (the same token route through different venues is a
//! different opportunity).

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Exchange family that owns an edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Amm {
    UniswapV2,
    Sushiswap,
}

impl Amm {
    /// All known families, in wire-id order
    pub const ALL: [Amm; 2] = [Amm::UniswapV2, Amm::Sushiswap];

    /// Numeric id used in helper-contract calldata
    pub fn id(self) -> u64 {
        match self {
            Amm::UniswapV2 => 0,
            Amm::Sushiswap => 1,
        }
    }

    pub fn from_id(id: u64) -> Option<Amm> {
        match id {
            0 => Some(Amm::UniswapV2),
            1 => Some(Amm::Sushiswap),
            _ => None,
        }
    }

    /// Encode a hop sequence as helper-contract parameters
    pub fn to_params(amms: &[Amm]) -> Vec<U256> {
        amms.iter().map(|a| U256::from(a.id())).collect()
    }
}

impl fmt::Display for Amm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Amm::UniswapV2 => write!(f, "UNIV2"),
            Amm::Sushiswap => write!(f, "SUSHI"),
        }
    }
}
