//! Token definitions
//!
//! The reference token and the well-known mainnet tokens worth labelling in
//! logs. WETH is the system's unit of account: every bucket graph pins it at
//! vertex 0 and every tracked cycle passes through it.

use alloy_primitives::{address, Address};

/// Wrapped native currency - the reference token
pub const WETH: Address = address!("c02aaa39b223fe8d0a0e5c4f27ead9083c756cc2");

/// A token we know by name
#[derive(Debug, Clone)]
pub struct Token {
    pub symbol: &'static str,
    pub address: Address,
    pub decimals: u8,
}

/// High-liquidity mainnet tokens
pub fn known_tokens() -> Vec<Token> {
    vec![
        Token {
            symbol: "WETH",
            address: WETH,
            decimals: 18,
        },
        Token {
            symbol: "USDC",
            address: address!("a0b86991c6218b36c1d19d4a2e9eb0ce3606eb48"),
            decimals: 6,
        },
        Token {
            symbol: "USDT",
            address: address!("dac17f958d2ee523a2206206994597c13d831ec7"),
            decimals: 6,
        },
        Token {
            symbol: "WBTC",
            address: address!("2260fac5e5542a773aa44fbcfedf7c193bc2c599"),
            decimals: 8,
        },
        Token {
            symbol: "LINK",
            address: address!("514910771af9ca656af840dff83e8264ecf986ca"),
            decimals: 18,
        },
    ]
}

/// Symbol for an address, when we know it
pub fn symbol(addr: Address) -> Option<&'static str> {
    known_tokens()
        .into_iter()
        .find(|t| t.address == addr)
        .map(|t| t.symbol)
}

/// Log label: the symbol when known, truncated hex otherwise
pub fn label(addr: Address) -> String {
    match symbol(addr) {
        Some(s) => s.to_string(),
        None => format!("0x{}...", &format!("{addr:?}")[2..8]),
    }
}

/// Route label for a token path, e.g. `WETH>USDC>WETH`
pub fn route(addrs: &[Address]) -> String {
    addrs.iter().map(|a| label(*a)).collect::<Vec<_>>().join(">")
}
