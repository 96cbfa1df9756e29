//! JSON caches
//!
//! Pool and token metadata survive restarts as plain JSON under `data/`:
//! one object per file, keyed by hex address. A missing file is an empty
//! cache, not an error - the process bootstraps from nothing on first run.

use crate::model::Amm;
use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const TOKENS_FILE: &str = "tokens.json";
pub const POOLS_FILE: &str = "pools.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache io: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed cache {path}: {source}")]
    Malformed {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Cached token metadata, keyed by contract address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub symbol: String,
    pub decimals: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listed_at: Option<DateTime<Utc>>,
}

/// Cached pool metadata, keyed by pair address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolRecord {
    pub token0: Address,
    pub token1: Address,
    pub amm: Amm,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listed_at: Option<DateTime<Utc>>,
}

pub struct Store {
    dir: PathBuf,
}

impl Store {
    pub fn new(dir: impl Into<PathBuf>) -> Store {
        Store { dir: dir.into() }
    }

    pub fn load_tokens(&self) -> Result<HashMap<Address, TokenRecord>, StoreError> {
        self.load(TOKENS_FILE)
    }

    pub fn load_pools(&self) -> Result<HashMap<Address, PoolRecord>, StoreError> {
        self.load(POOLS_FILE)
    }

    pub fn save_tokens(&self, tokens: &HashMap<Address, TokenRecord>) -> Result<(), StoreError> {
        self.save(TOKENS_FILE, tokens)
    }

    pub fn save_pools(&self, pools: &HashMap<Address, PoolRecord>) -> Result<(), StoreError> {
        self.save(POOLS_FILE, pools)
    }

    fn load<T: DeserializeOwned>(&self, file: &str) -> Result<HashMap<Address, T>, StoreError> {
        let path = self.dir.join(file);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(e.into()),
        };

        serde_json::from_slice(&raw).map_err(|source| StoreError::Malformed {
            path: path.display().to_string(),
            source,
        })
    }

    fn save<T: Serialize>(&self, file: &str, records: &HashMap<Address, T>) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(file);
        let raw = serde_json::to_vec_pretty(records).map_err(|source| StoreError::Malformed {
            path: path.display().to_string(),
            source,
        })?;
        fs::write(path, raw)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    fn scratch_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("gyre-store-{tag}-{}", std::process::id()))
    }

    #[test]
    fn test_missing_cache_is_empty_not_fatal() {
        let store = Store::new(scratch_dir("missing"));
        assert!(store.load_tokens().unwrap().is_empty());
        assert!(store.load_pools().unwrap().is_empty());
    }

    #[test]
    fn test_round_trip() {
        let dir = scratch_dir("roundtrip");
        let store = Store::new(&dir);

        let weth = address!("c02aaa39b223fe8d0a0e5c4f27ead9083c756cc2");
        let pair = address!("0d4a11d5eeaac28ec3f61d100daf4d40471f1852");

        let tokens = HashMap::from([(
            weth,
            TokenRecord {
                symbol: "WETH".to_string(),
                decimals: 18,
                listed_at: None,
            },
        )]);
        let pools = HashMap::from([(
            pair,
            PoolRecord {
                token0: weth,
                token1: address!("dac17f958d2ee523a2206206994597c13d831ec7"),
                amm: Amm::UniswapV2,
                listed_at: Some(Utc::now()),
            },
        )]);

        store.save_tokens(&tokens).unwrap();
        store.save_pools(&pools).unwrap();

        assert_eq!(store.load_tokens().unwrap(), tokens);
        assert_eq!(store.load_pools().unwrap(), pools);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_malformed_cache_is_reported() {
        let dir = scratch_dir("malformed");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(TOKENS_FILE), b"{not json").unwrap();

        let store = Store::new(&dir);
        assert!(matches!(
            store.load_tokens(),
            Err(StoreError::Malformed { .. })
        ));

        let _ = fs::remove_dir_all(dir);
    }
}
