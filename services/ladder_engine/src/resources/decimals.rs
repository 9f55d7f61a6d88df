//! Session cache of ERC20 decimals and per-pair decimal tick offsets
//!
//! Seeded with well-known stablecoins and wrapped natives so the common pairs
//! need no reads. A miss reads `decimals()`; a failed read is an error, never a
//! guess of 18.

use dashmap::DashMap;
use ethers::types::{Address, U256};
use ladder_amm::{compute_decimal_tick_offset, TokenPair};
use std::sync::Arc;
use tracing::{debug, info};

use crate::chain::abi::{decimals_call, decode_uint};
use crate::chain::multicall::{Call, Multicall};
use crate::chain::ChainAccess;
use crate::error::{LadderError, Result};

/// Tokens whose decimals never need a read, by chain id
const KNOWN_DECIMALS: &[(u64, &str, u8)] = &[
    // BSC
    (56, "0x55d398326f99059fF775485246999027B3197955", 18), // USDT
    (56, "0x8ac76a51cc950d9822d68b83fe1ad97b32cd580d", 18), // USDC
    (56, "0xe9e7cea3dedca5984780bafc599bd69add087d56", 18), // BUSD
    (56, "0x1af3f329e8be154074d8769d1ffa4ee058b1dbc3", 18), // DAI
    (56, "0xbb4CdB9CBd36B01bD1cBaEBF2De08d9173bc095c", 18), // WBNB
    // Base
    (8453, "0x833589fcd6edb6e08f4c7c32d4f71b54bda02913", 6), // USDC
    (8453, "0xd9aaec86b65d86f6a7b5b1b0c42ffa531710b6ca", 6), // USDbC
    (8453, "0x50c5725949a6f0c72e6c4a641f24049a917db0cb", 18), // DAI
    (8453, "0x4200000000000000000000000000000000000006", 18), // WETH
    // Ethereum
    (1, "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48", 6), // USDC
    (1, "0xdac17f958d2ee523a2206206994597c13d831ec7", 6), // USDT
    (1, "0x6b175474e89094c44da98b954eedeac495271d0f", 18), // DAI
    (1, "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2", 18), // WETH
];

/// Well-known decimals for `chain_id`; the native currency (zero address) is 18 everywhere
pub fn known_decimals(chain_id: u64) -> Vec<(Address, u8)> {
    let mut known: Vec<(Address, u8)> = KNOWN_DECIMALS
        .iter()
        .filter(|(chain, _, _)| *chain == chain_id)
        .filter_map(|(_, address, decimals)| address.parse().ok().map(|a| (a, *decimals)))
        .collect();
    known.push((Address::zero(), 18));
    known
}

pub struct DecimalsCache {
    chain: Arc<dyn ChainAccess>,
    multicall: Multicall,
    decimals: DashMap<Address, u8>,
    offsets: DashMap<(Address, Address), i32>,
}

impl DecimalsCache {
    pub fn new(chain: Arc<dyn ChainAccess>, multicall: Multicall) -> Self {
        let cache = Self {
            chain,
            multicall,
            decimals: DashMap::new(),
            offsets: DashMap::new(),
        };
        cache.seed();
        cache
    }

    fn seed(&self) {
        for (address, decimals) in known_decimals(self.chain.chain_id()) {
            self.decimals.insert(address, decimals);
        }
    }

    pub fn cached(&self, token: Address) -> Option<u8> {
        self.decimals.get(&token).map(|entry| *entry)
    }

    pub async fn get(&self, token: Address) -> Result<u8> {
        if let Some(decimals) = self.cached(token) {
            return Ok(decimals);
        }
        let data = self
            .chain
            .call(token, decimals_call())
            .await
            .map_err(|e| LadderError::DecimalsUnavailable {
                token,
                reason: e.to_string(),
            })?;
        let decimals = parse_decimals(token, &data)?;
        self.decimals.insert(token, decimals);
        debug!("Cached decimals {} for {:?}", decimals, token);
        Ok(decimals)
    }

    /// Decimals for many tokens, misses fetched in one Multicall3 round
    pub async fn get_many(&self, tokens: &[Address]) -> Result<Vec<u8>> {
        let mut missing: Vec<Address> = tokens
            .iter()
            .copied()
            .filter(|token| !self.decimals.contains_key(token))
            .collect();
        missing.sort();
        missing.dedup();

        if !missing.is_empty() {
            let calls: Vec<Call> = missing
                .iter()
                .map(|token| Call::new(*token, decimals_call()))
                .collect();
            let results = self.multicall.aggregate(self.chain.as_ref(), &calls).await?;
            for (token, result) in missing.iter().zip(results) {
                if !result.success {
                    return Err(LadderError::DecimalsUnavailable {
                        token: *token,
                        reason: "decimals() reverted".to_string(),
                    });
                }
                let decimals = parse_decimals(*token, &result.data)?;
                self.decimals.insert(*token, decimals);
            }
            info!("📊 Loaded decimals for {} tokens", missing.len());
        }

        tokens
            .iter()
            .map(|token| {
                self.cached(*token).ok_or(LadderError::DecimalsUnavailable {
                    token: *token,
                    reason: "not cached after load".to_string(),
                })
            })
            .collect()
    }

    pub async fn preload(&self, tokens: &[Address]) -> Result<()> {
        self.get_many(tokens).await.map(|_| ())
    }

    /// Decimal tick offset for a pair, computed once in pool order
    pub async fn decimal_offset(&self, token_a: Address, token_b: Address) -> Result<i32> {
        let key = if token_a < token_b {
            (token_a, token_b)
        } else {
            (token_b, token_a)
        };
        if let Some(offset) = self.offsets.get(&key) {
            return Ok(*offset);
        }
        let decimals = self.get_many(&[key.0, key.1]).await?;
        let offset = compute_decimal_tick_offset(decimals[0], decimals[1])?;
        self.offsets.insert(key, offset);
        Ok(offset)
    }

    /// Base/quote pair with decimals filled in
    pub async fn token_pair(&self, base: Address, quote: Address) -> Result<TokenPair> {
        let decimals = self.get_many(&[base, quote]).await?;
        self.decimal_offset(base, quote).await?;
        Ok(TokenPair {
            token0: base.0,
            token1: quote.0,
            token0_decimals: decimals[0],
            token1_decimals: decimals[1],
        })
    }

    /// Drop everything read this session; well-known entries come back
    pub fn clear(&self) {
        self.decimals.clear();
        self.offsets.clear();
        self.seed();
    }

    pub fn len(&self) -> usize {
        self.decimals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decimals.is_empty()
    }
}

fn parse_decimals(token: Address, data: &[u8]) -> Result<u8> {
    let value = decode_uint(data).map_err(|e| LadderError::DecimalsUnavailable {
        token,
        reason: e.to_string(),
    })?;
    if value > U256::from(255u8) {
        return Err(LadderError::DecimalsUnavailable {
            token,
            reason: format!("decimals() returned {}", value),
        });
    }
    Ok(value.low_u32() as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::memory::InMemoryChain;

    const DECIMALS: [u8; 4] = [0x31, 0x3c, 0xe5, 0x67];

    fn cache(chain_id: u64) -> (Arc<InMemoryChain>, DecimalsCache) {
        let chain = Arc::new(InMemoryChain::new(chain_id, Address::zero()));
        let cache = DecimalsCache::new(chain.clone(), Multicall::default());
        (chain, cache)
    }

    #[tokio::test]
    async fn test_known_tokens_need_no_read() {
        let (_, cache) = cache(8453);
        let usdc: Address = "0x833589fcd6edb6e08f4c7c32d4f71b54bda02913".parse().unwrap();
        assert_eq!(cache.get(usdc).await.unwrap(), 6);
        assert_eq!(cache.get(Address::zero()).await.unwrap(), 18);
    }

    #[tokio::test]
    async fn test_miss_reads_and_caches() {
        let (chain, cache) = cache(56);
        let token = Address::repeat_byte(0x42);
        chain.set_uint(token, DECIMALS, U256::from(9));
        assert_eq!(cache.get(token).await.unwrap(), 9);
        chain.set_uint(token, DECIMALS, U256::from(12));
        assert_eq!(cache.get(token).await.unwrap(), 9);
    }

    #[tokio::test]
    async fn test_failed_read_is_error_not_default() {
        let (_, cache) = cache(56);
        let token = Address::repeat_byte(0x43);
        assert!(matches!(
            cache.get(token).await,
            Err(LadderError::DecimalsUnavailable { .. })
        ));
        assert!(cache.get_many(&[token]).await.is_err());
    }

    #[tokio::test]
    async fn test_batch_load_and_offset() {
        let (chain, cache) = cache(56);
        let a = Address::repeat_byte(0x01);
        let b = Address::repeat_byte(0x02);
        chain.set_uint(a, DECIMALS, U256::from(6));
        chain.set_uint(b, DECIMALS, U256::from(18));
        assert_eq!(cache.get_many(&[b, a]).await.unwrap(), vec![18, 6]);
        assert_eq!(cache.decimal_offset(b, a).await.unwrap(), 276324);
        assert_eq!(cache.decimal_offset(a, b).await.unwrap(), 276324);
    }

    #[tokio::test]
    async fn test_clear_keeps_known_entries() {
        let (chain, cache) = cache(1);
        let token = Address::repeat_byte(0x44);
        chain.set_uint(token, DECIMALS, U256::from(8));
        cache.get(token).await.unwrap();
        let seeded = known_decimals(1).len();
        assert_eq!(cache.len(), seeded + 1);
        cache.clear();
        assert_eq!(cache.len(), seeded);
    }

    #[tokio::test]
    async fn test_oversized_decimals_rejected() {
        let (chain, cache) = cache(56);
        let token = Address::repeat_byte(0x45);
        chain.set_uint(token, DECIMALS, U256::from(300));
        assert!(cache.get(token).await.is_err());
    }
}
