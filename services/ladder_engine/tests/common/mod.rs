//! Shared fixtures for the engine integration tests
//!
//! Pools and wallets are scripted on [`InMemoryChain`]; every fixture uses an
//! 18/18-decimal pair with the base token sorting first, so pool prices are
//! quote per base.

#![allow(dead_code)]

use ethers::types::{Address, U256};
use ladder_amm::{
    tick_to_sqrt_price_x96, BigDecimal, FeeSpec, LadderSpec, PriceRange, TokenPair,
    WeightingScheme,
};
use ladder_config::EngineConfig;
use ladder_engine::chain::memory::InMemoryChain;
use ladder_engine::Session;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;

pub const BASE: Address = Address::repeat_byte(0x11);
pub const QUOTE: Address = Address::repeat_byte(0x22);
pub const WALLET: Address = Address::repeat_byte(0x77);

/// Pool tick above the whole 2.0 → 1.0 ladder, so every rung is quote-only
pub const POOL_TICK: i32 = 9180;

pub const BALANCE_OF: [u8; 4] = [0x70, 0xa0, 0x82, 0x31];
pub const ALLOWANCE: [u8; 4] = [0xdd, 0x62, 0xed, 0x3e];

pub fn selector(signature: &str) -> [u8; 4] {
    ethers::utils::id(signature)
}

pub fn word(value: U256) -> Vec<u8> {
    let mut word = [0u8; 32];
    value.to_big_endian(&mut word);
    word.to_vec()
}

pub fn address_word(address: Address) -> Vec<u8> {
    let mut word = vec![0u8; 12];
    word.extend_from_slice(address.as_bytes());
    word
}

pub fn int_word(value: i32) -> Vec<u8> {
    let fill = if value < 0 { 0xff } else { 0x00 };
    let mut word = vec![fill; 28];
    word.extend_from_slice(&value.to_be_bytes());
    word
}

pub fn sqrt_at_tick(tick: i32) -> U256 {
    let sqrt = tick_to_sqrt_price_x96(tick).unwrap();
    U256::from_dec_str(&sqrt.to_string()).unwrap()
}

/// V3 `slot0()`: Uniswap layout, unlocked
pub fn v3_slot0(tick: i32) -> Vec<u8> {
    let mut data = word(sqrt_at_tick(tick));
    data.extend(int_word(tick));
    for value in [1u64, 1, 1, 0, 1] {
        data.extend(word(U256::from(value)));
    }
    data
}

/// V4 `getSlot0(id)`: sqrt, tick, protocol fee, lp fee
pub fn v4_slot0(sqrt_price_x96: U256, tick: i32, lp_fee: u32) -> Vec<u8> {
    let mut data = word(sqrt_price_x96);
    data.extend(int_word(tick));
    data.extend(word(U256::zero()));
    data.extend(word(U256::from(lp_fee)));
    data
}

pub fn v3_config(max_positions_per_tx: usize) -> EngineConfig {
    toml::from_str(&format!(
        r#"
        [chain]
        chain_id = 56
        rpc_url = "http://localhost:8545"

        [protocol]
        kind = "v3"
        position_manager = "0x46A15B0b27311cedF172AB29E4f4766fbE7F4364"
        flavor = "pancake_v3"

        [execution]
        max_positions_per_tx = {}
        "#,
        max_positions_per_tx
    ))
    .unwrap()
}

pub fn v4_pancake_config() -> EngineConfig {
    toml::from_str(
        r#"
        [chain]
        chain_id = 56
        rpc_url = "http://localhost:8545"

        [protocol]
        kind = "v4"
        deployment = "pancakeswap"
        "#,
    )
    .unwrap()
}

pub fn pair() -> TokenPair {
    TokenPair {
        token0: BASE.0,
        token1: QUOTE.0,
        token0_decimals: 18,
        token1_decimals: 18,
    }
}

/// Bid ladder from 2.0 down to 1.0
pub fn ladder_spec(fee: FeeSpec, position_count: u32) -> LadderSpec {
    LadderSpec {
        range: PriceRange {
            upper: BigDecimal::from_str("2.0").unwrap(),
            lower: BigDecimal::from_str("1.0").unwrap(),
        },
        pair: pair(),
        fee,
        position_count,
        weighting: WeightingScheme::Linear,
        total_budget_usd: Decimal::from(1_000),
        quote_token_is_stable: true,
    }
}

/// Wallet with plenty of both tokens
pub fn funded_chain() -> Arc<InMemoryChain> {
    let chain = Arc::new(InMemoryChain::new(56, WALLET));
    let plenty = U256::exp10(30);
    chain.set_uint(BASE, BALANCE_OF, plenty);
    chain.set_uint(QUOTE, BALANCE_OF, plenty);
    chain
}

pub fn session(chain: Arc<InMemoryChain>, config: &EngineConfig) -> Arc<Session> {
    Arc::new(Session::connect(chain, config))
}
