//! Pool state decoding by explicit layout
//!
//! `slot0()` differs between V3 implementations: Uniswap packs `feeProtocol` into
//! a uint8, PancakeSwap widens it to uint32. V4 `getSlot0(id)` returns four words.
//! The layout is chosen from configuration and every word is width-checked, so a
//! wrong tag surfaces as [`LadderError::PoolStateShapeMismatch`] instead of a
//! silently truncated price.

use ethers::abi::Token;
use ethers::types::{Bytes, H256, U256};
use ladder_amm::{BigDecimal, PoolPrice};
use num_bigint::BigInt;

use super::abi::{word_to_int24, word_to_uint, words};
use super::encode_call;
use crate::error::{LadderError, Result};

/// Return layout of the slot0 read for the target pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot0Layout {
    UniswapV3,
    PancakeV3,
    V4,
}

impl Slot0Layout {
    pub fn word_count(&self) -> usize {
        match self {
            Self::UniswapV3 | Self::PancakeV3 => 7,
            Self::V4 => 4,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::UniswapV3 => "UniswapV3",
            Self::PancakeV3 => "PancakeV3",
            Self::V4 => "V4",
        }
    }

    /// Calldata for the read; V4 reads need the pool id
    pub fn calldata(&self, pool_id: Option<H256>) -> Result<Bytes> {
        match (self, pool_id) {
            (Self::UniswapV3 | Self::PancakeV3, _) => Ok(encode_call("slot0()", &[])),
            (Self::V4, Some(id)) => Ok(encode_call(
                "getSlot0(bytes32)",
                &[Token::FixedBytes(id.as_bytes().to_vec())],
            )),
            (Self::V4, None) => Err(LadderError::config("V4 slot0 read requires a pool id")),
        }
    }

    /// Decode raw return data, rejecting any shape other than this layout's
    pub fn decode(&self, data: &[u8]) -> Result<PoolState> {
        let mismatch = |got: String| {
            LadderError::shape_mismatch(
                self.name(),
                format!("{} words ({} bytes)", self.word_count(), self.word_count() * 32),
                got,
            )
        };
        let words = words(data).ok_or_else(|| mismatch(format!("{} bytes", data.len())))?;
        if words.len() != self.word_count() {
            return Err(mismatch(format!("{} words", words.len())));
        }

        let field = |index: usize, name: &str, bits: usize| -> Result<U256> {
            word_to_uint(&words[index], bits)
                .ok_or_else(|| mismatch(format!("{} wider than uint{}", name, bits)))
        };

        let sqrt_price_x96 = field(0, "sqrtPriceX96", 160)?;
        let tick = word_to_int24(&words[1]).ok_or_else(|| mismatch("tick wider than int24".into()))?;

        match self {
            Self::UniswapV3 | Self::PancakeV3 => {
                field(2, "observationIndex", 16)?;
                field(3, "observationCardinality", 16)?;
                field(4, "observationCardinalityNext", 16)?;
                let fee_bits = if *self == Self::UniswapV3 { 8 } else { 32 };
                let fee_protocol = field(5, "feeProtocol", fee_bits)?.low_u32();
                let unlocked = field(6, "unlocked", 1)?;
                Ok(PoolState {
                    sqrt_price_x96,
                    tick,
                    fee_protocol,
                    lp_fee: None,
                    unlocked: Some(!unlocked.is_zero()),
                    liquidity: None,
                })
            }
            Self::V4 => {
                let protocol_fee = field(2, "protocolFee", 24)?.low_u32();
                let lp_fee = field(3, "lpFee", 24)?.low_u32();
                Ok(PoolState {
                    sqrt_price_x96,
                    tick,
                    fee_protocol: protocol_fee,
                    lp_fee: Some(lp_fee),
                    unlocked: None,
                    liquidity: None,
                })
            }
        }
    }
}

impl From<ladder_config::V3Flavor> for Slot0Layout {
    fn from(flavor: ladder_config::V3Flavor) -> Self {
        match flavor {
            ladder_config::V3Flavor::UniswapV3 => Self::UniswapV3,
            ladder_config::V3Flavor::PancakeV3 => Self::PancakeV3,
        }
    }
}

/// Decoded pool price state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolState {
    pub sqrt_price_x96: U256,
    pub tick: i32,
    /// V3 `feeProtocol` or V4 `protocolFee`
    pub fee_protocol: u32,
    /// V4 only
    pub lp_fee: Option<u32>,
    /// V3 only
    pub unlocked: Option<bool>,
    pub liquidity: Option<u128>,
}

impl PoolState {
    pub fn is_initialized(&self) -> bool {
        !self.sqrt_price_x96.is_zero()
    }

    /// Price in the form the liquidity math consumes
    pub fn pool_price(&self) -> PoolPrice {
        let mut bytes = [0u8; 32];
        self.sqrt_price_x96.to_big_endian(&mut bytes);
        let sqrt_price_x96 = BigInt::from_bytes_be(num_bigint::Sign::Plus, &bytes);
        PoolPrice::from_sqrt_price_x96(&sqrt_price_x96, self.tick)
    }

    /// Human price of token0 in token1 units, adjusted for decimals
    pub fn human_price(&self, decimals0: u8, decimals1: u8) -> BigDecimal {
        let price = self.pool_price();
        let raw = &price.sqrt_price * &price.sqrt_price;
        let shift = decimals0 as i64 - decimals1 as i64;
        raw * ladder_amm::precise::powi(&BigDecimal::from(10), shift)
    }
}
