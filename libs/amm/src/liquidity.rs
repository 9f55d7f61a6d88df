//! Liquidity conversion
//!
//! Turns a position's USD share into raw token amounts and a liquidity value.
//! Everything runs in raw pool space: ticks already carry the decimal offset and
//! sqrt prices are those of raw token units, so tokens with different precision
//! never pick up a `10^(d1 - d0)` magnitude error.
//!
//! Amounts are always keyed by pool-native index. Which of the two tokens is the
//! stable one plays no part here.

use bigdecimal::BigDecimal;
use num_bigint::BigInt;
use num_traits::Zero;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::distribution::{Position, TokenPair};
use crate::error::{AmmError, Result};
use crate::precise::{self, Q96};
use crate::tick_math::sqrt_price_at_tick;

/// Pool-native token slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenIndex {
    Token0,
    Token1,
}

/// Raw token amounts in pool order
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenAmounts {
    pub amount0: u128,
    pub amount1: u128,
}

impl TokenAmounts {
    pub fn get(&self, index: TokenIndex) -> u128 {
        match index {
            TokenIndex::Token0 => self.amount0,
            TokenIndex::Token1 => self.amount1,
        }
    }
}

/// Where a position sits relative to the current pool tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeSide {
    /// Entire range above the price, funded with token0 only
    AbovePrice,
    /// Entire range at or below the price, funded with token1 only
    BelowPrice,
    InRange,
}

pub fn range_side(current_tick: i32, tick_lower: i32, tick_upper: i32) -> RangeSide {
    if current_tick < tick_lower {
        RangeSide::AbovePrice
    } else if current_tick >= tick_upper {
        RangeSide::BelowPrice
    } else {
        RangeSide::InRange
    }
}

/// Current pool price as read from slot0
#[derive(Debug, Clone, PartialEq)]
pub struct PoolPrice {
    pub tick: i32,
    /// Real sqrt of the raw price (token1 units per token0 unit)
    pub sqrt_price: BigDecimal,
}

impl PoolPrice {
    pub fn from_sqrt_price_x96(sqrt_price_x96: &BigInt, tick: i32) -> Self {
        let sqrt_price = BigDecimal::new(sqrt_price_x96.clone(), 0) / &*Q96;
        Self {
            tick,
            sqrt_price: precise::normalize(sqrt_price),
        }
    }

    /// Price sitting exactly on `tick`
    pub fn at_tick(tick: i32) -> Self {
        Self {
            tick,
            sqrt_price: sqrt_price_at_tick(tick),
        }
    }
}

fn sqrt_bounds(tick_lower: i32, tick_upper: i32) -> Result<(BigDecimal, BigDecimal)> {
    let sqrt_lower = sqrt_price_at_tick(tick_lower);
    let sqrt_upper = sqrt_price_at_tick(tick_upper);
    if sqrt_upper <= sqrt_lower {
        return Err(AmmError::InvalidTickRange {
            lower: tick_lower,
            upper: tick_upper,
        });
    }
    Ok((sqrt_lower, sqrt_upper))
}

/// `L = a0 * √u * √l / (√u - √l)`
pub fn liquidity_for_amount0(
    sqrt_lower: &BigDecimal,
    sqrt_upper: &BigDecimal,
    amount0: &BigDecimal,
) -> BigDecimal {
    precise::normalize(amount0 * sqrt_upper * sqrt_lower / (sqrt_upper - sqrt_lower))
}

/// `L = a1 / (√u - √l)`
pub fn liquidity_for_amount1(
    sqrt_lower: &BigDecimal,
    sqrt_upper: &BigDecimal,
    amount1: &BigDecimal,
) -> BigDecimal {
    precise::normalize(amount1 / (sqrt_upper - sqrt_lower))
}

/// Exact (unfloored) amounts held by `liquidity` over a range at `sqrt_price`
fn amounts_exact(
    side: RangeSide,
    sqrt_price: &BigDecimal,
    sqrt_lower: &BigDecimal,
    sqrt_upper: &BigDecimal,
    liquidity: &BigDecimal,
) -> (BigDecimal, BigDecimal) {
    match side {
        RangeSide::AbovePrice => (
            liquidity * (sqrt_upper - sqrt_lower) / (sqrt_upper * sqrt_lower),
            BigDecimal::zero(),
        ),
        RangeSide::BelowPrice => (BigDecimal::zero(), liquidity * (sqrt_upper - sqrt_lower)),
        RangeSide::InRange => {
            let s = sqrt_price.clamp(sqrt_lower, sqrt_upper);
            (
                liquidity * (sqrt_upper - s) / (s * sqrt_upper),
                liquidity * (s - sqrt_lower),
            )
        }
    }
}

/// Raw token amounts for `liquidity`, floored
pub fn amounts_for_liquidity(
    price: &PoolPrice,
    tick_lower: i32,
    tick_upper: i32,
    liquidity: u128,
) -> Result<TokenAmounts> {
    let (sqrt_lower, sqrt_upper) = sqrt_bounds(tick_lower, tick_upper)?;
    let side = range_side(price.tick, tick_lower, tick_upper);
    let (a0, a1) = amounts_exact(
        side,
        &price.sqrt_price,
        &sqrt_lower,
        &sqrt_upper,
        &precise::from_u128(liquidity),
    );
    Ok(TokenAmounts {
        amount0: precise::floor_u128(&a0).ok_or_else(|| AmmError::overflow("amount0"))?,
        amount1: precise::floor_u128(&a1).ok_or_else(|| AmmError::overflow("amount1"))?,
    })
}

/// Largest liquidity the given amounts can fund
pub fn liquidity_for_amounts(
    price: &PoolPrice,
    tick_lower: i32,
    tick_upper: i32,
    amounts: TokenAmounts,
) -> Result<u128> {
    let (sqrt_lower, sqrt_upper) = sqrt_bounds(tick_lower, tick_upper)?;
    let a0 = precise::from_u128(amounts.amount0);
    let a1 = precise::from_u128(amounts.amount1);
    let liquidity = match range_side(price.tick, tick_lower, tick_upper) {
        RangeSide::AbovePrice => liquidity_for_amount0(&sqrt_lower, &sqrt_upper, &a0),
        RangeSide::BelowPrice => liquidity_for_amount1(&sqrt_lower, &sqrt_upper, &a1),
        RangeSide::InRange => {
            let s = (&price.sqrt_price).clamp(&sqrt_lower, &sqrt_upper).clone();
            let from0 = liquidity_for_amount0(&s, &sqrt_upper, &a0);
            let from1 = liquidity_for_amount1(&sqrt_lower, &s, &a1);
            from0.min(from1)
        }
    };
    precise::floor_u128(&liquidity).ok_or_else(|| AmmError::overflow("liquidity"))
}

/// Liquidity and amounts for a USD share of the quote token
///
/// The quote token is the numeraire. A position funded purely with it converts
/// USD to raw units exactly; anything else is valued per unit of liquidity at the
/// range mid price (single-sided) or the current price (in range).
pub fn liquidity_from_usd(
    index: u32,
    usd_amount: Decimal,
    tick_lower: i32,
    tick_upper: i32,
    price: &PoolPrice,
    pair: &TokenPair,
) -> Result<(u128, TokenAmounts)> {
    let (sqrt_lower, sqrt_upper) = sqrt_bounds(tick_lower, tick_upper)?;
    let side = range_side(price.tick, tick_lower, tick_upper);
    let numeraire = pair.numeraire_index();
    let (d0, d1) = pair.pool_decimals();
    let numeraire_decimals = match numeraire {
        TokenIndex::Token0 => d0,
        TokenIndex::Token1 => d1,
    };

    let usd = precise::from_decimal(usd_amount);
    let numeraire_raw = &usd * precise::pow10(numeraire_decimals as u32);

    let zero = || AmmError::ZeroLiquidity {
        index,
        usd: usd_amount.to_string(),
    };

    let liquidity = match (side, numeraire) {
        (RangeSide::AbovePrice, TokenIndex::Token0) => {
            let raw = BigDecimal::new(precise::floor(&numeraire_raw), 0);
            liquidity_for_amount0(&sqrt_lower, &sqrt_upper, &raw)
        }
        (RangeSide::BelowPrice, TokenIndex::Token1) => {
            let raw = BigDecimal::new(precise::floor(&numeraire_raw), 0);
            liquidity_for_amount1(&sqrt_lower, &sqrt_upper, &raw)
        }
        _ => {
            let valuation_sqrt = match side {
                RangeSide::InRange => price.sqrt_price.clone(),
                _ => {
                    let mid = (&sqrt_lower * &sqrt_lower + &sqrt_upper * &sqrt_upper)
                        / BigDecimal::from(2);
                    mid.sqrt().ok_or_else(|| AmmError::overflow("mid price"))?
                }
            };
            let raw_price = &valuation_sqrt * &valuation_sqrt;
            let (per_l0, per_l1) = amounts_exact(
                side,
                &price.sqrt_price,
                &sqrt_lower,
                &sqrt_upper,
                &BigDecimal::from(1),
            );
            // value of one unit of liquidity in raw numeraire units
            let per_l = match numeraire {
                TokenIndex::Token1 => per_l1 + per_l0 * &raw_price,
                TokenIndex::Token0 => per_l0 + per_l1 / &raw_price,
            };
            if per_l.is_zero() {
                return Err(zero());
            }
            precise::normalize(&numeraire_raw / per_l)
        }
    };

    let liquidity = precise::floor_u128(&liquidity).ok_or_else(|| AmmError::overflow("liquidity"))?;
    if liquidity == 0 {
        return Err(zero());
    }

    let amounts = match (side, numeraire) {
        (RangeSide::AbovePrice, TokenIndex::Token0) | (RangeSide::BelowPrice, TokenIndex::Token1) => {
            // keep the exact truncated budget rather than re-deriving it from L
            let raw = precise::floor_u128(&numeraire_raw).ok_or_else(|| AmmError::overflow("amount"))?;
            match numeraire {
                TokenIndex::Token0 => TokenAmounts { amount0: raw, amount1: 0 },
                TokenIndex::Token1 => TokenAmounts { amount0: 0, amount1: raw },
            }
        }
        _ => amounts_for_liquidity(price, tick_lower, tick_upper, liquidity)?,
    };

    debug!(
        index,
        %usd_amount,
        ?side,
        liquidity = %liquidity,
        amount0 = %amounts.amount0,
        amount1 = %amounts.amount1,
        "converted position"
    );
    Ok((liquidity, amounts))
}

/// Fill in liquidity and amounts for every position of a ladder
pub fn with_liquidity(
    positions: Vec<Position>,
    price: &PoolPrice,
    pair: &TokenPair,
) -> Result<Vec<Position>> {
    positions
        .into_iter()
        .map(|mut position| {
            let (liquidity, amounts) = liquidity_from_usd(
                position.index,
                position.usd_amount,
                position.tick_lower,
                position.tick_upper,
                price,
                pair,
            )?;
            position.liquidity = liquidity;
            position.amounts = amounts;
            Ok(position)
        })
        .collect()
}

/// Total raw amounts a ladder needs, for allowance and balance checks
pub fn total_amounts(positions: &[Position]) -> TokenAmounts {
    positions.iter().fold(TokenAmounts::default(), |acc, p| TokenAmounts {
        amount0: acc.amount0.saturating_add(p.amounts.amount0),
        amount1: acc.amount1.saturating_add(p.amounts.amount1),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn pair(base: u8, quote: u8, base_decimals: u8, quote_decimals: u8) -> TokenPair {
        TokenPair {
            token0: [base; 20],
            token1: [quote; 20],
            token0_decimals: base_decimals,
            token1_decimals: quote_decimals,
        }
    }

    #[test]
    fn test_range_side_boundaries() {
        assert_eq!(range_side(-10, 0, 60), RangeSide::AbovePrice);
        assert_eq!(range_side(0, 0, 60), RangeSide::InRange);
        assert_eq!(range_side(59, 0, 60), RangeSide::InRange);
        assert_eq!(range_side(60, 0, 60), RangeSide::BelowPrice);
    }

    #[test]
    fn test_numeraire_only_position_is_exact() {
        // quote sorts second, so the numeraire is token1 and sits below the price
        let pair = pair(0x11, 0x22, 18, 6);
        let price = PoolPrice::at_tick(-200_000);
        let (liquidity, amounts) =
            liquidity_from_usd(1, dec!(123.456789), -210_000, -205_000, &price, &pair).unwrap();
        assert!(liquidity > 0);
        assert_eq!(amounts.amount0, 0);
        assert_eq!(amounts.amount1, 123_456_789);
    }

    #[test]
    fn test_inverted_numeraire_is_token0() {
        // quote sorts first: numeraire is token0, funded above the price
        let pair = pair(0x22, 0x11, 18, 6);
        let price = PoolPrice::at_tick(100_000);
        let (_, amounts) =
            liquidity_from_usd(1, dec!(50), 110_000, 120_000, &price, &pair).unwrap();
        assert_eq!(amounts.amount0, 50_000_000);
        assert_eq!(amounts.amount1, 0);
    }

    #[test]
    fn test_in_range_needs_both_tokens() {
        let pair = pair(0x11, 0x22, 18, 18);
        let price = PoolPrice::at_tick(0);
        let (liquidity, amounts) =
            liquidity_from_usd(1, dec!(1000), -600, 600, &price, &pair).unwrap();
        assert!(liquidity > 0);
        assert!(amounts.amount0 > 0);
        assert!(amounts.amount1 > 0);

        // at price 1 both tokens are worth the same, so the sum is the budget
        let target = 1000u128 * 10u128.pow(18);
        let total = amounts.amount0 + amounts.amount1;
        assert!(total <= target);
        assert!(target - total < 1_000_000, "total {}", total);
    }

    #[test]
    fn test_non_numeraire_side_holds_one_token() {
        let pair = pair(0x11, 0x22, 18, 18);
        let price = PoolPrice::at_tick(-1200);
        let (_, amounts) = liquidity_from_usd(2, dec!(10), -600, 0, &price, &pair).unwrap();
        assert!(amounts.amount0 > 0);
        assert_eq!(amounts.amount1, 0);
    }

    #[test]
    fn test_dust_budget_is_rejected() {
        let pair = pair(0x11, 0x22, 0, 0);
        let price = PoolPrice::at_tick(1000);
        assert!(matches!(
            liquidity_from_usd(3, dec!(0.000001), -600, 0, &price, &pair),
            Err(AmmError::ZeroLiquidity { index: 3, .. })
        ));
    }

    #[test]
    fn test_inverted_range_rejected() {
        let pair = pair(0x11, 0x22, 18, 18);
        let price = PoolPrice::at_tick(0);
        assert!(matches!(
            amounts_for_liquidity(&price, 600, -600, 1),
            Err(AmmError::InvalidTickRange { .. })
        ));
        assert!(liquidity_from_usd(1, dec!(1), 60, 60, &price, &pair).is_err());
    }

    #[test]
    fn test_liquidity_for_amounts_inverts_amounts() {
        let price = PoolPrice::at_tick(30);
        let liquidity = 10u128.pow(24);
        let amounts = amounts_for_liquidity(&price, -600, 600, liquidity).unwrap();
        let recovered = liquidity_for_amounts(&price, -600, 600, amounts).unwrap();
        let drift = liquidity - recovered;
        assert!(drift < 10u128.pow(6), "drift {}", drift);
    }

    #[test]
    fn test_sqrt_price_x96_matches_tick() {
        let price = PoolPrice::from_sqrt_price_x96(&(BigInt::from(1) << 96usize), 0);
        assert_eq!(price.sqrt_price, BigDecimal::from(1));
    }
}
