//! Concentrated-liquidity tick mathematics
//!
//! Prices relate to ticks through `price = 1.0001^tick`. All conversions run on
//! 50-digit decimals (see [`crate::precise`]) so a ladder of fifty positions
//! lands on the same ticks no matter how many times prices are re-derived.

use bigdecimal::BigDecimal;
use num_bigint::BigInt;
use num_traits::{One, ToPrimitive, Zero};
use once_cell::sync::Lazy;

use crate::error::{AmmError, Result};
use crate::precise::{self, LN_10, LN_TICK_BASE, Q96, TICK_BASE};

pub const MIN_TICK: i32 = -887_272;
pub const MAX_TICK: i32 = 887_272;

/// Smallest sqrt price a pool accepts, `sqrt(1.0001^MIN_TICK) * 2^96`
pub static MIN_SQRT_RATIO: Lazy<BigInt> = Lazy::new(|| BigInt::from(4_295_128_739u64));

/// Largest sqrt price a pool accepts, `0xFFFD8963EFD1FC6A506488495D951D5263988D26`
pub static MAX_SQRT_RATIO: Lazy<BigInt> = Lazy::new(|| {
    (BigInt::from(0xFFFD_8963u64) << 128usize)
        + BigInt::from(0xEFD1_FC6A_5064_8849_5D95_1D52_6398_8D26u128)
});

/// Quotients this close to an integer are treated as that integer
static TICK_SNAP_EPSILON: Lazy<BigDecimal> = Lazy::new(|| BigDecimal::new(BigInt::one(), 30));

/// Convert a price to the tick at or below it
///
/// With `invert` the tick of `1 / price` is returned, which is how a quote-per-base
/// price becomes a pool tick when the quote token sorts first.
pub fn price_to_tick(price: &BigDecimal, invert: bool) -> Result<i32> {
    if *price <= BigDecimal::zero() {
        return Err(AmmError::invalid_price(price, "price must be positive"));
    }

    let effective = if invert {
        (BigDecimal::one() / price).with_prec(precise::PRECISION + 30)
    } else {
        price.clone()
    };

    let log = precise::ln(&effective)
        .ok_or_else(|| AmmError::invalid_price(price, "logarithm undefined"))?;
    let quotient = log / &*LN_TICK_BASE;

    let nearest = precise::round(&quotient);
    let snapped = if (&quotient - BigDecimal::new(nearest.clone(), 0)).abs() < *TICK_SNAP_EPSILON {
        nearest
    } else {
        precise::floor(&quotient)
    };

    let tick = snapped
        .to_i64()
        .ok_or_else(|| AmmError::invalid_price(price, "tick out of range"))?;
    Ok(tick.clamp(MIN_TICK as i64, MAX_TICK as i64) as i32)
}

/// Price at a tick, `1.0001^tick` (or its reciprocal with `invert`)
pub fn tick_to_price(tick: i32, invert: bool) -> BigDecimal {
    let exponent = if invert { -(tick as i64) } else { tick as i64 };
    precise::normalize(precise::powi(&TICK_BASE, exponent))
}

/// Snap a tick onto the spacing grid
///
/// Ticks already on the grid are returned unchanged; everything else moves toward
/// -inf with `round_down` and toward +inf otherwise.
pub fn align_tick_to_spacing(tick: i32, spacing: i32, round_down: bool) -> Result<i32> {
    if spacing <= 0 {
        return Err(AmmError::InvalidTickSpacing { spacing });
    }
    if tick.rem_euclid(spacing) == 0 {
        return Ok(tick);
    }
    let floor = tick.div_euclid(spacing) * spacing;
    Ok(if round_down { floor } else { floor + spacing })
}

/// Tick shift between human and raw prices for a pair of token precisions
///
/// A raw pool price is `human * 10^(decimals1 - decimals0)`, so the raw tick is
/// the human tick plus `round((decimals1 - decimals0) * ln(10) / ln(1.0001))`.
/// For a 6-decimal token0 against an 18-decimal token1 this is 276324.
pub fn compute_decimal_tick_offset(decimals0: u8, decimals1: u8) -> Result<i32> {
    let delta = decimals1 as i64 - decimals0 as i64;
    if delta == 0 {
        return Ok(0);
    }
    let ticks = BigDecimal::from(delta) * &*LN_10 / &*LN_TICK_BASE;
    precise::round(&ticks)
        .to_i32()
        .ok_or_else(|| AmmError::overflow("decimal tick offset"))
}

/// Decimal offset rounded to the nearest multiple of `spacing`
pub fn aligned_decimal_offset(offset: i32, spacing: i32) -> Result<i32> {
    if spacing <= 0 {
        return Err(AmmError::InvalidTickSpacing { spacing });
    }
    if offset == 0 {
        return Ok(0);
    }
    let ratio = BigDecimal::from(offset) / BigDecimal::from(spacing);
    let steps = precise::round(&ratio)
        .to_i32()
        .ok_or_else(|| AmmError::overflow("aligned decimal offset"))?;
    steps
        .checked_mul(spacing)
        .ok_or_else(|| AmmError::overflow("aligned decimal offset"))
}

/// sqrt(price) in Q64.96, clamped to the pool's accepted range
pub fn price_to_sqrt_price_x96(price: &BigDecimal) -> Result<BigInt> {
    if *price <= BigDecimal::zero() {
        return Err(AmmError::invalid_price(price, "sqrt price of non-positive value"));
    }
    let root = price
        .sqrt()
        .ok_or_else(|| AmmError::invalid_price(price, "square root undefined"))?;
    let scaled = precise::floor(&(root * &*Q96));
    Ok(scaled.clamp(MIN_SQRT_RATIO.clone(), MAX_SQRT_RATIO.clone()))
}

/// Raw price from a Q64.96 sqrt price
pub fn sqrt_price_x96_to_price(sqrt_price_x96: &BigInt) -> BigDecimal {
    let root = BigDecimal::new(sqrt_price_x96.clone(), 0) / &*Q96;
    precise::normalize(&root * &root)
}

/// Real-valued sqrt price (not Q64.96) at a tick
pub fn sqrt_price_at_tick(tick: i32) -> BigDecimal {
    let price = precise::powi(&TICK_BASE, tick as i64);
    // price is strictly positive, sqrt cannot fail
    price.sqrt().map(precise::normalize).unwrap_or_else(BigDecimal::one)
}

pub fn tick_to_sqrt_price_x96(tick: i32) -> Result<BigInt> {
    price_to_sqrt_price_x96(&tick_to_price(tick, false))
}

/// Price bounds for a tick range, ordered `(lower, upper)` even when inverted
pub fn price_range_for_ticks(
    tick_lower: i32,
    tick_upper: i32,
    invert: bool,
) -> (BigDecimal, BigDecimal) {
    let a = tick_to_price(tick_lower, invert);
    let b = tick_to_price(tick_upper, invert);
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}
