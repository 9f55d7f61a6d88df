//! # Ladder AMM Library - Concentrated Liquidity Ladder Mathematics
//!
//! ## Purpose
//!
//! Pure, synchronous math for laying out a ladder of concentrated-liquidity
//! positions: price/tick conversion, tick-spacing alignment, cross-token decimal
//! offsets, budget distribution across positions and USD-to-liquidity conversion.
//! Nothing in this crate performs I/O.
//!
//! ## Integration Points
//!
//! - **Input Sources**: user range, budget and weighting; pool `slot0` price from the engine
//! - **Output Destinations**: V3/V4 protocol providers in `ladder-engine`
//! - **Precision**: 50 significant digits via [`bigdecimal::BigDecimal`] for every tick
//!   and sqrt-price computation, [`rust_decimal::Decimal`] for USD shares
//! - **Ordering**: amounts are always keyed by pool-native token index
//!
//! ## Architecture Role
//!
//! ```text
//! PriceRange + budget ──► distribution ──► Position[] (ticks, USD shares)
//!                              │
//!                          tick_math ◄── precise (ln, pow, floor)
//!                              │
//! slot0 (PoolPrice) ────► liquidity ──► Position[] (liquidity, amounts)
//! ```

pub mod distribution;
pub mod error;
pub mod fee;
pub mod liquidity;
pub mod precise;
pub mod tick_math;

pub use distribution::{
    allocate_budget, build_ladder, ladder_from_percent, log_distribution, LadderSpec,
    PercentLadder, Position, PriceRange, TokenPair, WeightingScheme, MAX_POSITIONS,
};
pub use error::{AmmError, Result};
pub use fee::{
    derived_tick_spacing, fee_percent_to_v4, suggest_tick_spacing, tick_spacing_for_fee,
    v4_fee_to_percent, FeeSpec, MAX_V4_FEE, V3_FEE_TIERS,
};
pub use liquidity::{
    amounts_for_liquidity, liquidity_for_amounts, liquidity_from_usd, range_side,
    total_amounts, with_liquidity, PoolPrice, RangeSide, TokenAmounts, TokenIndex,
};
pub use tick_math::{
    align_tick_to_spacing, aligned_decimal_offset, compute_decimal_tick_offset,
    price_to_sqrt_price_x96, price_to_tick, sqrt_price_x96_to_price, tick_to_price,
    tick_to_sqrt_price_x96, MAX_TICK, MIN_TICK,
};

/// Common types for ladder calculations
pub use bigdecimal::BigDecimal;
pub use rust_decimal::Decimal;
pub use rust_decimal_macros::dec;
