//! Ladder distribution
//!
//! Turns a price range, a USD budget and a weighting scheme into consecutive,
//! non-overlapping tick ranges. Position 1 sits next to the reference price and
//! weights grow with distance from it, so the bulk of the budget waits at the far
//! end of the ladder:
//!
//! ```text
//! reference 10.0 ┬ #1  9-10   5%
//!                ├ #2  8-9   10%
//!                ├ #3  7-8   15%
//!                ├ #4  6-7   25%
//!      lower 5.0 ┴ #5  5-6   45%
//! ```

use std::fmt;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use num_traits::{ToPrimitive, Zero};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{AmmError, Result};
use crate::fee::FeeSpec;
use crate::liquidity::{TokenAmounts, TokenIndex};
use crate::precise;
use crate::tick_math::{
    align_tick_to_spacing, aligned_decimal_offset, compute_decimal_tick_offset, price_to_tick,
    tick_to_price, MAX_TICK, MIN_TICK,
};

pub const MAX_POSITIONS: u32 = 50;

/// Fractional digits kept on per-position USD shares
pub const USD_DECIMALS: u32 = 6;

const EXPONENTIAL_BASE: Decimal = dec!(1.5);

/// How the budget is spread across the ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightingScheme {
    #[default]
    Linear,
    Quadratic,
    Exponential,
    Fibonacci,
}

impl WeightingScheme {
    /// Weight of position `i`, counted from 1
    pub fn weight(&self, i: u32) -> Decimal {
        match self {
            Self::Linear => Decimal::from(i),
            Self::Quadratic => Decimal::from(i) * Decimal::from(i),
            Self::Exponential => (1..i).fold(Decimal::ONE, |acc, _| acc * EXPONENTIAL_BASE),
            // Fib(i + 1): 1, 2, 3, 5, 8, ...
            Self::Fibonacci => {
                let (mut a, mut b) = (1u64, 1u64);
                for _ in 0..i {
                    let next = a + b;
                    a = b;
                    b = next;
                }
                Decimal::from(a)
            }
        }
    }

    pub fn weights(&self, n: u32) -> Vec<Decimal> {
        (1..=n).map(|i| self.weight(i)).collect()
    }
}

impl FromStr for WeightingScheme {
    type Err = AmmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "linear" => Ok(Self::Linear),
            "quadratic" => Ok(Self::Quadratic),
            "exponential" => Ok(Self::Exponential),
            "fibonacci" => Ok(Self::Fibonacci),
            other => Err(AmmError::invalid_spec(format!(
                "unknown weighting scheme '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for WeightingScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Linear => "linear",
            Self::Quadratic => "quadratic",
            Self::Exponential => "exponential",
            Self::Fibonacci => "fibonacci",
        };
        f.write_str(name)
    }
}

/// Reference (upper) and far (lower) price of a bid ladder, quote per base
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRange {
    pub upper: BigDecimal,
    pub lower: BigDecimal,
}

/// Base and quote token as the user sees them
///
/// `token0` is the priced (base) token and `token1` the quote token. Pool order is
/// by address and is derived here, never assumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub token0: [u8; 20],
    pub token1: [u8; 20],
    pub token0_decimals: u8,
    pub token1_decimals: u8,
}

impl TokenPair {
    /// Quote token sorts first, so pool prices are base per quote
    pub fn invert_price(&self) -> bool {
        self.token1 < self.token0
    }

    /// Pool index of the quote token, the USD numeraire
    pub fn numeraire_index(&self) -> TokenIndex {
        if self.invert_price() {
            TokenIndex::Token0
        } else {
            TokenIndex::Token1
        }
    }

    /// Addresses in pool order
    pub fn pool_tokens(&self) -> ([u8; 20], [u8; 20]) {
        if self.invert_price() {
            (self.token1, self.token0)
        } else {
            (self.token0, self.token1)
        }
    }

    /// Decimals in pool order
    pub fn pool_decimals(&self) -> (u8, u8) {
        if self.invert_price() {
            (self.token1_decimals, self.token0_decimals)
        } else {
            (self.token0_decimals, self.token1_decimals)
        }
    }

    pub fn decimal_tick_offset(&self) -> Result<i32> {
        let (d0, d1) = self.pool_decimals();
        compute_decimal_tick_offset(d0, d1)
    }
}

/// Everything needed to lay out a ladder; immutable once built
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LadderSpec {
    pub range: PriceRange,
    pub pair: TokenPair,
    pub fee: FeeSpec,
    pub position_count: u32,
    pub weighting: WeightingScheme,
    pub total_budget_usd: Decimal,
    pub quote_token_is_stable: bool,
}

impl LadderSpec {
    pub fn validate(&self) -> Result<()> {
        if self.range.lower <= BigDecimal::zero() {
            return Err(AmmError::invalid_spec(format!(
                "lower price {} must be positive",
                self.range.lower
            )));
        }
        if self.range.lower >= self.range.upper {
            return Err(AmmError::invalid_spec(format!(
                "lower price {} must be below upper price {}",
                self.range.lower, self.range.upper
            )));
        }
        validate_count_and_budget(self.position_count, self.total_budget_usd)
    }
}

fn validate_count_and_budget(position_count: u32, total_budget_usd: Decimal) -> Result<()> {
    if position_count == 0 || position_count > MAX_POSITIONS {
        return Err(AmmError::invalid_spec(format!(
            "position count {} outside 1..={}",
            position_count, MAX_POSITIONS
        )));
    }
    if total_budget_usd <= Decimal::ZERO {
        return Err(AmmError::invalid_spec(format!(
            "budget {} must be positive",
            total_budget_usd
        )));
    }
    Ok(())
}

/// One rung of the ladder
///
/// Ticks are pool-native (decimal offset applied); prices are human quote per
/// base. `liquidity` and `amounts` stay zero until liquidity conversion runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub index: u32,
    pub tick_lower: i32,
    pub tick_upper: i32,
    pub price_lower: BigDecimal,
    pub price_upper: BigDecimal,
    pub usd_amount: Decimal,
    pub weight_share: Decimal,
    pub liquidity: u128,
    pub amounts: TokenAmounts,
}

/// Lay out a bid ladder from `range.upper` down to `range.lower`
pub fn build_ladder(spec: &LadderSpec) -> Result<Vec<Position>> {
    spec.validate()?;
    let spacing = spec.fee.tick_spacing()?;
    let positions = ladder_between(
        &spec.range.upper,
        &spec.range.lower,
        &LadderShape {
            position_count: spec.position_count,
            budget: spec.total_budget_usd,
            weighting: spec.weighting,
            spacing,
            pair: spec.pair,
        },
    )?;
    log_distribution(&positions);
    Ok(positions)
}

struct LadderShape {
    position_count: u32,
    budget: Decimal,
    weighting: WeightingScheme,
    spacing: i32,
    pair: TokenPair,
}

/// Ladder from `anchor` (nearest position) toward `limit` (heaviest position)
fn ladder_between(
    anchor: &BigDecimal,
    limit: &BigDecimal,
    shape: &LadderShape,
) -> Result<Vec<Position>> {
    let invert = shape.pair.invert_price();
    let spacing = shape.spacing;
    let n = shape.position_count;

    let tick_anchor = price_to_tick(anchor, invert)?;
    let tick_limit = price_to_tick(limit, invert)?;
    let goes_down = tick_anchor > tick_limit;

    // Keep the rung nearest the anchor entirely on the far side of it
    let (lower, mut upper) = if goes_down {
        (
            align_tick_to_spacing(tick_limit, spacing, true)?,
            align_tick_to_spacing(tick_anchor, spacing, true)?,
        )
    } else {
        (
            align_tick_to_spacing(tick_anchor, spacing, false)?,
            align_tick_to_spacing(tick_limit, spacing, true)?,
        )
    };
    if upper <= lower {
        upper = lower + spacing;
    }

    let span = (upper - lower) as i64;
    let block = n as i64 * spacing as i64;
    let width = (((span + block - 1) / block) * spacing as i64).max(spacing as i64);
    let width = i32::try_from(width).map_err(|_| AmmError::overflow("position width"))?;

    let offset = aligned_decimal_offset(shape.pair.decimal_tick_offset()?, spacing)?;
    let allocations = allocate_budget(shape.budget, shape.weighting, n)?;

    let mut positions = Vec::with_capacity(n as usize);
    for (i, (usd_amount, weight_share)) in allocations.into_iter().enumerate() {
        let i = i as i32;
        let (human_lower, human_upper) = if goes_down {
            (upper - (i + 1) * width, upper - i * width)
        } else {
            (lower + i * width, lower + (i + 1) * width)
        };

        let tick_lower = human_lower + offset;
        let tick_upper = human_upper + offset;
        if tick_lower < MIN_TICK || tick_upper > MAX_TICK {
            return Err(AmmError::invalid_spec(format!(
                "position {} ticks [{}, {}] leave the valid tick range",
                i + 1,
                tick_lower,
                tick_upper
            )));
        }

        let mut price_lower = tick_to_price(human_lower, invert);
        let mut price_upper = tick_to_price(human_upper, invert);
        if invert {
            std::mem::swap(&mut price_lower, &mut price_upper);
        }

        positions.push(Position {
            index: i as u32 + 1,
            tick_lower,
            tick_upper,
            price_lower,
            price_upper,
            usd_amount,
            weight_share,
            liquidity: 0,
            amounts: TokenAmounts::default(),
        });
    }

    Ok(positions)
}

/// USD share and weight fraction per position; shares sum to `budget` exactly
pub fn allocate_budget(
    budget: Decimal,
    weighting: WeightingScheme,
    n: u32,
) -> Result<Vec<(Decimal, Decimal)>> {
    validate_count_and_budget(n, budget)?;
    if n == 1 {
        return Ok(vec![(budget, Decimal::ONE)]);
    }

    let weights = weighting.weights(n);
    let total: Decimal = weights.iter().copied().sum();

    let mut allocations = Vec::with_capacity(n as usize);
    let mut allocated = Decimal::ZERO;
    for (i, weight) in weights.iter().enumerate() {
        let share = *weight / total;
        let usd = if i + 1 == weights.len() {
            budget - allocated
        } else {
            (budget * *weight / total)
                .round_dp_with_strategy(USD_DECIMALS, RoundingStrategy::ToZero)
        };
        allocated += usd;
        allocations.push((usd, share));
    }
    Ok(allocations)
}

/// Ladder described as percentage offsets from a reference price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PercentLadder {
    pub reference_price: BigDecimal,
    /// e.g. -5 for 5% below the reference
    pub percent_from: Decimal,
    /// e.g. -50 for 50% below the reference
    pub percent_to: Decimal,
    pub pair: TokenPair,
    pub fee: FeeSpec,
    pub position_count: u32,
    pub weighting: WeightingScheme,
    pub total_budget_usd: Decimal,
    pub quote_token_is_stable: bool,
}

/// Ladder from percentage offsets
///
/// A range on one side of the reference price is a single ladder anchored at the
/// bound nearest the reference. A range straddling it becomes two ladders: bids
/// below and asks above, each heaviest at its far end. Positions and budget split
/// in proportion to each side's share of the price range.
pub fn ladder_from_percent(request: &PercentLadder) -> Result<Vec<Position>> {
    validate_count_and_budget(request.position_count, request.total_budget_usd)?;
    let reference = &request.reference_price;
    if *reference <= BigDecimal::zero() {
        return Err(AmmError::invalid_price(reference, "reference price must be positive"));
    }

    let hundred = BigDecimal::from(100);
    let to_price = |percent: Decimal| -> BigDecimal {
        reference * (BigDecimal::from(1) + precise::from_decimal(percent) / &hundred)
    };
    let price_from = to_price(request.percent_from);
    let price_to = to_price(request.percent_to);
    let (lower, upper) = if price_from <= price_to {
        (price_from, price_to)
    } else {
        (price_to, price_from)
    };

    if lower <= BigDecimal::zero() {
        return Err(AmmError::invalid_spec(format!(
            "range bound {}% falls at or below zero",
            request.percent_from.min(request.percent_to)
        )));
    }
    if lower == upper {
        return Err(AmmError::invalid_spec("percent range is empty"));
    }

    let spacing = request.fee.tick_spacing()?;
    let shape = |position_count: u32, budget: Decimal| LadderShape {
        position_count,
        budget,
        weighting: request.weighting,
        spacing,
        pair: request.pair,
    };

    let spans_above = upper > *reference;
    let spans_below = lower < *reference;

    let positions = if spans_above && spans_below {
        two_sided(reference, &lower, &upper, request, &shape)?
    } else if spans_below {
        ladder_between(
            &upper,
            &lower,
            &shape(request.position_count, request.total_budget_usd),
        )?
    } else {
        ladder_between(
            &lower,
            &upper,
            &shape(request.position_count, request.total_budget_usd),
        )?
    };

    log_distribution(&positions);
    Ok(positions)
}

fn two_sided(
    reference: &BigDecimal,
    lower: &BigDecimal,
    upper: &BigDecimal,
    request: &PercentLadder,
    shape: &dyn Fn(u32, Decimal) -> LadderShape,
) -> Result<Vec<Position>> {
    let n = request.position_count;
    if n < 2 {
        return Err(AmmError::invalid_spec(
            "a range straddling the reference price needs at least two positions",
        ));
    }

    let range_below = reference - lower;
    let range_above = upper - reference;
    let total_range = &range_below + &range_above;
    let below_fraction = &range_below / &total_range;

    let below_count = precise::round(&(BigDecimal::from(n) * &below_fraction))
        .to_u32()
        .ok_or_else(|| AmmError::overflow("below-reference position count"))?
        .clamp(1, n - 1);
    let above_count = n - below_count;

    let fraction = precise::to_decimal(&below_fraction, 18)
        .ok_or_else(|| AmmError::overflow("budget split"))?;
    let budget = request.total_budget_usd;
    let usd_below = (budget * fraction)
        .round_dp_with_strategy(USD_DECIMALS, RoundingStrategy::ToZero);
    let usd_above = budget - usd_below;
    if usd_below <= Decimal::ZERO || usd_above <= Decimal::ZERO {
        return Err(AmmError::invalid_spec(
            "budget too small to fund both sides of the range",
        ));
    }

    let mut positions = ladder_between(reference, lower, &shape(below_count, usd_below))?;
    positions.extend(ladder_between(
        reference,
        upper,
        &shape(above_count, usd_above),
    )?);

    for (i, position) in positions.iter_mut().enumerate() {
        position.index = i as u32 + 1;
        position.weight_share = (position.usd_amount / budget)
            .round_dp_with_strategy(18, RoundingStrategy::MidpointNearestEven);
    }
    Ok(positions)
}

/// Emit the ladder as a table at info level
pub fn log_distribution(positions: &[Position]) {
    let total: Decimal = positions.iter().map(|p| p.usd_amount).sum();
    info!(
        "📊 Ladder distribution: {} positions, ${} total",
        positions.len(),
        total
    );
    for position in positions {
        info!(
            "   #{:<2} ticks [{:>8}, {:>8}] price {:.8} - {:.8}  ${:<14} {:>6.2}%",
            position.index,
            position.tick_lower,
            position.tick_upper,
            position.price_lower.to_f64().unwrap_or(f64::NAN),
            position.price_upper.to_f64().unwrap_or(f64::NAN),
            position.usd_amount,
            (position.weight_share * dec!(100)).to_f64().unwrap_or(0.0),
        );
    }
}
