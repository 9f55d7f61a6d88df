//! Fee tiers and tick spacing
//!
//! V3 pools take a fee from a fixed menu, each tier with its own tick spacing.
//! V4 pools take any fee expressed in hundredths of a bip together with an
//! explicit tick spacing.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::{AmmError, Result};

/// Standard V3 fee tiers (hundredths of a bip) and their tick spacing
pub const V3_FEE_TIERS: [(u32, i32); 5] = [(100, 1), (500, 10), (2500, 50), (3000, 60), (10000, 200)];

/// V4 fees are hundredths of a bip, 1_000_000 is 100%
pub const MAX_V4_FEE: u32 = 1_000_000;

/// Fee and spacing of the target pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeeSpec {
    /// V3 fee tier, with an optional spacing for tiers outside the standard menu
    Tier {
        fee: u32,
        custom_spacing: Option<i32>,
    },
    /// V4 fee as a percentage (0.3 for 0.3%) and the pool's tick spacing
    Percent { fee_percent: Decimal, tick_spacing: i32 },
}

impl FeeSpec {
    pub fn tier(fee: u32) -> Self {
        Self::Tier {
            fee,
            custom_spacing: None,
        }
    }

    pub fn tick_spacing(&self) -> Result<i32> {
        match *self {
            Self::Tier {
                fee,
                custom_spacing,
            } => tick_spacing_for_fee(fee, custom_spacing),
            Self::Percent { tick_spacing, .. } => {
                if tick_spacing <= 0 {
                    return Err(AmmError::InvalidTickSpacing {
                        spacing: tick_spacing,
                    });
                }
                Ok(tick_spacing)
            }
        }
    }

    /// Fee in the pool's native units
    pub fn pool_fee(&self) -> Result<u32> {
        match *self {
            Self::Tier { fee, .. } => Ok(fee),
            Self::Percent { fee_percent, .. } => fee_percent_to_v4(fee_percent),
        }
    }
}

/// Tick spacing for a V3 fee tier
///
/// Tiers outside the standard menu need `custom_spacing`; without it the call
/// fails with [`AmmError::UnsupportedFeeTier`].
pub fn tick_spacing_for_fee(fee: u32, custom_spacing: Option<i32>) -> Result<i32> {
    if let Some(&(_, spacing)) = V3_FEE_TIERS.iter().find(|(tier, _)| *tier == fee) {
        return Ok(spacing);
    }
    match custom_spacing {
        Some(spacing) if spacing > 0 => Ok(spacing),
        Some(spacing) => Err(AmmError::InvalidTickSpacing { spacing }),
        None => Err(AmmError::UnsupportedFeeTier { fee }),
    }
}

/// Spacing proportional to the fee, `max(1, round(fee / 10000 * 200))`
pub fn derived_tick_spacing(fee: u32) -> i32 {
    // fee * 200 / 10000 == fee / 50, rounded half up
    (((fee as u64) + 25) / 50).max(1) as i32
}

/// Percentage to V4 fee units, `round(percent * 10_000)`
pub fn fee_percent_to_v4(percent: Decimal) -> Result<u32> {
    validate_fee_percent(percent)?;
    (percent * dec!(10000))
        .round()
        .to_u32()
        .ok_or_else(|| AmmError::InvalidFee {
            value: percent.to_string(),
            reason: "does not fit fee units".to_string(),
        })
}

pub fn v4_fee_to_percent(fee: u32) -> Decimal {
    Decimal::from(fee) / dec!(10000)
}

pub fn validate_fee_percent(percent: Decimal) -> Result<()> {
    if percent < Decimal::ZERO || percent > dec!(100) {
        return Err(AmmError::InvalidFee {
            value: percent.to_string(),
            reason: "fee must be between 0% and 100%".to_string(),
        });
    }
    Ok(())
}

/// Suggested V4 spacing for a fee percentage, `max(1, round(percent * 200))`
pub fn suggest_tick_spacing(percent: Decimal) -> i32 {
    (percent * dec!(200))
        .round()
        .to_i32()
        .unwrap_or(1)
        .max(1)
}
