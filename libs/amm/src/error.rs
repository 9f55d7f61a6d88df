//! Error types for ladder math

use thiserror::Error;

/// Math precondition failures raised before any chain interaction happens
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AmmError {
    /// Caller supplied an unusable range, count or budget
    #[error("Invalid ladder spec: {reason}")]
    InvalidLadderSpec { reason: String },

    /// Price was zero, negative or produced a non-finite intermediate
    #[error("Invalid price {price} (context: {context})")]
    InvalidPrice { price: String, context: String },

    /// Fee tier has no standard spacing and no override was supplied
    #[error("Unsupported fee tier {fee}: no standard tick spacing and no custom spacing supplied")]
    UnsupportedFeeTier { fee: u32 },

    #[error("Invalid tick spacing {spacing}")]
    InvalidTickSpacing { spacing: i32 },

    #[error("Invalid tick range: lower {lower} must be below upper {upper}")]
    InvalidTickRange { lower: i32, upper: i32 },

    #[error("Invalid fee {value}: {reason}")]
    InvalidFee { value: String, reason: String },

    /// Budget share too small to buy a single unit of liquidity
    #[error("Position {index} with ${usd} rounds to zero liquidity")]
    ZeroLiquidity { index: u32, usd: String },

    #[error("Arithmetic overflow in {context}")]
    Overflow { context: String },
}

impl AmmError {
    pub fn invalid_spec(reason: impl Into<String>) -> Self {
        Self::InvalidLadderSpec {
            reason: reason.into(),
        }
    }

    pub fn invalid_price(price: impl ToString, context: impl Into<String>) -> Self {
        Self::InvalidPrice {
            price: price.to_string(),
            context: context.into(),
        }
    }

    pub fn overflow(context: impl Into<String>) -> Self {
        Self::Overflow {
            context: context.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AmmError>;
