//! # Protocol Providers
//!
//! ## Purpose
//!
//! Turn a [`LadderSpec`] into on-chain liquidity for one protocol family. V3
//! mints through the NonfungiblePositionManager's `multicall`; V4 encodes an
//! action stream for `modifyLiquidities` and approves through Permit2.
//!
//! ## Architecture Role
//!
//! ```text
//! LadderSpec ──► preview_ladder (pure) ──► Position[]
//!                      │
//! create_ladder: pool checks → balances → approvals → BatchPlan → BatchSubmitter
//! close_positions: position reads → decrease/collect (V3) or DECREASE/TAKE_PAIR (V4)
//! ```
//!
//! The variant is picked once from configuration as [`Provider`].

pub mod v3;
pub mod v4;

use async_trait::async_trait;
use ethers::types::{Address, U256};
use ladder_amm::{
    align_tick_to_spacing, aligned_decimal_offset, build_ladder, price_to_tick, with_liquidity,
    LadderSpec, Position,
};
use ladder_config::{EngineConfig, ProtocolConfig};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::batch::{BatchProgress, LadderResult};
use crate::chain::abi::approve_call;
use crate::chain::slot0::PoolState;
use crate::chain::{TransactionIntent, TxKind};
use crate::error::{LadderError, Result};
use crate::session::Session;

pub use v3::V3Provider;
pub use v4::V4Provider;

/// Pool tick further than this from the tick of the user's price earns a warning
pub const TICK_DRIFT_WARNING: i32 = 1000;

/// Everything a state-changing operation needs
#[derive(Clone)]
pub struct LadderContext {
    pub session: Arc<Session>,
    pub cancel: CancellationToken,
    pub progress: Option<mpsc::UnboundedSender<BatchProgress>>,
}

impl LadderContext {
    pub fn new(session: Arc<Session>) -> Self {
        Self {
            session,
            cancel: CancellationToken::new(),
            progress: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: mpsc::UnboundedSender<BatchProgress>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Stop between steps once cancelled
    pub fn ensure_active(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(LadderError::Cancelled);
        }
        Ok(())
    }
}

#[async_trait]
pub trait LiquidityProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Read the target pool's price state
    async fn pool_state(&self, spec: &LadderSpec, ctx: &LadderContext) -> Result<PoolState>;

    /// Positions with liquidity and amounts at the given pool state; no I/O
    fn preview_ladder(&self, spec: &LadderSpec, pool: &PoolState) -> Result<Vec<Position>>;

    async fn create_ladder(&self, spec: &LadderSpec, ctx: &LadderContext) -> Result<LadderResult>;

    async fn close_positions(&self, token_ids: &[U256], ctx: &LadderContext)
        -> Result<LadderResult>;
}

/// Protocol family chosen from configuration
pub enum Provider {
    V3(V3Provider),
    V4(V4Provider),
}

impl Provider {
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        match &config.protocol {
            ProtocolConfig::V3(settings) => Ok(Self::V3(V3Provider::from_settings(settings)?)),
            ProtocolConfig::V4(settings) => Ok(Self::V4(V4Provider::from_settings(
                settings,
                config.chain.chain_id,
            )?)),
        }
    }

    fn inner(&self) -> &dyn LiquidityProvider {
        match self {
            Self::V3(provider) => provider,
            Self::V4(provider) => provider,
        }
    }
}

#[async_trait]
impl LiquidityProvider for Provider {
    fn name(&self) -> &'static str {
        self.inner().name()
    }

    async fn pool_state(&self, spec: &LadderSpec, ctx: &LadderContext) -> Result<PoolState> {
        self.inner().pool_state(spec, ctx).await
    }

    fn preview_ladder(&self, spec: &LadderSpec, pool: &PoolState) -> Result<Vec<Position>> {
        self.inner().preview_ladder(spec, pool)
    }

    async fn create_ladder(&self, spec: &LadderSpec, ctx: &LadderContext) -> Result<LadderResult> {
        self.inner().create_ladder(spec, ctx).await
    }

    async fn close_positions(
        &self,
        token_ids: &[U256],
        ctx: &LadderContext,
    ) -> Result<LadderResult> {
        self.inner().close_positions(token_ids, ctx).await
    }
}

/// Ladder layout plus liquidity at the pool's current price
pub fn preview_positions(spec: &LadderSpec, pool: &PoolState) -> Result<Vec<Position>> {
    let positions = build_ladder(spec)?;
    let positions = with_liquidity(positions, &pool.pool_price(), &spec.pair)?;
    ladder_amm::log_distribution(&positions);
    Ok(positions)
}

/// Pool-native tick of the ladder's reference price
pub fn expected_pool_tick(spec: &LadderSpec, spacing: i32) -> Result<i32> {
    let human = price_to_tick(&spec.range.upper, spec.pair.invert_price())?;
    let offset = aligned_decimal_offset(spec.pair.decimal_tick_offset()?, spacing)?;
    Ok(human + offset)
}

/// Warn when the pool sits far from where the user thinks the price is
pub fn check_tick_drift(spec: &LadderSpec, spacing: i32, pool_tick: i32) -> Result<i32> {
    let expected = expected_pool_tick(spec, spacing)?;
    let drift = (expected - pool_tick).abs();
    if drift > TICK_DRIFT_WARNING {
        warn!(
            "⚠️ Pool tick {} is {} ticks from the reference price tick {}; check the price and pair order",
            pool_tick, drift, expected
        );
    } else {
        debug!("Pool tick {} within {} of expected {}", pool_tick, drift, expected);
    }
    Ok(drift)
}

/// Snap position bounds outward onto the spacing grid
///
/// Bounds already on the grid are untouched, so a ladder built for `spacing`
/// comes back unchanged.
pub fn realign_ticks(positions: &mut [Position], spacing: i32) -> Result<()> {
    for position in positions.iter_mut() {
        let lower = align_tick_to_spacing(position.tick_lower, spacing, true)?;
        let mut upper = align_tick_to_spacing(position.tick_upper, spacing, false)?;
        if upper <= lower {
            upper = lower + spacing;
        }
        if (lower, upper) != (position.tick_lower, position.tick_upper) {
            debug!(
                "Position {} realigned [{}, {}] -> [{}, {}]",
                position.index, position.tick_lower, position.tick_upper, lower, upper
            );
            position.tick_lower = lower;
            position.tick_upper = upper;
        }
    }
    Ok(())
}

/// Every position ordered, non-empty and aligned to `spacing`
pub fn validate_ticks(positions: &[Position], spacing: i32) -> Result<()> {
    for position in positions {
        if position.tick_lower >= position.tick_upper {
            return Err(ladder_amm::AmmError::InvalidTickRange {
                lower: position.tick_lower,
                upper: position.tick_upper,
            }
            .into());
        }
        if position.tick_lower % spacing != 0 || position.tick_upper % spacing != 0 {
            return Err(ladder_amm::AmmError::invalid_spec(format!(
                "position {} ticks [{}, {}] not aligned to spacing {}",
                position.index, position.tick_lower, position.tick_upper, spacing
            ))
            .into());
        }
    }
    Ok(())
}

pub(crate) fn parse_address(value: &str, field: &str) -> Result<Address> {
    value
        .parse()
        .map_err(|e| LadderError::config(format!("{} '{}': {}", field, value, e)))
}

/// Pool-ordered addresses of the ladder's pair
pub(crate) fn pool_addresses(spec: &LadderSpec) -> (Address, Address) {
    let (token0, token1) = spec.pair.pool_tokens();
    (Address::from(token0), Address::from(token1))
}

const SLIPPAGE_SCALE: u64 = 1_000_000;

fn slippage_factor(multiplier: Decimal, slippage_percent: Decimal) -> Result<U256> {
    let scaled = multiplier
        .checked_mul(Decimal::from(SLIPPAGE_SCALE))
        .map(|v| v.round())
        .and_then(|v| v.to_u64())
        .ok_or_else(|| {
            LadderError::config(format!(
                "slippage {}% gives no usable amount bound",
                slippage_percent
            ))
        })?;
    Ok(U256::from(scaled))
}

/// `amount × (1 - slippage%)`, floored
pub fn min_with_slippage(amount: u128, slippage_percent: Decimal) -> Result<U256> {
    let factor = slippage_factor(
        Decimal::ONE - slippage_percent / Decimal::from(100),
        slippage_percent,
    )?;
    Ok(U256::from(amount) * factor / U256::from(SLIPPAGE_SCALE))
}

/// `amount × (1 + slippage%) × 2`, the ceiling passed with V4 mints
pub fn max_with_slippage(amount: u128, slippage_percent: Decimal) -> Result<U256> {
    let factor = slippage_factor(
        Decimal::ONE + slippage_percent / Decimal::from(100),
        slippage_percent,
    )?;
    Ok(U256::from(amount) * factor * U256::from(2) / U256::from(SLIPPAGE_SCALE))
}

/// Fail before any transaction when the wallet cannot fund the ladder
pub async fn ensure_balances(session: &Session, required: &[(Address, U256)]) -> Result<()> {
    let tokens: Vec<Address> = required
        .iter()
        .filter(|(token, amount)| !token.is_zero() && !amount.is_zero())
        .map(|(token, _)| *token)
        .collect();
    if tokens.is_empty() {
        return Ok(());
    }
    let balances = session
        .multicall()
        .balances(session.chain().as_ref(), &tokens, session.sender())
        .await?;
    for (token, balance) in tokens.iter().zip(balances) {
        let needed = required
            .iter()
            .filter(|(t, _)| t == token)
            .fold(U256::zero(), |acc, (_, amount)| acc.saturating_add(*amount));
        let available =
            balance.ok_or_else(|| LadderError::rpc(format!("balanceOf failed for {:?}", token)))?;
        if available < needed {
            return Err(LadderError::InsufficientBalance {
                token: *token,
                required: needed,
                available,
            });
        }
    }
    Ok(())
}

/// Approve `spender` for the maximum amount when the current allowance is short
///
/// Returns whether an approval was sent.
pub async fn ensure_erc20_allowance(
    ctx: &LadderContext,
    token: Address,
    spender: Address,
    required: U256,
) -> Result<bool> {
    if token.is_zero() || required.is_zero() {
        return Ok(false);
    }
    let session = &ctx.session;
    let allowance = session
        .multicall()
        .allowances(session.chain().as_ref(), &[token], session.sender(), spender)
        .await?
        .into_iter()
        .next()
        .flatten()
        .ok_or_else(|| LadderError::rpc(format!("allowance read failed for {:?}", token)))?;
    if allowance >= required {
        debug!("Allowance of {:?} for {:?} sufficient", token, spender);
        return Ok(false);
    }

    ctx.ensure_active()?;
    info!("🔓 Approving {:?} for {:?}", token, spender);
    let intent = TransactionIntent::new(token, approve_call(spender, U256::MAX), TxKind::Approve);
    session.submitter().send_single(intent, &ctx.cancel).await?;
    Ok(true)
}
