//! V3 provider: NonfungiblePositionManager mints wrapped in `multicall`
//!
//! Each chunk of positions becomes one `multicall(bytes[])` to the position
//! manager; token ids come from the IncreaseLiquidity logs it emits.

use async_trait::async_trait;
use ethers::abi::Token;
use ethers::types::{Address, Bytes, TransactionReceipt, U256};
use ladder_amm::{total_amounts, LadderSpec, Position, TokenPair};
use ladder_config::V3Settings;
use rust_decimal::Decimal;
use std::ops::Range;
use tracing::{debug, info};

use super::{
    ensure_balances, ensure_erc20_allowance, min_with_slippage, parse_address, pool_addresses,
    preview_positions, validate_ticks, LadderContext, LiquidityProvider,
};
use crate::batch::{BatchPlan, LadderResult};
use crate::chain::abi::{parse_increase_liquidity, word_to_address, word_to_uint, words};
use crate::chain::multicall::Call;
use crate::chain::slot0::{PoolState, Slot0Layout};
use crate::chain::{deadline_after, encode_call, int_token, TransactionIntent, TxKind};
use crate::error::{LadderError, Result};
use crate::log_chain;

/// Position managers with a well-known factory, by deployment
pub const KNOWN_FACTORIES: &[(&str, &str)] = &[
    // Uniswap V3, BNB Chain
    (
        "0x7b8A01B39D58278b5DE7e48c8449c9f4F5170613",
        "0xdB1d10011AD0Ff90774D0C6Bb92e5C5c8b4461F7",
    ),
    // PancakeSwap V3, BNB Chain
    (
        "0x46A15B0b27311cedF172AB29E4f4766fbE7F4364",
        "0x0BFbCF9fa4f9C56B0F40a671Ad40E0805A091865",
    ),
    // Uniswap V3, Ethereum
    (
        "0xC36442b4a4522E871399CD717aBDD847Ab11FE88",
        "0x1F98431c8aD98523631AE4a59f267346ea31F984",
    ),
    // Uniswap V3, Base
    (
        "0x03a520b32C04BF3bEEf7BEb72E919cf822Ed34f1",
        "0x33128a8fC17869897dcE68Ed026d694621f6FDfD",
    ),
];

/// `positions(tokenId)` return: liquidity is the eighth word
const POSITION_WORDS: usize = 12;
const POSITION_LIQUIDITY_WORD: usize = 7;

pub fn factory_for(position_manager: Address) -> Option<Address> {
    KNOWN_FACTORIES.iter().find_map(|(pm, factory)| {
        let pm: Address = pm.parse().ok()?;
        (pm == position_manager).then(|| factory.parse().ok()).flatten()
    })
}

pub struct V3Provider {
    position_manager: Address,
    factory: Address,
    layout: Slot0Layout,
}

impl V3Provider {
    pub fn new(position_manager: Address, factory: Address, layout: Slot0Layout) -> Self {
        Self {
            position_manager,
            factory,
            layout,
        }
    }

    /// Resolve the factory from settings or the known deployments
    pub fn from_settings(settings: &V3Settings) -> Result<Self> {
        let position_manager = parse_address(&settings.position_manager, "position_manager")?;
        let factory = match &settings.factory {
            Some(factory) => parse_address(factory, "factory")?,
            None => factory_for(position_manager).ok_or_else(|| {
                LadderError::config(format!(
                    "no known factory for position manager {:?}; set protocol.factory",
                    position_manager
                ))
            })?,
        };
        Ok(Self::new(position_manager, factory, settings.flavor.into()))
    }

    pub fn position_manager(&self) -> Address {
        self.position_manager
    }

    /// Pool address from the factory; the zero address means no pool
    pub async fn pool_address(&self, ctx: &LadderContext, spec: &LadderSpec) -> Result<Address> {
        let (token0, token1) = pool_addresses(spec);
        let fee = spec.fee.pool_fee()?;
        let data = encode_call(
            "getPool(address,address,uint24)",
            &[
                Token::Address(token0),
                Token::Address(token1),
                Token::Uint(U256::from(fee)),
            ],
        );
        let raw = ctx.session.chain().call(self.factory, data).await?;
        let pool = words(&raw)
            .and_then(|w| w.first().and_then(word_to_address))
            .ok_or_else(|| LadderError::abi(format!("getPool returned {} bytes", raw.len())))?;
        if pool.is_zero() {
            return Err(LadderError::PoolNotFound {
                token0,
                token1,
                fee,
            });
        }
        debug!("Pool {:?} for fee {}", pool, fee);
        Ok(pool)
    }

    async fn read_slot0(&self, ctx: &LadderContext, pool: Address) -> Result<PoolState> {
        let raw = ctx
            .session
            .chain()
            .call(pool, self.layout.calldata(None)?)
            .await?;
        self.layout.decode(&raw)
    }

    fn mint_call(
        &self,
        position: &Position,
        pool_tokens: (Address, Address),
        fee: u32,
        recipient: Address,
        deadline: U256,
        slippage_percent: Decimal,
    ) -> Result<Bytes> {
        let amounts = position.amounts;
        let amount0_min = min_with_slippage(amounts.amount0, slippage_percent)?;
        let amount1_min = min_with_slippage(amounts.amount1, slippage_percent)?;
        Ok(encode_call(
            "mint((address,address,uint24,int24,int24,uint256,uint256,uint256,uint256,address,uint256))",
            &[Token::Tuple(vec![
                Token::Address(pool_tokens.0),
                Token::Address(pool_tokens.1),
                Token::Uint(U256::from(fee)),
                int_token(position.tick_lower),
                int_token(position.tick_upper),
                Token::Uint(U256::from(amounts.amount0)),
                Token::Uint(U256::from(amounts.amount1)),
                Token::Uint(amount0_min),
                Token::Uint(amount1_min),
                Token::Address(recipient),
                Token::Uint(deadline),
            ])],
        ))
    }

    /// Current liquidity of each position, read in one round trip
    async fn position_liquidity(&self, ctx: &LadderContext, token_ids: &[U256]) -> Result<Vec<u128>> {
        let calls: Vec<Call> = token_ids
            .iter()
            .map(|id| Call::new(self.position_manager, positions_call(*id)))
            .collect();
        let session = &ctx.session;
        let results = session
            .multicall()
            .aggregate(session.chain().as_ref(), &calls)
            .await?;
        token_ids
            .iter()
            .zip(results)
            .map(|(id, result)| {
                if !result.success {
                    return Err(LadderError::rpc(format!("positions({}) reverted", id)));
                }
                decode_position_liquidity(&result.data)
            })
            .collect()
    }
}

fn positions_call(token_id: U256) -> Bytes {
    encode_call("positions(uint256)", &[Token::Uint(token_id)])
}

fn decode_position_liquidity(data: &[u8]) -> Result<u128> {
    let words = words(data)
        .filter(|w| w.len() == POSITION_WORDS)
        .ok_or_else(|| {
            LadderError::shape_mismatch(
                "positions",
                format!("{} words", POSITION_WORDS),
                format!("{} bytes", data.len()),
            )
        })?;
    word_to_uint(&words[POSITION_LIQUIDITY_WORD], 128)
        .map(|v| v.as_u128())
        .ok_or_else(|| LadderError::shape_mismatch("positions", "uint128 liquidity", "wider value"))
}

/// Calls that empty and collect one position, optionally burning the NFT
pub fn close_calls(
    token_id: U256,
    liquidity: u128,
    recipient: Address,
    deadline: U256,
    burn: bool,
) -> Vec<Bytes> {
    let mut calls = Vec::with_capacity(3);
    if liquidity > 0 {
        calls.push(encode_call(
            "decreaseLiquidity((uint256,uint128,uint256,uint256,uint256))",
            &[Token::Tuple(vec![
                Token::Uint(token_id),
                Token::Uint(U256::from(liquidity)),
                Token::Uint(U256::zero()),
                Token::Uint(U256::zero()),
                Token::Uint(deadline),
            ])],
        ));
    }
    calls.push(encode_call(
        "collect((uint256,address,uint128,uint128))",
        &[Token::Tuple(vec![
            Token::Uint(token_id),
            Token::Address(recipient),
            Token::Uint(U256::from(u128::MAX)),
            Token::Uint(U256::from(u128::MAX)),
        ])],
    ));
    if burn {
        calls.push(encode_call("burn(uint256)", &[Token::Uint(token_id)]));
    }
    calls
}

pub fn multicall_call(calls: &[Bytes]) -> Bytes {
    encode_call(
        "multicall(bytes[])",
        &[Token::Array(
            calls.iter().map(|c| Token::Bytes(c.to_vec())).collect(),
        )],
    )
}

/// Mints, one per position, batched into position manager multicalls
struct MintPlan {
    position_manager: Address,
    labels: Vec<u32>,
    calls: Vec<Bytes>,
}

impl BatchPlan for MintPlan {
    fn len(&self) -> usize {
        self.calls.len()
    }

    fn label(&self, op: usize) -> u32 {
        self.labels[op]
    }

    fn build(&self, ops: Range<usize>) -> Result<TransactionIntent> {
        Ok(TransactionIntent::new(
            self.position_manager,
            multicall_call(&self.calls[ops]),
            TxKind::Multicall,
        ))
    }

    fn kinds(&self, ops: Range<usize>) -> Vec<TxKind> {
        vec![TxKind::Mint; ops.len()]
    }

    fn parse_receipt(&self, _ops: Range<usize>, receipt: &TransactionReceipt) -> Result<Vec<U256>> {
        let minted = parse_increase_liquidity(receipt, self.position_manager)?;
        Ok(minted.into_iter().map(|p| p.token_id).collect())
    }
}

/// Per-position decrease/collect/burn groups
struct ClosePlan {
    position_manager: Address,
    token_ids: Vec<U256>,
    calls: Vec<Vec<Bytes>>,
}

impl BatchPlan for ClosePlan {
    fn len(&self) -> usize {
        self.token_ids.len()
    }

    /// Position in the caller's token id list, counted from 1
    fn label(&self, op: usize) -> u32 {
        op as u32 + 1
    }

    fn build(&self, ops: Range<usize>) -> Result<TransactionIntent> {
        let calls: Vec<Bytes> = self.calls[ops].iter().flatten().cloned().collect();
        Ok(TransactionIntent::new(
            self.position_manager,
            multicall_call(&calls),
            TxKind::Multicall,
        ))
    }

    fn kinds(&self, ops: Range<usize>) -> Vec<TxKind> {
        vec![TxKind::ModifyLiquidity; ops.len()]
    }

    fn parse_receipt(&self, ops: Range<usize>, _receipt: &TransactionReceipt) -> Result<Vec<U256>> {
        Ok(self.token_ids[ops].to_vec())
    }
}

fn required_amounts(pair: &TokenPair, positions: &[Position]) -> [(Address, U256); 2] {
    let (token0, token1) = pair.pool_tokens();
    let totals = total_amounts(positions);
    [
        (Address::from(token0), U256::from(totals.amount0)),
        (Address::from(token1), U256::from(totals.amount1)),
    ]
}

#[async_trait]
impl LiquidityProvider for V3Provider {
    fn name(&self) -> &'static str {
        match self.layout {
            Slot0Layout::PancakeV3 => "pancakeswap-v3",
            _ => "uniswap-v3",
        }
    }

    async fn pool_state(&self, spec: &LadderSpec, ctx: &LadderContext) -> Result<PoolState> {
        let pool = self.pool_address(ctx, spec).await?;
        let state = self.read_slot0(ctx, pool).await?;
        if !state.is_initialized() {
            return Err(LadderError::PoolNotInitialized {
                pool: format!("{:?}", pool),
            });
        }
        Ok(state)
    }

    fn preview_ladder(&self, spec: &LadderSpec, pool: &PoolState) -> Result<Vec<Position>> {
        preview_positions(spec, pool)
    }

    async fn create_ladder(&self, spec: &LadderSpec, ctx: &LadderContext) -> Result<LadderResult> {
        ctx.ensure_active()?;
        let session = &ctx.session;
        let state = self.pool_state(spec, ctx).await?;
        log_chain!(
            "{} pool at tick {} (sqrtPriceX96 {})",
            self.name(),
            state.tick,
            state.sqrt_price_x96
        );

        let positions = self.preview_ladder(spec, &state)?;
        validate_ticks(&positions, spec.fee.tick_spacing()?)?;

        let required = required_amounts(&spec.pair, &positions);
        ensure_balances(session, &required).await?;
        for (token, amount) in required {
            ensure_erc20_allowance(ctx, token, self.position_manager, amount).await?;
        }
        ctx.ensure_active()?;

        let execution = session.execution();
        let deadline = deadline_after(execution.deadline_secs);
        let fee = spec.fee.pool_fee()?;
        let pool_tokens = pool_addresses(spec);
        let plan = MintPlan {
            position_manager: self.position_manager,
            labels: positions.iter().map(|p| p.index).collect(),
            calls: positions
                .iter()
                .map(|p| {
                    self.mint_call(
                        p,
                        pool_tokens,
                        fee,
                        session.sender(),
                        deadline,
                        execution.slippage_percent,
                    )
                })
                .collect::<Result<Vec<_>>>()?,
        };

        info!("🪜 Minting {} positions on {}", plan.len(), self.name());
        let batches = session
            .submitter()
            .submit(&plan, &ctx.cancel, ctx.progress.as_ref())
            .await;
        Ok(LadderResult::from_batches(positions, batches))
    }

    async fn close_positions(
        &self,
        token_ids: &[U256],
        ctx: &LadderContext,
    ) -> Result<LadderResult> {
        ctx.ensure_active()?;
        if token_ids.is_empty() {
            return Ok(LadderResult::default());
        }
        let session = &ctx.session;
        let liquidity = self.position_liquidity(ctx, token_ids).await?;
        let deadline = deadline_after(session.execution().deadline_secs);
        let burn = session.execution().burn_on_close;

        let plan = ClosePlan {
            position_manager: self.position_manager,
            token_ids: token_ids.to_vec(),
            calls: token_ids
                .iter()
                .zip(&liquidity)
                .map(|(id, l)| close_calls(*id, *l, session.sender(), deadline, burn))
                .collect(),
        };
        info!("🧹 Closing {} positions (burn: {})", plan.len(), burn);
        let batches = session
            .submitter()
            .submit(&plan, &ctx.cancel, ctx.progress.as_ref())
            .await;
        Ok(LadderResult::from_batches(Vec::new(), batches))
    }
}
