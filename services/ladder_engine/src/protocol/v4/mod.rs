//! # V4 Provider
//!
//! ## Purpose
//!
//! Ladders on Uniswap V4 and PancakeSwap Infinity CL pools. Pools live inside a
//! singleton pool manager and are addressed by id, so every operation starts from
//! a [`PoolKey`]. Mints and closes are action streams sent through the position
//! manager's `modifyLiquidities`.
//!
//! ## Deployment differences
//!
//! | | Uniswap V4 | PancakeSwap Infinity |
//! |---|---|---|
//! | pool key | 5 fields | 6 fields, spacing in `parameters` |
//! | slot0 read | `StateView.getSlot0` | `CLPoolManager.getSlot0` |
//! | position read | `getPoolAndPositionInfo` + `getPositionLiquidity` | `positions` |

pub mod actions;
pub mod permit2;
pub mod pool_key;

use async_trait::async_trait;
use ethers::abi::Token;
use ethers::types::{Address, TransactionReceipt, H256, U256};
use ladder_amm::{tick_to_sqrt_price_x96, total_amounts, LadderSpec, Position};
use ladder_config::{V4Flavor, V4Settings};
use num_bigint::BigInt;
use std::collections::BTreeSet;
use std::ops::Range;
use tracing::{debug, info};

use super::{
    check_tick_drift, ensure_balances, expected_pool_tick, max_with_slippage, parse_address,
    pool_addresses, preview_positions, realign_ticks, validate_ticks, LadderContext,
    LiquidityProvider,
};
use crate::batch::{BatchPlan, LadderResult};
use crate::chain::abi::{parse_minted_token_ids, word_to_address, word_to_uint, words};
use crate::chain::multicall::Call;
use crate::chain::slot0::{PoolState, Slot0Layout};
use crate::chain::{deadline_after, encode_call, TransactionIntent, TxKind};
use crate::error::{LadderError, Result};
use crate::log_chain;

pub use actions::{Action, ActionPlan};
pub use permit2::Permit2;
pub use pool_key::PoolKey;

/// Contract addresses of one V4 deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct V4Addresses {
    pub pool_manager: Address,
    pub position_manager: Address,
    pub state_view: Option<Address>,
    pub permit2: Address,
}

struct KnownDeployment {
    deployment: V4Flavor,
    chain_id: u64,
    pool_manager: &'static str,
    position_manager: &'static str,
    state_view: Option<&'static str>,
}

const KNOWN_DEPLOYMENTS: &[KnownDeployment] = &[
    KnownDeployment {
        deployment: V4Flavor::Uniswap,
        chain_id: 56,
        pool_manager: "0x28e2ea090877bf75740558f6bfb36a5ffee9e9df",
        position_manager: "0x7a4a5c919ae2541aed11041a1aeee68f1287f95b",
        state_view: Some("0xd13dd3d6e93f276fafc9db9e6bb47c1180aee0c4"),
    },
    KnownDeployment {
        deployment: V4Flavor::Uniswap,
        chain_id: 1,
        pool_manager: "0x000000000004444c5dc75cb358380d2e3de08a90",
        position_manager: "0xbd216513d74c8cf14cf4747e6aaa6420ff64ee9e",
        state_view: None,
    },
    KnownDeployment {
        deployment: V4Flavor::Uniswap,
        chain_id: 8453,
        pool_manager: "0x498581ff718922c3f8e6a244956af099b2652b2b",
        position_manager: "0x7c5f5a4bbd8fd63184577525326123b519429bdc",
        state_view: Some("0xa3c0c9b65bad0b08107aa264b0f3db444b867a71"),
    },
    KnownDeployment {
        deployment: V4Flavor::Pancakeswap,
        chain_id: 56,
        pool_manager: "0xa0FfB9c1CE1Fe56963B0321B32E7A0302114058b",
        position_manager: "0x55f4c8abA71A1e923edC303eb4fEfF14608cC226",
        state_view: None,
    },
];

fn known_deployment(deployment: V4Flavor, chain_id: u64) -> Option<&'static KnownDeployment> {
    KNOWN_DEPLOYMENTS
        .iter()
        .find(|d| d.deployment == deployment && d.chain_id == chain_id)
}

/// Pancake `positions(tokenId)`: key (6), ticks (2), liquidity, then fee growth
const PANCAKE_LIQUIDITY_WORD: usize = 8;
/// Uniswap `getPoolAndPositionInfo`: key (5) plus packed info
const UNISWAP_POSITION_INFO_WORDS: usize = 6;

/// Currencies and liquidity of an existing position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct V4Position {
    pub token_id: U256,
    pub currency0: Address,
    pub currency1: Address,
    pub liquidity: u128,
}

pub struct V4Provider {
    deployment: V4Flavor,
    addresses: V4Addresses,
    hooks: Address,
    expected_pool_id: Option<H256>,
    create_pool_if_missing: bool,
}

impl V4Provider {
    pub fn new(deployment: V4Flavor, addresses: V4Addresses) -> Self {
        Self {
            deployment,
            addresses,
            hooks: Address::zero(),
            expected_pool_id: None,
            create_pool_if_missing: false,
        }
    }

    pub fn with_hooks(mut self, hooks: Address) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_expected_pool_id(mut self, pool_id: H256) -> Self {
        self.expected_pool_id = Some(pool_id);
        self
    }

    pub fn create_pool_if_missing(mut self, create: bool) -> Self {
        self.create_pool_if_missing = create;
        self
    }

    /// Known deployment for the chain, with per-address overrides from settings
    pub fn from_settings(settings: &V4Settings, chain_id: u64) -> Result<Self> {
        let known = known_deployment(settings.deployment, chain_id);
        let resolve = |value: &Option<String>,
                       default: Option<&str>,
                       field: &str|
         -> Result<Option<Address>> {
            match value.as_deref().or(default) {
                Some(address) => parse_address(address, field).map(Some),
                None => Ok(None),
            }
        };
        let missing = |field: &str| {
            LadderError::config(format!(
                "no {:?} V4 {} known for chain {}; set protocol.{}",
                settings.deployment, field, chain_id, field
            ))
        };

        let pool_manager = resolve(
            &settings.pool_manager,
            known.map(|k| k.pool_manager),
            "pool_manager",
        )?
        .ok_or_else(|| missing("pool_manager"))?;
        let position_manager = resolve(
            &settings.position_manager,
            known.map(|k| k.position_manager),
            "position_manager",
        )?
        .ok_or_else(|| missing("position_manager"))?;
        let state_view = resolve(
            &settings.state_view,
            known.and_then(|k| k.state_view),
            "state_view",
        )?;
        let permit2 = resolve(
            &settings.permit2,
            Some(permit2::default_permit2(settings.deployment)),
            "permit2",
        )?
        .ok_or_else(|| missing("permit2"))?;

        let mut provider = Self::new(
            settings.deployment,
            V4Addresses {
                pool_manager,
                position_manager,
                state_view,
                permit2,
            },
        )
        .create_pool_if_missing(settings.create_pool_if_missing);
        if let Some(hooks) = &settings.hooks {
            provider = provider.with_hooks(parse_address(hooks, "hooks")?);
        }
        if let Some(pool_id) = &settings.pool_id {
            let id: H256 = pool_id
                .parse()
                .map_err(|e| LadderError::config(format!("pool_id '{}': {}", pool_id, e)))?;
            provider = provider.with_expected_pool_id(id);
        }
        Ok(provider)
    }

    pub fn addresses(&self) -> &V4Addresses {
        &self.addresses
    }

    pub fn pool_key(&self, spec: &LadderSpec) -> Result<PoolKey> {
        let (token0, token1) = pool_addresses(spec);
        Ok(PoolKey::new(
            self.deployment,
            token0,
            token1,
            spec.fee.pool_fee()?,
            spec.fee.tick_spacing()?,
            self.hooks,
            self.addresses.pool_manager,
        ))
    }

    /// Derived pool id, checked against the configured one
    pub fn verified_pool_id(&self, key: &PoolKey) -> Result<H256> {
        let derived = key.pool_id();
        match self.expected_pool_id {
            Some(expected) if expected != derived => {
                Err(LadderError::PoolIdMismatch { expected, derived })
            }
            _ => Ok(derived),
        }
    }

    fn state_reader(&self) -> Result<Address> {
        match self.deployment {
            V4Flavor::Uniswap => self.addresses.state_view.ok_or_else(|| {
                LadderError::config("Uniswap V4 state reads need protocol.state_view")
            }),
            V4Flavor::Pancakeswap => Ok(self.addresses.pool_manager),
        }
    }

    async fn read_slot0(&self, ctx: &LadderContext, pool_id: H256) -> Result<PoolState> {
        let layout = Slot0Layout::V4;
        let raw = ctx
            .session
            .chain()
            .call(self.state_reader()?, layout.calldata(Some(pool_id))?)
            .await?;
        layout.decode(&raw)
    }

    /// Initialize the pool at the ladder's reference price
    async fn initialize_pool(&self, ctx: &LadderContext, spec: &LadderSpec, key: &PoolKey) -> Result<()> {
        let tick = expected_pool_tick(spec, key.tick_spacing)?;
        let sqrt_price_x96 = bigint_to_u256(&tick_to_sqrt_price_x96(tick)?)?;
        info!("🆕 Initializing pool {:?} at tick {}", key.pool_id(), tick);
        let calldata = encode_call(
            &format!("initializePool({},uint160)", key.abi_type()),
            &[key.to_token(), Token::Uint(sqrt_price_x96)],
        );
        let intent = TransactionIntent::new(
            self.addresses.position_manager,
            calldata,
            TxKind::Initialize,
        );
        ctx.session
            .submitter()
            .send_single(intent, &ctx.cancel)
            .await?;
        Ok(())
    }

    /// Currencies and liquidity of existing positions
    pub async fn read_positions(&self, ctx: &LadderContext, token_ids: &[U256]) -> Result<Vec<V4Position>> {
        let pm = self.addresses.position_manager;
        let calls: Vec<Call> = match self.deployment {
            V4Flavor::Uniswap => token_ids
                .iter()
                .flat_map(|id| {
                    [
                        Call::new(pm, encode_call("getPoolAndPositionInfo(uint256)", &[Token::Uint(*id)])),
                        Call::new(pm, encode_call("getPositionLiquidity(uint256)", &[Token::Uint(*id)])),
                    ]
                })
                .collect(),
            V4Flavor::Pancakeswap => token_ids
                .iter()
                .map(|id| Call::new(pm, encode_call("positions(uint256)", &[Token::Uint(*id)])))
                .collect(),
        };
        let session = &ctx.session;
        let results = session
            .multicall()
            .aggregate(session.chain().as_ref(), &calls)
            .await?;
        let per_position = calls.len() / token_ids.len().max(1);

        token_ids
            .iter()
            .zip(results.chunks(per_position.max(1)))
            .map(|(id, chunk)| {
                if chunk.iter().any(|r| !r.success) {
                    return Err(LadderError::rpc(format!("position {} read reverted", id)));
                }
                match self.deployment {
                    V4Flavor::Uniswap => decode_uniswap_position(*id, &chunk[0].data, &chunk[1].data),
                    V4Flavor::Pancakeswap => decode_pancake_position(*id, &chunk[0].data),
                }
            })
            .collect()
    }
}

fn bigint_to_u256(value: &BigInt) -> Result<U256> {
    let (sign, bytes) = value.to_bytes_be();
    if sign == num_bigint::Sign::Minus || bytes.len() > 32 {
        return Err(LadderError::abi(format!("{} does not fit uint256", value)));
    }
    Ok(U256::from_big_endian(&bytes))
}

fn position_shape(name: &str, expected: &str, data: &[u8]) -> LadderError {
    LadderError::shape_mismatch(name, expected, format!("{} bytes", data.len()))
}

fn currencies(words: &[[u8; 32]], name: &str) -> Result<(Address, Address)> {
    let currency0 = word_to_address(&words[0]);
    let currency1 = word_to_address(&words[1]);
    currency0
        .zip(currency1)
        .ok_or_else(|| LadderError::shape_mismatch(name, "address currencies", "non-address word"))
}

fn decode_uniswap_position(token_id: U256, info: &[u8], liquidity: &[u8]) -> Result<V4Position> {
    let info_words = words(info)
        .filter(|w| w.len() == UNISWAP_POSITION_INFO_WORDS)
        .ok_or_else(|| position_shape("getPoolAndPositionInfo", "6 words", info))?;
    let (currency0, currency1) = currencies(&info_words, "getPoolAndPositionInfo")?;
    let liquidity_words = words(liquidity)
        .filter(|w| w.len() == 1)
        .ok_or_else(|| position_shape("getPositionLiquidity", "1 word", liquidity))?;
    let liquidity = word_to_uint(&liquidity_words[0], 128)
        .ok_or_else(|| LadderError::shape_mismatch("getPositionLiquidity", "uint128", "wider value"))?
        .as_u128();
    Ok(V4Position {
        token_id,
        currency0,
        currency1,
        liquidity,
    })
}

fn decode_pancake_position(token_id: U256, data: &[u8]) -> Result<V4Position> {
    let words = words(data)
        .filter(|w| w.len() > PANCAKE_LIQUIDITY_WORD)
        .ok_or_else(|| position_shape("positions", "at least 9 words", data))?;
    let (currency0, currency1) = currencies(&words, "positions")?;
    let liquidity = word_to_uint(&words[PANCAKE_LIQUIDITY_WORD], 128)
        .ok_or_else(|| LadderError::shape_mismatch("positions", "uint128 liquidity", "wider value"))?
        .as_u128();
    Ok(V4Position {
        token_id,
        currency0,
        currency1,
        liquidity,
    })
}

/// One MINT_POSITION per position, settled once per transaction
struct MintPlan {
    position_manager: Address,
    key: PoolKey,
    owner: Address,
    deadline: U256,
    positions: Vec<MintParams>,
}

struct MintParams {
    index: u32,
    tick_lower: i32,
    tick_upper: i32,
    liquidity: u128,
    amount0_max: U256,
    amount1_max: U256,
}

impl MintPlan {
    fn actions(&self, ops: Range<usize>) -> ActionPlan {
        let mut plan = ActionPlan::new();
        for p in &self.positions[ops] {
            plan.mint(
                &self.key,
                p.tick_lower,
                p.tick_upper,
                p.liquidity,
                p.amount0_max,
                p.amount1_max,
                self.owner,
            );
        }
        let (currency0, currency1) = self.key.currencies();
        plan.settle_pair(currency0, currency1);
        if self.key.has_native() {
            plan.sweep(currency0, self.owner);
        }
        plan
    }

    /// Native value attached to a batch: the sum of its currency0 ceilings
    fn value(&self, ops: Range<usize>) -> U256 {
        if !self.key.has_native() {
            return U256::zero();
        }
        self.positions[ops]
            .iter()
            .fold(U256::zero(), |acc, p| acc.saturating_add(p.amount0_max))
    }
}

impl BatchPlan for MintPlan {
    fn len(&self) -> usize {
        self.positions.len()
    }

    fn label(&self, op: usize) -> u32 {
        self.positions[op].index
    }

    fn build(&self, ops: Range<usize>) -> Result<TransactionIntent> {
        let calldata = self.actions(ops.clone()).modify_liquidities_call(self.deadline);
        Ok(
            TransactionIntent::new(self.position_manager, calldata, TxKind::ModifyLiquidity)
                .with_value(self.value(ops)),
        )
    }

    fn kinds(&self, ops: Range<usize>) -> Vec<TxKind> {
        vec![TxKind::Mint; ops.len()]
    }

    fn parse_receipt(&self, _ops: Range<usize>, receipt: &TransactionReceipt) -> Result<Vec<U256>> {
        parse_minted_token_ids(receipt, self.position_manager)
    }
}

/// DECREASE (and BURN) per position, then one TAKE_PAIR per currency pair
struct ClosePlan {
    position_manager: Address,
    recipient: Address,
    burn: bool,
    deadline: U256,
    positions: Vec<V4Position>,
}

impl ClosePlan {
    fn actions(&self, ops: Range<usize>) -> ActionPlan {
        let mut plan = ActionPlan::new();
        let mut pairs = BTreeSet::new();
        for position in &self.positions[ops] {
            plan.decrease(position.token_id, position.liquidity);
            if self.burn {
                plan.burn(position.token_id);
            }
            let pair = if position.currency0 <= position.currency1 {
                (position.currency0, position.currency1)
            } else {
                (position.currency1, position.currency0)
            };
            pairs.insert(pair);
        }
        for (currency0, currency1) in pairs {
            plan.take_pair(currency0, currency1, self.recipient);
        }
        plan
    }
}

impl BatchPlan for ClosePlan {
    fn len(&self) -> usize {
        self.positions.len()
    }

    /// Position in the caller's token id list, counted from 1
    fn label(&self, op: usize) -> u32 {
        op as u32 + 1
    }

    fn build(&self, ops: Range<usize>) -> Result<TransactionIntent> {
        Ok(TransactionIntent::new(
            self.position_manager,
            self.actions(ops).modify_liquidities_call(self.deadline),
            TxKind::ModifyLiquidity,
        ))
    }

    fn kinds(&self, ops: Range<usize>) -> Vec<TxKind> {
        vec![TxKind::ModifyLiquidity; ops.len()]
    }

    fn parse_receipt(&self, ops: Range<usize>, _receipt: &TransactionReceipt) -> Result<Vec<U256>> {
        Ok(self.positions[ops].iter().map(|p| p.token_id).collect())
    }
}

#[async_trait]
impl LiquidityProvider for V4Provider {
    fn name(&self) -> &'static str {
        match self.deployment {
            V4Flavor::Uniswap => "uniswap-v4",
            V4Flavor::Pancakeswap => "pancakeswap-infinity",
        }
    }

    async fn pool_state(&self, spec: &LadderSpec, ctx: &LadderContext) -> Result<PoolState> {
        let key = self.pool_key(spec)?;
        let pool_id = self.verified_pool_id(&key)?;
        let state = self.read_slot0(ctx, pool_id).await?;
        if !state.is_initialized() {
            return Err(LadderError::PoolNotInitialized {
                pool: format!("{:?}", pool_id),
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
        let key = self.pool_key(spec)?;
        let pool_id = self.verified_pool_id(&key)?;

        let mut state = self.read_slot0(ctx, pool_id).await?;
        if !state.is_initialized() {
            if !self.create_pool_if_missing {
                return Err(LadderError::PoolNotInitialized {
                    pool: format!("{:?}", pool_id),
                });
            }
            self.initialize_pool(ctx, spec, &key).await?;
            state = self.read_slot0(ctx, pool_id).await?;
            if !state.is_initialized() {
                return Err(LadderError::PoolNotInitialized {
                    pool: format!("{:?}", pool_id),
                });
            }
        }
        log_chain!(
            "{} pool {:?} at tick {} (lp fee {:?})",
            self.name(),
            pool_id,
            state.tick,
            state.lp_fee
        );
        check_tick_drift(spec, key.tick_spacing, state.tick)?;

        let mut positions = self.preview_ladder(spec, &state)?;
        realign_ticks(&mut positions, key.tick_spacing)?;
        validate_ticks(&positions, key.tick_spacing)?;

        let totals = total_amounts(&positions);
        let required = [
            (key.currency0, U256::from(totals.amount0)),
            (key.currency1, U256::from(totals.amount1)),
        ];
        ensure_balances(session, &required).await?;
        let permit2 = Permit2::new(self.addresses.permit2);
        for (token, amount) in required {
            permit2
                .ensure_approval(ctx, token, self.addresses.position_manager, amount)
                .await?;
        }
        ctx.ensure_active()?;

        let execution = session.execution();
        let slippage = execution.slippage_percent;
        let plan = MintPlan {
            position_manager: self.addresses.position_manager,
            key,
            owner: session.sender(),
            deadline: deadline_after(execution.deadline_secs),
            positions: positions
                .iter()
                .map(|p| {
                    Ok(MintParams {
                        index: p.index,
                        tick_lower: p.tick_lower,
                        tick_upper: p.tick_upper,
                        liquidity: p.liquidity,
                        amount0_max: max_with_slippage(p.amounts.amount0, slippage)?,
                        amount1_max: max_with_slippage(p.amounts.amount1, slippage)?,
                    })
                })
                .collect::<Result<Vec<_>>>()?,
        };
        debug!("Mint plan for pool {:?}: {} positions", pool_id, plan.len());

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
        let positions = self.read_positions(ctx, token_ids).await?;
        let plan = ClosePlan {
            position_manager: self.addresses.position_manager,
            recipient: session.sender(),
            burn: session.execution().burn_on_close,
            deadline: deadline_after(session.execution().deadline_secs),
            positions,
        };
        info!("🧹 Closing {} positions (burn: {})", plan.len(), plan.burn);
        let batches = session
            .submitter()
            .submit(&plan, &ctx.cancel, ctx.progress.as_ref())
            .await;
        Ok(LadderResult::from_batches(Vec::new(), batches))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word_address(address: Address) -> Vec<u8> {
        let mut word = vec![0u8; 12];
        word.extend_from_slice(address.as_bytes());
        word
    }

    fn word_u128(value: u128) -> Vec<u8> {
        let mut word = [0u8; 32];
        U256::from(value).to_big_endian(&mut word);
        word.to_vec()
    }

    #[test]
    fn test_known_deployment_resolution() {
        let settings = V4Settings {
            deployment: V4Flavor::Pancakeswap,
            ..Default::default()
        };
        let provider = V4Provider::from_settings(&settings, 56).unwrap();
        let expected: Address = "0x55f4c8abA71A1e923edC303eb4fEfF14608cC226".parse().unwrap();
        assert_eq!(provider.addresses().position_manager, expected);
        assert_eq!(provider.state_reader().unwrap(), provider.addresses().pool_manager);

        assert!(matches!(
            V4Provider::from_settings(&settings, 8453),
            Err(LadderError::Config(_))
        ));
    }

    #[test]
    fn test_mainnet_uniswap_needs_state_view_for_reads() {
        let settings = V4Settings::default();
        let provider = V4Provider::from_settings(&settings, 1).unwrap();
        assert!(provider.state_reader().is_err());
    }

    #[test]
    fn test_pool_id_mismatch() {
        let key = PoolKey::new(
            V4Flavor::Uniswap,
            Address::repeat_byte(1),
            Address::repeat_byte(2),
            3000,
            60,
            Address::zero(),
            Address::zero(),
        );
        let addresses = V4Addresses {
            pool_manager: Address::repeat_byte(7),
            position_manager: Address::repeat_byte(8),
            state_view: None,
            permit2: Address::repeat_byte(9),
        };
        let provider = V4Provider::new(V4Flavor::Uniswap, addresses);
        assert_eq!(provider.verified_pool_id(&key).unwrap(), key.pool_id());

        let provider = provider.with_expected_pool_id(H256::repeat_byte(1));
        assert!(matches!(
            provider.verified_pool_id(&key),
            Err(LadderError::PoolIdMismatch { .. })
        ));
    }

    #[test]
    fn test_close_plan_dedupes_pairs() {
        let a = Address::repeat_byte(1);
        let b = Address::repeat_byte(2);
        let plan = ClosePlan {
            position_manager: Address::repeat_byte(8),
            recipient: Address::repeat_byte(9),
            burn: true,
            deadline: U256::from(1),
            positions: vec![
                V4Position { token_id: U256::from(1), currency0: a, currency1: b, liquidity: 10 },
                V4Position { token_id: U256::from(2), currency0: b, currency1: a, liquidity: 20 },
            ],
        };
        assert_eq!(plan.actions(0..2).actions(), &[0x01, 0x03, 0x01, 0x03, 0x11]);
    }

    #[test]
    fn test_native_mint_carries_value_and_sweep() {
        let key = PoolKey::new(
            V4Flavor::Uniswap,
            Address::zero(),
            Address::repeat_byte(2),
            500,
            10,
            Address::zero(),
            Address::zero(),
        );
        let params = |index| MintParams {
            index,
            tick_lower: -20,
            tick_upper: 0,
            liquidity: 1,
            amount0_max: U256::from(100),
            amount1_max: U256::zero(),
        };
        let plan = MintPlan {
            position_manager: Address::repeat_byte(8),
            key,
            owner: Address::repeat_byte(9),
            deadline: U256::from(1),
            positions: vec![params(1), params(2), params(3)],
        };
        assert_eq!(plan.actions(0..2).actions(), &[0x02, 0x02, 0x0d, 0x14]);
        assert_eq!(plan.build(1..3).unwrap().value, U256::from(200));
    }

    #[test]
    fn test_decode_positions() {
        let a = Address::repeat_byte(1);
        let b = Address::repeat_byte(2);
        let mut info = word_address(a);
        info.extend(word_address(b));
        info.extend(vec![0u8; 32 * 4]);
        let position = decode_uniswap_position(U256::from(5), &info, &word_u128(77)).unwrap();
        assert_eq!((position.currency0, position.currency1, position.liquidity), (a, b, 77));

        let mut pancake = word_address(a);
        pancake.extend(word_address(b));
        pancake.extend(vec![0u8; 32 * 6]);
        pancake.extend(word_u128(99));
        pancake.extend(vec![0u8; 32 * 3]);
        assert_eq!(decode_pancake_position(U256::from(5), &pancake).unwrap().liquidity, 99);
        assert!(decode_pancake_position(U256::from(5), &pancake[..64]).is_err());
    }
}
