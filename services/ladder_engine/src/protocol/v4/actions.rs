//! Action streams for `modifyLiquidities`
//!
//! A V4 position manager call carries `abi.encode(bytes actions, bytes[] params)`:
//! one opcode byte per action and one ABI-encoded parameter blob per opcode.
//! PancakeSwap Infinity uses the same opcodes for the CL position manager.

use ethers::abi::Token;
use ethers::types::{Address, Bytes, U256};

use super::pool_key::PoolKey;
use crate::chain::{encode_call, int_token};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Action {
    IncreaseLiquidity = 0x00,
    DecreaseLiquidity = 0x01,
    MintPosition = 0x02,
    BurnPosition = 0x03,
    SettlePair = 0x0d,
    TakePair = 0x11,
    Sweep = 0x14,
}

/// Ordered opcodes with their parameters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionPlan {
    actions: Vec<u8>,
    params: Vec<Bytes>,
}

impl ActionPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn actions(&self) -> &[u8] {
        &self.actions
    }

    fn push(&mut self, action: Action, tokens: &[Token]) -> &mut Self {
        self.actions.push(action as u8);
        self.params.push(ethers::abi::encode(tokens).into());
        self
    }

    #[allow(clippy::too_many_arguments)]
    pub fn mint(
        &mut self,
        key: &PoolKey,
        tick_lower: i32,
        tick_upper: i32,
        liquidity: u128,
        amount0_max: U256,
        amount1_max: U256,
        owner: Address,
    ) -> &mut Self {
        let position = Token::Tuple(vec![
            key.to_token(),
            int_token(tick_lower),
            int_token(tick_upper),
        ]);
        self.push(
            Action::MintPosition,
            &[
                position,
                Token::Uint(U256::from(liquidity)),
                Token::Uint(amount0_max),
                Token::Uint(amount1_max),
                Token::Address(owner),
                Token::Bytes(Vec::new()),
            ],
        )
    }

    pub fn decrease(&mut self, token_id: U256, liquidity: u128) -> &mut Self {
        self.push(
            Action::DecreaseLiquidity,
            &[
                Token::Uint(token_id),
                Token::Uint(U256::from(liquidity)),
                Token::Uint(U256::zero()),
                Token::Uint(U256::zero()),
                Token::Bytes(Vec::new()),
            ],
        )
    }

    pub fn burn(&mut self, token_id: U256) -> &mut Self {
        self.push(
            Action::BurnPosition,
            &[
                Token::Uint(token_id),
                Token::Uint(U256::zero()),
                Token::Uint(U256::zero()),
                Token::Bytes(Vec::new()),
            ],
        )
    }

    pub fn settle_pair(&mut self, currency0: Address, currency1: Address) -> &mut Self {
        self.push(
            Action::SettlePair,
            &[Token::Address(currency0), Token::Address(currency1)],
        )
    }

    pub fn take_pair(&mut self, currency0: Address, currency1: Address, recipient: Address) -> &mut Self {
        self.push(
            Action::TakePair,
            &[
                Token::Address(currency0),
                Token::Address(currency1),
                Token::Address(recipient),
            ],
        )
    }

    /// Return any unspent balance of `currency`, used for native overpayment
    pub fn sweep(&mut self, currency: Address, recipient: Address) -> &mut Self {
        self.push(
            Action::Sweep,
            &[Token::Address(currency), Token::Address(recipient)],
        )
    }

    pub fn unlock_data(&self) -> Bytes {
        ethers::abi::encode(&[
            Token::Bytes(self.actions.clone()),
            Token::Array(self.params.iter().map(|p| Token::Bytes(p.to_vec())).collect()),
        ])
        .into()
    }

    /// `modifyLiquidities(bytes unlockData, uint256 deadline)` calldata
    pub fn modify_liquidities_call(&self, deadline: U256) -> Bytes {
        encode_call(
            "modifyLiquidities(bytes,uint256)",
            &[Token::Bytes(self.unlock_data().to_vec()), Token::Uint(deadline)],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::abi::ParamType;
    use ladder_config::V4Flavor;

    fn key() -> PoolKey {
        PoolKey::new(
            V4Flavor::Uniswap,
            Address::repeat_byte(1),
            Address::repeat_byte(2),
            3000,
            60,
            Address::zero(),
            Address::zero(),
        )
    }

    #[test]
    fn test_mint_stream_layout() {
        let mut plan = ActionPlan::new();
        plan.mint(&key(), -120, 60, 1_000, U256::from(5), U256::from(6), Address::repeat_byte(9))
            .mint(&key(), 60, 120, 2_000, U256::from(5), U256::from(6), Address::repeat_byte(9))
            .settle_pair(Address::repeat_byte(1), Address::repeat_byte(2));
        assert_eq!(plan.actions(), &[0x02, 0x02, 0x0d]);

        let decoded = ethers::abi::decode(
            &[ParamType::Bytes, ParamType::Array(Box::new(ParamType::Bytes))],
            &plan.unlock_data(),
        )
        .unwrap();
        assert_eq!(decoded[0], Token::Bytes(vec![0x02, 0x02, 0x0d]));
        let params = decoded[1].clone().into_array().unwrap();
        assert_eq!(params.len(), 3);
        // key (5) + ticks (2) + liquidity, maxima, owner, hookData offset, hookData length
        assert_eq!(params[0].clone().into_bytes().unwrap().len(), 13 * 32);
    }

    #[test]
    fn test_close_stream_with_sweep() {
        let mut plan = ActionPlan::new();
        plan.decrease(U256::from(11), 500)
            .burn(U256::from(11))
            .take_pair(Address::zero(), Address::repeat_byte(2), Address::repeat_byte(9))
            .sweep(Address::zero(), Address::repeat_byte(9));
        assert_eq!(plan.actions(), &[0x01, 0x03, 0x11, 0x14]);
        assert_eq!(plan.len(), 4);
    }

    #[test]
    fn test_modify_liquidities_selector() {
        let call = ActionPlan::new().modify_liquidities_call(U256::from(1));
        assert_eq!(
            call[..4].to_vec(),
            ethers::utils::id("modifyLiquidities(bytes,uint256)").to_vec()
        );
    }
}
