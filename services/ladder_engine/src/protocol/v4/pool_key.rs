//! V4 pool keys and pool ids
//!
//! Uniswap keys are `(currency0, currency1, fee, tickSpacing, hooks)`. PancakeSwap
//! Infinity keys are `(currency0, currency1, hooks, poolManager, fee, parameters)`
//! with the tick spacing packed into `parameters` above the 16 hook-permission bits.
//! The pool id is `keccak256(abi.encode(key))` in both cases.

use ethers::abi::Token;
use ethers::types::{Address, H256, U256};
use ethers::utils::keccak256;
use ladder_config::V4Flavor;

use crate::chain::int_token;

/// Bit offset of the tick spacing inside PancakeSwap CL `parameters`
pub const PANCAKE_TICK_SPACING_OFFSET: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolKey {
    pub deployment: V4Flavor,
    pub currency0: Address,
    pub currency1: Address,
    /// Fee in hundredths of a basis point
    pub fee: u32,
    pub tick_spacing: i32,
    pub hooks: Address,
    /// Only part of PancakeSwap keys
    pub pool_manager: Address,
}

impl PoolKey {
    /// Key for two currencies in either order; the zero address is the native currency
    pub fn new(
        deployment: V4Flavor,
        token_a: Address,
        token_b: Address,
        fee: u32,
        tick_spacing: i32,
        hooks: Address,
        pool_manager: Address,
    ) -> Self {
        let (currency0, currency1) = if token_a <= token_b {
            (token_a, token_b)
        } else {
            (token_b, token_a)
        };
        Self {
            deployment,
            currency0,
            currency1,
            fee,
            tick_spacing,
            hooks,
            pool_manager,
        }
    }

    pub fn currencies(&self) -> (Address, Address) {
        (self.currency0, self.currency1)
    }

    /// Native currency always sorts first
    pub fn has_native(&self) -> bool {
        self.currency0.is_zero()
    }

    /// PancakeSwap CL `parameters` word
    pub fn parameters(&self) -> H256 {
        let spacing = U256::from(self.tick_spacing.max(0) as u64) << PANCAKE_TICK_SPACING_OFFSET;
        let mut word = [0u8; 32];
        spacing.to_big_endian(&mut word);
        H256::from(word)
    }

    /// Solidity tuple type, as used in function signatures
    pub fn abi_type(&self) -> &'static str {
        match self.deployment {
            V4Flavor::Uniswap => "(address,address,uint24,int24,address)",
            V4Flavor::Pancakeswap => "(address,address,address,address,uint24,bytes32)",
        }
    }

    pub fn to_token(&self) -> Token {
        let fee = Token::Uint(U256::from(self.fee));
        match self.deployment {
            V4Flavor::Uniswap => Token::Tuple(vec![
                Token::Address(self.currency0),
                Token::Address(self.currency1),
                fee,
                int_token(self.tick_spacing),
                Token::Address(self.hooks),
            ]),
            V4Flavor::Pancakeswap => Token::Tuple(vec![
                Token::Address(self.currency0),
                Token::Address(self.currency1),
                Token::Address(self.hooks),
                Token::Address(self.pool_manager),
                fee,
                Token::FixedBytes(self.parameters().as_bytes().to_vec()),
            ]),
        }
    }

    pub fn pool_id(&self) -> H256 {
        H256::from(keccak256(ethers::abi::encode(&[self.to_token()])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(deployment: V4Flavor, a: u8, b: u8) -> PoolKey {
        PoolKey::new(
            deployment,
            Address::repeat_byte(a),
            Address::repeat_byte(b),
            3000,
            60,
            Address::zero(),
            Address::repeat_byte(0xee),
        )
    }

    #[test]
    fn test_currencies_sorted() {
        let k = key(V4Flavor::Uniswap, 9, 3);
        assert_eq!(k.currency0, Address::repeat_byte(3));
        assert_eq!(k.pool_id(), key(V4Flavor::Uniswap, 3, 9).pool_id());
    }

    #[test]
    fn test_deployments_hash_differently() {
        assert_ne!(
            key(V4Flavor::Uniswap, 1, 2).pool_id(),
            key(V4Flavor::Pancakeswap, 1, 2).pool_id()
        );
    }

    #[test]
    fn test_uniswap_id_hashes_five_words() {
        let k = key(V4Flavor::Uniswap, 1, 2);
        let encoded = ethers::abi::encode(&[k.to_token()]);
        assert_eq!(encoded.len(), 5 * 32);
        assert_eq!(k.pool_id(), H256::from(keccak256(&encoded)));
    }

    #[test]
    fn test_pancake_parameters_pack_spacing() {
        let k = key(V4Flavor::Pancakeswap, 1, 2);
        let word = k.parameters();
        assert_eq!(U256::from_big_endian(word.as_bytes()), U256::from(60u64 << 16));
        assert_eq!(ethers::abi::encode(&[k.to_token()]).len(), 6 * 32);
    }

    #[test]
    fn test_native_sorts_first() {
        let k = PoolKey::new(
            V4Flavor::Uniswap,
            Address::repeat_byte(4),
            Address::zero(),
            500,
            10,
            Address::zero(),
            Address::zero(),
        );
        assert!(k.has_native());
    }
}
