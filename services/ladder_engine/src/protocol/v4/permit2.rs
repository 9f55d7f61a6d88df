//! Permit2 allowances for V4 position managers
//!
//! V4 position managers pull ERC20s through Permit2, so funding a mint takes two
//! grants: the token approves Permit2, then Permit2 approves the position manager
//! with an amount and an expiry.

use ethers::abi::Token;
use ethers::types::{Address, Bytes, U256};
use ladder_config::V4Flavor;
use tracing::{debug, info};

use crate::protocol::{ensure_erc20_allowance, LadderContext};
use crate::chain::abi::{word_to_uint, words};
use crate::chain::{encode_call, TransactionIntent, TxKind};
use crate::error::{LadderError, Result};

pub const UNISWAP_PERMIT2: &str = "0x000000000022D473030F116dDEE9F6B43aC78BA3";
pub const PANCAKE_PERMIT2: &str = "0x31c2F6fcFf4F8759b3Bd5Bf0e1084A055615c768";

/// Lifetime of a fresh Permit2 grant
pub const APPROVAL_LIFETIME_SECS: u64 = 365 * 24 * 60 * 60;

/// Grants expiring sooner than this are renewed
const EXPIRY_MARGIN_SECS: u64 = 60 * 60;

pub fn default_permit2(deployment: V4Flavor) -> &'static str {
    match deployment {
        V4Flavor::Uniswap => UNISWAP_PERMIT2,
        V4Flavor::Pancakeswap => PANCAKE_PERMIT2,
    }
}

/// Largest uint160, the Permit2 amount ceiling
pub fn max_uint160() -> U256 {
    (U256::one() << 160) - U256::one()
}

/// `allowance(owner, token, spender)` result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permit2Allowance {
    pub amount: U256,
    pub expiration: u64,
    pub nonce: u64,
}

impl Permit2Allowance {
    pub fn covers(&self, required: U256, now: u64) -> bool {
        self.amount >= required && self.expiration > now.saturating_add(EXPIRY_MARGIN_SECS)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Permit2 {
    address: Address,
}

impl Permit2 {
    pub fn new(address: Address) -> Self {
        Self { address }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn allowance_call(owner: Address, token: Address, spender: Address) -> Bytes {
        encode_call(
            "allowance(address,address,address)",
            &[
                Token::Address(owner),
                Token::Address(token),
                Token::Address(spender),
            ],
        )
    }

    pub fn decode_allowance(data: &[u8]) -> Result<Permit2Allowance> {
        let words = words(data)
            .filter(|w| w.len() == 3)
            .ok_or_else(|| LadderError::abi(format!("Permit2 allowance: {} bytes", data.len())))?;
        let field = |index: usize, bits: usize| {
            word_to_uint(&words[index], bits)
                .ok_or_else(|| LadderError::abi("Permit2 allowance field out of range"))
        };
        Ok(Permit2Allowance {
            amount: field(0, 160)?,
            expiration: field(1, 48)?.as_u64(),
            nonce: field(2, 48)?.as_u64(),
        })
    }

    pub fn approve_call(token: Address, spender: Address, amount: U256, expiration: u64) -> Bytes {
        encode_call(
            "approve(address,address,uint160,uint48)",
            &[
                Token::Address(token),
                Token::Address(spender),
                Token::Uint(amount),
                Token::Uint(U256::from(expiration)),
            ],
        )
    }

    /// Make `spender` able to pull `required` of `token` through Permit2
    ///
    /// Returns the number of approval transactions sent.
    pub async fn ensure_approval(
        &self,
        ctx: &LadderContext,
        token: Address,
        spender: Address,
        required: U256,
    ) -> Result<usize> {
        if token.is_zero() || required.is_zero() {
            return Ok(0);
        }
        let mut sent = 0;
        if ensure_erc20_allowance(ctx, token, self.address, required).await? {
            sent += 1;
        }

        let session = &ctx.session;
        let raw = session
            .chain()
            .call(
                self.address,
                Self::allowance_call(session.sender(), token, spender),
            )
            .await?;
        let current = Self::decode_allowance(&raw)?;
        let now = chrono::Utc::now().timestamp().max(0) as u64;
        if current.covers(required, now) {
            debug!(
                "Permit2 allowance of {:?} for {:?} valid until {}",
                token, spender, current.expiration
            );
            return Ok(sent);
        }

        ctx.ensure_active()?;
        let expiration = now + APPROVAL_LIFETIME_SECS;
        info!(
            "🔓 Permit2 approval of {:?} for {:?} until {}",
            token, spender, expiration
        );
        let intent = TransactionIntent::new(
            self.address,
            Self::approve_call(token, spender, max_uint160(), expiration),
            TxKind::Approve,
        );
        session.submitter().send_single(intent, &ctx.cancel).await?;
        Ok(sent + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(value: U256) -> Vec<u8> {
        let mut word = [0u8; 32];
        value.to_big_endian(&mut word);
        word.to_vec()
    }

    #[test]
    fn test_decode_allowance() {
        let mut data = word(max_uint160());
        data.extend(word(U256::from(1_900_000_000u64)));
        data.extend(word(U256::from(3)));
        let allowance = Permit2::decode_allowance(&data).unwrap();
        assert_eq!(allowance.amount, max_uint160());
        assert_eq!(allowance.expiration, 1_900_000_000);
        assert!(allowance.covers(U256::from(10), 1_800_000_000));
        assert!(!allowance.covers(U256::from(10), 1_900_000_000));
    }

    #[test]
    fn test_amount_wider_than_uint160_rejected() {
        let mut data = word(U256::MAX);
        data.extend(word(U256::zero()));
        data.extend(word(U256::zero()));
        assert!(Permit2::decode_allowance(&data).is_err());
    }

    #[test]
    fn test_default_addresses_parse() {
        for deployment in [V4Flavor::Uniswap, V4Flavor::Pancakeswap] {
            assert!(default_permit2(deployment).parse::<Address>().is_ok());
        }
    }
}
