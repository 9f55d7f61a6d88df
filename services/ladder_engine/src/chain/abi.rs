//! Event ABIs and return-data decoding for position managers and ERC20s
//!
//! Receipts are decoded through typed `ethabi` event definitions rather than
//! raw topic arithmetic, so a changed event shape fails loudly.

use ethers::abi::{Event, EventParam, ParamType, RawLog, Token};
use ethers::types::{Address, Bytes, Log, TransactionReceipt, H256, U256};
use once_cell::sync::Lazy;

use super::encode_call;
use crate::error::{LadderError, Result};

/// V3 NonfungiblePositionManager IncreaseLiquidity event ABI definition
/// event IncreaseLiquidity(uint256 indexed tokenId, uint128 liquidity, uint256 amount0, uint256 amount1)
pub fn increase_liquidity_event() -> Event {
    Event {
        name: "IncreaseLiquidity".to_string(),
        inputs: vec![
            EventParam {
                name: "tokenId".to_string(),
                kind: ParamType::Uint(256),
                indexed: true,
            },
            EventParam {
                name: "liquidity".to_string(),
                kind: ParamType::Uint(128),
                indexed: false,
            },
            EventParam {
                name: "amount0".to_string(),
                kind: ParamType::Uint(256),
                indexed: false,
            },
            EventParam {
                name: "amount1".to_string(),
                kind: ParamType::Uint(256),
                indexed: false,
            },
        ],
        anonymous: false,
    }
}

/// ERC721 Transfer event ABI definition
/// event Transfer(address indexed from, address indexed to, uint256 indexed tokenId)
pub fn erc721_transfer_event() -> Event {
    Event {
        name: "Transfer".to_string(),
        inputs: vec![
            EventParam {
                name: "from".to_string(),
                kind: ParamType::Address,
                indexed: true,
            },
            EventParam {
                name: "to".to_string(),
                kind: ParamType::Address,
                indexed: true,
            },
            EventParam {
                name: "tokenId".to_string(),
                kind: ParamType::Uint(256),
                indexed: true,
            },
        ],
        anonymous: false,
    }
}

pub static INCREASE_LIQUIDITY_TOPIC: Lazy<H256> = Lazy::new(|| increase_liquidity_event().signature());
pub static TRANSFER_TOPIC: Lazy<H256> = Lazy::new(|| erc721_transfer_event().signature());

/// Position minted in a V3 transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncreasedPosition {
    pub token_id: U256,
    pub liquidity: u128,
    pub amount0: U256,
    pub amount1: U256,
}

fn raw_log(log: &Log) -> RawLog {
    RawLog {
        topics: log.topics.clone(),
        data: log.data.to_vec(),
    }
}

/// IncreaseLiquidity logs emitted by `position_manager`, in log order
pub fn parse_increase_liquidity(
    receipt: &TransactionReceipt,
    position_manager: Address,
) -> Result<Vec<IncreasedPosition>> {
    let event = increase_liquidity_event();
    receipt
        .logs
        .iter()
        .filter(|log| {
            log.address == position_manager
                && log.topics.first() == Some(&*INCREASE_LIQUIDITY_TOPIC)
        })
        .map(|log| {
            let parsed = event.parse_log(raw_log(log))?;
            let uint = |name: &str| -> Result<U256> {
                parsed
                    .params
                    .iter()
                    .find(|p| p.name == name)
                    .and_then(|p| p.value.clone().into_uint())
                    .ok_or_else(|| LadderError::abi(format!("IncreaseLiquidity missing {}", name)))
            };
            Ok(IncreasedPosition {
                token_id: uint("tokenId")?,
                liquidity: uint("liquidity")?.low_u128(),
                amount0: uint("amount0")?,
                amount1: uint("amount1")?,
            })
        })
        .collect()
}

/// Token ids of ERC721 mints (`from == 0`) by `position_manager`, in log order
///
/// ERC20 transfers share the topic but carry three topics, so they never match.
pub fn parse_minted_token_ids(
    receipt: &TransactionReceipt,
    position_manager: Address,
) -> Result<Vec<U256>> {
    let event = erc721_transfer_event();
    receipt
        .logs
        .iter()
        .filter(|log| {
            log.address == position_manager
                && log.topics.len() == 4
                && log.topics[0] == *TRANSFER_TOPIC
                && log.topics[1] == H256::zero()
        })
        .map(|log| {
            let parsed = event.parse_log(raw_log(log))?;
            parsed
                .params
                .into_iter()
                .find(|p| p.name == "tokenId")
                .and_then(|p| p.value.into_uint())
                .ok_or_else(|| LadderError::abi("Transfer missing tokenId"))
        })
        .collect()
}

/// Split return data into 32-byte words, rejecting ragged lengths
pub fn words(data: &[u8]) -> Option<Vec<[u8; 32]>> {
    if data.len() % 32 != 0 {
        return None;
    }
    Some(
        data.chunks_exact(32)
            .map(|chunk| {
                let mut word = [0u8; 32];
                word.copy_from_slice(chunk);
                word
            })
            .collect(),
    )
}

/// Unsigned value that must fit in `bits`
pub fn word_to_uint(word: &[u8; 32], bits: usize) -> Option<U256> {
    let value = U256::from_big_endian(word);
    (value.bits() <= bits).then_some(value)
}

/// Sign-extended int24
pub fn word_to_int24(word: &[u8; 32]) -> Option<i32> {
    let fill = if word[29] & 0x80 != 0 { 0xff } else { 0x00 };
    if word[..29].iter().any(|b| *b != fill) {
        return None;
    }
    let raw = ((word[29] as i32) << 16) | ((word[30] as i32) << 8) | word[31] as i32;
    Some(if fill == 0xff { raw - (1 << 24) } else { raw })
}

pub fn word_to_address(word: &[u8; 32]) -> Option<Address> {
    if word[..12].iter().any(|b| *b != 0) {
        return None;
    }
    Some(Address::from_slice(&word[12..]))
}

/// Single uint256 return value
pub fn decode_uint(data: &[u8]) -> Result<U256> {
    match words(data).as_deref() {
        Some([word]) => Ok(U256::from_big_endian(word)),
        _ => Err(LadderError::abi(format!(
            "expected one word, got {} bytes",
            data.len()
        ))),
    }
}

// ERC20 calls

pub fn balance_of_call(owner: Address) -> Bytes {
    encode_call("balanceOf(address)", &[Token::Address(owner)])
}

pub fn decimals_call() -> Bytes {
    encode_call("decimals()", &[])
}

pub fn allowance_call(owner: Address, spender: Address) -> Bytes {
    encode_call(
        "allowance(address,address)",
        &[Token::Address(owner), Token::Address(spender)],
    )
}

pub fn approve_call(spender: Address, amount: U256) -> Bytes {
    encode_call(
        "approve(address,uint256)",
        &[Token::Address(spender), Token::Uint(amount)],
    )
}
