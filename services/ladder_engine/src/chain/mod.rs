//! # Chain Access
//!
//! Everything the engine needs from a node sits behind [`ChainAccess`]: read-only
//! calls, gas estimation, nonce and gas-price queries, signing, sending and
//! receipt polling. [`client::ChainClient`] is the production implementation over
//! ethers `Provider<Http>` with backup RPC failover.

pub mod abi;
pub mod client;
#[cfg(any(test, feature = "test-utils"))]
pub mod memory;
pub mod multicall;
pub mod slot0;

use async_trait::async_trait;
use ethers::abi::Token;
use ethers::types::{Address, Bytes, TransactionReceipt, H256, U256};
use std::time::Duration;

use crate::error::Result;

pub use client::ChainClient;

/// What a transaction does, used to pick a fallback gas limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxKind {
    Approve,
    Transfer,
    Mint,
    Multicall,
    Swap,
    Initialize,
    ModifyLiquidity,
    Other,
}

/// One on-chain action, owned by batch submission until broadcast or dropped
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionIntent {
    pub target: Address,
    pub calldata: Bytes,
    pub value: U256,
    pub gas_limit: Option<U256>,
    pub nonce: Option<U256>,
    pub kind: TxKind,
}

impl TransactionIntent {
    pub fn new(target: Address, calldata: Bytes, kind: TxKind) -> Self {
        Self {
            target,
            calldata,
            value: U256::zero(),
            gas_limit: None,
            nonce: None,
            kind,
        }
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    pub fn selector(&self) -> [u8; 4] {
        let mut selector = [0u8; 4];
        let len = self.calldata.len().min(4);
        selector[..len].copy_from_slice(&self.calldata[..len]);
        selector
    }
}

/// A signed transaction; its hash is known before anything is sent
#[derive(Debug, Clone)]
pub struct SignedTransaction {
    pub intent: TransactionIntent,
    pub raw: Bytes,
    pub hash: H256,
}

/// Node access used by providers, resources and batch submission
#[async_trait]
pub trait ChainAccess: Send + Sync {
    fn chain_id(&self) -> u64;

    /// Address transactions are sent from
    fn sender(&self) -> Address;

    /// `eth_call` against the latest block
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes>;

    async fn estimate_gas(&self, intent: &TransactionIntent) -> Result<U256>;

    /// Transaction count including pending transactions
    async fn pending_nonce(&self, address: Address) -> Result<u64>;

    async fn gas_price(&self) -> Result<U256>;

    /// Sign locally; `intent` must carry its nonce and gas limit
    async fn sign(&self, intent: &TransactionIntent) -> Result<SignedTransaction>;

    /// Hand a signed transaction to the network
    ///
    /// [`LadderError::TransactionUnconfirmed`](crate::LadderError::TransactionUnconfirmed)
    /// means a node may hold the transaction. Any other error means none took it.
    async fn send_raw(&self, tx: &SignedTransaction) -> Result<H256>;

    async fn wait_for_receipt(&self, tx_hash: H256, timeout: Duration)
        -> Result<TransactionReceipt>;
}

/// Calldata for `signature` with ABI-encoded `tokens`
pub fn encode_call(signature: &str, tokens: &[Token]) -> Bytes {
    let mut data = ethers::utils::id(signature).to_vec();
    data.extend(ethers::abi::encode(tokens));
    data.into()
}

/// Signed integer token (int24 ticks and the like), two's complement over 256 bits
pub fn int_token(value: i32) -> Token {
    let raw = if value < 0 {
        U256::MAX - U256::from((-(value as i64) - 1) as u64)
    } else {
        U256::from(value as u64)
    };
    Token::Int(raw)
}

/// Did the receipt report success
pub fn receipt_succeeded(receipt: &TransactionReceipt) -> bool {
    receipt.status.map(|s| s.as_u64() == 1).unwrap_or(false)
}

/// Unix time `secs` from now, for mint and close deadlines
pub fn deadline_after(secs: u64) -> U256 {
    let now = chrono::Utc::now().timestamp().max(0) as u64;
    U256::from(now.saturating_add(secs))
}
