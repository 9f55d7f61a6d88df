//! Engine error types

use ethers::types::{Address, H256, U256};
use ladder_amm::AmmError;
use thiserror::Error;

use crate::resources::secret::SecretError;

/// Errors raised while reading chain state or submitting ladder transactions
#[derive(Debug, Error)]
pub enum LadderError {
    #[error(transparent)]
    Math(#[from] AmmError),

    /// Token decimals could not be read; amounts are never guessed
    #[error("Decimals unavailable for token {token:?}: {reason}")]
    DecimalsUnavailable { token: Address, reason: String },

    /// Raw state read returned a different shape than the configured layout
    #[error("Pool state shape mismatch for {layout}: expected {expected}, got {got}")]
    PoolStateShapeMismatch {
        layout: String,
        expected: String,
        got: String,
    },

    #[error("Batch {batch_index} reverted in transaction {tx_hash:?}")]
    TransactionReverted { batch_index: usize, tx_hash: H256 },

    /// A node may hold the transaction but no receipt settled it
    #[error("Transaction {tx_hash:?} unconfirmed: {reason}")]
    TransactionUnconfirmed { tx_hash: H256, reason: String },

    /// Receipt events do not line up one-to-one with the batch's operations
    #[error("Batch {batch_index} receipt shows {found} results for {expected} operations")]
    ReceiptMismatch {
        batch_index: usize,
        expected: usize,
        found: usize,
    },

    #[error("Nonce conflict at {nonce}: {reason}")]
    NonceConflict { nonce: u64, reason: String },

    #[error("Insufficient balance of {token:?}: required {required}, available {available}")]
    InsufficientBalance {
        token: Address,
        required: U256,
        available: U256,
    },

    #[error("No pool for {token0:?}/{token1:?} at fee {fee}")]
    PoolNotFound {
        token0: Address,
        token1: Address,
        fee: u32,
    },

    #[error("Pool {pool} is not initialized")]
    PoolNotInitialized { pool: String },

    /// Pool key hashes to a different id than the one configured
    #[error("Pool id mismatch: configured {expected}, derived {derived}")]
    PoolIdMismatch { expected: H256, derived: H256 },

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("ABI error: {0}")]
    Abi(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Secret(#[from] SecretError),

    #[error("Operation cancelled")]
    Cancelled,
}

impl LadderError {
    pub fn rpc(context: impl std::fmt::Display) -> Self {
        Self::Rpc(context.to_string())
    }

    pub fn abi(context: impl std::fmt::Display) -> Self {
        Self::Abi(context.to_string())
    }

    pub fn config(context: impl std::fmt::Display) -> Self {
        Self::Config(context.to_string())
    }

    pub fn shape_mismatch(
        layout: impl Into<String>,
        expected: impl Into<String>,
        got: impl Into<String>,
    ) -> Self {
        Self::PoolStateShapeMismatch {
            layout: layout.into(),
            expected: expected.into(),
            got: got.into(),
        }
    }
}

impl From<ethers::abi::Error> for LadderError {
    fn from(err: ethers::abi::Error) -> Self {
        Self::Abi(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LadderError>;
