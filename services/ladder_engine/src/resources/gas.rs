//! Gas limits: live estimate plus buffer, per-kind fallback when estimation fails

use ethers::types::U256;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::chain::{ChainAccess, TransactionIntent, TxKind};

/// Ceiling for [`GasEstimator::estimate_batch`]
pub const MAX_BATCH_GAS: u64 = 8_000_000;

/// Fallback limit when the node cannot estimate
pub fn fallback_gas(kind: TxKind) -> u64 {
    match kind {
        TxKind::Approve => 60_000,
        TxKind::Transfer => 65_000,
        TxKind::Mint => 500_000,
        TxKind::Multicall => 2_000_000,
        TxKind::Swap => 300_000,
        TxKind::Initialize => 500_000,
        TxKind::ModifyLiquidity => 400_000,
        TxKind::Other => 200_000,
    }
}

/// `gas * (100 + percent) / 100`
pub fn with_buffer(gas: U256, percent: u64) -> U256 {
    gas * U256::from(100 + percent) / U256::from(100)
}

pub struct GasEstimator {
    chain: Arc<dyn ChainAccess>,
    buffer_percent: u64,
    max_gas_limit: u64,
}

impl GasEstimator {
    pub fn new(chain: Arc<dyn ChainAccess>, buffer_percent: u64, max_gas_limit: u64) -> Self {
        Self {
            chain,
            buffer_percent,
            max_gas_limit,
        }
    }

    pub fn from_config(chain: Arc<dyn ChainAccess>, config: &ladder_config::GasConfig) -> Self {
        Self::new(chain, config.estimate_buffer_percent, config.max_gas_limit)
    }

    /// Gas limit for one transaction; never fails
    pub async fn estimate(&self, intent: &TransactionIntent) -> U256 {
        self.estimate_with(intent, self.buffer_percent, U256::from(fallback_gas(intent.kind)))
            .await
    }

    /// Live estimate with `buffer_percent`, or `fallback` when the node refuses
    pub async fn estimate_with(
        &self,
        intent: &TransactionIntent,
        buffer_percent: u64,
        fallback: U256,
    ) -> U256 {
        let cap = U256::from(self.max_gas_limit);
        match self.chain.estimate_gas(intent).await {
            Ok(estimate) => {
                let buffered = with_buffer(estimate, buffer_percent).min(cap);
                debug!(
                    "⛽ {:?} estimate {} → limit {} (+{}%)",
                    intent.kind, estimate, buffered, buffer_percent
                );
                buffered
            }
            Err(e) => {
                warn!(
                    "⛽ Gas estimation failed for {:?}: {}, using fallback {}",
                    intent.kind, e, fallback
                );
                fallback.min(cap)
            }
        }
    }

    /// Fallback budget for several operations sent together: sum × 1.1, capped
    pub fn estimate_batch(kinds: &[TxKind]) -> U256 {
        let total: u64 = kinds.iter().map(|kind| fallback_gas(*kind)).sum();
        U256::from(total * 11 / 10).min(U256::from(MAX_BATCH_GAS))
    }
}
