//! # Batch Submission
//!
//! ## Purpose
//!
//! Turns a list of per-position operations into as few transactions as the
//! per-transaction cap allows, submits them in order and reads identifiers back
//! out of the receipts.
//!
//! ## Architecture Role
//!
//! ```text
//! ops[0..n] ──chunk(max_per_tx)──► BatchPlan::build ──► gas + nonce ──► broadcast
//!                                                                          │
//!        BatchOutcome ◄── BatchPlan::parse_receipt ◄── receipt (status) ◄──┘
//! ```
//!
//! A reverted transaction yields no identifiers for its batch and a
//! [`LadderError::TransactionReverted`]; later batches still run. Atomicity holds
//! only within one transaction. A batch whose receipt never arrives keeps its
//! hash and reports [`LadderError::TransactionUnconfirmed`].

use ethers::types::{TransactionReceipt, H256, U256};
use ladder_amm::Position;
use serde::Serialize;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chain::{receipt_succeeded, ChainAccess, TransactionIntent, TxKind};
use crate::error::{LadderError, Result};
use crate::resources::gas::GasEstimator;
use crate::resources::nonce::NonceManager;
use crate::{log_error, log_execution, log_success};

/// How a group of operations becomes one transaction
pub trait BatchPlan: Send + Sync {
    /// Number of operations to spread over transactions
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Label reported per operation, usually the position index
    fn label(&self, op: usize) -> u32;

    /// Transaction carrying operations `ops`
    fn build(&self, ops: Range<usize>) -> Result<TransactionIntent>;

    /// Operation kinds in `ops`, for the fallback gas budget
    fn kinds(&self, ops: Range<usize>) -> Vec<TxKind>;

    /// Identifiers produced by a successful transaction, one per operation
    fn parse_receipt(&self, ops: Range<usize>, receipt: &TransactionReceipt) -> Result<Vec<U256>>;
}

/// What happened to one transaction
#[derive(Debug)]
pub struct BatchOutcome {
    pub batch_index: usize,
    pub position_indices: Vec<u32>,
    pub tx_hash: Option<H256>,
    pub token_ids: Vec<U256>,
    pub gas_used: U256,
    pub error: Option<LadderError>,
}

impl BatchOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of a ladder create or close
#[derive(Debug, Default)]
pub struct LadderResult {
    pub positions: Vec<Position>,
    pub batches: Vec<BatchOutcome>,
    pub token_ids: Vec<U256>,
    pub tx_hashes: Vec<H256>,
    pub gas_used: U256,
    pub success: bool,
}

impl LadderResult {
    pub fn from_batches(positions: Vec<Position>, batches: Vec<BatchOutcome>) -> Self {
        let token_ids = batches.iter().flat_map(|b| b.token_ids.clone()).collect();
        let tx_hashes = batches.iter().filter_map(|b| b.tx_hash).collect();
        let gas_used = batches
            .iter()
            .fold(U256::zero(), |acc, b| acc.saturating_add(b.gas_used));
        let success = !batches.is_empty() && batches.iter().all(BatchOutcome::succeeded);
        Self {
            positions,
            batches,
            token_ids,
            tx_hashes,
            gas_used,
            success,
        }
    }

    pub fn failed_batches(&self) -> impl Iterator<Item = &BatchOutcome> {
        self.batches.iter().filter(|b| !b.succeeded())
    }

    pub fn summary(&self) -> ResultSummary {
        ResultSummary {
            success: self.success,
            token_ids: self.token_ids.iter().map(|id| id.to_string()).collect(),
            tx_hashes: self.tx_hashes.iter().map(|h| format!("{:?}", h)).collect(),
            gas_used: self.gas_used.to_string(),
            failed: self
                .failed_batches()
                .map(|b| FailedBatch {
                    batch_index: b.batch_index,
                    position_indices: b.position_indices.clone(),
                    error: b.error.as_ref().map(|e| e.to_string()).unwrap_or_default(),
                })
                .collect(),
        }
    }
}

/// Machine-readable result, printed by the CLI with `--json`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultSummary {
    pub success: bool,
    pub token_ids: Vec<String>,
    pub tx_hashes: Vec<String>,
    pub gas_used: String,
    pub failed: Vec<FailedBatch>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedBatch {
    pub batch_index: usize,
    pub position_indices: Vec<u32>,
    pub error: String,
}

/// Progress after each submitted batch
#[derive(Debug, Clone, PartialEq)]
pub struct BatchProgress {
    pub batch_index: usize,
    pub total_batches: usize,
    pub completed_ops: usize,
    pub total_ops: usize,
    pub tx_hash: Option<H256>,
    pub succeeded: bool,
}

/// Submission settings, from `[execution]`
#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub max_per_tx: usize,
    pub gas_buffer_percent: u64,
    pub receipt_timeout: Duration,
}

impl From<&ladder_config::ExecutionConfig> for BatchSettings {
    fn from(config: &ladder_config::ExecutionConfig) -> Self {
        Self {
            max_per_tx: config.max_positions_per_tx.max(1),
            gas_buffer_percent: config.gas_buffer_percent,
            receipt_timeout: Duration::from_secs(config.receipt_timeout_secs),
        }
    }
}

/// Operation ranges of at most `max_per_tx`
pub fn chunk_ranges(len: usize, max_per_tx: usize) -> Vec<Range<usize>> {
    let size = max_per_tx.max(1);
    (0..len)
        .step_by(size)
        .map(|start| start..(start + size).min(len))
        .collect()
}

pub struct BatchSubmitter<'a> {
    chain: Arc<dyn ChainAccess>,
    nonces: &'a NonceManager,
    gas: &'a GasEstimator,
    settings: BatchSettings,
}

impl<'a> BatchSubmitter<'a> {
    pub fn new(
        chain: Arc<dyn ChainAccess>,
        nonces: &'a NonceManager,
        gas: &'a GasEstimator,
        settings: BatchSettings,
    ) -> Self {
        Self {
            chain,
            nonces,
            gas,
            settings,
        }
    }

    /// Submit every operation of `plan`, one transaction per chunk, in order
    pub async fn submit(
        &self,
        plan: &dyn BatchPlan,
        cancel: &CancellationToken,
        progress: Option<&mpsc::UnboundedSender<BatchProgress>>,
    ) -> Vec<BatchOutcome> {
        let ranges = chunk_ranges(plan.len(), self.settings.max_per_tx);
        let total_batches = ranges.len();
        log_execution!(
            "Submitting {} operations in {} transactions (max {} per tx)",
            plan.len(),
            total_batches,
            self.settings.max_per_tx
        );

        let mut outcomes = Vec::with_capacity(total_batches);
        let mut completed_ops = 0;
        for (batch_index, ops) in ranges.into_iter().enumerate() {
            let position_indices: Vec<u32> = ops.clone().map(|op| plan.label(op)).collect();
            let outcome = if cancel.is_cancelled() {
                BatchOutcome {
                    batch_index,
                    position_indices,
                    tx_hash: None,
                    token_ids: Vec::new(),
                    gas_used: U256::zero(),
                    error: Some(LadderError::Cancelled),
                }
            } else {
                self.submit_batch(plan, batch_index, ops.clone(), position_indices, cancel)
                    .await
            };

            completed_ops += ops.len();
            match &outcome.error {
                None => log_success!(
                    "Batch {}/{} confirmed: {} ids, gas {}",
                    batch_index + 1,
                    total_batches,
                    outcome.token_ids.len(),
                    outcome.gas_used
                ),
                Some(LadderError::Cancelled) => {
                    debug!("Batch {} skipped after cancellation", batch_index)
                }
                Some(e) => log_error!(
                    "Batch {}/{} failed for positions {:?}: {}",
                    batch_index + 1,
                    total_batches,
                    outcome.position_indices,
                    e
                ),
            }
            if let Some(progress) = progress {
                let _ = progress.send(BatchProgress {
                    batch_index,
                    total_batches,
                    completed_ops,
                    total_ops: plan.len(),
                    tx_hash: outcome.tx_hash,
                    succeeded: outcome.succeeded(),
                });
            }
            outcomes.push(outcome);
        }
        outcomes
    }

    async fn submit_batch(
        &self,
        plan: &dyn BatchPlan,
        batch_index: usize,
        ops: Range<usize>,
        position_indices: Vec<u32>,
        cancel: &CancellationToken,
    ) -> BatchOutcome {
        let mut outcome = BatchOutcome {
            batch_index,
            position_indices,
            tx_hash: None,
            token_ids: Vec::new(),
            gas_used: U256::zero(),
            error: None,
        };

        let mut intent = match plan.build(ops.clone()) {
            Ok(intent) => intent,
            Err(e) => {
                outcome.error = Some(e);
                return outcome;
            }
        };
        let fallback = GasEstimator::estimate_batch(&plan.kinds(ops.clone()));
        let gas_limit = self
            .gas
            .estimate_with(&intent, self.settings.gas_buffer_percent, fallback)
            .await;
        intent.gas_limit = Some(gas_limit);

        match self.send_and_wait(intent, cancel).await {
            Ok((tx_hash, receipt)) => {
                outcome.tx_hash = Some(tx_hash);
                outcome.gas_used = receipt.gas_used.unwrap_or_default();
                if !receipt_succeeded(&receipt) {
                    outcome.error = Some(LadderError::TransactionReverted {
                        batch_index,
                        tx_hash,
                    });
                    return outcome;
                }
                match plan.parse_receipt(ops.clone(), &receipt) {
                    Ok(ids) => {
                        if ids.len() != ops.len() {
                            outcome.error = Some(LadderError::ReceiptMismatch {
                                batch_index,
                                expected: ops.len(),
                                found: ids.len(),
                            });
                        }
                        outcome.token_ids = ids;
                    }
                    Err(e) => outcome.error = Some(e),
                }
            }
            Err((tx_hash, e)) => {
                outcome.tx_hash = tx_hash;
                outcome.error = Some(e);
            }
        }
        outcome
    }

    /// Allocate a nonce, sign, send and wait for the receipt
    ///
    /// The nonce goes back to the pool only while no node can hold the
    /// transaction: cancelled before sending, failed signing, or a definite
    /// rejection. Once a send has started the nonce stays pending until a
    /// receipt confirms it or a chain sync settles it.
    async fn send_and_wait(
        &self,
        mut intent: TransactionIntent,
        cancel: &CancellationToken,
    ) -> std::result::Result<(H256, TransactionReceipt), (Option<H256>, LadderError)> {
        if cancel.is_cancelled() {
            return Err((None, LadderError::Cancelled));
        }
        let mut reservation = self.nonces.allocate().await.map_err(|e| (None, e))?;
        intent.nonce = Some(U256::from(reservation.nonce()));

        let signed = tokio::select! {
            _ = cancel.cancelled() => Err(LadderError::Cancelled),
            signed = self.chain.sign(&intent) => signed,
        }
        .map_err(|e| (None, e))?;
        if cancel.is_cancelled() {
            return Err((None, LadderError::Cancelled));
        }

        // not raced against cancellation: a dropped send may still land
        reservation.begin_send();
        let (tx_hash, nonce) = match self.chain.send_raw(&signed).await {
            Ok(tx_hash) => (tx_hash, reservation.mark_broadcast()),
            Err(LadderError::TransactionUnconfirmed { tx_hash, reason }) => {
                warn!(
                    "⚠️ Send of {:?} inconclusive ({}), waiting for its receipt",
                    tx_hash, reason
                );
                let nonce = reservation.mark_broadcast();
                self.nonces.mark_uncertain(nonce);
                (tx_hash, nonce)
            }
            Err(e) => {
                reservation.mark_rejected();
                return Err((None, e));
            }
        };
        info!(
            "⚡ Sent {:?} tx {:?} (nonce {}, gas limit {})",
            intent.kind,
            tx_hash,
            nonce,
            intent.gas_limit.unwrap_or_default()
        );

        let waited = tokio::select! {
            biased;
            receipt = self.chain.wait_for_receipt(tx_hash, self.settings.receipt_timeout) => receipt,
            _ = cancel.cancelled() => Err(LadderError::TransactionUnconfirmed {
                tx_hash,
                reason: "cancelled before the receipt arrived".to_string(),
            }),
        };
        match waited {
            Ok(receipt) => {
                if let Err(e) = self.nonces.confirm(nonce) {
                    warn!("Nonce bookkeeping after receipt: {}", e);
                }
                Ok((tx_hash, receipt))
            }
            Err(e) => {
                self.nonces.mark_uncertain(nonce);
                if let Err(sync_err) = self.nonces.sync().await {
                    warn!("Nonce sync after missing receipt failed: {}", sync_err);
                }
                Err((Some(tx_hash), e))
            }
        }
    }

    /// Single preparatory transaction (approval, pool initialization)
    ///
    /// Uses the standard gas estimate; a revert is
    /// [`LadderError::TransactionReverted`] with batch index 0.
    pub async fn send_single(
        &self,
        mut intent: TransactionIntent,
        cancel: &CancellationToken,
    ) -> Result<TransactionReceipt> {
        intent.gas_limit = Some(self.gas.estimate(&intent).await);
        let kind = intent.kind;
        let (tx_hash, receipt) = self
            .send_and_wait(intent, cancel)
            .await
            .map_err(|(_, e)| e)?;
        if !receipt_succeeded(&receipt) {
            warn!("{:?} transaction {:?} reverted", kind, tx_hash);
            return Err(LadderError::TransactionReverted {
                batch_index: 0,
                tx_hash,
            });
        }
        Ok(receipt)
    }
}
