//! Batch submission: chunking, per-batch failure attribution, nonces

mod common;

use common::*;
use ethers::types::{Address, TransactionReceipt, U256};
use ladder_engine::batch::{BatchPlan, BatchProgress};
use ladder_engine::chain::abi::parse_increase_liquidity;
use ladder_engine::chain::memory::{increase_liquidity_log, MockOutcome};
use ladder_engine::chain::{TransactionIntent, TxKind};
use ladder_engine::{LadderError, LadderResult};
use std::ops::Range;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const MANAGER: Address = Address::repeat_byte(0x44);

/// One mint per position, labelled 1..=n
struct Mints {
    count: usize,
}

impl BatchPlan for Mints {
    fn len(&self) -> usize {
        self.count
    }

    fn label(&self, op: usize) -> u32 {
        op as u32 + 1
    }

    fn build(&self, ops: Range<usize>) -> ladder_engine::Result<TransactionIntent> {
        Ok(TransactionIntent::new(
            MANAGER,
            vec![ops.start as u8, ops.end as u8].into(),
            TxKind::Multicall,
        ))
    }

    fn kinds(&self, ops: Range<usize>) -> Vec<TxKind> {
        vec![TxKind::Mint; ops.len()]
    }

    fn parse_receipt(
        &self,
        _ops: Range<usize>,
        receipt: &TransactionReceipt,
    ) -> ladder_engine::Result<Vec<U256>> {
        Ok(parse_increase_liquidity(receipt, MANAGER)?
            .into_iter()
            .map(|p| p.token_id)
            .collect())
    }
}

/// Token ids follow the position labels of each accepted transaction
fn mint_logs(calldata: &[u8]) -> Vec<ethers::types::Log> {
    let (start, end) = (calldata[0] as u64, calldata[1] as u64);
    (start..end)
        .map(|op| increase_liquidity_log(MANAGER, 100 + op + 1, 1_000))
        .collect()
}

#[tokio::test]
async fn test_second_batch_revert_is_attributed() {
    let chain = funded_chain();
    chain.on_broadcast(|index, intent| MockOutcome {
        reverted: index == 1,
        logs: mint_logs(&intent.calldata),
    });
    let session = session(chain.clone(), &v3_config(7));
    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();

    let outcomes = session
        .submitter()
        .submit(
            &Mints { count: 10 },
            &CancellationToken::new(),
            Some(&progress_tx),
        )
        .await;
    let result = LadderResult::from_batches(Vec::new(), outcomes);

    assert_eq!(chain.sent().len(), 2);
    assert!(!result.success);
    assert_eq!(result.token_ids.len(), 7);
    assert_eq!(result.token_ids[0], U256::from(101));
    assert_eq!(result.batches[0].position_indices, (1..=7).collect::<Vec<u32>>());

    let failed: Vec<_> = result.failed_batches().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].position_indices, vec![8, 9, 10]);
    assert!(failed[0].token_ids.is_empty());
    assert!(matches!(
        failed[0].error,
        Some(LadderError::TransactionReverted { batch_index: 1, .. })
    ));
    assert_eq!(result.tx_hashes.len(), 2);

    let first = progress_rx.recv().await.unwrap();
    let second = progress_rx.recv().await.unwrap();
    assert_eq!(
        (first.completed_ops, first.total_batches, first.succeeded),
        (7, 2, true)
    );
    assert_eq!(
        second,
        BatchProgress {
            batch_index: 1,
            total_batches: 2,
            completed_ops: 10,
            total_ops: 10,
            tx_hash: result.batches[1].tx_hash,
            succeeded: false,
        }
    );
}

#[tokio::test]
async fn test_rejected_broadcast_returns_its_nonce() {
    let chain = funded_chain();
    chain.set_pending_nonce(5);
    chain.fail_broadcast(0);
    let session = session(chain.clone(), &v3_config(2));

    let outcomes = session
        .submitter()
        .submit(&Mints { count: 4 }, &CancellationToken::new(), None)
        .await;

    assert!(matches!(outcomes[0].error, Some(LadderError::Rpc(_))));
    assert!(outcomes[0].tx_hash.is_none());
    assert!(outcomes[1].succeeded());

    let sent = chain.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].nonce, Some(U256::from(5)));
}

#[tokio::test]
async fn test_cancelled_before_start_sends_nothing() {
    let chain = funded_chain();
    let session = session(chain.clone(), &v3_config(3));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcomes = session
        .submitter()
        .submit(&Mints { count: 7 }, &cancel, None)
        .await;

    assert_eq!(outcomes.len(), 3);
    assert!(outcomes
        .iter()
        .all(|o| matches!(o.error, Some(LadderError::Cancelled))));
    assert!(chain.sent().is_empty());
    assert_eq!(session.nonces().pending_count(), 0);
}

#[tokio::test]
async fn test_failed_estimate_still_submits() {
    let chain = funded_chain();
    chain.set_gas_estimate(None);
    let session = session(chain.clone(), &v3_config(7));

    let outcomes = session
        .submitter()
        .submit(&Mints { count: 3 }, &CancellationToken::new(), None)
        .await;

    assert!(outcomes[0].succeeded());
    let gas_limit = chain.sent()[0].gas_limit.unwrap();
    assert!(gas_limit > U256::zero());
}

fn approval() -> TransactionIntent {
    TransactionIntent::new(QUOTE, vec![0x09, 0x5e, 0xa7, 0xb3].into(), TxKind::Approve)
}

#[tokio::test]
async fn test_cancel_during_send_keeps_the_nonce() {
    let chain = funded_chain();
    // the node records the transaction, then the response takes 300ms
    chain.set_send_stall(Duration::from_millis(300));
    let session = session(chain.clone(), &v3_config(7));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    session
        .submitter()
        .send_single(approval(), &cancel)
        .await
        .unwrap();
    assert!(cancel.is_cancelled());

    let used = chain.sent()[0].nonce.unwrap().as_u64();
    let next = session.nonces().allocate().await.unwrap();
    assert_ne!(next.nonce(), used);
    assert_eq!(next.nonce(), used + 1);
}

#[tokio::test]
async fn test_lost_send_response_keeps_the_nonce() {
    let chain = funded_chain();
    chain.lose_response(0);
    chain.on_broadcast(|_, intent| MockOutcome {
        reverted: false,
        logs: mint_logs(&intent.calldata),
    });
    let session = session(chain.clone(), &v3_config(7));

    let outcomes = session
        .submitter()
        .submit(&Mints { count: 2 }, &CancellationToken::new(), None)
        .await;

    // the receipt settles what the send could not
    assert!(outcomes[0].succeeded());
    assert!(outcomes[0].tx_hash.is_some());
    assert_eq!(outcomes[0].token_ids, vec![U256::from(101), U256::from(102)]);
    assert!(session.nonces().uncertain_nonces().is_empty());
    assert_eq!(session.nonces().pending_count(), 0);

    let next = session.nonces().allocate().await.unwrap();
    assert_eq!(next.nonce(), 1);
}

#[tokio::test]
async fn test_missing_receipt_is_unconfirmed_and_resyncs() {
    let chain = funded_chain();
    chain.withhold_receipts(true);
    let mut config = v3_config(7);
    config.execution.receipt_timeout_secs = 1;
    let session = session(chain.clone(), &config);

    let outcomes = session
        .submitter()
        .submit(&Mints { count: 2 }, &CancellationToken::new(), None)
        .await;

    assert!(outcomes[0].tx_hash.is_some());
    match &outcomes[0].error {
        Some(LadderError::TransactionUnconfirmed { tx_hash, .. }) => {
            assert_eq!(Some(*tx_hash), outcomes[0].tx_hash)
        }
        other => panic!("expected an unconfirmed send, got {:?}", other),
    }
    // one read to allocate, one after the timeout
    assert!(chain.nonce_reads() >= 2);
    assert_eq!(session.nonces().pending_count(), 0);

    let next = session.nonces().allocate().await.unwrap();
    assert_eq!(next.nonce(), 1, "the node holds nonce 0");
}

#[tokio::test]
async fn test_cancel_while_waiting_for_receipt() {
    let chain = funded_chain();
    chain.withhold_receipts(true);
    let session = session(chain.clone(), &v3_config(7));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let err = session
        .submitter()
        .send_single(approval(), &cancel)
        .await
        .unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(
        matches!(err, LadderError::TransactionUnconfirmed { .. }),
        "{err}"
    );
    assert_eq!(chain.sent().len(), 1);
    let next = session.nonces().allocate().await.unwrap();
    assert_eq!(next.nonce(), 1);
}

#[tokio::test]
async fn test_short_receipt_is_a_batch_error() {
    let chain = funded_chain();
    // one log for a three-mint batch
    chain.on_broadcast(|_, _| MockOutcome {
        reverted: false,
        logs: vec![increase_liquidity_log(MANAGER, 101, 1_000)],
    });
    let session = session(chain.clone(), &v3_config(7));

    let outcomes = session
        .submitter()
        .submit(&Mints { count: 3 }, &CancellationToken::new(), None)
        .await;

    assert!(!outcomes[0].succeeded());
    assert!(matches!(
        outcomes[0].error,
        Some(LadderError::ReceiptMismatch {
            batch_index: 0,
            expected: 3,
            found: 1
        })
    ));
    assert_eq!(outcomes[0].token_ids, vec![U256::from(101)]);
    assert!(outcomes[0].tx_hash.is_some());
}
