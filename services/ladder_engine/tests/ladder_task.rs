//! Background ladder tasks: event order, cancellation, join timeout

mod common;

use common::*;
use ethers::types::{Address, U256};
use ladder_amm::FeeSpec;
use ladder_engine::chain::memory::InMemoryChain;
use ladder_engine::{LadderError, LadderResult, LadderTask, LiquidityProvider, Provider, TaskEvent};
use std::sync::Arc;
use std::time::Duration;

const FACTORY: &str = "0x0BFbCF9fa4f9C56B0F40a671Ad40E0805A091865";
const POOL: Address = Address::repeat_byte(0x99);

fn pool_chain() -> Arc<InMemoryChain> {
    let chain = funded_chain();
    let factory: Address = FACTORY.parse().unwrap();
    chain.set_response(
        factory,
        selector("getPool(address,address,uint24)"),
        address_word(POOL),
    );
    chain.set_response(POOL, selector("slot0()"), v3_slot0(POOL_TICK));
    chain.set_uint(QUOTE, ALLOWANCE, U256::MAX);
    chain
}

fn create_task(chain: Arc<InMemoryChain>, max_per_tx: usize, positions: u32) -> LadderTask {
    let config = v3_config(max_per_tx);
    let provider: Arc<dyn LiquidityProvider> = Arc::new(Provider::from_config(&config).unwrap());
    LadderTask::spawn_create(
        session(chain, &config),
        provider,
        ladder_spec(FeeSpec::tier(2500), positions),
    )
}

#[tokio::test]
async fn test_progress_precedes_result_then_finished() {
    let chain = pool_chain();
    let mut task = create_task(chain, 2, 3);

    let mut events = Vec::new();
    while let Some(event) = task.next_event().await {
        let finished = matches!(event, TaskEvent::Finished);
        events.push(event);
        if finished {
            break;
        }
    }

    assert_eq!(events.len(), 4);
    match (&events[0], &events[1]) {
        (TaskEvent::Progress(first), TaskEvent::Progress(second)) => {
            assert_eq!((first.batch_index, first.completed_ops), (0, 2));
            assert_eq!((second.batch_index, second.completed_ops), (1, 3));
        }
        other => panic!("expected two progress events, got {other:?}"),
    }
    match &events[2] {
        TaskEvent::Result(Ok(result)) => {
            assert!(result.success);
            assert_eq!(result.batches.len(), 2);
        }
        other => panic!("expected a result, got {other:?}"),
    }
    assert!(matches!(events[3], TaskEvent::Finished));
}

#[tokio::test]
async fn test_join_returns_result() {
    let chain = pool_chain();
    let task = create_task(chain.clone(), 7, 3);
    let result = task.join(Duration::from_secs(10)).await.unwrap();
    assert_eq!(result.positions.len(), 3);
    assert_eq!(chain.sent().len(), 1);
}

#[tokio::test]
async fn test_join_timeout_cancels() {
    let chain = pool_chain();
    chain.set_broadcast_delay(Duration::from_secs(30));
    let task = create_task(chain.clone(), 7, 3);

    let err = task.join(Duration::from_millis(100)).await.unwrap_err();
    assert!(matches!(err, LadderError::Cancelled));
    assert!(chain.sent().is_empty());
}

#[tokio::test]
async fn test_cancel_skips_remaining_batches() {
    let chain = pool_chain();
    chain.set_broadcast_delay(Duration::from_millis(200));
    let mut task = create_task(chain.clone(), 1, 3);

    let mut result = None;
    while let Some(event) = task.next_event().await {
        match event {
            TaskEvent::Progress(progress) if progress.batch_index == 0 => task.cancel(),
            TaskEvent::Progress(_) => {}
            TaskEvent::Result(r) => result = Some(r),
            TaskEvent::Finished => break,
        }
    }

    let result = result.unwrap().unwrap();
    assert!(!result.success);
    assert!(result.batches[0].succeeded());
    // a send already handed to the node finishes; nothing after it starts
    let landed = result.batches.iter().filter(|b| b.succeeded()).count();
    assert!(result.batches[..landed].iter().all(|b| b.succeeded()));
    assert!(result.batches[landed..]
        .iter()
        .all(|b| matches!(b.error, Some(LadderError::Cancelled))));
    assert!(landed < 3);
    assert_eq!(chain.sent().len(), landed);
}

#[tokio::test]
async fn test_cancelled_before_work_reports_cancelled() {
    let chain = pool_chain();
    let session = session(chain.clone(), &v3_config(7));
    let task = LadderTask::spawn(session, |ctx| {
        Box::pin(async move {
            ctx.cancel.cancelled().await;
            ctx.ensure_active()?;
            Ok::<LadderResult, LadderError>(LadderResult::default())
        })
    });
    task.cancel();
    let err = task.join(Duration::from_secs(5)).await.unwrap_err();
    assert!(matches!(err, LadderError::Cancelled));
}
