//! Nonce allocation under concurrent callers

mod common;

use common::*;
use ladder_engine::resources::NonceManager;
use proptest::prelude::*;
use std::collections::BTreeSet;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_allocations_are_unique_and_gap_free() {
    let chain = funded_chain();
    chain.set_pending_nonce(10);
    let nonces = NonceManager::new(chain.clone(), WALLET);

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let nonces = nonces.clone();
            tokio::spawn(async move { nonces.allocate().await.unwrap().mark_broadcast() })
        })
        .collect();

    let mut seen = BTreeSet::new();
    for handle in handles {
        assert!(seen.insert(handle.await.unwrap()), "nonce handed out twice");
    }
    assert_eq!(seen.into_iter().collect::<Vec<_>>(), (10..30).collect::<Vec<_>>());
    assert_eq!(nonces.pending_count(), 20);
}

#[tokio::test]
async fn test_released_nonces_are_reused_lowest_first() {
    let chain = funded_chain();
    let nonces = NonceManager::new(chain, WALLET);

    let held: Vec<u64> = {
        let mut held = Vec::new();
        for _ in 0..5 {
            held.push(nonces.allocate().await.unwrap().mark_broadcast());
        }
        held
    };
    nonces.release(held[3]).unwrap();
    nonces.release(held[1]).unwrap();

    let a = nonces.allocate().await.unwrap().mark_broadcast();
    let b = nonces.allocate().await.unwrap().mark_broadcast();
    let c = nonces.allocate().await.unwrap().mark_broadcast();
    assert_eq!((a, b, c), (1, 3, 5));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Any interleaving of allocations and releases keeps pending nonces distinct
    /// and never hands out one that is still pending
    #[test]
    fn prop_pending_nonces_stay_distinct(ops in prop::collection::vec(any::<(bool, u8)>(), 1..40)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let nonces = NonceManager::new(funded_chain(), WALLET);
            let mut held: Vec<u64> = Vec::new();
            for (allocate, pick) in ops {
                if allocate || held.is_empty() {
                    let nonce = nonces.allocate().await.unwrap().mark_broadcast();
                    prop_assert!(!held.contains(&nonce));
                    held.push(nonce);
                } else {
                    let nonce = held.remove(pick as usize % held.len());
                    nonces.release(nonce).unwrap();
                }
                let mut pending = held.clone();
                pending.sort_unstable();
                prop_assert_eq!(nonces.pending_nonces(), pending);
            }
            Ok(())
        })?;
    }
}
