//! Nonce allocation for one wallet on one chain
//!
//! Allocation is strictly sequential: the lowest released gap is handed out
//! first, otherwise the next frontier nonce. State sits behind a
//! `parking_lot::Mutex` so allocate/confirm/release never suspend; chain syncs
//! are serialised by an async gate and only ever move the frontier forward.
//!
//! A nonce whose transaction may have reached a node is never released. It
//! stays pending, marked uncertain, until a receipt confirms it or a sync shows
//! the node's pending count stopped exactly at it for longer than the sync
//! interval; only then is it reclaimed.

use ethers::types::Address;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::chain::ChainAccess;
use crate::error::{LadderError, Result};

/// Resync with the chain's pending count at most this often
pub const SYNC_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Default)]
struct NonceLedger {
    /// Lowest never-allocated nonce
    next: u64,
    /// Released below `next`, reusable
    released: BTreeSet<u64>,
    /// Allocated, not yet confirmed
    pending: BTreeSet<u64>,
    /// Pending nonces whose transaction may or may not be on a node, and since when
    uncertain: BTreeMap<u64, Instant>,
    last_sync: Option<Instant>,
}

impl NonceLedger {
    fn needs_sync(&self, interval: Duration) -> bool {
        match self.last_sync {
            None => true,
            Some(at) => at.elapsed() >= interval,
        }
    }

    fn take(&mut self) -> u64 {
        let nonce = match self.released.pop_first() {
            Some(gap) => gap,
            None => {
                let nonce = self.next;
                self.next += 1;
                nonce
            }
        };
        self.pending.insert(nonce);
        nonce
    }

    fn give_back(&mut self, nonce: u64) -> Result<()> {
        if !self.pending.remove(&nonce) {
            return Err(LadderError::NonceConflict {
                nonce,
                reason: "released nonce was not pending".to_string(),
            });
        }
        self.uncertain.remove(&nonce);
        if nonce + 1 == self.next {
            self.next = nonce;
            // fold trailing gaps back into the frontier
            while self.next > 0 && self.released.remove(&(self.next - 1)) {
                self.next -= 1;
            }
        } else {
            self.released.insert(nonce);
        }
        Ok(())
    }

    /// Fold in the node's pending count; returns a reclaimed uncertain nonce
    fn merge_chain(&mut self, chain_nonce: u64, grace: Duration) -> Option<u64> {
        if chain_nonce > self.next {
            self.next = chain_nonce;
        }
        self.pending.retain(|n| *n >= chain_nonce);
        self.released.retain(|n| *n >= chain_nonce);
        self.uncertain.retain(|n, _| *n >= chain_nonce);

        // the node holds everything below its count and nothing at it; higher
        // nonces may sit in its queue behind the gap, so only this one is free
        let stale = self
            .uncertain
            .get(&chain_nonce)
            .is_some_and(|since| since.elapsed() >= grace);
        if stale && self.give_back(chain_nonce).is_ok() {
            return Some(chain_nonce);
        }
        None
    }
}

struct NonceInner {
    address: Address,
    chain: Arc<dyn ChainAccess>,
    ledger: Mutex<NonceLedger>,
    sync_gate: tokio::sync::Mutex<()>,
    sync_interval: Duration,
}

/// Per-wallet nonce manager, cheap to clone
#[derive(Clone)]
pub struct NonceManager {
    inner: Arc<NonceInner>,
}

impl NonceManager {
    pub fn new(chain: Arc<dyn ChainAccess>, address: Address) -> Self {
        Self::with_sync_interval(chain, address, SYNC_INTERVAL)
    }

    pub fn with_sync_interval(
        chain: Arc<dyn ChainAccess>,
        address: Address,
        sync_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(NonceInner {
                address,
                chain,
                ledger: Mutex::new(NonceLedger::default()),
                sync_gate: tokio::sync::Mutex::new(()),
                sync_interval,
            }),
        }
    }

    pub fn address(&self) -> Address {
        self.inner.address
    }

    /// Reserve the lowest free nonce
    ///
    /// The reservation releases itself on drop unless a send was started.
    pub async fn allocate(&self) -> Result<NonceReservation> {
        if self.inner.ledger.lock().needs_sync(self.inner.sync_interval) {
            self.sync().await?;
        }
        let nonce = self.inner.ledger.lock().take();
        debug!("Allocated nonce {} for {:?}", nonce, self.inner.address);
        Ok(NonceReservation {
            inner: Arc::clone(&self.inner),
            nonce,
            state: ReservationState::Reserved,
        })
    }

    /// Commit a nonce once its transaction has a receipt
    pub fn confirm(&self, nonce: u64) -> Result<()> {
        let mut ledger = self.inner.ledger.lock();
        if ledger.pending.remove(&nonce) {
            ledger.uncertain.remove(&nonce);
            debug!("Confirmed nonce {}", nonce);
            return Ok(());
        }
        if nonce >= ledger.next {
            return Err(LadderError::NonceConflict {
                nonce,
                reason: format!("never allocated, frontier is {}", ledger.next),
            });
        }
        if ledger.released.contains(&nonce) {
            return Err(LadderError::NonceConflict {
                nonce,
                reason: "nonce was released".to_string(),
            });
        }
        // already confirmed or dropped by a chain sync
        Ok(())
    }

    /// Return a nonce whose transaction never reached the network
    pub fn release(&self, nonce: u64) -> Result<()> {
        self.inner.ledger.lock().give_back(nonce)?;
        debug!("Released nonce {}", nonce);
        Ok(())
    }

    /// A pending nonce whose transaction may or may not have reached a node
    pub fn mark_uncertain(&self, nonce: u64) {
        let mut ledger = self.inner.ledger.lock();
        if ledger.pending.contains(&nonce) {
            ledger.uncertain.entry(nonce).or_insert_with(Instant::now);
            debug!("Nonce {} awaiting chain evidence", nonce);
        }
    }

    /// Pull the pending transaction count and drop entries the chain has passed
    pub async fn sync(&self) -> Result<()> {
        let _gate = self.inner.sync_gate.lock().await;
        let chain_nonce = self.inner.chain.pending_nonce(self.inner.address).await?;
        let mut ledger = self.inner.ledger.lock();
        let before = ledger.next;
        if let Some(reclaimed) = ledger.merge_chain(chain_nonce, self.inner.sync_interval) {
            warn!(
                "Nonce {} never reached the chain, returning it to the pool",
                reclaimed
            );
        }
        ledger.last_sync = Some(Instant::now());
        if ledger.next != before {
            info!(
                "🔄 Nonce frontier for {:?} moved {} → {}",
                self.inner.address, before, ledger.next
            );
        }
        Ok(())
    }

    /// Forget all local state; the next allocation resyncs
    pub fn reset(&self) {
        let mut ledger = self.inner.ledger.lock();
        if !ledger.pending.is_empty() {
            warn!(
                "Resetting nonce ledger with {} pending nonces",
                ledger.pending.len()
            );
        }
        *ledger = NonceLedger::default();
    }

    pub fn pending_count(&self) -> usize {
        self.inner.ledger.lock().pending.len()
    }

    pub fn pending_nonces(&self) -> Vec<u64> {
        self.inner.ledger.lock().pending.iter().copied().collect()
    }

    pub fn uncertain_nonces(&self) -> Vec<u64> {
        self.inner.ledger.lock().uncertain.keys().copied().collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReservationState {
    Reserved,
    /// Handed to a node; the outcome is not known yet
    Sending,
    Broadcast,
}

/// An allocated nonce, released on drop unless a send was started
pub struct NonceReservation {
    inner: Arc<NonceInner>,
    nonce: u64,
    state: ReservationState,
}

impl NonceReservation {
    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    /// The signed transaction is about to leave; from here a drop keeps the
    /// nonce pending as uncertain
    pub fn begin_send(&mut self) {
        self.state = ReservationState::Sending;
    }

    /// The network accepted the transaction; keep the nonce pending until confirmed
    pub fn mark_broadcast(mut self) -> u64 {
        self.state = ReservationState::Broadcast;
        self.nonce
    }

    /// Every node refused the transaction; the nonce goes back to the pool
    pub fn mark_rejected(mut self) {
        self.state = ReservationState::Reserved;
    }
}

impl Drop for NonceReservation {
    fn drop(&mut self) {
        let mut ledger = self.inner.ledger.lock();
        match self.state {
            ReservationState::Broadcast => {}
            ReservationState::Sending => {
                warn!(
                    "Send with nonce {} abandoned mid-flight, keeping it pending",
                    self.nonce
                );
                if ledger.pending.contains(&self.nonce) {
                    ledger.uncertain.entry(self.nonce).or_insert_with(Instant::now);
                }
            }
            ReservationState::Reserved => match ledger.give_back(self.nonce) {
                Ok(()) => debug!("Reservation for nonce {} released on drop", self.nonce),
                Err(e) => warn!("Dropping reservation for nonce {}: {}", self.nonce, e),
            },
        }
    }
}

impl std::fmt::Debug for NonceReservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonceReservation")
            .field("nonce", &self.nonce)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::memory::InMemoryChain;

    fn manager(chain_nonce: u64) -> (Arc<InMemoryChain>, NonceManager) {
        let chain = Arc::new(InMemoryChain::new(56, Address::repeat_byte(7)));
        chain.set_pending_nonce(chain_nonce);
        let manager = NonceManager::new(chain.clone(), Address::repeat_byte(7));
        (chain, manager)
    }

    #[tokio::test]
    async fn test_sequential_from_chain_nonce() {
        let (_, nonces) = manager(12);
        let a = nonces.allocate().await.unwrap().mark_broadcast();
        let b = nonces.allocate().await.unwrap().mark_broadcast();
        assert_eq!((a, b), (12, 13));
        assert_eq!(nonces.pending_nonces(), vec![12, 13]);
    }

    #[tokio::test]
    async fn test_release_last_rewinds_frontier() {
        let (_, nonces) = manager(0);
        let a = nonces.allocate().await.unwrap().mark_broadcast();
        let b = nonces.allocate().await.unwrap().mark_broadcast();
        nonces.release(b).unwrap();
        let c = nonces.allocate().await.unwrap().mark_broadcast();
        assert_eq!((a, c), (0, 1));
    }

    #[tokio::test]
    async fn test_released_gap_is_reused_first() {
        let (_, nonces) = manager(0);
        let n0 = nonces.allocate().await.unwrap().mark_broadcast();
        let n1 = nonces.allocate().await.unwrap().mark_broadcast();
        let _n2 = nonces.allocate().await.unwrap().mark_broadcast();
        nonces.release(n0).unwrap();
        nonces.confirm(n1).unwrap();
        assert_eq!(nonces.allocate().await.unwrap().mark_broadcast(), 0);
        assert_eq!(nonces.allocate().await.unwrap().mark_broadcast(), 3);
    }

    #[tokio::test]
    async fn test_dropped_reservation_is_released() {
        let (_, nonces) = manager(5);
        {
            let reservation = nonces.allocate().await.unwrap();
            assert_eq!(reservation.nonce(), 5);
        }
        assert_eq!(nonces.pending_count(), 0);
        assert_eq!(nonces.allocate().await.unwrap().nonce(), 5);
    }

    #[tokio::test]
    async fn test_confirm_unallocated_is_conflict() {
        let (_, nonces) = manager(0);
        let n = nonces.allocate().await.unwrap().mark_broadcast();
        nonces.confirm(n).unwrap();
        assert!(matches!(
            nonces.confirm(9),
            Err(LadderError::NonceConflict { nonce: 9, .. })
        ));
        assert!(nonces.release(n).is_err());
    }

    #[tokio::test]
    async fn test_sync_drops_stale_pending() {
        let (chain, nonces) = manager(0);
        nonces.allocate().await.unwrap().mark_broadcast();
        nonces.allocate().await.unwrap().mark_broadcast();
        chain.set_pending_nonce(2);
        nonces.sync().await.unwrap();
        assert_eq!(nonces.pending_count(), 0);
        assert_eq!(nonces.allocate().await.unwrap().nonce(), 2);
    }

    #[tokio::test]
    async fn test_abandoned_send_keeps_nonce() {
        let (_, nonces) = manager(0);
        {
            let mut reservation = nonces.allocate().await.unwrap();
            reservation.begin_send();
        }
        assert_eq!(nonces.pending_nonces(), vec![0]);
        assert_eq!(nonces.uncertain_nonces(), vec![0]);
        assert_eq!(nonces.allocate().await.unwrap().mark_broadcast(), 1);
    }

    #[tokio::test]
    async fn test_rejected_send_releases_nonce() {
        let (_, nonces) = manager(3);
        let mut reservation = nonces.allocate().await.unwrap();
        reservation.begin_send();
        reservation.mark_rejected();
        assert_eq!(nonces.pending_count(), 0);
        assert_eq!(nonces.allocate().await.unwrap().nonce(), 3);
    }

    #[tokio::test]
    async fn test_uncertain_nonce_on_chain_is_dropped() {
        let (chain, nonces) = manager(0);
        let n = nonces.allocate().await.unwrap().mark_broadcast();
        nonces.mark_uncertain(n);
        chain.set_pending_nonce(1);
        nonces.sync().await.unwrap();
        assert!(nonces.uncertain_nonces().is_empty());
        assert_eq!(nonces.allocate().await.unwrap().nonce(), 1);
    }

    #[tokio::test]
    async fn test_uncertain_nonce_missing_from_node_is_reclaimed_after_grace() {
        let chain = Arc::new(InMemoryChain::new(56, Address::repeat_byte(7)));
        let nonces =
            NonceManager::with_sync_interval(chain.clone(), Address::repeat_byte(7), Duration::ZERO);
        let a = nonces.allocate().await.unwrap().mark_broadcast();
        let b = nonces.allocate().await.unwrap().mark_broadcast();
        nonces.mark_uncertain(a);
        nonces.mark_uncertain(b);

        // node count 0: nonce 0 is absent, nonce 1 may be queued behind it
        nonces.sync().await.unwrap();
        assert_eq!(nonces.uncertain_nonces(), vec![1]);
        assert_eq!(nonces.pending_nonces(), vec![1]);
        assert_eq!(nonces.allocate().await.unwrap().mark_broadcast(), 0);
    }

    #[tokio::test]
    async fn test_uncertain_nonce_within_grace_is_kept() {
        let (_, nonces) = manager(0);
        let n = nonces.allocate().await.unwrap().mark_broadcast();
        nonces.mark_uncertain(n);
        nonces.sync().await.unwrap();
        assert_eq!(nonces.uncertain_nonces(), vec![0]);
        assert_eq!(nonces.allocate().await.unwrap().nonce(), 1);
    }

    #[tokio::test]
    async fn test_reset_forces_resync() {
        let (chain, nonces) = manager(3);
        nonces.allocate().await.unwrap().mark_broadcast();
        let reads = chain.nonce_reads();
        nonces.reset();
        chain.set_pending_nonce(10);
        assert_eq!(nonces.allocate().await.unwrap().mark_broadcast(), 10);
        assert_eq!(chain.nonce_reads(), reads + 1);
    }
}
