//! In-memory [`ChainAccess`] for tests
//!
//! Reads are answered from a table keyed by `(target, selector)`, with Multicall3
//! `aggregate3` served from the same table. Sends are recorded and their
//! receipts produced by an optional hook so tests can script reverts and logs.
//! Lost responses, stalled sends and withheld receipts model a node that took
//! the transaction without telling us.

use async_trait::async_trait;
use ethers::types::{Address, Bytes, Log, TransactionReceipt, H256, U256, U64};
use ethers::utils::keccak256;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::abi::{INCREASE_LIQUIDITY_TOPIC, TRANSFER_TOPIC};
use super::multicall::{
    decode_aggregate3_calls, encode_aggregate3_results, CallResult, MULTICALL3_ADDRESS,
};
use super::{ChainAccess, SignedTransaction, TransactionIntent};
use crate::error::{LadderError, Result};

/// What a scripted broadcast produces
#[derive(Debug, Clone, Default)]
pub struct MockOutcome {
    pub reverted: bool,
    pub logs: Vec<Log>,
}

type ReceiptHook = Arc<dyn Fn(usize, &TransactionIntent) -> MockOutcome + Send + Sync>;

#[derive(Default)]
struct MemoryState {
    responses: HashMap<(Address, [u8; 4]), Bytes>,
    sent: Vec<TransactionIntent>,
    receipts: HashMap<H256, TransactionReceipt>,
    failing_broadcasts: HashSet<usize>,
    lost_responses: HashSet<usize>,
    broadcast_attempts: usize,
    withhold_receipts: bool,
    estimate: Option<U256>,
}

/// Scriptable chain used by unit and integration tests
pub struct InMemoryChain {
    chain_id: u64,
    sender: Address,
    pending_nonce: AtomicU64,
    nonce_reads: AtomicU64,
    state: Mutex<MemoryState>,
    receipt_hook: Mutex<Option<ReceiptHook>>,
    broadcast_delay: Mutex<Duration>,
    send_stall: Mutex<Duration>,
}

impl InMemoryChain {
    pub fn new(chain_id: u64, sender: Address) -> Self {
        Self {
            chain_id,
            sender,
            pending_nonce: AtomicU64::new(0),
            nonce_reads: AtomicU64::new(0),
            state: Mutex::new(MemoryState {
                estimate: Some(U256::from(150_000u64)),
                ..Default::default()
            }),
            receipt_hook: Mutex::new(None),
            broadcast_delay: Mutex::new(Duration::ZERO),
            send_stall: Mutex::new(Duration::ZERO),
        }
    }

    /// Answer `eth_call`s to `target` whose calldata starts with `selector`
    pub fn set_response(&self, target: Address, selector: [u8; 4], data: impl Into<Bytes>) {
        self.state
            .lock()
            .responses
            .insert((target, selector), data.into());
    }

    /// Answer a single-word uint read
    pub fn set_uint(&self, target: Address, selector: [u8; 4], value: U256) {
        let mut word = [0u8; 32];
        value.to_big_endian(&mut word);
        self.set_response(target, selector, word.to_vec());
    }

    pub fn set_pending_nonce(&self, nonce: u64) {
        self.pending_nonce.store(nonce, Ordering::SeqCst);
    }

    /// How often the pending nonce was read
    pub fn nonce_reads(&self) -> u64 {
        self.nonce_reads.load(Ordering::SeqCst)
    }

    /// `None` makes gas estimation fail
    pub fn set_gas_estimate(&self, estimate: Option<U256>) {
        self.state.lock().estimate = estimate;
    }

    /// Fail the broadcast attempt with this zero-based index
    pub fn fail_broadcast(&self, attempt: usize) {
        self.state.lock().failing_broadcasts.insert(attempt);
    }

    /// Accept the send attempt with this index but answer as if the response was lost
    pub fn lose_response(&self, attempt: usize) {
        self.state.lock().lost_responses.insert(attempt);
    }

    /// Latency before a send reaches the node
    pub fn set_broadcast_delay(&self, delay: Duration) {
        *self.broadcast_delay.lock() = delay;
    }

    /// Latency after the node recorded a send, before the caller hears back
    pub fn set_send_stall(&self, stall: Duration) {
        *self.send_stall.lock() = stall;
    }

    /// Receipt waits run into their timeout
    pub fn withhold_receipts(&self, withhold: bool) {
        self.state.lock().withhold_receipts = withhold;
    }

    /// Decide revert status and logs per accepted broadcast
    pub fn on_broadcast<F>(&self, hook: F)
    where
        F: Fn(usize, &TransactionIntent) -> MockOutcome + Send + Sync + 'static,
    {
        *self.receipt_hook.lock() = Some(Arc::new(hook));
    }

    /// Transactions accepted so far, in order
    pub fn sent(&self) -> Vec<TransactionIntent> {
        self.state.lock().sent.clone()
    }

    fn lookup(&self, to: Address, data: &Bytes) -> Result<Bytes> {
        let selector = selector_of(data);
        self.state
            .lock()
            .responses
            .get(&(to, selector))
            .cloned()
            .ok_or_else(|| {
                LadderError::rpc(format!(
                    "execution reverted: no response for {:?} selector 0x{}",
                    to,
                    hex::encode(selector)
                ))
            })
    }
}

fn selector_of(data: &[u8]) -> [u8; 4] {
    let mut selector = [0u8; 4];
    let len = data.len().min(4);
    selector[..len].copy_from_slice(&data[..len]);
    selector
}

#[async_trait]
impl ChainAccess for InMemoryChain {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn sender(&self) -> Address {
        self.sender
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes> {
        let multicall: Address = MULTICALL3_ADDRESS
            .parse()
            .map_err(|e| LadderError::config(format!("{e}")))?;
        if to == multicall {
            if let Ok(direct) = self.lookup(to, &data) {
                return Ok(direct);
            }
            let calls = decode_aggregate3_calls(&data)?;
            let results: Vec<CallResult> = calls
                .iter()
                .map(|call| match self.lookup(call.target, &call.calldata) {
                    Ok(data) => CallResult {
                        success: true,
                        data,
                    },
                    Err(_) => CallResult {
                        success: false,
                        data: Bytes::default(),
                    },
                })
                .collect();
            return Ok(encode_aggregate3_results(&results));
        }
        self.lookup(to, &data)
    }

    async fn estimate_gas(&self, _intent: &TransactionIntent) -> Result<U256> {
        self.state
            .lock()
            .estimate
            .ok_or_else(|| LadderError::rpc("execution reverted during estimation"))
    }

    async fn pending_nonce(&self, _address: Address) -> Result<u64> {
        self.nonce_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.pending_nonce.load(Ordering::SeqCst))
    }

    async fn gas_price(&self) -> Result<U256> {
        Ok(U256::from(3_000_000_000u64))
    }

    async fn sign(&self, intent: &TransactionIntent) -> Result<SignedTransaction> {
        let nonce = intent
            .nonce
            .ok_or_else(|| LadderError::rpc("transaction has no nonce"))?;
        let mut raw = intent.target.as_bytes().to_vec();
        let mut word = [0u8; 32];
        nonce.to_big_endian(&mut word);
        raw.extend_from_slice(&word);
        intent.value.to_big_endian(&mut word);
        raw.extend_from_slice(&word);
        raw.extend_from_slice(&intent.calldata);
        Ok(SignedTransaction {
            intent: intent.clone(),
            hash: H256::from(keccak256(&raw)),
            raw: raw.into(),
        })
    }

    async fn send_raw(&self, tx: &SignedTransaction) -> Result<H256> {
        let delay = *self.broadcast_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let intent = &tx.intent;
        let (accepted_index, lost) = {
            let mut state = self.state.lock();
            let attempt = state.broadcast_attempts;
            state.broadcast_attempts += 1;
            if state.failing_broadcasts.contains(&attempt) {
                return Err(LadderError::rpc("broadcast rejected"));
            }
            let nonce = intent
                .nonce
                .ok_or_else(|| LadderError::rpc("transaction has no nonce"))?;
            if state.sent.iter().any(|sent| sent.nonce == Some(nonce)) {
                return Err(LadderError::rpc(format!("nonce {} already used", nonce)));
            }
            state.sent.push(intent.clone());
            (state.sent.len() - 1, state.lost_responses.contains(&attempt))
        };

        let hook = self.receipt_hook.lock().clone();
        let outcome = hook
            .map(|hook| hook(accepted_index, intent))
            .unwrap_or_default();

        let nonce = intent.nonce.unwrap_or_default().as_u64();
        self.pending_nonce.fetch_max(nonce + 1, Ordering::SeqCst);

        let receipt = TransactionReceipt {
            transaction_hash: tx.hash,
            status: Some(U64::from(if outcome.reverted { 0 } else { 1 })),
            gas_used: Some(U256::from(120_000u64)),
            block_number: Some(U64::from(1_000 + accepted_index as u64)),
            logs: if outcome.reverted { Vec::new() } else { outcome.logs },
            ..Default::default()
        };
        self.state.lock().receipts.insert(tx.hash, receipt);

        let stall = *self.send_stall.lock();
        if !stall.is_zero() {
            tokio::time::sleep(stall).await;
        }
        if lost {
            return Err(LadderError::TransactionUnconfirmed {
                tx_hash: tx.hash,
                reason: "response lost".to_string(),
            });
        }
        Ok(tx.hash)
    }

    async fn wait_for_receipt(
        &self,
        tx_hash: H256,
        timeout: Duration,
    ) -> Result<TransactionReceipt> {
        let (withhold, receipt) = {
            let state = self.state.lock();
            (state.withhold_receipts, state.receipts.get(&tx_hash).cloned())
        };
        if withhold {
            tokio::time::sleep(timeout).await;
            return Err(LadderError::TransactionUnconfirmed {
                tx_hash,
                reason: format!("no receipt after {:?}", timeout),
            });
        }
        receipt.ok_or_else(|| LadderError::rpc(format!("unknown transaction {:?}", tx_hash)))
    }
}

/// V3 `IncreaseLiquidity` log as a position manager emits it
pub fn increase_liquidity_log(position_manager: Address, token_id: u64, liquidity: u128) -> Log {
    let mut data = vec![0u8; 96];
    U256::from(liquidity).to_big_endian(&mut data[..32]);
    Log {
        address: position_manager,
        topics: vec![*INCREASE_LIQUIDITY_TOPIC, H256::from_low_u64_be(token_id)],
        data: Bytes::from(data),
        ..Default::default()
    }
}

/// ERC721 mint log for a V4 position
pub fn erc721_mint_log(position_manager: Address, owner: Address, token_id: u64) -> Log {
    Log {
        address: position_manager,
        topics: vec![
            *TRANSFER_TOPIC,
            H256::zero(),
            H256::from(owner),
            H256::from_low_u64_be(token_id),
        ],
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::multicall::{Call, Multicall};
    use crate::chain::TxKind;

    #[tokio::test]
    async fn test_multicall_served_from_table() {
        let chain = InMemoryChain::new(56, Address::repeat_byte(9));
        let token = Address::repeat_byte(1);
        chain.set_uint(token, [0x31, 0x3c, 0xe5, 0x67], U256::from(18));

        let results = Multicall::default()
            .aggregate(
                &chain,
                &[
                    Call::new(token, crate::chain::abi::decimals_call()),
                    Call::new(Address::repeat_byte(2), crate::chain::abi::decimals_call()),
                ],
            )
            .await
            .unwrap();
        assert!(results[0].success);
        assert!(!results[1].success);
    }

    #[tokio::test]
    async fn test_reused_nonce_rejected() {
        let chain = InMemoryChain::new(56, Address::repeat_byte(9));
        let mut intent = TransactionIntent::new(Address::zero(), Bytes::default(), TxKind::Other);
        intent.nonce = Some(U256::from(4));
        let signed = chain.sign(&intent).await.unwrap();
        assert_eq!(chain.send_raw(&signed).await.unwrap(), signed.hash);
        assert!(chain.send_raw(&signed).await.is_err());
        assert_eq!(chain.pending_nonce(Address::zero()).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_lost_response_still_records() {
        let chain = InMemoryChain::new(56, Address::repeat_byte(9));
        chain.lose_response(0);
        let mut intent = TransactionIntent::new(Address::zero(), Bytes::default(), TxKind::Other);
        intent.nonce = Some(U256::from(0));
        let signed = chain.sign(&intent).await.unwrap();
        let err = chain.send_raw(&signed).await.unwrap_err();
        assert!(matches!(
            err,
            LadderError::TransactionUnconfirmed { tx_hash, .. } if tx_hash == signed.hash
        ));
        assert_eq!(chain.sent().len(), 1);
        assert!(chain
            .wait_for_receipt(signed.hash, Duration::from_secs(1))
            .await
            .is_ok());
    }
}
