//! # Chain Client - RPC Access and Transaction Signing
//!
//! ## Purpose
//!
//! Production [`ChainAccess`] over ethers `Provider<Http>`. Reads go to the primary
//! RPC; sends fall back through the backup RPCs in order when the primary
//! errors or times out. Transactions are signed locally with a [`LocalWallet`],
//! so the hash is known before the first send attempt.
//!
//! ## Architecture Role
//!
//! ```text
//! TransactionIntent → [Sign (LocalWallet)] → [Primary RPC] ─fail→ [Backup RPC 1..n]
//!                       (tx hash known)           ↓                     ↓
//!                                    [Receipt polling, 500ms]   timeout → TransactionUnconfirmed
//! ```

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::providers::{Http, RpcError};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use url::Url;

use super::{ChainAccess, SignedTransaction, TransactionIntent};
use crate::error::{LadderError, Result};

/// Connection settings for [`ChainClient`]
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub chain_id: u64,
    pub rpc_url: String,
    pub backup_rpc_urls: Vec<String>,
    pub rpc_timeout: Duration,
    pub receipt_poll: Duration,
}

impl From<&ladder_config::EngineConfig> for ClientConfig {
    fn from(config: &ladder_config::EngineConfig) -> Self {
        Self {
            chain_id: config.chain.chain_id,
            rpc_url: config.chain.rpc_url.clone(),
            backup_rpc_urls: config.chain.backup_rpc_urls.clone(),
            rpc_timeout: Duration::from_secs(config.chain.rpc_timeout_secs),
            receipt_poll: Duration::from_millis(config.execution.receipt_poll_ms),
        }
    }
}

/// RPC client with connection pooling, backup failover and local signing
pub struct ChainClient {
    config: ClientConfig,
    primary_provider: Arc<Provider<Http>>,
    backup_providers: Vec<Arc<Provider<Http>>>,
    wallet: LocalWallet,
}

impl ChainClient {
    /// Build providers for every configured RPC and bind the wallet to the chain
    pub fn new(config: ClientConfig, wallet: LocalWallet) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(5)
            .timeout(config.rpc_timeout)
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| LadderError::rpc(format!("Failed to create HTTP client: {}", e)))?;

        let connect = |raw: &str| -> Result<Arc<Provider<Http>>> {
            let url: Url = raw
                .parse()
                .map_err(|e| LadderError::config(format!("Invalid RPC URL '{}': {}", raw, e)))?;
            let transport = Http::new_with_client(url, http_client.clone());
            Ok(Arc::new(Provider::<Http>::new(transport)))
        };

        let primary_provider = connect(&config.rpc_url)?;
        let backup_providers = config
            .backup_rpc_urls
            .iter()
            .map(|url| connect(url))
            .collect::<Result<Vec<_>>>()?;

        let wallet = wallet.with_chain_id(config.chain_id);

        info!("🌐 Chain client ready for chain {}", config.chain_id);
        info!("   - Primary RPC: {}", redact(&config.rpc_url));
        info!("   - Backup RPCs: {}", backup_providers.len());
        info!("   - Sender: {:?}", wallet.address());

        Ok(Self {
            config,
            primary_provider,
            backup_providers,
            wallet,
        })
    }

    fn to_typed(&self, intent: &TransactionIntent, gas_price: U256) -> Result<TypedTransaction> {
        let nonce = intent
            .nonce
            .ok_or_else(|| LadderError::rpc("transaction has no nonce"))?;
        let gas = intent
            .gas_limit
            .ok_or_else(|| LadderError::rpc("transaction has no gas limit"))?;

        let request = TransactionRequest::new()
            .from(self.wallet.address())
            .to(intent.target)
            .data(intent.calldata.clone())
            .value(intent.value)
            .nonce(nonce)
            .gas(gas)
            .gas_price(gas_price)
            .chain_id(self.config.chain_id);
        Ok(request.into())
    }

    /// Sign at a known gas price; the hash is the keccak of the raw encoding
    fn sign_at(&self, intent: &TransactionIntent, gas_price: U256) -> Result<SignedTransaction> {
        let typed_tx = self.to_typed(intent, gas_price)?;
        let signature = self
            .wallet
            .sign_transaction_sync(&typed_tx)
            .map_err(|e| LadderError::rpc(format!("Signing failed: {}", e)))?;
        let raw = typed_tx.rlp_signed(&signature);
        let hash = H256::from(ethers::utils::keccak256(&raw));
        Ok(SignedTransaction {
            intent: intent.clone(),
            raw,
            hash,
        })
    }
}

/// How a node answered `eth_sendRawTransaction` with an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendFailure {
    /// The node already holds this exact transaction
    Known,
    /// The node may hold it, or another transaction at the same nonce
    Inconclusive,
    /// Refused outright
    Rejected,
}

/// `rpc_response` is false for transport failures, where the request may
/// still have reached the node
fn classify_send_error(message: &str, rpc_response: bool) -> SendFailure {
    const KNOWN: [&str; 3] = ["already known", "known transaction", "already imported"];
    const NONCE_TAKEN: [&str; 2] = ["nonce too low", "replacement transaction underpriced"];

    let message = message.to_ascii_lowercase();
    if KNOWN.iter().any(|m| message.contains(m)) {
        SendFailure::Known
    } else if !rpc_response || NONCE_TAKEN.iter().any(|m| message.contains(m)) {
        SendFailure::Inconclusive
    } else {
        SendFailure::Rejected
    }
}

#[async_trait]
impl ChainAccess for ChainClient {
    fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    fn sender(&self) -> Address {
        self.wallet.address()
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes> {
        let request: TypedTransaction = TransactionRequest::new().to(to).data(data).into();
        self.primary_provider
            .call(&request, None)
            .await
            .map_err(|e| LadderError::rpc(format!("eth_call to {:?} failed: {}", to, e)))
    }

    async fn estimate_gas(&self, intent: &TransactionIntent) -> Result<U256> {
        let request: TypedTransaction = TransactionRequest::new()
            .from(self.wallet.address())
            .to(intent.target)
            .data(intent.calldata.clone())
            .value(intent.value)
            .into();
        self.primary_provider
            .estimate_gas(&request, None)
            .await
            .map_err(|e| LadderError::rpc(format!("Gas estimation failed: {}", e)))
    }

    async fn pending_nonce(&self, address: Address) -> Result<u64> {
        let count = self
            .primary_provider
            .get_transaction_count(address, Some(BlockNumber::Pending.into()))
            .await
            .map_err(|e| LadderError::rpc(format!("Failed to fetch nonce: {}", e)))?;
        Ok(count.as_u64())
    }

    async fn gas_price(&self) -> Result<U256> {
        self.primary_provider
            .get_gas_price()
            .await
            .map_err(|e| LadderError::rpc(format!("Failed to fetch gas price: {}", e)))
    }

    async fn sign(&self, intent: &TransactionIntent) -> Result<SignedTransaction> {
        let gas_price = self.gas_price().await?;
        self.sign_at(intent, gas_price)
    }

    /// Primary first, then each backup until one accepts
    ///
    /// A timeout or transport error leaves the outcome open, as does a node
    /// reporting the nonce as taken; if no node accepts afterwards the result is
    /// [`LadderError::TransactionUnconfirmed`] rather than a rejection.
    async fn send_raw(&self, tx: &SignedTransaction) -> Result<H256> {
        let providers = std::iter::once(("primary".to_string(), &self.primary_provider)).chain(
            self.backup_providers
                .iter()
                .enumerate()
                .map(|(i, provider)| (format!("backup {}", i + 1), provider)),
        );

        let mut maybe_sent = false;
        for (label, provider) in providers {
            match timeout(
                self.config.rpc_timeout,
                provider.send_raw_transaction(tx.raw.clone()),
            )
            .await
            {
                Ok(Ok(pending_tx)) => {
                    debug!("Transaction accepted by {} RPC: {:?}", label, pending_tx.tx_hash());
                    return Ok(pending_tx.tx_hash());
                }
                Ok(Err(e)) => {
                    match classify_send_error(&e.to_string(), RpcError::as_error_response(&e).is_some()) {
                        SendFailure::Known => {
                            info!("Transaction {:?} already known to {} RPC", tx.hash, label);
                            return Ok(tx.hash);
                        }
                        SendFailure::Inconclusive => {
                            warn!("{} RPC send inconclusive: {}", label, e);
                            maybe_sent = true;
                        }
                        SendFailure::Rejected => warn!("{} RPC rejected transaction: {}", label, e),
                    }
                }
                Err(_) => {
                    warn!("{} RPC timed out sending {:?}", label, tx.hash);
                    maybe_sent = true;
                }
            }
        }

        if maybe_sent {
            Err(LadderError::TransactionUnconfirmed {
                tx_hash: tx.hash,
                reason: "no RPC acknowledged the send".to_string(),
            })
        } else {
            Err(LadderError::rpc("All RPC providers rejected the transaction"))
        }
    }

    async fn wait_for_receipt(
        &self,
        tx_hash: H256,
        wait: Duration,
    ) -> Result<TransactionReceipt> {
        debug!("⏳ Waiting for receipt of {:?}", tx_hash);
        let start_time = Instant::now();
        loop {
            if start_time.elapsed() > wait {
                return Err(LadderError::TransactionUnconfirmed {
                    tx_hash,
                    reason: format!("no receipt after {}s", wait.as_secs()),
                });
            }

            match self.primary_provider.get_transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => {
                    debug!(
                        "Receipt for {:?} in block {}",
                        tx_hash,
                        receipt.block_number.unwrap_or_default()
                    );
                    return Ok(receipt);
                }
                Ok(None) => {}
                Err(e) => warn!("Error checking transaction receipt: {}", e),
            }
            tokio::time::sleep(self.config.receipt_poll).await;
        }
    }
}

/// Hide path segments and query strings, which often carry API keys
fn redact(url: &str) -> String {
    match url.parse::<Url>() {
        Ok(parsed) => format!(
            "{}://{}",
            parsed.scheme(),
            parsed.host_str().unwrap_or("unknown")
        ),
        Err(_) => "<invalid url>".to_string(),
    }
}
