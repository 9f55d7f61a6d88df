//! Wallet session: the shared state every ladder operation runs against
//!
//! A session is opened when a wallet connects and owns the nonce ledger, the
//! gas estimator and the decimals cache. Nothing here is global; dropping or
//! disconnecting the session discards all of it.

use ethers::signers::LocalWallet;
use ethers::types::Address;
use ladder_config::{EngineConfig, ExecutionConfig, WalletConfig};
use std::sync::Arc;
use tracing::info;

use crate::batch::{BatchSettings, BatchSubmitter};
use crate::chain::multicall::Multicall;
use crate::chain::ChainAccess;
use crate::error::{LadderError, Result};
use crate::resources::{secret, DecimalsCache, GasEstimator, NonceManager};

pub struct Session {
    chain: Arc<dyn ChainAccess>,
    nonces: NonceManager,
    gas: GasEstimator,
    decimals: DecimalsCache,
    multicall: Multicall,
    execution: ExecutionConfig,
}

impl Session {
    /// Open a session for the chain's sender
    pub fn connect(chain: Arc<dyn ChainAccess>, config: &EngineConfig) -> Self {
        let multicall = Multicall::default();
        let sender = chain.sender();
        let session = Self {
            nonces: NonceManager::new(chain.clone(), sender),
            gas: GasEstimator::from_config(chain.clone(), &config.gas),
            decimals: DecimalsCache::new(chain.clone(), multicall),
            multicall,
            execution: config.execution.clone(),
            chain,
        };
        info!(
            "🔗 Session opened for {:?} on chain {}",
            sender,
            session.chain.chain_id()
        );
        session
    }

    pub fn chain(&self) -> &Arc<dyn ChainAccess> {
        &self.chain
    }

    pub fn sender(&self) -> Address {
        self.chain.sender()
    }

    pub fn nonces(&self) -> &NonceManager {
        &self.nonces
    }

    pub fn gas(&self) -> &GasEstimator {
        &self.gas
    }

    pub fn decimals(&self) -> &DecimalsCache {
        &self.decimals
    }

    pub fn multicall(&self) -> Multicall {
        self.multicall
    }

    pub fn execution(&self) -> &ExecutionConfig {
        &self.execution
    }

    pub fn submitter(&self) -> BatchSubmitter<'_> {
        BatchSubmitter::new(
            self.chain.clone(),
            &self.nonces,
            &self.gas,
            BatchSettings::from(&self.execution),
        )
    }

    /// Tear down per-wallet state
    pub fn disconnect(&self) {
        self.nonces.reset();
        self.decimals.clear();
        info!("🔌 Session closed for {:?}", self.sender());
    }
}

/// Decrypt the configured key file into a signer
///
/// The password comes from the environment variable named in `[wallet]`.
pub fn load_wallet(config: &WalletConfig) -> Result<LocalWallet> {
    let path = config
        .encrypted_key_path
        .as_ref()
        .ok_or_else(|| LadderError::config("wallet.encrypted_key_path is not set"))?;
    let password = zeroize::Zeroizing::new(std::env::var(&config.password_env).map_err(|_| {
        LadderError::config(format!("{} is not set", config.password_env))
    })?);
    let private_key = secret::open_key_file(path, &password)?;
    let digits = private_key.strip_prefix("0x").unwrap_or(&private_key);
    digits
        .parse::<LocalWallet>()
        .map_err(|e| LadderError::Secret(secret::SecretError::InvalidKey(e.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::memory::InMemoryChain;
    use ethers::signers::Signer;

    fn config() -> EngineConfig {
        toml::from_str(
            r#"
            [chain]
            chain_id = 56
            rpc_url = "http://localhost:8545"

            [protocol]
            kind = "v3"
            position_manager = "0x7b8A01B39D58278b5DE7e48c8449c9f4F5170613"
            "#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_disconnect_resets_nonces() {
        let chain = Arc::new(InMemoryChain::new(56, Address::repeat_byte(5)));
        chain.set_pending_nonce(4);
        let session = Session::connect(chain.clone(), &config());
        session.nonces().allocate().await.unwrap().mark_broadcast();
        assert_eq!(session.nonces().pending_count(), 1);
        session.disconnect();
        assert_eq!(session.nonces().pending_count(), 0);
        assert_eq!(session.sender(), Address::repeat_byte(5));
    }

    #[test]
    fn test_load_wallet_from_encrypted_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet.key");
        let key = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
        secret::write_key_file(&path, key, "hunter2hunter2").unwrap();

        let env = "LADDER_TEST_WALLET_PASSWORD_SESSION";
        std::env::set_var(env, "hunter2hunter2");
        let wallet = load_wallet(&WalletConfig {
            encrypted_key_path: Some(path),
            password_env: env.to_string(),
        })
        .unwrap();
        assert_eq!(
            format!("{:?}", wallet.address()),
            "0x2c7536e3605d9c16a7a3d7b1898e529396a65c23"
        );
    }
}
