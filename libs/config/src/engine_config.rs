//! Engine Configuration Module
//!
//! Loads the ladder engine configuration from a TOML file, an optional
//! environment-specific overlay and `LADDER_` environment variables.

use anyhow::{bail, Context, Result};
use config_crate::{Config, Environment, File};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::defaults;

/// Main engine configuration structure
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EngineConfig {
    pub chain: ChainConfig,

    /// Target protocol, V3 or V4
    pub protocol: ProtocolConfig,

    #[serde(default)]
    pub execution: ExecutionConfig,

    #[serde(default)]
    pub gas: GasConfig,

    #[serde(default)]
    pub wallet: WalletConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// RPC endpoints for the one chain this engine talks to
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub rpc_url: String,
    #[serde(default)]
    pub backup_rpc_urls: Vec<String>,
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_secs: u64,
    /// Wrapped native token, used as the intermediate hop for V2 quotes
    pub wrapped_native: Option<String>,
    /// V2-style router used as an on-chain quote source
    pub v2_router: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProtocolConfig {
    V3(V3Settings),
    V4(V4Settings),
}

/// Which V3 implementation the position manager belongs to
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum V3Flavor {
    #[default]
    UniswapV3,
    PancakeV3,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct V3Settings {
    pub position_manager: String,
    /// Required when the position manager is not a known deployment
    pub factory: Option<String>,
    /// Decides the slot0 return layout
    #[serde(default, alias = "slot0_layout")]
    pub flavor: V3Flavor,
}

/// V4-family deployment; the two use incompatible pool keys
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum V4Flavor {
    #[default]
    Uniswap,
    Pancakeswap,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
pub struct V4Settings {
    #[serde(default)]
    pub deployment: V4Flavor,
    /// Address overrides; unset entries fall back to the known deployment for the chain
    pub position_manager: Option<String>,
    pub pool_manager: Option<String>,
    pub state_view: Option<String>,
    pub permit2: Option<String>,
    pub hooks: Option<String>,
    /// Expected pool id, verified against the id derived from the pool key
    pub pool_id: Option<String>,
    /// Initialize the pool when it does not exist yet
    #[serde(default)]
    pub create_pool_if_missing: bool,
}

/// Transaction execution settings
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ExecutionConfig {
    pub slippage_percent: Decimal,
    pub max_positions_per_tx: usize,
    pub deadline_secs: u64,
    pub gas_buffer_percent: u64,
    pub receipt_timeout_secs: u64,
    pub receipt_poll_ms: u64,
    pub join_timeout_secs: u64,
    /// Burn the NFT after collecting when closing positions
    pub burn_on_close: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct GasConfig {
    pub estimate_buffer_percent: u64,
    pub max_gas_limit: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct WalletConfig {
    pub encrypted_key_path: Option<PathBuf>,
    /// Environment variable read for the keystore password
    pub password_env: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

fn default_rpc_timeout() -> u64 {
    defaults::chain::RPC_TIMEOUT_SECS
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            slippage_percent: defaults::execution::SLIPPAGE_PERCENT,
            max_positions_per_tx: defaults::execution::MAX_POSITIONS_PER_TX,
            deadline_secs: defaults::execution::DEADLINE_SECS,
            gas_buffer_percent: defaults::execution::BATCH_GAS_BUFFER_PERCENT,
            receipt_timeout_secs: defaults::execution::RECEIPT_TIMEOUT_SECS,
            receipt_poll_ms: defaults::execution::RECEIPT_POLL_MS,
            join_timeout_secs: defaults::execution::JOIN_TIMEOUT_SECS,
            burn_on_close: false,
        }
    }
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            estimate_buffer_percent: defaults::gas::ESTIMATE_BUFFER_PERCENT,
            max_gas_limit: defaults::gas::MAX_GAS_LIMIT,
        }
    }
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            encrypted_key_path: None,
            password_env: defaults::wallet::PASSWORD_ENV.to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::logging::LEVEL.to_string(),
            json: false,
        }
    }
}

impl EngineConfig {
    /// Load configuration from files with environment overrides
    ///
    /// `environment` names an overlay at `<base dir>/environments/<name>.toml`.
    pub fn load(base_path: &Path, environment: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder().add_source(File::from(base_path).required(true));

        if let Some(env) = environment {
            let env_file = base_path
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join("environments")
                .join(format!("{}.toml", env));

            if env_file.exists() {
                info!("Loading environment config: {:?}", env_file);
                builder = builder.add_source(File::from(env_file));
            } else {
                warn!("Environment config not found: {:?}", env_file);
            }
        }

        // LADDER_CHAIN__RPC_URL overrides chain.rpc_url
        builder = builder.add_source(
            Environment::with_prefix("LADDER")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("chain.backup_rpc_urls")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Expand `${VAR}` and `~` in RPC URLs and key paths
    pub fn expand_env_vars(&mut self) -> Result<()> {
        self.chain.rpc_url = shellexpand::env(&self.chain.rpc_url)
            .context("Failed to expand RPC URL")?
            .to_string();

        for url in &mut self.chain.backup_rpc_urls {
            *url = shellexpand::env(url)
                .context("Failed to expand backup RPC URL")?
                .to_string();
        }

        if let Some(path) = &self.wallet.encrypted_key_path {
            let raw = path.to_string_lossy();
            let expanded = shellexpand::full(&raw).context("Failed to expand key path")?;
            self.wallet.encrypted_key_path = Some(PathBuf::from(expanded.as_ref()));
        }

        Ok(())
    }

    /// Reject configurations that cannot produce a safe transaction
    pub fn validate(&self) -> Result<()> {
        if self.chain.chain_id == 0 {
            bail!("chain.chain_id must be non-zero");
        }
        for url in std::iter::once(&self.chain.rpc_url).chain(&self.chain.backup_rpc_urls) {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                bail!("RPC URL '{}' must be http(s)", url);
            }
        }
        if let Some(address) = &self.chain.wrapped_native {
            check_address("chain.wrapped_native", address)?;
        }
        if let Some(address) = &self.chain.v2_router {
            check_address("chain.v2_router", address)?;
        }

        match &self.protocol {
            ProtocolConfig::V3(v3) => {
                check_address("protocol.position_manager", &v3.position_manager)?;
                if let Some(factory) = &v3.factory {
                    check_address("protocol.factory", factory)?;
                }
            }
            ProtocolConfig::V4(v4) => {
                let overrides = [
                    ("protocol.position_manager", &v4.position_manager),
                    ("protocol.pool_manager", &v4.pool_manager),
                    ("protocol.state_view", &v4.state_view),
                    ("protocol.permit2", &v4.permit2),
                    ("protocol.hooks", &v4.hooks),
                ];
                for (key, value) in overrides {
                    if let Some(address) = value {
                        check_address(key, address)?;
                    }
                }
                if let Some(pool_id) = &v4.pool_id {
                    check_hex_bytes("protocol.pool_id", pool_id, 32)?;
                }
            }
        }

        let execution = &self.execution;
        if execution.slippage_percent < Decimal::ZERO || execution.slippage_percent > Decimal::from(50) {
            bail!(
                "execution.slippage_percent {} outside 0..=50",
                execution.slippage_percent
            );
        }
        if execution.max_positions_per_tx == 0 || execution.max_positions_per_tx > 50 {
            bail!(
                "execution.max_positions_per_tx {} outside 1..=50",
                execution.max_positions_per_tx
            );
        }
        if execution.receipt_poll_ms == 0 {
            bail!("execution.receipt_poll_ms must be non-zero");
        }
        if self.gas.max_gas_limit < 21_000 {
            bail!("gas.max_gas_limit {} below intrinsic gas", self.gas.max_gas_limit);
        }

        debug!("Configuration validated for chain {}", self.chain.chain_id);
        Ok(())
    }

    /// Write the configuration as TOML
    pub fn save(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self).context("Failed to serialize configuration")?;
        std::fs::write(path, text)
            .with_context(|| format!("Failed to write configuration to {:?}", path))
    }
}

fn check_address(key: &str, value: &str) -> Result<()> {
    check_hex_bytes(key, value, 20)
}

fn check_hex_bytes(key: &str, value: &str, len: usize) -> Result<()> {
    let stripped = value
        .strip_prefix("0x")
        .with_context(|| format!("{} '{}' must start with 0x", key, value))?;
    let bytes = hex::decode(stripped).with_context(|| format!("{} '{}' is not hex", key, value))?;
    if bytes.len() != len {
        bail!("{} '{}' must be {} bytes, got {}", key, value, len, bytes.len());
    }
    Ok(())
}

/// Load, expand and validate in one step
pub fn load_config(path: &Path, environment: Option<&str>) -> Result<EngineConfig> {
    let mut config = EngineConfig::load(path, environment)?;
    config.expand_env_vars()?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::fs;
    use tempfile::tempdir;

    const V3_CONFIG: &str = r#"
[chain]
chain_id = 56
rpc_url = "https://bsc-dataseed.binance.org"
backup_rpc_urls = ["https://bsc-dataseed1.defibit.io"]

[protocol]
kind = "v3"
position_manager = "0x46A15B0b27311cedF172AB29E4f4766fbE7F4364"
flavor = "pancake_v3"

[execution]
slippage_percent = 1.5
max_positions_per_tx = 5

[logging]
level = "debug"
"#;

    #[test]
    fn test_load_base_config() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("engine.toml");
        fs::write(&config_path, V3_CONFIG).unwrap();

        let config = EngineConfig::load(&config_path, None).unwrap();

        assert_eq!(config.chain.chain_id, 56);
        assert_eq!(config.chain.backup_rpc_urls.len(), 1);
        assert_eq!(config.chain.rpc_timeout_secs, defaults::chain::RPC_TIMEOUT_SECS);
        assert_eq!(config.execution.slippage_percent, dec!(1.5));
        assert_eq!(config.execution.max_positions_per_tx, 5);
        assert_eq!(config.execution.deadline_secs, 3600);
        assert_eq!(config.logging.level, "debug");
        assert!(!config.logging.json);

        match &config.protocol {
            ProtocolConfig::V3(v3) => {
                assert_eq!(v3.flavor, V3Flavor::PancakeV3);
                assert!(v3.factory.is_none());
            }
            other => panic!("expected v3, got {:?}", other),
        }
        config.validate().unwrap();
    }

    #[test]
    fn test_environment_overlay() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("engine.toml");
        fs::write(&config_path, V3_CONFIG).unwrap();
        fs::create_dir(dir.path().join("environments")).unwrap();
        fs::write(
            dir.path().join("environments").join("staging.toml"),
            "[execution]\nreceipt_timeout_secs = 42\n",
        )
        .unwrap();

        let config = EngineConfig::load(&config_path, Some("staging")).unwrap();
        assert_eq!(config.execution.receipt_timeout_secs, 42);
        // untouched keys from the base survive
        assert_eq!(config.execution.max_positions_per_tx, 5);

        let missing = EngineConfig::load(&config_path, Some("nowhere")).unwrap();
        assert_eq!(
            missing.execution.receipt_timeout_secs,
            defaults::execution::RECEIPT_TIMEOUT_SECS
        );
    }

    #[test]
    fn test_v4_config_with_overrides() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("engine.toml");
        fs::write(
            &config_path,
            r#"
[chain]
chain_id = 8453
rpc_url = "https://mainnet.base.org"

[protocol]
kind = "v4"
deployment = "pancakeswap"
pool_id = "0x00000000000000000000000000000000000000000000000000000000000000aa"
"#,
        )
        .unwrap();

        let config = load_config(&config_path, None).unwrap();
        match config.protocol {
            ProtocolConfig::V4(v4) => {
                assert_eq!(v4.deployment, V4Flavor::Pancakeswap);
                assert!(v4.position_manager.is_none());
                assert!(!v4.create_pool_if_missing);
            }
            other => panic!("expected v4, got {:?}", other),
        }
    }

    #[test]
    fn test_rpc_url_expansion() {
        std::env::set_var("LADDER_TEST_RPC_KEY", "secret-key");
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("engine.toml");
        fs::write(
            &config_path,
            V3_CONFIG.replace(
                "https://bsc-dataseed.binance.org",
                "https://rpc.example.org/${LADDER_TEST_RPC_KEY}",
            ),
        )
        .unwrap();

        let config = load_config(&config_path, None).unwrap();
        assert_eq!(config.chain.rpc_url, "https://rpc.example.org/secret-key");
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("engine.toml");
        fs::write(&config_path, V3_CONFIG).unwrap();
        let base = EngineConfig::load(&config_path, None).unwrap();

        let mut bad_slippage = base.clone();
        bad_slippage.execution.slippage_percent = dec!(75);
        assert!(bad_slippage.validate().is_err());

        let mut bad_batch = base.clone();
        bad_batch.execution.max_positions_per_tx = 0;
        assert!(bad_batch.validate().is_err());

        let mut bad_rpc = base.clone();
        bad_rpc.chain.rpc_url = "ws://localhost:8546".to_string();
        assert!(bad_rpc.validate().is_err());

        let mut bad_address = base;
        bad_address.protocol = ProtocolConfig::V3(V3Settings {
            position_manager: "0x1234".to_string(),
            factory: None,
            flavor: V3Flavor::UniswapV3,
        });
        assert!(bad_address.validate().is_err());
    }

    #[test]
    fn test_save_round_trip() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("engine.toml");
        fs::write(&config_path, V3_CONFIG).unwrap();
        let config = EngineConfig::load(&config_path, None).unwrap();

        let saved_path = dir.path().join("saved.toml");
        config.save(&saved_path).unwrap();
        let reloaded = EngineConfig::load(&saved_path, None).unwrap();
        assert_eq!(reloaded.protocol, config.protocol);
        assert_eq!(reloaded.chain.rpc_url, config.chain.rpc_url);
    }

    #[test]
    fn test_slot0_layout_key_selects_flavor() {
        let settings: V3Settings = toml::from_str(
            r#"
position_manager = "0x46A15B0b27311cedF172AB29E4f4766fbE7F4364"
slot0_layout = "pancake_v3"
"#,
        )
        .unwrap();
        assert_eq!(settings.flavor, V3Flavor::PancakeV3);
    }

    #[test]
    fn test_missing_file_fails() {
        let dir = tempdir().unwrap();
        assert!(EngineConfig::load(&dir.path().join("absent.toml"), None).is_err());
    }
}
