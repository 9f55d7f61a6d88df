//! # Ladder Engine Configuration
//!
//! Configuration loading and defaults for the ladder engine.
//!
//! ## Features
//!
//! - **Layered Loading**: base TOML file, optional environment overlay, `LADDER_` env vars
//! - **Expansion**: `${VAR}` in RPC URLs, `~` and `${VAR}` in key paths
//! - **Validation**: addresses, URLs and execution bounds checked before any chain access
//!
//! ## Usage
//!
//! ```no_run
//! use ladder_config::{load_config, ProtocolConfig};
//! use std::path::Path;
//!
//! let config = load_config(Path::new("config/engine.toml"), Some("staging"))?;
//! if let ProtocolConfig::V4(v4) = &config.protocol {
//!     println!("V4 deployment: {:?}", v4.deployment);
//! }
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod defaults;
pub mod engine_config;

// Re-export commonly used types
pub use engine_config::{
    load_config, ChainConfig, EngineConfig, ExecutionConfig, GasConfig, LoggingConfig,
    ProtocolConfig, V3Flavor, V3Settings, V4Flavor, V4Settings, WalletConfig,
};
