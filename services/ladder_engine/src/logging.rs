//! Standardized emoji logging for ladder engine modules
//!
//! Provides consistent emoji usage across the engine so operator-facing lines
//! read the same in every component.

use tracing_subscriber::EnvFilter;

/// Standard emoji set for ladder engine logging
pub struct LogEmoji;

impl LogEmoji {
    // Status indicators
    pub const SUCCESS: &'static str = "✅"; // Operation succeeded
    pub const ERROR: &'static str = "❌"; // Operation failed
    pub const WARNING: &'static str = "⚠️"; // Warning or caution

    // Module-specific
    pub const CHART: &'static str = "📊"; // Distribution/statistics
    pub const EXECUTE: &'static str = "⚡"; // Transaction submission
    pub const NETWORK: &'static str = "🌐"; // RPC/chain access
    pub const POOL: &'static str = "🏊"; // Pool state
    pub const GAS: &'static str = "⛽"; // Gas estimates
    pub const KEY: &'static str = "🔐"; // Key storage

    // Position lifecycle
    pub const MINT: &'static str = "➕"; // Position minted
    pub const BURN: &'static str = "➖"; // Position closed
}

// Convenience macros for standardized logging
#[macro_export]
macro_rules! log_success {
    ($($arg:tt)*) => {
        tracing::info!("{} {}", $crate::logging::LogEmoji::SUCCESS, format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        tracing::error!("{} {}", $crate::logging::LogEmoji::ERROR, format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_metrics {
    ($($arg:tt)*) => {
        tracing::info!("{} {}", $crate::logging::LogEmoji::CHART, format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_execution {
    ($($arg:tt)*) => {
        tracing::info!("{} {}", $crate::logging::LogEmoji::EXECUTE, format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_chain {
    ($($arg:tt)*) => {
        tracing::info!("{} {}", $crate::logging::LogEmoji::NETWORK, format!($($arg)*))
    };
}

/// Install the global subscriber
///
/// `RUST_LOG` wins over `level` when set.
pub fn init_tracing(level: &str, json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder
            .json()
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))
    } else {
        builder
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))
    }
}
