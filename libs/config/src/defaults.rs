//! Engine defaults
//!
//! Default values used when a configuration file leaves a key out.

/// Chain connection defaults
pub mod chain {
    /// Per-request RPC timeout (seconds)
    pub const RPC_TIMEOUT_SECS: u64 = 30;
}

/// Transaction execution defaults
pub mod execution {
    use rust_decimal::Decimal;

    /// Slippage tolerance applied to mint minimums and V4 maximums (0.5%)
    pub const SLIPPAGE_PERCENT: Decimal = Decimal::from_parts(5, 0, 0, false, 1);

    /// Position operations packed into one transaction
    pub const MAX_POSITIONS_PER_TX: usize = 7;

    /// Mint deadline offset from now (seconds)
    pub const DEADLINE_SECS: u64 = 3600;

    /// Buffer on the live gas estimate of a batch transaction
    pub const BATCH_GAS_BUFFER_PERCENT: u64 = 30;

    /// How long to wait for a receipt before giving up (seconds)
    pub const RECEIPT_TIMEOUT_SECS: u64 = 300;

    /// Receipt polling interval (milliseconds)
    pub const RECEIPT_POLL_MS: u64 = 500;

    /// Upper bound on joining a ladder task (seconds)
    pub const JOIN_TIMEOUT_SECS: u64 = 900;
}

/// Gas estimation defaults
pub mod gas {
    /// Buffer on single-call estimates
    pub const ESTIMATE_BUFFER_PERCENT: u64 = 20;

    /// Hard cap on any single gas limit
    pub const MAX_GAS_LIMIT: u64 = 10_000_000;
}

/// Wallet defaults
pub mod wallet {
    /// Environment variable holding the keystore password
    pub const PASSWORD_ENV: &str = "LADDER_WALLET_PASSWORD";
}

/// Logging defaults
pub mod logging {
    pub const LEVEL: &str = "info";
}
