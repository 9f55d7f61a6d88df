//! Transactional resources shared across ladder operations
//!
//! - [`nonce::NonceManager`]: gap-free nonce allocation per wallet
//! - [`gas::GasEstimator`]: buffered estimates with per-kind fallback
//! - [`decimals::DecimalsCache`]: token decimals and pair tick offsets
//! - [`secret`]: private key encryption at rest

pub mod decimals;
pub mod gas;
pub mod nonce;
pub mod secret;

pub use decimals::DecimalsCache;
pub use gas::GasEstimator;
pub use nonce::{NonceManager, NonceReservation};
pub use secret::SecretError;
