//! # Ladder Engine - Concentrated Liquidity Ladder Execution
//!
//! ## Purpose
//!
//! Builds ladders of concentrated-liquidity positions on V3 and V4 pools and
//! submits them on-chain: pool validation, balance and allowance checks, batched
//! mints with per-batch failure attribution, and position closing.
//!
//! ## Integration Points
//!
//! - **Input Sources**: [`ladder_amm::LadderSpec`] from the operator, pool state over RPC
//! - **Output Destinations**: mint/close transactions, [`batch::LadderResult`] per operation
//! - **Configuration**: [`ladder_config::EngineConfig`] selects the protocol once at startup
//! - **Shared State**: [`session::Session`] owns the nonce ledger and decimals cache
//!
//! ## Architecture Role
//!
//! ```text
//! EngineConfig ──► Provider::{V3, V4} ─┐
//!                                      ├─► LadderTask ──► BatchSubmitter ──► ChainAccess
//! ChainClient ───► Session ────────────┘        │               │
//!                   (nonces, gas, decimals)  progress      nonce + gas per tx
//! ```

pub mod logging;

pub mod batch;
pub mod chain;
pub mod error;
pub mod protocol;
pub mod quote;
pub mod resources;
pub mod session;
pub mod task;

pub use batch::{BatchOutcome, BatchProgress, LadderResult};
pub use chain::{ChainAccess, ChainClient, TransactionIntent, TxKind};
pub use error::{LadderError, Result};
pub use protocol::{LadderContext, LiquidityProvider, Provider};
pub use quote::{Quote, QuoteRouter, QuoteSource, V2RouterQuote};
pub use session::Session;
pub use task::{LadderTask, TaskEvent};
