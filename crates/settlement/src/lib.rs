//! Veilnet Settlement
//!
//! Provider-side engine that turns streaming payment promises into on-chain
//! settlement transactions against the hermes escrow contract.
//!
//! ## Flow
//!
//! 1. Consumer sessions deposit cumulative promises into the ledger and
//!    announce them on the event bus.
//! 2. The settler mirrors on-chain channel state per provider and re-runs a
//!    pure threshold policy on every promise.
//! 3. When the remaining escrow dips below the threshold, a settlement is
//!    queued, submitted through the transactor, and confirmed by watching
//!    the contract's `PromiseSettled` event stream.
//! 4. On confirmation the settlement is recorded in history and the channel
//!    view is re-synced from chain.
//!
//! At most one settlement is in flight per provider; a reentrancy flag in
//! the per-provider state rejects concurrent attempts. Confirmation waits
//! are bounded by `max_wait_for_settlement`.

mod config;
mod contracts;
mod history;
mod settler;
mod state;

pub use config::SettlerConfig;
pub use contracts::{
    AccountProvider, PromiseSettled, PromiseStorage, ProviderChannelStatus,
    RegistrationStatusProvider, SettleFees, SettlementHistoryStorage, Transactor,
};
pub use history::{InMemoryHistory, SettlementHistoryEntry};
pub use settler::{PromiseSettler, SettlerDependencies};
pub use state::{ProviderChannel, SettlementState};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettlementError {
    #[error("nothing to settle for the given provider")]
    NothingToSettle,

    #[error("provider already has a settlement in progress")]
    AlreadyInProgress,

    #[error("settlement confirmation timed out")]
    SettleTimeout,

    #[error("chain error: {0}")]
    Chain(String),

    #[error("invalid promise preimage: {0}")]
    Decode(#[from] veilnet_core::DecodeError),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("resync failed: {0}")]
    Resync(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, SettlementError>;
