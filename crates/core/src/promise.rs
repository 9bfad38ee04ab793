//! Payment promises and earnings snapshots
//!
//! A promise is a signed, cumulative off-chain payment authorization from a
//! consumer, redeemable against the hermes escrow contract. Each new promise
//! for a (provider, hermes) pair supersedes all earlier ones; `amount` never
//! decreases for a fixed pair.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::HermesAddress;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("invalid r preimage hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

/// Cumulative payment promise, ready for on-chain submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Promise {
    /// Escrow channel this promise draws from.
    pub channel_id: Vec<u8>,
    /// Cumulative amount authorized so far.
    pub amount: u64,
    /// Escrow contract the promise is redeemable against.
    pub hermes: HermesAddress,
    /// Hashlock preimage, raw bytes.
    pub r: Vec<u8>,
    /// Consumer signature over the promise.
    pub signature: Vec<u8>,
}

/// Promise as persisted by the ledger.
///
/// The ledger stores the `r` preimage hex-encoded; [`PromiseRecord::decode_r`]
/// produces the submission-ready [`Promise`] with raw bytes. Decode once at
/// the engine boundary; the raw and hex forms are never kept side by side.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromiseRecord {
    pub promise: Promise,
    pub r: String,
}

impl PromiseRecord {
    /// Decode the hex `r` preimage into the promise.
    pub fn decode_r(self) -> Result<Promise, DecodeError> {
        let raw = hex::decode(&self.r)?;
        let mut promise = self.promise;
        promise.r = raw;
        Ok(promise)
    }
}

/// Snapshot of a provider's earnings, derived from channel and promise state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Earnings {
    /// Everything the provider has ever been promised.
    pub lifetime_balance: u64,
    /// Promised but not yet settled on-chain.
    pub unsettled_balance: u64,
}
