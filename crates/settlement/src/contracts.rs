//! Collaborator contracts
//!
//! The settler talks to the rest of the node through these seams: the
//! session subsystem's promise ledger, the chain view, the transactor that
//! submits settlement transactions, the registration oracle, the history
//! store, and the keystore. Everything is injected at construction; the
//! engine owns no RPC transport of its own.

use async_trait::async_trait;
use tokio::sync::mpsc;

use veilnet_core::{HermesAddress, Identity, Promise, PromiseRecord, TxHash};
use veilnet_eventbus::RegistrationStatus;
use veilnet_keystore::Keystore;

use crate::history::SettlementHistoryEntry;
use crate::state::ProviderChannel;
use crate::Result;

/// `PromiseSettled` event as delivered by the escrow contract. All three
/// fields are persisted verbatim into settlement history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromiseSettled {
    pub tx_hash: TxHash,
    pub amount: u64,
    pub total_settled: u64,
}

/// Current transactor fee quote for settlement transactions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SettleFees {
    pub fee: u64,
}

/// Read access to the promise ledger. The ledger is written by the session
/// subsystem; the settler only ever reads the latest cumulative promise.
#[async_trait]
pub trait PromiseStorage: Send + Sync {
    async fn latest_promise(
        &self,
        provider: Identity,
        hermes: HermesAddress,
    ) -> Result<Option<PromiseRecord>>;
}

/// View of on-chain escrow channel state.
#[async_trait]
pub trait ProviderChannelStatus: Send + Sync {
    /// Fetch the provider's channel. With `include_pending` the returned
    /// balances include mempool state.
    async fn provider_channel(
        &self,
        hermes: HermesAddress,
        provider: Identity,
        include_pending: bool,
    ) -> Result<ProviderChannel>;

    /// Current hermes fee in basis points.
    async fn hermes_fee(&self, hermes: HermesAddress) -> Result<u16>;

    /// Stream of `PromiseSettled` events for the pair. Dropping the
    /// receiver cancels the subscription.
    async fn subscribe_to_promise_settled(
        &self,
        provider: Identity,
        hermes: HermesAddress,
    ) -> Result<mpsc::Receiver<PromiseSettled>>;
}

/// Submits settlement transactions on the provider's behalf.
#[async_trait]
pub trait Transactor: Send + Sync {
    async fn fetch_settle_fees(&self) -> Result<SettleFees>;

    /// Settle the promise and top the channel back up in one transaction.
    async fn settle_and_rebalance(
        &self,
        hermes: HermesAddress,
        provider: Identity,
        promise: Promise,
    ) -> Result<()>;

    /// Settle the promise, paying out to an explicit beneficiary.
    async fn settle_with_beneficiary(
        &self,
        provider: Identity,
        beneficiary: Identity,
        hermes: HermesAddress,
        promise: Promise,
    ) -> Result<()>;
}

/// On-chain registration status of a local identity.
#[async_trait]
pub trait RegistrationStatusProvider: Send + Sync {
    async fn registration_status(&self, id: Identity) -> Result<RegistrationStatus>;
}

/// Append-only record of completed settlements.
#[async_trait]
pub trait SettlementHistoryStorage: Send + Sync {
    async fn store(
        &self,
        provider: Identity,
        hermes: HermesAddress,
        entry: SettlementHistoryEntry,
    ) -> Result<()>;
}

/// The node's local accounts, read once at start.
pub trait AccountProvider: Send + Sync {
    fn accounts(&self) -> Vec<Identity>;
}

impl AccountProvider for Keystore {
    fn accounts(&self) -> Vec<Identity> {
        Keystore::accounts(self).into_iter().map(|a| a.address).collect()
    }
}
