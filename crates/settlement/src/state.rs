//! Per-provider settlement state and the settlement policy
//!
//! `SettlementState` merges the last chain view of the escrow channel with
//! the last promise received for the provider. All derived balances are
//! computed on demand and every subtraction saturates at zero: a fresh
//! promise can briefly exceed the on-chain settled+balance while the chain
//! catches up, and that must read as "nothing left", not as a wrap-around.

use veilnet_core::{clamp_u64, Earnings, Identity, Promise};

/// Mirror of the provider's escrow channel on chain. Fields are `None` when
/// the chain has no value for them yet (unregistered or empty channel).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderChannel {
    /// Unsettled escrow remaining in the channel.
    pub balance: Option<u128>,
    /// Cumulative amount already paid out to the beneficiary.
    pub settled: Option<u128>,
    /// Account receiving settled funds, if set on chain.
    pub beneficiary: Option<Identity>,
}

/// In-memory settlement state for one provider identity.
#[derive(Debug, Clone, Default)]
pub struct SettlementState {
    pub channel: ProviderChannel,
    pub last_promise: Promise,
    /// Reentrancy guard: true while a settlement is in flight.
    pub settle_in_progress: bool,
    /// Provider is registered on chain; unregistered providers never settle.
    pub registered: bool,
}

impl SettlementState {
    fn channel_balance(&self) -> u64 {
        clamp_u64(self.channel.balance.unwrap_or(0))
    }

    fn settled(&self) -> u64 {
        clamp_u64(self.channel.settled.unwrap_or(0))
    }

    /// Everything the provider has ever been promised.
    pub fn lifetime_balance(&self) -> u64 {
        self.last_promise.amount
    }

    /// Promised but not yet settled on chain.
    pub fn unsettled_balance(&self) -> u64 {
        self.last_promise.amount.saturating_sub(self.settled())
    }

    /// Total escrow the channel has ever held: remaining plus paid out.
    pub fn available_balance(&self) -> u64 {
        self.channel_balance().saturating_add(self.settled())
    }

    /// Escrow still coverable after honoring the latest promise.
    pub fn balance(&self) -> u64 {
        self.available_balance().saturating_sub(self.last_promise.amount)
    }

    /// Decide whether this provider should settle now.
    ///
    /// Settlement costs a fee, so it only pays off once enough has been
    /// earned (`unsettled >= threshold * available`); it becomes urgent once
    /// the remaining escrow dips below the same line (`balance < threshold *
    /// available`), because the consumer could otherwise drain the channel
    /// before the settlement lands.
    pub fn needs_settling(&self, threshold: f64) -> bool {
        if !self.registered {
            return false;
        }
        if self.settle_in_progress {
            return false;
        }

        let calculated_threshold = threshold * self.available_balance() as f64;
        if (self.unsettled_balance() as f64) < calculated_threshold {
            return false;
        }

        (self.balance() as f64) < calculated_threshold
    }

    /// Earnings snapshot for event payloads and API reads.
    pub fn earnings(&self) -> Earnings {
        Earnings {
            lifetime_balance: self.lifetime_balance(),
            unsettled_balance: self.unsettled_balance(),
        }
    }
}
