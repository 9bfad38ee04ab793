//! Settlement history
//!
//! One entry per confirmed settlement, written after the chain delivers the
//! `PromiseSettled` event. A write failure is never fatal to the settlement
//! itself; the chain holds the authoritative record.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use veilnet_core::{HermesAddress, Identity, Promise, TxHash};

use crate::contracts::SettlementHistoryStorage;
use crate::Result;

/// Record of one completed settlement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementHistoryEntry {
    pub tx_hash: TxHash,
    /// Promise that was submitted on chain.
    pub promise: Promise,
    /// Amount transferred by this settlement.
    pub amount: u64,
    /// Cumulative settled total after this settlement.
    pub total_settled: u64,
    /// Set when the settlement paid out to an explicit beneficiary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub beneficiary: Option<Identity>,
}

/// Entries retained per (provider, hermes) pair.
const DEFAULT_CAP: usize = 1000;

/// In-memory history store. Keeps the most recent entries per pair and
/// drops the oldest past the cap.
#[derive(Debug, Default)]
pub struct InMemoryHistory {
    entries: RwLock<HashMap<(Identity, HermesAddress), Vec<SettlementHistoryEntry>>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries recorded for the pair, oldest first.
    pub fn list(&self, provider: Identity, hermes: HermesAddress) -> Vec<SettlementHistoryEntry> {
        let entries = self.entries.read().expect("history lock poisoned");
        entries.get(&(provider, hermes)).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl SettlementHistoryStorage for InMemoryHistory {
    async fn store(
        &self,
        provider: Identity,
        hermes: HermesAddress,
        entry: SettlementHistoryEntry,
    ) -> Result<()> {
        let mut entries = self.entries.write().expect("history lock poisoned");
        let list = entries.entry((provider, hermes)).or_default();
        list.push(entry);
        if list.len() > DEFAULT_CAP {
            list.remove(0);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(amount: u64) -> SettlementHistoryEntry {
        SettlementHistoryEntry {
            tx_hash: TxHash::from_bytes([1u8; 32]),
            promise: Promise { amount, ..Default::default() },
            amount,
            total_settled: amount,
            beneficiary: None,
        }
    }

    #[tokio::test]
    async fn test_store_and_list() {
        let history = InMemoryHistory::new();
        let provider = Identity::from_bytes([1u8; 20]);
        let hermes = HermesAddress::from_bytes([2u8; 20]);

        history.store(provider, hermes, entry(10)).await.unwrap();
        history.store(provider, hermes, entry(25)).await.unwrap();

        let listed = history.list(provider, hermes);
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].amount, 10);
        assert_eq!(listed[1].amount, 25);
    }

    #[tokio::test]
    async fn test_pairs_are_isolated() {
        let history = InMemoryHistory::new();
        let provider = Identity::from_bytes([1u8; 20]);
        let hermes_a = HermesAddress::from_bytes([2u8; 20]);
        let hermes_b = HermesAddress::from_bytes([3u8; 20]);

        history.store(provider, hermes_a, entry(10)).await.unwrap();

        assert_eq!(history.list(provider, hermes_a).len(), 1);
        assert!(history.list(provider, hermes_b).is_empty());
    }

    #[tokio::test]
    async fn test_cap_drops_oldest() {
        let history = InMemoryHistory::new();
        let provider = Identity::from_bytes([1u8; 20]);
        let hermes = HermesAddress::from_bytes([2u8; 20]);

        for amount in 0..=DEFAULT_CAP as u64 {
            history.store(provider, hermes, entry(amount)).await.unwrap();
        }

        let listed = history.list(provider, hermes);
        assert_eq!(listed.len(), DEFAULT_CAP);
        // Entry 0 was evicted.
        assert_eq!(listed[0].amount, 1);
    }

    #[test]
    fn test_entry_serialization_omits_empty_beneficiary() {
        let json = serde_json::to_string(&entry(5)).unwrap();
        assert!(!json.contains("beneficiary"));

        let with_beneficiary = SettlementHistoryEntry {
            beneficiary: Some(Identity::from_bytes([9u8; 20])),
            ..entry(5)
        };
        let json = serde_json::to_string(&with_beneficiary).unwrap();
        assert!(json.contains("beneficiary"));
    }
}
