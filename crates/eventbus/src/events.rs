//! Event payloads carried by the bus

use serde::{Deserialize, Serialize};
use veilnet_core::{Earnings, HermesAddress, Identity, Promise};

/// Node process lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    Started,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatusEvent {
    pub status: NodeStatus,
}

/// On-chain registration state of an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationStatus {
    Unregistered,
    InProgress,
    Registered,
    RegistrationError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationEvent {
    pub identity: Identity,
    pub status: RegistrationStatus,
}

/// State of a provider service instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceStatus {
    NotRunning,
    Starting,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatusEvent {
    pub provider: Identity,
    pub status: ServiceStatus,
}

/// A new cumulative promise arrived from a consumer session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromiseReceivedEvent {
    pub provider: Identity,
    pub hermes: HermesAddress,
    pub promise: Promise,
}

/// Explicit request to settle a provider's promises now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementRequestEvent {
    pub provider: Identity,
    pub hermes: HermesAddress,
}

/// Published whenever a provider's earnings snapshot changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EarningsChangedEvent {
    pub identity: Identity,
    pub previous: Earnings,
    pub current: Earnings,
}
