//! Veilnet Event Bus
//!
//! Typed in-process pub/sub connecting the node's subsystems. Each topic is
//! its own broadcast channel, so subscribers state the payload type they
//! expect at compile time and publishers never block: a publish with no
//! subscribers is dropped, and a subscriber that falls behind observes
//! `Lagged` and keeps going from the oldest retained event.
//!
//! Handlers are free to publish from inside a subscription callback; there
//! is no lock shared between topics, so re-entrant publishes cannot
//! deadlock.

mod events;

pub use events::{
    EarningsChangedEvent, NodeStatus, NodeStatusEvent, PromiseReceivedEvent, RegistrationEvent,
    RegistrationStatus, ServiceStatus, ServiceStatusEvent, SettlementRequestEvent,
};

use tokio::sync::broadcast;

/// Events retained per topic for slow subscribers.
const DEFAULT_CAPACITY: usize = 64;

/// The node's event bus. Cheap to share behind an `Arc`.
#[derive(Debug)]
pub struct EventBus {
    node_status: broadcast::Sender<NodeStatusEvent>,
    registration: broadcast::Sender<RegistrationEvent>,
    service_status: broadcast::Sender<ServiceStatusEvent>,
    promise_received: broadcast::Sender<PromiseReceivedEvent>,
    settlement_request: broadcast::Sender<SettlementRequestEvent>,
    earnings_changed: broadcast::Sender<EarningsChangedEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (node_status, _) = broadcast::channel(capacity);
        let (registration, _) = broadcast::channel(capacity);
        let (service_status, _) = broadcast::channel(capacity);
        let (promise_received, _) = broadcast::channel(capacity);
        let (settlement_request, _) = broadcast::channel(capacity);
        let (earnings_changed, _) = broadcast::channel(capacity);
        Self {
            node_status,
            registration,
            service_status,
            promise_received,
            settlement_request,
            earnings_changed,
        }
    }

    pub fn publish_node_status(&self, event: NodeStatusEvent) {
        let _ = self.node_status.send(event);
    }

    pub fn subscribe_node_status(&self) -> broadcast::Receiver<NodeStatusEvent> {
        self.node_status.subscribe()
    }

    pub fn publish_registration(&self, event: RegistrationEvent) {
        let _ = self.registration.send(event);
    }

    pub fn subscribe_registration(&self) -> broadcast::Receiver<RegistrationEvent> {
        self.registration.subscribe()
    }

    pub fn publish_service_status(&self, event: ServiceStatusEvent) {
        let _ = self.service_status.send(event);
    }

    pub fn subscribe_service_status(&self) -> broadcast::Receiver<ServiceStatusEvent> {
        self.service_status.subscribe()
    }

    pub fn publish_promise_received(&self, event: PromiseReceivedEvent) {
        let _ = self.promise_received.send(event);
    }

    pub fn subscribe_promise_received(&self) -> broadcast::Receiver<PromiseReceivedEvent> {
        self.promise_received.subscribe()
    }

    pub fn publish_settlement_request(&self, event: SettlementRequestEvent) {
        let _ = self.settlement_request.send(event);
    }

    pub fn subscribe_settlement_request(&self) -> broadcast::Receiver<SettlementRequestEvent> {
        self.settlement_request.subscribe()
    }

    pub fn publish_earnings_changed(&self, event: EarningsChangedEvent) {
        let _ = self.earnings_changed.send(event);
    }

    pub fn subscribe_earnings_changed(&self) -> broadcast::Receiver<EarningsChangedEvent> {
        self.earnings_changed.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veilnet_core::{Earnings, HermesAddress, Identity, Promise};

    #[tokio::test]
    async fn test_publish_and_receive() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe_node_status();

        bus.publish_node_status(NodeStatusEvent { status: NodeStatus::Started });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.status, NodeStatus::Started);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_dropped() {
        let bus = EventBus::new();
        // No receiver anywhere; must not panic or block.
        bus.publish_settlement_request(SettlementRequestEvent {
            provider: Identity::default(),
            hermes: HermesAddress::default(),
        });
    }

    #[tokio::test]
    async fn test_multiple_subscribers_each_get_the_event() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe_promise_received();
        let mut rx2 = bus.subscribe_promise_received();

        let event = PromiseReceivedEvent {
            provider: Identity::from_bytes([1u8; 20]),
            hermes: HermesAddress::from_bytes([2u8; 20]),
            promise: Promise { amount: 10, ..Default::default() },
        };
        bus.publish_promise_received(event);

        assert_eq!(rx1.recv().await.unwrap().promise.amount, 10);
        assert_eq!(rx2.recv().await.unwrap().promise.amount, 10);
    }

    #[tokio::test]
    async fn test_topics_are_independent() {
        let bus = EventBus::new();
        let mut registration_rx = bus.subscribe_registration();

        // Traffic on another topic must not show up here.
        bus.publish_service_status(ServiceStatusEvent {
            provider: Identity::default(),
            status: ServiceStatus::Running,
        });
        assert!(matches!(
            registration_rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));

        bus.publish_registration(RegistrationEvent {
            identity: Identity::default(),
            status: RegistrationStatus::Registered,
        });
        assert_eq!(
            registration_rx.recv().await.unwrap().status,
            RegistrationStatus::Registered
        );
    }

    #[tokio::test]
    async fn test_earnings_changed_payload() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe_earnings_changed();

        bus.publish_earnings_changed(EarningsChangedEvent {
            identity: Identity::from_bytes([3u8; 20]),
            previous: Earnings { lifetime_balance: 10, unsettled_balance: 10 },
            current: Earnings { lifetime_balance: 25, unsettled_balance: 25 },
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.previous.lifetime_balance, 10);
        assert_eq!(event.current.unsettled_balance, 25);
    }
}
