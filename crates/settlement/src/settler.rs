//! The promise settler
//!
//! One instance runs for the lifetime of the node process. It listens on
//! the event bus, keeps per-provider settlement state behind a single
//! reader-writer lock, and drives the settle → confirm → resync cycle.
//!
//! Locking discipline: the state lock is never held across an await on a
//! collaborator call or a bus publish. Handlers copy what they need under
//! the lock, release it, then publish.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use veilnet_core::{Earnings, HermesAddress, Identity, Promise};
use veilnet_eventbus::{
    EarningsChangedEvent, EventBus, NodeStatus, NodeStatusEvent, PromiseReceivedEvent,
    RegistrationEvent, RegistrationStatus, ServiceStatus, ServiceStatusEvent,
    SettlementRequestEvent,
};

use crate::config::SettlerConfig;
use crate::contracts::{
    AccountProvider, PromiseSettled, PromiseStorage, ProviderChannelStatus,
    RegistrationStatusProvider, SettleFees, SettlementHistoryStorage, Transactor,
};
use crate::history::SettlementHistoryEntry;
use crate::state::SettlementState;
use crate::{Result, SettlementError};

/// Pending settlements buffered between the receive path and the submit
/// path. Small: a handful of active identities at most.
const SETTLE_QUEUE_CAPACITY: usize = 5;

/// A settlement pulled off the queue, ready for submission.
#[derive(Debug)]
struct QueuedSettlement {
    provider: Identity,
    promise: Promise,
}

/// Collaborators the settler is constructed with.
pub struct SettlerDependencies {
    pub transactor: Arc<dyn Transactor>,
    pub promises: Arc<dyn PromiseStorage>,
    pub chain: Arc<dyn ProviderChannelStatus>,
    pub registration: Arc<dyn RegistrationStatusProvider>,
    pub accounts: Arc<dyn AccountProvider>,
    pub history: Arc<dyn SettlementHistoryStorage>,
}

/// Handle to the settlement engine. Cheap to clone; all clones share one
/// engine.
#[derive(Clone)]
pub struct PromiseSettler {
    inner: Arc<SettlerInner>,
}

struct SettlerInner {
    bus: Arc<EventBus>,
    transactor: Arc<dyn Transactor>,
    promises: Arc<dyn PromiseStorage>,
    chain: Arc<dyn ProviderChannelStatus>,
    registration: Arc<dyn RegistrationStatusProvider>,
    accounts: Arc<dyn AccountProvider>,
    history: Arc<dyn SettlementHistoryStorage>,
    config: SettlerConfig,

    state: RwLock<HashMap<Identity, SettlementState>>,
    queue_tx: mpsc::Sender<QueuedSettlement>,
    /// Taken by the dispatcher when the node starts.
    queue_rx: Mutex<Option<mpsc::Receiver<QueuedSettlement>>>,
    stop_tx: broadcast::Sender<()>,
    stopped: AtomicBool,
}

impl PromiseSettler {
    pub fn new(bus: Arc<EventBus>, deps: SettlerDependencies, config: SettlerConfig) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(SETTLE_QUEUE_CAPACITY);
        let (stop_tx, _) = broadcast::channel(1);

        Self {
            inner: Arc::new(SettlerInner {
                bus,
                transactor: deps.transactor,
                promises: deps.promises,
                chain: deps.chain,
                registration: deps.registration,
                accounts: deps.accounts,
                history: deps.history,
                config,
                state: RwLock::new(HashMap::new()),
                queue_tx,
                queue_rx: Mutex::new(Some(queue_rx)),
                stop_tx,
                stopped: AtomicBool::new(false),
            }),
        }
    }

    /// Attach the settler to the event bus. Call once; listener tasks run
    /// until the node stops.
    pub fn subscribe(&self) {
        spawn_listener(&self.inner, self.inner.bus.subscribe_node_status(), |inner, event| {
            inner.handle_node_event(event)
        });
        spawn_listener(&self.inner, self.inner.bus.subscribe_registration(), |inner, event| async move {
            inner.handle_registration_event(event).await;
        });
        spawn_listener(&self.inner, self.inner.bus.subscribe_service_status(), |inner, event| async move {
            inner.handle_service_event(event).await;
        });
        spawn_listener(&self.inner, self.inner.bus.subscribe_settlement_request(), |inner, event| {
            inner.handle_settlement_event(event)
        });
        spawn_listener(&self.inner, self.inner.bus.subscribe_promise_received(), |inner, event| async move {
            inner.handle_promise_received(event).await;
        });
    }

    /// Settle the provider's latest promise now, regardless of threshold.
    pub async fn force_settle(&self, provider: Identity, hermes: HermesAddress) -> Result<()> {
        let promise = self.inner.load_settleable_promise(provider, hermes).await?;
        self.inner.clone().settle(provider, promise, None).await
    }

    /// Settle the provider's latest promise, paying out to `beneficiary`.
    pub async fn settle_with_beneficiary(
        &self,
        provider: Identity,
        beneficiary: Identity,
        hermes: HermesAddress,
    ) -> Result<()> {
        let promise = self.inner.load_settleable_promise(provider, hermes).await?;
        self.inner.clone().settle(provider, promise, Some(beneficiary)).await
    }

    /// Current earnings snapshot for the identity.
    pub async fn get_earnings(&self, id: Identity) -> Earnings {
        let state = self.inner.state.read().await;
        state.get(&id).map(|s| s.earnings()).unwrap_or_default()
    }

    /// Whether a settlement is currently in flight for the provider.
    pub async fn is_settling(&self, id: Identity) -> bool {
        let state = self.inner.state.read().await;
        state.get(&id).map(|s| s.settle_in_progress).unwrap_or(false)
    }

    /// Current hermes fee in basis points.
    pub async fn hermes_fee(&self) -> Result<u16> {
        self.inner.chain.hermes_fee(self.inner.config.hermes_address).await
    }

    /// Current transactor fee quote for settlements.
    pub async fn settle_fees(&self) -> Result<SettleFees> {
        self.inner.transactor.fetch_settle_fees().await
    }

    /// Load initial state for an identity. No-op if already loaded or the
    /// identity is not registered. Called for every keystore account on
    /// node start and whenever a provider service comes up.
    pub async fn load_initial_state(&self, id: Identity) -> Result<()> {
        self.inner.load_initial_state(id).await
    }
}

/// One listener task per topic: forward events into the handler until the
/// stop signal fires or the bus goes away.
fn spawn_listener<T, F, Fut>(inner: &Arc<SettlerInner>, mut rx: broadcast::Receiver<T>, handler: F)
where
    T: Clone + Send + 'static,
    F: Fn(Arc<SettlerInner>, T) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let inner = Arc::clone(inner);
    let mut stop = inner.stop_tx.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = stop.recv() => break,
                event = rx.recv() => match event {
                    Ok(event) => handler(Arc::clone(&inner), event).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("Settler listener lagged, missed {} event(s)", missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    });
}

impl SettlerInner {
    async fn handle_node_event(self: Arc<Self>, event: NodeStatusEvent) {
        match event.status {
            NodeStatus::Started => self.handle_node_start().await,
            NodeStatus::Stopped => self.handle_node_stop(),
        }
    }

    async fn handle_node_start(self: Arc<Self>) {
        if let Some(queue) = self.queue_rx.lock().await.take() {
            tokio::spawn(Arc::clone(&self).run_dispatcher(queue));
        }

        for address in self.accounts.accounts() {
            let settler = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = settler.load_initial_state(address).await {
                    error!("Could not load initial state for {}: {}", address, e);
                }
            });
        }
    }

    fn handle_node_stop(&self) {
        // Fire the stop signal exactly once; repeated Stopped events are
        // tolerated.
        if !self.stopped.swap(true, Ordering::SeqCst) {
            info!("Settler stopping");
            let _ = self.stop_tx.send(());
        }
    }

    async fn handle_registration_event(&self, event: RegistrationEvent) {
        if event.status != RegistrationStatus::Registered {
            debug!("Ignoring registration event {:?} for provider {}", event.status, event.identity);
            return;
        }
        info!("Identity registration event received for provider {}", event.identity);

        if let Err(e) = self.resync_state(event.identity).await {
            error!("Could not resync state for provider {}: {}", event.identity, e);
        }
    }

    async fn handle_service_event(&self, event: ServiceStatusEvent) {
        match event.status {
            ServiceStatus::Running => {
                if let Err(e) = self.load_initial_state(event.provider).await {
                    error!("Could not load initial state for provider {}: {}", event.provider, e);
                }
            }
            status => debug!("Ignoring service event with status {:?}", status),
        }
    }

    async fn handle_settlement_event(self: Arc<Self>, event: SettlementRequestEvent) {
        let promise = match self.load_settleable_promise(event.provider, event.hermes).await {
            Ok(promise) => promise,
            Err(e) => {
                error!("Could not settle promise for {}: {}", event.provider, e);
                return;
            }
        };
        if let Err(e) = self.clone().settle(event.provider, promise, None).await {
            error!("Could not settle promise for {}: {}", event.provider, e);
        }
    }

    async fn handle_promise_received(&self, event: PromiseReceivedEvent) {
        let id = event.provider;
        info!("Received promise for {}", id);

        let (previous, current, should_settle) = {
            let mut state = self.state.write().await;
            let Some(entry) = state.get_mut(&id) else {
                warn!("Have no state for provider {}, skipping promise", id);
                return;
            };

            // Promises are cumulative; a smaller amount is stale and must
            // not roll the ledger view backwards.
            if event.promise.amount < entry.last_promise.amount {
                warn!(
                    "Discarding stale promise for {}: amount {} below recorded {}",
                    id, event.promise.amount, entry.last_promise.amount
                );
                return;
            }

            let previous = entry.earnings();
            entry.last_promise = event.promise.clone();
            let current = entry.earnings();
            (previous, current, entry.needs_settling(self.config.threshold))
        };

        self.publish_earnings_change(id, previous, current);
        debug!("Promise state updated for provider {}", id);

        if should_settle {
            self.initiate_settling(id, event.hermes).await;
        }
    }

    /// Look up the latest promise and queue it for settlement. Failures
    /// are logged, never propagated onto the bus.
    async fn initiate_settling(&self, provider: Identity, hermes: HermesAddress) {
        let record = match self.promises.latest_promise(provider, hermes).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!("No promise to settle for {} {}", provider, hermes);
                return;
            }
            Err(e) => {
                error!("Could not get promise from storage: {}", e);
                return;
            }
        };

        let promise = match record.decode_r() {
            Ok(promise) => promise,
            Err(e) => {
                error!("Could not decode promise preimage for {}: {}", provider, e);
                return;
            }
        };

        if self.queue_tx.send(QueuedSettlement { provider, promise }).await.is_err() {
            warn!("Settle queue closed, dropping settlement for {}", provider);
        }
    }

    async fn run_dispatcher(self: Arc<Self>, mut queue: mpsc::Receiver<QueuedSettlement>) {
        info!("Listening for settlement requests");
        let mut stop = self.stop_tx.subscribe();
        loop {
            tokio::select! {
                _ = stop.recv() => break,
                item = queue.recv() => match item {
                    Some(item) => {
                        let settler = Arc::clone(&self);
                        tokio::spawn(async move {
                            if let Err(e) = settler.settle(item.provider, item.promise, None).await {
                                warn!("Automatic settlement for {} failed: {}", item.provider, e);
                            }
                        });
                    }
                    None => break,
                },
            }
        }
        info!("Stopped listening for settlement requests");
    }

    async fn load_settleable_promise(
        &self,
        provider: Identity,
        hermes: HermesAddress,
    ) -> Result<Promise> {
        match self.promises.latest_promise(provider, hermes).await? {
            None => Err(SettlementError::NothingToSettle),
            Some(record) => Ok(record.decode_r()?),
        }
    }

    async fn load_initial_state(&self, id: Identity) -> Result<()> {
        {
            let state = self.state.read().await;
            if state.contains_key(&id) {
                info!("State for {} already loaded, skipping", id);
                return Ok(());
            }
        }

        let status = self
            .registration
            .registration_status(id)
            .await
            .map_err(|e| SettlementError::Chain(format!(
                "could not check registration status for {}: {}",
                id, e
            )))?;

        if status != RegistrationStatus::Registered {
            info!("Provider {} not registered, skipping", id);
            return Ok(());
        }

        self.resync_state(id).await
    }

    /// Refetch channel and promise state from the collaborators and
    /// overwrite the in-memory entry, publishing the earnings change.
    async fn resync_state(&self, id: Identity) -> Result<()> {
        let channel = self
            .chain
            .provider_channel(self.config.hermes_address, id, true)
            .await
            .map_err(|e| SettlementError::Resync(format!(
                "could not get provider channel for {}: {}",
                id, e
            )))?;

        let record = self
            .promises
            .latest_promise(id, self.config.hermes_address)
            .await
            .map_err(|e| SettlementError::Resync(format!(
                "could not get promise for {}: {}",
                id, e
            )))?;
        let last_promise = record.map(|r| r.promise).unwrap_or_default();

        let (previous, current, fresh) = {
            let mut state = self.state.write().await;
            let prior = state.get(&id);
            let fresh = SettlementState {
                channel,
                last_promise,
                // Keep the reentrancy guard across refreshes; the waiter
                // clears it when the in-flight settlement finishes.
                settle_in_progress: prior.map(|s| s.settle_in_progress).unwrap_or(false),
                registered: true,
            };
            let previous = prior.map(|s| s.earnings()).unwrap_or_default();
            let current = fresh.earnings();
            state.insert(id, fresh.clone());
            (previous, current, fresh)
        };

        self.publish_earnings_change(id, previous, current);
        info!(
            "Loaded state for provider {}: balance {}, available balance {}, unsettled balance {}",
            id,
            fresh.balance(),
            fresh.available_balance(),
            fresh.unsettled_balance()
        );
        Ok(())
    }

    fn publish_earnings_change(&self, id: Identity, previous: Earnings, current: Earnings) {
        self.bus.publish_earnings_changed(EarningsChangedEvent {
            identity: id,
            previous,
            current,
        });
    }

    /// Submit a settlement and wait for the chain to confirm it.
    ///
    /// The in-progress flag is taken before submission and released only by
    /// the waiter task, so a second attempt for the same provider fails
    /// with `AlreadyInProgress` until this one resolves.
    async fn settle(
        self: Arc<Self>,
        provider: Identity,
        promise: Promise,
        beneficiary: Option<Identity>,
    ) -> Result<()> {
        if !self.try_mark_settling(provider).await {
            return Err(SettlementError::AlreadyInProgress);
        }
        info!("Marked provider {} as requesting settlement", provider);

        let hermes = self.config.hermes_address;
        let sink = match self.chain.subscribe_to_promise_settled(provider, hermes).await {
            Ok(sink) => sink,
            Err(e) => {
                self.set_settling(provider, false).await;
                error!("Could not subscribe to promise settlement: {}", e);
                return Err(e);
            }
        };

        let (done_tx, done_rx) = oneshot::channel::<Result<()>>();
        let waiter = Arc::clone(&self);
        let history_promise = promise.clone();
        tokio::spawn(async move {
            waiter
                .await_settlement(provider, history_promise, beneficiary, sink, done_tx)
                .await;
        });

        let submission = match beneficiary {
            None => self.transactor.settle_and_rebalance(hermes, provider, promise).await,
            Some(beneficiary) => {
                self.transactor
                    .settle_with_beneficiary(provider, beneficiary, hermes, promise)
                    .await
            }
        };
        if let Err(e) = submission {
            error!("Could not settle promise for {}: {}", provider, e);
            // Dropping done_rx wakes the waiter, which cancels the
            // subscription and clears the flag.
            return Err(e);
        }

        match done_rx.await {
            Ok(result) => result,
            // Waiter dropped the channel: the node is stopping.
            Err(_) => Ok(()),
        }
    }

    /// Wait for the settlement outcome: chain confirmation, timeout, node
    /// stop, or the submitter abandoning the attempt.
    async fn await_settlement(
        self: Arc<Self>,
        provider: Identity,
        promise: Promise,
        beneficiary: Option<Identity>,
        mut sink: mpsc::Receiver<PromiseSettled>,
        mut done_tx: oneshot::Sender<Result<()>>,
    ) {
        enum Outcome {
            Confirmed(PromiseSettled),
            SinkClosed,
            TimedOut,
            Abandoned,
        }

        let mut stop = self.stop_tx.subscribe();
        let outcome = tokio::select! {
            _ = stop.recv() => Outcome::Abandoned,
            _ = done_tx.closed() => Outcome::Abandoned,
            event = sink.recv() => match event {
                Some(event) => Outcome::Confirmed(event),
                None => Outcome::SinkClosed,
            },
            _ = tokio::time::sleep(self.config.max_wait_for_settlement) => Outcome::TimedOut,
        };

        // Cancels the chain subscription.
        drop(sink);

        match outcome {
            Outcome::Confirmed(event) => {
                info!("Settling complete for provider {}", provider);

                let entry = SettlementHistoryEntry {
                    tx_hash: event.tx_hash,
                    promise,
                    amount: event.amount,
                    total_settled: event.total_settled,
                    beneficiary,
                };
                if let Err(e) = self.history.store(provider, self.config.hermes_address, entry).await {
                    error!("Could not store settlement history: {}", e);
                }

                match self.resync_state(provider).await {
                    Ok(()) => info!("Resync success for provider {}", provider),
                    // The next promise or a manual settle re-enters; no
                    // explicit retry here.
                    Err(e) => error!("Resync failed for provider {}: {}", provider, e),
                }

                self.set_settling(provider, false).await;
                let _ = done_tx.send(Ok(()));
            }
            Outcome::TimedOut => {
                info!("Settle timeout for {}", provider);
                self.set_settling(provider, false).await;
                let _ = done_tx.send(Err(SettlementError::SettleTimeout));
            }
            Outcome::SinkClosed => {
                self.set_settling(provider, false).await;
                let _ = done_tx.send(Err(SettlementError::Chain(
                    "settlement event stream closed".to_string(),
                )));
            }
            Outcome::Abandoned => {
                self.set_settling(provider, false).await;
            }
        }
    }

    /// Atomically take the in-progress flag. Returns false if a settlement
    /// is already in flight for the provider.
    async fn try_mark_settling(&self, id: Identity) -> bool {
        let mut state = self.state.write().await;
        let entry = state.entry(id).or_default();
        if entry.settle_in_progress {
            return false;
        }
        entry.settle_in_progress = true;
        true
    }

    async fn set_settling(&self, id: Identity, settling: bool) {
        let mut state = self.state.write().await;
        if let Some(entry) = state.get_mut(&id) {
            entry.settle_in_progress = settling;
        }
    }
}
