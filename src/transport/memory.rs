//! In-memory loopback transport.
//!
//! A [`MemoryNetwork`] routes messages between [`MemoryTransport`] endpoints
//! in the same process. Dispositions travel back to the sender through a
//! shared delivery table, so a receiver's `accept` becomes the sender's
//! `Outcome::Accepted`. Lost messages and lost dispositions are injected
//! through [`FaultConfig`] or the scripted `drop_next`/`lose_next_dispositions`.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::faults::{FaultConfig, FaultPlan};
use crate::core::{Outcome, Receive, Tracker, Transport, TransportError};
use crate::message::Message;

type EndpointId = u64;

/// A message waiting in an endpoint's inbox.
#[derive(Debug)]
struct Inbound {
    tracker: Tracker,
    message: Message,
    expires_at: Option<Instant>,
}

impl Inbound {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Sender-side view of one delivery.
#[derive(Debug)]
struct DeliveryRecord {
    outcome: Outcome,
    lose_disposition: bool,
}

#[derive(Debug)]
struct NetworkState {
    routes: HashMap<String, EndpointId>,
    inboxes: HashMap<EndpointId, VecDeque<Inbound>>,
    deliveries: HashMap<Tracker, DeliveryRecord>,
    sent: HashMap<String, u64>,
    faults: FaultPlan,
    next_tracker: u64,
    next_endpoint: EndpointId,
    closed: bool,
}

impl NetworkState {
    /// Drop expired messages from an inbox and return how many remain.
    fn ready(&mut self, endpoint: EndpointId, now: Instant) -> usize {
        let Some(inbox) = self.inboxes.get_mut(&endpoint) else {
            return 0;
        };
        inbox.retain(|inbound| {
            let expired = inbound.is_expired(now);
            if expired {
                debug!(id = %inbound.message.id(), "message ttl elapsed in transit");
            }
            !expired
        });
        inbox.len()
    }

    fn dispose(&mut self, tracker: Tracker, outcome: Outcome) -> bool {
        let Some(record) = self.deliveries.get_mut(&tracker) else {
            trace!(%tracker, "disposition for settled delivery ignored");
            return false;
        };
        if record.lose_disposition {
            debug!(%tracker, ?outcome, "disposition lost in transit");
            return false;
        }
        record.outcome = outcome;
        true
    }
}

#[derive(Debug)]
struct Shared {
    state: Mutex<NetworkState>,
    notify: Notify,
}

/// A set of connected in-process endpoints.
#[derive(Debug, Clone)]
pub struct MemoryNetwork {
    shared: Arc<Shared>,
}

impl MemoryNetwork {
    /// Create a network without faults.
    pub fn new() -> Self {
        Self::with_faults(FaultConfig::none())
    }

    /// Create a network applying `faults` to every send.
    pub fn with_faults(faults: FaultConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(NetworkState {
                    routes: HashMap::new(),
                    inboxes: HashMap::new(),
                    deliveries: HashMap::new(),
                    sent: HashMap::new(),
                    faults: FaultPlan::new(faults),
                    next_tracker: 0,
                    next_endpoint: 0,
                    closed: false,
                }),
                notify: Notify::new(),
            }),
        }
    }

    /// Open a new endpoint on this network.
    pub fn endpoint(&self) -> MemoryTransport {
        let mut state = self.shared.state.lock();
        state.next_endpoint += 1;
        let id = state.next_endpoint;
        state.inboxes.insert(id, VecDeque::new());
        MemoryTransport {
            shared: self.shared.clone(),
            id,
        }
    }

    /// Lose the next `count` messages sent to `address`.
    pub fn drop_next(&self, address: &str, count: u32) {
        self.shared.state.lock().faults.drop_next(address, count);
    }

    /// Lose the dispositions of the next `count` messages sent to `address`.
    ///
    /// The messages themselves arrive; their senders never learn the outcome.
    pub fn lose_next_dispositions(&self, address: &str, count: u32) {
        self.shared
            .state
            .lock()
            .faults
            .lose_next_dispositions(address, count);
    }

    /// Number of sends addressed to `address`, including lost ones.
    pub fn sent_to(&self, address: &str) -> u64 {
        self.shared
            .state
            .lock()
            .sent
            .get(address)
            .copied()
            .unwrap_or(0)
    }

    /// Number of live messages waiting at `address`.
    pub fn pending(&self, address: &str) -> usize {
        let mut state = self.shared.state.lock();
        let endpoint = state.routes.get(address).copied();
        match endpoint {
            Some(endpoint) => state.ready(endpoint, Instant::now()),
            None => 0,
        }
    }

    /// Shut the network down; blocked receivers return `TransportError::Closed`.
    pub fn close(&self) {
        self.shared.state.lock().closed = true;
        self.shared.notify.notify_waiters();
    }
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

/// One endpoint of a [`MemoryNetwork`].
#[derive(Debug)]
pub struct MemoryTransport {
    shared: Arc<Shared>,
    id: EndpointId,
}

impl MemoryTransport {
    /// Addresses this endpoint is subscribed to.
    pub fn addresses(&self) -> Vec<String> {
        let state = self.shared.state.lock();
        let mut addresses: Vec<_> = state
            .routes
            .iter()
            .filter(|(_, endpoint)| **endpoint == self.id)
            .map(|(address, _)| address.clone())
            .collect();
        addresses.sort();
        addresses
    }

    fn ready(&self) -> Result<usize, TransportError> {
        let mut state = self.shared.state.lock();
        if state.closed {
            return Err(TransportError::Closed);
        }
        Ok(state.ready(self.id, Instant::now()))
    }

    fn dispose(&mut self, tracker: Tracker, outcome: Outcome) {
        let changed = self.shared.state.lock().dispose(tracker, outcome);
        if changed {
            self.shared.notify.notify_waiters();
        }
    }
}

impl Transport for MemoryTransport {
    fn subscribe(&mut self, address: &str) -> Result<(), TransportError> {
        let mut state = self.shared.state.lock();
        if state.closed {
            return Err(TransportError::Closed);
        }
        match state.routes.get(address) {
            Some(owner) if *owner == self.id => Ok(()),
            Some(_) => Err(TransportError::AddressInUse(address.to_owned())),
            None => {
                debug!(address, endpoint = self.id, "subscribed");
                state.routes.insert(address.to_owned(), self.id);
                Ok(())
            }
        }
    }

    fn send(&mut self, message: &Message) -> Result<Tracker, TransportError> {
        if message.address.is_empty() {
            return Err(TransportError::MissingAddress);
        }
        let tracker = {
            let mut state = self.shared.state.lock();
            if state.closed {
                return Err(TransportError::Closed);
            }
            let Some(&destination) = state.routes.get(&message.address) else {
                return Err(TransportError::Unroutable(message.address.clone()));
            };

            *state.sent.entry(message.address.clone()).or_default() += 1;
            state.next_tracker += 1;
            let tracker = Tracker(state.next_tracker);

            let verdict = state.faults.judge(&message.address);
            state.deliveries.insert(
                tracker,
                DeliveryRecord {
                    outcome: Outcome::Unknown,
                    lose_disposition: verdict.lose_disposition,
                },
            );

            if verdict.drop {
                debug!(id = %message.id(), %tracker, "message lost in transit");
                return Ok(tracker);
            }

            let inbound = Inbound {
                tracker,
                message: message.clone(),
                // A ttl past the end of time never expires
                expires_at: message.ttl.and_then(|ttl| Instant::now().checked_add(ttl)),
            };
            if let Some(inbox) = state.inboxes.get_mut(&destination) {
                inbox.push_back(inbound);
            }
            trace!(id = %message.id(), %tracker, address = %message.address, "message queued");
            tracker
        };

        self.shared.notify.notify_waiters();
        Ok(tracker)
    }

    async fn await_disposition(&mut self, tracker: Tracker, timeout: Duration) {
        let deadline = Instant::now().checked_add(timeout);
        loop {
            let notified = self.shared.notify.notified();
            if self.outcome(tracker).is_decisive() || self.shared.state.lock().closed {
                return;
            }
            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return;
                    }
                }
                None => notified.await,
            }
        }
    }

    fn outcome(&self, tracker: Tracker) -> Outcome {
        self.shared
            .state
            .lock()
            .deliveries
            .get(&tracker)
            .map_or(Outcome::Unknown, |record| record.outcome)
    }

    fn settle(&mut self, tracker: Tracker) {
        self.shared.state.lock().deliveries.remove(&tracker);
    }

    async fn receive(&mut self, timeout: Option<Duration>) -> Result<Receive, TransportError> {
        let deadline = timeout.and_then(|timeout| Instant::now().checked_add(timeout));
        loop {
            let notified = self.shared.notify.notified();
            let ready = self.ready()?;
            if ready > 0 {
                return Ok(Receive::Ready(ready));
            }
            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Ok(Receive::TimedOut);
                    }
                }
                None => notified.await,
            }
        }
    }

    fn get(&mut self) -> Option<(Tracker, Message)> {
        let mut state = self.shared.state.lock();
        state.ready(self.id, Instant::now());
        let inbound = state.inboxes.get_mut(&self.id)?.pop_front()?;
        Some((inbound.tracker, inbound.message))
    }

    fn accept(&mut self, tracker: Tracker) {
        self.dispose(tracker, Outcome::Accepted);
    }

    fn reject(&mut self, tracker: Tracker) {
        self.dispose(tracker, Outcome::Rejected);
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        let id = self.id;
        state.routes.retain(|_, endpoint| *endpoint != id);
        state.inboxes.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(network: &MemoryNetwork) -> (MemoryTransport, MemoryTransport) {
        let client = network.endpoint();
        let mut server = network.endpoint();
        server.subscribe("server").unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn test_send_receive_accept() {
        let network = MemoryNetwork::new();
        let (mut client, mut server) = pair(&network);

        let msg = Message::new("server", b"hello".to_vec());
        let tracker = client.send(&msg).unwrap();
        assert_eq!(client.outcome(tracker), Outcome::Unknown);

        let ready = server.receive(Some(Duration::from_secs(1))).await.unwrap();
        assert_eq!(ready, Receive::Ready(1));

        let (inbound, received) = server.get().unwrap();
        assert_eq!(received.id(), msg.id());
        server.accept(inbound);

        client
            .await_disposition(tracker, Duration::from_secs(1))
            .await;
        assert_eq!(client.outcome(tracker), Outcome::Accepted);

        client.settle(tracker);
        assert_eq!(client.outcome(tracker), Outcome::Unknown);
        assert_eq!(network.sent_to("server"), 1);
    }

    #[tokio::test]
    async fn test_reject_reaches_sender() {
        let network = MemoryNetwork::new();
        let (mut client, mut server) = pair(&network);

        let tracker = client.send(&Message::new("server", vec![])).unwrap();
        let (inbound, _) = server.get().unwrap();
        server.reject(inbound);

        assert_eq!(client.outcome(tracker), Outcome::Rejected);
    }

    #[tokio::test]
    async fn test_unroutable() {
        let network = MemoryNetwork::new();
        let mut client = network.endpoint();

        let result = client.send(&Message::new("nowhere", vec![]));
        assert_eq!(result, Err(TransportError::Unroutable("nowhere".into())));
    }

    #[tokio::test]
    async fn test_address_in_use() {
        let network = MemoryNetwork::new();
        let (mut other, _server) = pair(&network);

        assert!(matches!(
            other.subscribe("server"),
            Err(TransportError::AddressInUse(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_times_out() {
        let network = MemoryNetwork::new();
        let (_client, mut server) = pair(&network);

        let start = Instant::now();
        let result = server.receive(Some(Duration::from_millis(250))).await;

        assert_eq!(result, Ok(Receive::TimedOut));
        assert!(start.elapsed() >= Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_message_never_arrives() {
        let network = MemoryNetwork::new();
        let (mut client, mut server) = pair(&network);
        network.drop_next("server", 1);

        let tracker = client.send(&Message::new("server", vec![])).unwrap();
        client
            .await_disposition(tracker, Duration::from_millis(100))
            .await;

        assert_eq!(client.outcome(tracker), Outcome::Unknown);
        assert!(server.get().is_none());
        assert_eq!(network.sent_to("server"), 1);
    }

    #[tokio::test]
    async fn test_lost_disposition() {
        let network = MemoryNetwork::new();
        let (mut client, mut server) = pair(&network);
        network.lose_next_dispositions("server", 1);

        let tracker = client.send(&Message::new("server", vec![])).unwrap();
        let (inbound, _) = server.get().unwrap();
        server.accept(inbound);

        assert_eq!(client.outcome(tracker), Outcome::Unknown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expires_in_transit() {
        let network = MemoryNetwork::new();
        let (mut client, mut server) = pair(&network);

        let msg = Message::new("server", vec![]).with_ttl(Duration::from_millis(50));
        client.send(&msg).unwrap();
        assert_eq!(network.pending("server"), 1);

        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(network.pending("server"), 0);
        assert!(server.get().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_timeouts_do_not_overflow() {
        let network = MemoryNetwork::new();
        let (mut client, mut server) = pair(&network);

        let msg = Message::new("server", vec![]).with_ttl(Duration::MAX);
        let tracker = client.send(&msg).unwrap();
        tokio::time::sleep(Duration::from_secs(86_400)).await;

        let ready = server.receive(Some(Duration::MAX)).await.unwrap();
        assert_eq!(ready, Receive::Ready(1));
        let (inbound, _) = server.get().unwrap();
        server.accept(inbound);

        client.await_disposition(tracker, Duration::MAX).await;
        assert_eq!(client.outcome(tracker), Outcome::Accepted);
    }

    #[tokio::test]
    async fn test_close_wakes_receiver() {
        let network = MemoryNetwork::new();
        let (_client, mut server) = pair(&network);

        let closer = network.clone();
        let (result, _) = tokio::join!(server.receive(None), async move { closer.close() });

        assert_eq!(result, Err(TransportError::Closed));
    }

    #[tokio::test]
    async fn test_dropped_endpoint_releases_address() {
        let network = MemoryNetwork::new();
        let (_client, server) = pair(&network);
        drop(server);

        let mut replacement = network.endpoint();
        replacement.subscribe("server").unwrap();
        assert_eq!(replacement.addresses(), vec!["server".to_string()]);
    }
}
