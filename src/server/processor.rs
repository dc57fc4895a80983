//! Request processor (server role).
//!
//! Per inbound request:
//!
//! ```text
//! received -> decoded | malformed(reject)
//!          -> accept -> fresh | duplicate
//!          -> applied | suppressed
//!          -> remember(id, reply, now + window)
//!          -> replied | unreplied
//! ```
//!
//! The deduplication store is consulted only for retransmissions
//! (`delivery_count != 0`) but re-armed after every sighting, fresh or not.

use std::time::{Duration, Instant};

use tracing::{Instrument, Span, debug, info, trace, warn};

use super::handler::CommandHandler;
use crate::core::constants::{DEFAULT_DEDUP_WINDOW, FAR_FUTURE};
use crate::core::{CommandError, Receive, Tracker, Transport, TransportError};
use crate::dedup::DedupStore;
use crate::delivery::{Delivery, DeliveryDriver, Handshake, RetryPolicy};
use crate::message::{Body, Message, MessageId, Status};

/// Reply computed the first time a request id was processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedReply {
    /// `OK` or the error status of the first processing.
    pub status: Status,
    /// Result value of the first processing.
    pub value: String,
}

/// What happened to one inbound delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Processed {
    /// Rejected at the transport; no response, no deduplication entry.
    Malformed,
    /// Accepted and answered (or left unanswered when no `reply_to` was set).
    Handled {
        /// Request id.
        id: MessageId,
        /// Status of the response.
        status: Status,
        /// Outcome of the response delivery, `None` when no response was sent.
        reply: Option<Delivery>,
    },
}

impl Processed {
    /// Response status, if the request was handled.
    pub fn status(&self) -> Option<&Status> {
        match self {
            Self::Malformed => None,
            Self::Handled { status, .. } => Some(status),
        }
    }
}

/// Counters kept by a processor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessorStats {
    /// Requests applied for the first time.
    pub fresh: u64,
    /// Retransmissions answered from the deduplication store.
    pub duplicate: u64,
    /// Requests refused by the handler.
    pub refused: u64,
    /// Requests rejected as malformed.
    pub malformed: u64,
    /// Responses that could not be delivered.
    pub reply_failed: u64,
}

/// Processor configuration.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Address the processor subscribes to.
    pub address: String,

    /// How long a request id is remembered after each sighting.
    pub dedup_window: Duration,

    /// Forget an entry as soon as its response is accepted, instead of
    /// letting it expire.
    pub release_on_settlement: bool,

    /// Retry policy for responses.
    pub policy: RetryPolicy,
}

impl ProcessorConfig {
    /// Configuration with defaults for `address`.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            dedup_window: DEFAULT_DEDUP_WINDOW,
            release_on_settlement: false,
            policy: RetryPolicy::default(),
        }
    }
}

/// Builder for a [`RequestProcessor`].
#[derive(Debug)]
pub struct ProcessorBuilder {
    config: ProcessorConfig,
    span: Option<Span>,
}

impl ProcessorBuilder {
    /// Create a builder for a processor listening on `address`.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            config: ProcessorConfig::new(address),
            span: None,
        }
    }

    /// Set the deduplication window.
    pub fn dedup_window(mut self, window: Duration) -> Self {
        self.config.dedup_window = window;
        self
    }

    /// Forget entries early once their response is accepted.
    pub fn release_on_settlement(mut self, enabled: bool) -> Self {
        self.config.release_on_settlement = enabled;
        self
    }

    /// Set the retry policy for responses.
    pub fn policy(mut self, policy: RetryPolicy) -> Self {
        self.config.policy = policy;
        self
    }

    /// Record processor events under `span`.
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Subscribe `transport` to the configured address and build the processor.
    pub fn build<T, H>(
        self,
        mut transport: T,
        handler: H,
    ) -> Result<RequestProcessor<T, H>, TransportError>
    where
        T: Transport,
        H: CommandHandler,
    {
        transport.subscribe(&self.config.address)?;

        let span = self
            .span
            .unwrap_or_else(|| tracing::info_span!("processor", address = %self.config.address));
        let driver = DeliveryDriver::new(self.config.policy.clone())
            .with_span(tracing::debug_span!(parent: &span, "reply"));
        let dedup = DedupStore::with_eviction_hook(|key: &str, _reply: Option<RecordedReply>| {
            trace!(key, "deduplication entry expired");
        });

        info!(parent: &span, window = ?self.config.dedup_window, "processor ready");

        Ok(RequestProcessor {
            transport,
            handler,
            dedup,
            driver,
            config: self.config,
            stats: ProcessorStats::default(),
            span,
        })
    }
}

/// Server side of the exchange.
///
/// Owns its transport endpoint, its command handler and the deduplication
/// store; nothing else mutates them.
#[derive(Debug)]
pub struct RequestProcessor<T, H> {
    transport: T,
    handler: H,
    dedup: DedupStore<RecordedReply>,
    driver: DeliveryDriver,
    config: ProcessorConfig,
    stats: ProcessorStats,
    span: Span,
}

impl<T, H> RequestProcessor<T, H>
where
    T: Transport,
    H: CommandHandler,
{
    /// Configuration in effect.
    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Command handler (the server-held state).
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Deduplication store.
    pub fn dedup(&self) -> &DedupStore<RecordedReply> {
        &self.dedup
    }

    /// Counters so far.
    pub fn stats(&self) -> ProcessorStats {
        self.stats
    }

    /// Underlying transport endpoint.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Serve forever.
    ///
    /// Each receive is bounded by the next deduplication deadline so expired
    /// entries are swept between cycles. Returns only on a transport error.
    pub async fn run(&mut self) -> Result<(), TransportError> {
        loop {
            let now = now();
            let timeout = self
                .dedup
                .purge_expired_at(now)
                .map(|deadline| deadline.saturating_duration_since(now));
            self.poll_once(timeout).await?;
        }
    }

    /// One receive cycle: wait up to `timeout`, handle every queued request,
    /// sweep expired entries.
    ///
    /// Returns the number of requests handled.
    pub async fn poll_once(&mut self, timeout: Option<Duration>) -> Result<usize, TransportError> {
        let span = self.span.clone();
        self.cycle(timeout).instrument(span).await
    }

    async fn cycle(&mut self, timeout: Option<Duration>) -> Result<usize, TransportError> {
        let mut handled = 0;
        if let Receive::Ready(queued) = self.transport.receive(timeout).await? {
            trace!(queued, "inbound requests");
            while let Some((tracker, message)) = self.transport.get() {
                self.process(tracker, message).await;
                handled += 1;
            }
        }
        self.dedup.purge_expired_at(now());
        Ok(handled)
    }

    /// Handle one inbound delivery.
    pub async fn handle(&mut self, tracker: Tracker, message: Message) -> Processed {
        let span = self.span.clone();
        self.process(tracker, message).instrument(span).await
    }

    async fn process(&mut self, tracker: Tracker, message: Message) -> Processed {
        let id = message.id();

        let body = match message.decode_request() {
            Ok(body) => body,
            Err(e) => return self.reject(tracker, id, &e.to_string()),
        };
        if let Err(e) = self.handler.validate(&body.command, &body.value) {
            if e.is_malformed() {
                return self.reject(tracker, id, &e.to_string());
            }
        }

        self.transport.accept(tracker);

        let key = id.key();
        let now = now();
        let seen = if message.is_retransmission() {
            self.dedup
                .check_at(&key, now)
                .map(|entry| entry.data().cloned())
        } else {
            None
        };

        let (status, value, record) = match seen {
            Some(recorded) => {
                self.stats.duplicate += 1;
                let (status, value) = match &recorded {
                    Some(reply) if reply.status.is_success() => {
                        (Status::Duplicate, reply.value.clone())
                    }
                    Some(reply) => (reply.status.clone(), reply.value.clone()),
                    None => (Status::Duplicate, self.handler.snapshot(&body.command)),
                };
                info!(
                    %id,
                    delivery_count = message.delivery_count(),
                    "duplicate request suppressed"
                );
                (status, value, recorded)
            }
            None => {
                let reply = self.apply(&body);
                debug!(%id, command = %body.command, status = %reply.status, "request applied");
                (reply.status.clone(), reply.value.clone(), Some(reply))
            }
        };

        self.dedup.remember(
            key.as_str(),
            record.clone(),
            expiry(now, self.config.dedup_window),
        );

        let response = Body::response(body.command.as_str(), value, status.clone());
        let reply = match message.reply(&response) {
            None => None,
            Some(Err(e)) => {
                warn!(%id, error = %e, "could not encode response");
                self.stats.reply_failed += 1;
                None
            }
            Some(Ok(mut response)) => {
                let delivery = self
                    .driver
                    .deliver(&mut self.transport, &mut response)
                    .await;
                self.settle_entry(&key, record, &delivery);
                Some(delivery)
            }
        };

        Processed::Handled { id, status, reply }
    }

    fn apply(&mut self, body: &Body) -> RecordedReply {
        match self.handler.apply(&body.command, &body.value) {
            Ok(value) => {
                self.stats.fresh += 1;
                RecordedReply {
                    status: Status::Ok,
                    value,
                }
            }
            Err(e) => {
                self.stats.refused += 1;
                let reason = match e {
                    CommandError::Refused(reason) => reason,
                    other => other.to_string(),
                };
                info!(command = %body.command, %reason, "request refused");
                RecordedReply {
                    status: Status::error(reason),
                    value: self.handler.snapshot(&body.command),
                }
            }
        }
    }

    /// Decide the entry's fate from how the response delivery ended.
    fn settle_entry(&mut self, key: &str, record: Option<RecordedReply>, delivery: &Delivery) {
        if !delivery.is_accepted() {
            warn!(
                key,
                status = ?delivery.status,
                attempts = delivery.attempts,
                "response not delivered"
            );
            self.stats.reply_failed += 1;
            return;
        }
        if self.config.release_on_settlement {
            debug!(key, "response accepted, releasing entry");
            self.dedup.forget(key);
            return;
        }
        if delivery.handshake == Handshake::TimedOut {
            warn!(key, "settlement handshake timed out, re-arming entry");
            let now = now();
            self.dedup
                .remember(key, record, expiry(now, self.config.dedup_window));
        }
    }

    fn reject(&mut self, tracker: Tracker, id: MessageId, reason: &str) -> Processed {
        warn!(%id, reason, "rejecting malformed request");
        self.transport.reject(tracker);
        self.stats.malformed += 1;
        Processed::Malformed
    }
}

/// Wall clock as seen by the tokio timer, so paused-time runs stay consistent.
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

/// Expiry `window` after `now`, saturating at a far-future instant.
fn expiry(now: Instant, window: Duration) -> Instant {
    now.checked_add(window)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}
