//! Request issuer (client role).
//!
//! Mints one id per logical request and keeps it for every retransmission.
//! Each attempt drives the request to an outcome through the delivery
//! driver, then waits for the response whose correlation id matches.

use std::time::Duration;

use tracing::{Instrument, Span, debug, info, warn};

use crate::core::constants::{
    COMMAND_GET, COMMAND_SET, DEFAULT_REQUEST_ATTEMPTS, DEFAULT_RESPONSE_TIMEOUT,
};
use crate::core::{IssueError, Receive, Transport, TransportError};
use crate::delivery::{DeliveryDriver, DeliveryStatus, RetryPolicy};
use crate::message::{Body, Message, MessageId, Status};

/// Successful answer to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Request id.
    pub id: MessageId,
    /// `OK` or `DUPLICATE`.
    pub status: Status,
    /// Result value; authoritative for either status.
    pub value: String,
    /// Delivery count of the transmission that was answered.
    pub delivery_count: u32,
}

impl Reply {
    /// Whether the processor recognized the request as a retransmission.
    pub fn is_duplicate(&self) -> bool {
        self.status == Status::Duplicate
    }
}

/// Issuer configuration.
#[derive(Debug, Clone)]
pub struct IssuerConfig {
    /// Processor address requests are sent to.
    pub address: String,

    /// Address responses come back on.
    pub reply_to: String,

    /// How long each attempt waits for a correlated response.
    pub response_timeout: Duration,

    /// Request transmissions before the outcome is reported unknown.
    pub max_attempts: u32,

    /// Time-to-live stamped on every request.
    pub ttl: Option<Duration>,

    /// Retry policy for each request transmission.
    pub policy: RetryPolicy,
}

impl IssuerConfig {
    /// Configuration with defaults.
    pub fn new(address: impl Into<String>, reply_to: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            reply_to: reply_to.into(),
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            max_attempts: DEFAULT_REQUEST_ATTEMPTS,
            ttl: None,
            policy: RetryPolicy::default(),
        }
    }
}

/// Builder for a [`RequestIssuer`].
#[derive(Debug)]
pub struct IssuerBuilder {
    config: IssuerConfig,
    span: Option<Span>,
}

impl IssuerBuilder {
    /// Create a builder sending to `address` and listening on `reply_to`.
    pub fn new(address: impl Into<String>, reply_to: impl Into<String>) -> Self {
        Self {
            config: IssuerConfig::new(address, reply_to),
            span: None,
        }
    }

    /// Set the per-attempt response timeout.
    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.config.response_timeout = timeout;
        self
    }

    /// Set the number of request transmissions; zero is raised to one.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        if attempts == 0 {
            warn!("max_attempts of 0 cannot guarantee a send, using 1");
        }
        self.config.max_attempts = attempts.max(1);
        self
    }

    /// Stamp requests with a time-to-live.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.config.ttl = Some(ttl);
        self
    }

    /// Set the retry policy for request transmissions.
    pub fn policy(mut self, policy: RetryPolicy) -> Self {
        self.config.policy = policy;
        self
    }

    /// Record issuer events under `span`.
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Subscribe `transport` to the reply address and build the issuer.
    pub fn build<T: Transport>(self, mut transport: T) -> Result<RequestIssuer<T>, TransportError> {
        transport.subscribe(&self.config.reply_to)?;

        let span = self
            .span
            .unwrap_or_else(|| tracing::info_span!("issuer", reply_to = %self.config.reply_to));
        let driver = DeliveryDriver::new(self.config.policy.clone())
            .with_span(tracing::debug_span!(parent: &span, "request"));

        Ok(RequestIssuer {
            transport,
            driver,
            config: self.config,
            span,
        })
    }
}

/// Client side of the exchange.
#[derive(Debug)]
pub struct RequestIssuer<T> {
    transport: T,
    driver: DeliveryDriver,
    config: IssuerConfig,
    span: Span,
}

impl<T: Transport> RequestIssuer<T> {
    /// Configuration in effect.
    pub fn config(&self) -> &IssuerConfig {
        &self.config
    }

    /// Underlying transport endpoint.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Read the processor's current value.
    pub async fn get(&mut self) -> Result<Reply, IssueError> {
        self.request(COMMAND_GET, "").await
    }

    /// Replace the processor's current value.
    pub async fn set(&mut self, value: &str) -> Result<Reply, IssueError> {
        self.request(COMMAND_SET, value).await
    }

    /// Issue a request and wait for its correlated response.
    ///
    /// `DUPLICATE` is reported as success. `IssueError::NoResponse` means the
    /// request may or may not have been applied.
    pub async fn request(&mut self, command: &str, value: &str) -> Result<Reply, IssueError> {
        let message = self
            .prepare(command, value)?
            .with_reply_to(self.config.reply_to.as_str());
        let span = self.span.clone();
        self.exchange(message).instrument(span).await
    }

    /// Send a request that expects no response.
    ///
    /// Succeeds once the processor accepts the delivery.
    pub async fn notify(&mut self, command: &str, value: &str) -> Result<MessageId, IssueError> {
        let mut message = self.prepare(command, value)?;
        let id = message.id();
        let span = self.span.clone();

        let delivery = self
            .driver
            .deliver(&mut self.transport, &mut message)
            .instrument(span)
            .await;

        match delivery.status {
            DeliveryStatus::Accepted => Ok(id),
            DeliveryStatus::Rejected => Err(IssueError::Rejected { id: id.key() }),
            DeliveryStatus::Failed => Err(IssueError::NoResponse {
                id: id.key(),
                attempts: delivery.attempts,
            }),
        }
    }

    fn prepare(&self, command: &str, value: &str) -> Result<Message, IssueError> {
        let body = Body::request(command, value);
        let mut message = Message::from_body(self.config.address.as_str(), &body)?;
        if let Some(ttl) = self.config.ttl {
            message = message.with_ttl(ttl);
        }
        Ok(message)
    }

    async fn exchange(&mut self, mut message: Message) -> Result<Reply, IssueError> {
        let id = message.id();
        let attempts = self.config.max_attempts.max(1);

        for attempt in 1..=attempts {
            debug!(%id, attempt, delivery_count = message.delivery_count(), "issuing request");
            let delivery = self.driver.deliver(&mut self.transport, &mut message).await;

            if delivery.status == DeliveryStatus::Rejected {
                info!(%id, "request rejected");
                return Err(IssueError::Rejected { id: id.key() });
            }
            // A failed delivery may still have been processed; its
            // disposition could be the part that got lost.
            if delivery.status == DeliveryStatus::Failed {
                debug!(%id, "request outcome unknown, waiting for a response anyway");
            }

            let delivery_count = message.delivery_count();
            if let Some(body) = self.await_response(id).await? {
                let status = body.status.unwrap_or(Status::Ok);
                if !status.is_success() {
                    return Err(IssueError::Failed {
                        id: id.key(),
                        status: status.to_string(),
                    });
                }
                return Ok(Reply {
                    id,
                    status,
                    value: body.value,
                    delivery_count,
                });
            }

            warn!(%id, attempt, "no response within timeout");
            if delivery.is_accepted() {
                message.mark_redelivered();
            }
        }

        Err(IssueError::NoResponse { id: id.key(), attempts })
    }

    /// Wait for the response correlated with `id`, discarding stale ones.
    async fn await_response(&mut self, id: MessageId) -> Result<Option<Body>, IssueError> {
        // No deadline when the timeout overflows the clock: wait indefinitely
        let deadline = tokio::time::Instant::now().checked_add(self.config.response_timeout);

        loop {
            let now = tokio::time::Instant::now();
            let remaining = deadline.map(|deadline| deadline.saturating_duration_since(now));
            if let Receive::TimedOut = self.transport.receive(remaining).await? {
                return Ok(None);
            }

            while let Some((tracker, message)) = self.transport.get() {
                let body = match message.decode_response() {
                    Ok(body) => body,
                    Err(e) => {
                        warn!(error = %e, "rejecting undecodable response");
                        self.transport.reject(tracker);
                        continue;
                    }
                };
                self.transport.accept(tracker);

                if !message.correlates_with(id) {
                    debug!(
                        %id,
                        correlation_id = ?message.correlation_id,
                        "discarding uncorrelated response"
                    );
                    continue;
                }
                return Ok(Some(body));
            }

            if remaining.is_some_and(|r| r.is_zero()) {
                return Ok(None);
            }
        }
    }
}
