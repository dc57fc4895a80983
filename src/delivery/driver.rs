//! Reliable delivery driver
//!
//! Pushes one outbound message to a decisive remote outcome:
//!
//! 1. Send, wait for the disposition, settle the local delivery
//! 2. `rejected` and `accepted` end the loop; `rejected` is never retried
//! 3. Anything else counts as a lost attempt: bump the delivery count, back
//!    off, resend the same id
//! 4. After the loop, one bounded receive lets the peer observe the local
//!    settlement before it settles its own side
//!
//! Step 4 is a timing accommodation only. Correctness rests on the
//! receiver's deduplication store, never on the handshake.

use tracing::{Instrument, Span, debug, info, warn};

use super::policy::RetryPolicy;
use crate::core::{Outcome, Receive, Transport};
use crate::message::Message;

/// Terminal result of a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// The remote accepted the message.
    Accepted,
    /// The remote explicitly refused the message.
    Rejected,
    /// Attempts ran out without a decisive outcome.
    Failed,
}

/// What the post-delivery receive saw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handshake {
    /// Inbound activity arrived within the settle timeout.
    Observed,
    /// Nothing arrived; the peer may not have seen the local settlement.
    TimedOut,
}

/// Report of one `deliver` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    /// Terminal status.
    pub status: DeliveryStatus,
    /// Send attempts performed.
    pub attempts: u32,
    /// Settlement handshake result.
    pub handshake: Handshake,
}

impl Delivery {
    /// Whether the remote durably took the message.
    pub fn is_accepted(&self) -> bool {
        self.status == DeliveryStatus::Accepted
    }
}

/// Drives outbound messages through retry, backoff and settlement.
#[derive(Debug, Clone)]
pub struct DeliveryDriver {
    policy: RetryPolicy,
    span: Span,
}

impl DeliveryDriver {
    /// Create a driver with the given policy.
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            span: tracing::debug_span!("delivery"),
        }
    }

    /// Attach the span all delivery events are recorded under.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Retry policy in effect.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Deliver `message`, retransmitting the same id until a decisive outcome.
    ///
    /// The message's delivery count is incremented after every attempt that
    /// ended without one, so a caller resending it afterwards continues the
    /// sequence.
    pub async fn deliver<T: Transport>(
        &self,
        transport: &mut T,
        message: &mut Message,
    ) -> Delivery {
        let span = self.span.clone();
        self.drive(transport, message).instrument(span).await
    }

    async fn drive<T: Transport>(&self, transport: &mut T, message: &mut Message) -> Delivery {
        let max_attempts = self.policy.attempts();
        let mut attempts = 0;
        let mut status = DeliveryStatus::Failed;

        while attempts < max_attempts {
            attempts += 1;
            debug!(
                id = %message.id(),
                address = %message.address,
                attempt = attempts,
                delivery_count = message.delivery_count(),
                "sending message"
            );

            let outcome = match transport.send(message) {
                Ok(tracker) => {
                    transport
                        .await_disposition(tracker, self.policy.confirm_timeout)
                        .await;
                    let outcome = transport.outcome(tracker);
                    transport.settle(tracker);
                    outcome
                }
                Err(e) => {
                    warn!(id = %message.id(), error = %e, "send failed");
                    Outcome::Unknown
                }
            };

            match outcome {
                Outcome::Rejected => {
                    info!(id = %message.id(), "message rejected by remote");
                    status = DeliveryStatus::Rejected;
                    break;
                }
                Outcome::Accepted => {
                    debug!(id = %message.id(), "message accepted by remote");
                    status = DeliveryStatus::Accepted;
                    break;
                }
                Outcome::Unknown => {
                    message.mark_redelivered();
                    if attempts < max_attempts {
                        let pause = self.policy.backoff_for(attempts);
                        debug!(id = %message.id(), ?pause, "no outcome, backing off");
                        tokio::time::sleep(pause).await;
                    }
                }
            }
        }

        if status == DeliveryStatus::Failed {
            warn!(id = %message.id(), attempts, "delivery failed, attempts exhausted");
        }

        let handshake = self.settle_handshake(transport).await;

        Delivery {
            status,
            attempts,
            handshake,
        }
    }

    async fn settle_handshake<T: Transport>(&self, transport: &mut T) -> Handshake {
        match transport.receive(Some(self.policy.settle_timeout)).await {
            Ok(Receive::Ready(_)) => Handshake::Observed,
            Ok(Receive::TimedOut) => {
                warn!("settlement handshake timed out");
                Handshake::TimedOut
            }
            Err(e) => {
                warn!(error = %e, "settlement handshake receive failed");
                Handshake::TimedOut
            }
        }
    }
}

impl Default for DeliveryDriver {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Tracker, TransportError};
    use std::collections::{HashMap, VecDeque};
    use std::time::Duration;

    /// Transport double that answers sends from a script.
    #[derive(Default)]
    struct ScriptedTransport {
        outcomes: VecDeque<Outcome>,
        failing_sends: u32,
        pending: HashMap<Tracker, Outcome>,
        sent_counts: Vec<u32>,
        settled: Vec<Tracker>,
        inbound: usize,
        next: u64,
    }

    impl ScriptedTransport {
        fn with_outcomes(outcomes: &[Outcome]) -> Self {
            Self {
                outcomes: outcomes.iter().copied().collect(),
                ..Self::default()
            }
        }
    }

    impl Transport for ScriptedTransport {
        fn subscribe(&mut self, _address: &str) -> Result<(), TransportError> {
            Ok(())
        }

        fn send(&mut self, message: &Message) -> Result<Tracker, TransportError> {
            if self.failing_sends > 0 {
                self.failing_sends -= 1;
                return Err(TransportError::Unroutable(message.address.clone()));
            }
            self.next += 1;
            let tracker = Tracker(self.next);
            let outcome = self.outcomes.pop_front().unwrap_or(Outcome::Unknown);
            self.pending.insert(tracker, outcome);
            self.sent_counts.push(message.delivery_count());
            Ok(tracker)
        }

        async fn await_disposition(&mut self, tracker: Tracker, timeout: Duration) {
            if self.outcome(tracker) == Outcome::Unknown {
                tokio::time::sleep(timeout).await;
            }
        }

        fn outcome(&self, tracker: Tracker) -> Outcome {
            self.pending.get(&tracker).copied().unwrap_or(Outcome::Unknown)
        }

        fn settle(&mut self, tracker: Tracker) {
            self.pending.remove(&tracker);
            self.settled.push(tracker);
        }

        async fn receive(&mut self, timeout: Option<Duration>) -> Result<Receive, TransportError> {
            if self.inbound > 0 {
                return Ok(Receive::Ready(self.inbound));
            }
            if let Some(timeout) = timeout {
                tokio::time::sleep(timeout).await;
            }
            Ok(Receive::TimedOut)
        }

        fn get(&mut self) -> Option<(Tracker, Message)> {
            None
        }

        fn accept(&mut self, _tracker: Tracker) {}

        fn reject(&mut self, _tracker: Tracker) {}
    }

    fn driver(max_attempts: u32) -> DeliveryDriver {
        DeliveryDriver::new(
            RetryPolicy::builder()
                .max_attempts(max_attempts)
                .confirm_timeout(Duration::from_millis(500))
                .backoff(Duration::from_secs(1))
                .settle_timeout(Duration::from_millis(10))
                .build(),
        )
    }

    fn message() -> Message {
        Message::new("server", b"{}".to_vec())
    }

    #[tokio::test(start_paused = true)]
    async fn test_accepted_on_first_attempt() {
        let mut transport = ScriptedTransport::with_outcomes(&[Outcome::Accepted]);
        let mut msg = message();

        let delivery = driver(3).deliver(&mut transport, &mut msg).await;

        assert_eq!(delivery.status, DeliveryStatus::Accepted);
        assert_eq!(delivery.attempts, 1);
        assert!(delivery.is_accepted());
        assert_eq!(msg.delivery_count(), 0);
        assert_eq!(transport.settled.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_is_terminal() {
        let mut transport = ScriptedTransport::with_outcomes(&[
            Outcome::Unknown,
            Outcome::Rejected,
            Outcome::Accepted,
        ]);
        let mut msg = message();

        let delivery = driver(5).deliver(&mut transport, &mut msg).await;

        assert_eq!(delivery.status, DeliveryStatus::Rejected);
        assert_eq!(delivery.attempts, 2);
        assert_eq!(transport.sent_counts.len(), 2);
        // Rejected delivery is still settled locally
        assert_eq!(transport.settled.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_bound_without_outcome() {
        let mut transport = ScriptedTransport::default();
        let mut msg = message();
        let id = msg.id();
        let start = tokio::time::Instant::now();

        let delivery = driver(3).deliver(&mut transport, &mut msg).await;

        assert_eq!(delivery.status, DeliveryStatus::Failed);
        assert_eq!(delivery.attempts, 3);
        assert_eq!(transport.sent_counts, vec![0, 1, 2]);
        assert!(start.elapsed() >= Duration::from_secs(2));
        // Same id throughout, count continues for a later resend
        assert_eq!(msg.id(), id);
        assert_eq!(msg.delivery_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_errors_are_retried() {
        let mut transport = ScriptedTransport::with_outcomes(&[Outcome::Accepted]);
        transport.failing_sends = 1;
        let mut msg = message();

        let delivery = driver(3).deliver(&mut transport, &mut msg).await;

        assert_eq!(delivery.status, DeliveryStatus::Accepted);
        assert_eq!(delivery.attempts, 2);
        assert_eq!(transport.sent_counts, vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_attempt() {
        let mut transport = ScriptedTransport::default();
        let mut msg = message();
        let start = tokio::time::Instant::now();

        let delivery = driver(1).deliver(&mut transport, &mut msg).await;

        assert_eq!(delivery.status, DeliveryStatus::Failed);
        assert_eq!(delivery.attempts, 1);
        // No backoff after the last attempt
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_observed() {
        let mut transport = ScriptedTransport::with_outcomes(&[Outcome::Accepted]);
        transport.inbound = 1;
        let mut msg = message();

        let delivery = driver(3).deliver(&mut transport, &mut msg).await;
        assert_eq!(delivery.handshake, Handshake::Observed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_timeout_keeps_outcome() {
        let mut transport = ScriptedTransport::with_outcomes(&[Outcome::Accepted]);
        let mut msg = message();

        let delivery = driver(3).deliver(&mut transport, &mut msg).await;

        assert_eq!(delivery.handshake, Handshake::TimedOut);
        assert_eq!(delivery.status, DeliveryStatus::Accepted);
    }

    /// Log sink shared between the subscriber and the test.
    #[derive(Clone, Default)]
    struct Captured(std::sync::Arc<parking_lot::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_timeout_logs_warning() {
        let logs = Captured::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let mut transport = ScriptedTransport::with_outcomes(&[Outcome::Accepted]);
        let delivery = driver(1).deliver(&mut transport, &mut message()).await;
        assert_eq!(delivery.handshake, Handshake::TimedOut);

        let output = String::from_utf8(logs.0.lock().clone()).unwrap();
        let line = output
            .lines()
            .find(|line| line.contains("settlement handshake timed out"))
            .unwrap();
        assert!(line.contains("WARN"), "{line}");
    }
}
