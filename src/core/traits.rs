//! The transport contract consumed by the exchange.
//!
//! Connection setup, routing, framing and encryption live behind this trait.
//! The exchange only ever sends, receives, disposes and settles deliveries.

use std::fmt;
use std::time::Duration;

use super::error::TransportError;
use crate::message::Message;

/// Handle for one outbound or inbound delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tracker(pub u64);

impl fmt::Display for Tracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Remote outcome of an outbound delivery, as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// No disposition yet (or it was lost).
    Unknown,
    /// The remote took responsibility for the message.
    Accepted,
    /// The remote refused the message.
    Rejected,
}

impl Outcome {
    /// Whether the outcome settles the delivery one way or the other.
    pub fn is_decisive(self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

/// Result of a blocking receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Receive {
    /// Inbound deliveries are queued; the count is how many.
    Ready(usize),
    /// The timeout elapsed with nothing to read.
    TimedOut,
}

/// An unreliable, at-least-once message transport.
///
/// # Contract
///
/// - `send` enqueues without blocking; confirmation arrives asynchronously
///   and is observed through `await_disposition` + `outcome`
/// - `settle` releases local bookkeeping for an outbound delivery once its
///   outcome has been consumed
/// - `receive` blocks until at least one inbound delivery is queued, or the
///   timeout elapses (`None` blocks indefinitely); `get` pulls one delivery
/// - every inbound delivery is terminally disposed with `accept` or `reject`
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Register to receive deliveries addressed to `address`.
    fn subscribe(&mut self, address: &str) -> Result<(), TransportError>;

    /// Enqueue `message` for transmission to its address.
    fn send(&mut self, message: &Message) -> Result<Tracker, TransportError>;

    /// Wait up to `timeout` for the remote to dispose of an outbound delivery.
    ///
    /// Returns as soon as the outcome is decisive. Timing out is not an error.
    async fn await_disposition(&mut self, tracker: Tracker, timeout: Duration);

    /// Current outcome of an outbound delivery.
    fn outcome(&self, tracker: Tracker) -> Outcome;

    /// Release local bookkeeping for an outbound delivery.
    fn settle(&mut self, tracker: Tracker);

    /// Block up to `timeout` for inbound deliveries.
    async fn receive(&mut self, timeout: Option<Duration>) -> Result<Receive, TransportError>;

    /// Pull the next queued inbound delivery.
    fn get(&mut self) -> Option<(Tracker, Message)>;

    /// Accept an inbound delivery.
    fn accept(&mut self, tracker: Tracker);

    /// Reject an inbound delivery.
    fn reject(&mut self, tracker: Tracker);
}
