//! Message envelope
//!
//! Transport-level fields wrapped around an opaque, application-encoded body.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::body::Body;
use crate::core::MessageError;

/// Unique message identifier (128-bit, random).
///
/// Stable across retransmissions of the same logical request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Mint a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// String form used as a deduplication key.
    pub fn key(&self) -> String {
        self.0.to_string()
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for MessageId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// A message as handed to and received from the transport.
///
/// `id` and `delivery_count` are only reachable through methods: an id is
/// never reassigned, and the count only ever grows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Immutable identity of this logical message
    id: MessageId,
    /// Id of the request this message answers
    pub correlation_id: Option<MessageId>,
    /// Destination address
    pub address: String,
    /// Where a response must be sent; `None` means no response expected
    pub reply_to: Option<String>,
    /// Retransmissions of this id so far (0 = first transmission)
    delivery_count: u32,
    /// Time-to-live in transit
    pub ttl: Option<Duration>,
    /// Encoded body
    pub body: Vec<u8>,
}

impl Message {
    /// Create a message with a fresh id.
    pub fn new(address: impl Into<String>, body: Vec<u8>) -> Self {
        Self::with_id(MessageId::new(), address, body)
    }

    /// Create a message with a caller-chosen id.
    pub fn with_id(id: MessageId, address: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            id,
            correlation_id: None,
            address: address.into(),
            reply_to: None,
            delivery_count: 0,
            ttl: None,
            body,
        }
    }

    /// Create a message carrying an encoded [`Body`].
    pub fn from_body(address: impl Into<String>, body: &Body) -> Result<Self, MessageError> {
        Ok(Self::new(address, body.encode()?))
    }

    /// Set the reply-to address.
    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    /// Set the time-to-live.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Build the response to this message.
    ///
    /// Returns `None` when the sender asked for no response.
    pub fn reply(&self, body: &Body) -> Option<Result<Message, MessageError>> {
        let reply_to = self.reply_to.as_ref()?;
        Some(Message::from_body(reply_to.clone(), body).map(|mut msg| {
            msg.correlation_id = Some(self.id);
            msg
        }))
    }

    /// Message id.
    pub fn id(&self) -> MessageId {
        self.id
    }

    /// Number of times this id has been retransmitted.
    pub fn delivery_count(&self) -> u32 {
        self.delivery_count
    }

    /// Whether the sender has transmitted this id before.
    pub fn is_retransmission(&self) -> bool {
        self.delivery_count != 0
    }

    /// Record one more transmission of the same id.
    pub fn mark_redelivered(&mut self) {
        self.delivery_count = self.delivery_count.saturating_add(1);
    }

    /// Whether this message answers the request `id`.
    pub fn correlates_with(&self, id: MessageId) -> bool {
        self.correlation_id == Some(id)
    }

    /// Decode the body as a request.
    pub fn decode_request(&self) -> Result<Body, MessageError> {
        Body::decode_request(&self.body)
    }

    /// Decode the body as a response.
    pub fn decode_response(&self) -> Result<Body, MessageError> {
        Body::decode_response(&self.body)
    }
}
