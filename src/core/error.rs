//! Error types for the exchange.
//!
//! Timeouts, rejections and duplicates are expected outcomes and travel as
//! return values. The enums here cover the conditions that are genuinely
//! exceptional for the caller.

use thiserror::Error;

/// Errors encoding or decoding a message body.
#[derive(Debug, Error)]
pub enum MessageError {
    /// Body is not a valid structured record.
    #[error("invalid body encoding: {0}")]
    InvalidEncoding(#[from] serde_json::Error),

    /// Body decoded, but carries the wrong `type` for this role.
    #[error("unexpected message type: expected {expected}, got {actual}")]
    UnexpectedType {
        /// Type the receiver requires.
        expected: &'static str,
        /// Type found in the body.
        actual: &'static str,
    },

    /// A response body without a `status` field.
    #[error("response is missing its status")]
    MissingStatus,
}

/// Transport contract failures.
///
/// A timed-out or undecided delivery is not a `TransportError`; see
/// [`Outcome`](super::Outcome) and [`Receive`](super::Receive).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No endpoint is subscribed at the destination address.
    #[error("no route to address: {0}")]
    Unroutable(String),

    /// Another endpoint already owns the address.
    #[error("address already subscribed: {0}")]
    AddressInUse(String),

    /// The message carries no destination.
    #[error("message has no destination address")]
    MissingAddress,

    /// The endpoint or network is gone.
    #[error("transport closed")]
    Closed,
}

/// Errors raised by a command handler while applying a request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// The handler does not know the command.
    #[error("unsupported command: {0}")]
    Unsupported(String),

    /// The value cannot be interpreted for this command.
    #[error("invalid value for {command}: {value:?}")]
    InvalidValue {
        /// Command being applied.
        command: String,
        /// Offending value.
        value: String,
    },

    /// The command is well-formed but the handler refuses to apply it.
    #[error("refused: {0}")]
    Refused(String),
}

impl CommandError {
    /// Whether the request should be treated as malformed input.
    ///
    /// Malformed requests are rejected at the transport and never answered.
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Unsupported(_) | Self::InvalidValue { .. })
    }
}

/// Errors reported to a request issuer.
#[derive(Debug, Error)]
pub enum IssueError {
    /// The remote explicitly rejected the request delivery.
    #[error("request {id} rejected by remote")]
    Rejected {
        /// Request id.
        id: String,
    },

    /// Attempts exhausted without a correlated response; the request may or
    /// may not have been applied.
    #[error("no response to request {id} after {attempts} attempts")]
    NoResponse {
        /// Request id.
        id: String,
        /// Transmissions performed.
        attempts: u32,
    },

    /// The remote answered with an error status.
    #[error("request {id} failed: {status}")]
    Failed {
        /// Request id.
        id: String,
        /// Status text from the response.
        status: String,
    },

    /// Body encoding error.
    #[error("message error: {0}")]
    Message(#[from] MessageError),

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Top-level errors.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// Message error.
    #[error("message error: {0}")]
    Message(#[from] MessageError),

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Command error.
    #[error("command error: {0}")]
    Command(#[from] CommandError),

    /// Issuer error.
    #[error("issue error: {0}")]
    Issue(#[from] IssueError),
}
