//! Request/response body
//!
//! The application payload is a structured record with string keys:
//!
//! ```text
//! { "type": "request" | "response",
//!   "command": <operation name>,
//!   "value": <payload>,
//!   "status": "OK" | "DUPLICATE" | <error> }     (responses only)
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::MessageError;
use crate::core::constants::{STATUS_DUPLICATE, STATUS_OK};

/// Body `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Issuer to processor.
    Request,
    /// Processor to issuer.
    Response,
}

impl MessageKind {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Response => "response",
        }
    }
}

/// Response status.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Status {
    /// Applied on this delivery.
    Ok,
    /// Recognized retransmission; the side effect was suppressed.
    Duplicate,
    /// The request could not be applied.
    Error(String),
}

impl Status {
    /// `OK` or `DUPLICATE`: the value is authoritative either way.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Ok | Self::Duplicate)
    }

    /// Error status for `reason`.
    ///
    /// A reason spelled like a success status is prefixed so it cannot be
    /// read back as success.
    pub fn error(reason: impl Into<String>) -> Self {
        Self::Error(escape_reason(reason.into()))
    }

    /// Wire form.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Ok => STATUS_OK,
            Self::Duplicate => STATUS_DUPLICATE,
            Self::Error(reason) => reason,
        }
    }
}

fn escape_reason(reason: String) -> String {
    if reason == STATUS_OK || reason == STATUS_DUPLICATE {
        format!("error: {reason}")
    } else {
        reason
    }
}

impl From<String> for Status {
    fn from(s: String) -> Self {
        match s.as_str() {
            STATUS_OK => Self::Ok,
            STATUS_DUPLICATE => Self::Duplicate,
            _ => Self::Error(s),
        }
    }
}

impl From<Status> for String {
    fn from(status: Status) -> Self {
        match status {
            Status::Error(reason) => escape_reason(reason),
            other => other.as_str().to_owned(),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured request/response payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Body {
    /// Request or response.
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Operation name (`get`, `set`, ...).
    pub command: String,
    /// Command payload or result.
    pub value: String,
    /// Response status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
}

impl Body {
    /// Create a request body.
    pub fn request(command: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Request,
            command: command.into(),
            value: value.into(),
            status: None,
        }
    }

    /// Create a response body.
    pub fn response(command: impl Into<String>, value: impl Into<String>, status: Status) -> Self {
        Self {
            kind: MessageKind::Response,
            command: command.into(),
            value: value.into(),
            status: Some(status),
        }
    }

    /// Encode to wire format.
    pub fn encode(&self) -> Result<Vec<u8>, MessageError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode from wire format without checking the type.
    pub fn decode(data: &[u8]) -> Result<Self, MessageError> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Decode a body that must be a request.
    pub fn decode_request(data: &[u8]) -> Result<Self, MessageError> {
        let body = Self::decode(data)?;
        body.expect_kind(MessageKind::Request)?;
        Ok(body)
    }

    /// Decode a body that must be a response carrying a status.
    pub fn decode_response(data: &[u8]) -> Result<Self, MessageError> {
        let body = Self::decode(data)?;
        body.expect_kind(MessageKind::Response)?;
        if body.status.is_none() {
            return Err(MessageError::MissingStatus);
        }
        Ok(body)
    }

    fn expect_kind(&self, expected: MessageKind) -> Result<(), MessageError> {
        if self.kind == expected {
            Ok(())
        } else {
            Err(MessageError::UnexpectedType {
                expected: expected.as_str(),
                actual: self.kind.as_str(),
            })
        }
    }
}
