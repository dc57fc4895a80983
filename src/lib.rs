//! # once-exchange
//!
//! Effectively-once request/reply over an at-least-once message transport.
//!
//! A transport that redelivers, drops acknowledgments or times out leaves
//! two retry loops facing each other: the sender resends until confirmed,
//! the receiver remembers what it already did. This crate reconciles them:
//!
//! - **Deduplication**: a TTL cache of handled request ids and their replies
//! - **Reliable delivery**: bounded retransmission of one id with backoff,
//!   terminal rejection, and a best-effort settlement handshake
//! - **Processor**: applies each request id once per window, answers
//!   retransmissions with `DUPLICATE` and the recorded result
//! - **Issuer**: mints an id, retransmits it, correlates the response
//!
//! ## Feature Flags
//!
//! - `transport` (default): delivery driver and in-memory transport
//! - `server` (default): request processor and command handlers
//! - `client` (default): request issuer
//!
//! ## Modules
//!
//! - [`core`]: constants, error types and the [`Transport`] contract (always included)
//! - [`message`]: envelope and body codec (always included)
//! - [`dedup`]: deduplication store (always included)
//! - [`delivery`]: reliable delivery driver (requires `transport`)
//! - [`transport`]: in-memory transport (requires `transport`)
//! - [`server`]: request processor (requires `server`)
//! - [`client`]: request issuer (requires `client`)
//!
//! ## Example Usage
//!
//! ```rust
//! use std::time::{Duration, Instant};
//! use once_exchange::prelude::*;
//!
//! let now = Instant::now();
//! let mut seen: DedupStore<String> = DedupStore::new();
//!
//! let id = MessageId::new();
//! seen.remember(id.key(), Some("hi".to_string()), now + Duration::from_secs(5));
//!
//! assert!(seen.is_duplicate_at(&id.key(), now + Duration::from_secs(1)));
//! assert!(!seen.is_duplicate_at(&id.key(), now + Duration::from_secs(5)));
//! assert_eq!(seen.purge_expired_at(now + Duration::from_secs(6)), None);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

// Message model (always included)
pub mod message;

// Deduplication store (always included)
pub mod dedup;

// Delivery and transport layers (feature-gated)
#[cfg(feature = "transport")]
#[cfg_attr(docsrs, doc(cfg(feature = "transport")))]
pub mod delivery;

#[cfg(feature = "transport")]
#[cfg_attr(docsrs, doc(cfg(feature = "transport")))]
pub mod transport;

// Server API (feature-gated)
#[cfg(feature = "server")]
#[cfg_attr(docsrs, doc(cfg(feature = "server")))]
pub mod server;

// Client API (feature-gated)
#[cfg(feature = "client")]
#[cfg_attr(docsrs, doc(cfg(feature = "client")))]
pub mod client;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::*;
    pub use crate::dedup::*;
    pub use crate::message::*;

    #[cfg(feature = "transport")]
    pub use crate::delivery::*;

    #[cfg(feature = "transport")]
    pub use crate::transport::*;

    #[cfg(feature = "server")]
    pub use crate::server::*;

    #[cfg(feature = "client")]
    pub use crate::client::*;
}

// Re-export commonly used items at crate root
pub use crate::core::{ExchangeError, Outcome, Transport};
pub use crate::dedup::DedupStore;
pub use crate::message::{Body, Message, MessageId, Status};

#[cfg(feature = "transport")]
pub use crate::delivery::{DeliveryDriver, DeliveryStatus, RetryPolicy};

#[cfg(feature = "server")]
pub use crate::server::{ProcessorBuilder, RequestProcessor};

#[cfg(feature = "client")]
pub use crate::client::{IssuerBuilder, RequestIssuer};
