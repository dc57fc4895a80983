//! Messages exchanged between issuer and processor.
//!
//! - [`Message`]: transport envelope (id, correlation id, reply-to,
//!   delivery count, TTL) around an encoded body
//! - [`Body`]: the structured `type`/`command`/`value`/`status` record

mod body;
mod envelope;

pub use body::*;
pub use envelope::*;
