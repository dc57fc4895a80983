//! Reliable delivery layer
//!
//! Implements:
//! - Bounded retransmission of the same message id
//! - Fixed or exponential backoff between undecided attempts
//! - Terminal handling of remote rejection
//! - Best-effort settlement handshake after each delivery

mod driver;
mod policy;

pub use driver::*;
pub use policy::*;
