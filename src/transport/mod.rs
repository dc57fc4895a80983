//! In-process transport
//!
//! Implements the [`Transport`](crate::core::Transport) contract over shared
//! memory so processor and issuer can run inside one process:
//!
//! - **Routing**: [`MemoryNetwork`] maps subscribed addresses to endpoints
//! - **Dispositions**: receiver `accept`/`reject` flow back to the sender's tracker
//! - **TTL**: messages expire in transit once their time-to-live elapses
//! - **Faults**: [`FaultConfig`] plus scripted drops and lost dispositions

mod faults;
mod memory;

pub use faults::FaultConfig;
pub use memory::*;
