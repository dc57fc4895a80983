//! Server role
//!
//! [`RequestProcessor`] answers requests exactly once per id within the
//! deduplication window; [`CommandHandler`] implementations hold the state
//! the requests act on.

mod handler;
mod processor;

pub use handler::*;
pub use processor::*;
