//! Deduplication layer
//!
//! Lets a receiver recognize a retransmitted request and re-answer it without
//! repeating its side effect, for a bounded window after each sighting.

mod store;

pub use store::*;
