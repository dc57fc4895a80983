//! Core constants, error types and the transport contract.

pub mod constants;
mod error;
mod traits;

pub use error::*;
pub use traits::*;
