//! Client role
//!
//! [`RequestIssuer`] sends requests under a stable id and correlates the
//! responses that come back.

mod issuer;

pub use issuer::*;
