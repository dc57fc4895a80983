//! Default timings and wire constants.
//!
//! Every value here is a default; the builders on the driver, processor and
//! issuer override them per instance.

use std::time::Duration;

// =============================================================================
// DEDUPLICATION
// =============================================================================

/// How long a processed request id is remembered after each sighting.
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(60);

// =============================================================================
// RELIABLE DELIVERY
// =============================================================================

/// Send attempts per delivery before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// How long one attempt waits for the remote disposition.
pub const DEFAULT_CONFIRM_TIMEOUT: Duration = Duration::from_secs(1);

/// Pause between attempts that ended without a decisive outcome.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);

/// Backoff multiplier applied after each undecided attempt (1 = fixed backoff).
pub const DEFAULT_BACKOFF_MULTIPLIER: u32 = 1;

/// Upper bound on the backoff pause.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Stand-in for "never" when a deadline would overflow `Instant`.
pub const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Bounded receive after a delivery, giving the peer a chance to settle.
pub const DEFAULT_SETTLE_TIMEOUT: Duration = Duration::from_millis(100);

// =============================================================================
// ISSUER
// =============================================================================

/// How long the issuer waits for a correlated response per attempt.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Request retransmissions the issuer performs before reporting an unknown outcome.
pub const DEFAULT_REQUEST_ATTEMPTS: u32 = 3;

// =============================================================================
// BODY FIELDS
// =============================================================================

/// Status of a freshly applied request.
pub const STATUS_OK: &str = "OK";

/// Status of a request recognized as a retransmission.
pub const STATUS_DUPLICATE: &str = "DUPLICATE";

/// Read the current value.
pub const COMMAND_GET: &str = "get";

/// Replace the current value.
pub const COMMAND_SET: &str = "set";

/// Add to a ledger balance.
pub const COMMAND_DEPOSIT: &str = "deposit";

/// Subtract from a ledger balance.
pub const COMMAND_WITHDRAW: &str = "withdraw";

/// Value held by a fresh [`ValueStore`](crate::server::ValueStore).
pub const DEFAULT_VALUE: &str = "You killed Kenny!";
