//! Retry policy for reliable delivery.

use std::time::Duration;

use tracing::warn;

use crate::core::constants::{
    DEFAULT_BACKOFF, DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_CONFIRM_TIMEOUT, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_SETTLE_TIMEOUT, MAX_BACKOFF,
};

/// How hard the driver tries before giving up on a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Send attempts per delivery (at least 1).
    pub max_attempts: u32,

    /// How long one attempt waits for the remote disposition.
    pub confirm_timeout: Duration,

    /// Pause after the first undecided attempt.
    pub backoff: Duration,

    /// Growth factor of the pause after each further undecided attempt.
    pub backoff_multiplier: u32,

    /// Upper bound on the pause.
    pub max_backoff: Duration,

    /// Bounded receive after the loop for the settlement handshake.
    pub settle_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            confirm_timeout: DEFAULT_CONFIRM_TIMEOUT,
            backoff: DEFAULT_BACKOFF,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_backoff: MAX_BACKOFF,
            settle_timeout: DEFAULT_SETTLE_TIMEOUT,
        }
    }
}

impl RetryPolicy {
    /// Start building a policy from the defaults.
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::new()
    }

    /// Attempts the driver will actually make; never less than one.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Pause after the `attempt`-th undecided attempt (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let mut pause = self.backoff.min(self.max_backoff);
        for _ in 1..attempt {
            pause = pause
                .checked_mul(self.backoff_multiplier)
                .unwrap_or(self.max_backoff)
                .min(self.max_backoff);
            if pause == self.max_backoff {
                break;
            }
        }
        pause
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Default)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of send attempts; zero is raised to one.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        if attempts == 0 {
            warn!("max_attempts of 0 cannot guarantee a send, using 1");
        }
        self.policy.max_attempts = attempts.max(1);
        self
    }

    /// Set the per-attempt confirmation timeout.
    pub fn confirm_timeout(mut self, timeout: Duration) -> Self {
        self.policy.confirm_timeout = timeout;
        self
    }

    /// Set the pause between undecided attempts.
    pub fn backoff(mut self, backoff: Duration) -> Self {
        self.policy.backoff = backoff;
        self
    }

    /// Grow the pause by `multiplier` after each undecided attempt.
    pub fn backoff_multiplier(mut self, multiplier: u32) -> Self {
        self.policy.backoff_multiplier = multiplier.max(1);
        self
    }

    /// Cap the pause.
    pub fn max_backoff(mut self, max: Duration) -> Self {
        self.policy.max_backoff = max;
        self
    }

    /// Set the settlement handshake timeout (zero polls once).
    pub fn settle_timeout(mut self, timeout: Duration) -> Self {
        self.policy.settle_timeout = timeout;
        self
    }

    /// Build the policy.
    pub fn build(self) -> RetryPolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.attempts(), DEFAULT_MAX_ATTEMPTS);
        assert_eq!(policy.backoff_for(1), DEFAULT_BACKOFF);
        assert_eq!(policy.backoff_for(5), DEFAULT_BACKOFF);
    }

    #[test]
    fn test_zero_attempts_clamped() {
        let policy = RetryPolicy::builder().max_attempts(0).build();
        assert_eq!(policy.max_attempts, 1);

        let raw = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        assert_eq!(raw.attempts(), 1);
    }

    #[test]
    fn test_exponential_backoff() {
        let policy = RetryPolicy::builder()
            .backoff(Duration::from_millis(100))
            .backoff_multiplier(2)
            .max_backoff(Duration::from_millis(500))
            .build();

        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(400));
        assert_eq!(policy.backoff_for(4), Duration::from_millis(500));
        assert_eq!(policy.backoff_for(40), Duration::from_millis(500));
    }

    #[test]
    fn test_backoff_capped_from_start() {
        let policy = RetryPolicy::builder()
            .backoff(Duration::from_secs(120))
            .max_backoff(Duration::from_secs(60))
            .build();
        assert_eq!(policy.backoff_for(1), Duration::from_secs(60));
    }
}
