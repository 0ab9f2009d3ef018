//! Reconnect backoff policy.

use std::time::Duration;

use crate::constants::{BACKOFF_JITTER, INITIAL_BACKOFF, MAX_BACKOFF};

/// Exponential backoff with a cap and additive random jitter.
///
/// Attempt `n` (1-based) waits `min(initial * multiplier^(n-1), max)` plus a
/// uniformly random amount in `[0, jitter)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub initial: Duration,
    /// Upper bound on the base delay.
    pub max: Duration,
    /// Growth factor per attempt.
    pub multiplier: u32,
    /// Maximum random jitter added to each delay.
    pub jitter: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: INITIAL_BACKOFF,
            max: MAX_BACKOFF,
            multiplier: 2,
            jitter: BACKOFF_JITTER,
        }
    }
}

impl BackoffPolicy {
    /// A fixed delay with no growth and no jitter.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial: delay,
            max: delay,
            multiplier: 1,
            jitter: Duration::ZERO,
        }
    }

    /// Base delay for `attempt`, without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = self.multiplier.max(1).saturating_pow(exponent);
        self.initial.saturating_mul(factor).min(self.max)
    }

    /// Delay for `attempt`, including jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        let extra = if jitter_ms == 0 {
            0
        } else {
            rand::random::<u64>() % jitter_ms
        };
        self.base_delay(attempt) + Duration::from_millis(extra)
    }
}
