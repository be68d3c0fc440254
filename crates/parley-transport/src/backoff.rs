//! Retry delays.

use std::time::Duration;

use crate::ConnectionStatus;

/// Answers "how long should I wait before the next attempt?".
///
/// A supervisor asks its policy before every Pending attempt, including the
/// first one. `attempt` counts consecutive attempts since the last
/// successful connection, starting at 0.
pub trait RetryPolicy: Send + Sync + 'static {
    fn retry_delay(&self, attempt: u32, last: ConnectionStatus) -> Duration;
}

/// Capped exponential backoff.
///
/// Attempt 0 waits nothing; attempt `n` waits `initial * factor^(n-1)`,
/// never more than `max`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    pub factor: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(10),
            factor: 2.0,
        }
    }
}

impl Backoff {
    /// A policy that always retries immediately. Useful in tests.
    pub fn immediate() -> Self {
        Self {
            initial: Duration::ZERO,
            max: Duration::ZERO,
            factor: 1.0,
        }
    }

    /// Clamps out-of-range values so the policy is safe to use.
    pub fn validated(mut self) -> Self {
        if !self.factor.is_finite() || self.factor < 1.0 {
            self.factor = 1.0;
        }
        if self.initial > self.max {
            self.initial = self.max;
        }
        self
    }

    /// Delay before attempt number `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exp = self.factor.powi(attempt.saturating_sub(1).min(32) as i32);
        let secs = self.initial.as_secs_f64() * exp;
        if secs >= self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

impl RetryPolicy for Backoff {
    fn retry_delay(&self, attempt: u32, _last: ConnectionStatus) -> Duration {
        self.delay(attempt)
    }
}
