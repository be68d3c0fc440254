//! Matchmaking timeouts and retry pacing.

use std::time::Duration;

use parley_transport::Backoff;

/// Settings for one [`MatchmakingClient`](crate::MatchmakingClient).
#[derive(Debug, Clone)]
pub struct MatchmakingConfig {
    /// Upper bound on a single rendezvous request/reply exchange.
    pub request_timeout: Duration,

    /// How long to wait before re-submitting a promised ticket.
    pub promise_poll: Duration,

    /// Sustained failure for this long emits one `StillTrying` per dial.
    pub still_trying_after: Duration,

    /// Upper bound on one traversal attempt with a matched peer.
    pub traversal_timeout: Duration,

    /// Pacing between recoverable failures.
    pub retry: Backoff,
}

impl Default for MatchmakingConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            promise_poll: Duration::from_secs(2),
            still_trying_after: Duration::from_secs(45),
            traversal_timeout: Duration::from_secs(10),
            retry: Backoff {
                initial: Duration::from_secs(1),
                max: Duration::from_secs(15),
                factor: 2.0,
            },
        }
    }
}

impl MatchmakingConfig {
    /// Replaces zero timeouts with the defaults.
    pub fn validated(self) -> Self {
        let defaults = Self::default();
        let nonzero = |d: Duration, fallback: Duration| if d.is_zero() { fallback } else { d };
        Self {
            request_timeout: nonzero(self.request_timeout, defaults.request_timeout),
            promise_poll: nonzero(self.promise_poll, defaults.promise_poll),
            still_trying_after: self.still_trying_after,
            traversal_timeout: nonzero(self.traversal_timeout, defaults.traversal_timeout),
            retry: self.retry.validated(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validated_replaces_zero_timeouts() {
        let config = MatchmakingConfig {
            request_timeout: Duration::ZERO,
            promise_poll: Duration::ZERO,
            ..Default::default()
        }
        .validated();
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.promise_poll, Duration::from_secs(2));
    }

    #[test]
    fn test_default_still_trying_threshold() {
        assert_eq!(
            MatchmakingConfig::default().still_trying_after,
            Duration::from_secs(45)
        );
    }
}
