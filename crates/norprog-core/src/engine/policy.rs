//! Retry and status-polling policy

use core::time::Duration;

/// How hard the engine tries before giving up on a unit
///
/// A unit is one read chunk, one page program or one sector erase. Each
/// unit gets `max_attempts` tries; a status poll that exceeds
/// `ready_timeout` counts as one failed try.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnginePolicy {
    /// Attempts per unit, including the first one
    pub max_attempts: u32,
    /// Delay between two status register reads
    pub poll_interval: Duration,
    /// Longest time to wait for the busy bit to clear
    pub ready_timeout: Duration,
}

impl EnginePolicy {
    /// Default attempts per unit
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
    /// Default delay between status polls
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);
    /// Default busy timeout
    pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(10);

    /// Set the attempts per unit (at least 1)
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Set the delay between status polls
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the busy timeout
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }
}

impl Default for EnginePolicy {
    fn default() -> Self {
        Self {
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
            ready_timeout: Self::DEFAULT_READY_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let policy = EnginePolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.poll_interval, Duration::from_millis(10));
        assert_eq!(policy.ready_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_attempts_never_zero() {
        assert_eq!(EnginePolicy::default().with_max_attempts(0).max_attempts, 1);
    }
}
