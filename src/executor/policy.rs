use crate::config::OrchestratorConfig;
use crate::error::{Backoff, ErrorKind};
use std::time::Duration;

/// Upper bound on the exponential factor (2^16)
const MAX_EXPONENT: u32 = 16;

/// Bounded retries; the error kind decides both retryability and backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts allowed after the first one
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self::new(config.max_retries, config.retry_base_delay)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Wait before the next attempt after `attempt` (0-based) failed with
    /// `kind`, or `None` when no retry should happen.
    pub fn next_delay(&self, kind: ErrorKind, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_retries {
            return None;
        }
        match kind.backoff()? {
            Backoff::Exponential => {
                let factor = 1u32 << attempt.min(MAX_EXPONENT);
                Some(self.base_delay.saturating_mul(factor))
            }
            Backoff::Constant => Some(self.base_delay),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&OrchestratorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        let delays: Vec<_> = (0..4)
            .map(|a| policy.next_delay(ErrorKind::TransientService, a))
            .collect();
        assert_eq!(
            delays,
            vec![
                Some(Duration::from_millis(100)),
                Some(Duration::from_millis(200)),
                Some(Duration::from_millis(400)),
                None
            ]
        );
    }

    #[test]
    fn test_constant_backoff() {
        let policy = RetryPolicy::new(2, Duration::from_millis(100));
        assert_eq!(policy.next_delay(ErrorKind::GenericStage, 0), Some(Duration::from_millis(100)));
        assert_eq!(policy.next_delay(ErrorKind::GenericStage, 1), Some(Duration::from_millis(100)));
        assert_eq!(policy.next_delay(ErrorKind::GenericStage, 2), None);
    }

    #[test]
    fn test_non_retryable_kinds() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100));
        assert_eq!(policy.next_delay(ErrorKind::Validation, 0), None);
        assert_eq!(policy.next_delay(ErrorKind::Configuration, 0), None);
        assert_eq!(policy.next_delay(ErrorKind::RateLimited, 0), None);
    }

    #[test]
    fn test_zero_retries_and_large_attempts() {
        assert_eq!(RetryPolicy::new(0, Duration::from_secs(1)).next_delay(ErrorKind::GenericStage, 0), None);

        let policy = RetryPolicy::new(u32::MAX, Duration::from_secs(1));
        assert_eq!(
            policy.next_delay(ErrorKind::TransientService, 40),
            Some(Duration::from_secs(1 << 16))
        );
        assert_eq!(policy.max_attempts(), u32::MAX);
    }
}
