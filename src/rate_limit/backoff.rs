//! Backoff Controller
//!
//! Exponential delay for a saturated resource:
//! delay = base * 2^consecutive_backoffs (2s, 4s, 8s, 16s, 32s for base 2s)
//!
//! The counter is shared by all callers of one resource and is only reset by a
//! successful grant. Once it reaches the attempt ceiling the in-flight
//! admission fails instead of receiving another delay.

use std::time::Duration;
use tracing::debug;

use super::config::ResourceLimit;

/// Outcome of asking for a backoff delay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffDecision {
    /// Suspend for this long, then re-check
    Wait(Duration),
    /// Attempt ceiling reached
    GiveUp { attempts: u32 },
}

/// Consecutive-saturation counter and delay policy for one resource
#[derive(Debug, Clone)]
pub struct BackoffController {
    base_delay: Duration,
    max_attempts: u32,
    consecutive_backoffs: u32,
}

impl BackoffController {
    pub fn new(base_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_attempts,
            consecutive_backoffs: 0,
        }
    }

    pub fn for_limit(limit: &ResourceLimit) -> Self {
        Self::new(limit.base_retry_delay(), limit.max_retry_attempts)
    }

    /// Next delay, incrementing the counter; `GiveUp` once the ceiling is hit
    pub fn compute_delay(&mut self) -> BackoffDecision {
        if self.consecutive_backoffs >= self.max_attempts {
            debug!(
                "Max backoff attempts ({}) exceeded, giving up",
                self.max_attempts
            );
            return BackoffDecision::GiveUp {
                attempts: self.max_attempts,
            };
        }

        let delay = delay_for_attempt(self.base_delay, self.consecutive_backoffs);
        self.consecutive_backoffs += 1;
        BackoffDecision::Wait(delay)
    }

    /// Clear the counter after a grant
    pub fn reset(&mut self) {
        self.consecutive_backoffs = 0;
    }

    pub fn consecutive_backoffs(&self) -> u32 {
        self.consecutive_backoffs
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.consecutive_backoffs >= self.max_attempts
    }
}

/// base * 2^attempt, saturating
pub fn delay_for_attempt(base: Duration, attempt: u32) -> Duration {
    let factor = 2_u32.checked_pow(attempt).unwrap_or(u32::MAX);
    base.saturating_mul(factor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_exponential_sequence() {
        let mut backoff = BackoffController::new(Duration::from_secs(2), 5);

        let delays: Vec<BackoffDecision> = (0..6).map(|_| backoff.compute_delay()).collect();

        assert_eq!(
            delays,
            vec![
                BackoffDecision::Wait(Duration::from_secs(2)),
                BackoffDecision::Wait(Duration::from_secs(4)),
                BackoffDecision::Wait(Duration::from_secs(8)),
                BackoffDecision::Wait(Duration::from_secs(16)),
                BackoffDecision::Wait(Duration::from_secs(32)),
                BackoffDecision::GiveUp { attempts: 5 },
            ]
        );
        assert!(backoff.is_exhausted());
    }

    #[test]
    fn test_give_up_does_not_increment() {
        let mut backoff = BackoffController::new(Duration::from_secs(1), 1);
        assert_eq!(backoff.compute_delay(), BackoffDecision::Wait(Duration::from_secs(1)));
        assert_eq!(backoff.compute_delay(), BackoffDecision::GiveUp { attempts: 1 });
        assert_eq!(backoff.compute_delay(), BackoffDecision::GiveUp { attempts: 1 });
        assert_eq!(backoff.consecutive_backoffs(), 1);
    }

    #[test]
    fn test_reset_restarts_sequence() {
        let mut backoff = BackoffController::for_limit(&ResourceLimit::new(30, 300, 3, 4));
        backoff.compute_delay();
        backoff.compute_delay();
        assert_eq!(backoff.consecutive_backoffs(), 2);

        backoff.reset();
        assert_eq!(backoff.consecutive_backoffs(), 0);
        assert_eq!(backoff.compute_delay(), BackoffDecision::Wait(Duration::from_secs(3)));
    }

    #[test]
    fn test_large_attempt_saturates() {
        let delay = delay_for_attempt(Duration::from_secs(2), 64);
        assert!(delay >= Duration::from_secs(u64::from(u32::MAX)));
    }

    proptest! {
        #[test]
        fn prop_delay_doubles(base in 1u64..60, attempt in 0u32..20) {
            let base = Duration::from_secs(base);
            let current = delay_for_attempt(base, attempt);
            let next = delay_for_attempt(base, attempt + 1);
            prop_assert_eq!(next, current * 2);
        }

        #[test]
        fn prop_counter_bounded(max in 1u32..10, calls in 0usize..30) {
            let mut backoff = BackoffController::new(Duration::from_secs(1), max);
            for _ in 0..calls {
                backoff.compute_delay();
            }
            prop_assert!(backoff.consecutive_backoffs() <= max);
        }
    }
}
