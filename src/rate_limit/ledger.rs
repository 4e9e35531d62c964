//! Request History Ledger
//!
//! Rolling log of grant timestamps for one resource. Usage against a quota
//! window is the number of grants whose age is within that window.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// One-minute quota window
pub const MINUTE_WINDOW: Duration = Duration::from_secs(60);

/// One-hour quota window, the widest one tracked
pub const HOUR_WINDOW: Duration = Duration::from_secs(3600);

/// Time-ordered grant timestamps for a single resource
#[derive(Debug, Clone, Default)]
pub struct RequestHistory {
    grants: VecDeque<Instant>,
}

impl RequestHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a grant at `now`
    ///
    /// Timestamps never go backwards: an out-of-order `now` is clamped to the
    /// newest entry.
    pub fn record_grant(&mut self, now: Instant) {
        let at = match self.grants.back() {
            Some(&last) if last > now => last,
            _ => now,
        };
        self.grants.push_back(at);
    }

    /// Number of grants whose age at `now` is at most `window`
    pub fn count_since(&self, now: Instant, window: Duration) -> usize {
        self.grants
            .iter()
            .rev()
            .take_while(|&&at| now.saturating_duration_since(at) <= window)
            .count()
    }

    /// Drop grants older than the hour window. Returns how many were removed.
    pub fn prune(&mut self, now: Instant) -> usize {
        let before = self.grants.len();
        while let Some(&oldest) = self.grants.front() {
            if now.saturating_duration_since(oldest) > HOUR_WINDOW {
                self.grants.pop_front();
            } else {
                break;
            }
        }
        before - self.grants.len()
    }

    /// Grants in the last minute
    pub fn minute_usage(&self, now: Instant) -> usize {
        self.count_since(now, MINUTE_WINDOW)
    }

    /// Grants in the last hour
    pub fn hour_usage(&self, now: Instant) -> usize {
        self.count_since(now, HOUR_WINDOW)
    }

    /// Oldest retained grant
    pub fn oldest(&self) -> Option<Instant> {
        self.grants.front().copied()
    }

    pub fn len(&self) -> usize {
        self.grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_empty_history() {
        let history = RequestHistory::new();
        let now = Instant::now();
        assert!(history.is_empty());
        assert_eq!(history.minute_usage(now), 0);
        assert_eq!(history.hour_usage(now), 0);
        assert!(history.oldest().is_none());
    }

    #[test]
    fn test_count_windows() {
        let start = Instant::now();
        let mut history = RequestHistory::new();

        history.record_grant(start);
        history.record_grant(start + Duration::from_secs(30));
        history.record_grant(start + Duration::from_secs(90));

        let now = start + Duration::from_secs(100);
        assert_eq!(history.minute_usage(now), 1);
        assert_eq!(history.hour_usage(now), 3);
    }

    #[test]
    fn test_window_boundary_inclusive() {
        let start = Instant::now();
        let mut history = RequestHistory::new();
        history.record_grant(start);

        assert_eq!(history.minute_usage(start + MINUTE_WINDOW), 1);
        assert_eq!(
            history.minute_usage(start + MINUTE_WINDOW + Duration::from_millis(1)),
            0
        );
    }

    #[test]
    fn test_prune_drops_only_expired() {
        let start = Instant::now();
        let mut history = RequestHistory::new();
        history.record_grant(start);
        history.record_grant(start + Duration::from_secs(1800));

        let removed = history.prune(start + HOUR_WINDOW + Duration::from_secs(1));
        assert_eq!(removed, 1);
        assert_eq!(history.len(), 1);
        assert_eq!(history.oldest(), Some(start + Duration::from_secs(1800)));
    }

    #[test]
    fn test_out_of_order_grant_clamped() {
        let start = Instant::now();
        let mut history = RequestHistory::new();
        history.record_grant(start + Duration::from_secs(10));
        history.record_grant(start);

        assert_eq!(history.len(), 2);
        assert_eq!(history.count_since(start + Duration::from_secs(10), Duration::ZERO), 2);
    }

    proptest! {
        #[test]
        fn prop_recorded_grants_counted(n in 0usize..500) {
            let now = Instant::now();
            let mut history = RequestHistory::new();
            for _ in 0..n {
                history.record_grant(now);
            }
            prop_assert_eq!(history.hour_usage(now), n);
            prop_assert_eq!(history.minute_usage(now), n);
        }

        #[test]
        fn prop_minute_never_exceeds_hour(offsets in prop::collection::vec(0u64..7200, 0..100)) {
            let start = Instant::now();
            let mut sorted = offsets.clone();
            sorted.sort_unstable();

            let mut history = RequestHistory::new();
            for offset in &sorted {
                history.record_grant(start + Duration::from_secs(*offset));
            }

            let now = start + Duration::from_secs(7200);
            prop_assert!(history.minute_usage(now) <= history.hour_usage(now));

            history.prune(now);
            prop_assert_eq!(history.len(), history.hour_usage(now));
        }
    }
}
