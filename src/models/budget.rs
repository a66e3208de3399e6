//! Rate budget for one tracked upstream endpoint
//!
//! The upstream advertises how many requests are left in the current window
//! (`x-ratelimit-remaining`) and when the window resets (`x-ratelimit-reset`).
//! A 429 response carries the delay until requests are accepted again
//! (`retry-after`).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Remaining-request count and reset time of one endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateBudget {
    /// Requests left in the current window
    pub remaining_requests: u32,

    /// When the current window resets
    pub reset_at: DateTime<Utc>,
}

impl RateBudget {
    /// Create a budget with the given values
    pub fn new(remaining_requests: u32, reset_at: DateTime<Utc>) -> Self {
        Self {
            remaining_requests,
            reset_at,
        }
    }

    /// Budget of a tracker that has never talked to the upstream
    ///
    /// Immediately eligible: the window is considered reset at `now`.
    pub fn fresh(now: DateTime<Utc>) -> Self {
        Self::new(0, now)
    }

    /// Whether work may be scheduled against this endpoint at `now`
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        now >= self.reset_at || self.remaining_requests > 0
    }

    /// Record the headers of a successful response
    pub fn apply_success(&mut self, remaining: u32, reset_after_secs: u64, now: DateTime<Utc>) {
        self.remaining_requests = remaining;
        self.reset_at = now + seconds(reset_after_secs);
    }

    /// Record a rate-limited (429) response
    pub fn apply_rate_limited(&mut self, retry_after_secs: u64, now: DateTime<Utc>) {
        self.remaining_requests = 0;
        self.reset_at = now + seconds(retry_after_secs);
    }

    /// Number of requests one detail slice may spend
    ///
    /// Falls back to `fallback` when the budget is exhausted (or unknown), which is
    /// the size of one full rate-limit window.
    pub fn slice_limit(&self, fallback: u32) -> u32 {
        if self.remaining_requests > 0 {
            self.remaining_requests
        } else {
            fallback
        }
    }
}

/// Upper bound on advertised windows, keeps `reset_at` representable
const MAX_WINDOW_SECS: u64 = 366 * 24 * 60 * 60;

fn seconds(secs: u64) -> Duration {
    Duration::seconds(secs.min(MAX_WINDOW_SECS) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_eligible_at_reset_boundary() {
        let budget = RateBudget::new(0, at(100));

        assert!(!budget.is_eligible(at(99)));
        assert!(budget.is_eligible(at(100)));
        assert!(budget.is_eligible(at(101)));
    }

    #[test]
    fn test_eligible_with_remaining_requests_before_reset() {
        let budget = RateBudget::new(3, at(100));
        assert!(budget.is_eligible(at(0)));
    }

    #[test]
    fn test_fresh_budget_is_eligible() {
        let budget = RateBudget::fresh(at(0));
        assert!(budget.is_eligible(at(0)));
        assert_eq!(budget.remaining_requests, 0);
    }

    #[test]
    fn test_apply_success_overwrites_both_fields() {
        let mut budget = RateBudget::new(0, at(0));
        budget.apply_success(12, 45, at(10));

        assert_eq!(budget.remaining_requests, 12);
        assert_eq!(budget.reset_at, at(55));
    }

    #[test]
    fn test_apply_rate_limited_zeroes_remaining() {
        let mut budget = RateBudget::new(9, at(0));
        budget.apply_rate_limited(30, at(10));

        assert_eq!(budget.remaining_requests, 0);
        assert_eq!(budget.reset_at, at(40));
        assert!(!budget.is_eligible(at(39)));
        assert!(budget.is_eligible(at(40)));
    }

    #[test]
    fn test_slice_limit_fallback() {
        assert_eq!(RateBudget::new(5, at(0)).slice_limit(14), 5);
        assert_eq!(RateBudget::new(0, at(0)).slice_limit(14), 14);
    }
}
