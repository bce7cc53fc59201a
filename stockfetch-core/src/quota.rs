//! Daily request budget for the provider.
//!
//! The free tier allows a fixed number of requests per calendar day. Once the
//! budget is spent, or the provider itself reports a rate limit, further
//! requests are refused locally until the day rolls over. Shared between
//! fetchers through an `Arc`.

use chrono::NaiveDate;
use std::sync::{Mutex, PoisonError};

/// Requests per day on the provider's free tier.
pub const FREE_TIER_DAILY_LIMIT: u32 = 25;

#[derive(Debug, Clone, Copy)]
struct QuotaWindow {
    day: Option<NaiveDate>,
    used: u32,
    exhausted: bool,
}

impl QuotaWindow {
    /// Reset counters when `today` starts a new window.
    fn roll(&mut self, today: NaiveDate) {
        if self.day != Some(today) {
            self.day = Some(today);
            self.used = 0;
            self.exhausted = false;
        }
    }
}

/// Per-day request counter.
#[derive(Debug)]
pub struct RequestQuota {
    window: Mutex<QuotaWindow>,
    daily_limit: Option<u32>,
}

impl RequestQuota {
    /// `None` means no local limit; only provider signals exhaust the quota.
    pub fn new(daily_limit: Option<u32>) -> Self {
        Self {
            window: Mutex::new(QuotaWindow {
                day: None,
                used: 0,
                exhausted: false,
            }),
            daily_limit,
        }
    }

    pub fn unlimited() -> Self {
        Self::new(None)
    }

    pub fn free_tier() -> Self {
        Self::new(Some(FREE_TIER_DAILY_LIMIT))
    }

    pub fn daily_limit(&self) -> Option<u32> {
        self.daily_limit
    }

    /// Reserve one request for `today`. Returns false when the budget is spent.
    pub fn try_acquire(&self, today: NaiveDate) -> bool {
        let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        window.roll(today);
        if window.exhausted {
            return false;
        }
        if let Some(limit) = self.daily_limit {
            if window.used >= limit {
                window.exhausted = true;
                return false;
            }
        }
        window.used += 1;
        true
    }

    /// Requests left for `today`; `None` when unlimited and not exhausted.
    pub fn remaining(&self, today: NaiveDate) -> Option<u32> {
        let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        window.roll(today);
        if window.exhausted {
            return Some(0);
        }
        self.daily_limit.map(|limit| limit.saturating_sub(window.used))
    }

    /// Mark the budget for `today` as spent, e.g. after a provider rate-limit notice.
    pub fn exhaust(&self, today: NaiveDate) {
        let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        window.roll(today);
        window.exhausted = true;
    }

    pub fn is_exhausted(&self, today: NaiveDate) -> bool {
        self.remaining(today) == Some(0)
    }
}

impl Default for RequestQuota {
    fn default() -> Self {
        Self::unlimited()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn unlimited_always_allows() {
        let q = RequestQuota::unlimited();
        for _ in 0..100 {
            assert!(q.try_acquire(day(1)));
        }
        assert_eq!(q.remaining(day(1)), None);
    }

    #[test]
    fn limit_is_enforced() {
        let q = RequestQuota::new(Some(2));
        assert!(q.try_acquire(day(1)));
        assert!(q.try_acquire(day(1)));
        assert!(!q.try_acquire(day(1)));
        assert_eq!(q.remaining(day(1)), Some(0));
    }

    #[test]
    fn exhaust_blocks_until_next_day() {
        let q = RequestQuota::unlimited();
        q.exhaust(day(1));
        assert!(q.is_exhausted(day(1)));
        assert!(!q.try_acquire(day(1)));
        assert!(q.try_acquire(day(2)));
    }

    #[test]
    fn new_day_resets_counter() {
        let q = RequestQuota::new(Some(1));
        assert!(q.try_acquire(day(1)));
        assert!(!q.try_acquire(day(1)));
        assert!(q.try_acquire(day(2)));
        assert_eq!(q.remaining(day(2)), Some(0));
    }

    #[test]
    fn free_tier_limit() {
        let q = RequestQuota::free_tier();
        assert_eq!(q.daily_limit(), Some(FREE_TIER_DAILY_LIMIT));
        assert_eq!(q.remaining(day(1)), Some(FREE_TIER_DAILY_LIMIT));
    }
}
