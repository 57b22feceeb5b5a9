use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::debug;

/// Fixed-size sliding window over event timestamps.
///
/// Admission evicts expired entries from the front first, so the deque
/// never grows past `max` and eviction is O(1) amortized.
#[derive(Debug)]
pub struct SlidingWindow {
    window: Duration,
    max: usize,
    events: VecDeque<Instant>,
}

impl SlidingWindow {
    pub fn new(window: Duration, max: usize) -> Self {
        Self {
            window,
            max,
            events: VecDeque::with_capacity(max),
        }
    }

    fn evict_at(&mut self, now: Instant) {
        while self
            .events
            .front()
            .is_some_and(|t| now.duration_since(*t) >= self.window)
        {
            self.events.pop_front();
        }
    }

    pub fn would_allow_at(&mut self, now: Instant) -> bool {
        self.evict_at(now);
        self.events.len() < self.max
    }

    pub fn record_at(&mut self, now: Instant) {
        self.events.push_back(now);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn set_max(&mut self, max: usize) {
        self.max = max;
        while self.events.len() > max {
            self.events.pop_front();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    HourlyExceeded,
    DailyExceeded,
}

/// Deployment-wide alert rate limiter: hourly and daily sliding windows.
///
/// An alert is admitted only when both windows have room; a rejected
/// attempt consumes no capacity in either window.
#[derive(Debug)]
pub struct AlertRateLimiter {
    hourly: SlidingWindow,
    daily: SlidingWindow,
}

impl AlertRateLimiter {
    pub fn new(max_per_hour: usize, max_per_day: usize) -> Self {
        Self {
            hourly: SlidingWindow::new(Duration::from_secs(3600), max_per_hour),
            daily: SlidingWindow::new(Duration::from_secs(86400), max_per_day),
        }
    }

    pub fn try_acquire(&mut self) -> RateLimitDecision {
        self.try_acquire_at(Instant::now())
    }

    pub fn try_acquire_at(&mut self, now: Instant) -> RateLimitDecision {
        if !self.hourly.would_allow_at(now) {
            return RateLimitDecision::HourlyExceeded;
        }
        if !self.daily.would_allow_at(now) {
            return RateLimitDecision::DailyExceeded;
        }
        self.hourly.record_at(now);
        self.daily.record_at(now);
        RateLimitDecision::Allowed
    }

    pub fn set_limits(&mut self, max_per_hour: usize, max_per_day: usize) {
        debug!(max_per_hour, max_per_day, "Rate limits updated");
        self.hourly.set_max(max_per_hour);
        self.daily.set_max(max_per_day);
    }

    pub fn current_hour_count(&self) -> usize {
        self.hourly.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hourly_cap_admits_exactly_max() {
        let mut limiter = AlertRateLimiter::new(3, 100);
        let now = Instant::now();

        for _ in 0..3 {
            assert_eq!(limiter.try_acquire_at(now), RateLimitDecision::Allowed);
        }
        assert_eq!(limiter.try_acquire_at(now), RateLimitDecision::HourlyExceeded);
        assert_eq!(limiter.current_hour_count(), 3);
    }

    #[test]
    fn test_window_expiry_frees_capacity() {
        let mut limiter = AlertRateLimiter::new(2, 100);
        let start = Instant::now();

        assert_eq!(limiter.try_acquire_at(start), RateLimitDecision::Allowed);
        assert_eq!(limiter.try_acquire_at(start), RateLimitDecision::Allowed);
        assert_eq!(
            limiter.try_acquire_at(start + Duration::from_secs(1800)),
            RateLimitDecision::HourlyExceeded
        );
        // First two fall out of the hour window
        assert_eq!(
            limiter.try_acquire_at(start + Duration::from_secs(3601)),
            RateLimitDecision::Allowed
        );
    }

    #[test]
    fn test_daily_rejection_consumes_no_hourly_capacity() {
        let mut limiter = AlertRateLimiter::new(10, 1);
        let now = Instant::now();

        assert_eq!(limiter.try_acquire_at(now), RateLimitDecision::Allowed);
        assert_eq!(limiter.try_acquire_at(now), RateLimitDecision::DailyExceeded);
        // Hourly window saw the rejection but did not record it
        assert_eq!(limiter.current_hour_count(), 1);
    }

    #[test]
    fn test_window_never_exceeds_max_entries() {
        let mut window = SlidingWindow::new(Duration::from_secs(3600), 5);
        let now = Instant::now();
        for _ in 0..5 {
            assert!(window.would_allow_at(now));
            window.record_at(now);
        }
        assert!(!window.would_allow_at(now));
        assert_eq!(window.len(), 5);
    }

    #[test]
    fn test_lowering_max_truncates_oldest() {
        let mut window = SlidingWindow::new(Duration::from_secs(3600), 5);
        let now = Instant::now();
        for _ in 0..5 {
            window.record_at(now);
        }
        window.set_max(2);
        assert_eq!(window.len(), 2);
        assert!(!window.would_allow_at(now));
    }
}
