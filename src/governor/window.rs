//! Sliding-window rate limiter.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, trace};

use super::clock::{Clock, SystemClock};

/// Snapshot of the limiter's quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitStatus {
    /// Admissions left in the current window
    pub remaining_requests: u32,
    /// Quota per window
    pub max_requests: u32,
    /// Epoch milliseconds at which the oldest admission ages out, if any
    pub reset_time: Option<i64>,
}

/// Admission control over a sliding window log.
///
/// Every admitted call leaves its timestamp in the log; a new call is
/// admitted while fewer than `max_requests` timestamps are younger than the
/// window. The check and the append happen under one lock, so concurrent
/// callers can never both take the last slot.
pub struct SlidingWindowLimiter {
    max_requests: u32,
    window_size_ms: i64,
    /// Admission timestamps, oldest first
    timestamps: Mutex<VecDeque<i64>>,
    clock: Arc<dyn Clock>,
}

impl SlidingWindowLimiter {
    /// Create a limiter backed by the system clock.
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self::with_clock(max_requests, window, Arc::new(SystemClock))
    }

    /// Create a limiter reading time from `clock`.
    pub fn with_clock(max_requests: u32, window: Duration, clock: Arc<dyn Clock>) -> Self {
        let window_size_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);
        Self {
            max_requests,
            window_size_ms,
            timestamps: Mutex::new(VecDeque::with_capacity(max_requests as usize)),
            clock,
        }
    }

    /// Admit a call if the window has room, recording it on success.
    ///
    /// This spends a slot when it returns `true`; use [`would_admit`] to ask
    /// without consuming anything.
    ///
    /// [`would_admit`]: SlidingWindowLimiter::would_admit
    pub fn try_acquire(&self) -> bool {
        let now = self.clock.now_millis();
        let mut timestamps = self.timestamps.lock();
        self.purge(&mut timestamps, now);

        if timestamps.len() < self.max_requests as usize {
            timestamps.push_back(now);
            trace!(
                in_window = timestamps.len(),
                max_requests = self.max_requests,
                "Request admitted"
            );
            true
        } else {
            debug!(
                in_window = timestamps.len(),
                max_requests = self.max_requests,
                "Request rejected, window is full"
            );
            false
        }
    }

    /// Whether [`try_acquire`] would succeed right now.
    ///
    /// [`try_acquire`]: SlidingWindowLimiter::try_acquire
    pub fn would_admit(&self) -> bool {
        let now = self.clock.now_millis();
        let mut timestamps = self.timestamps.lock();
        self.purge(&mut timestamps, now);
        timestamps.len() < self.max_requests as usize
    }

    /// Current quota snapshot.
    pub fn status(&self) -> RateLimitStatus {
        let now = self.clock.now_millis();
        let mut timestamps = self.timestamps.lock();
        self.purge(&mut timestamps, now);

        let in_window = u32::try_from(timestamps.len()).unwrap_or(u32::MAX);
        RateLimitStatus {
            remaining_requests: self.max_requests.saturating_sub(in_window),
            max_requests: self.max_requests,
            reset_time: timestamps
                .front()
                .map(|oldest| oldest.saturating_add(self.window_size_ms)),
        }
    }

    /// How long until a call would be admitted. Does not spend a slot.
    pub fn time_until_next_request(&self) -> Duration {
        let now = self.clock.now_millis();
        let mut timestamps = self.timestamps.lock();
        self.purge(&mut timestamps, now);

        if timestamps.len() < self.max_requests as usize {
            return Duration::ZERO;
        }

        // With a zero quota nothing ever ages in, so wait out a full window.
        let frees_at = timestamps
            .front()
            .map(|oldest| oldest.saturating_add(self.window_size_ms))
            .unwrap_or_else(|| now.saturating_add(self.window_size_ms));
        let wait_ms = frees_at.saturating_sub(now).max(0);
        Duration::from_millis(wait_ms as u64)
    }

    /// Forget every recorded admission.
    pub fn reset(&self) {
        self.timestamps.lock().clear();
        debug!("Rate limiter reset");
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_size_ms as u64)
    }

    /// Drop timestamps at or before `now - window`.
    fn purge(&self, timestamps: &mut VecDeque<i64>, now: i64) {
        let window_start = now.saturating_sub(self.window_size_ms);
        while timestamps.front().is_some_and(|&ts| ts <= window_start) {
            timestamps.pop_front();
        }
    }
}

impl std::fmt::Debug for SlidingWindowLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlidingWindowLimiter")
            .field("max_requests", &self.max_requests)
            .field("window_size_ms", &self.window_size_ms)
            .field("in_window", &self.timestamps.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::governor::clock::ManualClock;

    fn limiter_at(
        max_requests: u32,
        window_ms: u64,
        start: i64,
    ) -> (SlidingWindowLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start));
        let limiter = SlidingWindowLimiter::with_clock(
            max_requests,
            Duration::from_millis(window_ms),
            clock.clone(),
        );
        (limiter, clock)
    }

    #[test]
    fn test_window_admits_until_quota_then_recovers() {
        let (limiter, clock) = limiter_at(2, 60_000, 0);

        assert!(limiter.try_acquire());
        clock.set(10);
        assert!(limiter.try_acquire());
        clock.set(20);
        assert!(!limiter.try_acquire());

        // The t=0 admission ages out once the window has fully passed it
        clock.set(60_001);
        assert!(limiter.try_acquire());
    }

    #[test]
    fn test_entry_exactly_window_old_is_purged() {
        let (limiter, clock) = limiter_at(1, 1000, 5000);

        assert!(limiter.try_acquire());
        clock.set(5999);
        assert!(!limiter.try_acquire());
        clock.set(6000);
        assert!(limiter.try_acquire());
    }

    #[test]
    fn test_remaining_decreases_per_admission() {
        let (limiter, clock) = limiter_at(3, 60_000, 1_000);

        assert_eq!(limiter.status().remaining_requests, 3);
        for expected in [2, 1, 0] {
            assert!(limiter.try_acquire());
            clock.advance(1);
            assert_eq!(limiter.status().remaining_requests, expected);
        }

        assert!(!limiter.try_acquire());
        assert_eq!(limiter.status().remaining_requests, 0);
    }

    #[test]
    fn test_status_reports_reset_time_of_oldest() {
        let (limiter, clock) = limiter_at(2, 60_000, 1_000);

        let status = limiter.status();
        assert_eq!(status.max_requests, 2);
        assert_eq!(status.reset_time, None);

        limiter.try_acquire();
        clock.set(2_000);
        limiter.try_acquire();

        let status = limiter.status();
        assert_eq!(status.remaining_requests, 0);
        assert_eq!(status.reset_time, Some(61_000));
    }

    #[test]
    fn test_status_does_not_consume() {
        let (limiter, _clock) = limiter_at(1, 60_000, 0);

        for _ in 0..5 {
            limiter.status();
        }
        assert!(limiter.try_acquire());
    }

    #[test]
    fn test_time_until_next_request_is_a_pure_read() {
        let (limiter, clock) = limiter_at(1, 60_000, 0);

        assert_eq!(limiter.time_until_next_request(), Duration::ZERO);
        assert!(limiter.would_admit());
        // Asking did not spend the only slot
        assert_eq!(limiter.status().remaining_requests, 1);

        assert!(limiter.try_acquire());
        clock.set(15_000);
        assert!(!limiter.would_admit());
        assert_eq!(limiter.time_until_next_request(), Duration::from_millis(45_000));
    }

    #[test]
    fn test_reset_restores_full_quota() {
        let (limiter, _clock) = limiter_at(2, 60_000, 0);

        limiter.try_acquire();
        limiter.try_acquire();
        assert!(!limiter.try_acquire());

        limiter.reset();
        let status = limiter.status();
        assert_eq!(status.remaining_requests, 2);
        assert_eq!(status.reset_time, None);
        assert!(limiter.try_acquire());
    }

    #[test]
    fn test_zero_quota_rejects_everything() {
        let (limiter, _clock) = limiter_at(0, 1_000, 0);

        assert!(!limiter.try_acquire());
        assert_eq!(limiter.status().remaining_requests, 0);
        assert_eq!(limiter.time_until_next_request(), Duration::from_millis(1_000));
    }

    #[test]
    fn test_concurrent_acquire_never_exceeds_quota() {
        let (limiter, _clock) = limiter_at(10, 60_000, 0);
        let limiter = Arc::new(limiter);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || (0..10).filter(|_| limiter.try_acquire()).count())
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 10);
    }

    #[test]
    fn test_status_serializes_camel_case() {
        let status = RateLimitStatus {
            remaining_requests: 1,
            max_requests: 2,
            reset_time: Some(60_000),
        };
        let json = serde_json::to_value(status).unwrap();
        assert_eq!(json["remainingRequests"], 1);
        assert_eq!(json["maxRequests"], 2);
        assert_eq!(json["resetTime"], 60_000);
    }
}
