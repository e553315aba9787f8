//! Sliding-window (sliding log) rate limiter.

use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use super::backend::RateLimiter;
use super::clock::{Clock, SystemClock};
use super::store::KeyStore;
use crate::error::{KeyrateError, Result};

/// Admits at most `max_requests` events per key in any trailing
/// `window_size` interval.
///
/// Each key keeps the admission times that still fall inside the window,
/// oldest first. Expired times are dropped from the front whenever the key is
/// touched, and a key whose log empties is removed from the store entirely,
/// so idle keys cost no memory.
///
/// A timestamp exactly `window_size` old still counts against the window.
pub struct SlidingWindowLimiter<C: Clock = SystemClock> {
    window_size: Duration,
    max_requests: usize,
    windows: KeyStore<VecDeque<Instant>>,
    clock: C,
}

impl SlidingWindowLimiter {
    /// Create a sliding-window limiter reading the system clock.
    pub fn new(window_size: Duration, max_requests: u32) -> Result<Self> {
        Self::with_clock(window_size, max_requests, SystemClock)
    }
}

impl<C: Clock> SlidingWindowLimiter<C> {
    /// Create a sliding-window limiter reading time from `clock`.
    ///
    /// Fails when the window is empty or no requests are allowed at all.
    pub fn with_clock(window_size: Duration, max_requests: u32, clock: C) -> Result<Self> {
        if window_size.is_zero() {
            return Err(KeyrateError::InvalidConfig(
                "window_size must be greater than zero".to_string(),
            ));
        }
        if max_requests == 0 {
            return Err(KeyrateError::InvalidConfig(
                "max_requests must be greater than zero".to_string(),
            ));
        }

        debug!(
            window_size = ?window_size,
            max_requests = max_requests,
            "Creating sliding window limiter"
        );

        Ok(Self {
            window_size,
            max_requests: max_requests as usize,
            windows: KeyStore::new(),
            clock,
        })
    }

    /// The trailing interval over which admissions are counted.
    pub fn window_size(&self) -> Duration {
        self.window_size
    }

    /// Admissions allowed per key within one window.
    pub fn max_requests(&self) -> u32 {
        self.max_requests as u32
    }

    /// Whether `key` currently holds any admission times.
    pub fn is_tracked(&self, key: &str) -> bool {
        self.windows.contains(key)
    }

    /// Forget every key.
    pub fn clear(&self) {
        self.windows.clear();
    }

    /// Drop admission times that have left the window as of `now`.
    fn prune(&self, window: &mut VecDeque<Instant>, now: Instant) {
        while let Some(&oldest) = window.front() {
            if now.saturating_duration_since(oldest) > self.window_size {
                window.pop_front();
            } else {
                break;
            }
        }
    }

    /// Time until a pruned log has room for another admission.
    fn wait(&self, window: &VecDeque<Instant>, now: Instant) -> Duration {
        if window.len() < self.max_requests {
            return Duration::ZERO;
        }

        // A slot opens once the log shrinks below max_requests.
        match window.get(window.len() - self.max_requests) {
            Some(&blocking) => self
                .window_size
                .saturating_sub(now.saturating_duration_since(blocking)),
            None => Duration::ZERO,
        }
    }
}

impl<C: Clock> RateLimiter for SlidingWindowLimiter<C> {
    fn may_admit(&self, key: &str) -> bool {
        let now = self.clock.now();
        let count = self
            .windows
            .inspect(key, |window| {
                self.prune(window, now);
                (window.len(), !window.is_empty())
            })
            .unwrap_or(0);

        trace!(key = key, count = count, "Checking sliding window");
        count < self.max_requests
    }

    fn record(&self, key: &str) -> bool {
        let now = self.clock.now();

        self.windows.update(
            key,
            |window| {
                self.prune(window, now);
                if window.len() >= self.max_requests {
                    debug!(key = key, count = window.len(), "Sliding window full");
                    return false;
                }

                // Keep the log ordered even if the clock stepped backwards.
                let stamp = window.back().map_or(now, |&last| last.max(now));
                window.push_back(stamp);
                trace!(key = key, count = window.len(), "Admitted into sliding window");
                true
            },
            || {
                trace!(key = key, "Admitted first event for key");
                (true, Some(VecDeque::from([now])))
            },
        )
    }

    fn time_until_allowed(&self, key: &str) -> Duration {
        let now = self.clock.now();
        self.windows
            .inspect(key, |window| {
                self.prune(window, now);
                (self.wait(window, now), !window.is_empty())
            })
            .unwrap_or(Duration::ZERO)
    }

    fn sweep(&self) -> usize {
        let now = self.clock.now();
        let removed = self.windows.retain(|window| {
            self.prune(window, now);
            !window.is_empty()
        });

        if removed > 0 {
            debug!(removed = removed, "Swept idle sliding window keys");
        }
        removed
    }

    fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use crate::ratelimit::Admission;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn create_limiter(window_secs: u64, max: u32) -> (SlidingWindowLimiter<ManualClock>, ManualClock) {
        let clock = ManualClock::new();
        let limiter =
            SlidingWindowLimiter::with_clock(Duration::from_secs(window_secs), max, clock.clone())
                .unwrap();
        (limiter, clock)
    }

    #[test]
    fn test_rejects_invalid_configuration() {
        assert!(matches!(
            SlidingWindowLimiter::new(Duration::ZERO, 1),
            Err(KeyrateError::InvalidConfig(_))
        ));
        assert!(matches!(
            SlidingWindowLimiter::new(Duration::from_secs(10), 0),
            Err(KeyrateError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_unseen_key_is_admissible() {
        let (limiter, _clock) = create_limiter(10, 1);

        assert!(limiter.may_admit("new"));
        assert_eq!(limiter.time_until_allowed("new"), Duration::ZERO);
        assert!(limiter.record("new"));
    }

    #[test]
    fn test_max_requests_at_same_instant() {
        let (limiter, _clock) = create_limiter(10, 3);

        for _ in 0..3 {
            assert!(limiter.record("user"));
        }

        // The 4th request at the same instant should be rejected
        assert!(!limiter.record("user"));
        assert!(!limiter.may_admit("user"));
    }

    #[test]
    fn test_single_slot_window_scenario() {
        let (limiter, clock) = create_limiter(10, 1);

        assert!(limiter.record("A"));

        clock.advance(Duration::from_secs(5));
        assert!(!limiter.may_admit("A"));
        assert_eq!(limiter.time_until_allowed("A"), Duration::from_secs(5));

        clock.advance(Duration::from_secs(6));
        assert!(limiter.record("A"));
    }

    #[test]
    fn test_timestamp_at_window_edge_still_counts() {
        let (limiter, clock) = create_limiter(10, 1);
        assert!(limiter.record("A"));

        clock.advance(Duration::from_secs(10));
        assert!(!limiter.record("A"));

        clock.advance(Duration::from_nanos(1));
        assert!(limiter.record("A"));
    }

    #[test]
    fn test_expired_entry_does_not_count_against_new_window() {
        let (limiter, clock) = create_limiter(10, 2);

        assert!(limiter.record("A"));
        clock.advance(Duration::from_secs(4));
        assert!(limiter.record("A"));

        // First admission leaves the window, second is still inside
        clock.advance(Duration::from_millis(6_001));
        assert!(limiter.record("A"));
        assert!(!limiter.record("A"));
    }

    #[test]
    fn test_wait_is_zero_while_headroom_remains() {
        let (limiter, clock) = create_limiter(10, 2);

        assert!(limiter.record("A"));
        clock.advance(Duration::from_secs(3));
        assert!(limiter.may_admit("A"));
        assert_eq!(limiter.time_until_allowed("A"), Duration::ZERO);

        assert!(limiter.record("A"));
        assert_eq!(limiter.time_until_allowed("A"), Duration::from_secs(7));
    }

    #[test]
    fn test_queries_do_not_change_admission() {
        let (limiter, clock) = create_limiter(10, 1);
        assert!(limiter.record("A"));
        clock.advance(Duration::from_secs(11));

        assert!(limiter.may_admit("A"));
        assert_eq!(limiter.time_until_allowed("A"), Duration::ZERO);
        assert!(limiter.may_admit("A"));
        assert!(limiter.record("A"));
    }

    #[test]
    fn test_keys_are_independent() {
        let (limiter, _clock) = create_limiter(10, 1);

        assert!(limiter.record("A"));
        assert!(limiter.record("B"));
        assert!(!limiter.record("A"));
        assert!(!limiter.record("B"));
    }

    #[test]
    fn test_idle_key_is_removed_on_inspection() {
        let (limiter, clock) = create_limiter(10, 1);
        assert!(limiter.record("A"));
        assert!(limiter.is_tracked("A"));

        clock.advance(Duration::from_secs(30));
        assert!(limiter.may_admit("A"));
        assert!(!limiter.is_tracked("A"));
        assert_eq!(limiter.tracked_keys(), 0);
    }

    #[test]
    fn test_sweep_removes_idle_keys() {
        let (limiter, clock) = create_limiter(10, 1);
        for user in ["1", "2", "3"] {
            assert!(limiter.record(user));
        }

        clock.advance(Duration::from_secs(5));
        assert!(limiter.record("4"));
        assert_eq!(limiter.tracked_keys(), 4);

        clock.advance(Duration::from_secs(6));
        assert_eq!(limiter.sweep(), 3);
        assert_eq!(limiter.tracked_keys(), 1);
        assert!(limiter.is_tracked("4"));

        clock.advance(Duration::from_secs(60));
        assert_eq!(limiter.sweep(), 1);
        assert_eq!(limiter.tracked_keys(), 0);
    }

    #[test]
    fn test_backward_clock_clamps_wait() {
        let (limiter, clock) = create_limiter(10, 1);
        assert!(limiter.record("A"));

        clock.rewind(Duration::from_secs(3));
        assert_eq!(limiter.time_until_allowed("A"), Duration::from_secs(10));
        assert!(!limiter.record("A"));
    }

    #[test]
    fn test_acquire_reports_retry_after() {
        let (limiter, clock) = create_limiter(10, 1);

        assert_eq!(limiter.acquire("A"), Admission::Admitted);
        clock.advance(Duration::from_secs(2));
        assert_eq!(
            limiter.acquire("A"),
            Admission::Denied {
                retry_after: Duration::from_secs(8)
            }
        );
    }

    #[test]
    fn test_concurrent_records_never_exceed_limit() {
        let (limiter, _clock) = create_limiter(10, 5);
        let admitted = AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..50 {
                        if limiter.record("shared") {
                            admitted.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                });
            }
        });

        assert_eq!(admitted.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_clear_forgets_keys() {
        let (limiter, _clock) = create_limiter(10, 1);
        assert!(limiter.record("A"));

        limiter.clear();
        assert_eq!(limiter.tracked_keys(), 0);
        assert!(limiter.record("A"));
    }
}
