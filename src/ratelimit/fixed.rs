//! Fixed-interval (throttling) rate limiter.

use std::time::{Duration, Instant};
use tracing::{debug, trace};

use super::backend::RateLimiter;
use super::clock::{Clock, SystemClock};
use super::store::KeyStore;
use crate::error::{KeyrateError, Result};

/// Enforces a minimum gap of `min_interval` between consecutive admissions
/// for the same key.
///
/// Only the most recent admission time is kept per key. An unseen key is
/// always admissible, and an event arriving exactly `min_interval` after the
/// previous admission is admitted.
///
/// Keys are never dropped during normal operation; call
/// [`sweep`](RateLimiter::sweep) periodically when the key space is unbounded.
pub struct FixedIntervalLimiter<C: Clock = SystemClock> {
    min_interval: Duration,
    last_admitted: KeyStore<Instant>,
    clock: C,
}

impl FixedIntervalLimiter {
    /// Create a fixed-interval limiter reading the system clock.
    pub fn new(min_interval: Duration) -> Result<Self> {
        Self::with_clock(min_interval, SystemClock)
    }
}

impl<C: Clock> FixedIntervalLimiter<C> {
    /// Create a fixed-interval limiter reading time from `clock`.
    pub fn with_clock(min_interval: Duration, clock: C) -> Result<Self> {
        if min_interval.is_zero() {
            return Err(KeyrateError::InvalidConfig(
                "min_interval must be greater than zero".to_string(),
            ));
        }

        debug!(min_interval = ?min_interval, "Creating fixed interval limiter");

        Ok(Self {
            min_interval,
            last_admitted: KeyStore::new(),
            clock,
        })
    }

    /// The minimum gap between admissions for one key.
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Forget every key.
    pub fn clear(&self) {
        self.last_admitted.clear();
    }

    fn elapsed_since(&self, last: Instant, now: Instant) -> Duration {
        now.saturating_duration_since(last)
    }
}

impl<C: Clock> RateLimiter for FixedIntervalLimiter<C> {
    fn may_admit(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.last_admitted
            .peek(key, |&last| self.elapsed_since(last, now) >= self.min_interval)
            .unwrap_or(true)
    }

    fn record(&self, key: &str) -> bool {
        let now = self.clock.now();

        self.last_admitted.update(
            key,
            |last| {
                let elapsed = self.elapsed_since(*last, now);
                if elapsed < self.min_interval {
                    debug!(key = key, elapsed = ?elapsed, "Throttled");
                    return false;
                }
                *last = now;
                trace!(key = key, "Admitted after interval");
                true
            },
            || {
                trace!(key = key, "Admitted first event for key");
                (true, Some(now))
            },
        )
    }

    fn time_until_allowed(&self, key: &str) -> Duration {
        let now = self.clock.now();
        self.last_admitted
            .peek(key, |&last| {
                self.min_interval
                    .saturating_sub(self.elapsed_since(last, now))
            })
            .unwrap_or(Duration::ZERO)
    }

    fn sweep(&self) -> usize {
        let now = self.clock.now();
        // An entry at least min_interval old answers exactly like an absent key.
        let removed = self
            .last_admitted
            .retain(|&mut last| self.elapsed_since(last, now) < self.min_interval);

        if removed > 0 {
            debug!(removed = removed, "Swept idle fixed interval keys");
        }
        removed
    }

    fn tracked_keys(&self) -> usize {
        self.last_admitted.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn create_limiter(interval: Duration) -> (FixedIntervalLimiter<ManualClock>, ManualClock) {
        let clock = ManualClock::new();
        let limiter = FixedIntervalLimiter::with_clock(interval, clock.clone()).unwrap();
        (limiter, clock)
    }

    #[test]
    fn test_rejects_zero_interval() {
        assert!(matches!(
            FixedIntervalLimiter::new(Duration::ZERO),
            Err(KeyrateError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_unseen_key_is_admissible() {
        let (limiter, _clock) = create_limiter(Duration::from_secs(10));

        assert!(limiter.may_admit("new"));
        assert_eq!(limiter.time_until_allowed("new"), Duration::ZERO);
        assert!(limiter.record("new"));
    }

    #[test]
    fn test_second_record_at_same_instant_fails() {
        let (limiter, _clock) = create_limiter(Duration::from_secs(10));

        assert!(limiter.record("B"));
        assert!(!limiter.record("B"));
        assert!(!limiter.may_admit("B"));
    }

    #[test]
    fn test_throttle_scenario_with_inclusive_boundary() {
        let (limiter, clock) = create_limiter(Duration::from_secs(10));

        assert!(limiter.record("B"));

        clock.advance(Duration::from_millis(9_900));
        assert!(!limiter.record("B"));
        assert_eq!(limiter.time_until_allowed("B"), Duration::from_millis(100));

        clock.advance(Duration::from_millis(100));
        assert!(limiter.may_admit("B"));
        assert_eq!(limiter.time_until_allowed("B"), Duration::ZERO);
        assert!(limiter.record("B"));
    }

    #[test]
    fn test_rejected_record_does_not_reset_interval() {
        let (limiter, clock) = create_limiter(Duration::from_secs(10));
        assert!(limiter.record("B"));

        clock.advance(Duration::from_secs(5));
        assert!(!limiter.record("B"));

        clock.advance(Duration::from_secs(5));
        assert!(limiter.record("B"));
    }

    #[test]
    fn test_keys_are_independent() {
        let (limiter, _clock) = create_limiter(Duration::from_secs(10));

        assert!(limiter.record("A"));
        assert!(limiter.record("B"));
        assert!(!limiter.record("A"));
    }

    #[test]
    fn test_backward_clock_clamps_wait() {
        let (limiter, clock) = create_limiter(Duration::from_secs(10));
        assert!(limiter.record("B"));

        clock.rewind(Duration::from_secs(30));
        assert_eq!(limiter.time_until_allowed("B"), Duration::from_secs(10));
        assert!(!limiter.may_admit("B"));
    }

    #[test]
    fn test_sweep_evicts_only_elapsed_keys() {
        let (limiter, clock) = create_limiter(Duration::from_secs(10));
        assert!(limiter.record("old"));

        clock.advance(Duration::from_secs(6));
        assert!(limiter.record("recent"));

        clock.advance(Duration::from_secs(4));
        assert_eq!(limiter.sweep(), 1);
        assert_eq!(limiter.tracked_keys(), 1);
        assert!(!limiter.record("recent"));
    }

    #[test]
    fn test_concurrent_records_admit_once() {
        let (limiter, _clock) = create_limiter(Duration::from_secs(1));
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

        assert_eq!(admitted.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_clear_forgets_keys() {
        let (limiter, _clock) = create_limiter(Duration::from_secs(10));
        assert!(limiter.record("A"));

        limiter.clear();
        assert_eq!(limiter.tracked_keys(), 0);
        assert!(limiter.record("A"));
    }
}
