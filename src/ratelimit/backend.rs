//! Rate limiter trait shared by every admission policy.

use std::time::Duration;

/// Outcome of [`RateLimiter::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The event was admitted and counted against future decisions.
    Admitted,
    /// The event was rejected; the key becomes admissible after `retry_after`.
    Denied {
        /// Time the caller should wait before trying again
        retry_after: Duration,
    },
}

impl Admission {
    /// Whether the event was admitted.
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }
}

/// Trait for per-key rate limiter implementations.
///
/// This trait abstracts over the sliding-window and fixed-interval policies
/// so that hosts can depend on "a rate limiter" and swap the policy without
/// touching call sites. Implementations own their per-key state and guard it
/// internally; every method takes `&self` and is safe to call concurrently.
pub trait RateLimiter: Send + Sync {
    /// Whether an event for `key` would be admitted right now.
    ///
    /// May opportunistically evict expired state, but never changes the
    /// answer a subsequent [`record`](Self::record) at the same instant gives.
    fn may_admit(&self, key: &str) -> bool;

    /// Admit an event for `key` if the policy allows it.
    ///
    /// Returns `true` and counts the event when admitted. Returns `false` and
    /// leaves state untouched otherwise. The admission check and the state
    /// update happen atomically with respect to other calls for the same key.
    fn record(&self, key: &str) -> bool;

    /// How long until an event for `key` can be admitted.
    ///
    /// Zero whenever [`may_admit`](Self::may_admit) would return `true`.
    fn time_until_allowed(&self, key: &str) -> Duration;

    /// Evict every entry that can no longer affect an admission decision.
    ///
    /// Returns the number of keys removed.
    fn sweep(&self) -> usize;

    /// Number of keys currently holding state.
    fn tracked_keys(&self) -> usize;

    /// Admit an event for `key`, reporting the wait on rejection.
    fn acquire(&self, key: &str) -> Admission {
        if self.record(key) {
            Admission::Admitted
        } else {
            Admission::Denied {
                retry_after: self.time_until_allowed(key),
            }
        }
    }
}
