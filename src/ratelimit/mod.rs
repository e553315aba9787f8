//! Rate limiting policies and per-key state management.

mod backend;
mod clock;
mod fixed;
mod sliding;
mod store;

pub use backend::{Admission, RateLimiter};
pub use clock::{Clock, ManualClock, SystemClock};
pub use fixed::FixedIntervalLimiter;
pub use sliding::SlidingWindowLimiter;
