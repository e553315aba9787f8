//! Keyrate - per-key rate limiting
//!
//! This crate decides, in real time, whether an event for a given key (a
//! user, client, IP address, ...) is admitted under a rate policy, and how
//! long the caller must wait when it is not. Two policies share one
//! [`ratelimit::RateLimiter`] contract: a sliding-window limiter bounding the
//! number of admissions in a trailing window, and a fixed-interval limiter
//! enforcing a minimum gap between admissions.

pub mod config;
pub mod error;
pub mod ratelimit;
pub mod simulation;
