//! Ratekeeper - Rate Limiter Tracking Engine
//!
//! This crate decides whether a protected operation may run for a key,
//! records usage in a pluggable counter adapter, emits lifecycle events and
//! lets rate limiter handles be serialized and later reconnected to the
//! provider that owns their live dependencies.

pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod namespace;
pub mod ratelimit;

pub use error::{BlockedRateLimiterError, RateLimiterError, RatekeeperError, Result};
pub use ratelimit::{RateLimiter, RateLimiterProvider, RateLimiterSettings, RateLimiterState};
