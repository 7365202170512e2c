//! Counter snapshots and rate limiter state classification.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Counter state reported by an adapter for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    /// Whether the key is still within its limit
    pub success: bool,
    /// Attempts recorded in the current window
    pub attempt: u64,
    /// Time until the window resets, if known
    pub reset_time: Option<Duration>,
}

/// Classified state of a rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimiterState {
    /// No window is active for the key.
    Expired,
    /// The key is within its limit.
    Allowed {
        used_attempts: u64,
        remaining_attempts: u64,
        limit: u64,
        reset_after: Option<Duration>,
    },
    /// The key has exceeded its limit.
    Blocked {
        limit: u64,
        total_attempts: u64,
        exceed_attempts: u64,
        retry_after: Option<Duration>,
    },
}

impl RateLimiterState {
    /// Classify an adapter snapshot against a limit.
    ///
    /// A missing reset time is carried through as `None` in both the allowed
    /// and the blocked case.
    pub fn from_snapshot(snapshot: Option<CounterSnapshot>, limit: u64) -> Self {
        match snapshot {
            None => RateLimiterState::Expired,
            Some(snapshot) if snapshot.success => RateLimiterState::Allowed {
                used_attempts: snapshot.attempt,
                remaining_attempts: limit.saturating_sub(snapshot.attempt),
                limit,
                reset_after: snapshot.reset_time,
            },
            Some(snapshot) => RateLimiterState::Blocked {
                limit,
                total_attempts: snapshot.attempt,
                exceed_attempts: snapshot.attempt.saturating_sub(limit),
                retry_after: snapshot.reset_time,
            },
        }
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, RateLimiterState::Blocked { .. })
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimiterState::Allowed { .. })
    }

    pub fn is_expired(&self) -> bool {
        matches!(self, RateLimiterState::Expired)
    }
}
