//! Fixed-window counting over record storages.
//!
//! Backends that cannot evaluate limits themselves only need to store one
//! [`WindowRecord`] per key and apply updates atomically. The
//! [`StorageRateLimiterAdapter`] turns any such storage into a full
//! [`RateLimiterAdapter`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::adapter::RateLimiterAdapter;
use super::state::CounterSnapshot;
use crate::error::{RatekeeperError, Result};

/// Default window length for fixed-window counting.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Stored counter state for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowRecord {
    /// Attempts recorded in the window
    pub attempt: u64,
    /// Limit in force at the last update
    pub limit: u64,
    /// When the window closes
    pub expires_at: DateTime<Utc>,
}

impl WindowRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    fn snapshot(&self, now: DateTime<Utc>) -> CounterSnapshot {
        CounterSnapshot {
            success: self.attempt <= self.limit,
            attempt: self.attempt,
            reset_time: (self.expires_at - now).to_std().ok(),
        }
    }
}

/// Update function applied atomically to the record of one key.
pub type WindowUpdate<'a> = &'a (dyn Fn(Option<WindowRecord>) -> WindowRecord + Send + Sync);

/// Minimal record storage for fixed-window counting.
#[async_trait]
pub trait RateLimiterStorage: Send + Sync {
    /// Name of the storage family.
    fn kind(&self) -> &str;

    /// Load the record for a key.
    async fn find(&self, key: &str) -> Result<Option<WindowRecord>>;

    /// Replace the record for a key with `update(current)`, atomically per key.
    async fn upsert(&self, key: &str, update: WindowUpdate<'_>) -> Result<WindowRecord>;

    /// Delete the record for a key.
    async fn remove(&self, key: &str) -> Result<()>;
}

/// Fixed-window [`RateLimiterAdapter`] over any [`RateLimiterStorage`].
pub struct StorageRateLimiterAdapter<S> {
    storage: S,
    window: TimeDelta,
}

impl<S: RateLimiterStorage> StorageRateLimiterAdapter<S> {
    /// Create an adapter with the default window.
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            window: TimeDelta::seconds(DEFAULT_WINDOW.as_secs() as i64),
        }
    }

    /// Create an adapter with a custom window length.
    pub fn with_window(storage: S, window: Duration) -> Result<Self> {
        if window.is_zero() {
            return Err(RatekeeperError::Config(
                "window must be greater than 0".to_string(),
            ));
        }
        let window = TimeDelta::from_std(window)
            .map_err(|e| RatekeeperError::Config(format!("window out of range: {}", e)))?;
        Ok(Self { storage, window })
    }

    /// Get the underlying storage.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Get the window length.
    pub fn window(&self) -> Duration {
        self.window.to_std().unwrap_or(DEFAULT_WINDOW)
    }
}

#[async_trait]
impl<S: RateLimiterStorage> RateLimiterAdapter for StorageRateLimiterAdapter<S> {
    fn kind(&self) -> &str {
        self.storage.kind()
    }

    async fn get_state(&self, key: &str) -> Result<Option<CounterSnapshot>> {
        let now = Utc::now();
        let record = self.storage.find(key).await?;
        Ok(record
            .filter(|record| !record.is_expired(now))
            .map(|record| record.snapshot(now)))
    }

    async fn update_state(&self, key: &str, limit: u64) -> Result<CounterSnapshot> {
        let now = Utc::now();
        let window = self.window;
        let update = move |current: Option<WindowRecord>| match current {
            Some(record) if !record.is_expired(now) => WindowRecord {
                attempt: record.attempt + 1,
                limit,
                expires_at: record.expires_at,
            },
            _ => WindowRecord {
                attempt: 1,
                limit,
                expires_at: now + window,
            },
        };

        let record = self.storage.upsert(key, &update).await?;

        trace!(
            key = %key,
            attempt = record.attempt,
            limit = limit,
            "Updated window record"
        );

        Ok(record.snapshot(now))
    }

    async fn reset(&self, key: &str) -> Result<()> {
        self.storage.remove(key).await
    }
}
