//! Per-key rate limiter handle.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, trace, warn};

use super::adapter::RateLimiterAdapter;
use super::policy::{ErrorPolicy, PolicyInput};
use super::provider::ProviderShared;
use super::state::RateLimiterState;
use crate::codec::{Transformable, TransformerName};
use crate::error::{BlockedRateLimiterError, RateLimiterError, Result};
use crate::events::{RateLimiterEvent, RateLimiterEventKind};
use crate::namespace::Key;

/// How a rate limiter accounts for calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackingMode {
    /// Count only failed operations whose error matches the error policy.
    pub only_error: bool,
    /// In `only_error` mode, record failures in the background.
    pub async_tracking: bool,
}

/// Read-only view of a rate limiter carried by events.
#[derive(Clone)]
pub struct RateLimiterView {
    key: Key,
    limit: u64,
    adapter: Arc<dyn RateLimiterAdapter>,
}

impl RateLimiterView {
    pub(crate) fn new(key: Key, limit: u64, adapter: Arc<dyn RateLimiterAdapter>) -> Self {
        Self {
            key,
            limit,
            adapter,
        }
    }

    /// The display key.
    pub fn key(&self) -> &str {
        self.key.display()
    }

    /// Maximum attempts per window.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Read the current state from the adapter.
    pub async fn get_state(&self) -> Result<RateLimiterState> {
        trace!(key = %self.key, "Reading rate limiter state");
        let snapshot = self.adapter.get_state(self.key.qualified()).await?;
        Ok(RateLimiterState::from_snapshot(snapshot, self.limit))
    }
}

impl fmt::Debug for RateLimiterView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiterView")
            .field("key", &self.key)
            .field("limit", &self.limit)
            .finish()
    }
}

/// Guards operations for one key.
///
/// A rate limiter holds no counter state of its own; every decision is made
/// by the provider's adapter. Cloning is cheap.
#[derive(Clone)]
pub struct RateLimiter {
    pub(crate) key: Key,
    pub(crate) limit: u64,
    pub(crate) error_policy: Arc<dyn ErrorPolicy>,
    pub(crate) only_error: bool,
    pub(crate) shared: Arc<ProviderShared>,
}

impl RateLimiter {
    pub(crate) fn new(
        shared: Arc<ProviderShared>,
        key: Key,
        limit: u64,
        error_policy: Arc<dyn ErrorPolicy>,
        only_error: bool,
    ) -> Self {
        Self {
            key,
            limit,
            error_policy,
            only_error,
            shared,
        }
    }

    /// The key as passed to the provider.
    pub fn key(&self) -> &str {
        self.key.display()
    }

    /// The namespace-qualified key used with the adapter.
    pub fn qualified_key(&self) -> &str {
        self.key.qualified()
    }

    /// Maximum attempts per window, fixed at creation.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// How calls are accounted, after per-call overrides.
    pub fn tracking_mode(&self) -> TrackingMode {
        TrackingMode {
            only_error: self.only_error,
            async_tracking: self.shared.async_tracking,
        }
    }

    /// A read-only view of this rate limiter.
    pub fn view(&self) -> RateLimiterView {
        RateLimiterView::new(self.key.clone(), self.limit, self.shared.adapter.clone())
    }

    /// Read the current state without consuming an attempt.
    pub async fn get_state(&self) -> Result<RateLimiterState> {
        self.view().get_state().await
    }

    /// Run `op` if the limit allows it.
    ///
    /// Returns [`RateLimiterError::Blocked`] without running `op` when the
    /// key is over its limit. Errors from `op` come back unchanged in
    /// [`RateLimiterError::Operation`]. They only need to be displayable, so
    /// [`BoxError`](crate::error::BoxError) and similar wrappers work.
    pub async fn run_or_fail<F, Fut, T, E>(&self, op: F) -> std::result::Result<T, RateLimiterError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: fmt::Display + Send + Sync + 'static,
    {
        if self.only_error {
            self.track_on_failure(op).await
        } else {
            self.track_always(op).await
        }
    }

    /// Clear the counter for this key.
    pub async fn reset(&self) -> Result<()> {
        debug!(key = %self.key, "Resetting rate limiter");
        self.emit(RateLimiterEventKind::Reseted);
        self.shared.adapter.reset(self.key.qualified()).await
    }

    async fn track_always<F, Fut, T, E>(&self, op: F) -> std::result::Result<T, RateLimiterError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        trace!(key = %self.key, limit = self.limit, "Tracking attempt");

        let snapshot = self
            .shared
            .adapter
            .update_state(self.key.qualified(), self.limit)
            .await?;
        self.admit(RateLimiterState::from_snapshot(Some(snapshot), self.limit))?;

        op().await.map_err(RateLimiterError::Operation)
    }

    async fn track_on_failure<F, Fut, T, E>(&self, op: F) -> std::result::Result<T, RateLimiterError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: fmt::Display + Send + Sync + 'static,
    {
        let snapshot = self.shared.adapter.get_state(self.key.qualified()).await?;
        self.admit(RateLimiterState::from_snapshot(snapshot, self.limit))?;

        match op().await {
            Ok(value) => Ok(value),
            Err(error) => {
                self.track_failure(&error).await?;
                Err(RateLimiterError::Operation(error))
            }
        }
    }

    async fn track_failure<E>(&self, error: &E) -> Result<()>
    where
        E: fmt::Display + Send + Sync + 'static,
    {
        let matched = match self.error_policy.matches(PolicyInput::new(error)).await {
            Ok(matched) => matched,
            Err(policy_error) => {
                warn!(
                    key = %self.key,
                    error = %policy_error,
                    "Error policy failed, leaving failure untracked"
                );
                false
            }
        };

        if !matched {
            debug!(key = %self.key, error = %error, "Failure not tracked");
            self.emit(RateLimiterEventKind::UntrackedFailure {
                error: error.to_string(),
            });
            return Ok(());
        }

        debug!(key = %self.key, error = %error, "Tracking failure");
        self.emit(RateLimiterEventKind::TrackedFailure {
            error: error.to_string(),
        });

        if !self.shared.async_tracking {
            self.shared
                .adapter
                .update_state(self.key.qualified(), self.limit)
                .await?;
            return Ok(());
        }

        let adapter = self.shared.adapter.clone();
        let key = self.key.qualified().to_string();
        let limit = self.limit;
        self.shared.executor.spawn(
            async move {
                if let Err(error) = adapter.update_state(&key, limit).await {
                    debug!(key = %key, error = %error, "Discarding background tracking failure");
                }
            }
            .boxed(),
        );
        Ok(())
    }

    fn admit(&self, state: RateLimiterState) -> std::result::Result<(), BlockedRateLimiterError> {
        match state {
            RateLimiterState::Blocked {
                limit,
                total_attempts,
                exceed_attempts,
                retry_after,
            } => {
                debug!(
                    key = %self.key,
                    limit = limit,
                    attempts = total_attempts,
                    "Rate limit exceeded"
                );
                self.emit(RateLimiterEventKind::Blocked);
                Err(BlockedRateLimiterError {
                    key: self.key.display().to_string(),
                    limit,
                    total_attempts,
                    exceed_attempts,
                    retry_after,
                })
            }
            RateLimiterState::Allowed { .. } | RateLimiterState::Expired => {
                self.emit(RateLimiterEventKind::Allowed);
                Ok(())
            }
        }
    }

    fn emit(&self, kind: RateLimiterEventKind) {
        self.shared.events.dispatch(RateLimiterEvent {
            rate_limiter: self.view(),
            kind,
        });
    }
}

impl Transformable for RateLimiter {
    fn transformer_name(&self) -> TransformerName {
        self.shared.transformer_name()
    }
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("key", &self.key)
            .field("limit", &self.limit)
            .field("tracking_mode", &self.tracking_mode())
            .finish()
    }
}
