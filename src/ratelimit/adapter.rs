//! Counter adapter trait for abstracting counter stores.

use async_trait::async_trait;

use super::state::CounterSnapshot;
use crate::error::Result;

/// Authoritative per-key attempt counter.
///
/// Implementations must make `update_state` an atomic read-modify-write per
/// key; the rate limiter does no locking of its own.
#[async_trait]
pub trait RateLimiterAdapter: Send + Sync {
    /// Name of the adapter family, used to tell providers apart when
    /// reconnecting serialized rate limiters.
    fn kind(&self) -> &str;

    /// Read the current snapshot without consuming an attempt.
    ///
    /// Returns `None` when no window is active for the key.
    async fn get_state(&self, key: &str) -> Result<Option<CounterSnapshot>>;

    /// Record one attempt and evaluate it against `limit`.
    async fn update_state(&self, key: &str, limit: u64) -> Result<CounterSnapshot>;

    /// Drop all state for the key.
    async fn reset(&self, key: &str) -> Result<()>;
}

#[cfg(test)]
pub(crate) mod mock {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;
    use tokio::sync::Notify;

    use super::*;
    use crate::error::RatekeeperError;

    /// Adapter returning scripted snapshots and recording every call.
    pub(crate) struct ScriptedAdapter {
        kind: String,
        get_snapshot: Mutex<Option<CounterSnapshot>>,
        update_snapshot: Mutex<CounterSnapshot>,
        fail_updates: Mutex<bool>,
        pub(crate) calls: Mutex<Vec<String>>,
        pub(crate) get_calls: AtomicUsize,
        pub(crate) update_calls: AtomicUsize,
        pub(crate) reset_calls: AtomicUsize,
        pub(crate) updated: Notify,
    }

    impl ScriptedAdapter {
        pub(crate) fn new() -> Self {
            Self::with_kind("ScriptedAdapter")
        }

        pub(crate) fn with_kind(kind: &str) -> Self {
            Self {
                kind: kind.to_string(),
                get_snapshot: Mutex::new(None),
                update_snapshot: Mutex::new(CounterSnapshot {
                    success: true,
                    attempt: 1,
                    reset_time: None,
                }),
                fail_updates: Mutex::new(false),
                calls: Mutex::new(Vec::new()),
                get_calls: AtomicUsize::new(0),
                update_calls: AtomicUsize::new(0),
                reset_calls: AtomicUsize::new(0),
                updated: Notify::new(),
            }
        }

        pub(crate) fn set_get_state(&self, snapshot: Option<CounterSnapshot>) {
            *self.get_snapshot.lock() = snapshot;
        }

        pub(crate) fn set_update_state(&self, snapshot: CounterSnapshot) {
            *self.update_snapshot.lock() = snapshot;
        }

        pub(crate) fn fail_updates(&self) {
            *self.fail_updates.lock() = true;
        }

        pub(crate) fn record(&self, call: &str) {
            self.calls.lock().push(call.to_string());
        }

        pub(crate) fn gets(&self) -> usize {
            self.get_calls.load(Ordering::SeqCst)
        }

        pub(crate) fn updates(&self) -> usize {
            self.update_calls.load(Ordering::SeqCst)
        }

        pub(crate) fn resets(&self) -> usize {
            self.reset_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RateLimiterAdapter for ScriptedAdapter {
        fn kind(&self) -> &str {
            &self.kind
        }

        async fn get_state(&self, key: &str) -> Result<Option<CounterSnapshot>> {
            self.get_calls.fetch_add(1, Ordering::SeqCst);
            self.record(&format!("get_state:{}", key));
            Ok(*self.get_snapshot.lock())
        }

        async fn update_state(&self, key: &str, limit: u64) -> Result<CounterSnapshot> {
            self.update_calls.fetch_add(1, Ordering::SeqCst);
            self.record(&format!("update_state:{}:{}", key, limit));
            self.updated.notify_one();
            if *self.fail_updates.lock() {
                return Err(RatekeeperError::adapter("store unavailable"));
            }
            Ok(*self.update_snapshot.lock())
        }

        async fn reset(&self, key: &str) -> Result<()> {
            self.reset_calls.fetch_add(1, Ordering::SeqCst);
            self.record(&format!("reset:{}", key));
            Ok(())
        }
    }
}
