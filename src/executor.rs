//! Executor abstraction for background accounting.

use futures::future::BoxFuture;

/// Runs detached futures.
///
/// Submitted futures resolve to `()`; callers settle any failure before
/// submitting.
pub trait TaskExecutor: Send + Sync {
    /// Spawn a future without waiting for it.
    fn spawn(&self, task: BoxFuture<'static, ()>);
}

/// Executor backed by the ambient Tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioExecutor;

impl TaskExecutor for TokioExecutor {
    fn spawn(&self, task: BoxFuture<'static, ()>) {
        tokio::spawn(task);
    }
}
