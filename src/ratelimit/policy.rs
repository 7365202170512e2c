//! Error policies deciding which failures count against a limit.

use std::any::Any;
use std::error::Error as StdError;
use std::fmt;
use std::marker::PhantomData;

use async_trait::async_trait;

use crate::error::BoxError;

/// An operation error as seen by an error policy.
///
/// Any displayable error type can be inspected, including [`BoxError`] and
/// other opaque error wrappers that do not implement [`std::error::Error`].
#[derive(Clone, Copy)]
pub struct PolicyInput<'a> {
    error: &'a (dyn Any + Send + Sync),
    display: &'a (dyn fmt::Display + Send + Sync),
}

impl<'a> PolicyInput<'a> {
    pub fn new<E>(error: &'a E) -> Self
    where
        E: fmt::Display + Send + Sync + 'static,
    {
        Self {
            error,
            display: error,
        }
    }

    /// Downcast to the concrete error type the operation returned.
    pub fn downcast_ref<T: Any>(&self) -> Option<&'a T> {
        self.error.downcast_ref::<T>()
    }

    /// Whether the error is a `T`, directly or inside a [`BoxError`].
    pub fn is<T: StdError + 'static>(&self) -> bool {
        if self.error.is::<T>() {
            return true;
        }
        self.downcast_ref::<BoxError>()
            .is_some_and(|boxed| boxed.is::<T>())
    }
}

impl fmt::Display for PolicyInput<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.display, f)
    }
}

impl fmt::Debug for PolicyInput<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PolicyInput")
            .field(&self.to_string())
            .finish()
    }
}

/// Classifies whether a failed operation should be tracked.
///
/// Returning `Err` means the policy itself failed; the rate limiter treats
/// that as "does not match".
#[async_trait]
pub trait ErrorPolicy: Send + Sync {
    async fn matches(&self, error: PolicyInput<'_>) -> Result<bool, BoxError>;
}

/// Counts every error.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyError;

#[async_trait]
impl ErrorPolicy for AnyError {
    async fn matches(&self, _error: PolicyInput<'_>) -> Result<bool, BoxError> {
        Ok(true)
    }
}

/// Counts errors accepted by a synchronous predicate.
pub struct PredicatePolicy<F> {
    predicate: F,
}

impl<F> PredicatePolicy<F>
where
    F: Fn(PolicyInput<'_>) -> bool + Send + Sync,
{
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

impl<F> fmt::Debug for PredicatePolicy<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PredicatePolicy").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F> ErrorPolicy for PredicatePolicy<F>
where
    F: Fn(PolicyInput<'_>) -> bool + Send + Sync,
{
    async fn matches(&self, error: PolicyInput<'_>) -> Result<bool, BoxError> {
        Ok((self.predicate)(error))
    }
}

/// Counts errors of one concrete type.
pub struct ErrorTypePolicy<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> ErrorTypePolicy<T>
where
    T: StdError + 'static,
{
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for ErrorTypePolicy<T>
where
    T: StdError + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for ErrorTypePolicy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorTypePolicy")
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

#[async_trait]
impl<T> ErrorPolicy for ErrorTypePolicy<T>
where
    T: StdError + 'static,
{
    async fn matches(&self, error: PolicyInput<'_>) -> Result<bool, BoxError> {
        Ok(error.is::<T>())
    }
}
