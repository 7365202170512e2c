//! Error types for ratekeeper.

use std::time::Duration;

use thiserror::Error;

/// Boxed error used at trait seams (adapters, storages, error policies).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for ratekeeper operations.
#[derive(Error, Debug)]
pub enum RatekeeperError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A rate limiter was created with a limit of zero
    #[error("Invalid limit for key \"{key}\": limit must be greater than 0")]
    InvalidLimit { key: String },

    /// Counter adapter or storage failures, passed through untouched
    #[error("Adapter error: {0}")]
    Adapter(#[source] BoxError),

    /// JSON encoding/decoding errors
    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// YAML configuration parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A transformer with the same name is already registered
    #[error("Transformer already registered: {0}")]
    DuplicateTransformer(String),

    /// No transformer is registered under the requested name
    #[error("No transformer registered for: {0}")]
    TransformerNotFound(String),

    /// The selected transformer does not accept the value
    #[error("Transformer {0} is not applicable to this value")]
    NotApplicable(String),

    /// Serialized payload carries an unknown version tag
    #[error("Unsupported payload version: {0}")]
    UnsupportedVersion(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RatekeeperError {
    /// Wrap a backend failure as an adapter error.
    pub fn adapter<E>(error: E) -> Self
    where
        E: Into<BoxError>,
    {
        RatekeeperError::Adapter(error.into())
    }
}

/// Result type alias for ratekeeper operations.
pub type Result<T> = std::result::Result<T, RatekeeperError>;

/// Raised when a rate limiter denies an operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Rate limiter for key \"{key}\" is blocked after {total_attempts} attempts (limit {limit})")]
pub struct BlockedRateLimiterError {
    /// Display key of the rate limiter
    pub key: String,
    /// Configured limit
    pub limit: u64,
    /// Attempts recorded in the current window
    pub total_attempts: u64,
    /// Attempts beyond the limit
    pub exceed_attempts: u64,
    /// Time until the window resets, when the adapter knows it
    pub retry_after: Option<Duration>,
}

/// Error returned by [`RateLimiter::run_or_fail`](crate::ratelimit::RateLimiter::run_or_fail).
///
/// The operation's own error is carried unchanged in [`RateLimiterError::Operation`].
#[derive(Error, Debug)]
pub enum RateLimiterError<E> {
    /// The limiter denied the call; the operation was not run.
    #[error(transparent)]
    Blocked(BlockedRateLimiterError),

    /// The counter adapter failed.
    #[error(transparent)]
    Internal(RatekeeperError),

    /// The operation ran and failed.
    #[error(transparent)]
    Operation(E),
}

impl<E> RateLimiterError<E> {
    /// Returns true when the limiter denied the call.
    pub fn is_blocked(&self) -> bool {
        matches!(self, RateLimiterError::Blocked(_))
    }

    /// The operation's error, if that is what failed.
    pub fn into_operation(self) -> Option<E> {
        match self {
            RateLimiterError::Operation(error) => Some(error),
            _ => None,
        }
    }
}

impl<E> From<BlockedRateLimiterError> for RateLimiterError<E> {
    fn from(error: BlockedRateLimiterError) -> Self {
        RateLimiterError::Blocked(error)
    }
}

impl<E> From<RatekeeperError> for RateLimiterError<E> {
    fn from(error: RatekeeperError) -> Self {
        RateLimiterError::Internal(error)
    }
}
