//! Rate limiter handles, providers and counter adapters.

pub(crate) mod adapter;
mod limiter;
mod memory;
mod policy;
mod provider;
mod state;
mod storage;
mod transformer;

pub use adapter::RateLimiterAdapter;
pub use limiter::{RateLimiter, RateLimiterView, TrackingMode};
pub use memory::MemoryRateLimiterStorage;
pub use policy::{AnyError, ErrorPolicy, ErrorTypePolicy, PolicyInput, PredicatePolicy};
pub use provider::{
    RateLimiterProvider, RateLimiterProviderBuilder, RateLimiterSettings, CODEC_CONTEXT_TAG,
    TRANSFORMER_PREFIX,
};
pub use state::{CounterSnapshot, RateLimiterState};
pub use storage::{
    RateLimiterStorage, StorageRateLimiterAdapter, WindowRecord, WindowUpdate, DEFAULT_WINDOW,
};
pub use transformer::{RateLimiterTransformer, SerializedRateLimiter, PAYLOAD_VERSION};
