//! Serialization of rate limiters across process and storage boundaries.
//!
//! Only `{ version, key, limit }` is written. Deserialization always
//! reconnects to the live adapter, event bus and defaults of the provider
//! that owns the transformer, never to anything in the payload.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

use super::limiter::RateLimiter;
use super::provider::ProviderShared;
use crate::codec::{SerdeTransformer, TransformerName};
use crate::error::{RatekeeperError, Result};

/// Version tag of the serialized form.
pub const PAYLOAD_VERSION: &str = "1";

/// Serialized form of a rate limiter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedRateLimiter {
    pub version: String,
    pub key: String,
    pub limit: u64,
}

/// Codec plugin bound to one provider's live dependencies.
pub struct RateLimiterTransformer {
    shared: Arc<ProviderShared>,
    name: TransformerName,
}

impl RateLimiterTransformer {
    pub(crate) fn new(shared: Arc<ProviderShared>) -> Self {
        let name = shared.transformer_name();
        Self { shared, name }
    }

    /// Whether the rate limiter was created under the same transformer name,
    /// namespace and adapter kind as this transformer.
    pub fn accepts(&self, rate_limiter: &RateLimiter) -> bool {
        let other = &rate_limiter.shared;
        other.transformer_name == self.shared.transformer_name
            && other.namespace.to_string() == self.shared.namespace.to_string()
            && other.adapter.kind() == self.shared.adapter.kind()
    }

    pub fn to_payload(&self, rate_limiter: &RateLimiter) -> SerializedRateLimiter {
        SerializedRateLimiter {
            version: PAYLOAD_VERSION.to_string(),
            key: rate_limiter.key().to_string(),
            limit: rate_limiter.limit(),
        }
    }

    /// Rebuild a rate limiter bound to this transformer's provider.
    pub fn from_payload(&self, payload: SerializedRateLimiter) -> Result<RateLimiter> {
        if payload.version != PAYLOAD_VERSION {
            return Err(RatekeeperError::UnsupportedVersion(payload.version));
        }

        trace!(key = %payload.key, limit = payload.limit, "Rebuilding rate limiter");

        self.shared.rate_limiter(
            &payload.key,
            payload.limit,
            self.shared.default_policy.clone(),
            self.shared.only_error,
        )
    }
}

impl SerdeTransformer for RateLimiterTransformer {
    fn name(&self) -> &TransformerName {
        &self.name
    }

    fn is_applicable(&self, value: &dyn Any) -> bool {
        value
            .downcast_ref::<RateLimiter>()
            .is_some_and(|rate_limiter| self.accepts(rate_limiter))
    }

    fn serialize(&self, value: &dyn Any) -> Result<Value> {
        let rate_limiter = value
            .downcast_ref::<RateLimiter>()
            .filter(|rate_limiter| self.accepts(rate_limiter))
            .ok_or_else(|| RatekeeperError::NotApplicable(self.name.to_string()))?;
        Ok(serde_json::to_value(self.to_payload(rate_limiter))?)
    }

    fn deserialize(&self, payload: Value) -> Result<Box<dyn Any + Send>> {
        let payload: SerializedRateLimiter = serde_json::from_value(payload)?;
        Ok(Box::new(self.from_payload(payload)?))
    }
}

impl fmt::Debug for RateLimiterTransformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiterTransformer")
            .field("name", &self.name)
            .finish()
    }
}
