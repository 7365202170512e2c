//! Transformer registry for serializing live objects.
//!
//! A transformer turns a value holding live references into a plain JSON
//! payload and rebuilds it later against its own live dependencies. The
//! [`CodecRegistry`] routes values and payloads to transformers by exact
//! [`TransformerName`] lookup.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{RatekeeperError, Result};

/// Ordered token slots identifying a transformer.
///
/// Equality and hashing cover every slot, empty ones included, so names that
/// only differ in which slot is empty stay distinct. Empty slots are left out
/// of [`tokens`](Self::tokens) and the display form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransformerName(Vec<String>);

impl TransformerName {
    pub fn new<I, S>(slots: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(slots.into_iter().map(Into::into).collect())
    }

    /// The non-empty tokens, in order.
    pub fn tokens(&self) -> Vec<&str> {
        self.0
            .iter()
            .map(String::as_str)
            .filter(|token| !token.is_empty())
            .collect()
    }

    /// Every slot, empty ones included.
    pub fn slots(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for TransformerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tokens().join("/"))
    }
}

/// A value that knows which transformer serializes it.
pub trait Transformable: Any {
    fn transformer_name(&self) -> TransformerName;
}

/// Plugin converting one family of values to and from JSON.
pub trait SerdeTransformer: Send + Sync {
    fn name(&self) -> &TransformerName;

    /// Whether this transformer accepts `value`.
    fn is_applicable(&self, value: &dyn Any) -> bool;

    fn serialize(&self, value: &dyn Any) -> Result<Value>;

    fn deserialize(&self, payload: Value) -> Result<Box<dyn Any + Send>>;
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    tag: String,
    name: TransformerName,
    payload: Value,
}

struct Registration {
    context_tag: String,
    transformer: Arc<dyn SerdeTransformer>,
}

/// Registry of transformers shared by everything that serializes through it.
///
/// Cloning is cheap; clones share registrations.
#[derive(Clone, Default)]
pub struct CodecRegistry {
    transformers: Arc<RwLock<HashMap<TransformerName, Registration>>>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transformer under its name.
    ///
    /// `context_tag` marks who registered it and is written into every
    /// envelope the transformer produces.
    pub fn register_custom(
        &self,
        transformer: Arc<dyn SerdeTransformer>,
        context_tag: &str,
    ) -> Result<()> {
        let name = transformer.name().clone();
        let mut transformers = self.transformers.write();

        if transformers.contains_key(&name) {
            return Err(RatekeeperError::DuplicateTransformer(name.to_string()));
        }

        info!(name = %name, tag = %context_tag, "Registered transformer");
        transformers.insert(
            name,
            Registration {
                context_tag: context_tag.to_string(),
                transformer,
            },
        );
        Ok(())
    }

    /// Remove a transformer. Returns false if it was not registered.
    pub fn unregister(&self, name: &TransformerName) -> bool {
        self.transformers.write().remove(name).is_some()
    }

    pub fn contains(&self, name: &TransformerName) -> bool {
        self.transformers.read().contains_key(name)
    }

    /// Get the number of registered transformers.
    pub fn len(&self) -> usize {
        self.transformers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.transformers.read().is_empty()
    }

    /// Serialize a value into a JSON envelope.
    pub fn serialize_value<T: Transformable>(&self, value: &T) -> Result<Value> {
        let name = value.transformer_name();
        let (context_tag, transformer) = self.lookup(&name)?;

        if !transformer.is_applicable(value) {
            return Err(RatekeeperError::NotApplicable(name.to_string()));
        }

        let payload = transformer.serialize(value)?;
        debug!(name = %name, "Serialized value");

        Ok(serde_json::to_value(Envelope {
            tag: context_tag,
            name,
            payload,
        })?)
    }

    /// Serialize a value into a JSON string.
    pub fn serialize<T: Transformable>(&self, value: &T) -> Result<String> {
        let envelope = self.serialize_value(value)?;
        Ok(serde_json::to_string(&envelope)?)
    }

    /// Rebuild a value from a JSON envelope.
    pub fn deserialize_value<T: Any>(&self, envelope: Value) -> Result<T> {
        let envelope: Envelope = serde_json::from_value(envelope)?;
        let (context_tag, transformer) = self.lookup(&envelope.name)?;

        if context_tag != envelope.tag {
            return Err(RatekeeperError::TransformerNotFound(format!(
                "{} (tag {})",
                envelope.name, envelope.tag
            )));
        }

        let value = transformer.deserialize(envelope.payload)?;
        value
            .downcast::<T>()
            .map(|value| *value)
            .map_err(|_| RatekeeperError::NotApplicable(envelope.name.to_string()))
    }

    /// Rebuild a value from a JSON string.
    pub fn deserialize<T: Any>(&self, serialized: &str) -> Result<T> {
        let envelope: Value = serde_json::from_str(serialized)?;
        self.deserialize_value(envelope)
    }

    fn lookup(&self, name: &TransformerName) -> Result<(String, Arc<dyn SerdeTransformer>)> {
        let transformers = self.transformers.read();
        let registration = transformers
            .get(name)
            .ok_or_else(|| RatekeeperError::TransformerNotFound(name.to_string()))?;
        Ok((
            registration.context_tag.clone(),
            registration.transformer.clone(),
        ))
    }
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self
            .transformers
            .read()
            .keys()
            .map(|name| name.to_string())
            .collect();
        f.debug_struct("CodecRegistry")
            .field("transformers", &names)
            .finish()
    }
}
