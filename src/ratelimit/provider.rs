//! Rate limiter provider: shared configuration and handle factory.

use std::fmt;
use std::sync::Arc;

use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info};

use super::adapter::RateLimiterAdapter;
use super::limiter::RateLimiter;
use super::policy::{AnyError, ErrorPolicy};
use super::transformer::RateLimiterTransformer;
use crate::codec::{CodecRegistry, TransformerName};
use crate::config::ProviderConfig;
use crate::error::{RatekeeperError, Result};
use crate::events::{EventBus, ListenerId, RateLimiterEvent, RateLimiterEventName, Subscription};
use crate::executor::{TaskExecutor, TokioExecutor};
use crate::namespace::Namespace;

/// Context tag written by rate limiter transformers into codec envelopes.
pub const CODEC_CONTEXT_TAG: &str = "ratekeeper";

/// Leading token of every rate limiter transformer name.
pub const TRANSFORMER_PREFIX: &str = "rateLimiter";

/// Live dependencies and defaults shared by a provider, its rate limiters
/// and its transformer.
pub(crate) struct ProviderShared {
    pub(crate) namespace: Namespace,
    pub(crate) transformer_name: String,
    pub(crate) adapter: Arc<dyn RateLimiterAdapter>,
    pub(crate) events: EventBus,
    pub(crate) executor: Arc<dyn TaskExecutor>,
    pub(crate) default_policy: Arc<dyn ErrorPolicy>,
    pub(crate) only_error: bool,
    pub(crate) async_tracking: bool,
}

impl ProviderShared {
    pub(crate) fn transformer_name(&self) -> TransformerName {
        TransformerName::new([
            TRANSFORMER_PREFIX.to_string(),
            self.transformer_name.clone(),
            self.adapter.kind().to_string(),
            self.namespace.to_string(),
        ])
    }

    /// Build a rate limiter with validated settings.
    pub(crate) fn rate_limiter(
        self: &Arc<Self>,
        raw_key: &str,
        limit: u64,
        error_policy: Arc<dyn ErrorPolicy>,
        only_error: bool,
    ) -> Result<RateLimiter> {
        if limit == 0 {
            return Err(RatekeeperError::InvalidLimit {
                key: raw_key.to_string(),
            });
        }

        Ok(RateLimiter::new(
            self.clone(),
            self.namespace.key(raw_key),
            limit,
            error_policy,
            only_error,
        ))
    }
}

/// Per-rate-limiter settings; unset fields fall back to the provider's.
#[derive(Clone)]
pub struct RateLimiterSettings {
    /// Maximum attempts per window; must be greater than 0
    pub limit: u64,
    /// Error policy override for this rate limiter
    pub error_policy: Option<Arc<dyn ErrorPolicy>>,
    /// Tracking mode override for this rate limiter
    pub only_error: Option<bool>,
}

impl RateLimiterSettings {
    /// Settings with the given limit and no overrides.
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            error_policy: None,
            only_error: None,
        }
    }

    /// Use `policy` instead of the provider's default.
    pub fn error_policy(mut self, policy: impl ErrorPolicy + 'static) -> Self {
        self.error_policy = Some(Arc::new(policy));
        self
    }

    /// Count only failed operations, or every call.
    pub fn only_error(mut self, only_error: bool) -> Self {
        self.only_error = Some(only_error);
        self
    }
}

impl fmt::Debug for RateLimiterSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiterSettings")
            .field("limit", &self.limit)
            .field("error_policy", &self.error_policy.is_some())
            .field("only_error", &self.only_error)
            .finish()
    }
}

/// Creates rate limiters bound to one adapter, event bus and namespace.
#[derive(Clone)]
pub struct RateLimiterProvider {
    pub(crate) shared: Arc<ProviderShared>,
}

impl RateLimiterProvider {
    /// Start building a provider around an adapter.
    pub fn builder(adapter: Arc<dyn RateLimiterAdapter>) -> RateLimiterProviderBuilder {
        RateLimiterProviderBuilder::new(adapter)
    }

    /// Create a rate limiter for `key`.
    pub fn create(&self, key: &str, settings: RateLimiterSettings) -> Result<RateLimiter> {
        let error_policy = settings
            .error_policy
            .unwrap_or_else(|| self.shared.default_policy.clone());
        let only_error = settings.only_error.unwrap_or(self.shared.only_error);

        debug!(
            key = %key,
            limit = settings.limit,
            only_error = only_error,
            "Creating rate limiter"
        );

        self.shared
            .rate_limiter(key, settings.limit, error_policy, only_error)
    }

    /// Namespace applied to every key this provider creates.
    pub fn namespace(&self) -> &Namespace {
        &self.shared.namespace
    }

    /// Name under which this provider's transformer is registered.
    pub fn transformer_name(&self) -> TransformerName {
        self.shared.transformer_name()
    }

    /// The event bus shared with every rate limiter of this provider.
    pub fn events(&self) -> &EventBus {
        &self.shared.events
    }

    /// See [`EventBus::add_listener`].
    pub fn add_listener<F>(&self, name: RateLimiterEventName, listener: F) -> ListenerId
    where
        F: Fn(&RateLimiterEvent) + Send + Sync + 'static,
    {
        self.shared.events.add_listener(name, listener)
    }

    /// See [`EventBus::remove_listener`].
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.shared.events.remove_listener(id)
    }

    /// See [`EventBus::listen_once`].
    pub fn listen_once<F>(&self, name: RateLimiterEventName, listener: F) -> ListenerId
    where
        F: Fn(&RateLimiterEvent) + Send + Sync + 'static,
    {
        self.shared.events.listen_once(name, listener)
    }

    /// See [`EventBus::subscribe`].
    pub fn subscribe<F>(&self, name: RateLimiterEventName, listener: F) -> Subscription
    where
        F: Fn(&RateLimiterEvent) + Send + Sync + 'static,
    {
        self.shared.events.subscribe(name, listener)
    }

    /// See [`EventBus::stream`].
    pub fn stream(&self) -> BroadcastStream<RateLimiterEvent> {
        self.shared.events.stream()
    }
}

impl fmt::Debug for RateLimiterProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiterProvider")
            .field("namespace", &self.shared.namespace)
            .field("transformer_name", &self.shared.transformer_name)
            .field("adapter", &self.shared.adapter.kind())
            .field("only_error", &self.shared.only_error)
            .field("async_tracking", &self.shared.async_tracking)
            .finish()
    }
}

/// Builder for [`RateLimiterProvider`].
pub struct RateLimiterProviderBuilder {
    adapter: Arc<dyn RateLimiterAdapter>,
    config: ProviderConfig,
    events: Option<EventBus>,
    executor: Option<Arc<dyn TaskExecutor>>,
    error_policy: Option<Arc<dyn ErrorPolicy>>,
    registries: Vec<CodecRegistry>,
}

impl RateLimiterProviderBuilder {
    fn new(adapter: Arc<dyn RateLimiterAdapter>) -> Self {
        Self {
            adapter,
            config: ProviderConfig::default(),
            events: None,
            executor: None,
            error_policy: None,
            registries: Vec::new(),
        }
    }

    /// Replace all plain settings with a loaded configuration.
    pub fn config(mut self, config: ProviderConfig) -> Self {
        self.config = config;
        self
    }

    /// Key prefix. An empty namespace leaves keys unqualified.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.config.namespace = namespace.into();
        self
    }

    /// Tag separating providers that share a codec registry.
    pub fn transformer_name(mut self, name: impl Into<String>) -> Self {
        self.config.transformer_name = name.into();
        self
    }

    /// Default tracking mode for created rate limiters.
    pub fn only_error(mut self, only_error: bool) -> Self {
        self.config.only_error = only_error;
        self
    }

    /// Record matched failures in the background.
    pub fn async_tracking(mut self, async_tracking: bool) -> Self {
        self.config.async_tracking = async_tracking;
        self
    }

    /// Share an existing event bus. A fresh bus is created otherwise.
    pub fn event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Executor for background tracking. Defaults to [`TokioExecutor`].
    pub fn executor(mut self, executor: Arc<dyn TaskExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Default error policy. Defaults to [`AnyError`].
    pub fn error_policy(mut self, policy: impl ErrorPolicy + 'static) -> Self {
        self.error_policy = Some(Arc::new(policy));
        self
    }

    /// Register the provider's transformer in `registry` on build.
    pub fn register_in(mut self, registry: &CodecRegistry) -> Self {
        self.registries.push(registry.clone());
        self
    }

    /// Build the provider and register its transformer.
    ///
    /// Fails without side effects if any registry already holds a
    /// transformer with the same name.
    pub fn build(self) -> Result<RateLimiterProvider> {
        let shared = Arc::new(ProviderShared {
            namespace: Namespace::new(self.config.namespace),
            transformer_name: self.config.transformer_name,
            adapter: self.adapter,
            events: self.events.unwrap_or_default(),
            executor: self.executor.unwrap_or_else(|| Arc::new(TokioExecutor)),
            default_policy: self.error_policy.unwrap_or_else(|| Arc::new(AnyError)),
            only_error: self.config.only_error,
            async_tracking: self.config.async_tracking,
        });

        let transformer = Arc::new(RateLimiterTransformer::new(shared.clone()));
        let name = shared.transformer_name();

        for (index, registry) in self.registries.iter().enumerate() {
            if let Err(error) = registry.register_custom(transformer.clone(), CODEC_CONTEXT_TAG) {
                for registered in &self.registries[..index] {
                    registered.unregister(&name);
                }
                return Err(error);
            }
        }

        info!(
            namespace = %shared.namespace,
            adapter = %shared.adapter.kind(),
            transformer = %name,
            registries = self.registries.len(),
            "Rate limiter provider initialized"
        );

        Ok(RateLimiterProvider { shared })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::adapter::mock::ScriptedAdapter;
    use crate::ratelimit::policy::{ErrorTypePolicy, PolicyInput};

    #[derive(Debug, thiserror::Error)]
    #[error("timeout")]
    struct Timeout;

    fn adapter() -> Arc<ScriptedAdapter> {
        Arc::new(ScriptedAdapter::with_kind("memory"))
    }

    #[test]
    fn test_create_qualifies_key() {
        let provider = RateLimiterProvider::builder(adapter())
            .namespace("tenant-a")
            .build()
            .unwrap();

        let limiter = provider
            .create("login:bob", RateLimiterSettings::new(3))
            .unwrap();

        assert_eq!(limiter.key(), "login:bob");
        assert_eq!(limiter.qualified_key(), "tenant-a:login:bob");
        assert_eq!(limiter.limit(), 3);
    }

    #[test]
    fn test_default_namespace() {
        let provider = RateLimiterProvider::builder(adapter()).build().unwrap();
        let limiter = provider.create("k", RateLimiterSettings::new(1)).unwrap();
        assert_eq!(limiter.qualified_key(), "@rate-limiter:k");
    }

    #[test]
    fn test_zero_limit_rejected() {
        let provider = RateLimiterProvider::builder(adapter()).build().unwrap();
        let result = provider.create("k", RateLimiterSettings::new(0));
        assert!(matches!(result, Err(RatekeeperError::InvalidLimit { .. })));
    }

    #[tokio::test]
    async fn test_settings_override_defaults() {
        let provider = RateLimiterProvider::builder(adapter())
            .only_error(false)
            .async_tracking(false)
            .build()
            .unwrap();

        let default = provider.create("a", RateLimiterSettings::new(1)).unwrap();
        assert!(!default.tracking_mode().only_error);
        assert!(!default.tracking_mode().async_tracking);

        let overridden = provider
            .create(
                "b",
                RateLimiterSettings::new(1)
                    .only_error(true)
                    .error_policy(ErrorTypePolicy::<Timeout>::new()),
            )
            .unwrap();
        assert!(overridden.tracking_mode().only_error);
        assert!(overridden
            .error_policy
            .matches(PolicyInput::new(&Timeout))
            .await
            .unwrap());
    }

    #[test]
    fn test_builder_from_config() {
        let config = ProviderConfig::from_yaml("namespace: cfg\nonly_error: true\n").unwrap();
        let provider = RateLimiterProvider::builder(adapter())
            .config(config)
            .build()
            .unwrap();

        let limiter = provider.create("k", RateLimiterSettings::new(2)).unwrap();
        assert_eq!(limiter.qualified_key(), "cfg:k");
        assert!(limiter.tracking_mode().only_error);
        assert!(limiter.tracking_mode().async_tracking);
    }

    #[test]
    fn test_registers_one_transformer_per_registry() {
        let first = CodecRegistry::new();
        let second = CodecRegistry::new();

        let provider = RateLimiterProvider::builder(adapter())
            .namespace("ns")
            .transformer_name("login")
            .register_in(&first)
            .register_in(&second)
            .build()
            .unwrap();

        let name = provider.transformer_name();
        assert_eq!(name.tokens(), vec!["rateLimiter", "login", "memory", "ns"]);
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert!(first.contains(&name));
        assert!(second.contains(&name));
    }

    #[test]
    fn test_duplicate_registration_rolls_back() {
        let shared = CodecRegistry::new();
        let fresh = CodecRegistry::new();

        RateLimiterProvider::builder(adapter())
            .namespace("ns")
            .register_in(&shared)
            .build()
            .unwrap();

        let result = RateLimiterProvider::builder(adapter())
            .namespace("ns")
            .register_in(&fresh)
            .register_in(&shared)
            .build();

        assert!(matches!(
            result,
            Err(RatekeeperError::DuplicateTransformer(_))
        ));
        assert!(fresh.is_empty());
        assert_eq!(shared.len(), 1);
    }

    #[test]
    fn test_distinct_providers_share_registry() {
        let registry = CodecRegistry::new();

        RateLimiterProvider::builder(adapter())
            .namespace("ns")
            .register_in(&registry)
            .build()
            .unwrap();
        RateLimiterProvider::builder(adapter())
            .namespace("other")
            .register_in(&registry)
            .build()
            .unwrap();
        RateLimiterProvider::builder(Arc::new(ScriptedAdapter::with_kind("database")))
            .namespace("ns")
            .register_in(&registry)
            .build()
            .unwrap();
        RateLimiterProvider::builder(adapter())
            .namespace("ns")
            .transformer_name("signup")
            .register_in(&registry)
            .build()
            .unwrap();

        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn test_providers_with_shifted_empty_slots_both_register() {
        let registry = CodecRegistry::new();

        let named = RateLimiterProvider::builder(adapter())
            .namespace("")
            .transformer_name("memory")
            .register_in(&registry)
            .build()
            .unwrap();
        let namespaced = RateLimiterProvider::builder(adapter())
            .namespace("memory")
            .transformer_name("")
            .register_in(&registry)
            .build()
            .unwrap();

        assert_eq!(
            named.transformer_name().to_string(),
            namespaced.transformer_name().to_string()
        );
        assert_eq!(registry.len(), 2);

        let a = named.create("k", RateLimiterSettings::new(1)).unwrap();
        let b = namespaced.create("k", RateLimiterSettings::new(2)).unwrap();
        let restored_a: RateLimiter = registry
            .deserialize(&registry.serialize(&a).unwrap())
            .unwrap();
        let restored_b: RateLimiter = registry
            .deserialize(&registry.serialize(&b).unwrap())
            .unwrap();
        assert_eq!(restored_a.qualified_key(), "k");
        assert_eq!(restored_b.qualified_key(), "memory:k");
        assert_eq!(restored_b.limit(), 2);
    }

    #[test]
    fn test_pass_through_listeners() {
        let provider = RateLimiterProvider::builder(adapter()).build().unwrap();

        let id = provider.add_listener(RateLimiterEventName::Allowed, |_| {});
        provider.listen_once(RateLimiterEventName::Blocked, |_| {});
        let subscription = provider.subscribe(RateLimiterEventName::Reseted, |_| {});
        assert_eq!(provider.events().listener_count(), 3);

        assert!(provider.remove_listener(id));
        assert!(subscription.unsubscribe());
        assert_eq!(provider.events().listener_count(), 1);
    }

    #[test]
    fn test_shared_event_bus() {
        let bus = EventBus::new();
        let provider = RateLimiterProvider::builder(adapter())
            .event_bus(bus.clone())
            .build()
            .unwrap();

        provider.add_listener(RateLimiterEventName::Allowed, |_| {});
        assert_eq!(bus.listener_count(), 1);
    }
}
