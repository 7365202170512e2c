//! Lifecycle notifications emitted by rate limiters.
//!
//! Listeners registered on an [`EventBus`] are called synchronously, in
//! registration order, after the bus lock has been released. Every event is
//! also published on a broadcast channel that [`EventBus::stream`] exposes.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::trace;
use uuid::Uuid;

use crate::ratelimit::RateLimiterView;

/// Capacity of the broadcast channel behind [`EventBus::stream`].
pub const DEFAULT_STREAM_CAPACITY: usize = 256;

/// Names used to select which events a listener receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimiterEventName {
    Allowed,
    Blocked,
    TrackedFailure,
    UntrackedFailure,
    Reseted,
}

/// What happened to the rate limiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimiterEventKind {
    /// The call was admitted.
    Allowed,
    /// The call was denied.
    Blocked,
    /// The operation failed and the failure was counted.
    TrackedFailure { error: String },
    /// The operation failed and the error policy let it pass.
    UntrackedFailure { error: String },
    /// The counter was reset.
    Reseted,
}

impl RateLimiterEventKind {
    pub fn name(&self) -> RateLimiterEventName {
        match self {
            RateLimiterEventKind::Allowed => RateLimiterEventName::Allowed,
            RateLimiterEventKind::Blocked => RateLimiterEventName::Blocked,
            RateLimiterEventKind::TrackedFailure { .. } => RateLimiterEventName::TrackedFailure,
            RateLimiterEventKind::UntrackedFailure { .. } => RateLimiterEventName::UntrackedFailure,
            RateLimiterEventKind::Reseted => RateLimiterEventName::Reseted,
        }
    }
}

/// A notification together with a read-only view of its rate limiter.
#[derive(Debug, Clone)]
pub struct RateLimiterEvent {
    pub rate_limiter: RateLimiterView,
    pub kind: RateLimiterEventKind,
}

/// Callback invoked for matching events.
pub type Listener = Arc<dyn Fn(&RateLimiterEvent) + Send + Sync>;

/// Identifies a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(Uuid);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Registration {
    id: ListenerId,
    name: RateLimiterEventName,
    listener: Listener,
    once: bool,
}

struct Inner {
    listeners: RwLock<Vec<Registration>>,
    sender: broadcast::Sender<RateLimiterEvent>,
}

/// In-process event bus shared by a provider and its rate limiters.
///
/// Cloning is cheap; clones share listeners.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl EventBus {
    /// Create a bus with the default stream capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_STREAM_CAPACITY)
    }

    /// Create a bus whose stream buffers up to `capacity` events per receiver.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                listeners: RwLock::new(Vec::new()),
                sender,
            }),
        }
    }

    /// Register a listener for every event with the given name.
    pub fn add_listener<F>(&self, name: RateLimiterEventName, listener: F) -> ListenerId
    where
        F: Fn(&RateLimiterEvent) + Send + Sync + 'static,
    {
        self.register(name, Arc::new(listener), false)
    }

    /// Register a listener that is removed after its first call.
    pub fn listen_once<F>(&self, name: RateLimiterEventName, listener: F) -> ListenerId
    where
        F: Fn(&RateLimiterEvent) + Send + Sync + 'static,
    {
        self.register(name, Arc::new(listener), true)
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.write();
        let before = listeners.len();
        listeners.retain(|registration| registration.id != id);
        listeners.len() != before
    }

    /// Register a listener and get a handle that can remove it.
    pub fn subscribe<F>(&self, name: RateLimiterEventName, listener: F) -> Subscription
    where
        F: Fn(&RateLimiterEvent) + Send + Sync + 'static,
    {
        let id = self.add_listener(name, listener);
        Subscription {
            bus: self.clone(),
            id,
        }
    }

    /// Stream every event dispatched after this call.
    pub fn stream(&self) -> BroadcastStream<RateLimiterEvent> {
        BroadcastStream::new(self.inner.sender.subscribe())
    }

    /// Get the number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.read().len()
    }

    /// Deliver an event to matching listeners and stream subscribers.
    pub fn dispatch(&self, event: RateLimiterEvent) {
        let name = event.kind.name();

        let listeners: Vec<Listener> = {
            let mut registrations = self.inner.listeners.write();
            let matching = registrations
                .iter()
                .filter(|registration| registration.name == name)
                .map(|registration| registration.listener.clone())
                .collect();
            registrations.retain(|registration| !(registration.once && registration.name == name));
            matching
        };

        trace!(
            event = ?name,
            key = %event.rate_limiter.key(),
            listeners = listeners.len(),
            "Dispatching rate limiter event"
        );

        for listener in &listeners {
            listener(&event);
        }

        // No stream subscribers is not an error.
        let _ = self.inner.sender.send(event);
    }

    fn register(&self, name: RateLimiterEventName, listener: Listener, once: bool) -> ListenerId {
        let id = ListenerId(Uuid::new_v4());
        self.inner.listeners.write().push(Registration {
            id,
            name,
            listener,
            once,
        });
        id
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// A listener registered through [`EventBus::subscribe`].
#[derive(Debug)]
pub struct Subscription {
    bus: EventBus,
    id: ListenerId,
}

impl Subscription {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Remove the listener from the bus.
    pub fn unsubscribe(self) -> bool {
        self.bus.remove_listener(self.id)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio_stream::StreamExt;

    use super::*;
    use crate::namespace::Namespace;
    use crate::ratelimit::adapter::mock::ScriptedAdapter;

    fn event(kind: RateLimiterEventKind) -> RateLimiterEvent {
        RateLimiterEvent {
            rate_limiter: RateLimiterView::new(
                Namespace::new("ns").key("k"),
                5,
                Arc::new(ScriptedAdapter::new()),
            ),
            kind,
        }
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&RateLimiterEvent) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let listener_count = count.clone();
        (count, move |_: &RateLimiterEvent| {
            listener_count.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_listener_receives_matching_events_only() {
        let bus = EventBus::new();
        let (count, listener) = counter();
        bus.add_listener(RateLimiterEventName::Blocked, listener);

        bus.dispatch(event(RateLimiterEventKind::Allowed));
        bus.dispatch(event(RateLimiterEventKind::Blocked));
        bus.dispatch(event(RateLimiterEventKind::Blocked));

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_remove_listener() {
        let bus = EventBus::new();
        let (count, listener) = counter();
        let id = bus.add_listener(RateLimiterEventName::Allowed, listener);

        assert!(bus.remove_listener(id));
        assert!(!bus.remove_listener(id));

        bus.dispatch(event(RateLimiterEventKind::Allowed));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn test_listen_once() {
        let bus = EventBus::new();
        let (count, listener) = counter();
        bus.listen_once(RateLimiterEventName::Reseted, listener);

        bus.dispatch(event(RateLimiterEventKind::Allowed));
        assert_eq!(bus.listener_count(), 1);

        bus.dispatch(event(RateLimiterEventKind::Reseted));
        bus.dispatch(event(RateLimiterEventKind::Reseted));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn test_subscription_unsubscribe() {
        let bus = EventBus::new();
        let (count, listener) = counter();
        let subscription = bus.subscribe(RateLimiterEventName::TrackedFailure, listener);

        bus.dispatch(event(RateLimiterEventKind::TrackedFailure {
            error: "boom".to_string(),
        }));
        assert!(subscription.unsubscribe());
        bus.dispatch(event(RateLimiterEventKind::TrackedFailure {
            error: "boom".to_string(),
        }));

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_clones_share_listeners() {
        let bus = EventBus::new();
        let (count, listener) = counter();
        bus.clone()
            .add_listener(RateLimiterEventName::Allowed, listener);

        bus.dispatch(event(RateLimiterEventKind::Allowed));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stream_receives_all_events() {
        let bus = EventBus::new();
        let mut stream = bus.stream();

        bus.dispatch(event(RateLimiterEventKind::Allowed));
        bus.dispatch(event(RateLimiterEventKind::UntrackedFailure {
            error: "nope".to_string(),
        }));

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.kind, RateLimiterEventKind::Allowed);
        assert_eq!(first.rate_limiter.key(), "k");

        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.kind.name(), RateLimiterEventName::UntrackedFailure);
    }

    #[test]
    fn test_dispatch_without_subscribers() {
        let bus = EventBus::new();
        bus.dispatch(event(RateLimiterEventKind::Blocked));
    }
}
