//! Typed publish/subscribe registry for hub events.
//!
//! Listeners are kept per event name in registration order. Emitting walks a
//! snapshot of the list, so a listener may subscribe or unsubscribe other
//! listeners (or itself) while it is being called. A panicking listener is
//! logged and skipped; the remaining listeners still run.
//!
//! # Example
//!
//! ```rust
//! use pulse_link::{EventDispatcher, EventName};
//! use serde_json::json;
//!
//! let dispatcher = EventDispatcher::new();
//! let sub = dispatcher.subscribe(EventName::StepCompleted, |payload| {
//!     println!("step done: {}", payload);
//! });
//!
//! dispatcher.emit(&EventName::StepCompleted, &json!({"step": 1}));
//! sub.unsubscribe();
//! ```

use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock, Weak};

/// Names of the events the hub dispatches.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventName {
    /// Generic update of a reasoning trace
    TraceUpdate,
    StepCompleted,
    ConfidenceUpdate,
    TraceCompleted,
    /// Server-reported error
    Error,
    /// Hub-originated: the connection state changed
    ConnectionStateChanged,
    /// Hub-originated: the server or the local check rejected the token
    AuthenticationFailed,
    /// Hub-originated: a retry re-established the connection
    Reconnected,
    /// Any event name the hub does not know about
    Custom(String),
}

impl EventName {
    pub fn as_str(&self) -> &str {
        match self {
            Self::TraceUpdate => "TraceUpdate",
            Self::StepCompleted => "StepCompleted",
            Self::ConfidenceUpdate => "ConfidenceUpdate",
            Self::TraceCompleted => "TraceCompleted",
            Self::Error => "Error",
            Self::ConnectionStateChanged => "connectionStateChanged",
            Self::AuthenticationFailed => "authenticationFailed",
            Self::Reconnected => "reconnected",
            Self::Custom(name) => name,
        }
    }
}

impl From<&str> for EventName {
    fn from(name: &str) -> Self {
        match name {
            "TraceUpdate" => Self::TraceUpdate,
            "StepCompleted" => Self::StepCompleted,
            "ConfidenceUpdate" => Self::ConfidenceUpdate,
            "TraceCompleted" => Self::TraceCompleted,
            "Error" => Self::Error,
            "connectionStateChanged" => Self::ConnectionStateChanged,
            "authenticationFailed" => Self::AuthenticationFailed,
            "reconnected" => Self::Reconnected,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl From<String> for EventName {
    fn from(name: String) -> Self {
        Self::from(name.as_str())
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type alias for an event listener.
pub type Listener = Arc<dyn Fn(&JsonValue) + Send + Sync>;

/// Identity of one registration. Registering the same closure twice yields
/// two ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: HashMap<EventName, Vec<(ListenerId, Listener)>>,
}

/// Cloneable handle to a shared listener registry.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    registry: Arc<RwLock<Registry>>,
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        let mut counts: Vec<(&str, usize)> = registry
            .listeners
            .iter()
            .map(|(name, list)| (name.as_str(), list.len()))
            .collect();
        counts.sort_unstable();
        f.debug_struct("EventDispatcher").field("listeners", &counts).finish()
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` for `event`. Returns the handle that removes it.
    pub fn subscribe(
        &self,
        event: impl Into<EventName>,
        listener: impl Fn(&JsonValue) + Send + Sync + 'static,
    ) -> Subscription {
        self.subscribe_listener(event, Arc::new(listener))
    }

    /// Register an already shared listener, keeping its `Arc` identity so it
    /// can later be passed to [`remove_listener`](Self::remove_listener).
    pub fn subscribe_listener(&self, event: impl Into<EventName>, listener: Listener) -> Subscription {
        let event = event.into();
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        registry.next_id += 1;
        let id = ListenerId(registry.next_id);
        registry
            .listeners
            .entry(event.clone())
            .or_default()
            .push((id, listener));

        Subscription {
            event,
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Register a listener that receives the payload deserialized as `T`.
    ///
    /// Payloads that do not match `T` are logged and skipped.
    pub fn subscribe_typed<T, F>(&self, event: impl Into<EventName>, listener: F) -> Subscription
    where
        T: DeserializeOwned,
        F: Fn(T) + Send + Sync + 'static,
    {
        let event = event.into();
        let name = event.to_string();
        self.subscribe(event, move |payload| {
            match serde_json::from_value::<T>(payload.clone()) {
                Ok(value) => listener(value),
                Err(e) => {
                    log::warn!("[pulse-link] Dropping '{}' payload with unexpected shape: {}", name, e);
                },
            }
        })
    }

    /// Remove a listener by `Arc` identity. Returns `true` if one was removed.
    pub fn remove_listener(&self, event: &EventName, listener: &Listener) -> bool {
        let target = Arc::as_ptr(listener) as *const ();
        self.remove_where(event, |(_, l)| Arc::as_ptr(l) as *const () == target)
    }

    fn remove_id(&self, event: &EventName, id: ListenerId) -> bool {
        self.remove_where(event, |(lid, _)| *lid == id)
    }

    fn remove_where(
        &self,
        event: &EventName,
        matches: impl Fn(&(ListenerId, Listener)) -> bool,
    ) -> bool {
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        remove_from(&mut registry, event, matches)
    }

    /// Call every listener registered for `event`, in registration order.
    ///
    /// Returns the number of listeners that ran to completion.
    pub fn emit(&self, event: &EventName, payload: &JsonValue) -> usize {
        let snapshot: Vec<Listener> = {
            let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
            match registry.listeners.get(event) {
                Some(list) => list.iter().map(|(_, l)| Arc::clone(l)).collect(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        for listener in snapshot {
            match catch_unwind(AssertUnwindSafe(|| listener(payload))) {
                Ok(()) => delivered += 1,
                Err(_) => log::error!("[pulse-link] Listener for '{}' panicked", event),
            }
        }
        delivered
    }

    /// Drop every registration for every event.
    pub fn clear(&self) {
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .listeners
            .clear();
    }

    pub fn listener_count(&self, event: &EventName) -> usize {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .listeners
            .get(event)
            .map_or(0, Vec::len)
    }

    pub fn has_listeners(&self, event: &EventName) -> bool {
        self.listener_count(event) > 0
    }
}

fn remove_from(
    registry: &mut Registry,
    event: &EventName,
    matches: impl Fn(&(ListenerId, Listener)) -> bool,
) -> bool {
    let Some(list) = registry.listeners.get_mut(event) else {
        return false;
    };
    let Some(pos) = list.iter().position(|entry| matches(entry)) else {
        return false;
    };
    list.remove(pos);
    if list.is_empty() {
        registry.listeners.remove(event);
    }
    true
}

/// Handle returned by [`EventDispatcher::subscribe`].
///
/// Dropping the handle keeps the listener registered; call
/// [`unsubscribe`](Self::unsubscribe) to remove it.
#[derive(Debug, Clone)]
pub struct Subscription {
    event: EventName,
    id: ListenerId,
    registry: Weak<RwLock<Registry>>,
}

impl Subscription {
    pub fn event(&self) -> &EventName {
        &self.event
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Remove the listener. Returns `false` if it was already gone.
    pub fn unsubscribe(&self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        EventDispatcher { registry }.remove_id(&self.event, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> Listener) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let make = {
            let log = Arc::clone(&log);
            move |tag: &str| -> Listener {
                let log = Arc::clone(&log);
                let tag = tag.to_string();
                Arc::new(move |_payload: &JsonValue| log.lock().unwrap().push(tag.clone()))
            }
        };
        (log, make)
    }

    #[test]
    fn test_event_name_round_trip() {
        for name in ["TraceUpdate", "StepCompleted", "connectionStateChanged", "reconnected"] {
            assert_eq!(EventName::from(name).as_str(), name);
        }
        assert_eq!(
            EventName::from("PlanRevised"),
            EventName::Custom("PlanRevised".to_string())
        );
    }

    #[test]
    fn test_listeners_run_in_registration_order() {
        let dispatcher = EventDispatcher::new();
        let (log, make) = recorder();
        dispatcher.subscribe_listener(EventName::TraceUpdate, make("a"));
        dispatcher.subscribe_listener(EventName::TraceUpdate, make("b"));
        dispatcher.subscribe_listener(EventName::TraceCompleted, make("other"));

        assert_eq!(dispatcher.emit(&EventName::TraceUpdate, &json!({})), 2);
        assert_eq!(*log.lock().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_unsubscribe_by_handle() {
        let dispatcher = EventDispatcher::new();
        let (log, make) = recorder();
        let shared = make("same");
        let first = dispatcher.subscribe_listener(EventName::Error, Arc::clone(&shared));
        dispatcher.subscribe_listener(EventName::Error, shared);

        assert!(first.unsubscribe());
        assert!(!first.unsubscribe(), "second unsubscribe is a no-op");
        dispatcher.emit(&EventName::Error, &json!(null));
        assert_eq!(log.lock().unwrap().len(), 1, "only the first registration is gone");
    }

    #[test]
    fn test_remove_by_arc_identity() {
        let dispatcher = EventDispatcher::new();
        let (_log, make) = recorder();
        let keep = make("keep");
        let drop_me = make("drop");
        dispatcher.subscribe_listener(EventName::StepCompleted, Arc::clone(&keep));
        dispatcher.subscribe_listener(EventName::StepCompleted, Arc::clone(&drop_me));

        assert!(dispatcher.remove_listener(&EventName::StepCompleted, &drop_me));
        assert!(!dispatcher.remove_listener(&EventName::StepCompleted, &drop_me));
        assert_eq!(dispatcher.listener_count(&EventName::StepCompleted), 1);
    }

    #[test]
    fn test_panicking_listener_does_not_stop_others() {
        let dispatcher = EventDispatcher::new();
        let (log, make) = recorder();
        dispatcher.subscribe(EventName::Error, |_| panic!("listener bug"));
        dispatcher.subscribe_listener(EventName::Error, make("survivor"));

        assert_eq!(dispatcher.emit(&EventName::Error, &json!("x")), 1);
        assert_eq!(*log.lock().unwrap(), vec!["survivor"]);
    }

    #[test]
    fn test_listener_may_unsubscribe_during_dispatch() {
        let dispatcher = EventDispatcher::new();
        let (log, make) = recorder();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let slot_clone = Arc::clone(&slot);
        let once = dispatcher.subscribe(EventName::TraceUpdate, move |_| {
            if let Some(sub) = slot_clone.lock().unwrap().take() {
                sub.unsubscribe();
            }
        });
        *slot.lock().unwrap() = Some(once);
        dispatcher.subscribe_listener(EventName::TraceUpdate, make("after"));

        assert_eq!(dispatcher.emit(&EventName::TraceUpdate, &json!({})), 2);
        assert_eq!(dispatcher.emit(&EventName::TraceUpdate, &json!({})), 1);
        assert_eq!(*log.lock().unwrap(), vec!["after", "after"]);
    }

    #[test]
    fn test_typed_subscription_skips_mismatched_payloads() {
        #[derive(serde::Deserialize)]
        struct Confidence {
            value: f64,
        }

        let dispatcher = EventDispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        dispatcher.subscribe_typed(EventName::ConfidenceUpdate, move |c: Confidence| {
            seen_clone.lock().unwrap().push(c.value)
        });

        dispatcher.emit(&EventName::ConfidenceUpdate, &json!({"value": 0.75}));
        dispatcher.emit(&EventName::ConfidenceUpdate, &json!("garbage"));
        assert_eq!(*seen.lock().unwrap(), vec![0.75]);
    }

    #[test]
    fn test_clear_removes_everything() {
        let dispatcher = EventDispatcher::new();
        dispatcher.subscribe(EventName::TraceUpdate, |_| {});
        dispatcher.subscribe("custom", |_| {});
        dispatcher.clear();
        assert!(!dispatcher.has_listeners(&EventName::TraceUpdate));
        assert_eq!(dispatcher.emit(&EventName::from("custom"), &json!({})), 0);
    }
}
