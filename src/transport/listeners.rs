//! Listener registry for transport events.
//!
//! Callbacks are kept in one ordered list per event kind, plus one list per
//! message `type` string for typed messages. Registration returns a
//! [`Registration`] that removes exactly that callback again.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::error::TransportError;

type MessageFn = dyn Fn(&Inbound) + Send + Sync;
type TypedFn = dyn Fn(&Value) + Send + Sync;
type ErrorFn = dyn Fn(Option<&TransportError>) + Send + Sync;
type LifecycleFn = dyn Fn() + Send + Sync;

/// An inbound frame as delivered to message listeners.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// The frame parsed as JSON
    Json(Value),
    /// The frame was not valid JSON and is passed through unchanged
    Raw(String),
}

impl Inbound {
    /// Parse a text frame, falling back to the raw text when it is not JSON.
    #[must_use]
    pub fn parse(text: String) -> Self {
        match serde_json::from_str(&text) {
            Ok(value) => Self::Json(value),
            Err(_) => Self::Raw(text),
        }
    }

    /// The string `type` field of a parsed object, if any.
    #[must_use]
    pub fn message_type(&self) -> Option<&str> {
        match self {
            Self::Json(value) => value.get("type").and_then(Value::as_str),
            Self::Raw(_) => None,
        }
    }

    #[must_use]
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Raw(_) => None,
        }
    }

    #[must_use]
    pub fn as_raw(&self) -> Option<&str> {
        match self {
            Self::Json(_) => None,
            Self::Raw(text) => Some(text),
        }
    }

    /// Decode a parsed frame into a caller type.
    #[must_use]
    pub fn decode<T: DeserializeOwned>(&self) -> Option<T> {
        self.as_json()
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }
}

/// Which list a registration lives in.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Slot {
    Message,
    Typed(String),
    Error,
    Connect,
    Disconnect,
}

struct Entries<F: ?Sized> {
    entries: RwLock<Vec<(u64, Arc<F>)>>,
}

impl<F: ?Sized> Default for Entries<F> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }
}

// A poisoned lock only means a callback panicked mid-dispatch; the list itself is intact.
impl<F: ?Sized> Entries<F> {
    fn push(&self, id: u64, callback: Arc<F>) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, callback));
    }

    fn remove(&self, id: u64) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    /// Clone the callbacks out so none are invoked while the lock is held.
    fn snapshot(&self) -> Vec<Arc<F>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect()
    }

    fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Typed multi-map from event kind to ordered callbacks.
#[derive(Default)]
pub(crate) struct Listeners {
    next_id: AtomicU64,
    message: Entries<MessageFn>,
    typed: DashMap<String, Vec<(u64, Arc<TypedFn>)>>,
    error: Entries<ErrorFn>,
    connect: Entries<LifecycleFn>,
    disconnect: Entries<LifecycleFn>,
}

impl Listeners {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn on_message<F>(self: &Arc<Self>, callback: F) -> Registration
    where
        F: Fn(&Inbound) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.message.push(id, Arc::new(callback));
        self.registration(id, Slot::Message)
    }

    pub(crate) fn on_message_type<F>(self: &Arc<Self>, message_type: &str, callback: F) -> Registration
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.typed
            .entry(message_type.to_owned())
            .or_default()
            .push((id, Arc::new(callback)));
        self.registration(id, Slot::Typed(message_type.to_owned()))
    }

    pub(crate) fn on_error<F>(self: &Arc<Self>, callback: F) -> Registration
    where
        F: Fn(Option<&TransportError>) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.error.push(id, Arc::new(callback));
        self.registration(id, Slot::Error)
    }

    pub(crate) fn on_connect<F>(self: &Arc<Self>, callback: F) -> Registration
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.connect.push(id, Arc::new(callback));
        self.registration(id, Slot::Connect)
    }

    pub(crate) fn on_disconnect<F>(self: &Arc<Self>, callback: F) -> Registration
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.disconnect.push(id, Arc::new(callback));
        self.registration(id, Slot::Disconnect)
    }

    fn registration(self: &Arc<Self>, id: u64, slot: Slot) -> Registration {
        Registration {
            listeners: Arc::downgrade(self),
            id,
            slot,
        }
    }

    fn remove(&self, id: u64, slot: &Slot) -> bool {
        match slot {
            Slot::Message => self.message.remove(id),
            Slot::Error => self.error.remove(id),
            Slot::Connect => self.connect.remove(id),
            Slot::Disconnect => self.disconnect.remove(id),
            Slot::Typed(message_type) => {
                let Some(mut entries) = self.typed.get_mut(message_type) else {
                    return false;
                };
                let before = entries.len();
                entries.retain(|(entry_id, _)| *entry_id != id);
                entries.len() != before
            }
        }
    }

    /// Deliver an inbound frame to message listeners, then to the listeners
    /// registered for its `type`, if any.
    pub(crate) fn dispatch_message(&self, inbound: &Inbound) {
        for callback in self.message.snapshot() {
            callback(inbound);
        }

        let (Some(message_type), Some(value)) = (inbound.message_type(), inbound.as_json()) else {
            return;
        };

        let typed: Vec<Arc<TypedFn>> = self
            .typed
            .get(message_type)
            .map(|entries| entries.iter().map(|(_, f)| Arc::clone(f)).collect())
            .unwrap_or_default();

        for callback in typed {
            callback(value);
        }
    }

    pub(crate) fn dispatch_error(&self, error: Option<&TransportError>) {
        for callback in self.error.snapshot() {
            callback(error);
        }
    }

    pub(crate) fn dispatch_connect(&self) {
        for callback in self.connect.snapshot() {
            callback();
        }
    }

    pub(crate) fn dispatch_disconnect(&self) {
        for callback in self.disconnect.snapshot() {
            callback();
        }
    }

    /// Drop every registration.
    pub(crate) fn clear(&self) {
        self.message.clear();
        self.typed.clear();
        self.error.clear();
        self.connect.clear();
        self.disconnect.clear();
    }

    /// Total number of registered callbacks.
    pub(crate) fn len(&self) -> usize {
        let typed: usize = self.typed.iter().map(|entry| entry.value().len()).sum();
        self.message.len() + typed + self.error.len() + self.connect.len() + self.disconnect.len()
    }
}

/// Handle to one registered listener.
///
/// Dropping it keeps the listener registered; call
/// [`unregister`](Self::unregister) to remove it.
#[must_use = "dropping a Registration keeps the listener; keep it to unregister later"]
#[derive(Debug)]
pub struct Registration {
    listeners: Weak<Listeners>,
    id: u64,
    slot: Slot,
}

impl Registration {
    /// Remove the listener. Returns `false` if it was already gone, e.g.
    /// because the transport has been closed.
    pub fn unregister(self) -> bool {
        self.listeners
            .upgrade()
            .is_some_and(|listeners| listeners.remove(self.id, &self.slot))
    }
}
