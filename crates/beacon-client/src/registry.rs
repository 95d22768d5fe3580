//! Handler registry: action-keyed fan-out of realtime events.
//!
//! Handlers registered under [`ActionKey::Specific`] receive the event's
//! `data`; handlers registered under [`ActionKey::Wildcard`] receive the full
//! `{action, data}` envelope for every event.
//!
//! Dispatch iterates over a snapshot of the handler lists taken before any
//! handler runs, so handlers may subscribe or unsubscribe (themselves or
//! others) from inside a callback. Each handler invocation is isolated: an
//! error or panic is logged and dispatch continues.

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};

use beacon_core::{ActionKey, ActionKeys, RealtimeEvent};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error};

/// Return type of handler callbacks.
pub type HandlerResult = anyhow::Result<()>;

type HandlerFn = dyn Fn(&Value) -> HandlerResult + Send + Sync;

// ─────────────────────────────────────────────────────────────────────────────
// Handler
// ─────────────────────────────────────────────────────────────────────────────

/// A subscriber callback.
///
/// Cloning is cheap and keeps identity: [`HandlerRegistry::unsubscribe`]
/// matches handlers by pointer, like function references.
#[derive(Clone)]
pub struct Handler {
    inner: Arc<HandlerFn>,
}

impl Handler {
    /// Wrap a fallible callback.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Value) -> HandlerResult + Send + Sync + 'static,
    {
        Self { inner: Arc::new(f) }
    }

    /// Wrap a callback that cannot fail (it may still panic).
    pub fn infallible<F>(f: F) -> Self
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        Self::new(move |value| {
            f(value);
            Ok(())
        })
    }

    /// Wrap a callback taking a typed payload.
    ///
    /// A payload that does not deserialize into `T` counts as a handler
    /// failure.
    pub fn typed<T, F>(f: F) -> Self
    where
        T: DeserializeOwned,
        F: Fn(T) -> HandlerResult + Send + Sync + 'static,
    {
        Self::new(move |value| {
            let payload = T::deserialize(value)?;
            f(payload)
        })
    }

    /// Whether `self` and `other` are the same registered callback.
    pub fn same(&self, other: &Handler) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Invoke the callback, converting errors and panics.
    pub fn call(&self, value: &Value) -> Result<(), SubscriberError> {
        match catch_unwind(AssertUnwindSafe(|| (self.inner)(value))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SubscriberError::Failed(e)),
            Err(panic) => Err(SubscriberError::Panicked(panic_message(panic.as_ref()))),
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("ptr", &Arc::as_ptr(&self.inner).cast::<()>())
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

/// A handler failed during dispatch.
///
/// Logged per handler; never propagated to the transport or to subscribers.
#[derive(Debug, Error)]
pub enum SubscriberError {
    /// The handler returned an error.
    #[error("handler returned an error: {0:#}")]
    Failed(anyhow::Error),
    /// The handler panicked.
    #[error("handler panicked: {0}")]
    Panicked(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome counts of one dispatch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Handlers that returned normally.
    pub delivered: usize,
    /// Handlers that returned an error or panicked.
    pub failed: usize,
}

/// Mapping from action key to the handlers registered under it.
///
/// Keys are removed as soon as their last handler goes away.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<ActionKey, Vec<Handler>>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under every key in `keys`.
    ///
    /// Registering the same handler twice under a key is a no-op. The
    /// returned [`Subscription`] removes the handler from all of `keys` when
    /// disposed or dropped.
    pub fn subscribe(self: &Arc<Self>, keys: impl Into<ActionKeys>, handler: Handler) -> Subscription {
        let keys = keys.into().into_vec();
        {
            let mut handlers = self.handlers.write();
            for key in &keys {
                let set = handlers.entry(key.clone()).or_default();
                if !set.iter().any(|h| h.same(&handler)) {
                    set.push(handler.clone());
                }
            }
        }
        debug!(keys = ?keys, "handler subscribed");

        Subscription {
            registry: Arc::downgrade(self),
            keys,
            handler,
            active: true,
        }
    }

    /// Remove `handler` from `key`. Unknown keys and handlers are ignored.
    pub fn unsubscribe(&self, key: &ActionKey, handler: &Handler) {
        let mut handlers = self.handlers.write();
        let Some(set) = handlers.get_mut(key) else {
            return;
        };
        set.retain(|h| !h.same(handler));
        if set.is_empty() {
            let _ = handlers.remove(key);
        }
    }

    /// Deliver `event` to its action's handlers, then to wildcard handlers.
    pub fn dispatch(&self, event: &RealtimeEvent) -> DispatchReport {
        let (specific, wildcard) = {
            let handlers = self.handlers.read();
            (
                handlers
                    .get(&ActionKey::specific(event.action.as_str()))
                    .cloned()
                    .unwrap_or_default(),
                handlers
                    .get(&ActionKey::Wildcard)
                    .cloned()
                    .unwrap_or_default(),
            )
        };

        let mut report = DispatchReport::default();

        for handler in &specific {
            if let Err(e) = handler.call(&event.data) {
                error!(action = %event.action, error = %e, "realtime event handler failed");
                report.failed += 1;
            } else {
                report.delivered += 1;
            }
        }

        if !wildcard.is_empty() {
            let envelope = event.to_value();
            for handler in &wildcard {
                if let Err(e) = handler.call(&envelope) {
                    error!(action = %event.action, error = %e, "wildcard event handler failed");
                    report.failed += 1;
                } else {
                    report.delivered += 1;
                }
            }
        }

        report
    }

    /// Number of handlers registered under `key`.
    pub fn handler_count(&self, key: &ActionKey) -> usize {
        self.handlers.read().get(key).map_or(0, Vec::len)
    }

    /// Whether `key` currently has an entry.
    pub fn contains_key(&self, key: &ActionKey) -> bool {
        self.handlers.read().contains_key(key)
    }

    /// Number of keys with at least one handler.
    pub fn key_count(&self) -> usize {
        self.handlers.read().len()
    }

    /// Whether no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = self.handlers.read();
        f.debug_map()
            .entries(handlers.iter().map(|(k, v)| (k.to_string(), v.len())))
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Subscription (disposer)
// ─────────────────────────────────────────────────────────────────────────────

/// Disposer returned by [`HandlerRegistry::subscribe`].
///
/// Dropping it unsubscribes the handler from every key it was registered
/// under, so a component that holds its subscriptions releases them on every
/// exit path.
#[must_use = "dropping a Subscription immediately unsubscribes its handler"]
pub struct Subscription {
    registry: Weak<HandlerRegistry>,
    keys: Vec<ActionKey>,
    handler: Handler,
    active: bool,
}

impl Subscription {
    /// Unsubscribe now.
    pub fn dispose(mut self) {
        self.release();
    }

    /// Keep the handler registered past this guard's lifetime.
    ///
    /// The handler can still be removed with [`HandlerRegistry::unsubscribe`].
    pub fn detach(mut self) -> Handler {
        self.active = false;
        self.handler.clone()
    }

    /// Keys this subscription covers.
    pub fn keys(&self) -> &[ActionKey] {
        &self.keys
    }

    /// The registered handler.
    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    fn release(&mut self) {
        if !std::mem::replace(&mut self.active, false) {
            return;
        }
        // Registry already torn down: nothing left to remove from.
        if let Some(registry) = self.registry.upgrade() {
            for key in &self.keys {
                registry.unsubscribe(key, &self.handler);
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("keys", &self.keys)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
