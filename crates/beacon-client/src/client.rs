//! Public facade.
//!
//! [`RealtimeEvents`] owns one [`HandlerRegistry`] and one connection
//! manager task for the lifetime of an application session. It starts
//! connecting on construction and disconnects on [`shutdown`] or drop.
//!
//! [`shutdown`]: RealtimeEvents::shutdown

use std::sync::Arc;

use beacon_core::{ActionKey, ActionKeys, ConnectionStatus, StatusChange};
use beacon_settings::RealtimeSettings;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::manager::{Command, ConnectionManager, ManagerOptions};
use crate::registry::{Handler, HandlerRegistry, Subscription};
use crate::transport::{HttpTransport, Transport, TransportError};
use crate::visibility::VisibilityTrigger;

/// Realtime event client for one application session.
pub struct RealtimeEvents {
    registry: Arc<HandlerRegistry>,
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<StatusChange>,
    changes: broadcast::Sender<StatusChange>,
    task: Option<JoinHandle<()>>,
}

impl RealtimeEvents {
    /// Spawn the connection manager on the current tokio runtime and start
    /// connecting.
    pub fn start(transport: Arc<dyn Transport>, options: ManagerOptions) -> Self {
        let registry = Arc::new(HandlerRegistry::new());
        let (manager, handles) = ConnectionManager::new(transport, Arc::clone(&registry), options);
        let task = tokio::spawn(manager.run());

        let client = Self {
            registry,
            commands: handles.commands,
            status: handles.status,
            changes: handles.changes,
            task: Some(task),
        };
        info!(max_attempts = options.backoff.max_attempts, "realtime client started");
        client.connect();
        client
    }

    /// Build an HTTP client for `settings.events_url()` and start it.
    pub fn from_settings(settings: &RealtimeSettings) -> Result<Self, TransportError> {
        let transport = HttpTransport::from_settings(settings)?;
        debug!(endpoint = transport.endpoint(), "using http event stream");
        Ok(Self::start(Arc::new(transport), ManagerOptions::from(settings)))
    }

    // ── status ───────────────────────────────────────────────────────────

    /// Current connection status.
    pub fn connection_status(&self) -> ConnectionStatus {
        self.status.borrow().status
    }

    /// Whether the stream is open.
    pub fn is_connected(&self) -> bool {
        self.connection_status().is_connected()
    }

    /// Reconnection attempt count at the last transition.
    pub fn attempt(&self) -> u32 {
        self.status.borrow().attempt
    }

    /// Current status with its attempt count.
    pub fn status(&self) -> StatusChange {
        *self.status.borrow()
    }

    /// Receiver that always holds the latest status.
    pub fn status_receiver(&self) -> watch::Receiver<StatusChange> {
        self.status.clone()
    }

    /// Receiver for every status transition from now on.
    pub fn status_changes(&self) -> broadcast::Receiver<StatusChange> {
        self.changes.subscribe()
    }

    // ── subscriptions ────────────────────────────────────────────────────

    /// Register `handler` under one or many keys.
    ///
    /// Handlers under [`ActionKey::Wildcard`] receive the full envelope;
    /// all others receive the event's `data`.
    ///
    /// String keys always convert to [`ActionKey::Specific`], so
    /// `subscribe("ALL", ..)` only matches events whose action is literally
    /// `"ALL"`. Use [`ActionKey::Wildcard`] or [`ActionKey::parse`] to
    /// subscribe to every event.
    pub fn subscribe(&self, keys: impl Into<ActionKeys>, handler: Handler) -> Subscription {
        self.registry.subscribe(keys, handler)
    }

    /// Remove `handler` from `key`. Idempotent.
    pub fn unsubscribe(&self, key: impl Into<ActionKey>, handler: &Handler) {
        self.registry.unsubscribe(&key.into(), handler);
    }

    /// The underlying registry.
    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    // ── lifecycle ────────────────────────────────────────────────────────

    /// Open a fresh connection now, replacing any existing one and any
    /// pending retry.
    pub fn connect(&self) {
        if self.commands.send(Command::Connect).is_err() {
            warn!("connect requested after realtime client stopped");
        }
    }

    /// Handle for reporting application visibility.
    pub fn visibility(&self) -> VisibilityTrigger {
        VisibilityTrigger::new(self.commands.clone())
    }

    /// Close the connection and cancel any pending retry.
    ///
    /// Returns once the manager has cleared its state.
    pub async fn disconnect(&self) {
        let (ack, done) = oneshot::channel();
        if self.commands.send(Command::Disconnect { ack: Some(ack) }).is_ok() {
            let _ = done.await;
        }
    }

    /// Disconnect and wait for the manager task to finish.
    pub async fn shutdown(mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        let (ack, done) = oneshot::channel();
        if self.commands.send(Command::Shutdown { ack: Some(ack) }).is_ok() {
            let _ = done.await;
        }
        if let Err(e) = task.await {
            warn!(error = %e, "connection manager task failed");
        }
        info!("realtime client shut down");
    }
}

impl Drop for RealtimeEvents {
    fn drop(&mut self) {
        if self.task.take().is_some() {
            let _ = self.commands.send(Command::Shutdown { ack: None });
        }
    }
}

impl std::fmt::Debug for RealtimeEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeEvents")
            .field("status", &self.status())
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
