//! Connection manager: the push-stream state machine.
//!
//! A single task owns the connection, the retry timer and the attempt
//! counter. Everything that can change them (facade commands, visibility
//! changes, transport events, the retry timer firing) is turned into an
//! `Input` and fed through one transition function, `ConnectionManager::step`.
//! Nothing else mutates connection state, so there is never more than one
//! connection or more than one pending retry.
//!
//! ```text
//!   disconnected ──connect──▶ connecting ──opened──▶ connected
//!        ▲                      │    ▲                   │
//!        │ budget spent         │    │ retry elapsed     │
//!        └────────────── error ◀┴────┴───────────────────┘ failed
//! ```
//!
//! Status is published on a `watch` channel (current value) and a
//! `broadcast` channel (every transition).

use std::future::{Future, pending};
use std::pin::Pin;
use std::sync::Arc;

use beacon_core::{BackoffPolicy, ConnectionStatus, RealtimeEvent, StatusChange};
use beacon_settings::RealtimeSettings;
use futures::StreamExt;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{Duration, Instant, Sleep, sleep};
use tracing::{debug, error, info, warn};

use crate::registry::HandlerRegistry;
use crate::transport::{MessageStream, Transport, TransportError};
use crate::visibility::Visibility;

// ─────────────────────────────────────────────────────────────────────────────
// Options
// ─────────────────────────────────────────────────────────────────────────────

/// Tuning for the connection manager behind a
/// [`RealtimeEvents`](crate::RealtimeEvents).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ManagerOptions {
    /// Reconnect backoff and attempt budget.
    pub backoff: BackoffPolicy,
    /// Reset the attempt counter when a foregrounding triggers a reconnect.
    pub reset_attempts_on_foreground: bool,
    /// Buffer size of the status transition broadcast.
    pub status_channel_capacity: usize,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            reset_attempts_on_foreground: false,
            status_channel_capacity: 64,
        }
    }
}

impl From<&RealtimeSettings> for ManagerOptions {
    fn from(settings: &RealtimeSettings) -> Self {
        Self {
            backoff: settings.backoff,
            reset_attempts_on_foreground: settings.reset_attempts_on_foreground,
            status_channel_capacity: settings.status_channel_capacity.max(1),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands and inputs
// ─────────────────────────────────────────────────────────────────────────────

/// Requests sent to the manager task.
#[derive(Debug)]
pub(crate) enum Command {
    /// Open a connection now, replacing any existing one.
    Connect,
    /// Close everything; acknowledged once the state is cleared.
    Disconnect { ack: Option<oneshot::Sender<()>> },
    /// The application moved to the foreground or background.
    Visibility(Visibility),
    /// Disconnect and stop the task.
    Shutdown { ack: Option<oneshot::Sender<()>> },
}

/// Everything the transition function reacts to.
enum Input {
    Connect,
    Disconnect,
    Visibility(Visibility),
    Opened(MessageStream),
    Message(String),
    Failed(TransportError),
    RetryElapsed,
}

type OpenFuture = Pin<Box<dyn Future<Output = Result<MessageStream, TransportError>> + Send>>;

/// The single live transport handle.
struct Connection {
    id: u64,
    state: ConnectionState,
}

enum ConnectionState {
    Opening(OpenFuture),
    Open(MessageStream),
}

/// The single pending reconnect.
struct RetryTimer {
    attempt: u32,
    sleep: Pin<Box<Sleep>>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Manager
// ─────────────────────────────────────────────────────────────────────────────

/// Owns the push-stream connection and runs its state machine.
///
/// Built with [`ConnectionManager::new`], driven by [`run`](Self::run) on its
/// own task, and controlled through the command channel held by the facade.
pub(crate) struct ConnectionManager {
    transport: Arc<dyn Transport>,
    registry: Arc<HandlerRegistry>,
    options: ManagerOptions,
    commands: mpsc::UnboundedReceiver<Command>,
    connection: Option<Connection>,
    retry: Option<RetryTimer>,
    attempt: u32,
    status: ConnectionStatus,
    next_connection_id: u64,
    status_tx: watch::Sender<StatusChange>,
    changes_tx: broadcast::Sender<StatusChange>,
}

/// Channel ends the facade keeps after building a manager.
pub(crate) struct ManagerHandles {
    pub(crate) commands: mpsc::UnboundedSender<Command>,
    pub(crate) status: watch::Receiver<StatusChange>,
    pub(crate) changes: broadcast::Sender<StatusChange>,
}

impl ConnectionManager {
    /// Create a manager in the `disconnected` state.
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        registry: Arc<HandlerRegistry>,
        options: ManagerOptions,
    ) -> (Self, ManagerHandles) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(StatusChange::default());
        let (changes_tx, _) = broadcast::channel(options.status_channel_capacity.max(1));

        let manager = Self {
            transport,
            registry,
            options,
            commands: commands_rx,
            connection: None,
            retry: None,
            attempt: 0,
            status: ConnectionStatus::Disconnected,
            next_connection_id: 0,
            status_tx,
            changes_tx: changes_tx.clone(),
        };
        let handles = ManagerHandles {
            commands: commands_tx,
            status: status_rx,
            changes: changes_tx,
        };
        (manager, handles)
    }

    /// Drive the state machine until shutdown or until every command sender
    /// is gone.
    pub async fn run(mut self) {
        loop {
            let input = tokio::select! {
                // Commands first: a disconnect must win over a timer that is
                // ready in the same turn.
                biased;

                command = self.commands.recv() => match command {
                    Some(Command::Connect) => Input::Connect,
                    Some(Command::Disconnect { ack }) => {
                        self.step(Input::Disconnect);
                        acknowledge(ack);
                        continue;
                    }
                    Some(Command::Visibility(visibility)) => Input::Visibility(visibility),
                    Some(Command::Shutdown { ack }) => {
                        self.step(Input::Disconnect);
                        acknowledge(ack);
                        break;
                    }
                    None => {
                        self.step(Input::Disconnect);
                        break;
                    }
                },
                () = retry_elapsed(&mut self.retry) => Input::RetryElapsed,
                input = next_connection_input(&mut self.connection) => input,
            };
            self.step(input);
        }
        debug!("connection manager stopped");
    }

    /// The transition function.
    fn step(&mut self, input: Input) {
        match input {
            Input::Connect => {
                self.cancel_retry();
                self.open_connection();
            }
            Input::Disconnect => self.disconnect(),
            Input::Visibility(Visibility::Foreground) => {
                if self.status.is_connected() {
                    return;
                }
                info!(status = %self.status, attempt = self.attempt, "foregrounded while not connected, reconnecting");
                if self.options.reset_attempts_on_foreground {
                    self.attempt = 0;
                }
                self.cancel_retry();
                self.open_connection();
            }
            Input::Visibility(Visibility::Background) => {
                debug!(status = %self.status, "backgrounded");
            }
            Input::Opened(stream) => self.on_opened(stream),
            Input::Message(body) => self.on_message(&body),
            Input::Failed(err) => self.on_failed(&err),
            Input::RetryElapsed => {
                self.retry = None;
                self.open_connection();
            }
        }
    }

    fn open_connection(&mut self) {
        self.close_connection();

        self.next_connection_id += 1;
        let id = self.next_connection_id;
        let transport = Arc::clone(&self.transport);
        let open: OpenFuture = Box::pin(async move { transport.open().await });
        self.connection = Some(Connection {
            id,
            state: ConnectionState::Opening(open),
        });

        debug!(connection_id = id, attempt = self.attempt, "opening connection");
        self.set_status(ConnectionStatus::Connecting);
    }

    fn on_opened(&mut self, stream: MessageStream) {
        let Some(connection) = self.connection.as_mut() else {
            return;
        };
        connection.state = ConnectionState::Open(stream);
        info!(connection_id = connection.id, "realtime stream connected");
        self.attempt = 0;
        self.set_status(ConnectionStatus::Connected);
    }

    fn on_message(&self, body: &str) {
        match RealtimeEvent::decode(body) {
            Ok(event) => {
                let report = self.registry.dispatch(&event);
                debug!(
                    action = %event.action,
                    delivered = report.delivered,
                    failed = report.failed,
                    "realtime event dispatched"
                );
            }
            Err(e) => {
                error!(error = %e, body_len = body.len(), "failed to parse realtime event, dropping");
            }
        }
    }

    fn on_failed(&mut self, err: &TransportError) {
        let connection_id = self.connection.as_ref().map(|c| c.id);
        self.close_connection();
        warn!(
            connection_id,
            category = err.category(),
            error = %err,
            "realtime stream error"
        );
        self.set_status(ConnectionStatus::Error);

        let backoff = self.options.backoff;
        if backoff.allows_retry(self.attempt) {
            self.attempt += 1;
            let delay = backoff.delay(self.attempt);
            info!(
                attempt = self.attempt,
                max_attempts = backoff.max_attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "reconnecting after backoff"
            );
            self.schedule_retry(delay);
        } else {
            error!(
                max_attempts = backoff.max_attempts,
                "max reconnection attempts reached"
            );
            self.set_status(ConnectionStatus::Disconnected);
        }
    }

    fn disconnect(&mut self) {
        debug!(status = %self.status, "disconnecting");
        self.cancel_retry();
        self.close_connection();
        self.attempt = 0;
        self.set_status(ConnectionStatus::Disconnected);
    }

    fn schedule_retry(&mut self, delay: Duration) {
        self.cancel_retry();
        self.retry = Some(RetryTimer {
            attempt: self.attempt,
            sleep: Box::pin(sleep(delay)),
        });
    }

    fn cancel_retry(&mut self) {
        if let Some(timer) = self.retry.take() {
            let remaining = timer.sleep.deadline().saturating_duration_since(Instant::now());
            debug!(
                attempt = timer.attempt,
                remaining_ms = u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX),
                "cancelled pending reconnect"
            );
        }
    }

    fn close_connection(&mut self) {
        if let Some(connection) = self.connection.take() {
            debug!(connection_id = connection.id, "closing connection");
        }
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        self.status = status;
        let change = StatusChange::new(status, self.attempt);
        let _ = self.status_tx.send_replace(change);
        // No receivers is fine.
        let _ = self.changes_tx.send(change);
    }
}

fn acknowledge(ack: Option<oneshot::Sender<()>>) {
    if let Some(ack) = ack {
        let _ = ack.send(());
    }
}

/// Resolves when the pending retry timer fires; never resolves without one.
async fn retry_elapsed(retry: &mut Option<RetryTimer>) {
    match retry {
        Some(timer) => timer.sleep.as_mut().await,
        None => pending().await,
    }
}

/// Next event from the live connection; never resolves without one.
async fn next_connection_input(connection: &mut Option<Connection>) -> Input {
    let Some(connection) = connection else {
        return pending().await;
    };
    match &mut connection.state {
        ConnectionState::Opening(open) => match open.await {
            Ok(stream) => Input::Opened(stream),
            Err(e) => Input::Failed(e),
        },
        ConnectionState::Open(stream) => match stream.next().await {
            Some(Ok(body)) => Input::Message(body),
            Some(Err(e)) => Input::Failed(e),
            None => Input::Failed(TransportError::Closed),
        },
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
