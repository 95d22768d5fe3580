//! Connection status as observed by facade callers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// State of the single push-stream connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// A connection is being opened.
    Connecting,
    /// The stream is open and delivering messages.
    Connected,
    /// The last connection failed; a retry may be scheduled.
    Error,
    /// No connection and no automatic retry pending.
    #[default]
    Disconnected,
}

impl ConnectionStatus {
    /// Whether the stream is currently open.
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }

    /// Lowercase wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
            Self::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One status transition, with the reconnect attempt counter at that moment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    /// Status entered.
    pub status: ConnectionStatus,
    /// Consecutive failed-open counter when the status was entered.
    pub attempt: u32,
}

impl StatusChange {
    /// Build a transition record.
    pub fn new(status: ConnectionStatus, attempt: u32) -> Self {
        Self { status, attempt }
    }
}
