//! Settings types with compiled defaults.
//!
//! All structs deserialize with `camelCase` keys and per-field defaults, so a
//! partial JSON file only needs the keys it overrides.

use beacon_core::BackoffPolicy;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BeaconSettings {
    /// Settings schema version.
    pub version: String,
    /// Push-stream connection settings.
    pub realtime: RealtimeSettings,
    /// Log output settings.
    pub logging: LoggingSettings,
}

impl Default for BeaconSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            realtime: RealtimeSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl BeaconSettings {
    /// Reject values the client cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.realtime.validate()
    }
}

/// Push-stream connection settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RealtimeSettings {
    /// Server base URL; the stream lives at `base_url + events_path`.
    pub base_url: String,
    /// Path of the event stream endpoint.
    pub events_path: String,
    /// Send and store cookies on the stream request.
    pub with_credentials: bool,
    /// Explicit `Cookie` header, for sessions established outside this process.
    pub cookie: Option<String>,
    /// Connect-phase timeout in ms. The open stream has no overall timeout.
    pub connect_timeout_ms: u64,
    /// Reconnect backoff.
    pub backoff: BackoffPolicy,
    /// Give a foregrounding reconnect a fresh attempt budget.
    pub reset_attempts_on_foreground: bool,
    /// Buffer size of the status transition broadcast.
    pub status_channel_capacity: usize,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            events_path: "/realtime/events".to_string(),
            with_credentials: true,
            cookie: None,
            connect_timeout_ms: 10_000,
            backoff: BackoffPolicy::default(),
            reset_attempts_on_foreground: false,
            status_channel_capacity: 64,
        }
    }
}

impl RealtimeSettings {
    /// Full stream URL, joining base and path with exactly one slash.
    pub fn events_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        let path = self.events_path.trim_start_matches('/');
        format!("{base}/{path}")
    }

    /// Reject values the client cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(invalid("realtime.baseUrl", "is empty".into()));
        }
        if self.backoff.base_delay_ms == 0 {
            return Err(invalid("realtime.backoff.baseDelayMs", "must be positive".into()));
        }
        if self.backoff.max_delay_ms < self.backoff.base_delay_ms {
            return Err(invalid(
                "realtime.backoff.maxDelayMs",
                format!(
                    "{} is below baseDelayMs ({})",
                    self.backoff.max_delay_ms, self.backoff.base_delay_ms
                ),
            ));
        }
        if self.status_channel_capacity == 0 {
            return Err(invalid("realtime.statusChannelCapacity", "must be positive".into()));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: String) -> SettingsError {
    SettingsError::InvalidValue { field, reason }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Filter directive passed to the subscriber (`RUST_LOG` wins).
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
