//! Realtime event envelope and subscription keys.
//!
//! Every push-stream message decodes to a [`RealtimeEvent`] `{action, data}`.
//! Subscribers register under [`ActionKey`]s: a specific action receives the
//! event's `data`, while the [`ActionKey::Wildcard`] receives the full
//! envelope for every event.
//!
//! The wildcard is a variant, not a reserved string, so an action that is
//! literally named `"ALL"` stays an ordinary action. Callers that speak the
//! string contract go through [`ActionKey::parse`].

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::DecodeError;

/// Reserved string that [`ActionKey::parse`] maps to the wildcard.
pub const WILDCARD_ACTION: &str = "ALL";

// ─────────────────────────────────────────────────────────────────────────────
// RealtimeEvent
// ─────────────────────────────────────────────────────────────────────────────

/// One decoded push-stream message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RealtimeEvent {
    /// Category used for subscriber fan-out.
    pub action: String,
    /// Opaque payload. Missing in the body decodes as `null`.
    #[serde(default)]
    pub data: Value,
}

impl RealtimeEvent {
    /// Build an event from its parts.
    pub fn new(action: impl Into<String>, data: Value) -> Self {
        Self {
            action: action.into(),
            data,
        }
    }

    /// Decode a message body (UTF-8 JSON) into an envelope.
    pub fn decode(body: &str) -> Result<Self, DecodeError> {
        Ok(serde_json::from_str(body)?)
    }

    /// The full envelope as a JSON value, as delivered to wildcard handlers.
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "action": self.action,
            "data": self.data,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ActionKey
// ─────────────────────────────────────────────────────────────────────────────

/// Key a handler is registered under.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ActionKey {
    /// Events whose `action` equals this string; handlers get `data`.
    Specific(String),
    /// Every event; handlers get the full `{action, data}` envelope.
    Wildcard,
}

impl ActionKey {
    /// Key for one specific action, even if it is named `"ALL"`.
    pub fn specific(action: impl Into<String>) -> Self {
        Self::Specific(action.into())
    }

    /// Map the public string contract onto a key: `"ALL"` is the wildcard.
    pub fn parse(key: &str) -> Self {
        if key == WILDCARD_ACTION {
            Self::Wildcard
        } else {
            Self::Specific(key.to_owned())
        }
    }

    /// Whether this is the wildcard key.
    pub fn is_wildcard(&self) -> bool {
        matches!(self, Self::Wildcard)
    }
}

impl fmt::Display for ActionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Specific(action) => f.write_str(action),
            Self::Wildcard => write!(f, "*{WILDCARD_ACTION}*"),
        }
    }
}

impl From<&str> for ActionKey {
    fn from(action: &str) -> Self {
        Self::specific(action)
    }
}

impl From<String> for ActionKey {
    fn from(action: String) -> Self {
        Self::Specific(action)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ActionKeys
// ─────────────────────────────────────────────────────────────────────────────

/// One or many keys passed to a subscribe call.
///
/// Duplicates are removed, keeping first-seen order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ActionKeys(Vec<ActionKey>);

impl ActionKeys {
    /// Collect keys, dropping duplicates.
    pub fn new(keys: impl IntoIterator<Item = ActionKey>) -> Self {
        let mut unique: Vec<ActionKey> = Vec::new();
        for key in keys {
            if !unique.contains(&key) {
                unique.push(key);
            }
        }
        Self(unique)
    }

    /// Borrow the keys.
    pub fn as_slice(&self) -> &[ActionKey] {
        &self.0
    }

    /// Take ownership of the keys.
    pub fn into_vec(self) -> Vec<ActionKey> {
        self.0
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no key was given.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<ActionKey> for ActionKeys {
    fn from(key: ActionKey) -> Self {
        Self(vec![key])
    }
}

impl From<&str> for ActionKeys {
    fn from(action: &str) -> Self {
        Self(vec![ActionKey::from(action)])
    }
}

impl From<String> for ActionKeys {
    fn from(action: String) -> Self {
        Self(vec![ActionKey::from(action)])
    }
}

impl From<Vec<ActionKey>> for ActionKeys {
    fn from(keys: Vec<ActionKey>) -> Self {
        Self::new(keys)
    }
}

impl From<Vec<&str>> for ActionKeys {
    fn from(actions: Vec<&str>) -> Self {
        Self::new(actions.into_iter().map(ActionKey::from))
    }
}

impl From<&[&str]> for ActionKeys {
    fn from(actions: &[&str]) -> Self {
        Self::new(actions.iter().copied().map(ActionKey::from))
    }
}

impl<const N: usize> From<[&str; N]> for ActionKeys {
    fn from(actions: [&str; N]) -> Self {
        Self::new(actions.into_iter().map(ActionKey::from))
    }
}

impl<const N: usize> From<[ActionKey; N]> for ActionKeys {
    fn from(keys: [ActionKey; N]) -> Self {
        Self::new(keys)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
