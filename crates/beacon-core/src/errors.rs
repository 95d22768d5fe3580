//! Error types shared across beacon crates.

use thiserror::Error;

/// A push-stream message body that could not be decoded into an envelope.
///
/// Decode failures are logged and the message is dropped; they never change
/// connection state.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The body is not JSON, or not an object with a string `action`.
    #[error("malformed realtime envelope: {0}")]
    Json(#[from] serde_json::Error),
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
