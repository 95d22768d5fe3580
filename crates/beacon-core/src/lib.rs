//! # beacon-core
//!
//! Foundation types for the beacon realtime client.
//!
//! This crate provides the shared vocabulary the other beacon crates depend on:
//!
//! - **Events**: [`RealtimeEvent`] envelope (`{action, data}`) and [`ActionKey`]
//!   subscription keys with an explicit wildcard variant
//! - **Status**: [`ConnectionStatus`] and [`StatusChange`] transitions
//! - **Backoff**: [`BackoffPolicy`] mapping a failure attempt to a wait duration
//! - **Errors**: [`DecodeError`] for malformed stream messages
//! - **Logging**: `tracing` subscriber bootstrap and log capture for tests

#![deny(unsafe_code)]

pub mod backoff;
pub mod errors;
pub mod event;
pub mod logging;
pub mod status;

pub use backoff::{BackoffPolicy, backoff_delay_ms};
pub use errors::DecodeError;
pub use event::{ActionKey, ActionKeys, RealtimeEvent, WILDCARD_ACTION};
pub use status::{ConnectionStatus, StatusChange};
