//! # beacon-client
//!
//! Reconnecting server-sent-events client with action-keyed subscriptions.
//!
//! - **Facade**: [`RealtimeEvents`] owns the registry and the connection
//!   manager task for one session
//! - **Registry**: [`HandlerRegistry`] fans decoded events out to
//!   [`Handler`]s; [`Subscription`] removes them again
//! - **Manager**: the connection state machine with capped exponential
//!   backoff, tuned through [`ManagerOptions`]
//! - **Visibility**: [`VisibilityTrigger`] reconnects immediately when the
//!   application comes back to the foreground
//! - **Transport**: [`Transport`] seam with the `reqwest`-based
//!   [`HttpTransport`] and SSE framing
//!
//! The scripted in-memory transport in `testing` is compiled for this
//! crate's tests and behind the `testing` feature.
//!
//! ```ignore
//! let events = RealtimeEvents::from_settings(&settings.realtime)?;
//! let _sub = events.subscribe("job.updated", Handler::infallible(|data| {
//!     println!("{data}");
//! }));
//! ```

#![deny(unsafe_code)]

pub mod client;
pub mod manager;
pub mod registry;
pub mod sse;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transport;
pub mod visibility;

pub use client::RealtimeEvents;
pub use manager::ManagerOptions;
pub use registry::{DispatchReport, Handler, HandlerRegistry, HandlerResult, SubscriberError, Subscription};
pub use transport::{HttpTransport, MessageStream, Transport, TransportError};
pub use visibility::{Visibility, VisibilityTrigger};

pub use beacon_core::{ActionKey, ActionKeys, ConnectionStatus, RealtimeEvent, StatusChange};
