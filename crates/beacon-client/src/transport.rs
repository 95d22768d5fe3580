//! Push-stream transport.
//!
//! The [`Transport`] trait is the seam between the connection manager and
//! the network: `open` resolves once the stream is established and yields a
//! [`MessageStream`] of raw message bodies. The stream ending (or yielding an
//! error) is a transport failure for the manager.
//!
//! [`HttpTransport`] is the production implementation: one long-lived
//! `GET <base>/realtime/events` consumed as `text/event-stream`.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use beacon_settings::RealtimeSettings;
use futures::{Stream, StreamExt};
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE, COOKIE, HeaderValue};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::sse::parse_sse_frames;

/// Media type of the push stream.
pub const EVENT_STREAM_CONTENT_TYPE: &str = "text/event-stream";

/// Raw message bodies from one open connection.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Stream-level failure. Drives the connection manager into `error`.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The HTTP request could not be sent or its body could not be read.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// The server answered with a non-success status.
    #[error("unexpected status {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },
    /// The server answered with something other than an event stream.
    #[error("unexpected content type: {0}")]
    ContentType(String),
    /// Reading from an open stream failed.
    #[error("stream read failed: {0}")]
    Stream(String),
    /// The server ended the stream.
    #[error("stream closed by server")]
    Closed,
    /// The configured endpoint is not a valid URL.
    #[error("invalid endpoint url: {0}")]
    InvalidUrl(String),
}

impl TransportError {
    /// Short machine-readable category for structured logs.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Request(_) => "request",
            Self::Status { .. } => "status",
            Self::ContentType(_) => "content_type",
            Self::Stream(_) => "stream",
            Self::Closed => "closed",
            Self::InvalidUrl(_) => "config",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Transport trait
// ─────────────────────────────────────────────────────────────────────────────

/// Opens push-stream connections.
///
/// Dropping the returned stream (or the pending `open` future) closes the
/// connection.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Establish a new connection.
    async fn open(&self) -> Result<MessageStream, TransportError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP transport
// ─────────────────────────────────────────────────────────────────────────────

/// Server-sent-events transport over `reqwest`.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: reqwest::Url,
    cookie: Option<HeaderValue>,
}

impl HttpTransport {
    /// Build a transport for `settings.events_url()`.
    pub fn from_settings(settings: &RealtimeSettings) -> Result<Self, TransportError> {
        let url = reqwest::Url::parse(&settings.events_url())
            .map_err(|e| TransportError::InvalidUrl(e.to_string()))?;

        let cookie = settings
            .cookie
            .as_deref()
            .map(HeaderValue::from_str)
            .transpose()
            .map_err(|e| TransportError::InvalidUrl(format!("cookie header: {e}")))?;

        let client = reqwest::Client::builder()
            .cookie_store(settings.with_credentials)
            .connect_timeout(Duration::from_millis(settings.connect_timeout_ms))
            .build()?;

        Ok(Self {
            client,
            url,
            cookie,
        })
    }

    /// Build a transport for `<base_url>/realtime/events` with default settings.
    pub fn new(base_url: &str) -> Result<Self, TransportError> {
        let settings = RealtimeSettings {
            base_url: base_url.to_owned(),
            ..RealtimeSettings::default()
        };
        Self::from_settings(&settings)
    }

    /// The stream endpoint.
    pub fn endpoint(&self) -> &str {
        self.url.as_str()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip_all, fields(url = %self.url))]
    async fn open(&self) -> Result<MessageStream, TransportError> {
        let mut request = self
            .client
            .get(self.url.clone())
            .header(ACCEPT, EVENT_STREAM_CONTENT_TYPE)
            .header(CACHE_CONTROL, "no-cache");
        if let Some(cookie) = &self.cookie {
            request = request.header(COOKIE, cookie.clone());
        }

        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_owned();
        if !content_type.starts_with(EVENT_STREAM_CONTENT_TYPE) {
            return Err(TransportError::ContentType(content_type));
        }

        debug!(status = status.as_u16(), "event stream established");

        let frames = parse_sse_frames(Box::pin(response.bytes_stream()));
        let messages = frames.filter_map(|frame| async move {
            match frame {
                Ok(frame) if frame.is_message() => Some(Ok(frame.data)),
                Ok(_) => None,
                Err(e) => Some(Err(TransportError::Stream(e.to_string()))),
            }
        });
        Ok(Box::pin(messages))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn new_targets_events_path() {
        let transport = HttpTransport::new("http://localhost:8000").unwrap();
        assert_eq!(transport.endpoint(), "http://localhost:8000/realtime/events");
    }

    #[test]
    fn from_settings_respects_custom_path() {
        let settings = RealtimeSettings {
            base_url: "https://api.example.com/".into(),
            events_path: "/v2/stream".into(),
            ..RealtimeSettings::default()
        };
        let transport = HttpTransport::from_settings(&settings).unwrap();
        assert_eq!(transport.endpoint(), "https://api.example.com/v2/stream");
    }

    #[test]
    fn invalid_base_url_rejected() {
        assert_matches!(
            HttpTransport::new("not a url"),
            Err(TransportError::InvalidUrl(_))
        );
    }

    #[test]
    fn invalid_cookie_rejected() {
        let settings = RealtimeSettings {
            cookie: Some("bad\nvalue".into()),
            ..RealtimeSettings::default()
        };
        assert_matches!(
            HttpTransport::from_settings(&settings),
            Err(TransportError::InvalidUrl(_))
        );
    }

    #[test]
    fn error_categories() {
        assert_eq!(TransportError::Status { status: 503 }.category(), "status");
        assert_eq!(TransportError::Closed.category(), "closed");
        assert_eq!(TransportError::ContentType("text/html".into()).category(), "content_type");
        assert_eq!(TransportError::Stream("reset".into()).category(), "stream");
    }

    #[test]
    fn error_display() {
        assert_eq!(
            TransportError::Status { status: 401 }.to_string(),
            "unexpected status 401"
        );
        assert_eq!(TransportError::Closed.to_string(), "stream closed by server");
    }
}
