//! # SSE Framing
//!
//! Server-sent-events parser for the realtime push stream.
//!
//! Turns a chunked byte stream into [`SseFrame`]s following the
//! `text/event-stream` format:
//! - Line buffering across chunk boundaries (`\n`, `\r\n` or bare `\r` endings)
//! - A leading UTF-8 byte order mark is skipped
//! - Invalid UTF-8 is decoded lossily (U+FFFD), like `EventSource`
//! - `data:` lines accumulate, joined with `\n`
//! - A blank line dispatches the pending frame
//! - `:` lines are comments; `event:`, `id:` and `retry:` are recorded
//! - An incomplete frame at end of stream is discarded
//! - A line longer than the configured limit ends the stream with an error

use std::borrow::Cow;

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use thiserror::Error;
use tracing::warn;

/// Longest line accepted by [`parse_sse_frames`].
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

const BOM: &[u8] = b"\xEF\xBB\xBF";

/// One dispatched server-sent event.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SseFrame {
    /// Value of the last `event:` field, if any.
    pub event: Option<String>,
    /// Concatenated `data:` lines.
    pub data: String,
    /// Value of the last `id:` field, if any.
    pub id: Option<String>,
    /// Reconnection time requested by the server, in ms.
    pub retry: Option<u64>,
}

impl SseFrame {
    /// Whether a browser `EventSource` would deliver this frame to `onmessage`.
    pub fn is_message(&self) -> bool {
        matches!(self.event.as_deref(), None | Some("message"))
    }
}

/// Failure while framing the byte stream.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SseError<E> {
    /// The underlying byte stream failed.
    #[error("{0}")]
    Read(E),
    /// No line terminator within `limit` bytes.
    #[error("event stream line exceeds {limit} bytes")]
    LineTooLong {
        /// The configured limit.
        limit: usize,
    },
}

/// Frame under construction between two blank lines.
#[derive(Debug, Default)]
struct PendingFrame {
    event: Option<String>,
    data: String,
    has_data: bool,
    id: Option<String>,
    retry: Option<u64>,
}

impl PendingFrame {
    /// Feed one line (without its terminator). Returns a frame on blank lines.
    fn push_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "data" => {
                if self.has_data {
                    self.data.push('\n');
                }
                self.data.push_str(value);
                self.has_data = true;
            }
            "event" => self.event = Some(value.to_owned()),
            "id" if !value.contains('\0') => self.id = Some(value.to_owned()),
            "retry" => {
                if let Ok(ms) = value.parse::<u64>() {
                    self.retry = Some(ms);
                }
            }
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let pending = std::mem::take(self);
        if !pending.has_data {
            // A frame without data lines is never delivered.
            return None;
        }
        Some(SseFrame {
            event: pending.event,
            data: pending.data,
            id: pending.id,
            retry: pending.retry,
        })
    }
}

/// Splits buffered bytes into lines and lines into frames.
#[derive(Debug)]
struct LineDecoder {
    buffer: BytesMut,
    pending: PendingFrame,
    at_start: bool,
    after_cr: bool,
    max_line: usize,
}

impl LineDecoder {
    fn new(max_line: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            pending: PendingFrame::default(),
            at_start: true,
            after_cr: false,
            max_line,
        }
    }

    fn feed(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Next frame completed by the buffered bytes. `Err` carries the line
    /// limit that was exceeded.
    fn next_frame(&mut self) -> Result<Option<SseFrame>, usize> {
        if self.at_start {
            if self.buffer.len() < BOM.len() && BOM.starts_with(&self.buffer) {
                return Ok(None);
            }
            if self.buffer.starts_with(BOM) {
                let _ = self.buffer.split_to(BOM.len());
            }
            self.at_start = false;
        }

        loop {
            // `\r\n` split across chunks: drop the `\n` of a pair already
            // ended at `\r`.
            if self.after_cr && !self.buffer.is_empty() {
                if self.buffer[0] == b'\n' {
                    let _ = self.buffer.split_to(1);
                }
                self.after_cr = false;
            }

            let Some(end) = self.buffer.iter().position(|&b| b == b'\n' || b == b'\r') else {
                if self.buffer.len() > self.max_line {
                    return Err(self.max_line);
                }
                return Ok(None);
            };

            let line = self.buffer.split_to(end + 1);
            self.after_cr = line[end] == b'\r';

            let text = String::from_utf8_lossy(&line[..end]);
            if matches!(text, Cow::Owned(_)) {
                warn!(bytes = end, "invalid utf-8 in event stream line, decoded lossily");
            }
            if let Some(frame) = self.pending.push_line(&text) {
                return Ok(Some(frame));
            }
        }
    }
}

/// Parse SSE frames from a byte stream, accepting lines up to
/// [`MAX_LINE_BYTES`].
///
/// Read errors are passed through as the stream's last item; nothing is
/// yielded after an error.
pub fn parse_sse_frames<S, E>(byte_stream: S) -> impl Stream<Item = Result<SseFrame, SseError<E>>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + Unpin + 'static,
    E: Send + 'static,
{
    parse_sse_frames_with_limit(byte_stream, MAX_LINE_BYTES)
}

/// [`parse_sse_frames`] with an explicit line length limit.
pub fn parse_sse_frames_with_limit<S, E>(
    byte_stream: S,
    max_line: usize,
) -> impl Stream<Item = Result<SseFrame, SseError<E>>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + Unpin + 'static,
    E: Send + 'static,
{
    futures::stream::unfold(
        (byte_stream, LineDecoder::new(max_line), false),
        |(mut stream, mut decoder, done)| async move {
            if done {
                return None;
            }

            loop {
                match decoder.next_frame() {
                    Ok(Some(frame)) => return Some((Ok(frame), (stream, decoder, false))),
                    Ok(None) => {}
                    Err(limit) => {
                        return Some((Err(SseError::LineTooLong { limit }), (stream, decoder, true)));
                    }
                }

                match stream.next().await {
                    Some(Ok(chunk)) => decoder.feed(&chunk),
                    Some(Err(e)) => return Some((Err(SseError::Read(e)), (stream, decoder, true))),
                    None => return None,
                }
            }
        },
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::logging::capture_logs;
    use tracing::Level;

    fn frames_of(lines: &[&str]) -> Vec<SseFrame> {
        let mut pending = PendingFrame::default();
        lines.iter().filter_map(|l| pending.push_line(l)).collect()
    }

    async fn collect(chunks: Vec<Result<Bytes, String>>) -> Vec<Result<SseFrame, SseError<String>>> {
        parse_sse_frames(futures::stream::iter(chunks)).collect().await
    }

    fn data_only(data: &str) -> SseFrame {
        SseFrame {
            data: data.into(),
            ..SseFrame::default()
        }
    }

    // ── PendingFrame ─────────────────────────────────────────────────────

    #[test]
    fn single_data_line() {
        assert_eq!(frames_of(&["data: {\"a\":1}", ""]), vec![data_only("{\"a\":1}")]);
    }

    #[test]
    fn data_without_space() {
        assert_eq!(frames_of(&["data:{\"a\":1}", ""]), vec![data_only("{\"a\":1}")]);
    }

    #[test]
    fn multi_line_data_joined_with_newline() {
        assert_eq!(frames_of(&["data: a", "data: b", ""]), vec![data_only("a\nb")]);
    }

    #[test]
    fn only_one_leading_space_stripped() {
        assert_eq!(frames_of(&["data:  x ", ""]), vec![data_only(" x ")]);
    }

    #[test]
    fn comments_and_unknown_fields_ignored() {
        assert_eq!(
            frames_of(&[": keepalive", "foo: bar", "data: 1", ""]),
            vec![data_only("1")]
        );
    }

    #[test]
    fn blank_line_without_data_dispatches_nothing() {
        assert!(frames_of(&["event: ping", "", ""]).is_empty());
    }

    #[test]
    fn event_id_and_retry_recorded() {
        let frames = frames_of(&["event: update", "id: 7", "retry: 1500", "data: x", ""]);
        assert_eq!(
            frames,
            vec![SseFrame {
                event: Some("update".into()),
                data: "x".into(),
                id: Some("7".into()),
                retry: Some(1500),
            }]
        );
        assert!(!frames[0].is_message());
    }

    #[test]
    fn event_type_resets_between_frames() {
        let frames = frames_of(&["event: update", "data: 1", "", "data: 2", ""]);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].event, None);
        assert!(frames[1].is_message());
    }

    #[test]
    fn explicit_message_event_is_message() {
        let frames = frames_of(&["event: message", "data: 1", ""]);
        assert!(frames[0].is_message());
    }

    #[test]
    fn invalid_retry_ignored() {
        let frames = frames_of(&["retry: soon", "data: 1", ""]);
        assert_eq!(frames[0].retry, None);
    }

    #[test]
    fn empty_data_line_still_dispatches() {
        assert_eq!(frames_of(&["data", ""]), vec![data_only("")]);
    }

    // ── parse_sse_frames (integration) ───────────────────────────────────

    #[tokio::test]
    async fn frames_single_chunk() {
        let results = collect(vec![Ok(Bytes::from("data: {\"type\":\"hello\"}\n\n"))]).await;
        assert_eq!(results, vec![Ok(data_only("{\"type\":\"hello\"}"))]);
    }

    #[tokio::test]
    async fn frames_multiple_in_one_chunk() {
        let results = collect(vec![Ok(Bytes::from("data: {\"a\":1}\n\ndata: {\"b\":2}\n\n"))]).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[1], Ok(data_only("{\"b\":2}")));
    }

    #[tokio::test]
    async fn frames_split_across_chunks() {
        let results = collect(vec![
            Ok(Bytes::from("data: {\"par")),
            Ok(Bytes::from("tial\":true}\n")),
            Ok(Bytes::from("\n")),
        ])
        .await;
        assert_eq!(results, vec![Ok(data_only("{\"partial\":true}"))]);
    }

    #[tokio::test]
    async fn frames_handle_carriage_returns() {
        let results = collect(vec![Ok(Bytes::from("data: {\"cr\":true}\r\n\r\n"))]).await;
        assert_eq!(results, vec![Ok(data_only("{\"cr\":true}"))]);
    }

    #[tokio::test]
    async fn trailing_incomplete_frame_discarded() {
        let results = collect(vec![Ok(Bytes::from("data: 1\n\ndata: 2\n"))]).await;
        assert_eq!(results, vec![Ok(data_only("1"))]);
    }

    #[tokio::test]
    async fn read_error_ends_stream() {
        let results = collect(vec![
            Ok(Bytes::from("data: 1\n\n")),
            Err("reset".to_string()),
            Ok(Bytes::from("data: 2\n\n")),
        ])
        .await;
        assert_eq!(
            results,
            vec![Ok(data_only("1")), Err(SseError::Read("reset".to_string()))]
        );
    }

    #[tokio::test]
    async fn empty_stream() {
        assert!(collect(vec![]).await.is_empty());
    }

    #[tokio::test]
    async fn invalid_utf8_is_decoded_lossily_and_logged() {
        let (logs, _guard) = capture_logs();
        let results = collect(vec![
            Ok(Bytes::from_static(b"data: {\"action\":\"A\",\"data\":\"caf\xE9\"}\n\n")),
            Ok(Bytes::from_static(b"data: {\"action\":\"B\",\"data\":1}\n\n")),
        ])
        .await;

        assert_eq!(
            results,
            vec![
                Ok(data_only("{\"action\":\"A\",\"data\":\"caf\u{FFFD}\"}")),
                Ok(data_only("{\"action\":\"B\",\"data\":1}")),
            ]
        );
        assert!(logs.has_event(Level::WARN, "decoded lossily"));
    }

    #[tokio::test]
    async fn leading_bom_is_skipped() {
        let results = collect(vec![
            Ok(Bytes::from_static(b"\xEF\xBB")),
            Ok(Bytes::from_static(b"\xBFdata: 1\n\n")),
        ])
        .await;
        assert_eq!(results, vec![Ok(data_only("1"))]);
    }

    #[tokio::test]
    async fn bom_only_stripped_at_start() {
        let results = collect(vec![Ok(Bytes::from_static(b"data: 1\n\n\xEF\xBB\xBFdata: 2\n\n"))]).await;
        // Mid-stream the BOM is part of the field name, so the line is ignored.
        assert_eq!(results, vec![Ok(data_only("1"))]);
    }

    #[tokio::test]
    async fn bare_carriage_return_ends_lines() {
        let results = collect(vec![Ok(Bytes::from("data: 1\r\rdata: 2\r\r"))]).await;
        assert_eq!(results, vec![Ok(data_only("1")), Ok(data_only("2"))]);
    }

    #[tokio::test]
    async fn crlf_split_across_chunks_is_one_terminator() {
        let results = collect(vec![
            Ok(Bytes::from("data: a\r")),
            Ok(Bytes::from("\ndata: b\r")),
            Ok(Bytes::from("\n\r\n")),
        ])
        .await;
        assert_eq!(results, vec![Ok(data_only("a\nb"))]);
    }

    #[tokio::test]
    async fn unterminated_line_over_limit_fails() {
        let chunks: Vec<Result<Bytes, String>> = vec![
            Ok(Bytes::from("data: 0123456789")),
            Ok(Bytes::from("0123456789")),
            Ok(Bytes::from("data: never reached\n\n")),
        ];
        let results: Vec<_> = parse_sse_frames_with_limit(futures::stream::iter(chunks), 16)
            .collect()
            .await;
        assert_eq!(results, vec![Err(SseError::LineTooLong { limit: 16 })]);
    }

    #[tokio::test]
    async fn line_within_limit_passes() {
        let chunks: Vec<Result<Bytes, String>> = vec![Ok(Bytes::from("data: 12345678\n\n"))];
        let results: Vec<_> = parse_sse_frames_with_limit(futures::stream::iter(chunks), 16)
            .collect()
            .await;
        assert_eq!(results, vec![Ok(data_only("12345678"))]);
    }
}
