//! Scripted in-memory transport for tests.
//!
//! Each call to [`Transport::open`] consumes the next [`Script`] entry. Once
//! the script runs out every open is refused. Live connections are counted
//! from the moment an open starts until its future or stream is dropped, so
//! tests can assert the single-connection invariant.

use std::collections::VecDeque;
use std::future::pending;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::transport::{MessageStream, Transport, TransportError};

type Item = Result<String, TransportError>;

/// How one `open` call behaves.
#[derive(Debug)]
pub enum Script {
    /// Fail immediately with a 503.
    Refuse,
    /// Never resolve.
    Hang,
    /// Open successfully; the stream is driven by the paired [`StreamHandle`].
    Accept(ScriptedStream),
}

/// Receiving half of an accepted connection.
#[derive(Debug)]
pub struct ScriptedStream {
    rx: mpsc::UnboundedReceiver<Item>,
}

/// Server side of an accepted connection.
#[derive(Debug)]
pub struct StreamHandle {
    tx: mpsc::UnboundedSender<Item>,
}

impl StreamHandle {
    /// Push one message body.
    pub fn send(&self, body: &str) {
        let _ = self.tx.send(Ok(body.to_owned()));
    }

    /// Fail the stream with a read error.
    pub fn fail(&self, reason: &str) {
        let _ = self.tx.send(Err(TransportError::Stream(reason.to_owned())));
    }

    /// End the stream as if the server closed it.
    pub fn close(self) {
        drop(self.tx);
    }

    /// Whether the client side has dropped the connection.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Debug, Default)]
struct Counters {
    opened: AtomicUsize,
    live: AtomicUsize,
    max_live: AtomicUsize,
}

/// Held for as long as a connection is opening or open.
struct LiveGuard {
    counters: Arc<Counters>,
}

impl LiveGuard {
    fn new(counters: &Arc<Counters>) -> Self {
        let live = counters.live.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = counters.max_live.fetch_max(live, Ordering::SeqCst);
        Self {
            counters: Arc::clone(counters),
        }
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        let _ = self.counters.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A [`Transport`] that follows a script.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Script>>,
    counters: Arc<Counters>,
}

impl ScriptedTransport {
    /// Empty script: every open is refused.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a script entry.
    pub fn push(&self, step: Script) {
        self.script.lock().push_back(step);
    }

    /// Append a refused open.
    pub fn push_refuse(&self) {
        self.push(Script::Refuse);
    }

    /// Append an accepted open and return the handle that drives its stream.
    pub fn push_accept(&self) -> StreamHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        self.push(Script::Accept(ScriptedStream { rx }));
        StreamHandle { tx }
    }

    /// Number of `open` calls so far.
    pub fn open_count(&self) -> usize {
        self.counters.opened.load(Ordering::SeqCst)
    }

    /// Connections currently opening or open.
    pub fn live_connections(&self) -> usize {
        self.counters.live.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously live connections seen.
    pub fn max_live_connections(&self) -> usize {
        self.counters.max_live.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open(&self) -> Result<MessageStream, TransportError> {
        let _ = self.counters.opened.fetch_add(1, Ordering::SeqCst);
        let guard = LiveGuard::new(&self.counters);
        let step = self.script.lock().pop_front().unwrap_or(Script::Refuse);

        match step {
            Script::Refuse => Err(TransportError::Status { status: 503 }),
            Script::Hang => {
                let _guard = guard;
                pending().await
            }
            Script::Accept(ScriptedStream { rx }) => {
                let messages = futures::stream::unfold((rx, guard), |(mut rx, guard)| async move {
                    let item = rx.recv().await?;
                    Some((item, (rx, guard)))
                });
                Ok(Box::pin(messages))
            }
        }
    }
}
