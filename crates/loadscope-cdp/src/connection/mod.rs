//! CDP WebSocket connection management.
//!
//! The connection owns two background tasks: a write loop fed by a bounded
//! channel of outbound frames, and a read loop that pushes every inbound
//! frame into an unbounded FIFO drained by the foreground through
//! [`DevToolsConnection::poll`]. The transport never interprets payloads,
//! with one deliberate exception: `Tracing.dataCollected` batches are huge
//! and arrive in bursts, so when a [`TraceHandler`] is installed they are
//! handed to it directly on the background task and only a small wake
//! sentinel enters the FIFO.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, instrument, trace, warn};

use crate::error::CdpError;

pub mod discovery;

/// Sentinel enqueued in place of a trace batch so the foreground pump wakes.
pub const WAKE_SENTINEL: &str = r#"{"method":"got_message"}"#;

/// Buffer size for the outbound command channel.
const COMMAND_CHANNEL_SIZE: usize = 64;

/// How much of a frame is inspected when classifying it.
const CLASSIFY_PREFIX_LEN: usize = 50;

/// Consumer of trace batches split off on the background read task.
///
/// Installed via [`DevToolsConnection::set_trace_handler`] for the window
/// between `Tracing.start` and the `tracingComplete` acknowledgement; the
/// protocol guarantees no batches outside that window.
pub trait TraceHandler: Send + Sync {
    /// A raw `Tracing.dataCollected` message, exactly as received.
    fn data_collected(&self, raw: &str);

    /// `Tracing.tracingComplete` was observed; no more batches will arrive.
    fn tracing_complete(&self);
}

/// How an inbound frame is routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InboundKind {
    /// Command reply or domain event; goes straight into the FIFO.
    Regular,
    /// A `Tracing.dataCollected` batch.
    TraceBatch,
    /// The `Tracing.tracingComplete` notification.
    TracingComplete,
}

/// Classify a raw frame by inspecting its leading bytes.
fn classify(text: &str) -> InboundKind {
    let head = message_head(text);
    if head.contains("\"Tracing.dataCollected") {
        InboundKind::TraceBatch
    } else if head.contains("\"Tracing.tracingComplete") {
        InboundKind::TracingComplete
    } else {
        InboundKind::Regular
    }
}

/// The first [`CLASSIFY_PREFIX_LEN`] bytes of a frame, backed off to a
/// character boundary.
fn message_head(text: &str) -> &str {
    let mut end = text.len().min(CLASSIFY_PREFIX_LEN);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

type SharedTraceHandler = Arc<Mutex<Option<Arc<dyn TraceHandler>>>>;

/// A CDP connection to a single browser tab.
pub struct DevToolsConnection {
    /// Sender for outgoing frames; dropped on close so the write loop ends.
    out_tx: Option<mpsc::Sender<String>>,
    /// Inbound FIFO, foreground-owned.
    in_rx: mpsc::UnboundedReceiver<String>,
    /// Liveness flag, cleared when the read loop ends.
    connected: Arc<AtomicBool>,
    /// Trace fast-path handler slot shared with the read task.
    trace_handler: SharedTraceHandler,
    /// Handle to the background read task.
    _read_handle: tokio::task::JoinHandle<()>,
    /// Handle to the background write task.
    _write_handle: tokio::task::JoinHandle<()>,
}

impl std::fmt::Debug for DevToolsConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DevToolsConnection")
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl DevToolsConnection {
    /// Connect to a tab's CDP WebSocket endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the WebSocket connection fails.
    #[instrument(level = "info", skip(ws_url), fields(ws_url = %ws_url))]
    pub async fn connect(ws_url: &str) -> Result<Self, CdpError> {
        info!("Connecting to devtools WebSocket endpoint");
        let (ws_stream, response) = tokio_tungstenite::connect_async(ws_url).await?;
        info!(status = %response.status(), "WebSocket connection established");

        let (write, read) = ws_stream.split();

        let (out_tx, out_rx) = mpsc::channel::<String>(COMMAND_CHANNEL_SIZE);
        let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();
        let connected = Arc::new(AtomicBool::new(true));
        let trace_handler: SharedTraceHandler = Arc::new(Mutex::new(None));

        let write_handle = tokio::spawn(Self::write_loop(out_rx, write));
        debug!("Spawned devtools write loop");

        let read_connected = connected.clone();
        let read_trace_handler = trace_handler.clone();
        let read_handle = tokio::spawn(Self::read_loop(
            read,
            in_tx,
            read_connected,
            read_trace_handler,
        ));
        debug!("Spawned devtools read loop");

        Ok(Self {
            out_tx: Some(out_tx),
            in_rx,
            connected,
            trace_handler,
            _read_handle: read_handle,
            _write_handle: write_handle,
        })
    }

    /// Background task that writes outbound frames to the WebSocket.
    async fn write_loop<S>(mut rx: mpsc::Receiver<String>, mut sink: S)
    where
        S: futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
    {
        debug!("Devtools write loop started");
        while let Some(text) = rx.recv().await {
            trace!(frame_len = text.len(), "Sending frame");
            if sink.send(Message::Text(text.into())).await.is_err() {
                warn!("WebSocket sink closed, ending write loop");
                return;
            }
        }
        // Channel closed from the foreground: say goodbye cleanly.
        let _ = sink.send(Message::Close(None)).await;
        debug!("Devtools write loop ended");
    }

    /// Background task that reads frames, classifies them, and feeds the FIFO.
    async fn read_loop<S>(
        mut stream: S,
        in_tx: mpsc::UnboundedSender<String>,
        connected: Arc<AtomicBool>,
        trace_handler: SharedTraceHandler,
    ) where
        S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
            + Unpin,
    {
        debug!("Devtools read loop started");
        while let Some(msg) = stream.next().await {
            let text = match msg {
                Ok(Message::Text(text)) => text.to_string(),
                Ok(Message::Close(frame)) => {
                    info!(?frame, "WebSocket closed by remote");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "WebSocket error, ending read loop");
                    break;
                }
                Ok(_) => continue,
            };

            trace!(frame_len = text.len(), "Received frame");

            match classify(&text) {
                InboundKind::TraceBatch => {
                    let handler = trace_handler.lock().clone();
                    if let Some(handler) = handler {
                        // Wake the foreground pump first so it keeps making
                        // progress while the batch is processed here.
                        let _ = in_tx.send(WAKE_SENTINEL.to_string());
                        handler.data_collected(&text);
                    } else if in_tx.send(text).is_err() {
                        break;
                    }
                }
                InboundKind::TracingComplete => {
                    let handler = trace_handler.lock().clone();
                    if let Some(handler) = handler {
                        handler.tracing_complete();
                    }
                    if in_tx.send(text).is_err() {
                        break;
                    }
                }
                InboundKind::Regular => {
                    if in_tx.send(text).is_err() {
                        break;
                    }
                }
            }
        }
        connected.store(false, Ordering::SeqCst);
        debug!("Devtools read loop ended");
    }

    /// Queue a raw frame for sending.
    ///
    /// # Errors
    ///
    /// Returns [`CdpError::ConnectionLost`] if the connection is closed.
    pub async fn send(&self, text: String) -> Result<(), CdpError> {
        let tx = self.out_tx.as_ref().ok_or(CdpError::ConnectionLost)?;
        tx.send(text).await.map_err(|_| CdpError::ConnectionLost)
    }

    /// Pull the next inbound frame, waiting up to `timeout`.
    ///
    /// A zero timeout drains without waiting. Returns `None` when nothing
    /// arrived in time or the connection closed with an empty FIFO.
    pub async fn poll(&mut self, timeout: Duration) -> Option<String> {
        if timeout.is_zero() {
            self.in_rx.try_recv().ok()
        } else {
            tokio::time::timeout(timeout, self.in_rx.recv())
                .await
                .ok()
                .flatten()
        }
    }

    /// Install or clear the trace-batch fast path.
    pub fn set_trace_handler(&self, handler: Option<Arc<dyn TraceHandler>>) {
        *self.trace_handler.lock() = handler;
    }

    /// Whether the read loop is still attached to the browser.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Shut down the connection. Queued inbound frames stay pollable.
    pub fn close(&mut self) {
        debug!("Closing devtools connection");
        self.out_tx = None;
        self.connected.store(false, Ordering::SeqCst);
    }
}
