//! WebSocket signaling client
//!
//! One persistent text connection to the signaling server. Inbound text
//! frames are handed to a callback on the reader task in receipt order.
//! Sends are fire-and-forget. There is no automatic reconnect.

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{AppError, Result};
use crate::events::preview;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Connect timeout for the WebSocket handshake
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Callback for every received text frame
pub type MessageCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Outbound half of a signaling transport
pub trait SignalingSink: Send + Sync {
    /// Queue a text frame. Returns false if the connection is not open.
    fn send(&self, text: &str) -> bool;
}

struct Connection {
    id: u64,
    tx: mpsc::UnboundedSender<Message>,
    cancel: CancellationToken,
}

struct Shared {
    conn: Mutex<Option<Connection>>,
    next_id: AtomicU64,
}

impl Shared {
    /// Drop the connection if it is still the one identified by `id`
    fn clear(&self, id: u64) {
        let mut conn = self.conn.lock();
        if conn.as_ref().map(|c| c.id) == Some(id) {
            if let Some(c) = conn.take() {
                c.cancel.cancel();
            }
        }
    }
}

/// Persistent duplex text connection to the signaling server
pub struct SignalingClient {
    on_message: MessageCallback,
    shared: Arc<Shared>,
}

impl SignalingClient {
    pub fn new(on_message: MessageCallback) -> Self {
        Self {
            on_message,
            shared: Arc::new(Shared {
                conn: Mutex::new(None),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Open the connection and start the reader and writer tasks
    pub async fn connect(&self, url: &str) -> Result<()> {
        if self.is_open() {
            warn!("Signaling already connected, ignoring connect to {}", url);
            return Ok(());
        }

        info!("Connecting to signaling server: {}", url);
        let (ws_stream, _) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url))
            .await
            .map_err(|_| {
                AppError::TransportUnavailable(format!(
                    "Signaling connect to {} timed out after {:?}",
                    url, CONNECT_TIMEOUT
                ))
            })?
            .map_err(|e| {
                AppError::TransportUnavailable(format!("Failed to connect to {}: {}", url, e))
            })?;
        info!("Connected to signaling server");

        let (write, read) = ws_stream.split();
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);

        {
            let mut conn = self.shared.conn.lock();
            if let Some(old) = conn.take() {
                old.cancel.cancel();
            }
            *conn = Some(Connection {
                id,
                tx,
                cancel: cancel.clone(),
            });
        }

        tokio::spawn(Self::writer_task(write, rx, cancel.clone()));
        tokio::spawn(Self::reader_task(
            read,
            self.on_message.clone(),
            self.shared.clone(),
            id,
            cancel,
        ));
        Ok(())
    }

    async fn writer_task(
        mut write: futures::stream::SplitSink<WsStream, Message>,
        mut rx: mpsc::UnboundedReceiver<Message>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some(msg) => {
                        if let Err(e) = write.send(msg).await {
                            error!("Failed to send signaling message: {}", e);
                            break;
                        }
                    }
                    None => break,
                },
                _ = cancel.cancelled() => break,
            }
        }

        // Drain a pending close frame queued by close()
        while let Ok(msg) = rx.try_recv() {
            if write.send(msg).await.is_err() {
                break;
            }
        }
        let _ = write.close().await;
        debug!("Signaling writer task terminated");
    }

    async fn reader_task(
        mut read: futures::stream::SplitStream<WsStream>,
        on_message: MessageCallback,
        shared: Arc<Shared>,
        id: u64,
        cancel: CancellationToken,
    ) {
        loop {
            let next = tokio::select! {
                next = read.next() => next,
                _ = cancel.cancelled() => break,
            };
            match next {
                Some(Ok(Message::Text(text))) => {
                    debug!("Signaling message received: {}", preview(&text));
                    on_message(text);
                }
                Some(Ok(Message::Close(_))) => {
                    info!("Signaling connection closed by server");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!("Signaling connection error: {}", e);
                    break;
                }
                None => break,
            }
        }

        shared.clear(id);
        debug!("Signaling reader task terminated");
    }

    /// Queue a text frame. Returns false and logs if not connected.
    pub fn send(&self, text: &str) -> bool {
        let conn = self.shared.conn.lock();
        match conn.as_ref() {
            Some(c) if c.tx.send(Message::Text(text.to_string())).is_ok() => true,
            _ => {
                error!("Cannot send signaling message: connection not open");
                false
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.shared.conn.lock().is_some()
    }

    /// Close the connection. Idempotent.
    pub fn close(&self) {
        let conn = self.shared.conn.lock().take();
        if let Some(c) = conn {
            let _ = c.tx.send(Message::Close(None));
            c.cancel.cancel();
            info!("Signaling connection closed");
        }
    }
}

impl SignalingSink for SignalingClient {
    fn send(&self, text: &str) -> bool {
        SignalingClient::send(self, text)
    }
}

impl Drop for SignalingClient {
    fn drop(&mut self) {
        self.close();
    }
}
