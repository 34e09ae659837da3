//! Host callback dispatch
//!
//! The streaming engine never calls into the host directly. It goes through
//! an injected [`HostBridge`], one implementation per host environment.

pub mod types;

pub use types::{
    preview, HostMessage, DEFAULT_HOST_TARGET, ON_DETECTIONS, ON_PEER_CONNECTION_CLOSED,
    ON_PEER_CONNECTION_STARTED, ON_VIDEO_STARTED,
};

use tokio::sync::broadcast;
use tracing::{debug, info};

/// Message channel capacity (ring buffer size)
const HOST_CHANNEL_CAPACITY: usize = 256;

/// One-directional named-callback dispatch into the host application.
///
/// Implementations must not block and must swallow their own failures.
pub trait HostBridge: Send + Sync {
    fn send(&self, target: &str, method: &str, message: &str);
}

/// Bridge that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHostBridge;

impl HostBridge for LoggingHostBridge {
    fn send(&self, target: &str, method: &str, message: &str) {
        info!(
            "Host callback {}.{} ({} bytes): {}",
            target,
            method,
            message.len(),
            preview(message)
        );
    }
}

/// Bridge that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHostBridge;

impl HostBridge for NullHostBridge {
    fn send(&self, _target: &str, _method: &str, _message: &str) {}
}

/// Bridge broadcasting every callback to subscribers
///
/// # Example
///
/// ```
/// use vision_stream::events::{ChannelHostBridge, HostBridge};
///
/// let bridge = ChannelHostBridge::new();
/// let mut rx = bridge.subscribe();
/// bridge.send("Receiver", "OnDetections", "[]");
/// let msg = rx.try_recv().unwrap();
/// assert_eq!(msg.method, "OnDetections");
/// ```
pub struct ChannelHostBridge {
    tx: broadcast::Sender<HostMessage>,
}

impl ChannelHostBridge {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(HOST_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Subscribe to future callbacks.
    ///
    /// A subscriber that falls behind receives `Lagged` and misses messages.
    pub fn subscribe(&self) -> broadcast::Receiver<HostMessage> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for ChannelHostBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl HostBridge for ChannelHostBridge {
    fn send(&self, target: &str, method: &str, message: &str) {
        // No subscribers is not an error
        if self.tx.send(HostMessage::new(target, method, message)).is_err() {
            debug!("Host callback {}.{} dropped: no subscribers", target, method);
        }
    }
}
