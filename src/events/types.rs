//! Host-facing message types

use serde::{Deserialize, Serialize};

/// Fired when the peer connection reaches the connected state
pub const ON_PEER_CONNECTION_STARTED: &str = "OnPeerConnectionStarted";
/// Fired when the peer connection is closed, failed or disconnected
pub const ON_PEER_CONNECTION_CLOSED: &str = "OnPeerConnectionClosed";
/// Fired once when pixel-push capture starts for a session
pub const ON_VIDEO_STARTED: &str = "OnVideoStarted";
/// Default method receiving inbound channel text
pub const ON_DETECTIONS: &str = "OnDetections";

/// Default host object receiving callbacks
pub const DEFAULT_HOST_TARGET: &str = "QuestVisionStreamReceiver";

/// Maximum characters of a payload shown in logs
pub const LOG_PREVIEW_CHARS: usize = 128;

/// One dispatched host callback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostMessage {
    /// Host object name
    pub target: String,
    /// Method invoked on the target
    pub method: String,
    /// Single string argument, empty if none
    pub message: String,
}

impl HostMessage {
    pub fn new(
        target: impl Into<String>,
        method: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            target: target.into(),
            method: method.into(),
            message: message.into(),
        }
    }
}

/// First `LOG_PREVIEW_CHARS` characters of `text`, for logging
pub fn preview(text: &str) -> &str {
    match text.char_indices().nth(LOG_PREVIEW_CHARS) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
