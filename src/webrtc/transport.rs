//! Peer transport seam
//!
//! [`PeerSession`](super::session::PeerSession) drives negotiation through
//! [`PeerTransport`] and observes everything the transport reports as a
//! [`PeerEvent`] on one channel.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::signaling::{ConnectionState, IceCandidate};
use super::video_track::OutboundVideoTrack;
use crate::error::Result;

/// Data channel payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelPayload {
    Text(String),
    Binary(Bytes),
}

/// Everything the session reacts to, transport callbacks and inbound
/// signaling alike
pub enum PeerEvent {
    /// Locally gathered ICE candidate, to be trickled immediately
    LocalCandidate(IceCandidate),
    /// Transport connection state change
    ConnectionState(ConnectionState),
    /// Channel announced by the remote peer
    RemoteChannel(Arc<dyn DataChannelHandle>),
    ChannelOpen(String),
    ChannelClosed(String),
    ChannelMessage {
        label: String,
        payload: ChannelPayload,
    },
    /// Raw text frame from the signaling server
    Signal(String),
    /// Connection bound elapsed
    ConnectTimeout,
}

impl std::fmt::Debug for PeerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerEvent::LocalCandidate(c) => f.debug_tuple("LocalCandidate").field(c).finish(),
            PeerEvent::ConnectionState(s) => f.debug_tuple("ConnectionState").field(s).finish(),
            PeerEvent::RemoteChannel(dc) => f.debug_tuple("RemoteChannel").field(&dc.label()).finish(),
            PeerEvent::ChannelOpen(l) => f.debug_tuple("ChannelOpen").field(l).finish(),
            PeerEvent::ChannelClosed(l) => f.debug_tuple("ChannelClosed").field(l).finish(),
            PeerEvent::ChannelMessage { label, payload } => f
                .debug_struct("ChannelMessage")
                .field("label", label)
                .field("payload", payload)
                .finish(),
            PeerEvent::Signal(text) => f.debug_tuple("Signal").field(&text.len()).finish(),
            PeerEvent::ConnectTimeout => write!(f, "ConnectTimeout"),
        }
    }
}

pub type PeerEventSender = mpsc::UnboundedSender<PeerEvent>;
pub type PeerEventReceiver = mpsc::UnboundedReceiver<PeerEvent>;

/// Channel carrying [`PeerEvent`]s into the session loop
pub fn peer_event_channel() -> (PeerEventSender, PeerEventReceiver) {
    mpsc::unbounded_channel()
}

/// A named, ordered structured-message channel
pub trait DataChannelHandle: Send + Sync {
    fn label(&self) -> &str;

    fn is_open(&self) -> bool;

    /// Queue a text message. Does not wait for delivery.
    fn send_text(&self, text: String) -> Result<()>;

    /// Close the channel. Idempotent.
    fn close(&self);
}

/// Peer connection operations used by the session
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Attach the outbound video track
    async fn add_video_track(&self, track: &OutboundVideoTrack) -> Result<()>;

    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannelHandle>>;

    /// Create an SDP offer without applying it
    async fn create_offer(&self) -> Result<String>;

    async fn set_local_offer(&self, sdp: &str) -> Result<()>;

    async fn set_remote_answer(&self, sdp: &str) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    async fn close(&self) -> Result<()>;
}
