//! WebRTC module for streaming host frames and detection messages
//!
//! Architecture:
//! ```text
//! Host render loop (RGB24 / I420)
//!        |
//!        v
//! CaptureSource (throttle -> convert -> pooled I420 buffer)
//!        |
//!        v
//! OutboundVideoTrack (H.264 encode -> samples)
//!        |
//!        v
//! PeerSession ------- SDP / ICE ------> SignalingClient (WebSocket)
//!        |
//!        +------- DataChannels -------> detection messages
//! ```

pub mod mdns;
pub mod rtc_transport;
pub mod session;
pub mod signaling;
pub mod signaling_client;
pub mod streamer;
#[doc(hidden)]
pub mod testing;
pub mod transport;
pub mod video_track;

pub use rtc_transport::RtcTransport;
pub use session::{PeerSession, SessionParts};
pub use signaling::{
    ConnectionState, IceCandidate, SdpAnswer, SdpOffer, SessionPhase, SignalingMessage,
};
pub use signaling_client::{MessageCallback, SignalingClient, SignalingSink};
pub use streamer::{CapturePath, StreamStats, VisionStreamer};
pub use transport::{
    peer_event_channel, ChannelPayload, DataChannelHandle, PeerEvent, PeerTransport,
};
pub use video_track::{OutboundVideoTrack, TrackStatsSnapshot};
