//! In-memory doubles for driving a [`super::PeerSession`] without a network

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::signaling::{ConnectionState, IceCandidate, SignalingMessage};
use super::signaling_client::SignalingSink;
use super::transport::{DataChannelHandle, PeerEvent, PeerEventSender, PeerTransport};
use super::video_track::OutboundVideoTrack;
use crate::error::{AppError, Result};

/// Channel that records what is sent on it
pub struct FakeChannel {
    label: String,
    open: AtomicBool,
    closed: AtomicBool,
    sent: Mutex<Vec<String>>,
}

impl FakeChannel {
    pub fn new(label: &str, open: bool) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            open: AtomicBool::new(open),
            closed: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl DataChannelHandle for FakeChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.is_closed()
    }

    fn send_text(&self, text: String) -> Result<()> {
        if !self.is_open() {
            return Err(AppError::TransportUnavailable(format!(
                "Data channel '{}' is not open",
                self.label
            )));
        }
        self.sent.lock().push(text);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Transport that records calls and reports events on demand
pub struct FakeTransport {
    events: PeerEventSender,
    calls: Mutex<Vec<String>>,
    fail_offers: AtomicBool,
    channels: Mutex<Vec<Arc<FakeChannel>>>,
    remote_answer: Mutex<Option<String>>,
    candidates: Mutex<Vec<IceCandidate>>,
}

impl FakeTransport {
    pub const OFFER_SDP: &'static str = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\n";

    pub fn new(events: PeerEventSender) -> Self {
        Self {
            events,
            calls: Mutex::new(Vec::new()),
            fail_offers: AtomicBool::new(false),
            channels: Mutex::new(Vec::new()),
            remote_answer: Mutex::new(None),
            candidates: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_offers(&self, fail: bool) {
        self.fail_offers.store(fail, Ordering::SeqCst);
    }

    /// Emit a connection state change as the real transport would
    pub fn report_state(&self, state: ConnectionState) {
        let _ = self.events.send(PeerEvent::ConnectionState(state));
    }

    pub fn emit_local_candidate(&self, candidate: IceCandidate) {
        let _ = self.events.send(PeerEvent::LocalCandidate(candidate));
    }

    /// Deliver text on a channel as if the remote peer sent it
    pub fn deliver_text(&self, label: &str, text: &str) {
        let _ = self.events.send(PeerEvent::ChannelMessage {
            label: label.to_string(),
            payload: super::transport::ChannelPayload::Text(text.to_string()),
        });
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn channel(&self, label: &str) -> Option<Arc<FakeChannel>> {
        self.channels
            .lock()
            .iter()
            .find(|c| c.label == label)
            .cloned()
    }

    pub fn remote_answer(&self) -> Option<String> {
        self.remote_answer.lock().clone()
    }

    pub fn candidates(&self) -> Vec<IceCandidate> {
        self.candidates.lock().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().push(call.into());
    }
}

#[async_trait]
impl PeerTransport for FakeTransport {
    async fn add_video_track(&self, _track: &OutboundVideoTrack) -> Result<()> {
        self.record("add_video_track");
        Ok(())
    }

    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannelHandle>> {
        self.record(format!("create_data_channel:{}", label));
        let channel = FakeChannel::new(label, false);
        self.channels.lock().push(channel.clone());
        Ok(channel)
    }

    async fn create_offer(&self) -> Result<String> {
        self.record("create_offer");
        if self.fail_offers.load(Ordering::SeqCst) {
            return Err(AppError::NegotiationFailure("offer rejected".to_string()));
        }
        Ok(Self::OFFER_SDP.to_string())
    }

    async fn set_local_offer(&self, _sdp: &str) -> Result<()> {
        self.record("set_local_offer");
        Ok(())
    }

    async fn set_remote_answer(&self, sdp: &str) -> Result<()> {
        self.record("set_remote_answer");
        *self.remote_answer.lock() = Some(sdp.to_string());
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.record("add_ice_candidate");
        self.candidates.lock().push(candidate);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.record("close");
        Ok(())
    }
}

/// Signaling sink that records outbound frames
pub struct RecordingSignaling {
    open: AtomicBool,
    sent: Mutex<Vec<String>>,
}

impl RecordingSignaling {
    pub fn new(open: bool) -> Self {
        Self {
            open: AtomicBool::new(open),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    /// Sent frames decoded; undecodable frames are skipped
    pub fn messages(&self) -> Vec<SignalingMessage> {
        self.sent()
            .iter()
            .filter_map(|text| SignalingMessage::parse(text).ok())
            .collect()
    }
}

impl SignalingSink for RecordingSignaling {
    fn send(&self, text: &str) -> bool {
        if !self.open.load(Ordering::SeqCst) {
            return false;
        }
        self.sent.lock().push(text.to_string());
        true
    }
}
