//! Peer session: negotiation state machine and structured-message channels
//!
//! One session owns one peer connection. Transport callbacks and inbound
//! signaling frames are funnelled into a single [`PeerEvent`] channel and
//! handled by one `match` in [`PeerSession::dispatch`], driven by the
//! session's event loop task.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::signaling::{ConnectionState, SdpOffer, SessionPhase, SignalingMessage};
use super::signaling_client::{MessageCallback, SignalingSink};
use super::transport::{
    ChannelPayload, DataChannelHandle, PeerEvent, PeerEventReceiver, PeerEventSender,
    PeerTransport,
};
use super::video_track::OutboundVideoTrack;
use crate::config::SessionConfig;
use crate::error::{AppError, Result};
use crate::events::{preview, HostBridge, ON_PEER_CONNECTION_CLOSED, ON_PEER_CONNECTION_STARTED};
use crate::utils::LogThrottler;
use crate::warn_throttled;

/// Collaborators a session is built from
pub struct SessionParts {
    /// Snapshot taken at construction
    pub config: Arc<SessionConfig>,
    pub transport: Arc<dyn PeerTransport>,
    pub signaling: Arc<dyn SignalingSink>,
    pub host: Arc<dyn HostBridge>,
    /// Sender half given to the transport; also used for inbound signaling
    pub events_tx: PeerEventSender,
    pub events_rx: PeerEventReceiver,
}

struct SessionState {
    phase: SessionPhase,
    channels: HashMap<String, Arc<dyn DataChannelHandle>>,
    local_description: Option<String>,
    remote_description: Option<String>,
    offer_in_flight: bool,
}

struct SessionInner {
    id: String,
    config: Arc<SessionConfig>,
    transport: Arc<dyn PeerTransport>,
    signaling: Arc<dyn SignalingSink>,
    host: Arc<dyn HostBridge>,
    events_tx: PeerEventSender,
    state: Mutex<SessionState>,
    phase_tx: watch::Sender<SessionPhase>,
    cancel: CancellationToken,
    closing: AtomicBool,
    /// Render-loop sends on a closed channel would otherwise flood the log
    throttler: LogThrottler,
}

/// A negotiated peer connection with its named channels
pub struct PeerSession {
    inner: Arc<SessionInner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PeerSession {
    /// Attach the video track, create the default channel and start the
    /// event loop. No offer is created.
    pub async fn start(
        id: impl Into<String>,
        parts: SessionParts,
        video: Option<&OutboundVideoTrack>,
    ) -> Result<Self> {
        let id = id.into();
        let SessionParts {
            config,
            transport,
            signaling,
            host,
            events_tx,
            events_rx,
        } = parts;

        if let Some(track) = video {
            transport.add_video_track(track).await?;
        }

        let default_label = config.default_channel.clone();
        let default_channel = transport.create_data_channel(&default_label).await?;
        let mut channels: HashMap<String, Arc<dyn DataChannelHandle>> = HashMap::new();
        channels.insert(default_label, default_channel);

        let (phase_tx, _) = watch::channel(SessionPhase::New);
        let inner = Arc::new(SessionInner {
            id,
            config,
            transport,
            signaling,
            host,
            events_tx,
            state: Mutex::new(SessionState {
                phase: SessionPhase::New,
                channels,
                local_description: None,
                remote_description: None,
                offer_in_flight: false,
            }),
            phase_tx,
            cancel: CancellationToken::new(),
            closing: AtomicBool::new(false),
            throttler: LogThrottler::with_secs(5),
        });

        let task = tokio::spawn(Self::run(inner.clone(), events_rx));
        info!("Peer session {} started", inner.id);

        Ok(Self {
            inner,
            task: Mutex::new(Some(task)),
        })
    }

    async fn run(inner: Arc<SessionInner>, mut events_rx: PeerEventReceiver) {
        loop {
            tokio::select! {
                _ = inner.cancel.cancelled() => break,
                event = events_rx.recv() => match event {
                    Some(event) => inner.dispatch(event).await,
                    None => break,
                },
            }
        }
        debug!("Peer session {} event loop finished", inner.id);
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn phase(&self) -> SessionPhase {
        self.inner.state.lock().phase
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<SessionPhase> {
        self.inner.phase_tx.subscribe()
    }

    pub fn local_description(&self) -> Option<String> {
        self.inner.state.lock().local_description.clone()
    }

    pub fn remote_description(&self) -> Option<String> {
        self.inner.state.lock().remote_description.clone()
    }

    /// Labels of all registered channels, sorted
    pub fn channel_labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self.inner.state.lock().channels.keys().cloned().collect();
        labels.sort();
        labels
    }

    /// Queue an inbound signaling frame for the event loop
    pub fn handle_signal(&self, text: String) {
        let _ = self.inner.events_tx.send(PeerEvent::Signal(text));
    }

    /// Callback suitable for [`super::SignalingClient::new`]
    pub fn signal_callback(events_tx: PeerEventSender) -> MessageCallback {
        Arc::new(move |text| {
            let _ = events_tx.send(PeerEvent::Signal(text));
        })
    }

    /// Handle one event immediately, bypassing the queue
    pub async fn dispatch(&self, event: PeerEvent) {
        self.inner.dispatch(event).await;
    }

    /// Create an offer, apply it locally and send it to the signaling server
    pub async fn create_offer(&self) -> Result<()> {
        let inner = &self.inner;
        {
            let mut state = inner.state.lock();
            if state.phase != SessionPhase::New || state.offer_in_flight {
                let err = AppError::NegotiationFailure(format!(
                    "Cannot create offer in phase {}",
                    state.phase
                ));
                warn!("{}", err);
                return Err(err);
            }
            state.offer_in_flight = true;
        }

        let result = async {
            let sdp = inner.transport.create_offer().await?;
            inner.transport.set_local_offer(&sdp).await?;
            Ok::<_, AppError>(sdp)
        }
        .await;

        let sdp = {
            let mut state = inner.state.lock();
            state.offer_in_flight = false;
            match result {
                Ok(sdp) => {
                    state.local_description = Some(sdp.clone());
                    sdp
                }
                Err(e) => {
                    error!("Failed to create offer for session {}: {}", inner.id, e);
                    return Err(match e {
                        AppError::NegotiationFailure(_) => e,
                        other => AppError::NegotiationFailure(other.to_string()),
                    });
                }
            }
        };

        if !inner.set_phase(SessionPhase::HaveLocalOffer) {
            return Err(AppError::NegotiationFailure(
                "Session closed during offer creation".to_string(),
            ));
        }

        let json = SignalingMessage::Offer(SdpOffer::new(sdp)).to_json()?;
        if inner.signaling.send(&json) {
            info!("Offer sent for session {}", inner.id);
        } else {
            warn!("Offer for session {} not delivered: signaling not open", inner.id);
        }

        inner.arm_connect_timeout();
        Ok(())
    }

    /// Create an additional channel. No renegotiation is triggered.
    pub async fn create_channel(&self, label: &str) -> Result<()> {
        if label.is_empty() {
            return Err(AppError::InvalidInput("Channel label must not be empty".to_string()));
        }
        {
            let state = self.inner.state.lock();
            if state.phase == SessionPhase::Closed {
                return Err(AppError::TransportUnavailable(format!(
                    "Session {} is closed",
                    self.inner.id
                )));
            }
            if state.channels.contains_key(label) {
                warn!("Data channel '{}' already exists", label);
                return Ok(());
            }
        }

        let channel = self.inner.transport.create_data_channel(label).await?;
        self.inner
            .state
            .lock()
            .channels
            .entry(label.to_string())
            .or_insert(channel);
        Ok(())
    }

    /// Send text on a named channel. Returns false if it does not exist or
    /// is not open.
    pub fn send(&self, label: &str, text: &str) -> bool {
        let channel = self.inner.state.lock().channels.get(label).cloned();
        let key = send_throttle_key(label);
        match channel {
            None => {
                warn_throttled!(self.inner.throttler, &key, "Data channel '{}' not found", label);
                false
            }
            Some(ch) if !ch.is_open() => {
                warn_throttled!(self.inner.throttler, &key, "Data channel '{}' is not open", label);
                false
            }
            Some(ch) => match ch.send_text(text.to_string()) {
                Ok(()) => true,
                Err(e) => {
                    warn!("Failed to send on data channel '{}': {}", label, e);
                    false
                }
            },
        }
    }

    /// Send text on the default channel
    pub fn send_default(&self, text: &str) -> bool {
        self.send(&self.inner.config.default_channel, text)
    }

    /// Tear down channels and the peer connection. Idempotent.
    pub async fn close(&self) {
        let inner = &self.inner;
        if inner.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        inner.cancel.cancel();

        let channels: Vec<Arc<dyn DataChannelHandle>> =
            inner.state.lock().channels.drain().map(|(_, ch)| ch).collect();
        for channel in channels {
            channel.close();
        }

        if let Err(e) = inner.transport.close().await {
            warn!("Error closing peer connection for session {}: {}", inner.id, e);
        }
        inner.set_phase(SessionPhase::Closed);

        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        info!("Peer session {} closed", inner.id);
    }
}

fn send_throttle_key(label: &str) -> String {
    format!("send:{}", label)
}

impl Drop for PeerSession {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

impl SessionInner {
    /// Move to `next`, firing host callbacks. Returns false if the session
    /// is already closed.
    fn set_phase(&self, next: SessionPhase) -> bool {
        let prev = {
            let mut state = self.state.lock();
            let prev = state.phase;
            if prev == SessionPhase::Closed {
                return false;
            }
            if prev == next {
                return true;
            }
            state.phase = next;
            prev
        };

        self.phase_tx.send_replace(next);
        info!("Session {} phase: {} -> {}", self.id, prev, next);

        let target = &self.config.message_target.target;
        if next == SessionPhase::Connected {
            self.host.send(target, ON_PEER_CONNECTION_STARTED, "");
        } else if next.is_down() && !prev.is_down() {
            self.host.send(target, ON_PEER_CONNECTION_CLOSED, "");
        }
        true
    }

    fn arm_connect_timeout(&self) {
        let timeout = Duration::from_millis(self.config.connection_timeout_ms);
        let cancel = self.cancel.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    let _ = events.send(PeerEvent::ConnectTimeout);
                }
                _ = cancel.cancelled() => {}
            }
        });
    }

    async fn dispatch(&self, event: PeerEvent) {
        match event {
            PeerEvent::Signal(text) => self.on_signal(text).await,
            PeerEvent::LocalCandidate(candidate) => {
                let json = match SignalingMessage::Candidate(candidate).to_json() {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("Failed to encode local candidate: {}", e);
                        return;
                    }
                };
                if !self.signaling.send(&json) {
                    debug!("Local candidate not sent: signaling not open");
                }
            }
            PeerEvent::ConnectionState(state) => {
                let next = match state {
                    ConnectionState::Connected => SessionPhase::Connected,
                    ConnectionState::Disconnected => SessionPhase::Disconnected,
                    ConnectionState::Failed => SessionPhase::Failed,
                    ConnectionState::Closed => SessionPhase::Closed,
                    ConnectionState::New | ConnectionState::Connecting => return,
                };
                self.set_phase(next);
            }
            PeerEvent::RemoteChannel(channel) => {
                let label = channel.label().to_string();
                let mut state = self.state.lock();
                if state.channels.contains_key(&label) {
                    warn!("Ignoring duplicate remote data channel '{}'", label);
                } else {
                    info!("Registered remote data channel '{}'", label);
                    state.channels.insert(label, channel);
                }
            }
            PeerEvent::ChannelOpen(label) => {
                self.throttler.clear(&send_throttle_key(&label));
                info!("Data channel '{}' open", label);
            }
            PeerEvent::ChannelClosed(label) => info!("Data channel '{}' closed", label),
            PeerEvent::ChannelMessage { label, payload } => match payload {
                ChannelPayload::Text(text) => {
                    debug!("Message on '{}': {}", label, preview(&text));
                    let target = &self.config.message_target;
                    self.host.send(&target.target, &target.method, &text);
                }
                ChannelPayload::Binary(data) => {
                    debug!("Ignoring binary message on '{}' ({} bytes)", label, data.len());
                }
            },
            PeerEvent::ConnectTimeout => {
                let phase = self.state.lock().phase;
                if matches!(phase, SessionPhase::New | SessionPhase::HaveLocalOffer) {
                    warn!(
                        "Session {} not connected within {} ms",
                        self.id, self.config.connection_timeout_ms
                    );
                    self.set_phase(SessionPhase::Failed);
                }
            }
        }
    }

    async fn on_signal(&self, text: String) {
        let message = match SignalingMessage::parse(&text) {
            Ok(message) => message,
            Err(e) => {
                warn!("Ignoring malformed signaling message ({}): {}", e, preview(&text));
                return;
            }
        };

        match message {
            SignalingMessage::Answer(answer) => {
                let phase = self.state.lock().phase;
                if phase != SessionPhase::HaveLocalOffer {
                    warn!("Ignoring answer in phase {}", phase);
                    return;
                }
                match self.transport.set_remote_answer(&answer.sdp).await {
                    Ok(()) => {
                        self.state.lock().remote_description = Some(answer.sdp);
                        info!("Remote answer applied for session {}", self.id);
                    }
                    Err(e) => error!("Failed to apply remote answer: {}", e),
                }
            }
            SignalingMessage::Candidate(candidate) => {
                if let Err(e) = self.transport.add_ice_candidate(candidate).await {
                    warn!("Failed to add remote ICE candidate: {}", e);
                }
            }
            SignalingMessage::Offer(_) => warn!("Ignoring remote offer: this peer is the offerer"),
            SignalingMessage::Unknown => debug!("Ignoring signaling message of unknown type"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ChannelHostBridge, ON_DETECTIONS};
    use crate::webrtc::signaling::IceCandidate;
    use crate::webrtc::testing::{FakeChannel, FakeTransport, RecordingSignaling};
    use crate::webrtc::transport::peer_event_channel;

    struct Harness {
        session: PeerSession,
        transport: Arc<FakeTransport>,
        signaling: Arc<RecordingSignaling>,
        host: Arc<ChannelHostBridge>,
    }

    async fn harness(config: SessionConfig) -> Harness {
        let (events_tx, events_rx) = peer_event_channel();
        let transport = Arc::new(FakeTransport::new(events_tx.clone()));
        let signaling = Arc::new(RecordingSignaling::new(true));
        let host = Arc::new(ChannelHostBridge::new());
        let session = PeerSession::start(
            "test",
            SessionParts {
                config: Arc::new(config),
                transport: transport.clone(),
                signaling: signaling.clone(),
                host: host.clone(),
                events_tx,
                events_rx,
            },
            None,
        )
        .await
        .unwrap();
        Harness {
            session,
            transport,
            signaling,
            host,
        }
    }

    #[tokio::test]
    async fn test_default_channel_created_before_offer() {
        let h = harness(SessionConfig::default()).await;
        assert_eq!(h.session.channel_labels(), vec!["detections".to_string()]);
        assert_eq!(h.transport.calls()[0], "create_data_channel:detections");
        assert_eq!(h.session.phase(), SessionPhase::New);
    }

    #[tokio::test]
    async fn test_create_offer_sends_offer() {
        let h = harness(SessionConfig::default()).await;
        h.session.create_offer().await.unwrap();

        assert_eq!(h.session.phase(), SessionPhase::HaveLocalOffer);
        let sent = h.signaling.messages();
        assert!(matches!(&sent[0], SignalingMessage::Offer(o) if o.sdp == FakeTransport::OFFER_SDP));
        assert_eq!(h.session.local_description().as_deref(), Some(FakeTransport::OFFER_SDP));

        let err = h.session.create_offer().await.unwrap_err();
        assert!(matches!(err, AppError::NegotiationFailure(_)));
    }

    #[tokio::test]
    async fn test_offer_failure_stays_new() {
        let h = harness(SessionConfig::default()).await;
        h.transport.fail_offers(true);

        let err = h.session.create_offer().await.unwrap_err();
        assert!(matches!(err, AppError::NegotiationFailure(_)));
        assert_eq!(h.session.phase(), SessionPhase::New);
        assert!(h.signaling.sent().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_signals_leave_state() {
        let h = harness(SessionConfig::default()).await;
        h.session.create_offer().await.unwrap();

        h.session.dispatch(PeerEvent::Signal(r#"{"type":"bye"}"#.into())).await;
        h.session.dispatch(PeerEvent::Signal("{oops".into())).await;

        assert_eq!(h.session.phase(), SessionPhase::HaveLocalOffer);
        assert_eq!(h.transport.remote_answer(), None);
    }

    #[tokio::test]
    async fn test_answer_connects_only_when_transport_reports() {
        let h = harness(SessionConfig::default()).await;
        let mut host_rx = h.host.subscribe();
        h.session.create_offer().await.unwrap();

        h.session
            .dispatch(PeerEvent::Signal(r#"{"type":"answer","sdp":"answer-sdp"}"#.into()))
            .await;
        assert_eq!(h.transport.remote_answer().as_deref(), Some("answer-sdp"));
        assert_eq!(h.session.phase(), SessionPhase::HaveLocalOffer);

        h.session
            .dispatch(PeerEvent::ConnectionState(ConnectionState::Connecting))
            .await;
        assert_eq!(h.session.phase(), SessionPhase::HaveLocalOffer);

        h.session
            .dispatch(PeerEvent::ConnectionState(ConnectionState::Connected))
            .await;
        assert_eq!(h.session.phase(), SessionPhase::Connected);
        assert_eq!(host_rx.recv().await.unwrap().method, ON_PEER_CONNECTION_STARTED);
    }

    #[tokio::test]
    async fn test_answer_before_offer_is_ignored() {
        let h = harness(SessionConfig::default()).await;
        h.session
            .dispatch(PeerEvent::Signal(r#"{"type":"answer","sdp":"x"}"#.into()))
            .await;
        assert_eq!(h.transport.remote_answer(), None);
        assert_eq!(h.session.phase(), SessionPhase::New);
    }

    #[tokio::test]
    async fn test_candidates_added_without_dedup() {
        let h = harness(SessionConfig::default()).await;
        let text = r#"{"type":"candidate","candidate":"c1","sdpMid":"0","sdpMLineIndex":0}"#;
        h.session.dispatch(PeerEvent::Signal(text.into())).await;
        h.session.dispatch(PeerEvent::Signal(text.into())).await;
        assert_eq!(h.transport.candidates().len(), 2);
    }

    #[tokio::test]
    async fn test_local_candidates_trickled() {
        let h = harness(SessionConfig::default()).await;
        h.session
            .dispatch(PeerEvent::LocalCandidate(IceCandidate::new("local").with_mid("0", 0)))
            .await;
        assert!(matches!(
            &h.signaling.messages()[0],
            SignalingMessage::Candidate(c) if c.candidate == "local"
        ));
    }

    #[tokio::test]
    async fn test_closed_callback_fires_once() {
        let h = harness(SessionConfig::default()).await;
        let mut host_rx = h.host.subscribe();

        h.session
            .dispatch(PeerEvent::ConnectionState(ConnectionState::Connected))
            .await;
        h.session
            .dispatch(PeerEvent::ConnectionState(ConnectionState::Disconnected))
            .await;
        h.session
            .dispatch(PeerEvent::ConnectionState(ConnectionState::Failed))
            .await;
        h.session.close().await;
        h.session.close().await;

        assert_eq!(host_rx.recv().await.unwrap().method, ON_PEER_CONNECTION_STARTED);
        assert_eq!(host_rx.recv().await.unwrap().method, ON_PEER_CONNECTION_CLOSED);
        assert!(host_rx.try_recv().is_err());
        assert_eq!(h.session.phase(), SessionPhase::Closed);
    }

    #[tokio::test]
    async fn test_inbound_text_forwarded_binary_ignored() {
        let h = harness(SessionConfig::default()).await;
        let mut host_rx = h.host.subscribe();

        h.session
            .dispatch(PeerEvent::ChannelMessage {
                label: "detections".into(),
                payload: ChannelPayload::Binary(bytes::Bytes::from_static(b"\x00\x01")),
            })
            .await;
        h.session
            .dispatch(PeerEvent::ChannelMessage {
                label: "detections".into(),
                payload: ChannelPayload::Text(r#"[{"label":"cup"}]"#.into()),
            })
            .await;

        let msg = host_rx.recv().await.unwrap();
        assert_eq!(msg.method, ON_DETECTIONS);
        assert_eq!(msg.message, r#"[{"label":"cup"}]"#);
        assert!(host_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_requires_open_channel() {
        let h = harness(SessionConfig::default()).await;
        assert!(!h.session.send("detections", "early"));
        assert!(!h.session.send("missing", "x"));

        h.transport.channel("detections").unwrap().set_open(true);
        assert!(h.session.send_default("hello"));
        assert_eq!(h.transport.channel("detections").unwrap().sent(), vec!["hello"]);
    }

    #[tokio::test]
    async fn test_custom_and_remote_channels() {
        let h = harness(SessionConfig::default()).await;
        h.session.create_channel("telemetry").await.unwrap();
        h.session.create_channel("telemetry").await.unwrap();

        let remote = FakeChannel::new("remote", true);
        h.session.dispatch(PeerEvent::RemoteChannel(remote.clone())).await;

        assert_eq!(
            h.session.channel_labels(),
            vec!["detections", "remote", "telemetry"]
        );
        assert!(h.session.send("remote", "hi"));
        assert_eq!(remote.sent(), vec!["hi"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_fails_session() {
        let config = SessionConfig {
            connection_timeout_ms: 1_000,
            ..Default::default()
        };
        let h = harness(config).await;
        let mut phase_rx = h.session.subscribe_phase();
        h.session.create_offer().await.unwrap();

        tokio::time::advance(Duration::from_millis(1_100)).await;
        phase_rx
            .wait_for(|p| *p == SessionPhase::Failed)
            .await
            .unwrap();
        assert_eq!(h.session.phase(), SessionPhase::Failed);
    }

    #[tokio::test]
    async fn test_events_flow_through_loop() {
        let h = harness(SessionConfig::default()).await;
        let mut phase_rx = h.session.subscribe_phase();
        h.transport.report_state(ConnectionState::Connected);

        tokio::time::timeout(
            Duration::from_secs(1),
            phase_rx.wait_for(|p| *p == SessionPhase::Connected),
        )
        .await
        .unwrap()
        .unwrap();
    }

    #[tokio::test]
    async fn test_offer_while_signaling_closed() {
        let h = harness(SessionConfig::default()).await;
        h.signaling.set_open(false);

        h.session.create_offer().await.unwrap();
        assert_eq!(h.session.phase(), SessionPhase::HaveLocalOffer);
        assert_eq!(h.session.local_description().as_deref(), Some(FakeTransport::OFFER_SDP));
        assert!(h.signaling.sent().is_empty());

        // Later candidates go out once signaling is back
        h.signaling.set_open(true);
        h.transport
            .emit_local_candidate(IceCandidate::new("late").with_mid("0", 0));
        tokio::time::timeout(Duration::from_secs(1), async {
            while h.signaling.sent().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert!(matches!(
            &h.signaling.messages()[0],
            SignalingMessage::Candidate(c) if c.candidate == "late"
        ));
    }

    #[tokio::test]
    async fn test_channel_text_through_loop() {
        let h = harness(SessionConfig::default()).await;
        let mut host_rx = h.host.subscribe();

        h.transport.deliver_text("detections", r#"{"objects":[]}"#);
        let msg = tokio::time::timeout(Duration::from_secs(1), host_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.method, ON_DETECTIONS);
        assert_eq!(msg.message, r#"{"objects":[]}"#);
    }

    #[tokio::test]
    async fn test_channel_open_resets_send_warning() {
        let h = harness(SessionConfig::default()).await;
        let key = send_throttle_key("detections");

        assert!(!h.session.send("detections", "early"));
        assert!(!h.session.inner.throttler.should_log(&key));

        h.session
            .dispatch(PeerEvent::ChannelOpen("detections".into()))
            .await;
        assert!(h.session.inner.throttler.should_log(&key));
    }
}
