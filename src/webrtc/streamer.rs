//! Host-facing streaming facade
//!
//! [`VisionStreamer`] is the single object the host application talks to.
//! Every host entry point is synchronous, logs its own failures and never
//! returns an error. Operations that must happen in call order (connect,
//! start, offer, channel creation, readback) are queued as [`HostCommand`]s
//! and run one at a time by a control task on the runtime handle the host
//! supplied. The same task applies configuration changes to the running
//! capture. The `async` counterparts return `Result` for callers that want
//! to observe failures (the CLI, tests).

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::rtc_transport::RtcTransport;
use super::session::{PeerSession, SessionParts};
use super::signaling::SessionPhase;
use super::signaling_client::SignalingClient;
use super::transport::{peer_event_channel, PeerEvent, PeerEventSender};
use super::video_track::{OutboundVideoTrack, TrackStatsSnapshot};
use crate::config::{ConfigChange, ConfigStore};
use crate::error::{AppError, Result};
use crate::events::{HostBridge, ON_VIDEO_STARTED};
use crate::video::capture::{CaptureSource, CaptureStats, FrameSink};
use crate::video::encoder::EncoderSettings;
use crate::video::format::Resolution;
use crate::video::readback::PlaneReadback;

/// Where frames come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapturePath {
    /// Host pushes CPU pixel buffers
    PixelPush,
    /// Host hands over a native GPU texture
    NativeTexture(u64),
}

impl CapturePath {
    /// Pick the capture path for a host texture pointer (0 = none).
    ///
    /// Native texture capture is not implemented and resolves to
    /// `UnsupportedPath`.
    pub fn resolve(texture_ptr: u64) -> Result<CapturePath> {
        if texture_ptr == 0 {
            Ok(CapturePath::PixelPush)
        } else {
            Err(AppError::UnsupportedPath(format!(
                "native texture capture (ptr {:#x})",
                texture_ptr
            )))
        }
    }
}

/// Snapshot of the running stream
#[derive(Debug, Clone)]
pub struct StreamStats {
    pub session_id: String,
    pub phase: SessionPhase,
    pub capture: CaptureStats,
    pub track: TrackStatsSnapshot,
}

/// Host operation run in order by the control task
enum HostCommand {
    Connect(String),
    Start {
        path: CapturePath,
        width: u32,
        height: u32,
    },
    Offer,
    CreateChannel(String),
    Readback(PlaneReadback),
}

impl HostCommand {
    fn name(&self) -> &'static str {
        match self {
            HostCommand::Connect(_) => "connect",
            HostCommand::Start { .. } => "start",
            HostCommand::Offer => "offer",
            HostCommand::CreateChannel(_) => "create_channel",
            HostCommand::Readback(_) => "readback",
        }
    }
}

struct ActiveStream {
    session: Arc<PeerSession>,
    capture: Arc<CaptureSource>,
    track: Arc<OutboundVideoTrack>,
    /// Cancels in-flight plane readbacks on teardown
    cancel: CancellationToken,
}

impl ActiveStream {
    /// Stop local producers. The peer connection is closed separately.
    fn stop_local(&self) {
        self.cancel.cancel();
        self.capture.dispose();
        self.track.stop();
    }

    async fn close(self) {
        self.stop_local();
        self.session.close().await;
    }
}

/// Streams host frames and detection messages to a remote peer
pub struct VisionStreamer {
    handle: Handle,
    config: ConfigStore,
    host: Arc<dyn HostBridge>,
    signaling: Arc<SignalingClient>,
    /// Event channel of the current session, target of inbound signaling
    route: Arc<Mutex<Option<PeerEventSender>>>,
    active: Mutex<Option<ActiveStream>>,
    commands: mpsc::UnboundedSender<HostCommand>,
    starting: AtomicBool,
    disposed: AtomicBool,
}

impl VisionStreamer {
    pub fn new(handle: Handle, config: ConfigStore, host: Arc<dyn HostBridge>) -> Arc<Self> {
        let route: Arc<Mutex<Option<PeerEventSender>>> = Arc::new(Mutex::new(None));
        let signal_route = route.clone();
        let signaling = Arc::new(SignalingClient::new(Arc::new(move |text: String| {
            match signal_route.lock().as_ref() {
                Some(tx) => {
                    let _ = tx.send(PeerEvent::Signal(text));
                }
                None => debug!("No active session, dropping signaling message"),
            }
        })));

        let (commands, command_rx) = mpsc::unbounded_channel();
        let config_rx = config.subscribe();
        let streamer = Arc::new(Self {
            handle: handle.clone(),
            config,
            host,
            signaling,
            route,
            active: Mutex::new(None),
            commands,
            starting: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        });

        handle.spawn(Self::control_loop(
            Arc::downgrade(&streamer),
            command_rx,
            config_rx,
        ));
        streamer
    }

    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    // ------------------------------------------------------------------
    // Control task
    // ------------------------------------------------------------------

    /// Runs queued host commands one at a time. Ends when the streamer is
    /// dropped.
    async fn control_loop(
        this: Weak<Self>,
        mut commands: mpsc::UnboundedReceiver<HostCommand>,
        mut config_rx: broadcast::Receiver<ConfigChange>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else { break };
                    let Some(streamer) = this.upgrade() else { break };
                    streamer.run_command(command).await;
                }
                change = config_rx.recv() => {
                    let key = match change {
                        Ok(change) => change.key,
                        // Missed changes: re-apply everything
                        Err(RecvError::Lagged(_)) => "session".to_string(),
                        Err(RecvError::Closed) => break,
                    };
                    let Some(streamer) = this.upgrade() else { break };
                    streamer.apply_config_change(&key);
                }
            }
        }
        debug!("Streamer control task finished");
    }

    fn enqueue(&self, command: HostCommand) {
        let name = command.name();
        if self.disposed.load(Ordering::Acquire) {
            warn!("Streamer disposed, ignoring {}", name);
            return;
        }
        if self.commands.send(command).is_err() {
            error!("Streamer control task gone, dropping {}", name);
        }
    }

    async fn run_command(&self, command: HostCommand) {
        let name = command.name();
        if self.disposed.load(Ordering::Acquire) {
            debug!("Streamer disposed, skipping queued {}", name);
            return;
        }

        let result = match command {
            HostCommand::Connect(url) => self.connect_signaling(&url).await,
            HostCommand::Start {
                path,
                width,
                height,
            } => self.start_stream(path, width, height).await,
            HostCommand::Offer => self.offer().await,
            HostCommand::CreateChannel(label) => self.create_channel(&label).await,
            HostCommand::Readback(readback) => self.spawn_readback(readback),
        };
        if let Err(e) = result {
            error!("Host {} failed: {}", name, e);
        }
    }

    fn apply_config_change(&self, key: &str) {
        if key != "target_fps" && key != "session" {
            return;
        }
        let fps = self.config.get().target_fps;
        if let Some(capture) = self.capture() {
            match capture.set_target_fps(fps) {
                Ok(()) => info!("Capture target fps now {}", fps),
                Err(e) => error!("Failed to apply target fps: {}", e),
            }
        }
    }

    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------

    pub fn set_ice_servers(&self, urls: &[&str]) {
        match self.config.update("ice_servers", |c| c.set_ice_servers(urls)) {
            Ok(()) => info!("ICE servers set: {:?}", urls),
            Err(e) => error!("Failed to set ICE servers: {}", e),
        }
    }

    pub fn add_turn_server(&self, url: &str, username: &str, credential: &str) {
        match self
            .config
            .update("ice_servers", |c| c.add_turn_server(url, username, credential))
        {
            Ok(()) => info!("TURN server added: {}", url),
            Err(e) => error!("Failed to add TURN server: {}", e),
        }
    }

    pub fn set_message_target(&self, target: &str, method: &str) {
        if let Err(e) = self
            .config
            .update("message_target", |c| c.set_message_target(target, method))
        {
            error!("Failed to set message target: {}", e);
        }
    }

    /// Update the frame rate; a running capture picks it up from the
    /// config change
    pub fn set_target_fps(&self, fps: u32) {
        match self.config.update("target_fps", |c| c.set_target_fps(fps)) {
            Ok(()) => info!("Target fps set to {}", fps),
            Err(e) => error!("Failed to set target fps: {}", e),
        }
    }

    pub fn set_desired_resolution(&self, width: u32, height: u32) {
        match self
            .config
            .update("desired_resolution", |c| c.set_desired_resolution(width, height))
        {
            Ok(()) => info!("Desired resolution set to {}x{}", width, height),
            Err(e) => error!("Failed to set desired resolution: {}", e),
        }
    }

    // ------------------------------------------------------------------
    // Signaling
    // ------------------------------------------------------------------

    pub fn connect_to_signaling_server(&self, url: &str) {
        self.enqueue(HostCommand::Connect(url.to_string()));
    }

    pub async fn connect_signaling(&self, url: &str) -> Result<()> {
        self.signaling.connect(url).await
    }

    pub fn is_signaling_open(&self) -> bool {
        self.signaling.is_open()
    }

    // ------------------------------------------------------------------
    // Capture and session
    // ------------------------------------------------------------------

    /// Start streaming from a host texture (`0` = pixel push)
    pub fn set_external_texture(&self, texture_ptr: u64, width: u32, height: u32) {
        let path = match CapturePath::resolve(texture_ptr) {
            Ok(path) => path,
            Err(e) => {
                warn!("{}, falling back to pixel push", e);
                CapturePath::PixelPush
            }
        };
        self.enqueue(HostCommand::Start {
            path,
            width,
            height,
        });
    }

    /// Build capture, track and session. No offer is created.
    ///
    /// A running stream whose session is down (failed, closed,
    /// disconnected) is torn down and replaced.
    pub async fn start_stream(&self, path: CapturePath, width: u32, height: u32) -> Result<()> {
        if path != CapturePath::PixelPush {
            return Err(AppError::UnsupportedPath(format!("{:?}", path)));
        }
        if self.disposed.load(Ordering::Acquire) {
            return Err(AppError::Internal("Streamer disposed".to_string()));
        }
        if self.starting.swap(true, Ordering::AcqRel) {
            warn!("Stream start already in progress, ignoring");
            return Ok(());
        }

        let result = self.replace_and_build(width, height).await;
        self.starting.store(false, Ordering::Release);
        match result? {
            Some(stream) => self.finish_start(stream).await,
            None => Ok(()),
        }
    }

    async fn replace_and_build(&self, width: u32, height: u32) -> Result<Option<ActiveStream>> {
        let previous = {
            let mut active = self.active.lock();
            match active.as_ref() {
                Some(a) if !a.session.phase().is_down() => {
                    warn!("Stream already started, ignoring");
                    return Ok(None);
                }
                Some(a) => {
                    info!(
                        "Session {} is {}, replacing it",
                        a.session.id(),
                        a.session.phase()
                    );
                    active.take()
                }
                None => None,
            }
        };
        if let Some(old) = previous {
            old.close().await;
        }

        self.build_stream(width, height).await.map(Some)
    }

    /// Install a freshly built stream, unless the streamer was disposed
    /// while it was being built.
    async fn finish_start(&self, stream: ActiveStream) -> Result<()> {
        let rejected = {
            let mut active = self.active.lock();
            if self.disposed.load(Ordering::Acquire) {
                Some(stream)
            } else {
                *active = Some(stream);
                None
            }
        };
        if let Some(stream) = rejected {
            warn!("Streamer disposed during start, discarding session {}", stream.session.id());
            *self.route.lock() = None;
            stream.close().await;
            return Err(AppError::Internal(
                "Streamer disposed during start".to_string(),
            ));
        }

        let target = self.config.get().message_target.target.clone();
        self.host.send(&target, ON_VIDEO_STARTED, "");
        Ok(())
    }

    async fn build_stream(&self, width: u32, height: u32) -> Result<ActiveStream> {
        let config = self.config.get();
        let source = Resolution::new(width, height);
        if !source.is_valid() {
            return Err(AppError::InvalidInput(format!(
                "Capture resolution must be non-zero, got {}",
                source
            )));
        }
        let resolution = config.desired_resolution.unwrap_or(source);
        let session_id = Uuid::new_v4().to_string();

        let settings = EncoderSettings {
            bitrate_bps: config.encoder.bitrate_kbps.saturating_mul(1000),
            fps: config.target_fps,
            keyframe_interval: config.encoder.keyframe_interval,
        };
        let track = Arc::new(OutboundVideoTrack::new(settings, &session_id, &self.handle));

        let (events_tx, events_rx) = peer_event_channel();
        let transport = RtcTransport::new(&config, &session_id, events_tx.clone()).await?;
        *self.route.lock() = Some(events_tx.clone());

        let session = PeerSession::start(
            session_id.clone(),
            SessionParts {
                config: config.clone(),
                transport: Arc::new(transport),
                signaling: self.signaling.clone(),
                host: self.host.clone(),
                events_tx,
                events_rx,
            },
            Some(&track),
        )
        .await?;
        let session = Arc::new(session);

        // Fresh IDR whenever the peer (re)connects
        let mut phase_rx = session.subscribe_phase();
        let keyframe_track = track.clone();
        self.handle.spawn(async move {
            while phase_rx.changed().await.is_ok() {
                let phase = *phase_rx.borrow();
                if phase == SessionPhase::Connected {
                    keyframe_track.request_keyframe();
                }
                if phase == SessionPhase::Closed {
                    break;
                }
            }
        });

        let sink: Arc<dyn FrameSink> = track.clone();
        let capture = Arc::new(CaptureSource::new(sink));
        capture.start(resolution.width, resolution.height, config.target_fps)?;

        info!(
            "Stream {} ready: {} @ {} fps",
            session_id, resolution, config.target_fps
        );
        Ok(ActiveStream {
            session,
            capture,
            track,
            cancel: CancellationToken::new(),
        })
    }

    fn capture(&self) -> Option<Arc<CaptureSource>> {
        self.active.lock().as_ref().map(|a| a.capture.clone())
    }

    fn session(&self) -> Option<Arc<PeerSession>> {
        self.active.lock().as_ref().map(|a| a.session.clone())
    }

    /// Push a packed RGB24 frame from the host render loop
    pub fn update_frame_data(&self, rgb: &[u8], width: u32, height: u32) {
        if let Some(capture) = self.capture() {
            // Rejections are logged by the capture source
            let _ = capture.push_rgb(rgb, width, height);
        }
    }

    /// Push I420 planes from the host render loop
    pub fn update_frame_data_yuv(&self, y: &[u8], u: &[u8], v: &[u8], width: u32, height: u32) {
        if let Some(capture) = self.capture() {
            let _ = capture.push_yuv(y, u, v, width, height);
        }
    }

    /// Hand over an asynchronous plane readback. The planes are pushed
    /// into the capture when they arrive; teardown cancels the wait.
    pub fn submit_readback(&self, readback: PlaneReadback) {
        self.enqueue(HostCommand::Readback(readback));
    }

    fn spawn_readback(&self, readback: PlaneReadback) -> Result<()> {
        let (capture, cancel) = self.readback_target()?;
        self.handle.spawn(async move {
            if let Err(e) = readback.deliver(&capture, &cancel).await {
                warn!("Plane readback failed: {}", e);
            }
        });
        Ok(())
    }

    /// Wait for a readback and push it. Returns `Ok(false)` if the frame
    /// was throttled or the stream was torn down first.
    pub async fn deliver_readback(&self, readback: PlaneReadback) -> Result<bool> {
        let (capture, cancel) = self.readback_target()?;
        readback.deliver(&capture, &cancel).await
    }

    fn readback_target(&self) -> Result<(Arc<CaptureSource>, CancellationToken)> {
        self.active
            .lock()
            .as_ref()
            .map(|a| (a.capture.clone(), a.cancel.clone()))
            .ok_or_else(|| AppError::VideoError("No active stream for readback".to_string()))
    }

    pub fn create_offer(&self) {
        self.enqueue(HostCommand::Offer);
    }

    pub async fn offer(&self) -> Result<()> {
        match self.session() {
            Some(session) => session.create_offer().await,
            None => Err(AppError::NegotiationFailure(
                "No active session; set an external texture first".to_string(),
            )),
        }
    }

    /// Send on the default channel
    pub fn send_data_channel_message(&self, text: &str) -> bool {
        match self.session() {
            Some(session) => session.send_default(text),
            None => {
                warn!("Cannot send message: no active session");
                false
            }
        }
    }

    pub fn create_custom_data_channel(&self, label: &str) {
        self.enqueue(HostCommand::CreateChannel(label.to_string()));
    }

    pub async fn create_channel(&self, label: &str) -> Result<()> {
        match self.session() {
            Some(session) => session.create_channel(label).await,
            None => Err(AppError::TransportUnavailable(
                "No active session".to_string(),
            )),
        }
    }

    pub fn send_data_channel_message_on(&self, label: &str, text: &str) -> bool {
        match self.session() {
            Some(session) => session.send(label, text),
            None => {
                warn!("Cannot send on '{}': no active session", label);
                false
            }
        }
    }

    pub fn phase(&self) -> Option<SessionPhase> {
        self.session().map(|s| s.phase())
    }

    pub fn stats(&self) -> Option<StreamStats> {
        self.active.lock().as_ref().map(|a| StreamStats {
            session_id: a.session.id().to_string(),
            phase: a.session.phase(),
            capture: a.capture.stats(),
            track: a.track.stats(),
        })
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Release everything. Idempotent, callable from any thread.
    ///
    /// A start still in flight notices the flag and discards what it built.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(active) = self.teardown_local() {
            let session = active.session.clone();
            self.handle.spawn(async move {
                session.close().await;
            });
        }
        info!("Streamer disposed");
    }

    /// Like [`dispose`](Self::dispose) but waits for the peer connection to close
    pub async fn shutdown(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(active) = self.teardown_local() {
            active.session.close().await;
        }
        info!("Streamer shut down");
    }

    fn teardown_local(&self) -> Option<ActiveStream> {
        let active = self.active.lock().take();
        *self.route.lock() = None;
        if let Some(ref a) = active {
            a.stop_local();
        }
        self.signaling.close();
        active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::events::{ChannelHostBridge, NullHostBridge};
    use crate::video::capture::CaptureState;
    use std::time::Duration;

    fn streamer_with(config: SessionConfig, host: Arc<dyn HostBridge>) -> Arc<VisionStreamer> {
        VisionStreamer::new(Handle::current(), ConfigStore::new(config).unwrap(), host)
    }

    async fn wait_for_phase(streamer: &VisionStreamer, phase: SessionPhase) -> bool {
        for _ in 0..300 {
            if streamer.phase() == Some(phase) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[test]
    fn test_capture_path_resolution() {
        assert_eq!(CapturePath::resolve(0).unwrap(), CapturePath::PixelPush);
        let err = CapturePath::resolve(0xdead).unwrap_err();
        assert!(matches!(err, AppError::UnsupportedPath(_)));
    }

    #[tokio::test]
    async fn test_host_api_without_session() {
        let streamer = VisionStreamer::new(
            Handle::current(),
            ConfigStore::default(),
            Arc::new(NullHostBridge),
        );

        streamer.set_target_fps(0);
        assert_eq!(streamer.config().get().target_fps, 30);
        streamer.set_target_fps(15);
        streamer.set_ice_servers(&["stun:stun.example:3478"]);
        streamer.add_turn_server("turn:turn.example:3478", "u", "p");
        streamer.set_message_target("Receiver", "OnDetections");
        streamer.set_desired_resolution(320, 240);

        let config = streamer.config().get();
        assert_eq!(config.target_fps, 15);
        assert_eq!(config.ice_servers.len(), 2);
        assert_eq!(config.message_target.target, "Receiver");
        assert_eq!(config.desired_resolution, Some(Resolution::new(320, 240)));

        streamer.update_frame_data(&[0; 12], 2, 2);
        assert!(!streamer.send_data_channel_message("x"));
        assert!(!streamer.send_data_channel_message_on("custom", "x"));
        assert!(streamer.offer().await.is_err());
        assert!(streamer.phase().is_none());

        streamer.dispose();
        streamer.dispose();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_start_stream_fires_video_started() {
        let host = Arc::new(ChannelHostBridge::new());
        let mut host_rx = host.subscribe();
        let streamer = VisionStreamer::new(Handle::current(), ConfigStore::default(), host.clone());

        streamer
            .start_stream(CapturePath::PixelPush, 64, 48)
            .await
            .unwrap();
        // Second start is ignored while the session is healthy
        streamer
            .start_stream(CapturePath::PixelPush, 64, 48)
            .await
            .unwrap();

        let msg = host_rx.recv().await.unwrap();
        assert_eq!(msg.method, ON_VIDEO_STARTED);
        assert!(host_rx.try_recv().is_err());

        streamer.update_frame_data(&vec![200u8; 64 * 48 * 3], 64, 48);
        let stats = streamer.stats().unwrap();
        assert_eq!(stats.capture.frames_accepted, 1);
        assert_eq!(stats.phase, SessionPhase::New);

        streamer.shutdown().await;
        assert!(streamer.stats().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_offer_queued_behind_texture() {
        let streamer = streamer_with(SessionConfig::default(), Arc::new(NullHostBridge));

        // Back to back, as the host render thread does
        streamer.set_external_texture(0, 64, 48);
        streamer.create_offer();

        assert!(wait_for_phase(&streamer, SessionPhase::HaveLocalOffer).await);
        streamer.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_native_texture_falls_back_to_pixel_push() {
        let streamer = streamer_with(SessionConfig::default(), Arc::new(NullHostBridge));
        streamer.set_external_texture(0x1000, 64, 48);
        streamer.create_custom_data_channel("telemetry");
        streamer.create_offer();

        assert!(wait_for_phase(&streamer, SessionPhase::HaveLocalOffer).await);
        assert_eq!(
            streamer.stats().unwrap().capture.state,
            CaptureState::Capturing
        );
        streamer.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dispose_during_start_discards_stream() {
        let host = Arc::new(ChannelHostBridge::new());
        let mut host_rx = host.subscribe();
        let streamer = streamer_with(SessionConfig::default(), host.clone());

        let stream = streamer.build_stream(64, 48).await.unwrap();
        let capture = stream.capture.clone();
        let session = stream.session.clone();

        streamer.dispose();
        let err = streamer.finish_start(stream).await.unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));

        assert!(streamer.stats().is_none());
        assert_eq!(capture.state(), CaptureState::Disposed);
        assert_eq!(session.phase(), SessionPhase::Closed);
        assert!(host_rx.try_recv().is_err());

        // Queued work after dispose is ignored
        streamer.set_external_texture(0, 64, 48);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(streamer.stats().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failed_session_is_replaced() {
        let config = SessionConfig {
            connection_timeout_ms: 200,
            ..Default::default()
        };
        let streamer = streamer_with(config, Arc::new(NullHostBridge));

        streamer
            .start_stream(CapturePath::PixelPush, 64, 48)
            .await
            .unwrap();
        streamer.offer().await.unwrap();
        assert!(wait_for_phase(&streamer, SessionPhase::Failed).await);
        let first = streamer.stats().unwrap().session_id;

        streamer
            .start_stream(CapturePath::PixelPush, 64, 48)
            .await
            .unwrap();
        let stats = streamer.stats().unwrap();
        assert_ne!(stats.session_id, first);
        assert_eq!(stats.phase, SessionPhase::New);
        streamer.offer().await.unwrap();
        assert_eq!(streamer.phase(), Some(SessionPhase::HaveLocalOffer));

        streamer.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_readback_delivered_and_cancelled() {
        let streamer = streamer_with(SessionConfig::default(), Arc::new(NullHostBridge));
        let (readback, _) = PlaneReadback::new(Resolution::new(2, 2));
        assert!(streamer.deliver_readback(readback).await.is_err());

        streamer
            .start_stream(CapturePath::PixelPush, 2, 2)
            .await
            .unwrap();

        let (readback, senders) = PlaneReadback::new(Resolution::new(2, 2));
        streamer.submit_readback(readback);
        senders.y.send(vec![1; 4]).unwrap();
        senders.u.send(vec![2]).unwrap();
        senders.v.send(vec![3]).unwrap();
        let mut accepted = 0;
        for _ in 0..100 {
            accepted = streamer.stats().unwrap().capture.frames_accepted;
            if accepted == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(accepted, 1);

        // A readback still waiting for planes ends when the stream goes away
        let (pending, _senders) = PlaneReadback::new(Resolution::new(2, 2));
        let waiter = {
            let streamer = streamer.clone();
            tokio::spawn(async move { streamer.deliver_readback(pending).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        streamer.shutdown().await;

        let delivered = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(!delivered);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_fps_change_reaches_running_capture() {
        let streamer = streamer_with(SessionConfig::default(), Arc::new(NullHostBridge));
        streamer
            .start_stream(CapturePath::PixelPush, 2, 2)
            .await
            .unwrap();

        streamer.set_target_fps(5);
        let mut fps = 0;
        for _ in 0..100 {
            fps = streamer.stats().unwrap().capture.target_fps;
            if fps == 5 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(fps, 5);
        streamer.shutdown().await;
    }
}
