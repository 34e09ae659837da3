//! webrtc-rs implementation of [`PeerTransport`]

use async_trait::async_trait;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice::mdns::MulticastDnsMode;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use super::mdns::{mdns_host_name, mdns_mode};
use super::signaling::{ConnectionState, IceCandidate};
use super::transport::{ChannelPayload, DataChannelHandle, PeerEvent, PeerEventSender, PeerTransport};
use super::video_track::OutboundVideoTrack;
use crate::config::{IceServer, SessionConfig};
use crate::error::{AppError, Result};

/// Convert configured ICE servers, skipping TURN entries without credentials
pub fn build_ice_servers(servers: &[IceServer]) -> Vec<RTCIceServer> {
    let mut ice_servers = Vec::with_capacity(servers.len());
    for server in servers {
        if server.is_turn() && !server.has_credentials() {
            warn!("Skipping TURN server without credentials: {}", server.url);
            continue;
        }
        ice_servers.push(RTCIceServer {
            urls: vec![server.url.clone()],
            username: server.username.clone().unwrap_or_default(),
            credential: server.credential.clone().unwrap_or_default(),
            ..Default::default()
        });
    }
    ice_servers
}

/// Peer connection backed by webrtc-rs
pub struct RtcTransport {
    session_id: String,
    pc: Arc<RTCPeerConnection>,
    events: PeerEventSender,
    handle: Handle,
}

impl RtcTransport {
    /// Create a peer connection and wire its callbacks to `events`
    pub async fn new(
        config: &SessionConfig,
        session_id: &str,
        events: PeerEventSender,
    ) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| AppError::WebRtcError(format!("Failed to register codecs: {}", e)))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(|e| {
            AppError::WebRtcError(format!("Failed to register interceptors: {}", e))
        })?;

        let mut setting_engine = SettingEngine::default();
        let mode = mdns_mode();
        setting_engine.set_ice_multicast_dns_mode(mode);
        if mode == MulticastDnsMode::QueryAndGather {
            setting_engine.set_multicast_dns_host_name(mdns_host_name(session_id));
        }
        debug!("WebRTC mDNS mode: {:?} (session {})", mode, session_id);

        let api = APIBuilder::new()
            .with_setting_engine(setting_engine)
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        // webrtc-rs only speaks Unified Plan
        let rtc_config = RTCConfiguration {
            ice_servers: build_ice_servers(&config.ice_servers),
            ..Default::default()
        };

        let pc = api.new_peer_connection(rtc_config).await.map_err(|e| {
            AppError::WebRtcError(format!("Failed to create peer connection: {}", e))
        })?;

        let transport = Self {
            session_id: session_id.to_string(),
            pc: Arc::new(pc),
            events,
            handle: Handle::current(),
        };
        transport.register_handlers();
        info!("Peer connection created (session {})", session_id);
        Ok(transport)
    }

    fn register_handlers(&self) {
        let events = self.events.clone();
        let session_id = self.session_id.clone();
        self.pc
            .on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                let events = events.clone();
                let session_id = session_id.clone();

                Box::pin(async move {
                    let state = match s {
                        RTCPeerConnectionState::New => ConnectionState::New,
                        RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
                        RTCPeerConnectionState::Connected => ConnectionState::Connected,
                        RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
                        RTCPeerConnectionState::Failed => ConnectionState::Failed,
                        RTCPeerConnectionState::Closed => ConnectionState::Closed,
                        _ => return,
                    };
                    debug!("Peer {} connection state: {}", session_id, state);
                    let _ = events.send(PeerEvent::ConnectionState(state));
                })
            }));

        let events = self.events.clone();
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let events = events.clone();

                Box::pin(async move {
                    let Some(c) = candidate else {
                        debug!("ICE gathering complete");
                        return;
                    };
                    match c.to_json() {
                        Ok(init) => {
                            let _ = events.send(PeerEvent::LocalCandidate(IceCandidate {
                                candidate: init.candidate,
                                sdp_mid: init.sdp_mid,
                                sdp_mline_index: init.sdp_mline_index,
                            }));
                        }
                        Err(e) => warn!("Failed to serialize local ICE candidate: {}", e),
                    }
                })
            }));

        let events = self.events.clone();
        let handle = self.handle.clone();
        self.pc
            .on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                let events = events.clone();
                let handle = handle.clone();

                Box::pin(async move {
                    info!("Remote data channel announced: {}", dc.label());
                    let channel = RtcDataChannel::wrap(dc, events.clone(), handle);
                    let _ = events.send(PeerEvent::RemoteChannel(channel));
                })
            }));
    }
}

#[async_trait]
impl PeerTransport for RtcTransport {
    async fn add_video_track(&self, track: &OutboundVideoTrack) -> Result<()> {
        let sender = self
            .pc
            .add_track(track.as_track_local())
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to add video track: {}", e)))?;

        // RTCP must be read for the interceptors (NACK, reports) to work
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });

        info!("Video track added to peer connection");
        Ok(())
    }

    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannelHandle>> {
        let dc = self
            .pc
            .create_data_channel(label, None)
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to create data channel: {}", e)))?;

        info!("Data channel '{}' created", label);
        Ok(RtcDataChannel::wrap(dc, self.events.clone(), self.handle.clone()))
    }

    async fn create_offer(&self) -> Result<String> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| AppError::NegotiationFailure(format!("Failed to create offer: {}", e)))?;
        Ok(offer.sdp)
    }

    async fn set_local_offer(&self, sdp: &str) -> Result<()> {
        let desc = RTCSessionDescription::offer(sdp.to_string())
            .map_err(|e| AppError::NegotiationFailure(format!("Invalid local offer: {}", e)))?;
        self.pc.set_local_description(desc).await.map_err(|e| {
            AppError::NegotiationFailure(format!("Failed to set local description: {}", e))
        })
    }

    async fn set_remote_answer(&self, sdp: &str) -> Result<()> {
        let desc = RTCSessionDescription::answer(sdp.to_string())
            .map_err(|e| AppError::NegotiationFailure(format!("Invalid SDP answer: {}", e)))?;
        self.pc.set_remote_description(desc).await.map_err(|e| {
            AppError::NegotiationFailure(format!("Failed to set remote description: {}", e))
        })
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: None,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn close(&self) -> Result<()> {
        self.pc
            .close()
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to close peer connection: {}", e)))
    }
}

/// [`DataChannelHandle`] over an `RTCDataChannel`
struct RtcDataChannel {
    label: String,
    dc: Arc<RTCDataChannel>,
    handle: Handle,
}

impl RtcDataChannel {
    fn wrap(dc: Arc<RTCDataChannel>, events: PeerEventSender, handle: Handle) -> Arc<Self> {
        let label = dc.label().to_string();

        let open_events = events.clone();
        let open_label = label.clone();
        dc.on_open(Box::new(move || {
            let events = open_events.clone();
            let label = open_label.clone();
            Box::pin(async move {
                let _ = events.send(PeerEvent::ChannelOpen(label));
            })
        }));

        let close_events = events.clone();
        let close_label = label.clone();
        dc.on_close(Box::new(move || {
            let events = close_events.clone();
            let label = close_label.clone();
            Box::pin(async move {
                let _ = events.send(PeerEvent::ChannelClosed(label));
            })
        }));

        let msg_label = label.clone();
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            let events = events.clone();
            let label = msg_label.clone();
            Box::pin(async move {
                let payload = if msg.is_string {
                    ChannelPayload::Text(String::from_utf8_lossy(&msg.data).into_owned())
                } else {
                    ChannelPayload::Binary(msg.data)
                };
                let _ = events.send(PeerEvent::ChannelMessage { label, payload });
            })
        }));

        Arc::new(Self { label, dc, handle })
    }
}

impl DataChannelHandle for RtcDataChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_open(&self) -> bool {
        self.dc.ready_state() == RTCDataChannelState::Open
    }

    fn send_text(&self, text: String) -> Result<()> {
        if !self.is_open() {
            return Err(AppError::TransportUnavailable(format!(
                "Data channel '{}' is not open",
                self.label
            )));
        }
        let dc = self.dc.clone();
        let label = self.label.clone();
        self.handle.spawn(async move {
            if let Err(e) = dc.send_text(text).await {
                warn!("Failed to send on data channel '{}': {}", label, e);
            }
        });
        Ok(())
    }

    fn close(&self) {
        let dc = self.dc.clone();
        self.handle.spawn(async move {
            let _ = dc.close().await;
        });
    }
}
