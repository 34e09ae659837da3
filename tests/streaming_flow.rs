//! End-to-end flows across capture, encoding and signaling

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use tokio::runtime::Handle;

use vision_stream::config::{ConfigStore, SessionConfig};
use vision_stream::events::{ChannelHostBridge, ON_PEER_CONNECTION_STARTED, ON_VIDEO_STARTED};
use vision_stream::video::capture::{CaptureSource, CollectingSink, ManualClock};
use vision_stream::video::encoder::{EncoderSettings, H264Encoder, VideoEncoder};
use vision_stream::webrtc::testing::FakeTransport;
use vision_stream::webrtc::{
    peer_event_channel, CapturePath, ConnectionState, PeerSession, SessionParts, SessionPhase,
    SignalingClient, SignalingMessage, VisionStreamer,
};

fn gradient(width: u32, height: u32, shift: u32) -> Vec<u8> {
    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for row in 0..height {
        for col in 0..width {
            rgb.push(((col + shift) % 256) as u8);
            rgb.push((row % 256) as u8);
            rgb.push(((col + row) % 256) as u8);
        }
    }
    rgb
}

#[test]
fn thirty_frames_capture_and_encode() {
    let sink = Arc::new(CollectingSink::new());
    let clock = Arc::new(ManualClock::new());
    let capture = CaptureSource::with_clock(sink.clone(), clock.clone());
    capture.start(64, 48, 30).unwrap();

    for i in 0..30 {
        assert!(capture.push_rgb(&gradient(64, 48, i), 64, 48).unwrap());
        // Too soon, throttled
        assert!(!capture.push_rgb(&gradient(64, 48, i), 64, 48).unwrap());
        clock.advance_ms(34);
    }

    let frames = sink.frames();
    assert_eq!(frames.len(), 30);
    assert_eq!(capture.stats().frames_dropped, 30);
    for pair in frames.windows(2) {
        assert!(pair[1].timestamp_ns > pair[0].timestamp_ns);
        assert_eq!(pair[1].sequence, pair[0].sequence + 1);
    }

    let mut encoder = H264Encoder::new(EncoderSettings {
        keyframe_interval: 10,
        ..EncoderSettings::default()
    });
    let encoded: Vec<_> = frames
        .iter()
        .filter_map(|f| encoder.encode(f).unwrap())
        .collect();

    assert!(!encoded.is_empty());
    assert!(encoded[0].key_frame);
    assert_eq!(encoded[0].sequence, 1);
    assert!(encoded.iter().all(|e| !e.data.is_empty()));

    capture.dispose();
    assert!(!capture.push_rgb(&gradient(64, 48, 0), 64, 48).unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn thirty_frames_reach_the_outbound_track() {
    let host = Arc::new(ChannelHostBridge::new());
    let mut host_rx = host.subscribe();
    let streamer = VisionStreamer::new(Handle::current(), ConfigStore::default(), host.clone());

    streamer
        .start_stream(CapturePath::PixelPush, 64, 48)
        .await
        .unwrap();
    assert_eq!(host_rx.recv().await.unwrap().method, ON_VIDEO_STARTED);

    for i in 0..30 {
        let rgb = gradient(64, 48, i);
        streamer.update_frame_data(&rgb, 64, 48);
        // Same render tick, throttled at 30 fps
        streamer.update_frame_data(&rgb, 64, 48);
        tokio::time::sleep(Duration::from_millis(40)).await;
    }

    let capture = streamer.stats().unwrap().capture;
    assert_eq!(capture.frames_accepted, 30);
    assert_eq!(capture.frames_dropped, 30);

    // Every surviving frame is either queued to the encoder or dropped at
    // the bounded hand-off, and every queued frame gets encoded
    let settled = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let track = streamer.stats().unwrap().track;
            if track.frames_queued + track.frames_dropped == 30
                && track.frames_encoded + track.encode_errors == track.frames_queued
            {
                return track;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();
    assert!(settled.frames_encoded > 0);
    assert_eq!(settled.encode_errors, 0);
    assert!(settled.keyframes_encoded >= 1);
    assert_eq!(streamer.phase(), Some(SessionPhase::New));

    streamer.shutdown().await;
}

#[tokio::test]
async fn offer_answer_over_websocket() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    // Remote peer: read the offer, answer it, then trickle one candidate
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let offer = loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => break text,
                Some(Ok(_)) => continue,
                _ => panic!("signaling closed before offer"),
            }
        };
        ws.send(Message::Text(r#"{"type":"answer","sdp":"remote-answer"}"#.to_string()))
            .await
            .unwrap();
        ws.send(Message::Text(
            r#"{"type":"candidate","candidate":"candidate:1 1 udp 1 10.0.0.2 5000 typ host","sdpMid":"0","sdpMLineIndex":0}"#
                .to_string(),
        ))
        .await
        .unwrap();
        // Keep the socket open until the client hangs up
        while let Some(Ok(_)) = ws.next().await {}
        offer
    });

    let (events_tx, events_rx) = peer_event_channel();
    let transport = Arc::new(FakeTransport::new(events_tx.clone()));
    let host = Arc::new(ChannelHostBridge::new());
    let mut host_rx = host.subscribe();

    let signaling = Arc::new(SignalingClient::new(PeerSession::signal_callback(
        events_tx.clone(),
    )));
    signaling.connect(&format!("ws://{}", addr)).await.unwrap();

    let session = PeerSession::start(
        "flow",
        SessionParts {
            config: Arc::new(SessionConfig::default()),
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

    session.create_offer().await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while transport.candidates().is_empty() || transport.remote_answer().is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(transport.remote_answer().as_deref(), Some("remote-answer"));
    assert_eq!(transport.candidates()[0].sdp_mline_index, Some(0));
    assert_eq!(session.phase(), SessionPhase::HaveLocalOffer);

    let mut phase_rx = session.subscribe_phase();
    transport.report_state(ConnectionState::Connected);
    tokio::time::timeout(
        Duration::from_secs(1),
        phase_rx.wait_for(|p| *p == SessionPhase::Connected),
    )
    .await
    .unwrap()
    .unwrap();

    let started = host_rx.recv().await.unwrap();
    assert_eq!(started.method, ON_PEER_CONNECTION_STARTED);

    session.close().await;
    signaling.close();

    let offer = server.await.unwrap();
    match SignalingMessage::parse(&offer).unwrap() {
        SignalingMessage::Offer(o) => assert_eq!(o.sdp, FakeTransport::OFFER_SDP),
        other => panic!("expected offer, got {:?}", other),
    }
}
