//! Outbound H.264 video track
//!
//! ```text
//! CaptureSource --try_send--> bounded queue --> encoder loop (blocking)
//!                                                   |
//!                                                   v
//!                                       TrackLocalStaticSample --> peer
//! ```
//!
//! The queue drops frames when full so the host render loop never blocks.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, trace};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::error_throttled;
use crate::utils::LogThrottler;
use crate::video::capture::FrameSink;
use crate::video::encoder::{EncoderSettings, H264Encoder, VideoEncoder};
use crate::video::frame::VideoFrame;

/// H.264 RTP clock rate
pub const H264_CLOCK_RATE: u32 = 90000;

/// Frames waiting for the encoder before new ones are dropped
const FRAME_QUEUE_CAPACITY: usize = 2;

/// Track statistics
#[derive(Debug, Default)]
pub struct TrackStats {
    pub frames_queued: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub frames_encoded: AtomicU64,
    pub keyframes_encoded: AtomicU64,
    pub encode_errors: AtomicU64,
    pub bytes_sent: AtomicU64,
}

/// Plain copy of [`TrackStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackStatsSnapshot {
    pub frames_queued: u64,
    pub frames_dropped: u64,
    pub frames_encoded: u64,
    pub keyframes_encoded: u64,
    pub encode_errors: u64,
    pub bytes_sent: u64,
}

impl TrackStats {
    pub fn snapshot(&self) -> TrackStatsSnapshot {
        TrackStatsSnapshot {
            frames_queued: self.frames_queued.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_encoded: self.frames_encoded.load(Ordering::Relaxed),
            keyframes_encoded: self.keyframes_encoded.load(Ordering::Relaxed),
            encode_errors: self.encode_errors.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
        }
    }
}

/// H.264 video track fed by a frame sink
pub struct OutboundVideoTrack {
    track: Arc<TrackLocalStaticSample>,
    frame_tx: Mutex<Option<mpsc::Sender<VideoFrame>>>,
    keyframe_requested: Arc<AtomicBool>,
    stats: Arc<TrackStats>,
}

impl OutboundVideoTrack {
    /// Create the track and start its encoder loop on `handle`'s blocking pool
    pub fn new(settings: EncoderSettings, stream_id: &str, handle: &Handle) -> Self {
        let codec = RTCRtpCodecCapability {
            mime_type: "video/H264".to_string(),
            clock_rate: H264_CLOCK_RATE,
            channels: 0,
            sdp_fmtp_line:
                "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f"
                    .to_string(),
            rtcp_feedback: vec![],
        };
        let track = Arc::new(TrackLocalStaticSample::new(
            codec,
            "video".to_string(),
            stream_id.to_string(),
        ));

        let (frame_tx, frame_rx) = mpsc::channel(FRAME_QUEUE_CAPACITY);
        let keyframe_requested = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(TrackStats::default());

        let loop_track = track.clone();
        let loop_keyframe = keyframe_requested.clone();
        let loop_stats = stats.clone();
        let loop_handle = handle.clone();
        handle.spawn_blocking(move || {
            encode_loop(
                frame_rx,
                H264Encoder::new(settings),
                loop_track,
                loop_keyframe,
                loop_stats,
                loop_handle,
                settings.fps,
            )
        });

        info!("Outbound H.264 track created (stream {})", stream_id);
        Self {
            track,
            frame_tx: Mutex::new(Some(frame_tx)),
            keyframe_requested,
            stats,
        }
    }

    /// Track for attaching to a peer connection
    pub fn as_track_local(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        self.track.clone()
    }

    /// Make the next encoded frame an IDR frame
    pub fn request_keyframe(&self) {
        self.keyframe_requested.store(true, Ordering::Release);
    }

    pub fn stats(&self) -> TrackStatsSnapshot {
        self.stats.snapshot()
    }

    /// Stop the encoder loop. Idempotent.
    pub fn stop(&self) {
        if self.frame_tx.lock().take().is_some() {
            debug!("Outbound video track stopped");
        }
    }
}

impl FrameSink for OutboundVideoTrack {
    fn on_frame(&self, frame: VideoFrame) {
        let guard = self.frame_tx.lock();
        let Some(tx) = guard.as_ref() else {
            return;
        };
        match tx.try_send(frame) {
            Ok(()) => {
                self.stats.frames_queued.fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Full(frame)) => {
                self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                trace!("Encoder busy, dropped frame {}", frame.sequence);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

impl Drop for OutboundVideoTrack {
    fn drop(&mut self) {
        self.stop();
    }
}

fn encode_loop(
    mut frame_rx: mpsc::Receiver<VideoFrame>,
    mut encoder: H264Encoder,
    track: Arc<TrackLocalStaticSample>,
    keyframe_requested: Arc<AtomicBool>,
    stats: Arc<TrackStats>,
    handle: Handle,
    fps: u32,
) {
    let throttler = LogThrottler::with_secs(5);
    let nominal = Duration::from_nanos(1_000_000_000 / fps.max(1) as u64);
    let mut last_timestamp_ns: Option<u64> = None;

    while let Some(frame) = frame_rx.blocking_recv() {
        if keyframe_requested.swap(false, Ordering::AcqRel) {
            encoder.request_keyframe();
        }

        let encoded = match encoder.encode(&frame) {
            Ok(Some(encoded)) => encoded,
            Ok(None) => continue,
            Err(e) => {
                stats.encode_errors.fetch_add(1, Ordering::Relaxed);
                error_throttled!(throttler, "encode", "Dropping frame {}: {}", frame.sequence, e);
                continue;
            }
        };

        let duration = match last_timestamp_ns {
            Some(prev) if encoded.timestamp_ns > prev => {
                Duration::from_nanos(encoded.timestamp_ns - prev)
            }
            _ => nominal,
        };
        last_timestamp_ns = Some(encoded.timestamp_ns);

        stats.frames_encoded.fetch_add(1, Ordering::Relaxed);
        if encoded.key_frame {
            stats.keyframes_encoded.fetch_add(1, Ordering::Relaxed);
        }

        let len = encoded.len() as u64;
        let sample = Sample {
            data: encoded.data,
            duration,
            ..Default::default()
        };
        // Annex B access unit; the sample track's payloader splits NAL units
        match handle.block_on(track.write_sample(&sample)) {
            Ok(()) => {
                stats.bytes_sent.fetch_add(len, Ordering::Relaxed);
            }
            Err(e) => {
                error_throttled!(throttler, "write_sample", "Failed to write video sample: {}", e);
            }
        }
    }

    debug!(
        "Encoder loop finished after {} frames",
        encoder.frames_encoded()
    );
}
