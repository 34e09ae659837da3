//! H.264 encoding stage
//!
//! Software encoding with openh264. The encoder is created lazily for the
//! first frame's resolution and recreated whenever the resolution changes.

use bytes::Bytes;
use openh264::encoder::{BitRate, Encoder, EncoderConfig, FrameRate, FrameType, RateControlMode};
use openh264::formats::YUVSlices;
use openh264::OpenH264API;
use tracing::{debug, info, trace};

use super::format::Resolution;
use super::frame::VideoFrame;
use crate::error::{AppError, Result};

/// Encoder settings
#[derive(Debug, Clone, Copy)]
pub struct EncoderSettings {
    /// Target bitrate in bits per second
    pub bitrate_bps: u32,
    /// Nominal frame rate for rate control
    pub fps: u32,
    /// Force an IDR frame every N frames (0 = encoder default)
    pub keyframe_interval: u32,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            bitrate_bps: 1_000_000,
            fps: 30,
            keyframe_interval: 60,
        }
    }
}

/// One encoded access unit (Annex B)
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub data: Bytes,
    pub resolution: Resolution,
    pub key_frame: bool,
    pub sequence: u64,
    /// Capture timestamp of the source frame
    pub timestamp_ns: u64,
}

impl EncodedFrame {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Video encoder
///
/// Not Sync; owned by a single encoding task.
pub trait VideoEncoder: Send {
    fn name(&self) -> &str;

    /// Encode a frame. `Ok(None)` means the encoder skipped it.
    fn encode(&mut self, frame: &VideoFrame) -> Result<Option<EncodedFrame>>;

    /// Make the next encoded frame an IDR frame
    fn request_keyframe(&mut self);
}

struct ActiveEncoder {
    encoder: Encoder,
    resolution: Resolution,
}

/// openh264-backed H.264 encoder
pub struct H264Encoder {
    settings: EncoderSettings,
    active: Option<ActiveEncoder>,
    frames_encoded: u64,
    force_keyframe: bool,
}

impl H264Encoder {
    pub fn new(settings: EncoderSettings) -> Self {
        Self {
            settings,
            active: None,
            frames_encoded: 0,
            force_keyframe: false,
        }
    }

    pub fn frames_encoded(&self) -> u64 {
        self.frames_encoded
    }

    /// Resolution the encoder is currently configured for
    pub fn resolution(&self) -> Option<Resolution> {
        self.active.as_ref().map(|a| a.resolution)
    }

    fn ensure_encoder(&mut self, resolution: Resolution) -> Result<&mut ActiveEncoder> {
        let stale = self
            .active
            .as_ref()
            .map(|a| a.resolution != resolution)
            .unwrap_or(true);

        if stale {
            if let Some(old) = self.active.take() {
                info!(
                    "Encoder resolution changed {} -> {}, recreating",
                    old.resolution, resolution
                );
            }

            let config = EncoderConfig::new()
                .bitrate(BitRate::from_bps(self.settings.bitrate_bps))
                .max_frame_rate(FrameRate::from_hz(self.settings.fps as f32))
                .rate_control_mode(RateControlMode::Bitrate);
            let encoder = Encoder::with_api_config(OpenH264API::from_source(), config)
                .map_err(|e| AppError::VideoError(format!("Failed to create H.264 encoder: {}", e)))?;

            info!(
                "H.264 encoder created: {} @ {} fps, {} bps",
                resolution, self.settings.fps, self.settings.bitrate_bps
            );
            self.active = Some(ActiveEncoder {
                encoder,
                resolution,
            });
        }

        self.active
            .as_mut()
            .ok_or_else(|| AppError::Internal("Encoder missing after creation".to_string()))
    }
}

impl VideoEncoder for H264Encoder {
    fn name(&self) -> &str {
        "openh264"
    }

    fn encode(&mut self, frame: &VideoFrame) -> Result<Option<EncodedFrame>> {
        // H.264 needs even dimensions: drop the last row/column of odd frames.
        // Chroma planes are already sized for the cropped area.
        let source = frame.resolution();
        let resolution = source.even_crop();
        if !resolution.is_valid() {
            return Err(AppError::VideoError(format!(
                "Frame {} too small to encode",
                source
            )));
        }

        let interval = self.settings.keyframe_interval as u64;
        let periodic = interval > 0 && self.frames_encoded > 0 && self.frames_encoded % interval == 0;
        let force = std::mem::take(&mut self.force_keyframe) || periodic;

        let active = self.ensure_encoder(resolution)?;
        if force {
            debug!("Forcing keyframe");
            active.encoder.force_intra_frame();
        }

        let buffer = frame.buffer();
        let (stride_y, stride_u, stride_v) = buffer.strides();
        let yuv = YUVSlices::new(
            (buffer.y_plane(), buffer.u_plane(), buffer.v_plane()),
            (resolution.width as usize, resolution.height as usize),
            (stride_y, stride_u, stride_v),
        );

        let bitstream = active
            .encoder
            .encode(&yuv)
            .map_err(|e| AppError::VideoError(format!("H.264 encode failed: {}", e)))?;

        let frame_type = bitstream.frame_type();
        if matches!(frame_type, FrameType::Skip) {
            trace!("Encoder skipped frame {}", frame.sequence);
            return Ok(None);
        }

        let data = bitstream.to_vec();
        if data.is_empty() {
            return Ok(None);
        }

        self.frames_encoded += 1;
        Ok(Some(EncodedFrame {
            data: Bytes::from(data),
            resolution,
            key_frame: matches!(frame_type, FrameType::IDR | FrameType::I),
            sequence: frame.sequence,
            timestamp_ns: frame.timestamp_ns,
        }))
    }

    fn request_keyframe(&mut self) {
        self.force_keyframe = true;
    }
}
