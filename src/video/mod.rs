//! Video capture and encoding
//!
//! Raw pixel buffers pushed by the host are throttled, converted to I420,
//! pooled, timestamped and handed to a frame sink feeding the H.264 encoder.

pub mod capture;
pub mod convert;
pub mod encoder;
pub mod format;
pub mod frame;
pub mod pool;
pub mod readback;

pub use capture::{CaptureSource, CaptureState, CaptureStats, Clock, FrameSink, MonotonicClock};
pub use encoder::{EncodedFrame, EncoderSettings, H264Encoder, VideoEncoder};
pub use format::{compute_stream_resolution, PixelFormat, Resolution};
pub use frame::{I420Buffer, VideoFrame};
pub use pool::{FrameBufferPool, PoolStats};
pub use readback::{PlaneReadback, PlaneSenders, PlaneSet};
