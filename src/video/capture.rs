//! Pixel-push capture source
//!
//! The host render loop pushes raw RGB24 or I420 buffers at its own cadence.
//! The capture source throttles them to the target frame rate, converts or
//! copies them into a pooled I420 buffer, stamps a strictly increasing
//! monotonic timestamp and hands the frame to the registered [`FrameSink`].

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::convert;
use super::format::Resolution;
use super::frame::VideoFrame;
use super::pool::{FrameBufferPool, PoolStats};
use crate::error::{AppError, Result};
use crate::error_throttled;
use crate::utils::LogThrottler;

/// Log progress every N accepted frames
const LOG_EVERY_FRAMES: u64 = 30;

/// Consumer of captured frames.
///
/// Called on the pushing thread outside the capture lock; must not block.
pub trait FrameSink: Send + Sync {
    fn on_frame(&self, frame: VideoFrame);
}

/// Monotonic time source in nanoseconds
pub trait Clock: Send + Sync {
    fn now_nanos(&self) -> u64;
}

/// `Instant`-backed clock
#[derive(Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_nanos(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }
}

/// Manually advanced clock for deterministic cadence tests
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance_ms(&self, ms: u64) {
        self.nanos.fetch_add(ms * 1_000_000, Ordering::SeqCst);
    }

    pub fn set_nanos(&self, nanos: u64) {
        self.nanos.store(nanos, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_nanos(&self) -> u64 {
        self.nanos.load(Ordering::SeqCst)
    }
}

/// Capture lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Capturing,
    Stopped,
    Disposed,
}

impl std::fmt::Display for CaptureState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureState::Idle => write!(f, "idle"),
            CaptureState::Capturing => write!(f, "capturing"),
            CaptureState::Stopped => write!(f, "stopped"),
            CaptureState::Disposed => write!(f, "disposed"),
        }
    }
}

/// Capture statistics snapshot
#[derive(Debug, Clone)]
pub struct CaptureStats {
    pub state: CaptureState,
    pub resolution: Option<Resolution>,
    pub target_fps: u32,
    pub frames_accepted: u64,
    pub frames_dropped: u64,
    pub pool: PoolStats,
}

/// Input accepted by a push
#[derive(Clone, Copy)]
enum PushInput<'a> {
    Rgb(&'a [u8]),
    Planes(&'a [u8], &'a [u8], &'a [u8]),
}

struct CaptureInner {
    state: CaptureState,
    resolution: Option<Resolution>,
    target_fps: u32,
    pool: FrameBufferPool,
    last_accepted_ns: Option<u64>,
    last_timestamp_ns: Option<u64>,
    frames_accepted: u64,
    frames_dropped: u64,
    sink: Option<Arc<dyn FrameSink>>,
}

/// Throttled, timestamped producer of I420 frames
pub struct CaptureSource {
    /// Fast-path gate checked before taking the lock
    capturing: AtomicBool,
    inner: Mutex<CaptureInner>,
    clock: Arc<dyn Clock>,
    throttler: LogThrottler,
}

impl CaptureSource {
    /// Create an idle capture source delivering frames to `sink`
    pub fn new(sink: Arc<dyn FrameSink>) -> Self {
        Self::with_clock(sink, Arc::new(MonotonicClock::new()))
    }

    pub fn with_clock(sink: Arc<dyn FrameSink>, clock: Arc<dyn Clock>) -> Self {
        Self {
            capturing: AtomicBool::new(false),
            inner: Mutex::new(CaptureInner {
                state: CaptureState::Idle,
                resolution: None,
                target_fps: 30,
                pool: FrameBufferPool::new(),
                last_accepted_ns: None,
                last_timestamp_ns: None,
                frames_accepted: 0,
                frames_dropped: 0,
                sink: Some(sink),
            }),
            clock,
            throttler: LogThrottler::with_secs(5),
        }
    }

    /// Begin capturing.
    ///
    /// Idempotent while capturing. Restarting from `Stopped` is allowed.
    pub fn start(&self, width: u32, height: u32, target_fps: u32) -> Result<()> {
        let resolution = Resolution::new(width, height);
        if !resolution.is_valid() {
            return Err(AppError::InvalidInput(format!(
                "Capture resolution must be non-zero, got {}",
                resolution
            )));
        }
        if target_fps == 0 {
            return Err(AppError::InvalidInput(
                "Target fps must be greater than zero".to_string(),
            ));
        }

        let mut inner = self.inner.lock();
        match inner.state {
            CaptureState::Capturing => {
                warn!("Capture already started, ignoring start request");
                return Ok(());
            }
            CaptureState::Disposed => {
                debug!("Capture source disposed, ignoring start request");
                return Ok(());
            }
            CaptureState::Idle | CaptureState::Stopped => {}
        }

        inner.state = CaptureState::Capturing;
        inner.resolution = Some(resolution);
        inner.target_fps = target_fps;
        inner.last_accepted_ns = None;
        self.capturing.store(true, Ordering::Release);
        self.throttler.clear_all();

        info!("Capture started: {} @ {} fps", resolution, target_fps);
        Ok(())
    }

    /// Push a packed RGB24 frame. Returns whether the frame was accepted.
    pub fn push_rgb(&self, rgb: &[u8], width: u32, height: u32) -> Result<bool> {
        self.push(PushInput::Rgb(rgb), Resolution::new(width, height))
    }

    /// Push three I420 planes. Returns whether the frame was accepted.
    pub fn push_yuv(&self, y: &[u8], u: &[u8], v: &[u8], width: u32, height: u32) -> Result<bool> {
        self.push(PushInput::Planes(y, u, v), Resolution::new(width, height))
    }

    fn push(&self, input: PushInput<'_>, resolution: Resolution) -> Result<bool> {
        if !self.capturing.load(Ordering::Acquire) {
            return Ok(false);
        }

        let validated = match input {
            PushInput::Rgb(rgb) => convert::validate_rgb(rgb, resolution),
            PushInput::Planes(y, u, v) => convert::validate_planes(y, u, v, resolution),
        };
        if let Err(e) = validated {
            error_throttled!(self.throttler, e.kind(), "Rejected pushed frame: {}", e);
            return Err(e);
        }

        let (frame, sink) = {
            let mut inner = self.inner.lock();
            // stop/dispose may have won the race for the lock
            if inner.state != CaptureState::Capturing {
                return Ok(false);
            }

            let now = self.clock.now_nanos();
            if let Some(last) = inner.last_accepted_ns {
                let elapsed_ms = now.saturating_sub(last) / 1_000_000;
                let interval_ms = 1000 / inner.target_fps as u64;
                if elapsed_ms < interval_ms {
                    inner.frames_dropped += 1;
                    return Ok(false);
                }
            }

            let buf = inner.pool.acquire(resolution);
            match input {
                PushInput::Rgb(rgb) => convert::convert_rgb(rgb, resolution, buf)?,
                PushInput::Planes(y, u, v) => convert::adopt_planes(y, u, v, resolution, buf)?,
            }
            let buffer = inner
                .pool
                .publish()
                .ok_or_else(|| AppError::Internal("Pooled buffer missing".to_string()))?;

            let timestamp_ns = match inner.last_timestamp_ns {
                Some(prev) => now.max(prev + 1),
                None => now,
            };
            inner.last_accepted_ns = Some(now);
            inner.last_timestamp_ns = Some(timestamp_ns);
            inner.frames_accepted += 1;

            let seq = inner.frames_accepted;
            if seq % LOG_EVERY_FRAMES == 0 {
                info!(
                    "Captured {} frames ({}), dropped {}",
                    seq, resolution, inner.frames_dropped
                );
            }

            (VideoFrame::new(buffer, timestamp_ns, seq), inner.sink.clone())
        };

        if let Some(sink) = sink {
            sink.on_frame(frame);
        }
        Ok(true)
    }

    /// Change the throttling rate for subsequent frames
    pub fn set_target_fps(&self, fps: u32) -> Result<()> {
        if fps == 0 {
            return Err(AppError::InvalidInput(
                "Target fps must be greater than zero".to_string(),
            ));
        }
        let mut inner = self.inner.lock();
        if inner.target_fps != fps {
            debug!("Capture target fps {} -> {}", inner.target_fps, fps);
            inner.target_fps = fps;
        }
        Ok(())
    }

    /// Stop capturing and release the pooled buffer. Idempotent.
    pub fn stop(&self) {
        self.capturing.store(false, Ordering::Release);
        let mut inner = self.inner.lock();
        if inner.state != CaptureState::Capturing {
            return;
        }
        inner.state = CaptureState::Stopped;
        inner.pool.release();
        info!(
            "Capture stopped: {} frames accepted, {} dropped",
            inner.frames_accepted, inner.frames_dropped
        );
    }

    /// Stop and drop every resource. Later calls are no-ops.
    pub fn dispose(&self) {
        self.stop();
        let mut inner = self.inner.lock();
        if inner.state == CaptureState::Disposed {
            return;
        }
        inner.state = CaptureState::Disposed;
        inner.pool.release();
        inner.sink = None;
        debug!("Capture source disposed");
    }

    pub fn state(&self) -> CaptureState {
        self.inner.lock().state
    }

    pub fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> CaptureStats {
        let inner = self.inner.lock();
        CaptureStats {
            state: inner.state,
            resolution: inner.resolution,
            target_fps: inner.target_fps,
            frames_accepted: inner.frames_accepted,
            frames_dropped: inner.frames_dropped,
            pool: inner.pool.stats(),
        }
    }
}

impl Drop for CaptureSource {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Sink that collects frames in memory
#[derive(Default)]
pub struct CollectingSink {
    frames: Mutex<Vec<VideoFrame>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Vec<VideoFrame> {
        self.frames.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }
}

impl FrameSink for CollectingSink {
    fn on_frame(&self, frame: VideoFrame) {
        self.frames.lock().push(frame);
    }
}
