use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use tokio::runtime::Handle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vision_stream::config::ConfigStore;
use vision_stream::events::LoggingHostBridge;
use vision_stream::video::format::{compute_stream_resolution, Resolution};
use vision_stream::webrtc::{CapturePath, SessionPhase, VisionStreamer};

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// Headless streamer: pushes a synthetic test pattern to a WebRTC peer
#[derive(Parser, Debug)]
#[command(name = "vision-stream")]
#[command(version, about = "Stream video and detections over WebRTC", long_about = None)]
struct CliArgs {
    /// Signaling server WebSocket URL
    #[arg(short = 's', long, value_name = "URL")]
    signaling_url: String,

    /// Session config file (JSON, created with defaults if missing)
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Source frame width
    #[arg(long, default_value_t = 1280)]
    width: u32,

    /// Source frame height
    #[arg(long, default_value_t = 720)]
    height: u32,

    /// Largest resolution to stream (WIDTHxHEIGHT)
    #[arg(long, value_name = "WxH", default_value = "640x480")]
    max_resolution: String,

    /// Target frame rate (overrides config)
    #[arg(long)]
    fps: Option<u32>,

    /// STUN server URL, repeatable (overrides config)
    #[arg(long = "ice-server", value_name = "URL")]
    ice_servers: Vec<String>,

    /// Interval between synthetic detection messages, 0 disables them
    #[arg(long, value_name = "MS", default_value_t = 1000)]
    detections_interval_ms: u64,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_enum, default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose, args.json_logs);

    tracing::info!("Starting vision-stream v{}", env!("CARGO_PKG_VERSION"));

    let store = match &args.config {
        Some(path) => {
            tracing::info!("Config file: {}", path.display());
            ConfigStore::load(path).await?
        }
        None => ConfigStore::default(),
    };
    if let Some(fps) = args.fps {
        store.update("target_fps", |c| c.set_target_fps(fps))?;
    }
    if !args.ice_servers.is_empty() {
        store.update("ice_servers", |c| c.set_ice_servers(&args.ice_servers))?;
    }

    let max = parse_resolution(&args.max_resolution)?;
    let stream_res = compute_stream_resolution(Resolution::new(args.width, args.height), max);
    store.update("desired_resolution", |c| {
        c.set_desired_resolution(stream_res.width, stream_res.height)
    })?;
    tracing::info!(
        "Source {}x{}, streaming at {}",
        args.width,
        args.height,
        stream_res
    );

    let fps = store.get().target_fps;
    let streamer = VisionStreamer::new(Handle::current(), store, Arc::new(LoggingHostBridge));

    streamer.connect_signaling(&args.signaling_url).await?;
    streamer
        .start_stream(CapturePath::PixelPush, stream_res.width, stream_res.height)
        .await?;
    streamer.offer().await?;

    let mut frame_tick = tokio::time::interval(Duration::from_millis(1000 / fps.max(1) as u64));
    let mut stats_tick = tokio::time::interval(Duration::from_secs(5));
    let detections_every = Duration::from_millis(args.detections_interval_ms);
    let mut last_detection = Instant::now();
    let mut pattern = TestPattern::new(stream_res);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Shutdown signal received");
                break;
            }
            _ = frame_tick.tick() => {
                let rgb = pattern.next_frame();
                streamer.update_frame_data(rgb, stream_res.width, stream_res.height);

                if !detections_every.is_zero()
                    && last_detection.elapsed() >= detections_every
                    && streamer.phase() == Some(SessionPhase::Connected)
                {
                    last_detection = Instant::now();
                    streamer.send_data_channel_message(&pattern.detection_json());
                }
            }
            _ = stats_tick.tick() => {
                if let Some(stats) = streamer.stats() {
                    tracing::info!(
                        "Session {} {}: {} frames captured, {} encoded, {} dropped, {} bytes sent",
                        stats.session_id,
                        stats.phase,
                        stats.capture.frames_accepted,
                        stats.track.frames_encoded,
                        stats.track.frames_dropped,
                        stats.track.bytes_sent
                    );
                    if stats.phase == SessionPhase::Failed || stats.phase == SessionPhase::Closed {
                        tracing::warn!("Peer connection is {}, stopping", stats.phase);
                        break;
                    }
                }
            }
        }
    }

    streamer.shutdown().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

fn init_logging(level: LogLevel, verbose_count: u8, json: bool) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "vision_stream=error,webrtc=error",
        LogLevel::Warn => "vision_stream=warn,webrtc=warn",
        LogLevel::Info => "vision_stream=info,webrtc=warn",
        LogLevel::Verbose => "vision_stream=debug,webrtc=warn",
        LogLevel::Debug => "vision_stream=debug,webrtc=info",
        LogLevel::Trace => "vision_stream=trace,webrtc=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    let result = if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
    };
    if let Err(err) = result {
        eprintln!("failed to initialize tracing: {}", err);
    }
}

fn parse_resolution(s: &str) -> anyhow::Result<Resolution> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| anyhow::anyhow!("Invalid resolution '{}', expected WIDTHxHEIGHT", s))?;
    let res = Resolution::new(w.trim().parse()?, h.trim().parse()?);
    if !res.is_valid() {
        anyhow::bail!("Resolution must be non-zero: {}", s);
    }
    Ok(res)
}


/// Scrolling color bars with a moving box as a fake detection
struct TestPattern {
    resolution: Resolution,
    rgb: Vec<u8>,
    tick: u32,
}

const BARS: [[u8; 3]; 7] = [
    [192, 192, 192],
    [192, 192, 0],
    [0, 192, 192],
    [0, 192, 0],
    [192, 0, 192],
    [192, 0, 0],
    [0, 0, 192],
];

impl TestPattern {
    fn new(resolution: Resolution) -> Self {
        Self {
            resolution,
            rgb: vec![0; resolution.pixels() as usize * 3],
            tick: 0,
        }
    }

    fn box_rect(&self) -> (u32, u32, u32, u32) {
        let size = (self.resolution.height / 4).max(1);
        let span = self.resolution.width.saturating_sub(size).max(1);
        let x = (self.tick * 4) % span;
        let y = (self.resolution.height - size) / 2;
        (x, y, size, size)
    }

    fn next_frame(&mut self) -> &[u8] {
        let w = self.resolution.width;
        let h = self.resolution.height;
        let bar_width = (w / BARS.len() as u32).max(1);
        let (bx, by, bw, bh) = self.box_rect();

        for row in 0..h {
            for col in 0..w {
                let inside = col >= bx && col < bx + bw && row >= by && row < by + bh;
                let color = if inside {
                    [255, 255, 255]
                } else {
                    let shifted = (col + self.tick) % w;
                    BARS[((shifted / bar_width) as usize).min(BARS.len() - 1)]
                };
                let i = ((row * w + col) * 3) as usize;
                self.rgb[i..i + 3].copy_from_slice(&color);
            }
        }

        self.tick = self.tick.wrapping_add(1);
        &self.rgb
    }

    fn detection_json(&self) -> String {
        let (x, y, w, h) = self.box_rect();
        serde_json::json!({
            "frame": self.tick,
            "detections": [{
                "label": "box",
                "confidence": 1.0,
                "bbox": [x, y, w, h],
            }],
        })
        .to_string()
    }
}
