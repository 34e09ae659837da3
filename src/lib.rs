//! Vision Stream - real-time video and detection streaming over WebRTC
//!
//! This crate captures frames pushed by a host application, encodes them
//! to H.264 and streams them to a remote peer, alongside text messages
//! (object detections) sent over WebRTC data channels.

pub mod config;
pub mod error;
pub mod events;
pub mod utils;
pub mod video;
pub mod webrtc;

pub use error::{AppError, Result};
pub use webrtc::VisionStreamer;
