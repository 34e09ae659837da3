//! Pixel format and resolution definitions

use serde::{Deserialize, Serialize};
use std::fmt;

/// Pixel layouts accepted from the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PixelFormat {
    /// Packed RGB, 3 bytes per pixel, no row padding
    Rgb24,
    /// Planar YUV 4:2:0 (Y, U, V)
    I420,
}

impl PixelFormat {
    /// Bytes required for a tightly packed frame of this format
    pub fn frame_size(&self, width: u32, height: u32) -> usize {
        let w = width as usize;
        let h = height as usize;
        match self {
            PixelFormat::Rgb24 => w * h * 3,
            PixelFormat::I420 => w * h + 2 * (w / 2) * (h / 2),
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PixelFormat::Rgb24 => write!(f, "RGB24"),
            PixelFormat::I420 => write!(f, "I420"),
        }
    }
}

/// Resolution (width x height)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Both dimensions non-zero
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    pub fn pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Chroma plane size for 4:2:0 subsampling (truncating)
    pub fn chroma(&self) -> Resolution {
        Resolution::new(self.width / 2, self.height / 2)
    }

    /// Largest even-sized region starting at the top-left corner
    pub fn even_crop(&self) -> Resolution {
        Resolution::new(self.width & !1, self.height & !1)
    }

    pub const VGA: Resolution = Resolution {
        width: 640,
        height: 480,
    };
    pub const HD720: Resolution = Resolution {
        width: 1280,
        height: 720,
    };
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl From<(u32, u32)> for Resolution {
    fn from((width, height): (u32, u32)) -> Self {
        Self { width, height }
    }
}

/// Fit a source resolution into a bounding box, keeping the aspect ratio.
///
/// Each dimension is first clamped to the box; the dimension that would
/// break the source aspect ratio is then recomputed from the other one.
/// The result is never smaller than 1x1.
pub fn compute_stream_resolution(source: Resolution, max: Resolution) -> Resolution {
    let mut width = max.width.min(source.width) as f32;
    let mut height = max.height.min(source.height) as f32;

    let aspect = if source.height > 0 {
        source.width as f32 / source.height as f32
    } else {
        1.0
    };

    if height > 0.0 && width / height > aspect {
        width = (height * aspect).round_ties_even();
    } else if aspect > 0.0 {
        height = (width / aspect).round_ties_even();
    }

    Resolution::new((width as u32).max(1), (height as u32).max(1))
}
