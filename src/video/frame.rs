//! Video frame data structures

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::format::Resolution;

/// Source of unique buffer ids (identity survives moves and clones of the Arc)
static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Planar YUV 4:2:0 buffer with separate Y, U, V planes
///
/// Chroma planes are `width/2 x height/2` (truncating). Every plane carries
/// its own stride; rows beyond the visible width are padding.
#[derive(Debug)]
pub struct I420Buffer {
    id: u64,
    resolution: Resolution,
    y: Vec<u8>,
    u: Vec<u8>,
    v: Vec<u8>,
    stride_y: usize,
    stride_u: usize,
    stride_v: usize,
}

impl I420Buffer {
    /// Allocate a zeroed buffer with tightly packed strides
    pub fn new(resolution: Resolution) -> Self {
        let chroma = resolution.chroma();
        Self::with_strides(
            resolution,
            resolution.width as usize,
            chroma.width as usize,
            chroma.width as usize,
        )
    }

    /// Allocate a zeroed buffer with explicit strides.
    ///
    /// Strides smaller than the plane width are raised to the plane width.
    pub fn with_strides(
        resolution: Resolution,
        stride_y: usize,
        stride_u: usize,
        stride_v: usize,
    ) -> Self {
        let chroma = resolution.chroma();
        let stride_y = stride_y.max(resolution.width as usize);
        let stride_u = stride_u.max(chroma.width as usize);
        let stride_v = stride_v.max(chroma.width as usize);

        Self {
            id: NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed),
            resolution,
            y: vec![0u8; stride_y * resolution.height as usize],
            u: vec![0u8; stride_u * chroma.height as usize],
            v: vec![0u8; stride_v * chroma.height as usize],
            stride_y,
            stride_u,
            stride_v,
        }
    }

    /// Unique id assigned at allocation
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn width(&self) -> u32 {
        self.resolution.width
    }

    pub fn height(&self) -> u32 {
        self.resolution.height
    }

    pub fn strides(&self) -> (usize, usize, usize) {
        (self.stride_y, self.stride_u, self.stride_v)
    }

    pub fn y_plane(&self) -> &[u8] {
        &self.y
    }

    pub fn u_plane(&self) -> &[u8] {
        &self.u
    }

    pub fn v_plane(&self) -> &[u8] {
        &self.v
    }

    /// Mutable access to all three planes at once
    pub fn planes_mut(&mut self) -> (&mut [u8], &mut [u8], &mut [u8]) {
        (&mut self.y, &mut self.u, &mut self.v)
    }

    /// Visible Y row (without stride padding)
    pub fn y_row(&self, row: usize) -> &[u8] {
        let start = row * self.stride_y;
        &self.y[start..start + self.resolution.width as usize]
    }

    /// Visible U row
    pub fn u_row(&self, row: usize) -> &[u8] {
        let start = row * self.stride_u;
        &self.u[start..start + self.resolution.chroma().width as usize]
    }

    /// Visible V row
    pub fn v_row(&self, row: usize) -> &[u8] {
        let start = row * self.stride_v;
        &self.v[start..start + self.resolution.chroma().width as usize]
    }

    /// Copy the visible area into tightly packed (y, u, v) vectors
    pub fn to_packed_planes(&self) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
        let res = self.resolution;
        let chroma = res.chroma();
        let mut y = Vec::with_capacity(res.width as usize * res.height as usize);
        let mut u = Vec::with_capacity(chroma.width as usize * chroma.height as usize);
        let mut v = Vec::with_capacity(chroma.width as usize * chroma.height as usize);

        for row in 0..res.height as usize {
            y.extend_from_slice(self.y_row(row));
        }
        for row in 0..chroma.height as usize {
            u.extend_from_slice(self.u_row(row));
            v.extend_from_slice(self.v_row(row));
        }
        (y, u, v)
    }
}

impl Clone for I420Buffer {
    /// Deep copy under a new id
    fn clone(&self) -> Self {
        Self {
            id: NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed),
            resolution: self.resolution,
            y: self.y.clone(),
            u: self.u.clone(),
            v: self.v.clone(),
            stride_y: self.stride_y,
            stride_u: self.stride_u,
            stride_v: self.stride_v,
        }
    }
}

/// A captured frame handed from the capture source to the outbound pipeline
///
/// The buffer is shared read-only once published.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    buffer: Arc<I420Buffer>,
    /// Monotonic capture timestamp in nanoseconds
    pub timestamp_ns: u64,
    /// Accepted-frame sequence number, starting at 1
    pub sequence: u64,
}

impl VideoFrame {
    pub fn new(buffer: Arc<I420Buffer>, timestamp_ns: u64, sequence: u64) -> Self {
        Self {
            buffer,
            timestamp_ns,
            sequence,
        }
    }

    pub fn buffer(&self) -> &I420Buffer {
        &self.buffer
    }

    pub fn resolution(&self) -> Resolution {
        self.buffer.resolution()
    }

    pub fn width(&self) -> u32 {
        self.buffer.width()
    }

    pub fn height(&self) -> u32 {
        self.buffer.height()
    }
}
