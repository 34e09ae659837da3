//! Single-slot frame buffer pool
//!
//! Caches one I420 buffer keyed by resolution. A buffer that is still
//! referenced downstream is never written again; the pool allocates a
//! fresh one instead.

use std::sync::Arc;
use tracing::{debug, trace};

use super::format::Resolution;
use super::frame::I420Buffer;

/// Pool statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Buffers allocated over the pool's lifetime
    pub allocations: u64,
    /// Cached buffers dropped because of a dimension change or explicit release
    pub releases: u64,
    /// Id of the currently cached buffer
    pub current_id: Option<u64>,
}

/// Single-slot buffer cache.
///
/// Not synchronized; the owner serializes access.
#[derive(Debug, Default)]
pub struct FrameBufferPool {
    slot: Option<Arc<I420Buffer>>,
    allocations: u64,
    releases: u64,
}

impl FrameBufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a writable buffer of the requested resolution
    pub fn acquire(&mut self, resolution: Resolution) -> &mut I420Buffer {
        let reusable = match self.slot.as_mut() {
            Some(buf) => buf.resolution() == resolution && Arc::get_mut(buf).is_some(),
            None => false,
        };

        if !reusable {
            if let Some(old) = self.slot.take() {
                if old.resolution() != resolution {
                    self.releases += 1;
                    debug!(
                        "Releasing pooled buffer {} ({} -> {})",
                        old.id(),
                        old.resolution(),
                        resolution
                    );
                } else {
                    trace!("Pooled buffer {} still in use downstream", old.id());
                }
            }
            let buf = I420Buffer::new(resolution);
            debug!("Allocated pooled buffer {} ({})", buf.id(), resolution);
            self.allocations += 1;
            self.slot = Some(Arc::new(buf));
        }

        let slot = self
            .slot
            .get_or_insert_with(|| Arc::new(I420Buffer::new(resolution)));
        Arc::make_mut(slot)
    }

    /// Share the cached buffer read-only
    pub fn publish(&self) -> Option<Arc<I420Buffer>> {
        self.slot.clone()
    }

    /// Drop the cached buffer. Returns false when nothing was cached.
    pub fn release(&mut self) -> bool {
        match self.slot.take() {
            Some(buf) => {
                self.releases += 1;
                debug!("Released pooled buffer {}", buf.id());
                true
            }
            None => false,
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            allocations: self.allocations,
            releases: self.releases,
            current_id: self.slot.as_ref().map(|b| b.id()),
        }
    }
}
