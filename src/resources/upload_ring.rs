//! Ring buffer for transient GPU uploads.
//!
//! Per-frame data (camera uniforms, dynamic vertex data, staging copies)
//! needs fresh GPU-visible memory every frame. Instead of creating and
//! destroying buffers, the ring pre-allocates one persistently mapped
//! upload buffer and hands out consecutive regions, reclaiming them once
//! the fence value recorded for their frame completes.
//!
//! Offsets are tracked on an unbounded virtual timeline (`head`/`tail`
//! only ever grow); the physical offset of an allocation is its virtual
//! offset modulo the capacity. A region may be reused exactly when the
//! write head stays within one capacity of the retired tail.
//!
//! # Thread Safety
//!
//! `UploadRing` is not thread-safe; recording threads use separate rings.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::backend::DeviceBackend;
use crate::error::{GraphicsError, GraphicsResult};
use crate::resources::Buffer;
use crate::types::{BufferDescriptor, BufferUsage};

/// A sub-allocation from an upload ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UploadAllocation {
    /// Byte offset into the ring's buffer.
    pub offset: u64,
    /// Size of the allocation in bytes.
    pub size: u64,
}

/// Fence-retired transient upload allocator.
pub struct UploadRing {
    buffer: Arc<Buffer>,
    capacity: u64,
    alignment: u64,
    /// Virtual write position.
    head: u64,
    /// Virtual position up to which the GPU has finished reading.
    tail: u64,
    /// Frames in flight: (virtual head at frame end, fence value).
    in_flight: VecDeque<(u64, u64)>,
}

impl UploadRing {
    /// Default allocation alignment, matching the minimum uniform-buffer
    /// offset alignment of common GPUs.
    pub const DEFAULT_ALIGNMENT: u64 = 256;

    /// Create a ring of `capacity` bytes backed by a mapped upload buffer.
    pub fn new(
        backend: &Arc<dyn DeviceBackend>,
        capacity: u64,
        label: &str,
    ) -> GraphicsResult<Self> {
        Self::with_alignment(backend, capacity, label, Self::DEFAULT_ALIGNMENT)
    }

    /// Create a ring with a custom allocation alignment (power of two).
    pub fn with_alignment(
        backend: &Arc<dyn DeviceBackend>,
        capacity: u64,
        label: &str,
        alignment: u64,
    ) -> GraphicsResult<Self> {
        if !alignment.is_power_of_two() {
            return Err(GraphicsError::InvalidParameter(format!(
                "alignment must be a power of 2, got {alignment}"
            )));
        }
        if capacity == 0 {
            return Err(GraphicsError::InvalidParameter(
                "upload ring capacity cannot be zero".to_string(),
            ));
        }

        let aligned_capacity = align_up(capacity, alignment);
        let buffer = Buffer::new(
            backend,
            BufferDescriptor::new(
                aligned_capacity,
                BufferUsage::MAP_WRITE | BufferUsage::COPY_SRC | BufferUsage::UNIFORM,
            )
            .with_label(format!("{label}_upload_ring")),
        )?;

        Ok(Self {
            buffer,
            capacity: aligned_capacity,
            alignment,
            head: 0,
            tail: 0,
            in_flight: VecDeque::new(),
        })
    }

    /// The underlying upload buffer.
    pub fn buffer(&self) -> &Arc<Buffer> {
        &self.buffer
    }

    /// Total capacity in bytes.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Bytes currently unavailable (written but not yet retired).
    pub fn used(&self) -> u64 {
        self.head - self.tail
    }

    /// Bytes available for allocation before the ring is full.
    pub fn available(&self) -> u64 {
        self.capacity - self.used()
    }

    /// Allocate `size` bytes.
    ///
    /// Returns `None` when the un-retired region would be overwritten;
    /// callers must retire completed frames (or wait on their fence) and
    /// retry.
    pub fn allocate(&mut self, size: u64) -> Option<UploadAllocation> {
        if size == 0 {
            return Some(UploadAllocation {
                offset: self.head % self.capacity,
                size: 0,
            });
        }
        if size > self.capacity {
            return None;
        }

        let mut position = align_up(self.head, self.alignment);
        // A region may not straddle the wrap point; skip to the next turn
        // of the ring instead.
        if (position % self.capacity) + size > self.capacity {
            position = (position / self.capacity + 1) * self.capacity;
        }
        if position + size > self.tail + self.capacity {
            return None;
        }

        self.head = position + size;
        Some(UploadAllocation {
            offset: position % self.capacity,
            size,
        })
    }

    /// Mark everything allocated since the previous call as belonging to
    /// the frame completing at `fence_value`.
    pub fn finish_frame(&mut self, fence_value: u64) {
        debug_assert!(
            self.in_flight
                .back()
                .map_or(true, |&(_, fence)| fence <= fence_value),
            "upload ring frames must be finished in fence order"
        );
        self.in_flight.push_back((self.head, fence_value));
    }

    /// Reclaim the regions of every frame whose fence value has completed.
    pub fn retire(&mut self, completed_fence_value: u64) {
        while let Some(&(frame_head, fence)) = self.in_flight.front() {
            if fence > completed_fence_value {
                break;
            }
            self.tail = self.tail.max(frame_head);
            self.in_flight.pop_front();
        }
    }
}

impl std::fmt::Debug for UploadRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadRing")
            .field("capacity", &self.capacity)
            .field("head", &self.head)
            .field("tail", &self.tail)
            .field("frames_in_flight", &self.in_flight.len())
            .finish()
    }
}

/// Align a value up to the given alignment.
#[inline]
fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::null::NullBackend;

    fn test_ring(capacity: u64, alignment: u64) -> UploadRing {
        let backend: Arc<dyn DeviceBackend> = Arc::new(NullBackend::new());
        UploadRing::with_alignment(&backend, capacity, "test", alignment).unwrap()
    }

    #[test]
    fn test_ring_creation() {
        let ring = test_ring(4096, 256);
        assert_eq!(ring.capacity(), 4096);
        assert_eq!(ring.used(), 0);
        assert_eq!(ring.available(), 4096);
    }

    #[test]
    fn test_allocations_are_aligned() {
        let mut ring = test_ring(1024, 256);

        let a = ring.allocate(100).unwrap();
        assert_eq!(a.offset, 0);

        // The next allocation starts at the next 256-byte boundary.
        let b = ring.allocate(50).unwrap();
        assert_eq!(b.offset, 256);
    }

    #[test]
    fn test_full_ring_rejects_allocation() {
        let mut ring = test_ring(512, 64);

        assert!(ring.allocate(512).is_some());
        assert!(ring.allocate(1).is_none());
    }

    #[test]
    fn test_retire_reclaims_completed_frames() {
        let mut ring = test_ring(512, 64);

        ring.allocate(512).unwrap();
        ring.finish_frame(1);
        assert!(ring.allocate(64).is_none());

        // Fence 1 completes; the whole ring is writable again.
        ring.retire(1);
        assert_eq!(ring.available(), 512);
        let alloc = ring.allocate(64).unwrap();
        assert_eq!(alloc.offset, 0);
    }

    #[test]
    fn test_incomplete_frames_stay_protected() {
        let mut ring = test_ring(512, 64);

        ring.allocate(256).unwrap();
        ring.finish_frame(1);
        ring.allocate(256).unwrap();
        ring.finish_frame(2);

        // Only frame 1 has completed; half the ring is reclaimable.
        ring.retire(1);
        assert_eq!(ring.available(), 256);
        assert!(ring.allocate(256).is_some());
        assert!(ring.allocate(64).is_none());
    }

    #[test]
    fn test_allocation_does_not_straddle_wrap() {
        let mut ring = test_ring(512, 64);

        ring.allocate(448).unwrap();
        ring.finish_frame(1);
        ring.retire(1);

        // 64 bytes remain before the wrap point; a 128-byte request must
        // land at the start of the next turn instead of straddling it.
        let alloc = ring.allocate(128).unwrap();
        assert_eq!(alloc.offset, 0);
    }

    #[test]
    fn test_zero_size_allocation() {
        let mut ring = test_ring(512, 64);
        let alloc = ring.allocate(0).unwrap();
        assert_eq!(alloc.size, 0);
        assert_eq!(ring.used(), 0);
    }

    #[test]
    fn test_invalid_alignment_rejected() {
        let backend: Arc<dyn DeviceBackend> = Arc::new(NullBackend::new());
        assert!(UploadRing::with_alignment(&backend, 512, "test", 100).is_err());
        assert!(UploadRing::with_alignment(&backend, 0, "test", 64).is_err());
    }

    #[test]
    fn test_sustained_frame_churn() {
        let mut ring = test_ring(1024, 64);

        // Three frames in flight at steady state, each using a quarter of
        // the ring; the allocator must never run dry.
        for frame in 0..32u64 {
            for _ in 0..4 {
                assert!(ring.allocate(64).is_some(), "frame {frame} ran dry");
            }
            ring.finish_frame(frame + 1);
            if frame >= 2 {
                ring.retire(frame - 1);
            }
        }
    }
}
