//! Device facade and frame pacing.
//!
//! [`GraphicsDevice`] is the explicit context struct threaded through the
//! engine: it owns the backend, one queue per queue kind, and the
//! descriptor heap manager. There is no ambient global device — everything
//! that needs GPU access receives a reference.

use std::sync::Arc;

use crate::backend::{create_backend, DeviceBackend};
use crate::command::CommandQueue;
use crate::descriptors::{DescriptorAllocation, DescriptorHeapManager};
use crate::error::GraphicsResult;
use crate::resources::{Buffer, Texture, UploadRing};
use crate::types::{
    BufferDescriptor, DescriptorKind, DescriptorVisibility, QueueKind, TextureDescriptor,
};

/// Number of frames the CPU may record ahead of the GPU.
pub const MAX_FRAMES_IN_FLIGHT: usize = 3;

/// Owns the backend, the command queues, and the descriptor heaps.
pub struct GraphicsDevice {
    graphics_queue: CommandQueue,
    transfer_queue: CommandQueue,
    descriptors: DescriptorHeapManager,
    backend: Arc<dyn DeviceBackend>,
}

impl GraphicsDevice {
    /// Create a device on the best available backend.
    pub fn create() -> GraphicsResult<Self> {
        Self::with_backend(create_backend())
    }

    /// Create a device on a specific backend.
    pub fn with_backend(backend: Arc<dyn DeviceBackend>) -> GraphicsResult<Self> {
        log::info!("Creating graphics device on {} backend", backend.name());
        let graphics_queue = CommandQueue::new(Arc::clone(&backend), QueueKind::Graphics)?;
        let transfer_queue = CommandQueue::new(Arc::clone(&backend), QueueKind::Transfer)?;
        let descriptors = DescriptorHeapManager::new(Arc::clone(&backend));
        Ok(Self {
            graphics_queue,
            transfer_queue,
            descriptors,
            backend,
        })
    }

    /// The underlying backend.
    pub fn backend(&self) -> &Arc<dyn DeviceBackend> {
        &self.backend
    }

    /// The graphics queue.
    pub fn graphics_queue(&self) -> &CommandQueue {
        &self.graphics_queue
    }

    /// The transfer queue used for asynchronous uploads.
    pub fn transfer_queue(&self) -> &CommandQueue {
        &self.transfer_queue
    }

    /// The descriptor heap manager.
    pub fn descriptors(&self) -> &DescriptorHeapManager {
        &self.descriptors
    }

    /// Create a buffer resource.
    pub fn create_buffer(&self, desc: BufferDescriptor) -> GraphicsResult<Arc<Buffer>> {
        Buffer::new(&self.backend, desc)
    }

    /// Create a texture resource with view descriptors matching its usage.
    pub fn create_texture(&self, desc: TextureDescriptor) -> GraphicsResult<Arc<Texture>> {
        Texture::with_views(&self.backend, &self.descriptors, desc)
    }

    /// Create a transient upload ring of `capacity` bytes.
    pub fn create_upload_ring(&self, capacity: u64, label: &str) -> GraphicsResult<UploadRing> {
        UploadRing::new(&self.backend, capacity, label)
    }

    /// Allocate descriptor slots directly.
    pub fn allocate_descriptors(
        &self,
        kind: DescriptorKind,
        visibility: DescriptorVisibility,
        count: u32,
    ) -> GraphicsResult<DescriptorAllocation> {
        self.descriptors.allocate(kind, visibility, count)
    }

    /// Release tracked objects whose fences have completed, on every queue.
    ///
    /// Invoked once per frame before recording begins.
    pub fn perform_resources_deletion(&self) {
        self.graphics_queue.perform_deletion();
        self.transfer_queue.perform_deletion();
    }

    /// Drain every queue, then release everything that was still tracked.
    ///
    /// Invoked once at shutdown.
    pub fn flush_all_queues(&self) -> GraphicsResult<()> {
        self.graphics_queue.flush()?;
        self.transfer_queue.flush()?;
        self.perform_resources_deletion();
        Ok(())
    }
}

impl std::fmt::Debug for GraphicsDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsDevice")
            .field("backend", &self.backend.name())
            .field("graphics_queue", &self.graphics_queue)
            .field("transfer_queue", &self.transfer_queue)
            .finish()
    }
}

/// Frames-in-flight back-pressure.
///
/// The CPU must not race more than [`MAX_FRAMES_IN_FLIGHT`] frames ahead
/// of the GPU: before recording frame N, the context waits for the fence
/// value recorded when frame N − `MAX_FRAMES_IN_FLIGHT` was submitted, and
/// then runs deferred deletion with that progress.
pub struct FrameContext {
    frame_fences: [u64; MAX_FRAMES_IN_FLIGHT],
    frame_index: usize,
    frame_count: u64,
}

impl FrameContext {
    /// Create a frame context with no frames in flight.
    pub fn new() -> Self {
        Self {
            frame_fences: [0; MAX_FRAMES_IN_FLIGHT],
            frame_index: 0,
            frame_count: 0,
        }
    }

    /// Begin a frame: wait for the slot's previous occupant to finish on
    /// the GPU, then release completed resources.
    pub fn begin_frame(&mut self, device: &GraphicsDevice) -> GraphicsResult<()> {
        let pending = self.frame_fences[self.frame_index];
        device.graphics_queue().wait_on_cpu(pending)?;
        device.perform_resources_deletion();
        Ok(())
    }

    /// End a frame, recording the fence value its submissions returned.
    pub fn end_frame(&mut self, fence_value: u64) {
        self.frame_fences[self.frame_index] = fence_value;
        self.frame_index = (self.frame_index + 1) % MAX_FRAMES_IN_FLIGHT;
        self.frame_count += 1;
    }

    /// Number of frames completed so far.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }
}

impl Default for FrameContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FrameContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameContext")
            .field("frame_index", &self.frame_index)
            .field("frame_count", &self.frame_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::null::NullBackend;
    use crate::types::{BufferUsage, ResourceState};

    fn null_device() -> GraphicsDevice {
        GraphicsDevice::with_backend(Arc::new(NullBackend::new())).unwrap()
    }

    #[test]
    fn test_device_creation() {
        let device = null_device();
        assert_eq!(device.backend().name(), "Null");
        assert_eq!(device.graphics_queue().kind(), QueueKind::Graphics);
        assert_eq!(device.transfer_queue().kind(), QueueKind::Transfer);
    }

    #[test]
    fn test_flush_all_queues_releases_everything() {
        let device = null_device();
        let buffer = device
            .create_buffer(BufferDescriptor::new(64, BufferUsage::COPY_DST))
            .unwrap();

        let mut list = device.graphics_queue().open_list().unwrap();
        list.transition_buffer(&buffer, ResourceState::CopyDest);
        device.graphics_queue().submit(vec![list]).unwrap();
        assert_eq!(device.graphics_queue().usage_tracker().tracked_count(), 1);

        device.flush_all_queues().unwrap();
        assert_eq!(device.graphics_queue().usage_tracker().tracked_count(), 0);
    }

    #[test]
    fn test_frame_context_cycles() {
        let device = null_device();
        let mut frames = FrameContext::new();

        for _ in 0..(MAX_FRAMES_IN_FLIGHT * 2) {
            frames.begin_frame(&device).unwrap();
            let list = device.graphics_queue().open_list().unwrap();
            let value = device.graphics_queue().submit(vec![list]).unwrap();
            frames.end_frame(value);
        }
        assert_eq!(frames.frame_count(), (MAX_FRAMES_IN_FLIGHT * 2) as u64);
    }
}
