//! Null GPU backend for testing and GPU-less environments.
//!
//! This backend performs no GPU work but provides a complete implementation
//! of [`DeviceBackend`] so the lifetime-management core can be exercised
//! without hardware.
//!
//! In the default *auto-complete* mode the simulated GPU finishes every
//! submission instantly: signaling a fence immediately advances its
//! completed value. In *manual* mode ([`NullBackend::manual`]) signals are
//! recorded but completion only advances when the test calls
//! [`NullBackend::complete`], which models a GPU that is still executing
//! earlier submissions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::GraphicsError;
use crate::types::{BufferDescriptor, DescriptorKind, QueueKind, TextureDescriptor};

use super::{
    BarrierOp, DeviceBackend, GpuBuffer, GpuCommandAllocator, GpuCommandList, GpuDescriptorArena,
    GpuFence, GpuQueue, GpuResource, GpuTexture,
};

/// Completion state of a null-backend fence.
///
/// The pair of mutex-guarded counter and condvar is the waitable the fence
/// blocks on; CPU waits park on the condvar rather than spinning.
pub struct NullFenceState {
    value: Mutex<u64>,
    cond: Condvar,
}

impl NullFenceState {
    fn new() -> Self {
        Self {
            value: Mutex::new(0),
            cond: Condvar::new(),
        }
    }

    /// The most recently completed value.
    pub fn value(&self) -> u64 {
        *self.value.lock()
    }

    /// Advance the completed value to `value` (monotone) and wake waiters.
    pub fn complete_to(&self, value: u64) {
        let mut guard = self.value.lock();
        if value > *guard {
            *guard = value;
            self.cond.notify_all();
        }
    }

    /// Park the calling thread until the completed value reaches `target`
    /// or the timeout elapses. Returns `true` if the target was reached.
    pub fn wait(&self, target: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.value.lock();
        while *guard < target {
            if self.cond.wait_until(&mut guard, deadline).timed_out() {
                return *guard >= target;
            }
        }
        true
    }
}

/// Null GPU backend.
pub struct NullBackend {
    auto_complete: bool,
}

impl std::fmt::Debug for NullBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NullBackend")
            .field("auto_complete", &self.auto_complete)
            .finish()
    }
}

impl NullBackend {
    /// Create a backend whose simulated GPU completes work instantly.
    pub fn new() -> Self {
        Self {
            auto_complete: true,
        }
    }

    /// Create a backend whose simulated GPU only completes work when
    /// [`complete`](Self::complete) is called.
    pub fn manual() -> Self {
        Self {
            auto_complete: false,
        }
    }

    /// Advance a fence's completed value, simulating GPU progress.
    ///
    /// Has no effect on fences of other backends.
    pub fn complete(&self, fence: &GpuFence, value: u64) {
        if let GpuFence::Null(state) = fence {
            state.complete_to(value);
        }
    }
}

impl Default for NullBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceBackend for NullBackend {
    fn name(&self) -> &'static str {
        "Null"
    }

    fn get_queue(&self, kind: QueueKind) -> Result<GpuQueue, GraphicsError> {
        Ok(GpuQueue::Null { kind })
    }

    fn create_fence(&self) -> Result<GpuFence, GraphicsError> {
        Ok(GpuFence::Null(Arc::new(NullFenceState::new())))
    }

    fn signal_fence(
        &self,
        _queue: &GpuQueue,
        fence: &GpuFence,
        value: u64,
    ) -> Result<(), GraphicsError> {
        log::trace!("NullBackend: queue signal to {}", value);
        if self.auto_complete {
            self.complete(fence, value);
        }
        Ok(())
    }

    fn completed_value(&self, fence: &GpuFence) -> u64 {
        match fence {
            GpuFence::Null(state) => state.value(),
            #[cfg(feature = "vulkan-backend")]
            GpuFence::Vulkan { .. } => 0,
        }
    }

    fn wait_fence(&self, fence: &GpuFence, value: u64, timeout: Duration) -> bool {
        match fence {
            GpuFence::Null(state) => state.wait(value, timeout),
            #[cfg(feature = "vulkan-backend")]
            GpuFence::Vulkan { .. } => false,
        }
    }

    fn queue_wait_fence(
        &self,
        _queue: &GpuQueue,
        _fence: &GpuFence,
        value: u64,
    ) -> Result<(), GraphicsError> {
        log::trace!("NullBackend: queue wait for {}", value);
        Ok(())
    }

    fn create_command_allocator(
        &self,
        _kind: QueueKind,
    ) -> Result<GpuCommandAllocator, GraphicsError> {
        Ok(GpuCommandAllocator::Null)
    }

    fn reset_command_allocator(
        &self,
        _allocator: &GpuCommandAllocator,
    ) -> Result<(), GraphicsError> {
        Ok(())
    }

    fn create_command_list(
        &self,
        _allocator: &GpuCommandAllocator,
    ) -> Result<GpuCommandList, GraphicsError> {
        Ok(GpuCommandList::Null {
            recording: AtomicBool::new(false),
        })
    }

    fn begin_command_list(
        &self,
        list: &mut GpuCommandList,
        _allocator: &GpuCommandAllocator,
    ) -> Result<(), GraphicsError> {
        if let GpuCommandList::Null { recording } = list {
            recording.store(true, Ordering::Release);
        }
        Ok(())
    }

    fn close_command_list(&self, list: &GpuCommandList) -> Result<(), GraphicsError> {
        if let GpuCommandList::Null { recording } = list {
            debug_assert!(
                recording.load(Ordering::Acquire),
                "closing a command list that is not recording"
            );
            recording.store(false, Ordering::Release);
        }
        Ok(())
    }

    fn cmd_barriers(&self, _list: &GpuCommandList, barriers: &[BarrierOp<'_>]) {
        log::trace!("NullBackend: recording {} barriers", barriers.len());
    }

    fn cmd_copy_buffer(
        &self,
        _list: &GpuCommandList,
        _src: &GpuResource,
        _dst: &GpuResource,
        src_offset: u64,
        dst_offset: u64,
        size: u64,
    ) {
        log::trace!(
            "NullBackend: copy_buffer src_offset={} dst_offset={} size={}",
            src_offset,
            dst_offset,
            size
        );
    }

    fn submit(&self, _queue: &GpuQueue, lists: &[&GpuCommandList]) -> Result<(), GraphicsError> {
        for list in lists {
            if let GpuCommandList::Null { recording } = list {
                debug_assert!(
                    !recording.load(Ordering::Acquire),
                    "submitting a command list that was not closed"
                );
            }
        }
        log::trace!("NullBackend: submitted {} lists", lists.len());
        Ok(())
    }

    fn create_buffer(&self, desc: &BufferDescriptor) -> Result<GpuResource, GraphicsError> {
        log::trace!(
            "NullBackend: creating buffer {:?} (size: {})",
            desc.label,
            desc.size
        );
        Ok(GpuResource::Buffer(GpuBuffer::Null { size: desc.size }))
    }

    fn create_texture(&self, desc: &TextureDescriptor) -> Result<GpuResource, GraphicsError> {
        log::trace!(
            "NullBackend: creating texture {:?} ({}x{})",
            desc.label,
            desc.size.width,
            desc.size.height
        );
        Ok(GpuResource::Texture(GpuTexture::Null {
            mip_level_count: desc.mip_level_count,
            array_layer_count: desc.array_layer_count,
        }))
    }

    fn write_buffer(
        &self,
        _buffer: &GpuResource,
        offset: u64,
        data: &[u8],
    ) -> Result<(), GraphicsError> {
        log::trace!(
            "NullBackend: write_buffer offset={} len={}",
            offset,
            data.len()
        );
        Ok(())
    }

    fn create_descriptor_arena(
        &self,
        kind: DescriptorKind,
        capacity: u32,
        shader_visible: bool,
    ) -> Result<GpuDescriptorArena, GraphicsError> {
        log::trace!(
            "NullBackend: creating descriptor arena {:?} capacity={} shader_visible={}",
            kind,
            capacity,
            shader_visible
        );
        Ok(GpuDescriptorArena::Null { capacity })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_complete_signal() {
        let backend = NullBackend::new();
        let queue = backend.get_queue(QueueKind::Graphics).unwrap();
        let fence = backend.create_fence().unwrap();

        backend.signal_fence(&queue, &fence, 3).unwrap();
        assert_eq!(backend.completed_value(&fence), 3);
    }

    #[test]
    fn test_manual_mode_holds_completion() {
        let backend = NullBackend::manual();
        let queue = backend.get_queue(QueueKind::Graphics).unwrap();
        let fence = backend.create_fence().unwrap();

        backend.signal_fence(&queue, &fence, 5).unwrap();
        assert_eq!(backend.completed_value(&fence), 0);

        backend.complete(&fence, 5);
        assert_eq!(backend.completed_value(&fence), 5);
    }

    #[test]
    fn test_completion_is_monotone() {
        let backend = NullBackend::manual();
        let fence = backend.create_fence().unwrap();

        backend.complete(&fence, 7);
        backend.complete(&fence, 2);
        assert_eq!(backend.completed_value(&fence), 7);
    }

    #[test]
    fn test_wait_unblocks_on_completion() {
        let backend = Arc::new(NullBackend::manual());
        let fence = Arc::new(backend.create_fence().unwrap());

        let waiter = {
            let backend = Arc::clone(&backend);
            let fence = Arc::clone(&fence);
            std::thread::spawn(move || backend.wait_fence(&fence, 4, Duration::from_secs(5)))
        };

        // Give the waiter a moment to park, then complete.
        std::thread::sleep(Duration::from_millis(20));
        backend.complete(&fence, 4);
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_wait_times_out() {
        let backend = NullBackend::manual();
        let fence = backend.create_fence().unwrap();
        assert!(!backend.wait_fence(&fence, 1, Duration::from_millis(10)));
    }
}
