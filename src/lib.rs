//! # Cinnabar Graphics
//!
//! GPU resource lifetime and synchronization core for the Cinnabar
//! rendering engine.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`Fence`] - Monotonic fence synchronizing one queue with the CPU
//! - [`CommandQueue`] / [`CommandList`] - Submission with pooled allocators
//! - [`DescriptorHeap`] / [`DescriptorHeapManager`] - Free-list descriptor
//!   allocation with on-demand growth
//! - [`ResourceStateController`] - Deduplicated, batched state barriers
//!   with deferred preamble resolution
//! - [`ResourceUsageTracker`] - Fence-keyed deferred deletion
//! - Backends: Vulkan (ash) and a null backend for GPU-less testing
//!
//! ## Example
//!
//! ```
//! use cinnabar_graphics::{
//!     BufferDescriptor, BufferUsage, GraphicsDevice, ResourceState,
//! };
//!
//! let device = GraphicsDevice::create().unwrap();
//! let buffer = device
//!     .create_buffer(BufferDescriptor::new(1024, BufferUsage::COPY_DST))
//!     .unwrap();
//!
//! let mut list = device.graphics_queue().open_list().unwrap();
//! list.transition_buffer(&buffer, ResourceState::CopyDest);
//! let fence_value = device.graphics_queue().submit(vec![list]).unwrap();
//!
//! device.graphics_queue().wait_on_cpu(fence_value).unwrap();
//! device.perform_resources_deletion();
//! ```

pub mod backend;
pub mod command;
pub mod descriptors;
pub mod device;
pub mod error;
pub mod resources;
pub mod sync;
pub mod tracking;
pub mod types;

// Re-export main types for convenience
pub use backend::{create_backend, DeviceBackend};
pub use command::{CommandAllocatorPool, CommandList, CommandQueue};
pub use descriptors::{DescriptorAllocation, DescriptorHeap, DescriptorHeapManager};
pub use device::{FrameContext, GraphicsDevice, MAX_FRAMES_IN_FLIGHT};
pub use error::{GraphicsError, GraphicsResult};
pub use resources::{Buffer, Texture, TrackedResource, UploadRing};
pub use sync::Fence;
pub use tracking::{BarrierBatch, ResourceStateController, ResourceStateRecord, ResourceUsageTracker};
pub use types::{
    BufferDescriptor, BufferUsage, DescriptorKind, DescriptorVisibility, Extent3d, QueueKind,
    ResourceId, ResourceState, Subresource, TextureDescriptor, TextureFormat, TextureUsage,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the graphics subsystem.
///
/// This should be called before using any graphics functionality.
pub fn init() {
    log::info!("Cinnabar Graphics v{} initialized", VERSION);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_null_device_roundtrip() {
        let device =
            GraphicsDevice::with_backend(std::sync::Arc::new(backend::null::NullBackend::new()))
                .unwrap();
        let list = device.graphics_queue().open_list().unwrap();
        let value = device.graphics_queue().submit(vec![list]).unwrap();
        assert!(device.graphics_queue().is_complete(value));
    }
}
