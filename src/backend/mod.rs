//! GPU backend abstraction layer.
//!
//! This module provides a trait-based abstraction over the native GPU API,
//! allowing the lifetime-management core to run against different backends.
//!
//! # Available Backends
//!
//! - `null` (always available): no-op backend that simulates queue
//!   completion; used for tests and GPU-less environments
//! - `vulkan-backend`: native Vulkan backend using ash
//!
//! # Architecture
//!
//! Each backend implements the [`DeviceBackend`] trait, which provides:
//! - Queue lookup and fence signal/wait primitives
//! - Command allocator and command list lifecycle
//! - Resource and descriptor arena creation
//! - Barrier and copy recording

#[cfg(feature = "vulkan-backend")]
pub mod vulkan;

pub mod null;

use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "vulkan-backend")]
use ash::vk;
#[cfg(feature = "vulkan-backend")]
use gpu_allocator::vulkan::{Allocation, Allocator};
#[cfg(feature = "vulkan-backend")]
use parking_lot::Mutex;

use crate::error::GraphicsError;
use crate::types::{
    BufferDescriptor, DescriptorKind, QueueKind, ResourceState, Subresource, TextureDescriptor,
};

use null::NullFenceState;

/// Handle to a GPU command queue.
///
/// Queue handles are lightweight references; the backend owns the native
/// queue objects.
pub enum GpuQueue {
    /// Null backend queue.
    Null { kind: QueueKind },
    /// Vulkan backend queue.
    #[cfg(feature = "vulkan-backend")]
    Vulkan { queue: vk::Queue, family: u32 },
}

impl std::fmt::Debug for GpuQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null { kind } => f.debug_struct("GpuQueue::Null").field("kind", kind).finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { queue, family } => f
                .debug_struct("GpuQueue::Vulkan")
                .field("queue", queue)
                .field("family", family)
                .finish(),
        }
    }
}

/// Handle to a GPU fence usable for CPU-GPU and GPU-GPU synchronization.
///
/// The fence carries a monotonically increasing 64-bit payload; see
/// [`crate::sync::Fence`] for the frontend wrapper that owns the counter.
pub enum GpuFence {
    /// Null backend fence: a condvar-backed completion counter.
    Null(Arc<NullFenceState>),
    /// Vulkan backend fence: a timeline semaphore.
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        semaphore: vk::Semaphore,
    },
}

impl std::fmt::Debug for GpuFence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null(state) => f
                .debug_struct("GpuFence::Null")
                .field("completed", &state.value())
                .finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { semaphore, .. } => f
                .debug_struct("GpuFence::Vulkan")
                .field("semaphore", semaphore)
                .finish_non_exhaustive(),
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuFence {
    fn drop(&mut self) {
        if let GpuFence::Vulkan { device, semaphore } = self {
            unsafe {
                device.destroy_semaphore(*semaphore, None);
            }
        }
    }
}

/// Handle to a reusable command recording allocator.
///
/// An allocator backs the memory of recorded commands and can only be reset
/// once the GPU has finished executing everything recorded through it.
pub enum GpuCommandAllocator {
    /// Null backend allocator.
    Null,
    /// Vulkan backend allocator (a command pool).
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        pool: vk::CommandPool,
    },
}

impl std::fmt::Debug for GpuCommandAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "GpuCommandAllocator::Null"),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { pool, .. } => f
                .debug_struct("GpuCommandAllocator::Vulkan")
                .field("pool", pool)
                .finish_non_exhaustive(),
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuCommandAllocator {
    fn drop(&mut self) {
        if let GpuCommandAllocator::Vulkan { device, pool } = self {
            unsafe {
                device.destroy_command_pool(*pool, None);
            }
        }
    }
}

/// Handle to a transient command recording object.
pub enum GpuCommandList {
    /// Null backend list. Tracks recording state for debug validation.
    Null {
        recording: std::sync::atomic::AtomicBool,
    },
    /// Vulkan backend list (a primary command buffer plus its source pool).
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        pool: vk::CommandPool,
        buffer: vk::CommandBuffer,
    },
}

impl std::fmt::Debug for GpuCommandList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null { recording } => f
                .debug_struct("GpuCommandList::Null")
                .field(
                    "recording",
                    &recording.load(std::sync::atomic::Ordering::Relaxed),
                )
                .finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { buffer, .. } => f
                .debug_struct("GpuCommandList::Vulkan")
                .field("buffer", buffer)
                .finish_non_exhaustive(),
        }
    }
}

// Native command buffers are freed implicitly when their pool is destroyed;
// the pooling layer drops recycled lists before allocators, so no explicit
// free is required here.

/// Handle to a native descriptor arena backing one descriptor heap.
pub enum GpuDescriptorArena {
    /// Null backend arena (capacity bookkeeping only).
    Null { capacity: u32 },
    /// Vulkan backend arena. Render-target and depth-stencil heaps are pure
    /// slot tables (their views live in the textures), so `pool` is absent
    /// for those kinds.
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        pool: Option<vk::DescriptorPool>,
        capacity: u32,
    },
}

impl std::fmt::Debug for GpuDescriptorArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null { capacity } => f
                .debug_struct("GpuDescriptorArena::Null")
                .field("capacity", capacity)
                .finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { pool, capacity, .. } => f
                .debug_struct("GpuDescriptorArena::Vulkan")
                .field("pool", pool)
                .field("capacity", capacity)
                .finish_non_exhaustive(),
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuDescriptorArena {
    fn drop(&mut self) {
        if let GpuDescriptorArena::Vulkan {
            device,
            pool: Some(pool),
            ..
        } = self
        {
            unsafe {
                device.destroy_descriptor_pool(*pool, None);
            }
        }
    }
}

/// Handle to a GPU buffer resource.
pub enum GpuBuffer {
    /// Null backend buffer.
    Null { size: u64 },
    /// Vulkan backend buffer with its memory allocation.
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        buffer: vk::Buffer,
        allocation: Mutex<Option<Allocation>>,
        allocator: Arc<Mutex<Allocator>>,
        size: u64,
    },
}

impl GpuBuffer {
    /// Size of the buffer in bytes.
    pub fn size(&self) -> u64 {
        match self {
            Self::Null { size } => *size,
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { size, .. } => *size,
        }
    }
}

impl std::fmt::Debug for GpuBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null { size } => f.debug_struct("GpuBuffer::Null").field("size", size).finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { buffer, size, .. } => f
                .debug_struct("GpuBuffer::Vulkan")
                .field("buffer", buffer)
                .field("size", size)
                .finish_non_exhaustive(),
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuBuffer {
    fn drop(&mut self) {
        if let GpuBuffer::Vulkan {
            device,
            buffer,
            allocation,
            allocator,
            ..
        } = self
        {
            if let Some(alloc) = allocation.lock().take() {
                if let Err(e) = allocator.lock().free(alloc) {
                    log::error!("Failed to free buffer allocation: {}", e);
                }
            }
            unsafe {
                device.destroy_buffer(*buffer, None);
            }
        }
    }
}

/// Handle to a GPU texture resource.
pub enum GpuTexture {
    /// Null backend texture.
    Null {
        mip_level_count: u32,
        array_layer_count: u32,
    },
    /// Vulkan backend texture (image + default view) with its allocation.
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        image: vk::Image,
        view: vk::ImageView,
        allocation: Mutex<Option<Allocation>>,
        allocator: Arc<Mutex<Allocator>>,
        format: vk::Format,
        mip_level_count: u32,
        array_layer_count: u32,
    },
}

impl GpuTexture {
    /// Number of mip levels.
    pub fn mip_level_count(&self) -> u32 {
        match self {
            Self::Null { mip_level_count, .. } => *mip_level_count,
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { mip_level_count, .. } => *mip_level_count,
        }
    }

    /// Number of array layers.
    pub fn array_layer_count(&self) -> u32 {
        match self {
            Self::Null {
                array_layer_count, ..
            } => *array_layer_count,
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan {
                array_layer_count, ..
            } => *array_layer_count,
        }
    }
}

impl std::fmt::Debug for GpuTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null {
                mip_level_count,
                array_layer_count,
            } => f
                .debug_struct("GpuTexture::Null")
                .field("mips", mip_level_count)
                .field("layers", array_layer_count)
                .finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { image, view, .. } => f
                .debug_struct("GpuTexture::Vulkan")
                .field("image", image)
                .field("view", view)
                .finish_non_exhaustive(),
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuTexture {
    fn drop(&mut self) {
        if let GpuTexture::Vulkan {
            device,
            image,
            view,
            allocation,
            allocator,
            ..
        } = self
        {
            if let Some(alloc) = allocation.lock().take() {
                if let Err(e) = allocator.lock().free(alloc) {
                    log::error!("Failed to free texture allocation: {}", e);
                }
            }
            unsafe {
                device.destroy_image_view(*view, None);
                device.destroy_image(*image, None);
            }
        }
    }
}

/// A GPU resource handle: either a buffer or a texture.
#[derive(Debug)]
pub enum GpuResource {
    Buffer(GpuBuffer),
    Texture(GpuTexture),
}

impl GpuResource {
    /// Get the buffer handle, if this is a buffer.
    pub fn as_buffer(&self) -> Option<&GpuBuffer> {
        match self {
            Self::Buffer(b) => Some(b),
            Self::Texture(_) => None,
        }
    }

    /// Get the texture handle, if this is a texture.
    pub fn as_texture(&self) -> Option<&GpuTexture> {
        match self {
            Self::Texture(t) => Some(t),
            Self::Buffer(_) => None,
        }
    }
}

/// A single resource state transition to record into a command list.
#[derive(Debug)]
pub struct BarrierOp<'a> {
    /// The resource being transitioned.
    pub resource: &'a GpuResource,
    /// Which subresources the transition applies to.
    pub subresource: Subresource,
    /// State the resource is currently in.
    pub before: ResourceState,
    /// State the resource must be in afterwards.
    pub after: ResourceState,
}

/// GPU backend trait abstracting the native API.
///
/// All methods are safe to call from any thread; backends serialize native
/// queue access internally where the API requires it.
pub trait DeviceBackend: Send + Sync + 'static {
    /// Get the backend name.
    fn name(&self) -> &'static str;

    /// Get the queue of the given kind.
    fn get_queue(&self, kind: QueueKind) -> Result<GpuQueue, GraphicsError>;

    /// Create a fence with its counter at zero.
    fn create_fence(&self) -> Result<GpuFence, GraphicsError>;

    /// Instruct `queue` to set the fence to `value` once all previously
    /// submitted work on that queue has completed.
    fn signal_fence(
        &self,
        queue: &GpuQueue,
        fence: &GpuFence,
        value: u64,
    ) -> Result<(), GraphicsError>;

    /// Read the fence's most recently completed value.
    fn completed_value(&self, fence: &GpuFence) -> u64;

    /// Block the calling thread until the fence reaches `value` or the
    /// timeout elapses. Returns `true` if the value was reached.
    fn wait_fence(&self, fence: &GpuFence, value: u64, timeout: Duration) -> bool;

    /// Make `queue` wait (on the GPU timeline, without blocking the CPU)
    /// until the fence reaches `value`.
    fn queue_wait_fence(
        &self,
        queue: &GpuQueue,
        fence: &GpuFence,
        value: u64,
    ) -> Result<(), GraphicsError>;

    /// Create a command allocator for queues of the given kind.
    fn create_command_allocator(
        &self,
        kind: QueueKind,
    ) -> Result<GpuCommandAllocator, GraphicsError>;

    /// Reset an allocator, reclaiming all memory of commands recorded
    /// through it. Only valid once the GPU has finished that work.
    fn reset_command_allocator(
        &self,
        allocator: &GpuCommandAllocator,
    ) -> Result<(), GraphicsError>;

    /// Create a command list bound to the given allocator.
    fn create_command_list(
        &self,
        allocator: &GpuCommandAllocator,
    ) -> Result<GpuCommandList, GraphicsError>;

    /// Begin recording on a (possibly recycled) list, binding it to
    /// `allocator`.
    fn begin_command_list(
        &self,
        list: &mut GpuCommandList,
        allocator: &GpuCommandAllocator,
    ) -> Result<(), GraphicsError>;

    /// Finish recording on a list. Failure is a fatal device error.
    fn close_command_list(&self, list: &GpuCommandList) -> Result<(), GraphicsError>;

    /// Record a batch of state transition barriers into an open list.
    fn cmd_barriers(&self, list: &GpuCommandList, barriers: &[BarrierOp<'_>]);

    /// Record a buffer-to-buffer copy into an open list.
    fn cmd_copy_buffer(
        &self,
        list: &GpuCommandList,
        src: &GpuResource,
        dst: &GpuResource,
        src_offset: u64,
        dst_offset: u64,
        size: u64,
    );

    /// Submit closed lists to a queue for execution in order.
    fn submit(&self, queue: &GpuQueue, lists: &[&GpuCommandList]) -> Result<(), GraphicsError>;

    /// Create a buffer resource.
    fn create_buffer(&self, desc: &BufferDescriptor) -> Result<GpuResource, GraphicsError>;

    /// Create a texture resource.
    fn create_texture(&self, desc: &TextureDescriptor) -> Result<GpuResource, GraphicsError>;

    /// Write data into a CPU-visible buffer at the given offset.
    fn write_buffer(
        &self,
        buffer: &GpuResource,
        offset: u64,
        data: &[u8],
    ) -> Result<(), GraphicsError>;

    /// Create a native descriptor arena of fixed capacity.
    fn create_descriptor_arena(
        &self,
        kind: DescriptorKind,
        capacity: u32,
        shader_visible: bool,
    ) -> Result<GpuDescriptorArena, GraphicsError>;
}

/// Selects and creates the best available backend.
///
/// Tries Vulkan first when compiled in, falling back to the null backend.
pub fn create_backend() -> Arc<dyn DeviceBackend> {
    #[cfg(feature = "vulkan-backend")]
    {
        match vulkan::VulkanBackend::new() {
            Ok(backend) => {
                log::info!("Using Vulkan backend (ash)");
                return Arc::new(backend);
            }
            Err(e) => {
                log::warn!("Failed to create Vulkan backend: {}", e);
            }
        }
    }

    log::info!("Using null backend");
    Arc::new(null::NullBackend::new())
}
