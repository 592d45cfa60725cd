//! Common types shared across the GPU core.
//!
//! This module defines the backend-agnostic vocabulary of the engine:
//! resource states, subresource addressing, descriptor heap kinds, queue
//! kinds, and the resource descriptors used at creation time.

use std::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;

/// States a GPU resource can be in.
///
/// A transition between two states requires a barrier on the recording
/// command list. States abstract over the native layout/access/stage
/// triples of the underlying API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResourceState {
    /// Neutral state usable by any queue. Initial state of new resources.
    #[default]
    Common,
    /// Bound as a color render target.
    RenderTarget,
    /// Bound as a depth target with writes enabled.
    DepthWrite,
    /// Bound as a read-only depth target.
    DepthRead,
    /// Read from shaders (sampled image / uniform data).
    ShaderResource,
    /// Read-write access from shaders (storage image / buffer).
    UnorderedAccess,
    /// Source of a copy operation.
    CopySource,
    /// Destination of a copy operation.
    CopyDest,
    /// Ready for presentation to a swapchain.
    Present,
}

/// Addresses either every subresource of a resource or a single one.
///
/// Subresources are indexed mip-major within each array layer:
/// `index = mip + layer * mip_level_count`. Buffers have exactly one
/// subresource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subresource {
    /// All subresources at once.
    All,
    /// A single subresource by flat index.
    Index(u32),
}

/// The kind of work a command queue accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    /// Graphics + compute + copy.
    Graphics,
    /// Copy-only queue used for asynchronous uploads.
    Transfer,
}

/// The kind of descriptor a heap stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    /// Shader-readable resource views (sampled images, uniform data).
    Resource,
    /// Sampler objects.
    Sampler,
    /// Color render-target views.
    RenderTarget,
    /// Depth-stencil views.
    DepthStencil,
}

/// Whether a descriptor heap can be bound during draws or only staged from
/// the CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorVisibility {
    /// CPU-side staging heap; never bound directly.
    CpuOnly,
    /// Shader-visible heap bindable during command recording.
    ShaderVisible,
}

bitflags! {
    /// Usage flags for buffer resources.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        /// Can be the source of copy operations.
        const COPY_SRC = 1 << 0;
        /// Can be the destination of copy operations.
        const COPY_DST = 1 << 1;
        /// Can be bound as a uniform/constant buffer.
        const UNIFORM = 1 << 2;
        /// Can be bound as a storage buffer.
        const STORAGE = 1 << 3;
        /// Can be bound as a vertex buffer.
        const VERTEX = 1 << 4;
        /// Can be bound as an index buffer.
        const INDEX = 1 << 5;
        /// CPU-writable upload memory, persistently mapped.
        const MAP_WRITE = 1 << 6;
        /// CPU-readable readback memory.
        const MAP_READ = 1 << 7;
    }
}

bitflags! {
    /// Usage flags for texture resources.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        /// Can be rendered to (color or depth attachment).
        const RENDER_ATTACHMENT = 1 << 0;
        /// Can be sampled from shaders.
        const TEXTURE_BINDING = 1 << 1;
        /// Can be bound for read-write shader access.
        const STORAGE_BINDING = 1 << 2;
        /// Can be the source of copy operations.
        const COPY_SRC = 1 << 3;
        /// Can be the destination of copy operations.
        const COPY_DST = 1 << 4;
    }
}

/// Texture pixel formats supported by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Bgra8Unorm,
    Rgba16Float,
    Depth32Float,
}

impl TextureFormat {
    /// Check if this is a depth format.
    pub fn is_depth(self) -> bool {
        matches!(self, Self::Depth32Float)
    }
}

/// Three-dimensional extent of a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Extent3d {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl Extent3d {
    /// Create a 2D extent with depth 1.
    pub fn new_2d(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            depth: 1,
        }
    }
}

/// Describes a buffer resource to be created.
#[derive(Debug, Clone)]
pub struct BufferDescriptor {
    /// Size of the buffer in bytes.
    pub size: u64,
    /// Usage flags.
    pub usage: BufferUsage,
    /// Optional debug label.
    pub label: Option<String>,
}

impl BufferDescriptor {
    /// Create a new buffer descriptor.
    pub fn new(size: u64, usage: BufferUsage) -> Self {
        Self {
            size,
            usage,
            label: None,
        }
    }

    /// Set a debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Describes a texture resource to be created.
#[derive(Debug, Clone)]
pub struct TextureDescriptor {
    /// Texture dimensions.
    pub size: Extent3d,
    /// Pixel format.
    pub format: TextureFormat,
    /// Usage flags.
    pub usage: TextureUsage,
    /// Number of mip levels.
    pub mip_level_count: u32,
    /// Number of array layers.
    pub array_layer_count: u32,
    /// Optional debug label.
    pub label: Option<String>,
}

impl TextureDescriptor {
    /// Create a new 2D texture descriptor with one mip and one layer.
    pub fn new_2d(width: u32, height: u32, format: TextureFormat, usage: TextureUsage) -> Self {
        Self {
            size: Extent3d::new_2d(width, height),
            format,
            usage,
            mip_level_count: 1,
            array_layer_count: 1,
            label: None,
        }
    }

    /// Set the mip level count.
    pub fn with_mip_levels(mut self, mips: u32) -> Self {
        self.mip_level_count = mips;
        self
    }

    /// Set the array layer count.
    pub fn with_array_layers(mut self, layers: u32) -> Self {
        self.array_layer_count = layers;
        self
    }

    /// Set a debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Total number of subresources (mips × layers).
    pub fn subresource_count(&self) -> u32 {
        self.mip_level_count * self.array_layer_count
    }
}

/// Unique identifier of a tracked GPU object within one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u64);

impl ResourceId {
    /// Allocate the next process-unique id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw id value.
    pub fn raw(self) -> u64 {
        self.0
    }
}
