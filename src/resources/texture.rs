//! Texture resources.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::{DeviceBackend, GpuResource};
use crate::descriptors::{DescriptorAllocation, DescriptorHeapManager};
use crate::error::GraphicsResult;
use crate::resources::TrackedResource;
use crate::tracking::ResourceStateRecord;
use crate::types::{
    DescriptorKind, DescriptorVisibility, Extent3d, ResourceId, ResourceState, TextureDescriptor,
    TextureFormat, TextureUsage,
};

/// A GPU texture with its cached authoritative state and view descriptors.
///
/// Subresources are indexed mip-major within each array layer. View
/// descriptor slots are owned by the texture: when the usage tracker drops
/// its last reference after the final fence completes, the slots return to
/// their heaps.
pub struct Texture {
    id: ResourceId,
    gpu: GpuResource,
    size: Extent3d,
    format: TextureFormat,
    usage: TextureUsage,
    mip_level_count: u32,
    array_layer_count: u32,
    label: Option<String>,
    state: Mutex<ResourceStateRecord>,
    /// Shader-resource view slot, when the texture is shader-readable.
    srv: Option<DescriptorAllocation>,
    /// Render-target or depth-stencil view slot, when attachable.
    rtv: Option<DescriptorAllocation>,
    /// Declared after `gpu`: the native image must be released while the
    /// backend (and its device) is still alive.
    #[allow(dead_code)]
    backend: Arc<dyn DeviceBackend>,
}

impl Texture {
    /// Create a texture without view descriptors, starting in the `Common`
    /// state.
    pub fn new(
        backend: &Arc<dyn DeviceBackend>,
        desc: TextureDescriptor,
    ) -> GraphicsResult<Arc<Self>> {
        Self::build(backend, desc, None)
    }

    /// Create a texture and allocate its view descriptors from `heaps`
    /// according to the usage flags.
    pub fn with_views(
        backend: &Arc<dyn DeviceBackend>,
        heaps: &DescriptorHeapManager,
        desc: TextureDescriptor,
    ) -> GraphicsResult<Arc<Self>> {
        Self::build(backend, desc, Some(heaps))
    }

    fn build(
        backend: &Arc<dyn DeviceBackend>,
        desc: TextureDescriptor,
        heaps: Option<&DescriptorHeapManager>,
    ) -> GraphicsResult<Arc<Self>> {
        let gpu = backend.create_texture(&desc)?;

        let mut srv = None;
        let mut rtv = None;
        if let Some(heaps) = heaps {
            if desc.usage.contains(TextureUsage::TEXTURE_BINDING) {
                srv = Some(heaps.allocate(
                    DescriptorKind::Resource,
                    DescriptorVisibility::ShaderVisible,
                    1,
                )?);
            }
            if desc.usage.contains(TextureUsage::RENDER_ATTACHMENT) {
                let kind = if desc.format.is_depth() {
                    DescriptorKind::DepthStencil
                } else {
                    DescriptorKind::RenderTarget
                };
                rtv = Some(heaps.allocate(kind, DescriptorVisibility::CpuOnly, 1)?);
            }
        }

        Ok(Arc::new(Self {
            id: ResourceId::next(),
            gpu,
            size: desc.size,
            format: desc.format,
            usage: desc.usage,
            mip_level_count: desc.mip_level_count,
            array_layer_count: desc.array_layer_count,
            label: desc.label,
            state: Mutex::new(ResourceStateRecord::new(
                ResourceState::Common,
                desc.mip_level_count * desc.array_layer_count,
            )),
            srv,
            rtv,
            backend: Arc::clone(backend),
        }))
    }

    /// Texture dimensions.
    pub fn size(&self) -> Extent3d {
        self.size
    }

    /// Pixel format.
    pub fn format(&self) -> TextureFormat {
        self.format
    }

    /// Usage flags the texture was created with.
    pub fn usage(&self) -> TextureUsage {
        self.usage
    }

    /// Number of mip levels.
    pub fn mip_level_count(&self) -> u32 {
        self.mip_level_count
    }

    /// Number of array layers.
    pub fn array_layer_count(&self) -> u32 {
        self.array_layer_count
    }

    /// Shader-resource view slot, if one was allocated.
    pub fn srv(&self) -> Option<&DescriptorAllocation> {
        self.srv.as_ref()
    }

    /// Render-target / depth-stencil view slot, if one was allocated.
    pub fn rtv(&self) -> Option<&DescriptorAllocation> {
        self.rtv.as_ref()
    }

    /// Flat subresource index of a (mip, layer) pair.
    pub fn subresource_index(&self, mip: u32, layer: u32) -> u32 {
        mip + layer * self.mip_level_count
    }
}

impl TrackedResource for Texture {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn gpu(&self) -> &GpuResource {
        &self.gpu
    }

    fn state(&self) -> &Mutex<ResourceStateRecord> {
        &self.state
    }

    fn subresource_count(&self) -> u32 {
        self.mip_level_count * self.array_layer_count
    }

    fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }
}

impl std::fmt::Debug for Texture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture")
            .field("id", &self.id)
            .field("size", &self.size)
            .field("format", &self.format)
            .field("mips", &self.mip_level_count)
            .field("layers", &self.array_layer_count)
            .field("label", &self.label)
            .finish()
    }
}
