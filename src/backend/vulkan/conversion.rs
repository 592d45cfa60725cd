//! Conversions from core types to Vulkan types.

use ash::vk;

use crate::types::{BufferUsage, DescriptorKind, ResourceState, TextureFormat, TextureUsage};

/// Convert a resource state to the Vulkan image layout it implies.
pub fn image_layout(state: ResourceState) -> vk::ImageLayout {
    match state {
        ResourceState::Common => vk::ImageLayout::GENERAL,
        ResourceState::RenderTarget => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ResourceState::DepthWrite => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ResourceState::DepthRead => vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
        ResourceState::ShaderResource => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ResourceState::UnorderedAccess => vk::ImageLayout::GENERAL,
        ResourceState::CopySource => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        ResourceState::CopyDest => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        ResourceState::Present => vk::ImageLayout::PRESENT_SRC_KHR,
    }
}

/// Access mask implied by a resource state.
pub fn access_mask(state: ResourceState) -> vk::AccessFlags {
    match state {
        ResourceState::Common => vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
        ResourceState::RenderTarget => vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ResourceState::DepthWrite => vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ResourceState::DepthRead => vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
        ResourceState::ShaderResource => vk::AccessFlags::SHADER_READ,
        ResourceState::UnorderedAccess => {
            vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE
        }
        ResourceState::CopySource => vk::AccessFlags::TRANSFER_READ,
        ResourceState::CopyDest => vk::AccessFlags::TRANSFER_WRITE,
        ResourceState::Present => vk::AccessFlags::empty(),
    }
}

/// Pipeline stage implied by a resource state.
pub fn stage_mask(state: ResourceState) -> vk::PipelineStageFlags {
    match state {
        ResourceState::Common => vk::PipelineStageFlags::ALL_COMMANDS,
        ResourceState::RenderTarget => vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ResourceState::DepthWrite => vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
        ResourceState::DepthRead => vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        ResourceState::ShaderResource => vk::PipelineStageFlags::FRAGMENT_SHADER,
        ResourceState::UnorderedAccess => vk::PipelineStageFlags::COMPUTE_SHADER,
        ResourceState::CopySource => vk::PipelineStageFlags::TRANSFER,
        ResourceState::CopyDest => vk::PipelineStageFlags::TRANSFER,
        ResourceState::Present => vk::PipelineStageFlags::BOTTOM_OF_PIPE,
    }
}

/// Convert a texture format to its Vulkan equivalent.
pub fn texture_format(format: TextureFormat) -> vk::Format {
    match format {
        TextureFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        TextureFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        TextureFormat::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        TextureFormat::Depth32Float => vk::Format::D32_SFLOAT,
    }
}

/// Aspect mask of a Vulkan format.
pub fn aspect_mask(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D32_SFLOAT | vk::Format::D16_UNORM => vk::ImageAspectFlags::DEPTH,
        vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::COLOR,
    }
}

/// Convert buffer usage flags to Vulkan buffer usage flags.
pub fn buffer_usage(usage: BufferUsage) -> vk::BufferUsageFlags {
    let mut flags = vk::BufferUsageFlags::empty();
    if usage.contains(BufferUsage::COPY_SRC) {
        flags |= vk::BufferUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(BufferUsage::COPY_DST) {
        flags |= vk::BufferUsageFlags::TRANSFER_DST;
    }
    if usage.contains(BufferUsage::UNIFORM) {
        flags |= vk::BufferUsageFlags::UNIFORM_BUFFER;
    }
    if usage.contains(BufferUsage::STORAGE) {
        flags |= vk::BufferUsageFlags::STORAGE_BUFFER;
    }
    if usage.contains(BufferUsage::VERTEX) {
        flags |= vk::BufferUsageFlags::VERTEX_BUFFER;
    }
    if usage.contains(BufferUsage::INDEX) {
        flags |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    flags
}

/// Convert texture usage flags to Vulkan image usage flags.
pub fn image_usage(usage: TextureUsage, format: TextureFormat) -> vk::ImageUsageFlags {
    let mut flags = vk::ImageUsageFlags::empty();
    if usage.contains(TextureUsage::RENDER_ATTACHMENT) {
        if format.is_depth() {
            flags |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
        } else {
            flags |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
        }
    }
    if usage.contains(TextureUsage::TEXTURE_BINDING) {
        flags |= vk::ImageUsageFlags::SAMPLED;
    }
    if usage.contains(TextureUsage::STORAGE_BINDING) {
        flags |= vk::ImageUsageFlags::STORAGE;
    }
    if usage.contains(TextureUsage::COPY_SRC) {
        flags |= vk::ImageUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(TextureUsage::COPY_DST) {
        flags |= vk::ImageUsageFlags::TRANSFER_DST;
    }
    flags
}

/// Descriptor type backing a heap kind, if the kind has a native pool.
///
/// Render-target and depth-stencil heaps are slot tables on this backend;
/// their image views live in the textures themselves.
pub fn descriptor_type(kind: DescriptorKind) -> Option<vk::DescriptorType> {
    match kind {
        DescriptorKind::Resource => Some(vk::DescriptorType::COMBINED_IMAGE_SAMPLER),
        DescriptorKind::Sampler => Some(vk::DescriptorType::SAMPLER),
        DescriptorKind::RenderTarget | DescriptorKind::DepthStencil => None,
    }
}
