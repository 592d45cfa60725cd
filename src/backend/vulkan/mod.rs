//! Native Vulkan backend using ash.
//!
//! The backend brings the device up headless: no surface, no swapchain —
//! presentation belongs to the windowing layer. The monotonic fence
//! counter maps onto Vulkan timeline semaphores, command allocators onto
//! command pools, and descriptor arenas onto descriptor pools.
//!
//! The loader is resolved dynamically, so machines without a Vulkan
//! runtime fail backend creation gracefully instead of failing to link.

mod conversion;

pub use conversion::*;

use std::ffi::CString;
use std::mem::ManuallyDrop;
use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use gpu_allocator::vulkan::{AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc};
use parking_lot::Mutex;

use crate::error::GraphicsError;
use crate::types::{
    BufferDescriptor, BufferUsage, DescriptorKind, QueueKind, Subresource, TextureDescriptor,
};

use super::{
    BarrierOp, DeviceBackend, GpuBuffer, GpuCommandAllocator, GpuCommandList, GpuDescriptorArena,
    GpuFence, GpuQueue, GpuResource, GpuTexture,
};

/// Required Vulkan API version; timeline semaphores are core in 1.2.
const REQUIRED_API_VERSION: u32 = vk::make_api_version(0, 1, 2, 0);

/// Native Vulkan backend.
pub struct VulkanBackend {
    #[allow(dead_code)]
    entry: ash::Entry,
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    graphics_queue: vk::Queue,
    graphics_family: u32,
    transfer_queue: vk::Queue,
    transfer_family: u32,
    /// Dropped by hand before the device in [`Drop`]; the allocator frees
    /// its memory blocks against a live device.
    allocator: ManuallyDrop<Arc<Mutex<Allocator>>>,
    /// vkQueueSubmit requires external synchronization per queue; one lock
    /// covers both queues since they may alias on single-family devices.
    submit_lock: Mutex<()>,
}

impl std::fmt::Debug for VulkanBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanBackend")
            .field("graphics_family", &self.graphics_family)
            .field("transfer_family", &self.transfer_family)
            .finish_non_exhaustive()
    }
}

impl VulkanBackend {
    /// Create the backend: load the Vulkan library, create an instance,
    /// pick a physical device with timeline semaphore support, and create
    /// the logical device with its queues.
    pub fn new() -> Result<Self, GraphicsError> {
        let entry = unsafe { ash::Entry::load() }.map_err(|e| {
            GraphicsError::InitializationFailed(format!("Failed to load Vulkan library: {}", e))
        })?;

        let instance = create_instance(&entry)?;

        let physical_device = match select_physical_device(&instance) {
            Ok(device) => device,
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                return Err(e);
            }
        };

        let (graphics_family, transfer_family) =
            match find_queue_families(&instance, physical_device) {
                Ok(families) => families,
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            };

        let device = match create_logical_device(
            &instance,
            physical_device,
            graphics_family,
            transfer_family,
        ) {
            Ok(device) => device,
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                return Err(e);
            }
        };

        let graphics_queue = unsafe { device.get_device_queue(graphics_family, 0) };
        let transfer_queue = unsafe { device.get_device_queue(transfer_family, 0) };

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: gpu_allocator::AllocationSizes::default(),
        })
        .map_err(|e| {
            GraphicsError::InitializationFailed(format!("Failed to create memory allocator: {}", e))
        })?;

        log::info!(
            "Vulkan device ready (graphics family {}, transfer family {})",
            graphics_family,
            transfer_family
        );

        Ok(Self {
            entry,
            instance,
            physical_device,
            device,
            graphics_queue,
            graphics_family,
            transfer_queue,
            transfer_family,
            allocator: ManuallyDrop::new(Arc::new(Mutex::new(allocator))),
            submit_lock: Mutex::new(()),
        })
    }

    /// The logical device handle.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// The physical device handle.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    fn queue_family(&self, kind: QueueKind) -> u32 {
        match kind {
            QueueKind::Graphics => self.graphics_family,
            QueueKind::Transfer => self.transfer_family,
        }
    }

    fn submit_with_timeline(
        &self,
        queue: vk::Queue,
        submit_info: vk::SubmitInfo<'_>,
    ) -> Result<(), GraphicsError> {
        let _guard = self.submit_lock.lock();
        unsafe {
            self.device
                .queue_submit(queue, &[submit_info], vk::Fence::null())
        }
        .map_err(|e| GraphicsError::Internal(format!("Failed to submit to queue: {:?}", e)))
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
        }
        // All resources created through this backend must have been
        // released by now, so this is the last reference: the allocator
        // frees its memory blocks here, while the device is still alive.
        unsafe {
            ManuallyDrop::drop(&mut self.allocator);
        }
        unsafe {
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

impl DeviceBackend for VulkanBackend {
    fn name(&self) -> &'static str {
        "Vulkan"
    }

    fn get_queue(&self, kind: QueueKind) -> Result<GpuQueue, GraphicsError> {
        let (queue, family) = match kind {
            QueueKind::Graphics => (self.graphics_queue, self.graphics_family),
            QueueKind::Transfer => (self.transfer_queue, self.transfer_family),
        };
        Ok(GpuQueue::Vulkan { queue, family })
    }

    fn create_fence(&self) -> Result<GpuFence, GraphicsError> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(0);
        let create_info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);

        let semaphore =
            unsafe { self.device.create_semaphore(&create_info, None) }.map_err(|e| {
                GraphicsError::InitializationFailed(format!("Failed to create fence: {:?}", e))
            })?;

        Ok(GpuFence::Vulkan {
            device: self.device.clone(),
            semaphore,
        })
    }

    fn signal_fence(
        &self,
        queue: &GpuQueue,
        fence: &GpuFence,
        value: u64,
    ) -> Result<(), GraphicsError> {
        let (GpuQueue::Vulkan { queue, .. }, GpuFence::Vulkan { semaphore, .. }) = (queue, fence)
        else {
            return Err(GraphicsError::InvalidParameter(
                "handle from another backend".to_string(),
            ));
        };

        let semaphores = [*semaphore];
        let values = [value];
        let mut timeline =
            vk::TimelineSemaphoreSubmitInfo::default().signal_semaphore_values(&values);
        let submit_info = vk::SubmitInfo::default()
            .signal_semaphores(&semaphores)
            .push_next(&mut timeline);

        self.submit_with_timeline(*queue, submit_info)
    }

    fn completed_value(&self, fence: &GpuFence) -> u64 {
        let GpuFence::Vulkan { semaphore, .. } = fence else {
            return 0;
        };
        match unsafe { self.device.get_semaphore_counter_value(*semaphore) } {
            Ok(value) => value,
            Err(e) => {
                log::error!("Failed to query fence value: {:?}", e);
                0
            }
        }
    }

    fn wait_fence(&self, fence: &GpuFence, value: u64, timeout: Duration) -> bool {
        let GpuFence::Vulkan { semaphore, .. } = fence else {
            return false;
        };
        let semaphores = [*semaphore];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);

        let timeout_ns = timeout.as_nanos().min(u64::MAX as u128) as u64;
        match unsafe { self.device.wait_semaphores(&wait_info, timeout_ns) } {
            Ok(()) => true,
            Err(vk::Result::TIMEOUT) => false,
            Err(e) => {
                log::error!("Fence wait failed: {:?}", e);
                false
            }
        }
    }

    fn queue_wait_fence(
        &self,
        queue: &GpuQueue,
        fence: &GpuFence,
        value: u64,
    ) -> Result<(), GraphicsError> {
        let (GpuQueue::Vulkan { queue, .. }, GpuFence::Vulkan { semaphore, .. }) = (queue, fence)
        else {
            return Err(GraphicsError::InvalidParameter(
                "handle from another backend".to_string(),
            ));
        };

        let semaphores = [*semaphore];
        let values = [value];
        let stages = [vk::PipelineStageFlags::ALL_COMMANDS];
        let mut timeline =
            vk::TimelineSemaphoreSubmitInfo::default().wait_semaphore_values(&values);
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&semaphores)
            .wait_dst_stage_mask(&stages)
            .push_next(&mut timeline);

        self.submit_with_timeline(*queue, submit_info)
    }

    fn create_command_allocator(
        &self,
        kind: QueueKind,
    ) -> Result<GpuCommandAllocator, GraphicsError> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(self.queue_family(kind))
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let pool = unsafe { self.device.create_command_pool(&pool_info, None) }.map_err(|e| {
            GraphicsError::InitializationFailed(format!("Failed to create command pool: {:?}", e))
        })?;

        Ok(GpuCommandAllocator::Vulkan {
            device: self.device.clone(),
            pool,
        })
    }

    fn reset_command_allocator(
        &self,
        allocator: &GpuCommandAllocator,
    ) -> Result<(), GraphicsError> {
        let GpuCommandAllocator::Vulkan { pool, .. } = allocator else {
            return Ok(());
        };
        unsafe {
            self.device
                .reset_command_pool(*pool, vk::CommandPoolResetFlags::empty())
        }
        .map_err(|e| GraphicsError::Internal(format!("Failed to reset command pool: {:?}", e)))
    }

    fn create_command_list(
        &self,
        allocator: &GpuCommandAllocator,
    ) -> Result<GpuCommandList, GraphicsError> {
        let GpuCommandAllocator::Vulkan { pool, .. } = allocator else {
            return Err(GraphicsError::InvalidParameter(
                "handle from another backend".to_string(),
            ));
        };

        let buffer = allocate_command_buffer(&self.device, *pool)?;
        Ok(GpuCommandList::Vulkan {
            device: self.device.clone(),
            pool: *pool,
            buffer,
        })
    }

    fn begin_command_list(
        &self,
        list: &mut GpuCommandList,
        allocator: &GpuCommandAllocator,
    ) -> Result<(), GraphicsError> {
        let GpuCommandAllocator::Vulkan {
            pool: target_pool, ..
        } = allocator
        else {
            return Err(GraphicsError::InvalidParameter(
                "handle from another backend".to_string(),
            ));
        };
        let GpuCommandList::Vulkan { pool, buffer, .. } = list else {
            return Err(GraphicsError::InvalidParameter(
                "handle from another backend".to_string(),
            ));
        };

        // Command buffers cannot move between pools; a recycled list from
        // another allocator gets a fresh native buffer here.
        if *pool != *target_pool {
            unsafe {
                self.device.free_command_buffers(*pool, &[*buffer]);
            }
            *buffer = allocate_command_buffer(&self.device, *target_pool)?;
            *pool = *target_pool;
        }

        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(*buffer, &begin_info) }.map_err(|e| {
            GraphicsError::Internal(format!("Failed to begin command buffer: {:?}", e))
        })
    }

    fn close_command_list(&self, list: &GpuCommandList) -> Result<(), GraphicsError> {
        let GpuCommandList::Vulkan { buffer, .. } = list else {
            return Ok(());
        };
        unsafe { self.device.end_command_buffer(*buffer) }
            .map_err(|e| GraphicsError::Internal(format!("Failed to end command buffer: {:?}", e)))
    }

    fn cmd_barriers(&self, list: &GpuCommandList, barriers: &[BarrierOp<'_>]) {
        let GpuCommandList::Vulkan { buffer: cmd, .. } = list else {
            return;
        };

        let mut image_barriers = Vec::new();
        let mut buffer_barriers = Vec::new();
        let mut src_stage = vk::PipelineStageFlags::empty();
        let mut dst_stage = vk::PipelineStageFlags::empty();

        for op in barriers {
            src_stage |= stage_mask(op.before);
            dst_stage |= stage_mask(op.after);

            match op.resource {
                GpuResource::Texture(GpuTexture::Vulkan {
                    image,
                    format,
                    mip_level_count,
                    ..
                }) => {
                    let range = match op.subresource {
                        Subresource::All => vk::ImageSubresourceRange {
                            aspect_mask: aspect_mask(*format),
                            base_mip_level: 0,
                            level_count: vk::REMAINING_MIP_LEVELS,
                            base_array_layer: 0,
                            layer_count: vk::REMAINING_ARRAY_LAYERS,
                        },
                        Subresource::Index(index) => vk::ImageSubresourceRange {
                            aspect_mask: aspect_mask(*format),
                            base_mip_level: index % mip_level_count,
                            level_count: 1,
                            base_array_layer: index / mip_level_count,
                            layer_count: 1,
                        },
                    };
                    image_barriers.push(
                        vk::ImageMemoryBarrier::default()
                            .old_layout(image_layout(op.before))
                            .new_layout(image_layout(op.after))
                            .src_access_mask(access_mask(op.before))
                            .dst_access_mask(access_mask(op.after))
                            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                            .image(*image)
                            .subresource_range(range),
                    );
                }
                GpuResource::Buffer(GpuBuffer::Vulkan { buffer, .. }) => {
                    buffer_barriers.push(
                        vk::BufferMemoryBarrier::default()
                            .src_access_mask(access_mask(op.before))
                            .dst_access_mask(access_mask(op.after))
                            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                            .buffer(*buffer)
                            .offset(0)
                            .size(vk::WHOLE_SIZE),
                    );
                }
                _ => {}
            }
        }

        if image_barriers.is_empty() && buffer_barriers.is_empty() {
            return;
        }

        unsafe {
            self.device.cmd_pipeline_barrier(
                *cmd,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &buffer_barriers,
                &image_barriers,
            );
        }
    }

    fn cmd_copy_buffer(
        &self,
        list: &GpuCommandList,
        src: &GpuResource,
        dst: &GpuResource,
        src_offset: u64,
        dst_offset: u64,
        size: u64,
    ) {
        let (
            GpuCommandList::Vulkan { buffer: cmd, .. },
            GpuResource::Buffer(GpuBuffer::Vulkan { buffer: src, .. }),
            GpuResource::Buffer(GpuBuffer::Vulkan { buffer: dst, .. }),
        ) = (list, src, dst)
        else {
            return;
        };

        let region = vk::BufferCopy::default()
            .src_offset(src_offset)
            .dst_offset(dst_offset)
            .size(size);
        unsafe {
            self.device.cmd_copy_buffer(*cmd, *src, *dst, &[region]);
        }
    }

    fn submit(&self, queue: &GpuQueue, lists: &[&GpuCommandList]) -> Result<(), GraphicsError> {
        let GpuQueue::Vulkan { queue, .. } = queue else {
            return Err(GraphicsError::InvalidParameter(
                "handle from another backend".to_string(),
            ));
        };

        let buffers: Vec<vk::CommandBuffer> = lists
            .iter()
            .filter_map(|list| {
                if let GpuCommandList::Vulkan { buffer, .. } = list {
                    Some(*buffer)
                } else {
                    None
                }
            })
            .collect();

        let submit_info = vk::SubmitInfo::default().command_buffers(&buffers);
        let _guard = self.submit_lock.lock();
        unsafe {
            self.device
                .queue_submit(*queue, &[submit_info], vk::Fence::null())
        }
        .map_err(|e| GraphicsError::Internal(format!("Failed to submit command buffers: {:?}", e)))
    }

    fn create_buffer(&self, desc: &BufferDescriptor) -> Result<GpuResource, GraphicsError> {
        let usage = buffer_usage(desc.usage);

        // Buffers the CPU writes (upload rings, staging) live in
        // host-visible memory; readback buffers in host-cached memory;
        // everything else on the device.
        let location = if desc.usage.contains(BufferUsage::MAP_READ) {
            gpu_allocator::MemoryLocation::GpuToCpu
        } else if desc.usage.contains(BufferUsage::MAP_WRITE) {
            gpu_allocator::MemoryLocation::CpuToGpu
        } else {
            gpu_allocator::MemoryLocation::GpuOnly
        };

        let buffer_info = vk::BufferCreateInfo::default()
            .size(desc.size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { self.device.create_buffer(&buffer_info, None) }.map_err(|e| {
            GraphicsError::ResourceCreationFailed(format!("Failed to create buffer: {:?}", e))
        })?;

        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let allocation = self
            .allocator
            .lock()
            .allocate(&AllocationCreateDesc {
                name: desc.label.as_deref().unwrap_or("buffer"),
                requirements,
                location,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| {
                GraphicsError::ResourceCreationFailed(format!(
                    "Failed to allocate buffer memory: {}",
                    e
                ))
            })?;

        unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        }
        .map_err(|e| {
            GraphicsError::ResourceCreationFailed(format!("Failed to bind buffer memory: {:?}", e))
        })?;

        Ok(GpuResource::Buffer(GpuBuffer::Vulkan {
            device: self.device.clone(),
            buffer,
            allocation: Mutex::new(Some(allocation)),
            allocator: Arc::clone(&self.allocator),
            size: desc.size,
        }))
    }

    fn create_texture(&self, desc: &TextureDescriptor) -> Result<GpuResource, GraphicsError> {
        let format = texture_format(desc.format);
        let usage = image_usage(desc.usage, desc.format);

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: desc.size.width,
                height: desc.size.height,
                depth: 1,
            })
            .mip_levels(desc.mip_level_count)
            .array_layers(desc.array_layer_count)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { self.device.create_image(&image_info, None) }.map_err(|e| {
            GraphicsError::ResourceCreationFailed(format!("Failed to create image: {:?}", e))
        })?;

        let requirements = unsafe { self.device.get_image_memory_requirements(image) };

        let allocation = self
            .allocator
            .lock()
            .allocate(&AllocationCreateDesc {
                name: desc.label.as_deref().unwrap_or("texture"),
                requirements,
                location: gpu_allocator::MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| {
                GraphicsError::ResourceCreationFailed(format!(
                    "Failed to allocate texture memory: {}",
                    e
                ))
            })?;

        unsafe {
            self.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        }
        .map_err(|e| {
            GraphicsError::ResourceCreationFailed(format!("Failed to bind image memory: {:?}", e))
        })?;

        let view_type = if desc.array_layer_count > 1 {
            vk::ImageViewType::TYPE_2D_ARRAY
        } else {
            vk::ImageViewType::TYPE_2D
        };
        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(view_type)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect_mask(format),
                base_mip_level: 0,
                level_count: desc.mip_level_count,
                base_array_layer: 0,
                layer_count: desc.array_layer_count,
            });

        let view = unsafe { self.device.create_image_view(&view_info, None) }.map_err(|e| {
            GraphicsError::ResourceCreationFailed(format!("Failed to create image view: {:?}", e))
        })?;

        Ok(GpuResource::Texture(GpuTexture::Vulkan {
            device: self.device.clone(),
            image,
            view,
            allocation: Mutex::new(Some(allocation)),
            allocator: Arc::clone(&self.allocator),
            format,
            mip_level_count: desc.mip_level_count,
            array_layer_count: desc.array_layer_count,
        }))
    }

    fn write_buffer(
        &self,
        buffer: &GpuResource,
        offset: u64,
        data: &[u8],
    ) -> Result<(), GraphicsError> {
        let GpuResource::Buffer(GpuBuffer::Vulkan { allocation, .. }) = buffer else {
            return Err(GraphicsError::InvalidParameter(
                "handle from another backend".to_string(),
            ));
        };

        let mut guard = allocation.lock();
        let mapped = guard
            .as_mut()
            .and_then(|a| a.mapped_slice_mut())
            .ok_or_else(|| {
                GraphicsError::InvalidParameter(
                    "write_buffer requires a host-visible buffer".to_string(),
                )
            })?;

        let start = offset as usize;
        let end = start + data.len();
        if end > mapped.len() {
            return Err(GraphicsError::InvalidParameter(format!(
                "write of {} bytes at offset {} exceeds buffer size {}",
                data.len(),
                offset,
                mapped.len()
            )));
        }
        mapped[start..end].copy_from_slice(data);
        Ok(())
    }

    fn create_descriptor_arena(
        &self,
        kind: DescriptorKind,
        capacity: u32,
        shader_visible: bool,
    ) -> Result<GpuDescriptorArena, GraphicsError> {
        let _ = shader_visible;
        let pool = match descriptor_type(kind) {
            Some(ty) => {
                let pool_sizes = [vk::DescriptorPoolSize {
                    ty,
                    descriptor_count: capacity,
                }];
                let pool_info = vk::DescriptorPoolCreateInfo::default()
                    .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
                    .max_sets(capacity)
                    .pool_sizes(&pool_sizes);

                let pool = unsafe { self.device.create_descriptor_pool(&pool_info, None) }
                    .map_err(|e| {
                        GraphicsError::ResourceCreationFailed(format!(
                            "Failed to create descriptor pool: {:?}",
                            e
                        ))
                    })?;
                Some(pool)
            }
            None => None,
        };

        Ok(GpuDescriptorArena::Vulkan {
            device: self.device.clone(),
            pool,
            capacity,
        })
    }
}

fn allocate_command_buffer(
    device: &ash::Device,
    pool: vk::CommandPool,
) -> Result<vk::CommandBuffer, GraphicsError> {
    let alloc_info = vk::CommandBufferAllocateInfo::default()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(1);

    let buffers = unsafe { device.allocate_command_buffers(&alloc_info) }.map_err(|e| {
        GraphicsError::Internal(format!("Failed to allocate command buffer: {:?}", e))
    })?;
    Ok(buffers[0])
}

/// Create a headless Vulkan instance.
fn create_instance(entry: &ash::Entry) -> Result<ash::Instance, GraphicsError> {
    let app_name = CString::new("Cinnabar").unwrap();
    let engine_name = CString::new("Cinnabar Engine").unwrap();

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(&engine_name)
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(REQUIRED_API_VERSION);

    #[allow(unused_mut)]
    let mut extensions: Vec<*const i8> = Vec::new();

    #[allow(unused_mut)]
    let mut create_flags = vk::InstanceCreateFlags::empty();

    #[cfg(target_os = "macos")]
    {
        extensions.push(ash::khr::portability_enumeration::NAME.as_ptr());
        create_flags |= vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    }

    let create_info = vk::InstanceCreateInfo::default()
        .flags(create_flags)
        .application_info(&app_info)
        .enabled_extension_names(&extensions);

    unsafe { entry.create_instance(&create_info, None) }.map_err(|e| {
        GraphicsError::InitializationFailed(format!("Failed to create Vulkan instance: {:?}", e))
    })
}

/// Select the best physical device with timeline semaphore support.
///
/// Prefers discrete GPUs over integrated GPUs.
fn select_physical_device(instance: &ash::Instance) -> Result<vk::PhysicalDevice, GraphicsError> {
    let devices = unsafe { instance.enumerate_physical_devices() }.map_err(|e| {
        GraphicsError::InitializationFailed(format!(
            "Failed to enumerate physical devices: {:?}",
            e
        ))
    })?;

    if devices.is_empty() {
        return Err(GraphicsError::InitializationFailed(
            "No Vulkan-capable GPU found".to_string(),
        ));
    }

    let mut best_device = None;
    let mut best_score = 0;

    for device in devices {
        let properties = unsafe { instance.get_physical_device_properties(device) };

        if properties.api_version < REQUIRED_API_VERSION {
            continue;
        }

        let mut vk12 = vk::PhysicalDeviceVulkan12Features::default();
        let mut features2 = vk::PhysicalDeviceFeatures2::default().push_next(&mut vk12);
        unsafe { instance.get_physical_device_features2(device, &mut features2) };
        if vk12.timeline_semaphore == vk::FALSE {
            continue;
        }

        let mut score = 1;
        if properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
            score += 1000;
        } else if properties.device_type == vk::PhysicalDeviceType::INTEGRATED_GPU {
            score += 100;
        }
        score += properties.limits.max_image_dimension2_d / 1024;

        if score > best_score {
            best_score = score;
            best_device = Some(device);
        }

        let device_name = unsafe { std::ffi::CStr::from_ptr(properties.device_name.as_ptr()) };
        log::info!(
            "Found GPU: {:?} (type: {:?}, score: {})",
            device_name,
            properties.device_type,
            score
        );
    }

    best_device.ok_or_else(|| {
        GraphicsError::InitializationFailed("No suitable GPU found".to_string())
    })
}

/// Find the graphics queue family and a transfer family, preferring a
/// dedicated transfer family when one exists.
fn find_queue_families(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<(u32, u32), GraphicsError> {
    let families =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

    let mut graphics = None;
    let mut dedicated_transfer = None;

    for (index, family) in families.iter().enumerate() {
        let index = index as u32;
        if graphics.is_none() && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            graphics = Some(index);
        }
        if dedicated_transfer.is_none()
            && family.queue_flags.contains(vk::QueueFlags::TRANSFER)
            && !family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
        {
            dedicated_transfer = Some(index);
        }
    }

    let graphics = graphics.ok_or_else(|| {
        GraphicsError::InitializationFailed("No graphics queue family found".to_string())
    })?;
    Ok((graphics, dedicated_transfer.unwrap_or(graphics)))
}

/// Create a logical device with timeline semaphores enabled.
fn create_logical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    graphics_family: u32,
    transfer_family: u32,
) -> Result<ash::Device, GraphicsError> {
    let queue_priorities = [1.0f32];
    let mut queue_create_infos = vec![vk::DeviceQueueCreateInfo::default()
        .queue_family_index(graphics_family)
        .queue_priorities(&queue_priorities)];
    if transfer_family != graphics_family {
        queue_create_infos.push(
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(transfer_family)
                .queue_priorities(&queue_priorities),
        );
    }

    let features = vk::PhysicalDeviceFeatures::default();
    let mut vulkan_12_features =
        vk::PhysicalDeviceVulkan12Features::default().timeline_semaphore(true);

    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_features(&features)
        .push_next(&mut vulkan_12_features);

    unsafe { instance.create_device(physical_device, &create_info, None) }.map_err(|e| {
        GraphicsError::InitializationFailed(format!("Failed to create logical device: {:?}", e))
    })
}
