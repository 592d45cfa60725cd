//! Buffer resources.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::{DeviceBackend, GpuResource};
use crate::error::GraphicsResult;
use crate::resources::TrackedResource;
use crate::tracking::ResourceStateRecord;
use crate::types::{BufferDescriptor, BufferUsage, ResourceId, ResourceState};

/// A GPU buffer with its cached authoritative state.
///
/// Buffers have exactly one subresource.
pub struct Buffer {
    id: ResourceId,
    gpu: GpuResource,
    size: u64,
    usage: BufferUsage,
    label: Option<String>,
    state: Mutex<ResourceStateRecord>,
    /// Declared after `gpu`: the native buffer must be released while the
    /// backend (and its device) is still alive.
    #[allow(dead_code)]
    backend: Arc<dyn DeviceBackend>,
}

impl Buffer {
    /// Create a buffer on the given backend, starting in the `Common`
    /// state.
    pub fn new(
        backend: &Arc<dyn DeviceBackend>,
        desc: BufferDescriptor,
    ) -> GraphicsResult<Arc<Self>> {
        let gpu = backend.create_buffer(&desc)?;
        Ok(Arc::new(Self {
            id: ResourceId::next(),
            gpu,
            size: desc.size,
            usage: desc.usage,
            label: desc.label,
            state: Mutex::new(ResourceStateRecord::new(ResourceState::Common, 1)),
            backend: Arc::clone(backend),
        }))
    }

    /// Size of the buffer in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Usage flags the buffer was created with.
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }
}

impl TrackedResource for Buffer {
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
        1
    }

    fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.id)
            .field("size", &self.size)
            .field("usage", &self.usage)
            .field("label", &self.label)
            .finish()
    }
}
