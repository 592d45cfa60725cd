//! Transient command recording object.
//!
//! A command list is bound to one queue's allocator for the duration of a
//! recording session, collects requested state transitions through its
//! [`ResourceStateController`], and remembers every resource and descriptor
//! heap it touches so the owning queue can register them with the usage
//! tracker at submission.
//!
//! Lists are scoped to a single thread's recording session and need no
//! internal locking.

use std::collections::HashMap;
use std::sync::Arc;

use crate::backend::{DeviceBackend, GpuCommandAllocator, GpuCommandList};
use crate::descriptors::DescriptorHeap;
use crate::error::{GraphicsError, GraphicsResult};
use crate::resources::{Buffer, Texture, TrackedResource};
use crate::tracking::{BarrierBatch, ResourceStateController};
use crate::types::{QueueKind, ResourceId, ResourceState, Subresource};

/// Pieces of a command list handed back to the queue at submission.
pub(crate) struct ListParts {
    pub gpu: GpuCommandList,
    pub allocator: GpuCommandAllocator,
    pub states: ResourceStateController,
    pub resources: Vec<Arc<dyn TrackedResource>>,
    pub heaps: Vec<DescriptorHeap>,
}

/// A transient recording object bound to one command queue.
pub struct CommandList {
    kind: QueueKind,
    gpu: Option<GpuCommandList>,
    allocator: Option<GpuCommandAllocator>,
    states: ResourceStateController,
    pending: BarrierBatch,
    touched_resources: HashMap<ResourceId, Arc<dyn TrackedResource>>,
    touched_heaps: HashMap<u64, DescriptorHeap>,
    closed: bool,
    submitted: bool,
    backend: Arc<dyn DeviceBackend>,
}

impl CommandList {
    pub(crate) fn new(
        backend: Arc<dyn DeviceBackend>,
        kind: QueueKind,
        gpu: GpuCommandList,
        allocator: GpuCommandAllocator,
    ) -> Self {
        Self {
            kind,
            gpu: Some(gpu),
            allocator: Some(allocator),
            states: ResourceStateController::new(),
            pending: BarrierBatch::new(),
            touched_resources: HashMap::new(),
            touched_heaps: HashMap::new(),
            closed: false,
            submitted: false,
            backend,
        }
    }

    /// The queue kind this list records for.
    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    /// Request a state transition for any tracked resource.
    pub fn transition(
        &mut self,
        resource: Arc<dyn TrackedResource>,
        after: ResourceState,
        subresource: Subresource,
    ) {
        debug_assert!(!self.closed, "recording into a closed command list");
        self.states
            .transition(&resource, after, subresource, &mut self.pending);
        self.touched_resources.insert(resource.id(), resource);
    }

    /// Request a whole-buffer state transition.
    pub fn transition_buffer(&mut self, buffer: &Arc<Buffer>, after: ResourceState) {
        self.transition(buffer.clone(), after, Subresource::All);
    }

    /// Request a texture state transition.
    pub fn transition_texture(
        &mut self,
        texture: &Arc<Texture>,
        after: ResourceState,
        subresource: Subresource,
    ) {
        self.transition(texture.clone(), after, subresource);
    }

    /// Mark a descriptor heap as bound by this list, extending its lifetime
    /// past the submission's fence.
    pub fn use_descriptor_heap(&mut self, heap: &DescriptorHeap) {
        debug_assert!(!self.closed, "recording into a closed command list");
        self.touched_heaps.insert(heap.id(), heap.clone());
    }

    /// Record a buffer-to-buffer copy.
    ///
    /// The caller is responsible for having transitioned `src` to
    /// `CopySource` and `dst` to `CopyDest`.
    pub fn copy_buffer(
        &mut self,
        src: &Arc<Buffer>,
        dst: &Arc<Buffer>,
        src_offset: u64,
        dst_offset: u64,
        size: u64,
    ) -> GraphicsResult<()> {
        if self.closed {
            return Err(GraphicsError::InvalidParameter(
                "copy recorded into a closed command list".to_string(),
            ));
        }
        if src_offset + size > src.size() || dst_offset + size > dst.size() {
            return Err(GraphicsError::InvalidParameter(format!(
                "copy of {} bytes out of range (src {} @ {}, dst {} @ {})",
                size,
                src.size(),
                src_offset,
                dst.size(),
                dst_offset
            )));
        }

        self.flush_barriers();
        self.backend.cmd_copy_buffer(
            self.gpu(),
            src.gpu(),
            dst.gpu(),
            src_offset,
            dst_offset,
            size,
        );
        let src_share: Arc<dyn TrackedResource> = src.clone();
        let dst_share: Arc<dyn TrackedResource> = dst.clone();
        self.touched_resources.insert(src.id(), src_share);
        self.touched_resources.insert(dst.id(), dst_share);
        Ok(())
    }

    /// Record all pending transition barriers as one batch.
    ///
    /// Called automatically before copies and at close; exposed for
    /// callers interleaving their own recorded work.
    pub fn flush_barriers(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let ops = self.pending.ops();
        self.backend.cmd_barriers(
            self.gpu
                .as_ref()
                .expect("command list handle taken before submission"),
            &ops,
        );
        drop(ops);
        self.pending.clear();
    }

    /// Finish recording. Idempotent; failure is a fatal device error.
    pub fn close(&mut self) -> GraphicsResult<()> {
        if self.closed {
            return Ok(());
        }
        self.flush_barriers();
        self.backend.close_command_list(self.gpu())?;
        self.closed = true;
        Ok(())
    }

    /// Number of barriers waiting to be flushed.
    pub fn pending_barrier_count(&self) -> usize {
        self.pending.len()
    }

    fn gpu(&self) -> &GpuCommandList {
        self.gpu
            .as_ref()
            .expect("command list handle taken before submission")
    }

    pub(crate) fn into_parts(mut self) -> GraphicsResult<ListParts> {
        debug_assert!(self.closed, "submitting a command list that was not closed");
        self.submitted = true;
        let gpu = self.gpu.take().ok_or_else(|| {
            GraphicsError::Internal("command list submitted twice".to_string())
        })?;
        let allocator = self.allocator.take().ok_or_else(|| {
            GraphicsError::Internal("command list submitted twice".to_string())
        })?;
        Ok(ListParts {
            gpu,
            allocator,
            states: std::mem::take(&mut self.states),
            resources: self.touched_resources.drain().map(|(_, r)| r).collect(),
            heaps: self.touched_heaps.drain().map(|(_, h)| h).collect(),
        })
    }
}

impl Drop for CommandList {
    fn drop(&mut self) {
        // Dropping a recorded list without submitting it abandons its
        // commands and leaks the allocator back through native teardown
        // instead of the pool. Surfaced as a warning; the error paths that
        // legitimately abandon lists go through here too.
        if !self.submitted && self.gpu.is_some() && !std::thread::panicking() {
            log::warn!("command list dropped without being submitted");
        }
    }
}

impl std::fmt::Debug for CommandList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandList")
            .field("kind", &self.kind)
            .field("closed", &self.closed)
            .field("touched_resources", &self.touched_resources.len())
            .field("pending_barriers", &self.pending.len())
            .finish()
    }
}
