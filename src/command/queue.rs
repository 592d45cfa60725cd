//! Command queue: the unit of submission and synchronization.
//!
//! Each queue exclusively owns its [`Fence`], its [`CommandAllocatorPool`]
//! and its [`ResourceUsageTracker`]. Command lists submitted to one queue
//! execute in submission order, and the fence values returned by
//! successive submissions are strictly increasing. Ordering across queues
//! is established only through explicit GPU-side waits.

use std::sync::Arc;

use crate::backend::{DeviceBackend, GpuCommandList, GpuQueue};
use crate::command::list::ListParts;
use crate::command::{CommandAllocatorPool, CommandList};
use crate::error::{GraphicsError, GraphicsResult};
use crate::sync::Fence;
use crate::tracking::ResourceUsageTracker;
use crate::types::QueueKind;

/// A GPU command queue with its synchronization and pooling state.
pub struct CommandQueue {
    kind: QueueKind,
    queue: GpuQueue,
    fence: Fence,
    pool: CommandAllocatorPool,
    usage: ResourceUsageTracker,
    backend: Arc<dyn DeviceBackend>,
}

impl CommandQueue {
    /// Create a queue of the given kind.
    pub fn new(backend: Arc<dyn DeviceBackend>, kind: QueueKind) -> GraphicsResult<Self> {
        let queue = backend.get_queue(kind)?;
        let fence = Fence::new(Arc::clone(&backend))?;
        let pool = CommandAllocatorPool::new(Arc::clone(&backend), kind);
        Ok(Self {
            kind,
            queue,
            fence,
            pool,
            usage: ResourceUsageTracker::new(),
            backend,
        })
    }

    /// The kind of work this queue accepts.
    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    /// This queue's fence.
    pub fn fence(&self) -> &Fence {
        &self.fence
    }

    /// This queue's usage tracker.
    pub fn usage_tracker(&self) -> &ResourceUsageTracker {
        &self.usage
    }

    /// This queue's allocator pool.
    pub fn allocator_pool(&self) -> &CommandAllocatorPool {
        &self.pool
    }

    /// Open a command list for recording, drawing a pooled allocator and
    /// list object.
    pub fn open_list(&self) -> GraphicsResult<CommandList> {
        let completed = self.fence.completed_value();
        let allocator = self.pool.retrieve_allocator(completed)?;
        let gpu_list = self.pool.retrieve_list(&allocator)?;
        Ok(CommandList::new(
            Arc::clone(&self.backend),
            self.kind,
            gpu_list,
            allocator,
        ))
    }

    /// Submit command lists for execution, returning the fence value that
    /// completes when all of them have executed.
    ///
    /// For each list this closes the recording, resolves its preamble
    /// barriers against the authoritative resource states (recording them
    /// into a small pooled list that runs just before the main one), and
    /// writes the list's final states back. Touched resources and heaps
    /// are registered with the usage tracker under the returned fence
    /// value, and allocators/lists are retired into the pool.
    pub fn submit(&self, lists: Vec<CommandList>) -> GraphicsResult<u64> {
        struct Prepared {
            preamble: Option<ListParts>,
            parts: ListParts,
        }

        let completed = self.fence.completed_value();
        let mut prepared = Vec::with_capacity(lists.len());

        for mut list in lists {
            if list.kind() != self.kind {
                return Err(GraphicsError::InvalidParameter(format!(
                    "{:?} command list submitted to {:?} queue",
                    list.kind(),
                    self.kind
                )));
            }
            list.close()?;
            let parts = list.into_parts()?;

            let preamble_batch = parts.states.generate_preamble_barriers();
            let preamble = if preamble_batch.is_empty() {
                None
            } else {
                let allocator = self.pool.retrieve_allocator(completed)?;
                let gpu_list = self.pool.retrieve_list(&allocator)?;
                let ops = preamble_batch.ops();
                self.backend.cmd_barriers(&gpu_list, &ops);
                drop(ops);
                self.backend.close_command_list(&gpu_list)?;
                Some(ListParts {
                    gpu: gpu_list,
                    allocator,
                    states: Default::default(),
                    resources: Vec::new(),
                    heaps: Vec::new(),
                })
            };

            // The next list's preamble resolution must see this list's
            // final states.
            parts.states.apply_resource_transitions();
            prepared.push(Prepared { preamble, parts });
        }

        let mut handles: Vec<&GpuCommandList> = Vec::new();
        for entry in &prepared {
            if let Some(preamble) = &entry.preamble {
                handles.push(&preamble.gpu);
            }
            handles.push(&entry.parts.gpu);
        }
        if !handles.is_empty() {
            self.backend.submit(&self.queue, &handles)?;
        }

        let fence_value = self.fence.signal(&self.queue)?;

        for entry in prepared {
            for resource in entry.parts.resources {
                self.usage.register_resource(resource, fence_value);
            }
            for heap in entry.parts.heaps {
                self.usage.register_heap(heap, fence_value);
            }
            if let Some(preamble) = entry.preamble {
                self.pool
                    .register(preamble.allocator, preamble.gpu, fence_value)?;
            }
            self.pool
                .register(entry.parts.allocator, entry.parts.gpu, fence_value)?;
        }

        Ok(fence_value)
    }

    /// Non-blocking completion check for a fence value.
    pub fn is_complete(&self, fence_value: u64) -> bool {
        self.fence.is_complete(fence_value)
    }

    /// The most recently observed completed fence value.
    pub fn completed_value(&self) -> u64 {
        self.fence.completed_value()
    }

    /// Block the calling thread until `fence_value` completes.
    pub fn wait_on_cpu(&self, fence_value: u64) -> GraphicsResult<()> {
        self.fence.wait_on_cpu(fence_value)
    }

    /// Make this queue wait on the GPU timeline until `other`'s fence
    /// reaches `fence_value`. Does not block the CPU.
    ///
    /// This is how, for example, a transfer queue's upload is ordered
    /// before a graphics queue's draw without CPU synchronization.
    pub fn wait_on_gpu(&self, other: &CommandQueue, fence_value: u64) -> GraphicsResult<()> {
        self.backend
            .queue_wait_fence(&self.queue, other.fence.raw(), fence_value)
    }

    /// Signal the fence and block until the queue has drained.
    pub fn flush(&self) -> GraphicsResult<()> {
        let value = self.fence.signal(&self.queue)?;
        self.fence.wait_on_cpu(value)
    }

    /// Release every tracked object whose fence value has completed.
    pub fn perform_deletion(&self) {
        self.usage.perform_deletion(self.fence.completed_value());
    }
}

impl std::fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandQueue")
            .field("kind", &self.kind)
            .field("fence", &self.fence)
            .field("tracked", &self.usage.tracked_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::null::NullBackend;
    use crate::resources::{Buffer, TrackedResource};
    use crate::types::{BufferDescriptor, BufferUsage, ResourceState};

    fn auto_queue() -> (Arc<dyn DeviceBackend>, CommandQueue) {
        let backend: Arc<dyn DeviceBackend> = Arc::new(NullBackend::new());
        let queue = CommandQueue::new(Arc::clone(&backend), QueueKind::Graphics).unwrap();
        (backend, queue)
    }

    fn manual_queue() -> (Arc<NullBackend>, CommandQueue) {
        let backend = Arc::new(NullBackend::manual());
        let queue = CommandQueue::new(
            Arc::clone(&backend) as Arc<dyn DeviceBackend>,
            QueueKind::Graphics,
        )
        .unwrap();
        (backend, queue)
    }

    fn test_buffer(backend: &Arc<dyn DeviceBackend>) -> Arc<Buffer> {
        Buffer::new(
            backend,
            BufferDescriptor::new(256, BufferUsage::COPY_SRC | BufferUsage::COPY_DST),
        )
        .unwrap()
    }

    #[test]
    fn test_submissions_return_increasing_fence_values() {
        let (_backend, queue) = auto_queue();
        let mut previous = 0;
        for _ in 0..4 {
            let list = queue.open_list().unwrap();
            let value = queue.submit(vec![list]).unwrap();
            assert!(value > previous);
            previous = value;
        }
    }

    #[test]
    fn test_submit_registers_touched_resources() {
        let (backend, queue) = auto_queue();
        let buffer = test_buffer(&backend);

        let mut list = queue.open_list().unwrap();
        list.transition_buffer(&buffer, ResourceState::CopyDest);
        queue.submit(vec![list]).unwrap();

        assert_eq!(queue.usage_tracker().tracked_count(), 1);
        queue.perform_deletion();
        assert_eq!(queue.usage_tracker().tracked_count(), 0);
    }

    #[test]
    fn test_deletion_waits_for_fence() {
        let (backend, queue) = manual_queue();
        let buffer = test_buffer(&(Arc::clone(&backend) as Arc<dyn DeviceBackend>));

        let mut list = queue.open_list().unwrap();
        list.transition_buffer(&buffer, ResourceState::CopyDest);
        let value = queue.submit(vec![list]).unwrap();

        // The GPU has not finished; deletion must keep the entry.
        queue.perform_deletion();
        assert_eq!(queue.usage_tracker().tracked_count(), 1);

        backend.complete(queue.fence().raw(), value);
        queue.perform_deletion();
        assert_eq!(queue.usage_tracker().tracked_count(), 0);
    }

    #[test]
    fn test_allocators_recycle_once_fence_completes() {
        let (_backend, queue) = auto_queue();

        let list = queue.open_list().unwrap();
        queue.submit(vec![list]).unwrap();
        assert_eq!(queue.allocator_pool().retired_allocator_count(), 1);

        // The auto-complete backend finishes instantly, so the next open
        // reuses the retired allocator instead of growing the pool.
        let list = queue.open_list().unwrap();
        queue.submit(vec![list]).unwrap();
        assert_eq!(queue.allocator_pool().retired_allocator_count(), 1);
    }

    #[test]
    fn test_in_flight_submissions_grow_the_pool() {
        let (backend, queue) = manual_queue();

        let list = queue.open_list().unwrap();
        let v1 = queue.submit(vec![list]).unwrap();
        // Fence v1 is still pending: a second recording cannot reuse the
        // retired allocator.
        let list = queue.open_list().unwrap();
        let v2 = queue.submit(vec![list]).unwrap();
        assert_eq!(queue.allocator_pool().retired_allocator_count(), 2);

        backend.complete(queue.fence().raw(), v2);
        assert!(queue.is_complete(v1));
        assert!(queue.is_complete(v2));
    }

    #[test]
    fn test_preamble_resolves_across_submissions() {
        let (backend, queue) = auto_queue();
        let buffer = test_buffer(&backend);

        let mut list_a = queue.open_list().unwrap();
        list_a.transition_buffer(&buffer, ResourceState::CopySource);
        queue.submit(vec![list_a]).unwrap();
        assert_eq!(
            buffer.state().lock().uniform_state(),
            Some(ResourceState::CopySource)
        );

        let mut list_b = queue.open_list().unwrap();
        list_b.transition_buffer(&buffer, ResourceState::ShaderResource);
        queue.submit(vec![list_b]).unwrap();
        assert_eq!(
            buffer.state().lock().uniform_state(),
            Some(ResourceState::ShaderResource)
        );
    }

    #[test]
    fn test_copy_between_buffers() {
        let (backend, queue) = auto_queue();
        let src = test_buffer(&backend);
        let dst = test_buffer(&backend);

        let mut list = queue.open_list().unwrap();
        list.transition_buffer(&src, ResourceState::CopySource);
        list.transition_buffer(&dst, ResourceState::CopyDest);
        list.copy_buffer(&src, &dst, 0, 0, 128).unwrap();
        queue.submit(vec![list]).unwrap();

        // Both endpoints are tracked until deletion runs.
        assert_eq!(queue.usage_tracker().tracked_count(), 2);
    }

    #[test]
    fn test_copy_out_of_range_is_rejected() {
        let (backend, queue) = auto_queue();
        let src = test_buffer(&backend);
        let dst = test_buffer(&backend);

        let mut list = queue.open_list().unwrap();
        let result = list.copy_buffer(&src, &dst, 0, 128, 256);
        assert!(matches!(result, Err(GraphicsError::InvalidParameter(_))));
        queue.submit(vec![list]).unwrap();
    }

    #[test]
    fn test_flush_drains_queue() {
        let (_backend, queue) = auto_queue();
        let list = queue.open_list().unwrap();
        let value = queue.submit(vec![list]).unwrap();
        queue.flush().unwrap();
        assert!(queue.is_complete(value));
    }

    #[test]
    fn test_cross_queue_wait_does_not_block_cpu() {
        let backend: Arc<dyn DeviceBackend> = Arc::new(NullBackend::new());
        let graphics = CommandQueue::new(Arc::clone(&backend), QueueKind::Graphics).unwrap();
        let transfer = CommandQueue::new(Arc::clone(&backend), QueueKind::Transfer).unwrap();

        let list = transfer.open_list().unwrap();
        let upload_done = transfer.submit(vec![list]).unwrap();

        // Order the graphics queue after the upload; this records a GPU
        // wait and returns immediately.
        graphics.wait_on_gpu(&transfer, upload_done).unwrap();
        let list = graphics.open_list().unwrap();
        graphics.submit(vec![list]).unwrap();
    }

    #[test]
    fn test_mismatched_queue_kind_is_rejected() {
        let backend: Arc<dyn DeviceBackend> = Arc::new(NullBackend::new());
        let graphics = CommandQueue::new(Arc::clone(&backend), QueueKind::Graphics).unwrap();
        let transfer = CommandQueue::new(Arc::clone(&backend), QueueKind::Transfer).unwrap();

        let list = transfer.open_list().unwrap();
        let result = graphics.submit(vec![list]);
        assert!(matches!(result, Err(GraphicsError::InvalidParameter(_))));
    }
}
