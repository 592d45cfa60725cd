//! Command allocator and command list pooling.
//!
//! Creating native command allocators and lists is expensive, so both are
//! recycled. The constraint differs between the two: an allocator backs
//! the memory of recorded commands and must not be reset while the GPU is
//! still executing them, whereas a list object is reusable the moment its
//! recording has been submitted.
//!
//! Retired allocators are therefore kept in a deque ordered by the fence
//! value of their last submission. Entries are pushed in submission order,
//! so the ordering is non-decreasing and checking only the front entry is
//! sufficient to find a reusable allocator. That ordering is an invariant
//! of the pool: registration rejects out-of-order fence values outright.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::{DeviceBackend, GpuCommandAllocator, GpuCommandList};
use crate::error::{GraphicsError, GraphicsResult};
use crate::types::QueueKind;

/// A retired allocator and the fence value at which its recorded work
/// completes.
struct CommandAllocatorEntry {
    allocator: GpuCommandAllocator,
    fence_value: u64,
}

/// Pools command allocators (fence-gated) and command lists (immediately
/// reusable) for one queue.
///
/// The two internal queues use independent locks so allocator-reuse and
/// list-reuse paths do not contend.
pub struct CommandAllocatorPool {
    kind: QueueKind,
    // Declared before `allocators` so recycled lists drop before the pools
    // that back their native memory.
    lists: Mutex<VecDeque<GpuCommandList>>,
    allocators: Mutex<VecDeque<CommandAllocatorEntry>>,
    // Declared last: retired allocators must be destroyed while the
    // backend (and its device) is still alive.
    backend: Arc<dyn DeviceBackend>,
}

impl CommandAllocatorPool {
    /// Create an empty pool for queues of the given kind.
    pub fn new(backend: Arc<dyn DeviceBackend>, kind: QueueKind) -> Self {
        Self {
            kind,
            lists: Mutex::new(VecDeque::new()),
            allocators: Mutex::new(VecDeque::new()),
            backend,
        }
    }

    /// Get an allocator that is safe to record into.
    ///
    /// Reuses the oldest retired allocator when the GPU has finished its
    /// prior work (`completed` is the owning fence's completed value);
    /// otherwise creates a new one rather than waiting.
    pub fn retrieve_allocator(&self, completed: u64) -> GraphicsResult<GpuCommandAllocator> {
        let reusable = {
            let mut allocators = self.allocators.lock();
            match allocators.front() {
                Some(front) if front.fence_value <= completed => {
                    allocators.pop_front().map(|entry| entry.allocator)
                }
                _ => None,
            }
        };

        match reusable {
            Some(allocator) => {
                self.backend.reset_command_allocator(&allocator)?;
                Ok(allocator)
            }
            None => self.backend.create_command_allocator(self.kind),
        }
    }

    /// Get a list recording into `allocator`.
    ///
    /// Recycles a pooled list object when one is available (lists carry no
    /// fence dependency), otherwise creates a new one.
    pub fn retrieve_list(&self, allocator: &GpuCommandAllocator) -> GraphicsResult<GpuCommandList> {
        let recycled = self.lists.lock().pop_front();
        let mut list = match recycled {
            Some(list) => list,
            None => self.backend.create_command_list(allocator)?,
        };
        self.backend.begin_command_list(&mut list, allocator)?;
        Ok(list)
    }

    /// Retire an allocator/list pair after the list bound to `allocator`
    /// has been submitted with `fence_value`.
    ///
    /// Registration must happen in submission order; a fence value lower
    /// than the newest retired entry would break the front-only reuse
    /// check and is rejected.
    pub fn register(
        &self,
        allocator: GpuCommandAllocator,
        list: GpuCommandList,
        fence_value: u64,
    ) -> GraphicsResult<()> {
        {
            let mut allocators = self.allocators.lock();
            if let Some(back) = allocators.back() {
                if back.fence_value > fence_value {
                    return Err(GraphicsError::InvalidParameter(format!(
                        "allocator registered out of order: fence {} after fence {}",
                        fence_value, back.fence_value
                    )));
                }
            }
            allocators.push_back(CommandAllocatorEntry {
                allocator,
                fence_value,
            });
        }
        self.lists.lock().push_back(list);
        Ok(())
    }

    /// Number of retired allocators awaiting reuse.
    pub fn retired_allocator_count(&self) -> usize {
        self.allocators.lock().len()
    }

    /// Number of pooled list objects.
    pub fn pooled_list_count(&self) -> usize {
        self.lists.lock().len()
    }
}

impl std::fmt::Debug for CommandAllocatorPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandAllocatorPool")
            .field("kind", &self.kind)
            .field("retired_allocators", &self.retired_allocator_count())
            .field("pooled_lists", &self.pooled_list_count())
            .finish()
    }
}
