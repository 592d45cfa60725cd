//! Barrier batching.
//!
//! Transition barriers are collected while a command list records and
//! flushed as a single native barrier command before the next draw or copy,
//! rather than being issued one at a time.

use std::sync::Arc;

use crate::backend::BarrierOp;
use crate::resources::TrackedResource;
use crate::types::{ResourceState, Subresource};

/// A state transition awaiting recording, with the resource kept alive.
pub struct PendingBarrier {
    /// The resource being transitioned.
    pub resource: Arc<dyn TrackedResource>,
    /// Which subresources the transition applies to.
    pub subresource: Subresource,
    /// State the resource is in before the barrier.
    pub before: ResourceState,
    /// State the resource is in after the barrier.
    pub after: ResourceState,
}

impl std::fmt::Debug for PendingBarrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingBarrier")
            .field("resource", &self.resource.id())
            .field("subresource", &self.subresource)
            .field("before", &self.before)
            .field("after", &self.after)
            .finish()
    }
}

/// A batch of transition barriers to submit together.
#[derive(Debug, Default)]
pub struct BarrierBatch {
    barriers: Vec<PendingBarrier>,
}

impl BarrierBatch {
    /// Create a new empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a transition barrier.
    ///
    /// Barriers where `before == after` are skipped — no transition is
    /// needed.
    pub fn add(
        &mut self,
        resource: Arc<dyn TrackedResource>,
        subresource: Subresource,
        before: ResourceState,
        after: ResourceState,
    ) {
        if before == after {
            return;
        }
        self.barriers.push(PendingBarrier {
            resource,
            subresource,
            before,
            after,
        });
    }

    /// Check if the batch has any barriers.
    pub fn is_empty(&self) -> bool {
        self.barriers.is_empty()
    }

    /// Number of barriers in the batch.
    pub fn len(&self) -> usize {
        self.barriers.len()
    }

    /// View the pending barriers.
    pub fn barriers(&self) -> &[PendingBarrier] {
        &self.barriers
    }

    /// Build the backend operations for this batch.
    pub fn ops(&self) -> Vec<BarrierOp<'_>> {
        self.barriers
            .iter()
            .map(|b| BarrierOp {
                resource: b.resource.gpu(),
                subresource: b.subresource,
                before: b.before,
                after: b.after,
            })
            .collect()
    }

    /// Drain all barriers out of the batch.
    pub fn take(&mut self) -> Vec<PendingBarrier> {
        std::mem::take(&mut self.barriers)
    }

    /// Clear all barriers from the batch.
    pub fn clear(&mut self) {
        self.barriers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::null::NullBackend;
    use crate::backend::DeviceBackend;
    use crate::resources::Buffer;
    use crate::types::{BufferDescriptor, BufferUsage};

    fn test_resource() -> Arc<dyn TrackedResource> {
        let backend: Arc<dyn DeviceBackend> = Arc::new(NullBackend::new());
        Buffer::new(
            &backend,
            BufferDescriptor::new(64, BufferUsage::COPY_DST),
        )
        .unwrap()
    }

    #[test]
    fn test_batch_starts_empty() {
        let batch = BarrierBatch::new();
        assert!(batch.is_empty());
        assert_eq!(batch.len(), 0);
    }

    #[test]
    fn test_same_state_is_skipped() {
        let mut batch = BarrierBatch::new();
        batch.add(
            test_resource(),
            Subresource::All,
            ResourceState::CopyDest,
            ResourceState::CopyDest,
        );
        assert!(batch.is_empty());
    }

    #[test]
    fn test_add_and_take() {
        let mut batch = BarrierBatch::new();
        batch.add(
            test_resource(),
            Subresource::All,
            ResourceState::Common,
            ResourceState::CopyDest,
        );
        assert_eq!(batch.len(), 1);

        let taken = batch.take();
        assert_eq!(taken.len(), 1);
        assert!(batch.is_empty());
        assert_eq!(taken[0].before, ResourceState::Common);
        assert_eq!(taken[0].after, ResourceState::CopyDest);
    }
}
