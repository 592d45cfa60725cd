//! GPU usage tracking and deferred deletion.
//!
//! GPU commands execute asynchronously: when a command list is submitted
//! the CPU moves on while the GPU runs one or more frames behind, so
//! objects referenced by in-flight work cannot be released the moment
//! their last owner lets go. The tracker holds a reference share for every
//! object touched by a submission, keyed by the fence value of that
//! submission, and releases the shares whose fence has completed.

use std::collections::HashMap;

use parking_lot::Mutex;

use std::sync::Arc;

use crate::descriptors::{DescriptorAllocation, DescriptorHeap};
use crate::resources::TrackedResource;
use crate::types::ResourceId;

/// A reference share kept alive until a fence value completes.
pub enum RetiredPayload {
    /// A buffer or texture touched by a submission.
    Resource(Arc<dyn TrackedResource>),
    /// A descriptor heap bound during a submission.
    Heap(DescriptorHeap),
    /// A descriptor range whose owner released it while the GPU may still
    /// read the slots; freeing is deferred to fence completion.
    Descriptors(DescriptorAllocation),
}

impl std::fmt::Debug for RetiredPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Resource(r) => f
                .debug_tuple("RetiredPayload::Resource")
                .field(&r.id())
                .finish(),
            Self::Heap(h) => f.debug_tuple("RetiredPayload::Heap").field(&h.id()).finish(),
            Self::Descriptors(d) => f.debug_tuple("RetiredPayload::Descriptors").field(d).finish(),
        }
    }
}

struct TrackedEntry {
    fence_value: u64,
    payload: RetiredPayload,
}

/// Associates GPU objects with the fence value marking their last use and
/// releases them once that value completes.
pub struct ResourceUsageTracker {
    entries: Mutex<HashMap<u64, TrackedEntry>>,
}

impl ResourceUsageTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Record that `resource` is used by work completing at `fence_value`.
    ///
    /// A later use supersedes an earlier one. Usage fences only increase
    /// for a given resource, since submissions are monotonic; a regression
    /// here would be an ordering bug upstream, so it is asserted in debug
    /// builds and clamped in release builds (over-retention is bounded,
    /// premature release is a use-after-free).
    pub fn register_resource(&self, resource: Arc<dyn TrackedResource>, fence_value: u64) {
        let mut entries = self.entries.lock();
        let key = resource.id().raw();
        match entries.get_mut(&key) {
            Some(entry) => {
                debug_assert!(
                    fence_value >= entry.fence_value,
                    "resource {:?} registered under fence {} after fence {}",
                    resource.id(),
                    fence_value,
                    entry.fence_value
                );
                entry.fence_value = entry.fence_value.max(fence_value);
                entry.payload = RetiredPayload::Resource(resource);
            }
            None => {
                entries.insert(
                    key,
                    TrackedEntry {
                        fence_value,
                        payload: RetiredPayload::Resource(resource),
                    },
                );
            }
        }
    }

    /// Record that `heap` is bound by work completing at `fence_value`.
    pub fn register_heap(&self, heap: DescriptorHeap, fence_value: u64) {
        let mut entries = self.entries.lock();
        let key = heap.id();
        match entries.get_mut(&key) {
            Some(entry) => {
                debug_assert!(fence_value >= entry.fence_value);
                entry.fence_value = entry.fence_value.max(fence_value);
            }
            None => {
                entries.insert(
                    key,
                    TrackedEntry {
                        fence_value,
                        payload: RetiredPayload::Heap(heap),
                    },
                );
            }
        }
    }

    /// Take ownership of a released descriptor range, deferring the actual
    /// free until `fence_value` completes.
    pub fn retire_descriptors(&self, allocation: DescriptorAllocation, fence_value: u64) {
        let key = ResourceId::next().raw();
        self.entries.lock().insert(
            key,
            TrackedEntry {
                fence_value,
                payload: RetiredPayload::Descriptors(allocation),
            },
        );
    }

    /// Release every entry whose fence value has completed.
    ///
    /// Entries with a fence value greater than `completed_fence_value`
    /// remain tracked. Called once per frame to bound memory growth.
    pub fn perform_deletion(&self, completed_fence_value: u64) {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.fence_value > completed_fence_value);
        let released = before - entries.len();
        if released > 0 {
            log::trace!(
                "Released {} tracked objects at fence {}",
                released,
                completed_fence_value
            );
        }
    }

    /// Number of objects currently kept alive.
    pub fn tracked_count(&self) -> usize {
        self.entries.lock().len()
    }
}

impl Default for ResourceUsageTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ResourceUsageTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceUsageTracker")
            .field("tracked", &self.tracked_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::null::NullBackend;
    use crate::backend::DeviceBackend;
    use crate::resources::Buffer;
    use crate::types::{BufferDescriptor, BufferUsage, DescriptorKind, DescriptorVisibility};

    fn null_backend() -> Arc<dyn DeviceBackend> {
        Arc::new(NullBackend::new())
    }

    fn test_buffer(backend: &Arc<dyn DeviceBackend>) -> Arc<dyn TrackedResource> {
        Buffer::new(backend, BufferDescriptor::new(16, BufferUsage::COPY_DST)).unwrap()
    }

    #[test]
    fn test_deletion_releases_completed_entries_only() {
        let backend = null_backend();
        let tracker = ResourceUsageTracker::new();
        tracker.register_resource(test_buffer(&backend), 3);
        tracker.register_resource(test_buffer(&backend), 5);
        tracker.register_resource(test_buffer(&backend), 8);
        assert_eq!(tracker.tracked_count(), 3);

        tracker.perform_deletion(5);
        assert_eq!(tracker.tracked_count(), 1);

        // Repeated calls with non-decreasing completion never resurrect or
        // leak entries.
        tracker.perform_deletion(5);
        assert_eq!(tracker.tracked_count(), 1);
        tracker.perform_deletion(8);
        assert_eq!(tracker.tracked_count(), 0);
    }

    #[test]
    fn test_later_use_supersedes_earlier() {
        let backend = null_backend();
        let tracker = ResourceUsageTracker::new();
        let resource = test_buffer(&backend);

        tracker.register_resource(Arc::clone(&resource), 2);
        tracker.register_resource(Arc::clone(&resource), 6);
        assert_eq!(tracker.tracked_count(), 1);

        // Completing the first fence is not enough once the resource was
        // re-used at a later one.
        tracker.perform_deletion(2);
        assert_eq!(tracker.tracked_count(), 1);
        tracker.perform_deletion(6);
        assert_eq!(tracker.tracked_count(), 0);
    }

    #[test]
    fn test_tracker_keeps_resource_alive() {
        let backend = null_backend();
        let tracker = ResourceUsageTracker::new();
        let resource = test_buffer(&backend);
        let weak = Arc::downgrade(&resource);

        tracker.register_resource(resource, 4);
        // The caller dropped its handle; the tracker share keeps it alive.
        assert!(weak.upgrade().is_some());

        tracker.perform_deletion(4);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_retired_descriptors_free_on_completion() {
        let backend = null_backend();
        let tracker = ResourceUsageTracker::new();
        let heap = crate::descriptors::DescriptorHeap::new(
            &backend,
            DescriptorKind::Resource,
            DescriptorVisibility::ShaderVisible,
            64,
        )
        .unwrap();

        let allocation = heap.allocate(16).unwrap();
        assert_eq!(heap.free_space(), 48);

        tracker.retire_descriptors(allocation, 7);
        // Slots stay claimed while the GPU may still read them.
        assert_eq!(heap.free_space(), 48);

        tracker.perform_deletion(7);
        assert_eq!(heap.free_space(), 64);
    }

    #[test]
    fn test_heap_registration_tracks_binding() {
        let backend = null_backend();
        let tracker = ResourceUsageTracker::new();
        let heap = crate::descriptors::DescriptorHeap::new(
            &backend,
            DescriptorKind::Resource,
            DescriptorVisibility::ShaderVisible,
            64,
        )
        .unwrap();

        tracker.register_heap(heap.clone(), 1);
        tracker.register_heap(heap.clone(), 3);
        assert_eq!(tracker.tracked_count(), 1);

        tracker.perform_deletion(2);
        assert_eq!(tracker.tracked_count(), 1);
        tracker.perform_deletion(3);
        assert_eq!(tracker.tracked_count(), 0);
    }
}
