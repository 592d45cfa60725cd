//! Fixed-capacity descriptor heap with a free-list allocator.
//!
//! Allocation is first-fit over an offset-ordered free list, carving from
//! the high end of the chosen block. Deallocation merges the freed range
//! with adjacent free neighbors, so the free list never contains two
//! contiguous entries — without that coalescing, fragmentation would grow
//! without bound over the lifetime of the heap.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::backend::{DeviceBackend, GpuDescriptorArena};
use crate::error::GraphicsResult;
use crate::types::{DescriptorKind, DescriptorVisibility};

/// A contiguous run of descriptor slots owned by its holder.
///
/// The allocation is the only capability able to return its range to the
/// heap: dropping it frees the slots. It is intentionally not `Clone` —
/// ownership of the range is exclusive and transfers by move.
pub struct DescriptorAllocation {
    heap: Weak<HeapShared>,
    offset: u32,
    count: u32,
    kind: DescriptorKind,
}

impl DescriptorAllocation {
    /// First slot of the allocated range.
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Number of slots in the range.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Kind of descriptors this range stores.
    pub fn kind(&self) -> DescriptorKind {
        self.kind
    }
}

impl std::fmt::Debug for DescriptorAllocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorAllocation")
            .field("offset", &self.offset)
            .field("count", &self.count)
            .field("kind", &self.kind)
            .finish()
    }
}

impl Drop for DescriptorAllocation {
    fn drop(&mut self) {
        if self.count == 0 {
            return;
        }
        // The heap may already be gone during shutdown; the range dies with it.
        if let Some(heap) = self.heap.upgrade() {
            heap.release(self.offset, self.count);
        }
    }
}

/// Free-list state guarded by the heap mutex.
struct FreeList {
    /// Free ranges keyed by offset. Invariant: no two entries are adjacent.
    free: BTreeMap<u32, u32>,
    /// Sum of all free range sizes.
    free_space: u32,
}

/// State shared between the heap and its outstanding allocations.
struct HeapShared {
    id: u64,
    kind: DescriptorKind,
    visibility: DescriptorVisibility,
    capacity: u32,
    #[allow(dead_code)]
    arena: GpuDescriptorArena,
    state: Mutex<FreeList>,
    /// Declared after `arena`: the native arena must be destroyed while
    /// the backend (and its device) is still alive.
    #[allow(dead_code)]
    backend: Arc<dyn DeviceBackend>,
}

impl HeapShared {
    /// Return a range to the free list, merging with adjacent neighbors.
    ///
    /// Exactly one of four cases applies: merge into the left neighbor,
    /// bridge left and right neighbors, merge into the right neighbor, or
    /// insert a standalone entry.
    fn release(&self, offset: u32, count: u32) {
        let mut state = self.state.lock();
        let end = offset + count;

        let left = state
            .free
            .range(..offset)
            .next_back()
            .map(|(&o, &s)| (o, s));
        let right = state.free.range(offset..).next().map(|(&o, &s)| (o, s));

        debug_assert!(
            left.map_or(true, |(o, s)| o + s <= offset),
            "descriptor range [{}, {}) freed twice",
            offset,
            end
        );
        debug_assert!(
            right.map_or(true, |(o, _)| o >= end),
            "descriptor range [{}, {}) freed twice",
            offset,
            end
        );

        let left = left.filter(|&(o, s)| o + s == offset);
        let right = right.filter(|&(o, _)| o == end);

        match (left, right) {
            (Some((left_offset, left_size)), Some((right_offset, right_size))) => {
                state.free.remove(&right_offset);
                state
                    .free
                    .insert(left_offset, left_size + count + right_size);
            }
            (Some((left_offset, left_size)), None) => {
                state.free.insert(left_offset, left_size + count);
            }
            (None, Some((right_offset, right_size))) => {
                state.free.remove(&right_offset);
                state.free.insert(offset, count + right_size);
            }
            (None, None) => {
                state.free.insert(offset, count);
            }
        }

        state.free_space += count;
    }
}

/// A fixed-capacity descriptor heap.
///
/// Cloning is cheap (shared handle); allocations from any clone draw from
/// the same slot space. Both the CPU-only and shader-visible variants are
/// mutex-guarded, since worker threads stage descriptors concurrently with
/// the render thread.
#[derive(Clone)]
pub struct DescriptorHeap {
    shared: Arc<HeapShared>,
}

impl DescriptorHeap {
    /// Create a heap of `capacity` slots backed by a native arena.
    pub fn new(
        backend: &Arc<dyn DeviceBackend>,
        kind: DescriptorKind,
        visibility: DescriptorVisibility,
        capacity: u32,
    ) -> GraphicsResult<Self> {
        let shader_visible = visibility == DescriptorVisibility::ShaderVisible;
        let arena = backend.create_descriptor_arena(kind, capacity, shader_visible)?;

        let mut free = BTreeMap::new();
        free.insert(0, capacity);

        Ok(Self {
            shared: Arc::new(HeapShared {
                id: crate::types::ResourceId::next().raw(),
                kind,
                visibility,
                capacity,
                arena,
                state: Mutex::new(FreeList {
                    free,
                    free_space: capacity,
                }),
                backend: Arc::clone(backend),
            }),
        })
    }

    /// Allocate a contiguous run of `count` slots.
    ///
    /// Returns `None` when no free range is large enough; callers are
    /// expected to create an additional heap rather than wait.
    pub fn allocate(&self, count: u32) -> Option<DescriptorAllocation> {
        debug_assert!(count > 0, "descriptor allocations must be non-empty");
        let mut state = self.shared.state.lock();
        if count > state.free_space {
            return None;
        }

        // First fit in address order.
        let (block_offset, block_size) = state
            .free
            .iter()
            .find(|(_, &size)| size >= count)
            .map(|(&o, &s)| (o, s))?;

        // Carve from the high end of the block so the remainder keeps its
        // original offset.
        let offset = block_offset + block_size - count;
        if block_size == count {
            state.free.remove(&block_offset);
        } else {
            state.free.insert(block_offset, block_size - count);
        }
        state.free_space -= count;

        Some(DescriptorAllocation {
            heap: Arc::downgrade(&self.shared),
            offset,
            count,
            kind: self.shared.kind,
        })
    }

    /// Total number of free slots.
    pub fn free_space(&self) -> u32 {
        self.shared.state.lock().free_space
    }

    /// Total capacity of the heap in slots.
    pub fn capacity(&self) -> u32 {
        self.shared.capacity
    }

    /// Kind of descriptors this heap stores.
    pub fn kind(&self) -> DescriptorKind {
        self.shared.kind
    }

    /// Visibility of this heap.
    pub fn visibility(&self) -> DescriptorVisibility {
        self.shared.visibility
    }

    /// Process-unique id of this heap.
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Snapshot of the free ranges, in address order. Diagnostic.
    pub fn free_ranges(&self) -> Vec<(u32, u32)> {
        self.shared
            .state
            .lock()
            .free
            .iter()
            .map(|(&o, &s)| (o, s))
            .collect()
    }
}

impl std::fmt::Debug for DescriptorHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("DescriptorHeap")
            .field("kind", &self.shared.kind)
            .field("visibility", &self.shared.visibility)
            .field("capacity", &self.shared.capacity)
            .field("free_space", &state.free_space)
            .field("free_ranges", &state.free.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::null::NullBackend;

    fn test_heap(capacity: u32) -> DescriptorHeap {
        let backend: Arc<dyn DeviceBackend> = Arc::new(NullBackend::new());
        DescriptorHeap::new(
            &backend,
            DescriptorKind::Resource,
            DescriptorVisibility::ShaderVisible,
            capacity,
        )
        .unwrap()
    }

    /// Check that no two free ranges are adjacent.
    fn assert_coalesced(heap: &DescriptorHeap) {
        let ranges = heap.free_ranges();
        for pair in ranges.windows(2) {
            let (o1, s1) = pair[0];
            let (o2, _) = pair[1];
            assert!(
                o1 + s1 < o2,
                "free list contains adjacent ranges ({o1},{s1}) and ({o2},..)"
            );
        }
    }

    #[test]
    fn test_allocate_and_exhaust() {
        let heap = test_heap(1024);
        assert_eq!(heap.free_space(), 1024);

        let first = heap.allocate(10).unwrap();
        assert_eq!(heap.free_space(), 1014);

        // More than the remaining space fails outright.
        assert!(heap.allocate(1020).is_none());

        drop(first);
        assert_eq!(heap.free_space(), 1024);
        assert_eq!(heap.free_ranges(), vec![(0, 1024)]);

        // An exact-capacity request now succeeds and empties the free list.
        let all = heap.allocate(1024).unwrap();
        assert_eq!(heap.free_space(), 0);
        assert!(heap.free_ranges().is_empty());
        drop(all);
    }

    #[test]
    fn test_allocation_carves_from_high_end() {
        let heap = test_heap(100);
        let alloc = heap.allocate(10).unwrap();
        assert_eq!(alloc.offset(), 90);
        assert_eq!(heap.free_ranges(), vec![(0, 90)]);
    }

    #[test]
    fn test_free_merges_left_and_right() {
        let heap = test_heap(64);
        let a = heap.allocate(16).unwrap();
        let b = heap.allocate(16).unwrap();
        let c = heap.allocate(16).unwrap();

        // Free the middle range first, then its neighbors; every
        // intermediate state must stay coalesced.
        drop(b);
        assert_coalesced(&heap);
        drop(a);
        assert_coalesced(&heap);
        drop(c);
        assert_coalesced(&heap);
        assert_eq!(heap.free_ranges(), vec![(0, 64)]);
        assert_eq!(heap.free_space(), 64);
    }

    #[test]
    fn test_free_bridges_two_neighbors() {
        let heap = test_heap(48);
        let a = heap.allocate(16).unwrap(); // [32, 48)
        let b = heap.allocate(16).unwrap(); // [16, 32)
        let c = heap.allocate(16).unwrap(); // [0, 16)

        drop(a);
        drop(c);
        assert_eq!(heap.free_ranges().len(), 2);

        // Freeing the middle block must fuse all three into one range.
        drop(b);
        assert_eq!(heap.free_ranges(), vec![(0, 48)]);
    }

    #[test]
    fn test_first_fit_skips_small_blocks() {
        let heap = test_heap(64);
        let a = heap.allocate(8).unwrap(); // [56, 64)
        let b = heap.allocate(24).unwrap(); // [32, 56)
        let c = heap.allocate(32).unwrap(); // [0, 32)

        // Freeing the middle block leaves a 24-slot hole at offset 32.
        drop(b);
        assert!(heap.allocate(25).is_none());
        // A request that fits the hole uses it.
        let d = heap.allocate(20).unwrap();
        assert!(d.offset() >= 32 && d.offset() + d.count() <= 56);

        drop(a);
        drop(c);
        drop(d);
        assert_eq!(heap.free_ranges(), vec![(0, 64)]);
    }

    #[test]
    fn test_coalescing_over_interleaved_churn() {
        let heap = test_heap(256);
        let mut live = Vec::new();
        for _ in 0..16 {
            live.push(heap.allocate(16).unwrap());
        }
        // Free every other allocation, then the rest, checking the
        // invariant throughout.
        let mut kept = Vec::new();
        for (i, alloc) in live.drain(..).enumerate() {
            if i % 2 == 0 {
                drop(alloc);
                assert_coalesced(&heap);
            } else {
                kept.push(alloc);
            }
        }
        for alloc in kept {
            drop(alloc);
            assert_coalesced(&heap);
        }
        assert_eq!(heap.free_ranges(), vec![(0, 256)]);
    }

    #[test]
    fn test_fragmented_space_cannot_satisfy_contiguous_request() {
        let heap = test_heap(48);
        let a = heap.allocate(16).unwrap(); // [32, 48)
        let b = heap.allocate(16).unwrap(); // [16, 32)
        let c = heap.allocate(16).unwrap(); // [0, 16)

        // Two disjoint 16-slot holes: 32 slots free in total, but no
        // contiguous run of 20.
        drop(a);
        drop(c);
        assert_eq!(heap.free_space(), 32);
        assert!(heap.allocate(20).is_none());

        drop(b);
        assert!(heap.allocate(20).is_some());
    }

    #[test]
    fn test_allocation_outliving_heap_is_harmless() {
        let heap = test_heap(32);
        let alloc = heap.allocate(8).unwrap();
        drop(heap);
        // The backing heap is gone; dropping the allocation must not panic.
        drop(alloc);
    }
}
