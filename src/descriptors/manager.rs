//! Growable descriptor heap set.
//!
//! Descriptor demand is driven by scene content (texture counts, shadow-map
//! counts) and cannot be sized statically. The manager grows capacity on
//! demand: when every existing heap of a kind is exhausted it creates a new
//! one, so steady state reaches a fixed set of heaps with no per-frame
//! reallocation.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::DeviceBackend;
use crate::descriptors::{DescriptorAllocation, DescriptorHeap};
use crate::error::{GraphicsError, GraphicsResult};
use crate::types::{DescriptorKind, DescriptorVisibility};

/// Default capacity of newly created heaps, in slots.
pub const BASE_HEAP_SIZE: u32 = 1024;

/// Owns a growable set of descriptor heaps per (kind, visibility) pair.
pub struct DescriptorHeapManager {
    base_heap_size: u32,
    pools: Mutex<HashMap<(DescriptorKind, DescriptorVisibility), Vec<DescriptorHeap>>>,
    backend: Arc<dyn DeviceBackend>,
}

impl DescriptorHeapManager {
    /// Create an empty manager using the default base heap size.
    pub fn new(backend: Arc<dyn DeviceBackend>) -> Self {
        Self::with_base_heap_size(backend, BASE_HEAP_SIZE)
    }

    /// Create an empty manager with a custom base heap size.
    pub fn with_base_heap_size(backend: Arc<dyn DeviceBackend>, base_heap_size: u32) -> Self {
        Self {
            base_heap_size,
            pools: Mutex::new(HashMap::new()),
            backend,
        }
    }

    /// Allocate `count` contiguous descriptor slots.
    ///
    /// Tries every existing heap of the requested kind and visibility; on
    /// exhaustion creates a new heap sized `max(base_heap_size, count)`, so
    /// the retry on the fresh heap always succeeds. Only heap creation
    /// itself can fail, and that failure is fatal.
    pub fn allocate(
        &self,
        kind: DescriptorKind,
        visibility: DescriptorVisibility,
        count: u32,
    ) -> GraphicsResult<DescriptorAllocation> {
        if count == 0 {
            return Err(GraphicsError::InvalidParameter(
                "descriptor allocation count must be non-zero".to_string(),
            ));
        }

        let mut pools = self.pools.lock();
        let heaps = pools.entry((kind, visibility)).or_default();

        for heap in heaps.iter() {
            if let Some(allocation) = heap.allocate(count) {
                return Ok(allocation);
            }
        }

        let capacity = self.base_heap_size.max(count);
        log::debug!(
            "Descriptor heaps of kind {:?} ({:?}) exhausted; growing by {} slots",
            kind,
            visibility,
            capacity
        );
        let heap = DescriptorHeap::new(&self.backend, kind, visibility, capacity)?;
        let allocation = heap.allocate(count).ok_or_else(|| {
            GraphicsError::Internal(format!(
                "freshly created descriptor heap of {} slots rejected {} slots",
                capacity, count
            ))
        })?;
        heaps.push(heap);
        Ok(allocation)
    }

    /// Number of heaps currently alive for a (kind, visibility) pair.
    pub fn heap_count(&self, kind: DescriptorKind, visibility: DescriptorVisibility) -> usize {
        self.pools
            .lock()
            .get(&(kind, visibility))
            .map_or(0, Vec::len)
    }
}

impl std::fmt::Debug for DescriptorHeapManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pools = self.pools.lock();
        f.debug_struct("DescriptorHeapManager")
            .field("base_heap_size", &self.base_heap_size)
            .field("pools", &pools.len())
            .field(
                "heaps",
                &pools.values().map(Vec::len).sum::<usize>(),
            )
            .finish()
    }
}
