//! Descriptor heap management.
//!
//! Descriptor heaps are fixed-capacity arenas of descriptor slots. A
//! [`DescriptorHeap`] sub-allocates contiguous slot ranges with a free-list
//! allocator; the [`DescriptorHeapManager`] presents an unbounded virtual
//! descriptor space by creating additional heaps on demand.

mod heap;
mod manager;

pub use heap::{DescriptorAllocation, DescriptorHeap};
pub use manager::{DescriptorHeapManager, BASE_HEAP_SIZE};
