//! Command submission: queues, transient lists, and allocator pooling.

mod allocator_pool;
mod list;
mod queue;

pub use allocator_pool::CommandAllocatorPool;
pub use list::CommandList;
pub use queue::CommandQueue;
