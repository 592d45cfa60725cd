//! GPU/CPU synchronization primitives.

mod fence;

pub use fence::Fence;
