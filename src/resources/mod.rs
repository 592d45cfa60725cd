//! GPU resources owning native allocations plus cached state.
//!
//! Resources are owned by the scene layer that creates them; the core only
//! observes their state through [`TrackedResource`] and extends their
//! lifetime through the usage tracker while the GPU may still touch them.

mod buffer;
mod texture;
mod upload_ring;

pub use buffer::Buffer;
pub use texture::Texture;
pub use upload_ring::{UploadAllocation, UploadRing};

use parking_lot::Mutex;

use crate::backend::GpuResource;
use crate::tracking::ResourceStateRecord;
use crate::types::ResourceId;

/// Common surface of state- and lifetime-tracked GPU resources.
///
/// The state record behind [`state`](TrackedResource::state) is the
/// authoritative history consulted when preamble barriers are resolved at
/// submission time.
pub trait TrackedResource: Send + Sync + 'static {
    /// Process-unique id of the resource.
    fn id(&self) -> ResourceId;

    /// The native GPU handle.
    fn gpu(&self) -> &GpuResource;

    /// The authoritative state record.
    fn state(&self) -> &Mutex<ResourceStateRecord>;

    /// Number of subresources (1 for buffers, mips × layers for textures).
    fn subresource_count(&self) -> u32;

    /// Debug label, if any.
    fn label(&self) -> Option<&str>;
}
