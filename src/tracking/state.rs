//! Per-command-list resource state tracking.
//!
//! A resource's state at the moment a command list begins executing is not
//! known while that list records: it depends on what previously submitted
//! lists leave behind. The controller therefore splits tracking in two:
//!
//! - the *preamble* requirement — the state each touched subresource must
//!   be in when the list starts, deduced from the first transition
//!   requested for it;
//! - the *current known* state — updated as further transitions are
//!   recorded, producing ordinary in-list barriers.
//!
//! Preamble barriers are resolved against the resources' authoritative
//! states only at submission time, which lets multiple lists record
//! out of order against the same resources without a global lock.

use std::collections::HashMap;
use std::sync::Arc;

use crate::resources::TrackedResource;
use crate::tracking::BarrierBatch;
use crate::types::{ResourceId, ResourceState, Subresource};

/// Authoritative state record of one resource.
///
/// Either one state covers every subresource, or each subresource is
/// tracked individually. The per-subresource array is fully populated the
/// moment the record becomes subresource-specific.
#[derive(Debug, Clone)]
pub struct ResourceStateRecord {
    uniform: ResourceState,
    subresources: Vec<ResourceState>,
    specific: bool,
    count: u32,
}

impl ResourceStateRecord {
    /// Create a record with all subresources in `initial`.
    pub fn new(initial: ResourceState, subresource_count: u32) -> Self {
        Self {
            uniform: initial,
            subresources: Vec::new(),
            specific: false,
            count: subresource_count.max(1),
        }
    }

    /// Number of subresources tracked.
    pub fn subresource_count(&self) -> u32 {
        self.count
    }

    /// State of one subresource.
    pub fn get(&self, subresource: u32) -> ResourceState {
        if self.specific {
            self.subresources[subresource as usize]
        } else {
            self.uniform
        }
    }

    /// The single state covering all subresources, if the record is not
    /// subresource-specific.
    pub fn uniform_state(&self) -> Option<ResourceState> {
        if self.specific {
            None
        } else {
            Some(self.uniform)
        }
    }

    /// Set every subresource to `state`, collapsing per-subresource
    /// tracking.
    pub fn set_all(&mut self, state: ResourceState) {
        self.uniform = state;
        self.specific = false;
        self.subresources.clear();
    }

    /// Set one subresource, expanding the uniform state into a
    /// per-subresource array on first use.
    pub fn set(&mut self, subresource: u32, state: ResourceState) {
        if !self.specific {
            self.subresources = vec![self.uniform; self.count as usize];
            self.specific = true;
        }
        self.subresources[subresource as usize] = state;
    }
}

/// Controller-scoped view of a resource's states, where a subresource the
/// list has not touched yet has no state at all.
#[derive(Debug, Clone)]
struct ScopedStates {
    uniform: Option<ResourceState>,
    subresources: Vec<Option<ResourceState>>,
    specific: bool,
    count: u32,
}

impl ScopedStates {
    fn new(count: u32) -> Self {
        Self {
            uniform: None,
            subresources: Vec::new(),
            specific: false,
            count,
        }
    }

    fn get(&self, subresource: u32) -> Option<ResourceState> {
        if self.specific {
            self.subresources[subresource as usize]
        } else {
            self.uniform
        }
    }

    fn set_all(&mut self, state: ResourceState) {
        self.uniform = Some(state);
        self.specific = false;
        self.subresources.clear();
    }

    fn set(&mut self, subresource: u32, state: ResourceState) {
        if !self.specific {
            self.subresources = vec![self.uniform; self.count as usize];
            self.specific = true;
        }
        self.subresources[subresource as usize] = Some(state);
    }
}

struct ControllerEntry {
    resource: Arc<dyn TrackedResource>,
    preamble: ScopedStates,
    current: ScopedStates,
}

/// Deduplicates and batches resource state transitions within the scope of
/// one command list.
#[derive(Default)]
pub struct ResourceStateController {
    entries: HashMap<ResourceId, ControllerEntry>,
}

impl ResourceStateController {
    /// Create an empty controller.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a transition of `resource` to `after`.
    ///
    /// The first time a subresource is touched its state within this list
    /// is unknown, so the request is recorded as a preamble requirement
    /// instead of a barrier. Later requests for the same subresource emit
    /// in-list barriers into `batch`, skipping transitions to the state
    /// the subresource is already in.
    pub fn transition(
        &mut self,
        resource: &Arc<dyn TrackedResource>,
        after: ResourceState,
        subresource: Subresource,
        batch: &mut BarrierBatch,
    ) {
        let count = resource.subresource_count();
        let entry = self
            .entries
            .entry(resource.id())
            .or_insert_with(|| ControllerEntry {
                resource: Arc::clone(resource),
                preamble: ScopedStates::new(count),
                current: ScopedStates::new(count),
            });

        match subresource {
            Subresource::All => {
                if entry.current.specific {
                    // Per-subresource barriers, then collapse.
                    for index in 0..count {
                        match entry.current.get(index) {
                            Some(before) => batch.add(
                                Arc::clone(resource),
                                Subresource::Index(index),
                                before,
                                after,
                            ),
                            None => entry.preamble.set(index, after),
                        }
                    }
                } else {
                    match entry.current.uniform {
                        Some(before) => {
                            batch.add(Arc::clone(resource), Subresource::All, before, after)
                        }
                        None => entry.preamble.set_all(after),
                    }
                }
                entry.current.set_all(after);
            }
            Subresource::Index(index) => {
                debug_assert!(
                    index < count,
                    "subresource {} out of range for resource with {} subresources",
                    index,
                    count
                );
                match entry.current.get(index) {
                    Some(before) => batch.add(
                        Arc::clone(resource),
                        Subresource::Index(index),
                        before,
                        after,
                    ),
                    None => entry.preamble.set(index, after),
                }
                entry.current.set(index, after);
            }
        }
    }

    /// Compute the barriers needed before this list's commands execute.
    ///
    /// Called once, at submission time, when each resource's authoritative
    /// state is final. Subresources never touched by this list are
    /// excluded — no information exists to transition them from, and none
    /// is needed.
    pub fn generate_preamble_barriers(&self) -> BarrierBatch {
        let mut batch = BarrierBatch::new();
        for entry in self.entries.values() {
            let authoritative = entry.resource.state().lock();
            if entry.preamble.specific {
                for index in 0..entry.preamble.count {
                    if let Some(want) = entry.preamble.subresources[index as usize] {
                        batch.add(
                            Arc::clone(&entry.resource),
                            Subresource::Index(index),
                            authoritative.get(index),
                            want,
                        );
                    }
                }
            } else if let Some(want) = entry.preamble.uniform {
                match authoritative.uniform_state() {
                    Some(before) => {
                        batch.add(Arc::clone(&entry.resource), Subresource::All, before, want)
                    }
                    None => {
                        // The resource was left subresource-specific by a
                        // previous list; transition each subresource
                        // individually.
                        for index in 0..entry.preamble.count {
                            batch.add(
                                Arc::clone(&entry.resource),
                                Subresource::Index(index),
                                authoritative.get(index),
                                want,
                            );
                        }
                    }
                }
            }
        }
        batch
    }

    /// Write each resource's final known state back into its authoritative
    /// record, so the next list's preamble resolution sees correct history.
    pub fn apply_resource_transitions(&self) {
        for entry in self.entries.values() {
            let mut authoritative = entry.resource.state().lock();
            if entry.current.specific {
                for index in 0..entry.current.count {
                    if let Some(state) = entry.current.subresources[index as usize] {
                        authoritative.set(index, state);
                    }
                }
            } else if let Some(state) = entry.current.uniform {
                authoritative.set_all(state);
            }
        }
    }

    /// Resources referenced by this controller.
    pub fn resources(&self) -> impl Iterator<Item = &Arc<dyn TrackedResource>> {
        self.entries.values().map(|e| &e.resource)
    }

    /// Number of resources referenced.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether any resource was referenced.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for ResourceStateController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceStateController")
            .field("resources", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::null::NullBackend;
    use crate::backend::DeviceBackend;
    use crate::resources::{Buffer, Texture};
    use crate::types::{
        BufferDescriptor, BufferUsage, TextureDescriptor, TextureFormat, TextureUsage,
    };

    fn null_backend() -> Arc<dyn DeviceBackend> {
        Arc::new(NullBackend::new())
    }

    fn test_buffer(backend: &Arc<dyn DeviceBackend>) -> Arc<dyn TrackedResource> {
        Buffer::new(backend, BufferDescriptor::new(256, BufferUsage::COPY_DST)).unwrap()
    }

    fn test_texture(backend: &Arc<dyn DeviceBackend>, mips: u32) -> Arc<dyn TrackedResource> {
        Texture::new(
            backend,
            TextureDescriptor::new_2d(
                128,
                128,
                TextureFormat::Rgba8Unorm,
                TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
            )
            .with_mip_levels(mips),
        )
        .unwrap()
    }

    #[test]
    fn test_first_transition_seeds_preamble_not_barrier() {
        let backend = null_backend();
        let resource = test_buffer(&backend);
        let mut controller = ResourceStateController::new();
        let mut batch = BarrierBatch::new();

        controller.transition(
            &resource,
            ResourceState::CopyDest,
            Subresource::All,
            &mut batch,
        );
        assert!(batch.is_empty());

        let preamble = controller.generate_preamble_barriers();
        assert_eq!(preamble.len(), 1);
        let barrier = &preamble.barriers()[0];
        assert_eq!(barrier.before, ResourceState::Common);
        assert_eq!(barrier.after, ResourceState::CopyDest);
        assert_eq!(barrier.subresource, Subresource::All);
    }

    #[test]
    fn test_second_transition_emits_in_list_barrier() {
        let backend = null_backend();
        let resource = test_buffer(&backend);
        let mut controller = ResourceStateController::new();
        let mut batch = BarrierBatch::new();

        controller.transition(
            &resource,
            ResourceState::CopyDest,
            Subresource::All,
            &mut batch,
        );
        controller.transition(
            &resource,
            ResourceState::ShaderResource,
            Subresource::All,
            &mut batch,
        );

        assert_eq!(batch.len(), 1);
        let barrier = &batch.barriers()[0];
        assert_eq!(barrier.before, ResourceState::CopyDest);
        assert_eq!(barrier.after, ResourceState::ShaderResource);
    }

    #[test]
    fn test_transition_to_current_state_is_elided() {
        let backend = null_backend();
        let resource = test_buffer(&backend);
        let mut controller = ResourceStateController::new();
        let mut batch = BarrierBatch::new();

        controller.transition(
            &resource,
            ResourceState::CopyDest,
            Subresource::All,
            &mut batch,
        );
        controller.transition(
            &resource,
            ResourceState::CopyDest,
            Subresource::All,
            &mut batch,
        );
        assert!(batch.is_empty());
    }

    #[test]
    fn test_preamble_elided_when_already_in_state() {
        let backend = null_backend();
        let resource = test_buffer(&backend);
        let mut controller = ResourceStateController::new();
        let mut batch = BarrierBatch::new();

        // Authoritative state is Common; requesting Common produces nothing.
        controller.transition(
            &resource,
            ResourceState::Common,
            Subresource::All,
            &mut batch,
        );
        assert!(batch.is_empty());
        assert!(controller.generate_preamble_barriers().is_empty());
    }

    #[test]
    fn test_preamble_transitions_subresources_individually() {
        let backend = null_backend();
        let resource = test_texture(&backend, 4);

        // First list: leave the whole texture as a shader resource.
        let mut first = ResourceStateController::new();
        let mut batch = BarrierBatch::new();
        first.transition(
            &resource,
            ResourceState::ShaderResource,
            Subresource::All,
            &mut batch,
        );
        first.apply_resource_transitions();

        // Second list: one mip becomes a copy destination.
        let mut second = ResourceStateController::new();
        second.transition(
            &resource,
            ResourceState::CopyDest,
            Subresource::Index(2),
            &mut batch,
        );

        let preamble = second.generate_preamble_barriers();
        assert_eq!(preamble.len(), 1);
        let barrier = &preamble.barriers()[0];
        assert_eq!(barrier.subresource, Subresource::Index(2));
        assert_eq!(barrier.before, ResourceState::ShaderResource);
        assert_eq!(barrier.after, ResourceState::CopyDest);
    }

    #[test]
    fn test_preamble_skips_untouched_subresources() {
        let backend = null_backend();
        let resource = test_texture(&backend, 4);
        let mut controller = ResourceStateController::new();
        let mut batch = BarrierBatch::new();

        controller.transition(
            &resource,
            ResourceState::CopyDest,
            Subresource::Index(1),
            &mut batch,
        );
        controller.transition(
            &resource,
            ResourceState::CopyDest,
            Subresource::Index(3),
            &mut batch,
        );

        let preamble = controller.generate_preamble_barriers();
        assert_eq!(preamble.len(), 2);
        let mut touched: Vec<_> = preamble
            .barriers()
            .iter()
            .map(|b| b.subresource)
            .collect();
        touched.sort_by_key(|s| match s {
            Subresource::All => u32::MAX,
            Subresource::Index(i) => *i,
        });
        assert_eq!(
            touched,
            vec![Subresource::Index(1), Subresource::Index(3)]
        );
    }

    #[test]
    fn test_uniform_expands_to_subresource_specific() {
        let backend = null_backend();
        let resource = test_texture(&backend, 2);
        let mut controller = ResourceStateController::new();
        let mut batch = BarrierBatch::new();

        controller.transition(
            &resource,
            ResourceState::RenderTarget,
            Subresource::All,
            &mut batch,
        );
        controller.transition(
            &resource,
            ResourceState::ShaderResource,
            Subresource::Index(0),
            &mut batch,
        );

        // The in-list barrier covers only subresource 0.
        assert_eq!(batch.len(), 1);
        let barrier = &batch.barriers()[0];
        assert_eq!(barrier.subresource, Subresource::Index(0));
        assert_eq!(barrier.before, ResourceState::RenderTarget);
        assert_eq!(barrier.after, ResourceState::ShaderResource);

        controller.apply_resource_transitions();
        let state = resource.state().lock();
        assert_eq!(state.get(0), ResourceState::ShaderResource);
        assert_eq!(state.get(1), ResourceState::RenderTarget);
        assert!(state.uniform_state().is_none());
    }

    #[test]
    fn test_whole_resource_transition_collapses_tracking() {
        let backend = null_backend();
        let resource = test_texture(&backend, 3);
        let mut controller = ResourceStateController::new();
        let mut batch = BarrierBatch::new();

        controller.transition(
            &resource,
            ResourceState::RenderTarget,
            Subresource::All,
            &mut batch,
        );
        controller.transition(
            &resource,
            ResourceState::ShaderResource,
            Subresource::Index(1),
            &mut batch,
        );
        batch.clear();
        controller.transition(
            &resource,
            ResourceState::CopySource,
            Subresource::All,
            &mut batch,
        );

        // Per-subresource barriers are emitted for the collapse, one of
        // them from the subresource-specific state.
        assert_eq!(batch.len(), 3);

        controller.apply_resource_transitions();
        let state = resource.state().lock();
        assert_eq!(state.uniform_state(), Some(ResourceState::CopySource));
    }

    #[test]
    fn test_states_chain_across_lists() {
        let backend = null_backend();
        let resource = test_buffer(&backend);

        // List A moves the resource to CopyDest.
        let mut list_a = ResourceStateController::new();
        let mut batch = BarrierBatch::new();
        list_a.transition(
            &resource,
            ResourceState::CopyDest,
            Subresource::All,
            &mut batch,
        );
        let preamble_a = list_a.generate_preamble_barriers();
        assert_eq!(preamble_a.len(), 1);
        list_a.apply_resource_transitions();

        // List B moves it to ShaderResource; its preamble must start from
        // CopyDest, and the final state must be ShaderResource.
        let mut list_b = ResourceStateController::new();
        list_b.transition(
            &resource,
            ResourceState::ShaderResource,
            Subresource::All,
            &mut batch,
        );
        let preamble_b = list_b.generate_preamble_barriers();
        assert_eq!(preamble_b.len(), 1);
        assert_eq!(preamble_b.barriers()[0].before, ResourceState::CopyDest);
        assert_eq!(
            preamble_b.barriers()[0].after,
            ResourceState::ShaderResource
        );
        list_b.apply_resource_transitions();

        assert_eq!(
            resource.state().lock().uniform_state(),
            Some(ResourceState::ShaderResource)
        );
    }

    #[test]
    fn test_preamble_against_subresource_specific_history() {
        let backend = null_backend();
        let resource = test_texture(&backend, 2);

        // A previous list left the texture in mixed per-subresource states.
        {
            let mut prior = ResourceStateController::new();
            let mut batch = BarrierBatch::new();
            prior.transition(
                &resource,
                ResourceState::RenderTarget,
                Subresource::Index(0),
                &mut batch,
            );
            prior.transition(
                &resource,
                ResourceState::CopySource,
                Subresource::Index(1),
                &mut batch,
            );
            prior.apply_resource_transitions();
        }

        // A whole-resource preamble against mixed history transitions each
        // subresource individually, skipping the one already in place.
        let mut controller = ResourceStateController::new();
        let mut batch = BarrierBatch::new();
        controller.transition(
            &resource,
            ResourceState::CopySource,
            Subresource::All,
            &mut batch,
        );
        let preamble = controller.generate_preamble_barriers();
        assert_eq!(preamble.len(), 1);
        assert_eq!(preamble.barriers()[0].subresource, Subresource::Index(0));
        assert_eq!(preamble.barriers()[0].before, ResourceState::RenderTarget);
        assert_eq!(preamble.barriers()[0].after, ResourceState::CopySource);
    }
}
