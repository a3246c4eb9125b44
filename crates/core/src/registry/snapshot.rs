use std::collections::BTreeMap;
use std::sync::Arc;

use crate::effect::{EffectDescriptor, EffectId};
use crate::sync::Tick;
use crate::viewer::ViewerId;

/// Point-in-time view of the registry. Cloning the `Arc` that holds it is the
/// only synchronization a reader ever needs.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    pub(super) generation: u64,
    pub(super) entries: BTreeMap<EffectId, Arc<EffectDescriptor>>,
}

impl RegistrySnapshot {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn get(&self, id: EffectId) -> Option<&Arc<EffectDescriptor>> {
        self.entries.get(&id)
    }

    pub fn version_of(&self, id: EffectId) -> Option<u64> {
        self.entries.get(&id).map(|d| d.version())
    }

    /// Entries in ascending id order as `(id, version, descriptor)`.
    pub fn entries(&self) -> impl Iterator<Item = (EffectId, u64, &Arc<EffectDescriptor>)> {
        self.entries
            .iter()
            .map(|(&id, descriptor)| (id, descriptor.version(), descriptor))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<EffectDescriptor>> {
        self.entries.values()
    }

    /// Descriptors alive at `tick` whose visibility admits `viewer`.
    pub fn eligible_for(
        &self,
        viewer: ViewerId,
        tick: Tick,
    ) -> impl Iterator<Item = &Arc<EffectDescriptor>> {
        self.entries
            .values()
            .filter(move |d| !d.is_expired(tick) && d.is_visible_to(viewer))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
