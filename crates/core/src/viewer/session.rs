use std::collections::BTreeMap;

use crate::effect::{ClientSlot, EffectDescriptor, EffectId, EffectKind};
use crate::sync::Tick;

use super::{ViewerId, ViewerState};

/// What the client was last sent for one effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderedEffect {
    pub version: u64,
    pub kind: EffectKind,
    pub slot: Option<ClientSlot>,
}

#[derive(Debug, Clone)]
pub struct ViewerSession {
    viewer: ViewerId,
    incarnation: u64,
    state: ViewerState,
    rendered: BTreeMap<EffectId, RenderedEffect>,
    rejected: BTreeMap<EffectId, u64>,
    last_acked_tick: Tick,
    synced_generation: Option<u64>,
    dirty: bool,
}

impl ViewerSession {
    pub(crate) fn new(viewer: ViewerId, incarnation: u64) -> Self {
        Self {
            viewer,
            incarnation,
            state: ViewerState::Joining,
            rendered: BTreeMap::new(),
            rejected: BTreeMap::new(),
            last_acked_tick: 0,
            synced_generation: None,
            dirty: true,
        }
    }

    pub fn viewer(&self) -> ViewerId {
        self.viewer
    }

    pub fn incarnation(&self) -> u64 {
        self.incarnation
    }

    pub fn state(&self) -> ViewerState {
        self.state
    }

    pub fn rendered(&self) -> &BTreeMap<EffectId, RenderedEffect> {
        &self.rendered
    }

    pub fn rendered_version(&self, id: EffectId) -> Option<u64> {
        self.rendered.get(&id).map(|r| r.version)
    }

    pub fn contains(&self, id: EffectId) -> bool {
        self.rendered.contains_key(&id)
    }

    /// True when this exact version already failed to encode for the viewer.
    pub fn is_rejected(&self, id: EffectId, version: u64) -> bool {
        self.rejected.get(&id) == Some(&version)
    }

    pub fn last_acked_tick(&self) -> Tick {
        self.last_acked_tick
    }

    pub fn synced_generation(&self) -> Option<u64> {
        self.synced_generation
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Whether a tick-driven pass has anything to look at.
    pub fn needs_reconcile(&self, generation: u64) -> bool {
        self.dirty || self.synced_generation != Some(generation)
    }

    pub(crate) fn set_state(&mut self, state: ViewerState) -> bool {
        if !self.state.can_transition_to(state) {
            return false;
        }
        self.state = state;
        true
    }

    pub(crate) fn record_rendered(&mut self, descriptor: &EffectDescriptor) {
        self.rejected.remove(&descriptor.id());
        self.rendered.insert(
            descriptor.id(),
            RenderedEffect {
                version: descriptor.version(),
                kind: descriptor.kind(),
                slot: descriptor.client_slot(),
            },
        );
    }

    pub(crate) fn record_removed(&mut self, id: EffectId) -> bool {
        self.rejected.remove(&id);
        self.rendered.remove(&id).is_some()
    }

    pub(crate) fn record_rejected(&mut self, id: EffectId, version: u64) {
        self.rejected.insert(id, version);
    }

    pub(crate) fn record_synced(&mut self, generation: u64, tick: Tick) {
        self.synced_generation = Some(generation);
        self.last_acked_tick = tick;
        self.dirty = false;
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }
}
