mod snapshot;

pub use snapshot::RegistrySnapshot;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::effect::{EffectDescriptor, EffectDraft, EffectId, StylePayload, Transform};
use crate::error::RegistryError;
use crate::sync::Tick;

/// Authoritative set of published effects.
///
/// Writers build the next snapshot under a short write lock; readers clone an
/// `Arc` to the current one and never observe a partially applied change.
#[derive(Debug)]
pub struct EffectRegistry {
    current: RwLock<Arc<RegistrySnapshot>>,
    next_id: AtomicU64,
    tick: AtomicU64,
}

impl Default for EffectRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EffectRegistry {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(RegistrySnapshot::default())),
            next_id: AtomicU64::new(1),
            tick: AtomicU64::new(0),
        }
    }

    pub fn tick(&self) -> Tick {
        self.tick.load(Ordering::Acquire)
    }

    /// Publication tick stamped onto newly published effects.
    pub fn set_tick(&self, tick: Tick) {
        self.tick.store(tick, Ordering::Release);
    }

    pub fn publish(&self, draft: EffectDraft) -> EffectId {
        let id = EffectId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let descriptor = Arc::new(EffectDescriptor::from_draft(id, draft, self.tick()));
        let kind = descriptor.kind();

        self.mutate(|entries| {
            entries.insert(id, descriptor);
        });

        log::debug!("published {} ({})", id, kind.as_str());
        id
    }

    /// Replaces the style payload, returning the new version.
    pub fn update(&self, id: EffectId, style: StylePayload) -> Result<u64, RegistryError> {
        self.replace(id, |current| current.with_style(style))
    }

    /// Moves the effect, returning the new version.
    pub fn relocate(&self, id: EffectId, transform: Transform) -> Result<u64, RegistryError> {
        self.replace(id, |current| current.with_transform(transform))
    }

    pub fn retract(&self, id: EffectId) -> Result<(), RegistryError> {
        let mut current = self.current.write();
        if !current.entries.contains_key(&id) {
            return Err(RegistryError::NotFound(id));
        }

        let next = Arc::make_mut(&mut current);
        next.entries.remove(&id);
        next.generation += 1;
        drop(current);

        log::debug!("retracted {}", id);
        Ok(())
    }

    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        Arc::clone(&self.current.read())
    }

    pub fn get(&self, id: EffectId) -> Option<Arc<EffectDescriptor>> {
        self.current.read().get(id).cloned()
    }

    pub fn generation(&self) -> u64 {
        self.current.read().generation
    }

    pub fn len(&self) -> usize {
        self.current.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every effect whose TTL has run out at `tick`.
    pub fn purge_expired(&self, tick: Tick) -> Vec<EffectId> {
        let expired: Vec<EffectId> = self
            .current
            .read()
            .iter()
            .filter(|d| d.is_expired(tick))
            .map(|d| d.id())
            .collect();

        if expired.is_empty() {
            return expired;
        }

        self.mutate(|entries| {
            for id in &expired {
                entries.remove(id);
            }
        });

        log::debug!("purged {} expired effects at tick {}", expired.len(), tick);
        expired
    }

    fn replace<F>(&self, id: EffectId, f: F) -> Result<u64, RegistryError>
    where
        F: FnOnce(&EffectDescriptor) -> EffectDescriptor,
    {
        let mut current = self.current.write();
        let Some(existing) = current.entries.get(&id) else {
            return Err(RegistryError::NotFound(id));
        };

        let replacement = Arc::new(f(existing));
        let version = replacement.version();

        let next = Arc::make_mut(&mut current);
        next.entries.insert(id, replacement);
        next.generation += 1;

        Ok(version)
    }

    fn mutate<F>(&self, f: F)
    where
        F: FnOnce(&mut BTreeMap<EffectId, Arc<EffectDescriptor>>),
    {
        let mut current = self.current.write();
        let next = Arc::make_mut(&mut current);
        f(&mut next.entries);
        next.generation += 1;
    }
}
