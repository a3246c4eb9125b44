mod operation;

pub use operation::Operation;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use crate::effect::{ClientSlot, EffectDescriptor, EffectId};
use crate::registry::RegistrySnapshot;
use crate::sync::Tick;
use crate::viewer::ViewerSession;

/// Which effects a reconciliation pass re-evaluates.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DiffScope {
    #[default]
    Full,
    Effects(BTreeSet<EffectId>),
}

impl DiffScope {
    pub fn effects(ids: impl IntoIterator<Item = EffectId>) -> Self {
        Self::Effects(ids.into_iter().collect())
    }

    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full)
    }

    pub fn includes(&self, id: EffectId) -> bool {
        match self {
            Self::Full => true,
            Self::Effects(ids) => ids.contains(&id),
        }
    }

    pub fn merge(self, other: DiffScope) -> DiffScope {
        match (self, other) {
            (Self::Effects(mut a), Self::Effects(b)) => {
                a.extend(b);
                Self::Effects(a)
            }
            _ => Self::Full,
        }
    }
}

/// Computes the operations that move `session` to what `snapshot` says the
/// viewer should see at `tick`.
///
/// Output order is every remove, then every update, then every create, each
/// group in ascending id order. Removing first frees client slots before
/// anything else claims them.
///
/// A scoped pass also removes any rendered effect that lost its client slot
/// to an effect in scope, even if the loser is outside the scope.
pub fn diff(
    snapshot: &RegistrySnapshot,
    session: &ViewerSession,
    tick: Tick,
    scope: &DiffScope,
) -> Vec<Operation> {
    let eligible = eligible_effects(snapshot, session, tick);
    let displaced = displaced_effects(&eligible, session, scope);

    let mut removes = Vec::new();
    let mut updates = Vec::new();
    let mut creates = Vec::new();

    for (&id, rendered) in session.rendered() {
        if !scope.includes(id) && !displaced.contains(&id) {
            continue;
        }
        match eligible.get(&id) {
            None => removes.push(Operation::Remove {
                id,
                kind: rendered.kind,
                slot: rendered.slot,
            }),
            Some(descriptor) => {
                if descriptor.version() > rendered.version
                    && !session.is_rejected(id, descriptor.version())
                {
                    updates.push(Operation::Update(Arc::clone(descriptor)));
                }
            }
        }
    }

    for (&id, descriptor) in &eligible {
        if scope.includes(id)
            && !session.contains(id)
            && !session.is_rejected(id, descriptor.version())
        {
            creates.push(Operation::Create(Arc::clone(descriptor)));
        }
    }

    let mut operations = removes;
    operations.append(&mut updates);
    operations.append(&mut creates);
    operations
}

/// Alive, visible effects keyed by id, with slot conflicts resolved: when
/// several effects claim the same client slot, the highest id wins.
fn eligible_effects<'a>(
    snapshot: &'a RegistrySnapshot,
    session: &ViewerSession,
    tick: Tick,
) -> BTreeMap<EffectId, &'a Arc<EffectDescriptor>> {
    let mut eligible = BTreeMap::new();
    let mut slot_owner: HashMap<ClientSlot, EffectId> = HashMap::new();

    for descriptor in snapshot.eligible_for(session.viewer(), tick) {
        if let Some(slot) = descriptor.client_slot() {
            // Ascending iteration means any previous owner has the lower id.
            if let Some(previous) = slot_owner.insert(slot, descriptor.id()) {
                eligible.remove(&previous);
            }
        }
        eligible.insert(descriptor.id(), descriptor);
    }

    eligible
}

/// Rendered effects outside `scope` whose client slot is now held by a
/// different eligible effect inside it.
fn displaced_effects(
    eligible: &BTreeMap<EffectId, &Arc<EffectDescriptor>>,
    session: &ViewerSession,
    scope: &DiffScope,
) -> BTreeSet<EffectId> {
    if scope.is_full() {
        return BTreeSet::new();
    }

    let claimed: HashMap<ClientSlot, EffectId> = eligible
        .iter()
        .filter(|(id, _)| scope.includes(**id))
        .filter_map(|(&id, descriptor)| descriptor.client_slot().map(|slot| (slot, id)))
        .collect();

    session
        .rendered()
        .iter()
        .filter(|(id, rendered)| {
            rendered
                .slot
                .and_then(|slot| claimed.get(&slot))
                .is_some_and(|owner| owner != *id)
        })
        .map(|(&id, _)| id)
        .collect()
}

/// Counts of each operation type, for logging and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiffSummary {
    pub created: usize,
    pub updated: usize,
    pub removed: usize,
}

impl DiffSummary {
    pub fn of(operations: &[Operation]) -> Self {
        let mut summary = Self::default();
        for op in operations {
            match op {
                Operation::Create(_) => summary.created += 1,
                Operation::Update(_) => summary.updated += 1,
                Operation::Remove { .. } => summary.removed += 1,
            }
        }
        summary
    }

    pub fn is_empty(&self) -> bool {
        self.created == 0 && self.updated == 0 && self.removed == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::{
        EffectDraft, EffectKind, MarkerStyle, ParticleStyle, Style, StylePayload, TabListStyle,
        Visibility,
    };
    use crate::registry::EffectRegistry;
    use crate::viewer::SessionStore;

    fn particle() -> EffectDraft {
        EffectDraft::from_style(&Style::Particle(ParticleStyle {
            particle: "dust".into(),
            count: 4,
            spread: [0.0; 3],
            speed: 0.0,
            interval_ticks: 1,
        }))
        .unwrap()
    }

    fn tab_list(header: &str) -> EffectDraft {
        EffectDraft::from_style(&Style::TabList(TabListStyle {
            header: header.into(),
            footer: String::new(),
        }))
        .unwrap()
    }

    fn marker() -> EffectDraft {
        EffectDraft::from_style(&Style::Marker(MarkerStyle {
            icon: "x".into(),
            label: None,
            color_rgb: 0,
        }))
        .unwrap()
    }

    /// Applies operations the way a fully successful delivery would.
    fn apply(store: &SessionStore, viewer: u32, ops: &[Operation]) {
        for op in ops {
            match op {
                Operation::Create(d) | Operation::Update(d) => {
                    store.mark_rendered(viewer, d).unwrap()
                }
                Operation::Remove { id, .. } => store.mark_removed(viewer, *id).unwrap(),
            }
        }
    }

    fn labels(ops: &[Operation]) -> Vec<(&'static str, EffectId)> {
        ops.iter().map(|op| (op.label(), op.id())).collect()
    }

    #[test]
    fn fresh_session_gets_creates_in_id_order() {
        let registry = EffectRegistry::new();
        let store = SessionStore::new();
        store.open_session(1);
        let a = registry.publish(particle());
        let b = registry.publish(marker());

        let ops = diff(
            &registry.snapshot(),
            &store.get_session(1).unwrap(),
            0,
            &DiffScope::Full,
        );

        assert_eq!(labels(&ops), vec![("create", a), ("create", b)]);
    }

    #[test]
    fn reconciled_session_is_a_fixed_point() {
        let registry = EffectRegistry::new();
        let store = SessionStore::new();
        store.open_session(1);
        for _ in 0..4 {
            registry.publish(particle());
        }

        let snapshot = registry.snapshot();
        let ops = diff(&snapshot, &store.get_session(1).unwrap(), 0, &DiffScope::Full);
        apply(&store, 1, &ops);

        let again = diff(&snapshot, &store.get_session(1).unwrap(), 0, &DiffScope::Full);
        assert!(again.is_empty());
    }

    #[test]
    fn newer_version_becomes_update() {
        let registry = EffectRegistry::new();
        let store = SessionStore::new();
        store.open_session(1);
        let id = registry.publish(tab_list("a"));
        apply(
            &store,
            1,
            &diff(&registry.snapshot(), &store.get_session(1).unwrap(), 0, &DiffScope::Full),
        );

        let payload = StylePayload::encode(&Style::TabList(TabListStyle {
            header: "b".into(),
            footer: String::new(),
        }))
        .unwrap();
        registry.update(id, payload).unwrap();

        let ops = diff(&registry.snapshot(), &store.get_session(1).unwrap(), 0, &DiffScope::Full);
        assert_eq!(labels(&ops), vec![("update", id)]);
        assert_eq!(ops[0].version(), Some(2));
    }

    #[test]
    fn retracted_and_expired_become_removes() {
        let registry = EffectRegistry::new();
        let store = SessionStore::new();
        store.open_session(1);
        let retracted = registry.publish(particle());
        let expiring = registry.publish(particle().ttl(10));
        let kept = registry.publish(particle());
        apply(
            &store,
            1,
            &diff(&registry.snapshot(), &store.get_session(1).unwrap(), 0, &DiffScope::Full),
        );

        registry.retract(retracted).unwrap();
        let ops = diff(&registry.snapshot(), &store.get_session(1).unwrap(), 11, &DiffScope::Full);

        assert_eq!(labels(&ops), vec![("remove", retracted), ("remove", expiring)]);
        assert!(!ops.iter().any(|op| op.id() == kept));
    }

    #[test]
    fn scoped_pass_removes_effect_it_displaces_from_a_slot() {
        let registry = EffectRegistry::new();
        let store = SessionStore::new();
        store.open_session(1);
        let old = registry.publish(tab_list("old"));
        apply(
            &store,
            1,
            &diff(&registry.snapshot(), &store.get_session(1).unwrap(), 0, &DiffScope::Full),
        );

        let new = registry.publish(tab_list("new"));
        let ops = diff(
            &registry.snapshot(),
            &store.get_session(1).unwrap(),
            0,
            &DiffScope::effects([new]),
        );
        assert_eq!(labels(&ops), vec![("remove", old), ("create", new)]);
        apply(&store, 1, &ops);

        let session = store.get_session(1).unwrap();
        assert!(!session.contains(old));
        assert!(session.contains(new));

        let full = diff(&registry.snapshot(), &session, 0, &DiffScope::Full);
        assert!(full.is_empty());
    }

    #[test]
    fn visibility_filters_per_viewer() {
        let registry = EffectRegistry::new();
        let store = SessionStore::new();
        store.open_session(1);
        store.open_session(2);
        let private = registry.publish(particle().visible_to(Visibility::only([1])));

        let snapshot = registry.snapshot();
        let for_v1 = diff(&snapshot, &store.get_session(1).unwrap(), 0, &DiffScope::Full);
        let for_v2 = diff(&snapshot, &store.get_session(2).unwrap(), 0, &DiffScope::Full);

        assert_eq!(labels(&for_v1), vec![("create", private)]);
        assert!(for_v2.is_empty());
    }

    #[test]
    fn losing_visibility_removes() {
        let registry = EffectRegistry::new();
        let store = SessionStore::new();
        store.open_session(2);
        let visible = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(true));
        let flag = std::sync::Arc::clone(&visible);
        let id = registry.publish(particle().visible_to(Visibility::predicate(move |_, _| {
            flag.load(std::sync::atomic::Ordering::SeqCst)
        })));
        apply(
            &store,
            2,
            &diff(&registry.snapshot(), &store.get_session(2).unwrap(), 0, &DiffScope::Full),
        );

        visible.store(false, std::sync::atomic::Ordering::SeqCst);
        let ops = diff(&registry.snapshot(), &store.get_session(2).unwrap(), 0, &DiffScope::Full);

        assert_eq!(labels(&ops), vec![("remove", id)]);
    }

    #[test]
    fn slot_takeover_removes_before_creating() {
        let registry = EffectRegistry::new();
        let store = SessionStore::new();
        store.open_session(1);
        let old = registry.publish(tab_list("old"));
        apply(
            &store,
            1,
            &diff(&registry.snapshot(), &store.get_session(1).unwrap(), 0, &DiffScope::Full),
        );

        let new = registry.publish(tab_list("new"));
        let ops = diff(&registry.snapshot(), &store.get_session(1).unwrap(), 0, &DiffScope::Full);

        assert_eq!(labels(&ops), vec![("remove", old), ("create", new)]);
        assert_eq!(ops[0].kind(), EffectKind::TabList);
    }

    #[test]
    fn only_one_effect_per_slot_is_created() {
        let registry = EffectRegistry::new();
        let store = SessionStore::new();
        store.open_session(1);
        let _a = registry.publish(marker().slot(3));
        let b = registry.publish(marker().slot(3));
        let c = registry.publish(marker().slot(4));

        let ops = diff(&registry.snapshot(), &store.get_session(1).unwrap(), 0, &DiffScope::Full);
        assert_eq!(labels(&ops), vec![("create", b), ("create", c)]);
    }

    #[test]
    fn scoped_diff_ignores_other_effects() {
        let registry = EffectRegistry::new();
        let store = SessionStore::new();
        store.open_session(1);
        let a = registry.publish(particle());
        let _b = registry.publish(particle());

        let ops = diff(
            &registry.snapshot(),
            &store.get_session(1).unwrap(),
            0,
            &DiffScope::effects([a]),
        );
        assert_eq!(labels(&ops), vec![("create", a)]);
    }

    #[test]
    fn rejected_version_is_skipped_until_superseded() {
        let registry = EffectRegistry::new();
        let store = SessionStore::new();
        let key = store.open_session(1);
        let id = registry.publish(particle());
        store.mark_rejected_in(key, id, 1).unwrap();

        let ops = diff(&registry.snapshot(), &store.get_session(1).unwrap(), 0, &DiffScope::Full);
        assert!(ops.is_empty());

        registry
            .relocate(id, crate::effect::Transform::default())
            .unwrap();
        let ops = diff(&registry.snapshot(), &store.get_session(1).unwrap(), 0, &DiffScope::Full);
        assert_eq!(labels(&ops), vec![("create", id)]);
    }

    #[test]
    fn mixed_pass_orders_removes_updates_creates() {
        let registry = EffectRegistry::new();
        let store = SessionStore::new();
        store.open_session(1);
        let gone = registry.publish(particle());
        let moved = registry.publish(particle());
        apply(
            &store,
            1,
            &diff(&registry.snapshot(), &store.get_session(1).unwrap(), 0, &DiffScope::Full),
        );

        let fresh = registry.publish(particle());
        registry.retract(gone).unwrap();
        registry
            .relocate(moved, crate::effect::Transform::default())
            .unwrap();

        let ops = diff(&registry.snapshot(), &store.get_session(1).unwrap(), 0, &DiffScope::Full);
        assert_eq!(
            labels(&ops),
            vec![("remove", gone), ("update", moved), ("create", fresh)]
        );
        assert_eq!(
            DiffSummary::of(&ops),
            DiffSummary {
                created: 1,
                updated: 1,
                removed: 1
            }
        );
    }

    #[test]
    fn scope_merge() {
        let a = DiffScope::effects([EffectId(1)]);
        let b = DiffScope::effects([EffectId(2)]);
        assert_eq!(a.clone().merge(b), DiffScope::effects([EffectId(1), EffectId(2)]));
        assert_eq!(a.merge(DiffScope::Full), DiffScope::Full);
    }
}
