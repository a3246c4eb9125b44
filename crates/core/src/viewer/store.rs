use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::effect::{EffectDescriptor, EffectId};
use crate::error::SessionError;
use crate::sync::Tick;

use super::{ViewerId, ViewerSession, ViewerState};

/// Identifies one incarnation of a viewer's session. A viewer that disconnects
/// and rejoins gets a new key, so confirmations addressed to the old one are
/// dropped instead of leaking into the new session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub viewer: ViewerId,
    pub incarnation: u64,
}

/// Per-viewer record of what each client is believed to render.
///
/// Locks are held only for the duration of one lookup or mutation. Exclusive
/// ownership of a session during reconciliation is the scheduler's job.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<ViewerId, ViewerSession>>,
    /// Viewers whose last session was closed and not reopened since.
    closed: RwLock<HashSet<ViewerId>>,
    next_incarnation: AtomicU64,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_session(&self, viewer: ViewerId) -> Option<ViewerSession> {
        self.sessions.read().get(&viewer).cloned()
    }

    pub fn session_in(&self, key: SessionKey) -> Option<ViewerSession> {
        self.sessions
            .read()
            .get(&key.viewer)
            .filter(|s| s.incarnation() == key.incarnation)
            .cloned()
    }

    /// Opens a fresh session, replacing any stale one left for the same viewer.
    pub fn open_session(&self, viewer: ViewerId) -> SessionKey {
        let incarnation = self.next_incarnation.fetch_add(1, Ordering::Relaxed);
        let mut sessions = self.sessions.write();
        let previous = sessions.insert(viewer, ViewerSession::new(viewer, incarnation));
        self.closed.write().remove(&viewer);
        drop(sessions);

        if previous.is_some() {
            log::warn!("viewer {} reopened without closing its previous session", viewer);
        }

        SessionKey {
            viewer,
            incarnation,
        }
    }

    /// Idempotent. Returns the final session the first time it is called.
    pub fn close_session(&self, viewer: ViewerId) -> Option<ViewerSession> {
        let mut sessions = self.sessions.write();
        let mut session = sessions.remove(&viewer)?;
        self.closed.write().insert(viewer);
        drop(sessions);

        session.set_state(ViewerState::Closing);
        session.set_state(ViewerState::Closed);
        Some(session)
    }

    pub fn mark_rendered(
        &self,
        viewer: ViewerId,
        descriptor: &EffectDescriptor,
    ) -> Result<(), SessionError> {
        self.with_session(viewer, None, |s| s.record_rendered(descriptor))
    }

    pub fn mark_removed(&self, viewer: ViewerId, id: EffectId) -> Result<(), SessionError> {
        self.with_session(viewer, None, |s| {
            s.record_removed(id);
        })
    }

    pub fn mark_dirty(&self, viewer: ViewerId) -> Result<(), SessionError> {
        self.with_session(viewer, None, ViewerSession::mark_dirty)
    }

    pub fn mark_rendered_in(
        &self,
        key: SessionKey,
        descriptor: &EffectDescriptor,
    ) -> Result<(), SessionError> {
        self.with_session(key.viewer, Some(key.incarnation), |s| {
            s.record_rendered(descriptor)
        })
    }

    pub fn mark_removed_in(&self, key: SessionKey, id: EffectId) -> Result<(), SessionError> {
        self.with_session(key.viewer, Some(key.incarnation), |s| {
            s.record_removed(id);
        })
    }

    pub fn mark_rejected_in(
        &self,
        key: SessionKey,
        id: EffectId,
        version: u64,
    ) -> Result<(), SessionError> {
        self.with_session(key.viewer, Some(key.incarnation), |s| {
            s.record_rejected(id, version)
        })
    }

    pub fn mark_synced_in(
        &self,
        key: SessionKey,
        generation: u64,
        tick: Tick,
    ) -> Result<(), SessionError> {
        self.with_session(key.viewer, Some(key.incarnation), |s| {
            s.record_synced(generation, tick)
        })
    }

    pub fn mark_dirty_in(&self, key: SessionKey) -> Result<(), SessionError> {
        self.with_session(key.viewer, Some(key.incarnation), ViewerSession::mark_dirty)
    }

    pub fn set_state_in(&self, key: SessionKey, state: ViewerState) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write();
        let Some(session) = sessions
            .get_mut(&key.viewer)
            .filter(|s| s.incarnation() == key.incarnation)
        else {
            return Err(SessionError::SessionClosed(key.viewer));
        };

        let from = session.state();
        if from == state {
            return Ok(());
        }
        if !session.set_state(state) {
            return Err(SessionError::InvalidTransition {
                viewer: key.viewer,
                from: from.as_str(),
                to: state.as_str(),
            });
        }
        Ok(())
    }

    pub fn needs_reconcile(&self, viewer: ViewerId, generation: u64) -> bool {
        self.sessions
            .read()
            .get(&viewer)
            .is_some_and(|s| s.state().is_live() && s.needs_reconcile(generation))
    }

    pub fn viewers(&self) -> Vec<ViewerId> {
        let mut viewers: Vec<ViewerId> = self.sessions.read().keys().copied().collect();
        viewers.sort_unstable();
        viewers
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_session<R>(
        &self,
        viewer: ViewerId,
        incarnation: Option<u64>,
        f: impl FnOnce(&mut ViewerSession) -> R,
    ) -> Result<R, SessionError> {
        let mut sessions = self.sessions.write();
        match sessions.get_mut(&viewer) {
            Some(session) if incarnation.is_none_or(|i| i == session.incarnation()) => {
                Ok(f(session))
            }
            Some(_) => Err(SessionError::SessionClosed(viewer)),
            None if self.closed.read().contains(&viewer) => {
                Err(SessionError::SessionClosed(viewer))
            }
            None => Err(SessionError::NotFound(viewer)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::{EffectDraft, Style, TabListStyle};

    fn descriptor(id: u64) -> EffectDescriptor {
        let draft = EffectDraft::from_style(&Style::TabList(TabListStyle {
            header: String::new(),
            footer: String::new(),
        }))
        .unwrap();
        EffectDescriptor::from_draft(EffectId(id), draft, 0)
    }

    #[test]
    fn open_mark_close() {
        let store = SessionStore::new();
        store.open_session(1);

        store.mark_rendered(1, &descriptor(10)).unwrap();
        assert_eq!(store.get_session(1).unwrap().rendered_version(EffectId(10)), Some(1));

        store.mark_removed(1, EffectId(10)).unwrap();
        assert!(!store.get_session(1).unwrap().contains(EffectId(10)));

        let closed = store.close_session(1).unwrap();
        assert_eq!(closed.state(), ViewerState::Closed);
        assert!(store.get_session(1).is_none());
    }

    #[test]
    fn close_is_idempotent() {
        let store = SessionStore::new();
        store.open_session(1);

        assert!(store.close_session(1).is_some());
        assert!(store.close_session(1).is_none());
        assert!(store.close_session(2).is_none());
    }

    #[test]
    fn marks_after_close_are_rejected() {
        let store = SessionStore::new();
        store.open_session(1);
        store.close_session(1);

        assert_eq!(
            store.mark_rendered(1, &descriptor(10)),
            Err(SessionError::SessionClosed(1))
        );
        assert!(store.is_empty());
    }

    #[test]
    fn unknown_viewer_is_not_found() {
        let store = SessionStore::new();

        assert_eq!(
            store.mark_rendered(7, &descriptor(10)),
            Err(SessionError::NotFound(7))
        );
        assert_eq!(store.mark_dirty(7), Err(SessionError::NotFound(7)));

        store.open_session(7);
        store.close_session(7);
        assert_eq!(store.mark_dirty(7), Err(SessionError::SessionClosed(7)));
    }

    #[test]
    fn stale_incarnation_cannot_touch_new_session() {
        let store = SessionStore::new();
        let old = store.open_session(1);
        store.close_session(1);
        let new = store.open_session(1);

        assert_eq!(
            store.mark_rendered_in(old, &descriptor(10)),
            Err(SessionError::SessionClosed(1))
        );
        store.mark_rendered_in(new, &descriptor(11)).unwrap();

        let session = store.get_session(1).unwrap();
        assert!(!session.contains(EffectId(10)));
        assert!(session.contains(EffectId(11)));
    }

    #[test]
    fn synced_generation_drives_needs_reconcile() {
        let store = SessionStore::new();
        let key = store.open_session(1);
        store.set_state_in(key, ViewerState::Active).unwrap();

        assert!(store.needs_reconcile(1, 0));
        store.mark_synced_in(key, 3, 12).unwrap();
        assert!(!store.needs_reconcile(1, 3));
        assert!(store.needs_reconcile(1, 4));

        store.mark_dirty(1).unwrap();
        assert!(store.needs_reconcile(1, 3));
        assert_eq!(store.get_session(1).unwrap().last_acked_tick(), 12);
    }

    #[test]
    fn invalid_transition_is_reported() {
        let store = SessionStore::new();
        let key = store.open_session(1);

        assert!(matches!(
            store.set_state_in(key, ViewerState::Reconciling),
            Err(SessionError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn rejection_is_cleared_by_a_successful_render() {
        let store = SessionStore::new();
        let key = store.open_session(1);

        store.mark_rejected_in(key, EffectId(10), 1).unwrap();
        assert!(store.get_session(1).unwrap().is_rejected(EffectId(10), 1));

        store.mark_rendered_in(key, &descriptor(10)).unwrap();
        assert!(!store.get_session(1).unwrap().is_rejected(EffectId(10), 1));
    }
}
