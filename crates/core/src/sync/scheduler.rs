use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::SyncError;
use crate::net::{CodecRegistry, Injector, NetworkStats, Transport};
use crate::registry::EffectRegistry;
use crate::viewer::{SessionKey, SessionStore, ViewerId, ViewerState};

use super::actor::{ViewerHandle, ViewerTask};
use super::{ReconcileJob, SyncConfig, SyncEvent, Tick, Trigger};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub tick: Tick,
    pub viewers: usize,
    pub effects: usize,
    pub generation: u64,
    pub network: NetworkStats,
}

/// Owns one task per connected viewer and decides when each one reconciles.
///
/// Jobs for a viewer are serialized through its task queue; different viewers
/// reconcile concurrently on the runtime.
pub struct Scheduler<T: Transport> {
    registry: Arc<EffectRegistry>,
    store: Arc<SessionStore>,
    injector: Arc<Injector<T>>,
    tick: Arc<AtomicU64>,
    coalesce: bool,
    viewers: HashMap<ViewerId, ViewerHandle>,
    closing: Vec<JoinHandle<()>>,
    events: mpsc::UnboundedSender<SyncEvent>,
}

impl<T: Transport> Scheduler<T> {
    pub fn new(
        registry: Arc<EffectRegistry>,
        transport: Arc<T>,
        codecs: CodecRegistry,
        config: &SyncConfig,
        events: mpsc::UnboundedSender<SyncEvent>,
    ) -> Self {
        let store = Arc::new(SessionStore::new());
        let injector = Arc::new(Injector::new(
            transport,
            codecs,
            Arc::clone(&store),
            config.max_message_size,
        ));
        let tick = Arc::new(AtomicU64::new(registry.tick()));

        Self {
            registry,
            store,
            injector,
            tick,
            coalesce: config.coalesce,
            viewers: HashMap::new(),
            closing: Vec::new(),
            events,
        }
    }

    pub fn registry(&self) -> &Arc<EffectRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn tick(&self) -> Tick {
        self.tick.load(Ordering::Acquire)
    }

    pub fn is_connected(&self, viewer: ViewerId) -> bool {
        self.viewers.contains_key(&viewer)
    }

    /// Moves to the next tick: drops expired effects, then queues a full pass
    /// for every viewer that is behind the registry or was left dirty.
    pub fn advance(&mut self) -> Tick {
        let tick = self.tick.fetch_add(1, Ordering::AcqRel) + 1;
        self.registry.set_tick(tick);

        let expired = self.registry.purge_expired(tick);
        if !expired.is_empty() {
            log::debug!("tick {}: {} effects expired", tick, expired.len());
            let _ = self.events.send(SyncEvent::Expired {
                tick,
                effects: expired,
            });
        }

        let generation = self.registry.generation();
        for (viewer, handle) in &self.viewers {
            if self.store.needs_reconcile(*viewer, generation) && handle.schedule_tick() {
                log::trace!("tick {}: queued viewer {}", tick, viewer);
            }
        }

        self.reap();
        tick
    }

    /// Opens a fresh session and queues a full pass against the whole snapshot.
    /// A viewer that is already connected is closed first, and the new task
    /// waits for the old one to exit before it sends anything.
    pub fn join(&mut self, viewer: ViewerId) -> SessionKey {
        let predecessor = if self.viewers.contains_key(&viewer) {
            log::warn!("viewer {} joined twice, replacing its session", viewer);
            self.close(viewer)
        } else {
            None
        };

        let key = self.store.open_session(viewer);
        // A fresh session always starts in Joining.
        let _ = self.store.set_state_in(key, ViewerState::Active);

        let handle = ViewerTask {
            key,
            registry: Arc::clone(&self.registry),
            store: Arc::clone(&self.store),
            injector: Arc::clone(&self.injector),
            tick: Arc::clone(&self.tick),
            events: self.events.clone(),
            coalesce: self.coalesce,
            predecessor,
        }
        .spawn();
        handle.submit(ReconcileJob::full(viewer, Trigger::JOIN));
        self.viewers.insert(viewer, handle);

        log::info!("viewer {} joined (incarnation {})", viewer, key.incarnation);
        let _ = self.events.send(SyncEvent::ViewerOpened { viewer });
        key
    }

    pub fn world_change(&mut self, viewer: ViewerId) -> Result<(), SyncError> {
        self.request(ReconcileJob::full(viewer, Trigger::WORLD_CHANGE))
    }

    /// Forces the next tick to reconcile `viewer` even if the registry did not
    /// change, e.g. because a visibility predicate depends on outside state.
    pub fn invalidate(&mut self, viewer: ViewerId) -> Result<(), SyncError> {
        if !self.viewers.contains_key(&viewer) {
            return Err(SyncError::ViewerNotFound(viewer));
        }
        Ok(self.store.mark_dirty(viewer)?)
    }

    pub fn request(&mut self, job: ReconcileJob) -> Result<(), SyncError> {
        let viewer = job.viewer;
        let handle = self
            .viewers
            .get(&viewer)
            .ok_or(SyncError::ViewerNotFound(viewer))?;

        if !handle.submit(job) {
            return Err(SyncError::SessionClosed(viewer));
        }
        Ok(())
    }

    /// Cancels the viewer's in-flight pass and closes its session. Returns
    /// false if the viewer was not connected.
    pub fn disconnect(&mut self, viewer: ViewerId) -> bool {
        match self.close(viewer) {
            Some(task) => {
                self.closing.push(task);
                true
            }
            None => false,
        }
    }

    /// Cancels the viewer's task and closes its session, handing back the
    /// task so the caller decides who waits for it.
    fn close(&mut self, viewer: ViewerId) -> Option<JoinHandle<()>> {
        let Some(handle) = self.viewers.remove(&viewer) else {
            // Still safe to call after the connection is gone.
            self.store.close_session(viewer);
            return None;
        };

        let task = handle.cancel();
        self.store.close_session(viewer);

        log::info!("viewer {} disconnected", viewer);
        let _ = self.events.send(SyncEvent::ViewerClosed { viewer });
        Some(task)
    }

    /// Waits until every job queued so far has finished and every closed
    /// viewer's task has exited.
    pub async fn settle(&mut self) {
        let barriers: Vec<_> = self
            .viewers
            .values()
            .filter_map(ViewerHandle::barrier)
            .collect();

        for barrier in barriers {
            let _ = barrier.await;
        }
        for task in self.closing.drain(..) {
            let _ = task.await;
        }
    }

    pub fn stats(&self) -> SyncStats {
        SyncStats {
            tick: self.tick(),
            viewers: self.viewers.len(),
            effects: self.registry.len(),
            generation: self.registry.generation(),
            network: self.injector.stats(),
        }
    }

    /// Closes every session and waits for all viewer tasks to exit.
    pub async fn shutdown(&mut self) {
        let viewers: Vec<ViewerId> = self.viewers.keys().copied().collect();
        for viewer in viewers {
            self.disconnect(viewer);
        }
        for task in self.closing.drain(..) {
            let _ = task.await;
        }
    }

    fn reap(&mut self) {
        self.closing.retain(|task| !task.is_finished());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::{EffectDraft, HologramStyle, MarkerStyle, Style};
    use crate::net::{ClientboundVisual, MemoryTransport};
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn marker(label: &str) -> EffectDraft {
        EffectDraft::from_style(&Style::Marker(MarkerStyle {
            icon: "flag".into(),
            label: Some(label.into()),
            color_rgb: 0xff_00_00,
        }))
        .unwrap()
    }

    fn hologram() -> EffectDraft {
        EffectDraft::from_style(&Style::Hologram(HologramStyle {
            lines: vec!["first".into(), "second".into()],
            line_spacing: 0.3,
            background_argb: 0,
            see_through: true,
        }))
        .unwrap()
    }

    fn scheduler() -> (
        Scheduler<MemoryTransport>,
        Arc<MemoryTransport>,
        mpsc::UnboundedReceiver<SyncEvent>,
    ) {
        let transport = Arc::new(MemoryTransport::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = Scheduler::new(
            Arc::new(EffectRegistry::new()),
            Arc::clone(&transport),
            CodecRegistry::with_defaults(),
            &SyncConfig::manual(),
            tx,
        );
        (scheduler, transport, rx)
    }

    #[tokio::test]
    async fn join_renders_everything_eligible() {
        let (mut scheduler, transport, _events) = scheduler();
        let id = scheduler.registry().publish(marker("spawn"));

        scheduler.join(1);
        scheduler.settle().await;

        let session = scheduler.store().get_session(1).unwrap();
        assert_eq!(session.state(), ViewerState::Active);
        assert!(session.contains(id));
        assert_eq!(transport.delivered(1).len(), 1);
    }

    #[tokio::test]
    async fn advance_only_queues_viewers_behind_the_registry() {
        let (mut scheduler, transport, _events) = scheduler();
        scheduler.join(1);
        scheduler.settle().await;

        scheduler.advance();
        scheduler.settle().await;
        assert!(transport.delivered(1).is_empty());

        let id = scheduler.registry().publish(marker("new"));
        scheduler.advance();
        scheduler.settle().await;

        assert!(scheduler.store().get_session(1).unwrap().contains(id));
        assert_eq!(transport.delivered(1).len(), 1);
    }

    #[tokio::test]
    async fn request_for_unknown_viewer_is_not_found() {
        let (mut scheduler, _transport, _events) = scheduler();
        let err = scheduler
            .request(ReconcileJob::full(9, Trigger::REQUEST))
            .unwrap_err();
        assert_eq!(err, SyncError::ViewerNotFound(9));
    }

    #[tokio::test]
    async fn request_replies_with_report() {
        let (mut scheduler, _transport, _events) = scheduler();
        scheduler.join(1);
        let id = scheduler.registry().publish(marker("late"));

        let (tx, rx) = oneshot::channel();
        scheduler
            .request(ReconcileJob::effects(1, [id], Trigger::REQUEST).with_reply(tx))
            .unwrap();
        let report = rx.await.unwrap();

        assert!(report.trigger.contains(Trigger::REQUEST));
        assert!(scheduler.store().get_session(1).unwrap().contains(id));
    }

    #[tokio::test]
    async fn disconnect_closes_session_and_emits_event() {
        let (mut scheduler, _transport, mut events) = scheduler();
        scheduler.join(1);

        assert!(scheduler.disconnect(1));
        assert!(!scheduler.disconnect(1));
        scheduler.settle().await;

        assert!(scheduler.store().get_session(1).is_none());
        assert_eq!(events.recv().await, Some(SyncEvent::ViewerOpened { viewer: 1 }));
        assert_eq!(events.recv().await, Some(SyncEvent::ViewerClosed { viewer: 1 }));
    }

    #[tokio::test]
    async fn rejoin_starts_a_new_incarnation() {
        let (mut scheduler, _transport, _events) = scheduler();
        let first = scheduler.join(1);
        let second = scheduler.join(1);
        scheduler.settle().await;

        assert_ne!(first.incarnation, second.incarnation);
        assert_eq!(
            scheduler.store().get_session(1).unwrap().incarnation(),
            second.incarnation
        );
    }

    #[tokio::test]
    async fn rejoin_waits_for_the_previous_task() {
        let (mut scheduler, transport, _events) = scheduler();
        scheduler.registry().publish(hologram());
        transport.set_delay(Some(Duration::from_millis(20)));

        scheduler.join(1);
        tokio::time::sleep(Duration::from_millis(5)).await;
        scheduler.join(1);
        scheduler.settle().await;

        let sequences: Vec<u32> = transport
            .delivered(1)
            .iter()
            .map(|packet| packet.header.sequence)
            .collect();
        // The first task gets one frame out before it sees the cancellation,
        // then the second task sends its whole pass.
        assert_eq!(sequences, vec![0, 0, 1]);

        let visuals = transport.delivered_visuals(1);
        assert!(matches!(visuals[0], ClientboundVisual::SpawnEntity { .. }));
        assert!(matches!(visuals[1], ClientboundVisual::SpawnEntity { .. }));
        assert!(matches!(visuals[2], ClientboundVisual::HologramLines { .. }));
    }

    #[tokio::test]
    async fn invalidate_forces_a_tick_pass() {
        let (mut scheduler, _transport, _events) = scheduler();
        scheduler.join(1);
        scheduler.settle().await;
        let generation = scheduler.registry().generation();
        assert!(!scheduler.store().needs_reconcile(1, generation));

        scheduler.invalidate(1).unwrap();
        assert!(scheduler.store().needs_reconcile(1, generation));

        scheduler.advance();
        scheduler.settle().await;
        assert!(!scheduler.store().needs_reconcile(1, generation));
    }
}
