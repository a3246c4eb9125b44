use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::diff::{DiffScope, diff};
use crate::net::{ApplyOutcome, ApplyReport, Injector, Transport};
use crate::registry::EffectRegistry;
use crate::viewer::{SessionKey, SessionStore, ViewerState};

use super::{ReconcileJob, ReconcileReport, SyncEvent, Tick, Trigger};

pub(crate) enum ViewerCommand {
    Reconcile(ReconcileJob),
    Barrier(oneshot::Sender<()>),
}

/// Scheduler side of one viewer's task.
pub(crate) struct ViewerHandle {
    key: SessionKey,
    tx: mpsc::UnboundedSender<ViewerCommand>,
    cancelled: Arc<AtomicBool>,
    queued: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl ViewerHandle {
    pub fn key(&self) -> SessionKey {
        self.key
    }

    pub fn submit(&self, job: ReconcileJob) -> bool {
        self.tx.send(ViewerCommand::Reconcile(job)).is_ok()
    }

    /// Queues a tick pass unless one is already waiting.
    pub fn schedule_tick(&self) -> bool {
        if self.queued.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.submit(ReconcileJob::full(self.key.viewer, Trigger::TICK))
    }

    pub fn barrier(&self) -> Option<oneshot::Receiver<()>> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(ViewerCommand::Barrier(tx)).ok()?;
        Some(rx)
    }

    /// Flags the running pass to stop before its next operation and closes the
    /// queue. The task exits once it observes either.
    pub fn cancel(self) -> JoinHandle<()> {
        self.cancelled.store(true, Ordering::Release);
        drop(self.tx);
        self.task
    }
}

pub(crate) struct ViewerTask<T: Transport> {
    pub key: SessionKey,
    pub registry: Arc<EffectRegistry>,
    pub store: Arc<SessionStore>,
    pub injector: Arc<Injector<T>>,
    pub tick: Arc<AtomicU64>,
    pub events: mpsc::UnboundedSender<SyncEvent>,
    pub coalesce: bool,
    /// Task of the viewer's previous incarnation. It must exit before this
    /// task sends anything.
    pub predecessor: Option<JoinHandle<()>>,
}

impl<T: Transport> ViewerTask<T> {
    pub fn spawn(mut self) -> ViewerHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let predecessor = self.predecessor.take();
        let cancelled = Arc::new(AtomicBool::new(false));
        let queued = Arc::new(AtomicBool::new(false));
        let key = self.key;

        let worker = ViewerWorker {
            task: self,
            rx,
            cancelled: Arc::clone(&cancelled),
            queued: Arc::clone(&queued),
            sequence: 0,
            predecessor,
        };
        let task = tokio::spawn(worker.run());

        ViewerHandle {
            key,
            tx,
            cancelled,
            queued,
            task,
        }
    }
}

struct ViewerWorker<T: Transport> {
    task: ViewerTask<T>,
    rx: mpsc::UnboundedReceiver<ViewerCommand>,
    cancelled: Arc<AtomicBool>,
    queued: Arc<AtomicBool>,
    sequence: u32,
    predecessor: Option<JoinHandle<()>>,
}

impl<T: Transport> ViewerWorker<T> {
    async fn run(mut self) {
        let viewer = self.task.key.viewer;
        if let Some(previous) = self.predecessor.take() {
            let _ = previous.await;
        }
        log::debug!("viewer {} task started", viewer);

        while let Some(command) = self.rx.recv().await {
            if self.cancelled.load(Ordering::Acquire) {
                break;
            }

            match command {
                ViewerCommand::Barrier(reply) => {
                    let _ = reply.send(());
                }
                ViewerCommand::Reconcile(mut job) => {
                    let mut barriers = Vec::new();
                    if self.task.coalesce {
                        while let Ok(next) = self.rx.try_recv() {
                            match next {
                                ViewerCommand::Reconcile(other) => job.merge(other),
                                ViewerCommand::Barrier(reply) => barriers.push(reply),
                            }
                        }
                    }
                    if job.trigger.contains(Trigger::TICK) || self.task.coalesce {
                        self.queued.store(false, Ordering::Release);
                    }

                    self.reconcile(job).await;

                    for reply in barriers {
                        let _ = reply.send(());
                    }
                }
            }
        }

        log::debug!("viewer {} task stopped", viewer);
    }

    async fn reconcile(&mut self, job: ReconcileJob) {
        let ReconcileJob {
            scope,
            trigger,
            replies,
            ..
        } = job;
        let tick = self.task.tick.load(Ordering::Acquire);

        let report = self.pass(&scope, trigger, tick).await;
        self.emit(&report);

        for reply in replies {
            let _ = reply.send(report.clone());
        }
    }

    async fn pass(&mut self, scope: &DiffScope, trigger: Trigger, tick: Tick) -> ReconcileReport {
        let key = self.task.key;
        let store = &self.task.store;

        if let Err(err) = store.set_state_in(key, ViewerState::Reconciling) {
            log::debug!("viewer {}: not reconciling: {}", key.viewer, err);
            return ReconcileReport::skipped(key.viewer, tick, trigger);
        }

        // Owned snapshot; the registry lock is released before any await.
        let snapshot = self.task.registry.snapshot();
        let Some(session) = store.session_in(key) else {
            return ReconcileReport::skipped(key.viewer, tick, trigger);
        };

        let operations = diff(&snapshot, &session, tick, scope);
        let applied = self
            .task
            .injector
            .apply(key, operations, &mut self.sequence, &self.cancelled)
            .await;

        match &applied.outcome {
            ApplyOutcome::Completed if scope.is_full() => {
                let _ = store.mark_synced_in(key, snapshot.generation(), tick);
            }
            ApplyOutcome::DeliveryFailed(_) => {
                let _ = store.mark_dirty_in(key);
            }
            _ => {}
        }

        if matches!(
            applied.outcome,
            ApplyOutcome::Completed | ApplyOutcome::DeliveryFailed(_)
        ) {
            let _ = store.set_state_in(key, ViewerState::Active);
        }

        report_from(key, tick, trigger, applied)
    }

    fn emit(&self, report: &ReconcileReport) {
        let events = &self.task.events;
        let viewer = report.viewer;

        for (effect, err) in &report.rejected {
            let _ = events.send(SyncEvent::EncodingFailed {
                viewer,
                effect: *effect,
                reason: err.to_string(),
            });
        }

        match &report.outcome {
            ApplyOutcome::DeliveryFailed(err) => {
                log::warn!("viewer {}: delivery failed at tick {}: {}", viewer, report.tick, err);
                let _ = events.send(SyncEvent::DeliveryFailed {
                    viewer,
                    reason: err.to_string(),
                });
            }
            ApplyOutcome::Completed if !report.is_noop() => {
                log::debug!(
                    "viewer {} reconciled at tick {}: +{} ~{} -{}",
                    viewer,
                    report.tick,
                    report.created.len(),
                    report.updated.len(),
                    report.removed.len()
                );
                let _ = events.send(SyncEvent::Reconciled {
                    viewer,
                    tick: report.tick,
                    trigger: report.trigger,
                    created: report.created.len(),
                    updated: report.updated.len(),
                    removed: report.removed.len(),
                });
            }
            _ => {}
        }
    }
}

fn report_from(
    key: SessionKey,
    tick: Tick,
    trigger: Trigger,
    applied: ApplyReport,
) -> ReconcileReport {
    ReconcileReport {
        viewer: key.viewer,
        tick,
        trigger,
        created: applied.created,
        updated: applied.updated,
        removed: applied.removed,
        rejected: applied.rejected,
        outcome: applied.outcome,
    }
}
