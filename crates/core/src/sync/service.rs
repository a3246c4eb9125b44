use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;

use crate::diff::DiffScope;
use crate::error::SyncError;
use crate::net::{ApplyOutcome, CodecRegistry, Transport};
use crate::registry::EffectRegistry;
use crate::viewer::{SessionStore, ViewerId, ViewerSession};

use super::{
    ReconcileJob, ReconcileReport, Scheduler, SyncConfig, SyncEvent, SyncStats, Tick, Trigger,
};

enum Command {
    Join(ViewerId),
    WorldChange(ViewerId),
    Disconnect(ViewerId),
    Invalidate(ViewerId),
    Reconcile {
        job: ReconcileJob,
        accepted: oneshot::Sender<Result<(), SyncError>>,
    },
    Advance {
        ticks: u64,
        reply: oneshot::Sender<Tick>,
    },
    Settle(oneshot::Sender<()>),
    Stats(oneshot::Sender<SyncStats>),
    Stop(oneshot::Sender<()>),
}

/// Runs the scheduler on its own task. Everything else talks to it through a
/// [`SyncHandle`].
pub struct SyncService<T: Transport> {
    scheduler: Scheduler<T>,
    config: SyncConfig,
    rx: mpsc::UnboundedReceiver<Command>,
}

impl<T: Transport> SyncService<T> {
    /// Spawns the service on the current tokio runtime.
    pub fn start(
        registry: Arc<EffectRegistry>,
        transport: Arc<T>,
        codecs: CodecRegistry,
        config: SyncConfig,
    ) -> (SyncHandle, mpsc::UnboundedReceiver<SyncEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (tx, rx) = mpsc::unbounded_channel();

        let scheduler = Scheduler::new(registry, transport, codecs, &config, events_tx);
        let handle = SyncHandle {
            tx,
            registry: Arc::clone(scheduler.registry()),
            store: Arc::clone(scheduler.store()),
        };

        log::info!(
            "sync service started ({} ticks/s, auto tick {})",
            config.tick_rate,
            config.auto_tick
        );
        let service = Self {
            scheduler,
            config,
            rx,
        };
        tokio::spawn(service.run());

        (handle, events_rx)
    }

    async fn run(mut self) {
        let mut interval = tokio::time::interval(self.config.tick_duration());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let auto_tick = self.config.auto_tick;

        loop {
            tokio::select! {
                _ = interval.tick(), if auto_tick => {
                    self.scheduler.advance();
                }
                command = self.rx.recv() => {
                    let Some(command) = command else {
                        // Every handle is gone.
                        self.scheduler.shutdown().await;
                        break;
                    };
                    if !self.handle(command).await {
                        break;
                    }
                }
            }
        }

        log::info!("sync service stopped at tick {}", self.scheduler.tick());
    }

    /// Returns false once the service should stop.
    async fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Join(viewer) => {
                self.scheduler.join(viewer);
            }
            Command::WorldChange(viewer) => {
                if let Err(err) = self.scheduler.world_change(viewer) {
                    log::debug!("world change ignored: {}", err);
                }
            }
            Command::Disconnect(viewer) => {
                self.scheduler.disconnect(viewer);
            }
            Command::Invalidate(viewer) => {
                if let Err(err) = self.scheduler.invalidate(viewer) {
                    log::debug!("invalidate ignored: {}", err);
                }
            }
            Command::Reconcile { job, accepted } => {
                let _ = accepted.send(self.scheduler.request(job));
            }
            Command::Advance { ticks, reply } => {
                let mut tick = self.scheduler.tick();
                for _ in 0..ticks {
                    tick = self.scheduler.advance();
                }
                let _ = reply.send(tick);
            }
            Command::Settle(reply) => {
                self.scheduler.settle().await;
                let _ = reply.send(());
            }
            Command::Stats(reply) => {
                let _ = reply.send(self.scheduler.stats());
            }
            Command::Stop(reply) => {
                self.rx.close();
                self.scheduler.shutdown().await;
                let _ = reply.send(());
                return false;
            }
        }
        true
    }
}

/// Cheap to clone. Every method fails with [`SyncError::Stopped`] once the
/// service is gone.
#[derive(Clone)]
pub struct SyncHandle {
    tx: mpsc::UnboundedSender<Command>,
    registry: Arc<EffectRegistry>,
    store: Arc<SessionStore>,
}

impl SyncHandle {
    pub fn registry(&self) -> &Arc<EffectRegistry> {
        &self.registry
    }

    pub fn session(&self, viewer: ViewerId) -> Option<ViewerSession> {
        self.store.get_session(viewer)
    }

    pub fn join(&self, viewer: ViewerId) -> Result<(), SyncError> {
        self.send(Command::Join(viewer))
    }

    pub fn world_change(&self, viewer: ViewerId) -> Result<(), SyncError> {
        self.send(Command::WorldChange(viewer))
    }

    pub fn disconnect(&self, viewer: ViewerId) -> Result<(), SyncError> {
        self.send(Command::Disconnect(viewer))
    }

    /// Makes the next tick re-evaluate `viewer` against the current snapshot.
    pub fn invalidate(&self, viewer: ViewerId) -> Result<(), SyncError> {
        self.send(Command::Invalidate(viewer))
    }

    /// Reconciles `viewer` now and waits for the pass to finish.
    pub async fn reconcile(
        &self,
        viewer: ViewerId,
        scope: DiffScope,
    ) -> Result<ReconcileReport, SyncError> {
        let (report_tx, report_rx) = oneshot::channel();
        let (accepted_tx, accepted_rx) = oneshot::channel();
        let job = ReconcileJob {
            viewer,
            scope,
            trigger: Trigger::REQUEST,
            replies: Vec::new(),
        }
        .with_reply(report_tx);

        self.send(Command::Reconcile {
            job,
            accepted: accepted_tx,
        })?;
        accepted_rx.await.map_err(|_| SyncError::Stopped)??;

        let report = report_rx
            .await
            .map_err(|_| SyncError::SessionClosed(viewer))?;

        match report.outcome {
            ApplyOutcome::Completed => Ok(report),
            ApplyOutcome::DeliveryFailed(source) => {
                Err(SyncError::DeliveryFailure { viewer, source })
            }
            ApplyOutcome::Cancelled | ApplyOutcome::SessionClosed => {
                Err(SyncError::SessionClosed(viewer))
            }
        }
    }

    /// Advances the scheduler by `ticks` and returns the new tick. Used when
    /// the host drives time itself.
    pub async fn advance(&self, ticks: u64) -> Result<Tick, SyncError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Advance { ticks, reply })?;
        rx.await.map_err(|_| SyncError::Stopped)
    }

    /// Resolves once every job queued before this call has finished.
    pub async fn settle(&self) -> Result<(), SyncError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Settle(reply))?;
        rx.await.map_err(|_| SyncError::Stopped)
    }

    pub async fn stats(&self) -> Result<SyncStats, SyncError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stats(reply))?;
        rx.await.map_err(|_| SyncError::Stopped)
    }

    /// Closes every session and ends the tick loop.
    pub async fn stop(&self) -> Result<(), SyncError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stop(reply))?;
        rx.await.map_err(|_| SyncError::Stopped)
    }

    fn send(&self, command: Command) -> Result<(), SyncError> {
        self.tx.send(command).map_err(|_| SyncError::Stopped)
    }
}
