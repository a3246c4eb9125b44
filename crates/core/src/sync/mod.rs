mod actor;
mod config;
mod events;
mod job;
mod scheduler;
mod service;

pub use config::SyncConfig;
pub use events::SyncEvent;
pub use job::{ReconcileJob, ReconcileOutcome, ReconcileReport, Trigger};
pub use scheduler::{Scheduler, SyncStats};
pub use service::{SyncHandle, SyncService};

/// Scheduler time. Advances by one per host game-loop tick.
pub type Tick = u64;
