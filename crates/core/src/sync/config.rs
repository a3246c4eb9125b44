use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::net::{DEFAULT_TICK_RATE, MAX_PACKET_SIZE};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub tick_rate: u32,
    /// When false the host drives ticks through `SyncHandle::advance`.
    pub auto_tick: bool,
    /// Merge jobs that queued up behind a running pass into one.
    pub coalesce: bool,
    pub max_message_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tick_rate: DEFAULT_TICK_RATE,
            auto_tick: true,
            coalesce: true,
            max_message_size: MAX_PACKET_SIZE,
        }
    }
}

impl SyncConfig {
    pub fn manual() -> Self {
        Self {
            auto_tick: false,
            ..Default::default()
        }
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate.max(1) as f64)
    }
}
