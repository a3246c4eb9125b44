use std::net::SocketAddr;

use visual::{SyncEvent, ViewerId};

use crate::tui::LogLevel;

#[derive(Debug, Clone)]
pub enum ServerEvent {
    Listening {
        addr: SocketAddr,
    },
    ViewerConnected {
        viewer: ViewerId,
        addr: SocketAddr,
        name: String,
    },
    ViewerDisconnected {
        viewer: ViewerId,
        reason: DisconnectReason,
    },
    WorldChanged {
        viewer: ViewerId,
        world: u32,
    },
    ConnectionDenied {
        addr: SocketAddr,
        reason: String,
    },
    Sync(SyncEvent),
    Error {
        message: String,
    },
}

impl ServerEvent {
    /// Log line for this event, or `None` for per-tick noise.
    pub fn describe(&self) -> Option<(LogLevel, String)> {
        let line = match self {
            ServerEvent::Listening { addr } => (LogLevel::Info, format!("Listening on {}", addr)),
            ServerEvent::ViewerConnected { viewer, addr, name } => (
                LogLevel::Info,
                format!("Viewer {} ({}) connected from {}", viewer, name, addr),
            ),
            ServerEvent::ViewerDisconnected { viewer, reason } => {
                (LogLevel::Info, format!("Viewer {} {}", viewer, reason.as_str()))
            }
            ServerEvent::WorldChanged { viewer, world } => (
                LogLevel::Info,
                format!("Viewer {} moved to world {}", viewer, world),
            ),
            ServerEvent::ConnectionDenied { addr, reason } => (
                LogLevel::Warn,
                format!("Connection denied to {}: {}", addr, reason),
            ),
            ServerEvent::Error { message } => (LogLevel::Error, message.clone()),
            ServerEvent::Sync(event) => match event {
                SyncEvent::Reconciled {
                    viewer,
                    tick,
                    created,
                    updated,
                    removed,
                    ..
                } => (
                    LogLevel::Info,
                    format!(
                        "Viewer {} synced at tick {}: +{} ~{} -{}",
                        viewer, tick, created, updated, removed
                    ),
                ),
                SyncEvent::DeliveryFailed { viewer, reason } => (
                    LogLevel::Warn,
                    format!("Delivery to viewer {} failed: {}", viewer, reason),
                ),
                SyncEvent::EncodingFailed {
                    viewer,
                    effect,
                    reason,
                } => (
                    LogLevel::Warn,
                    format!("{} skipped for viewer {}: {}", effect, viewer, reason),
                ),
                SyncEvent::Expired { tick, effects } => (
                    LogLevel::Info,
                    format!("{} effects expired at tick {}", effects.len(), tick),
                ),
                SyncEvent::ViewerOpened { .. } | SyncEvent::ViewerClosed { .. } => return None,
            },
        };
        Some(line)
    }
}

#[derive(Debug, Clone, Copy)]
pub enum DisconnectReason {
    Graceful,
    Timeout,
    Kicked,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Graceful => "disconnected",
            DisconnectReason::Timeout => "timed out",
            DisconnectReason::Kicked => "kicked",
        }
    }
}

/// Requests from the operator, handled on the next loop iteration.
#[derive(Debug, Clone, Copy)]
pub enum ServerCommand {
    Kick(ViewerId),
    Shutdown,
}
