use crate::effect::{EffectId, EffectKind};
use crate::viewer::ViewerId;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("{0} not found")]
    NotFound(EffectId),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("viewer {0} has no session")]
    NotFound(ViewerId),
    #[error("session for viewer {0} is closed")]
    SessionClosed(ViewerId),
    #[error("viewer {viewer} cannot move from {from} to {to}")]
    InvalidTransition {
        viewer: ViewerId,
        from: &'static str,
        to: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("no codec registered for {}", .0.as_str())]
    NoCodec(EffectKind),
    #[error("style payload is {}, expected {}", found.as_str(), expected.as_str())]
    KindMismatch {
        expected: EffectKind,
        found: EffectKind,
    },
    #[error("malformed style payload: {0}")]
    Malformed(String),
    #[error("encoded message is {size} bytes, limit is {limit}")]
    Oversized { size: usize, limit: usize },
    #[error("packet serialization failed: {0}")]
    Packet(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("connection closed")]
    ConnectionClosed,
    #[error("send failed: {0}")]
    Io(String),
}

/// Every failure is scoped to one viewer or one effect.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("viewer {0} not found")]
    ViewerNotFound(ViewerId),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("delivery to viewer {viewer} failed: {source}")]
    DeliveryFailure {
        viewer: ViewerId,
        source: DeliveryError,
    },
    #[error("{effect} could not be encoded: {source}")]
    Encoding {
        effect: EffectId,
        source: EncodeError,
    },
    #[error("session for viewer {0} is closed")]
    SessionClosed(ViewerId),
    #[error("sync service stopped")]
    Stopped,
}

impl From<SessionError> for SyncError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound(viewer) => Self::ViewerNotFound(viewer),
            SessionError::SessionClosed(viewer) | SessionError::InvalidTransition { viewer, .. } => {
                Self::SessionClosed(viewer)
            }
        }
    }
}
