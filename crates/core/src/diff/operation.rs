use std::sync::Arc;

use crate::effect::{ClientSlot, EffectDescriptor, EffectId, EffectKind};

#[derive(Debug, Clone)]
pub enum Operation {
    Create(Arc<EffectDescriptor>),
    Update(Arc<EffectDescriptor>),
    /// Carries what the session recorded, since the registry may no longer
    /// know the effect.
    Remove {
        id: EffectId,
        kind: EffectKind,
        slot: Option<ClientSlot>,
    },
}

impl Operation {
    pub fn id(&self) -> EffectId {
        match self {
            Self::Create(d) | Self::Update(d) => d.id(),
            Self::Remove { id, .. } => *id,
        }
    }

    pub fn kind(&self) -> EffectKind {
        match self {
            Self::Create(d) | Self::Update(d) => d.kind(),
            Self::Remove { kind, .. } => *kind,
        }
    }

    pub fn version(&self) -> Option<u64> {
        match self {
            Self::Create(d) | Self::Update(d) => Some(d.version()),
            Self::Remove { .. } => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Create(_) => "create",
            Self::Update(_) => "update",
            Self::Remove { .. } => "remove",
        }
    }
}

/// Compares by identity and version only; style payloads are not inspected.
impl PartialEq for Operation {
    fn eq(&self, other: &Self) -> bool {
        self.label() == other.label()
            && self.id() == other.id()
            && self.version() == other.version()
    }
}
