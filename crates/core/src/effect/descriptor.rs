use std::fmt;

use glam::{Quat, Vec3};

use crate::error::EncodeError;
use crate::sync::Tick;
use crate::viewer::ViewerId;

use super::{ClientSlot, EffectKind, Style, StylePayload, Visibility};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EffectId(pub u64);

impl EffectId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EffectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "effect#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Transform {
    pub position: Vec3,
    pub orientation: Option<Quat>,
}

impl Transform {
    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            orientation: None,
        }
    }

    pub fn with_orientation(mut self, orientation: Quat) -> Self {
        self.orientation = Some(orientation);
        self
    }
}

/// Everything a producer supplies when publishing. The registry assigns id,
/// version and publication tick.
#[derive(Debug, Clone)]
pub struct EffectDraft {
    pub kind: EffectKind,
    pub transform: Transform,
    pub style: StylePayload,
    pub visibility: Visibility,
    pub ttl: Option<Tick>,
    pub slot: Option<u32>,
}

impl EffectDraft {
    pub fn new(kind: EffectKind, style: StylePayload) -> Self {
        Self {
            kind,
            transform: Transform::default(),
            style,
            visibility: Visibility::Everyone,
            ttl: None,
            slot: None,
        }
    }

    /// Name tags occupy the slot of the player they decorate.
    pub fn from_style(style: &Style) -> Result<Self, EncodeError> {
        let slot = match style {
            Style::NameTag(tag) => Some(tag.target),
            _ => None,
        };
        let mut draft = Self::new(style.kind(), StylePayload::encode(style)?);
        draft.slot = slot;
        Ok(draft)
    }

    pub fn at(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn visible_to(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn ttl(mut self, ticks: Tick) -> Self {
        self.ttl = Some(ticks);
        self
    }

    pub fn slot(mut self, slot: u32) -> Self {
        self.slot = Some(slot);
        self
    }
}

/// One published version of an effect. Never mutated; the registry swaps in a
/// new value with a higher version instead.
#[derive(Debug, Clone)]
pub struct EffectDescriptor {
    id: EffectId,
    version: u64,
    kind: EffectKind,
    transform: Transform,
    style: StylePayload,
    visibility: Visibility,
    published_at: Tick,
    ttl: Option<Tick>,
    slot: Option<u32>,
}

impl EffectDescriptor {
    pub(crate) fn from_draft(id: EffectId, draft: EffectDraft, tick: Tick) -> Self {
        Self {
            id,
            version: 1,
            kind: draft.kind,
            transform: draft.transform,
            style: draft.style,
            visibility: draft.visibility,
            published_at: tick,
            ttl: draft.ttl,
            slot: draft.slot,
        }
    }

    pub(crate) fn with_style(&self, style: StylePayload) -> Self {
        Self {
            version: self.version + 1,
            style,
            ..self.clone()
        }
    }

    pub(crate) fn with_transform(&self, transform: Transform) -> Self {
        Self {
            version: self.version + 1,
            transform,
            ..self.clone()
        }
    }

    pub fn id(&self) -> EffectId {
        self.id
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn kind(&self) -> EffectKind {
        self.kind
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    pub fn style(&self) -> &StylePayload {
        &self.style
    }

    pub fn visibility(&self) -> &Visibility {
        &self.visibility
    }

    pub fn published_at(&self) -> Tick {
        self.published_at
    }

    pub fn ttl(&self) -> Option<Tick> {
        self.ttl
    }

    pub fn expires_at(&self) -> Option<Tick> {
        self.ttl.map(|ttl| self.published_at.saturating_add(ttl))
    }

    /// Alive for ticks `published_at .. published_at + ttl`.
    pub fn is_expired(&self, tick: Tick) -> bool {
        self.expires_at().is_some_and(|at| tick >= at)
    }

    pub fn is_visible_to(&self, viewer: ViewerId) -> bool {
        self.visibility.admits(viewer, self)
    }

    pub fn client_slot(&self) -> Option<ClientSlot> {
        self.slot
            .or(self.kind.default_slot())
            .map(|slot| ClientSlot {
                kind: self.kind,
                slot,
            })
    }
}
