mod descriptor;
mod kind;
mod style;
mod visibility;

pub use descriptor::{EffectDescriptor, EffectDraft, EffectId, Transform};
pub use kind::{ClientSlot, EffectKind};
pub use style::{
    FakeEntityStyle, HologramStyle, MarkerStyle, NameTagStyle, ParticleStyle, Style, StylePayload,
    TabListStyle,
};
pub use visibility::{Visibility, VisibilityFn};
