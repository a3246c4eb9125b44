use std::collections::HashMap;
use std::sync::Arc;

use crate::diff::Operation;
use crate::effect::{ClientSlot, EffectDescriptor, EffectId, EffectKind, Style};
use crate::error::EncodeError;

use super::protocol::{ClientboundVisual, encode_orientation};

/// Translates one effect kind to and from client-side instructions.
pub trait EffectCodec: Send + Sync {
    fn encode_create(&self, descriptor: &EffectDescriptor)
    -> Result<Vec<ClientboundVisual>, EncodeError>;

    /// Defaults to resending the create, which every instruction here treats
    /// as an upsert.
    fn encode_update(
        &self,
        descriptor: &EffectDescriptor,
    ) -> Result<Vec<ClientboundVisual>, EncodeError> {
        self.encode_create(descriptor)
    }

    fn encode_remove(&self, id: EffectId, slot: Option<ClientSlot>) -> Vec<ClientboundVisual>;
}

/// Codecs keyed by effect kind. Keeps wire format out of the diff engine and
/// scheduler entirely.
#[derive(Clone)]
pub struct CodecRegistry {
    codecs: HashMap<EffectKind, Arc<dyn EffectCodec>>,
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl CodecRegistry {
    pub fn empty() -> Self {
        Self {
            codecs: HashMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(EffectKind::ParticleStream, ParticleCodec);
        registry.register(EffectKind::FakeEntity, FakeEntityCodec);
        registry.register(EffectKind::HologramText, HologramCodec);
        registry.register(EffectKind::OverlayMarker, MarkerCodec);
        registry.register(EffectKind::NameTag, NameTagCodec);
        registry.register(EffectKind::TabList, TabListCodec);
        registry
    }

    pub fn register(&mut self, kind: EffectKind, codec: impl EffectCodec + 'static) {
        self.codecs.insert(kind, Arc::new(codec));
    }

    pub fn get(&self, kind: EffectKind) -> Option<&Arc<dyn EffectCodec>> {
        self.codecs.get(&kind)
    }

    pub fn encode(&self, operation: &Operation) -> Result<Vec<ClientboundVisual>, EncodeError> {
        let kind = operation.kind();
        let codec = self.get(kind).ok_or(EncodeError::NoCodec(kind))?;

        match operation {
            Operation::Create(d) => codec.encode_create(d),
            Operation::Update(d) => codec.encode_update(d),
            Operation::Remove { id, slot, .. } => Ok(codec.encode_remove(*id, *slot)),
        }
    }
}

impl std::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.codecs.keys().map(EffectKind::as_str).collect();
        kinds.sort_unstable();
        f.debug_struct("CodecRegistry").field("kinds", &kinds).finish()
    }
}

pub fn client_entity_id(id: EffectId) -> i32 {
    -((id.0 % i32::MAX as u64) as i32) - 1
}

pub fn team_name(target: u32) -> String {
    format!("visual-{target}")
}

fn marker_slot(id: EffectId, slot: Option<ClientSlot>) -> u32 {
    slot.map(|s| s.slot)
        .unwrap_or(0x8000_0000 | (id.0 as u32 & 0x7fff_ffff))
}

fn decode_style(descriptor: &EffectDescriptor) -> Result<Style, EncodeError> {
    if descriptor.style().kind() != descriptor.kind() {
        return Err(EncodeError::KindMismatch {
            expected: descriptor.kind(),
            found: descriptor.style().kind(),
        });
    }
    descriptor.style().decode()
}

fn mismatch(descriptor: &EffectDescriptor, style: &Style) -> EncodeError {
    EncodeError::KindMismatch {
        expected: descriptor.kind(),
        found: style.kind(),
    }
}

pub struct ParticleCodec;

impl EffectCodec for ParticleCodec {
    fn encode_create(
        &self,
        descriptor: &EffectDescriptor,
    ) -> Result<Vec<ClientboundVisual>, EncodeError> {
        let style = match decode_style(descriptor)? {
            Style::Particle(style) => style,
            other => return Err(mismatch(descriptor, &other)),
        };

        Ok(vec![ClientboundVisual::ParticleEmitter {
            emitter_id: descriptor.id().get(),
            particle: style.particle,
            position: descriptor.transform().position.into(),
            count: style.count,
            spread: style.spread,
            speed: style.speed,
            interval_ticks: style.interval_ticks.max(1),
        }])
    }

    fn encode_remove(&self, id: EffectId, _slot: Option<ClientSlot>) -> Vec<ClientboundVisual> {
        vec![ClientboundVisual::ParticleEmitterStop { emitter_id: id.get() }]
    }
}

pub struct FakeEntityCodec;

impl EffectCodec for FakeEntityCodec {
    fn encode_create(
        &self,
        descriptor: &EffectDescriptor,
    ) -> Result<Vec<ClientboundVisual>, EncodeError> {
        let style = match decode_style(descriptor)? {
            Style::FakeEntity(style) => style,
            other => return Err(mismatch(descriptor, &other)),
        };
        let entity_id = client_entity_id(descriptor.id());
        let transform = descriptor.transform();

        Ok(vec![
            ClientboundVisual::SpawnEntity {
                entity_id,
                entity_type: style.entity_type,
                position: transform.position.into(),
                orientation: encode_orientation(transform.orientation),
            },
            ClientboundVisual::EntityFlags {
                entity_id,
                glowing: style.glowing,
                invisible: style.invisible,
                custom_name: style.custom_name,
            },
        ])
    }

    fn encode_update(
        &self,
        descriptor: &EffectDescriptor,
    ) -> Result<Vec<ClientboundVisual>, EncodeError> {
        let style = match decode_style(descriptor)? {
            Style::FakeEntity(style) => style,
            other => return Err(mismatch(descriptor, &other)),
        };
        let entity_id = client_entity_id(descriptor.id());
        let transform = descriptor.transform();

        Ok(vec![
            ClientboundVisual::TeleportEntity {
                entity_id,
                position: transform.position.into(),
                orientation: encode_orientation(transform.orientation),
            },
            ClientboundVisual::EntityFlags {
                entity_id,
                glowing: style.glowing,
                invisible: style.invisible,
                custom_name: style.custom_name,
            },
        ])
    }

    fn encode_remove(&self, id: EffectId, _slot: Option<ClientSlot>) -> Vec<ClientboundVisual> {
        vec![ClientboundVisual::DestroyEntities {
            entity_ids: vec![client_entity_id(id)],
        }]
    }
}

pub struct HologramCodec;

impl HologramCodec {
    const ENTITY_TYPE: &'static str = "text_display";
}

impl EffectCodec for HologramCodec {
    fn encode_create(
        &self,
        descriptor: &EffectDescriptor,
    ) -> Result<Vec<ClientboundVisual>, EncodeError> {
        let style = match decode_style(descriptor)? {
            Style::Hologram(style) => style,
            other => return Err(mismatch(descriptor, &other)),
        };
        let entity_id = client_entity_id(descriptor.id());
        let transform = descriptor.transform();

        Ok(vec![
            ClientboundVisual::SpawnEntity {
                entity_id,
                entity_type: Self::ENTITY_TYPE.to_string(),
                position: transform.position.into(),
                orientation: encode_orientation(transform.orientation),
            },
            ClientboundVisual::HologramLines {
                entity_id,
                lines: style.lines,
                line_spacing: style.line_spacing,
                background_argb: style.background_argb,
                see_through: style.see_through,
            },
        ])
    }

    fn encode_update(
        &self,
        descriptor: &EffectDescriptor,
    ) -> Result<Vec<ClientboundVisual>, EncodeError> {
        let style = match decode_style(descriptor)? {
            Style::Hologram(style) => style,
            other => return Err(mismatch(descriptor, &other)),
        };
        let entity_id = client_entity_id(descriptor.id());
        let transform = descriptor.transform();

        Ok(vec![
            ClientboundVisual::TeleportEntity {
                entity_id,
                position: transform.position.into(),
                orientation: encode_orientation(transform.orientation),
            },
            ClientboundVisual::HologramLines {
                entity_id,
                lines: style.lines,
                line_spacing: style.line_spacing,
                background_argb: style.background_argb,
                see_through: style.see_through,
            },
        ])
    }

    fn encode_remove(&self, id: EffectId, _slot: Option<ClientSlot>) -> Vec<ClientboundVisual> {
        vec![ClientboundVisual::DestroyEntities {
            entity_ids: vec![client_entity_id(id)],
        }]
    }
}

pub struct MarkerCodec;

impl EffectCodec for MarkerCodec {
    fn encode_create(
        &self,
        descriptor: &EffectDescriptor,
    ) -> Result<Vec<ClientboundVisual>, EncodeError> {
        let style = match decode_style(descriptor)? {
            Style::Marker(style) => style,
            other => return Err(mismatch(descriptor, &other)),
        };

        Ok(vec![ClientboundVisual::MarkerSet {
            slot: marker_slot(descriptor.id(), descriptor.client_slot()),
            icon: style.icon,
            label: style.label,
            color_rgb: style.color_rgb,
            position: descriptor.transform().position.into(),
        }])
    }

    fn encode_remove(&self, id: EffectId, slot: Option<ClientSlot>) -> Vec<ClientboundVisual> {
        vec![ClientboundVisual::MarkerClear {
            slot: marker_slot(id, slot),
        }]
    }
}

pub struct NameTagCodec;

impl EffectCodec for NameTagCodec {
    fn encode_create(
        &self,
        descriptor: &EffectDescriptor,
    ) -> Result<Vec<ClientboundVisual>, EncodeError> {
        let style = match decode_style(descriptor)? {
            Style::NameTag(style) => style,
            other => return Err(mismatch(descriptor, &other)),
        };

        Ok(vec![ClientboundVisual::TeamUpsert {
            team: team_name(style.target),
            sort_priority: style.priority,
            prefix: style.prefix,
            suffix: style.suffix,
            color_rgb: style.name_color_rgb,
            members: vec![style.target],
        }])
    }

    fn encode_remove(&self, id: EffectId, slot: Option<ClientSlot>) -> Vec<ClientboundVisual> {
        match slot {
            Some(slot) => vec![ClientboundVisual::TeamRemove {
                team: team_name(slot.slot),
            }],
            None => {
                log::warn!("name tag {} was rendered without a slot", id);
                Vec::new()
            }
        }
    }
}

pub struct TabListCodec;

impl EffectCodec for TabListCodec {
    fn encode_create(
        &self,
        descriptor: &EffectDescriptor,
    ) -> Result<Vec<ClientboundVisual>, EncodeError> {
        let style = match decode_style(descriptor)? {
            Style::TabList(style) => style,
            other => return Err(mismatch(descriptor, &other)),
        };

        Ok(vec![ClientboundVisual::PlayerListHeaderFooter {
            header: style.header,
            footer: style.footer,
        }])
    }

    fn encode_remove(&self, _id: EffectId, _slot: Option<ClientSlot>) -> Vec<ClientboundVisual> {
        vec![ClientboundVisual::PlayerListHeaderFooter {
            header: String::new(),
            footer: String::new(),
        }]
    }
}
