use std::sync::Arc;

use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize, rancor};

use crate::error::EncodeError;
use crate::viewer::ViewerId;

use super::EffectKind;

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct ParticleStyle {
    pub particle: String,
    pub count: u16,
    pub spread: [f32; 3],
    pub speed: f32,
    pub interval_ticks: u16,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct FakeEntityStyle {
    pub entity_type: String,
    pub glowing: bool,
    pub invisible: bool,
    pub custom_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct HologramStyle {
    pub lines: Vec<String>,
    pub line_spacing: f32,
    pub background_argb: u32,
    pub see_through: bool,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct MarkerStyle {
    pub icon: String,
    pub label: Option<String>,
    pub color_rgb: u32,
}

/// Prefix, suffix and name colour shown for `target`. Higher priority sorts first
/// in the player list.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct NameTagStyle {
    pub target: ViewerId,
    pub prefix: Option<String>,
    pub suffix: Option<String>,
    pub name_color_rgb: u32,
    pub priority: i32,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct TabListStyle {
    pub header: String,
    pub footer: String,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum Style {
    Particle(ParticleStyle),
    FakeEntity(FakeEntityStyle),
    Hologram(HologramStyle),
    Marker(MarkerStyle),
    NameTag(NameTagStyle),
    TabList(TabListStyle),
}

impl Style {
    pub fn kind(&self) -> EffectKind {
        match self {
            Self::Particle(_) => EffectKind::ParticleStream,
            Self::FakeEntity(_) => EffectKind::FakeEntity,
            Self::Hologram(_) => EffectKind::HologramText,
            Self::Marker(_) => EffectKind::OverlayMarker,
            Self::NameTag(_) => EffectKind::NameTag,
            Self::TabList(_) => EffectKind::TabList,
        }
    }
}

/// Kind-tagged style bytes. Nothing above the codec layer looks inside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StylePayload {
    kind: EffectKind,
    bytes: Arc<[u8]>,
}

impl StylePayload {
    pub fn encode(style: &Style) -> Result<Self, EncodeError> {
        let bytes = rkyv::to_bytes::<rancor::Error>(style)
            .map_err(|e| EncodeError::Malformed(e.to_string()))?;
        Ok(Self {
            kind: style.kind(),
            bytes: Arc::from(&bytes[..]),
        })
    }

    /// Wraps bytes produced elsewhere. They are only validated when a codec decodes them.
    pub fn raw(kind: EffectKind, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            kind,
            bytes: bytes.into(),
        }
    }

    pub fn kind(&self) -> EffectKind {
        self.kind
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn decode(&self) -> Result<Style, EncodeError> {
        let mut aligned = AlignedVec::<16>::with_capacity(self.bytes.len());
        aligned.extend_from_slice(&self.bytes);

        let style = rkyv::from_bytes::<Style, rancor::Error>(&aligned)
            .map_err(|e| EncodeError::Malformed(e.to_string()))?;

        if style.kind() != self.kind {
            return Err(EncodeError::KindMismatch {
                expected: self.kind,
                found: style.kind(),
            });
        }
        Ok(style)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_keeps_kind_tag() {
        let style = Style::TabList(TabListStyle {
            header: "3/20 players".into(),
            footer: "ping 12ms".into(),
        });
        let payload = StylePayload::encode(&style).unwrap();

        assert_eq!(payload.kind(), EffectKind::TabList);
        assert_eq!(payload.decode().unwrap(), style);
    }

    #[test]
    fn garbage_bytes_are_malformed() {
        let payload = StylePayload::raw(EffectKind::HologramText, vec![0xde, 0xad, 0xbe, 0xef]);
        assert!(matches!(payload.decode(), Err(EncodeError::Malformed(_))));
    }

    #[test]
    fn mislabelled_payload_is_rejected() {
        let style = Style::Marker(MarkerStyle {
            icon: "flag".into(),
            label: None,
            color_rgb: 0xff0000,
        });
        let encoded = StylePayload::encode(&style).unwrap();
        let relabelled = StylePayload::raw(EffectKind::NameTag, encoded.as_bytes().to_vec());

        assert_eq!(
            relabelled.decode(),
            Err(EncodeError::KindMismatch {
                expected: EffectKind::NameTag,
                found: EffectKind::OverlayMarker,
            })
        );
    }
}
