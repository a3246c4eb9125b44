use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[repr(u8)]
pub enum EffectKind {
    #[default]
    ParticleStream = 0,
    FakeEntity = 1,
    HologramText = 2,
    OverlayMarker = 3,
    NameTag = 4,
    TabList = 5,
}

impl EffectKind {
    pub const ALL: [EffectKind; 6] = [
        Self::ParticleStream,
        Self::FakeEntity,
        Self::HologramText,
        Self::OverlayMarker,
        Self::NameTag,
        Self::TabList,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ParticleStream => "particle-stream",
            Self::FakeEntity => "fake-entity",
            Self::HologramText => "hologram-text",
            Self::OverlayMarker => "overlay-marker",
            Self::NameTag => "name-tag",
            Self::TabList => "tab-list",
        }
    }

    /// Slot occupied by every effect of this kind when the producer names none.
    /// The player list has exactly one header/footer pair per client.
    pub fn default_slot(self) -> Option<u32> {
        match self {
            Self::TabList => Some(0),
            _ => None,
        }
    }
}

impl TryFrom<u8> for EffectKind {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::ParticleStream),
            1 => Ok(Self::FakeEntity),
            2 => Ok(Self::HologramText),
            3 => Ok(Self::OverlayMarker),
            4 => Ok(Self::NameTag),
            5 => Ok(Self::TabList),
            other => Err(other),
        }
    }
}

/// A client-side resource that at most one effect may occupy per viewer,
/// e.g. the player-list header or the team that decorates one player's name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientSlot {
    pub kind: EffectKind,
    pub slot: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_byte_conversion() {
        for kind in EffectKind::ALL {
            assert_eq!(EffectKind::try_from(kind as u8), Ok(kind));
        }
        assert_eq!(EffectKind::try_from(42), Err(42));
    }

    #[test]
    fn only_tab_list_has_a_default_slot() {
        let slotted: Vec<_> = EffectKind::ALL
            .into_iter()
            .filter(|k| k.default_slot().is_some())
            .collect();
        assert_eq!(slotted, vec![EffectKind::TabList]);
    }
}
