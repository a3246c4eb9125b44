use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize, rancor};

use glam::Quat;

pub const MAX_PACKET_SIZE: usize = 1200;
pub const PROTOCOL_VERSION: u32 = 1;
pub const PROTOCOL_MAGIC: u32 = 0x5649_5355;
pub const DEFAULT_PORT: u16 = 25_580;
pub const DEFAULT_TICK_RATE: u32 = 20;

const SEQUENCE_WRAP_THRESHOLD: u32 = u32::MAX / 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub struct PacketHeader {
    pub magic: u32,
    pub version: u32,
    pub sequence: u32,
}

impl PacketHeader {
    pub fn new(sequence: u32) -> Self {
        Self {
            magic: PROTOCOL_MAGIC,
            version: PROTOCOL_VERSION,
            sequence,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.magic == PROTOCOL_MAGIC && self.version == PROTOCOL_VERSION
    }
}

#[inline]
pub fn sequence_greater_than(s1: u32, s2: u32) -> bool {
    ((s1 > s2) && (s1 - s2 <= SEQUENCE_WRAP_THRESHOLD))
        || ((s1 < s2) && (s2 - s1 > SEQUENCE_WRAP_THRESHOLD))
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum PacketType {
    Hello { name: String, world: u32 },
    Welcome { viewer_id: u32, tick_rate: u32 },
    Denied { reason: String },
    WorldChange { world: u32 },
    Visual(ClientboundVisual),
    Ping { timestamp: u64 },
    Pong { timestamp: u64 },
    Disconnect,
}

/// Client-side rendering instructions. Fake entities use negative ids so they
/// never collide with entities the game itself spawned.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum ClientboundVisual {
    SpawnEntity {
        entity_id: i32,
        entity_type: String,
        position: [f32; 3],
        orientation: [i16; 4],
    },
    TeleportEntity {
        entity_id: i32,
        position: [f32; 3],
        orientation: [i16; 4],
    },
    EntityFlags {
        entity_id: i32,
        glowing: bool,
        invisible: bool,
        custom_name: Option<String>,
    },
    HologramLines {
        entity_id: i32,
        lines: Vec<String>,
        line_spacing: f32,
        background_argb: u32,
        see_through: bool,
    },
    DestroyEntities {
        entity_ids: Vec<i32>,
    },
    ParticleEmitter {
        emitter_id: u64,
        particle: String,
        position: [f32; 3],
        count: u16,
        spread: [f32; 3],
        speed: f32,
        interval_ticks: u16,
    },
    ParticleEmitterStop {
        emitter_id: u64,
    },
    MarkerSet {
        slot: u32,
        icon: String,
        label: Option<String>,
        color_rgb: u32,
        position: [f32; 3],
    },
    MarkerClear {
        slot: u32,
    },
    TeamUpsert {
        team: String,
        sort_priority: i32,
        prefix: Option<String>,
        suffix: Option<String>,
        color_rgb: u32,
        members: Vec<u32>,
    },
    TeamRemove {
        team: String,
    },
    PlayerListHeaderFooter {
        header: String,
        footer: String,
    },
}

pub fn encode_orientation(orientation: Option<Quat>) -> [i16; 4] {
    let quat = orientation.unwrap_or(Quat::IDENTITY);
    [
        (quat.x.clamp(-1.0, 1.0) * 32767.0) as i16,
        (quat.y.clamp(-1.0, 1.0) * 32767.0) as i16,
        (quat.z.clamp(-1.0, 1.0) * 32767.0) as i16,
        (quat.w.clamp(-1.0, 1.0) * 32767.0) as i16,
    ]
}

pub fn decode_orientation(orientation: [i16; 4]) -> Quat {
    Quat::from_xyzw(
        orientation[0] as f32 / 32767.0,
        orientation[1] as f32 / 32767.0,
        orientation[2] as f32 / 32767.0,
        orientation[3] as f32 / 32767.0,
    )
    .normalize()
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: PacketType,
}

#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    #[error("serialization failed: {0}")]
    Serialize(rancor::Error),
    #[error("deserialization failed: {0}")]
    Deserialize(rancor::Error),
    #[error("bad magic or protocol version")]
    InvalidHeader,
}

impl Packet {
    pub fn new(header: PacketHeader, payload: PacketType) -> Self {
        Self { header, payload }
    }

    pub fn serialize(&self) -> Result<Vec<u8>, PacketError> {
        rkyv::to_bytes::<rancor::Error>(self)
            .map(|aligned| aligned.to_vec())
            .map_err(PacketError::Serialize)
    }

    /// Copies into an aligned buffer first; datagrams arrive at arbitrary offsets.
    pub fn deserialize(data: &[u8]) -> Result<Self, PacketError> {
        let mut aligned = AlignedVec::<16>::with_capacity(data.len());
        aligned.extend_from_slice(data);

        let packet = rkyv::from_bytes::<Self, rancor::Error>(&aligned)
            .map_err(PacketError::Deserialize)?;
        if !packet.header.is_valid() {
            return Err(PacketError::InvalidHeader);
        }
        Ok(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_comparison() {
        assert!(sequence_greater_than(2, 1));
        assert!(!sequence_greater_than(1, 2));
        assert!(sequence_greater_than(0, u32::MAX));
        assert!(!sequence_greater_than(u32::MAX, 0));
    }

    #[test]
    fn test_orientation_quantization() {
        let quat = Quat::from_rotation_y(std::f32::consts::FRAC_PI_3);
        let decoded = decode_orientation(encode_orientation(Some(quat)));

        assert!(quat.angle_between(decoded) < 0.001);
        assert_eq!(encode_orientation(None), [0, 0, 0, 32767]);
    }

    #[test]
    fn test_visual_packet_serialization() {
        let packet = Packet::new(
            PacketHeader::new(7),
            PacketType::Visual(ClientboundVisual::PlayerListHeaderFooter {
                header: "5/20".into(),
                footer: "ping 30ms".into(),
            }),
        );

        let bytes = packet.serialize().unwrap();
        assert!(bytes.len() < MAX_PACKET_SIZE);
        assert_eq!(Packet::deserialize(&bytes).unwrap(), packet);
    }

    #[test]
    fn test_foreign_header_rejected() {
        let mut packet = Packet::new(PacketHeader::new(1), PacketType::Disconnect);
        packet.header.magic = 0x1234;

        let bytes = packet.serialize().unwrap();
        assert!(matches!(
            Packet::deserialize(&bytes),
            Err(PacketError::InvalidHeader)
        ));
    }
}
