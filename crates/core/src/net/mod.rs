mod codec;
mod injector;
mod protocol;
mod stats;
mod transport;

pub use codec::{
    CodecRegistry, EffectCodec, FakeEntityCodec, HologramCodec, MarkerCodec, NameTagCodec,
    ParticleCodec, TabListCodec, client_entity_id, team_name,
};
pub use injector::{ApplyOutcome, ApplyReport, Injector};
pub use protocol::{
    ArchivedPacket, ClientboundVisual, DEFAULT_PORT, DEFAULT_TICK_RATE, MAX_PACKET_SIZE,
    PROTOCOL_MAGIC, PROTOCOL_VERSION, Packet, PacketError, PacketHeader, PacketType,
    decode_orientation, encode_orientation, sequence_greater_than,
};
pub use stats::{DeliveryCounters, NetworkStats};
pub use transport::{MemoryTransport, Transport};
