pub mod diff;
pub mod effect;
pub mod error;
pub mod net;
pub mod registry;
pub mod sync;
pub mod viewer;

pub use diff::{DiffScope, Operation, diff};
pub use effect::{
    ClientSlot, EffectDescriptor, EffectDraft, EffectId, EffectKind, FakeEntityStyle,
    HologramStyle, MarkerStyle, NameTagStyle, ParticleStyle, Style, StylePayload, TabListStyle,
    Transform, Visibility,
};
pub use error::{DeliveryError, EncodeError, RegistryError, SessionError, SyncError};
pub use net::{
    ClientboundVisual, CodecRegistry, DEFAULT_PORT, DEFAULT_TICK_RATE, EffectCodec, Injector,
    MAX_PACKET_SIZE, MemoryTransport, Packet, PacketError, PacketHeader, PacketType, Transport,
    sequence_greater_than,
};
pub use registry::{EffectRegistry, RegistrySnapshot};
pub use sync::{
    ReconcileOutcome, ReconcileReport, Scheduler, SyncConfig, SyncEvent, SyncHandle, SyncService,
    SyncStats, Tick, Trigger,
};
pub use viewer::{RenderedEffect, SessionKey, SessionStore, ViewerId, ViewerSession, ViewerState};
