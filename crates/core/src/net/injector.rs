use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::diff::Operation;
use crate::effect::EffectId;
use crate::error::{DeliveryError, EncodeError};
use crate::viewer::{SessionKey, SessionStore};

use super::codec::CodecRegistry;
use super::protocol::{Packet, PacketHeader, PacketType};
use super::stats::{DeliveryCounters, NetworkStats};
use super::transport::Transport;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ApplyOutcome {
    #[default]
    Completed,
    Cancelled,
    DeliveryFailed(DeliveryError),
    SessionClosed,
}

/// Effects whose operations were delivered and confirmed in the session.
#[derive(Debug, Clone, Default)]
pub struct ApplyReport {
    pub created: Vec<EffectId>,
    pub updated: Vec<EffectId>,
    pub removed: Vec<EffectId>,
    pub rejected: Vec<(EffectId, EncodeError)>,
    pub outcome: ApplyOutcome,
}

/// The only component that touches a live connection. Turns operations into
/// framed packets, sends them in order and confirms each one in the session
/// store once all of its packets went out.
pub struct Injector<T: Transport> {
    transport: Arc<T>,
    codecs: CodecRegistry,
    store: Arc<SessionStore>,
    max_message_size: usize,
    counters: DeliveryCounters,
}

impl<T: Transport> Injector<T> {
    pub fn new(
        transport: Arc<T>,
        codecs: CodecRegistry,
        store: Arc<SessionStore>,
        max_message_size: usize,
    ) -> Self {
        Self {
            transport,
            codecs,
            store,
            max_message_size,
            counters: DeliveryCounters::default(),
        }
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn stats(&self) -> NetworkStats {
        self.counters.snapshot()
    }

    /// Applies `operations` in order for the session `key`.
    ///
    /// `cancelled` is checked before every frame, so a cancelled pass never
    /// sends another packet once it observes the flag. A delivery failure stops the
    /// pass with the failed operation unconfirmed, so a retry recomputes it from
    /// the same baseline. An encoding failure skips only that effect.
    pub async fn apply(
        &self,
        key: SessionKey,
        operations: Vec<Operation>,
        sequence: &mut u32,
        cancelled: &AtomicBool,
    ) -> ApplyReport {
        let mut report = ApplyReport::default();

        for operation in operations {
            let frames = match self.encode_frames(&operation, *sequence) {
                Ok(frames) => frames,
                Err(err) => {
                    self.reject(key, &operation, err, &mut report);
                    continue;
                }
            };

            for frame in frames {
                if cancelled.load(Ordering::Acquire) {
                    report.outcome = ApplyOutcome::Cancelled;
                    return report;
                }

                let size = frame.len();
                if let Err(err) = self.transport.send(key.viewer, frame).await {
                    log::debug!(
                        "viewer {}: {} {} failed: {}",
                        key.viewer,
                        operation.label(),
                        operation.id(),
                        err
                    );
                    self.counters.record_delivery_failure();
                    report.outcome = ApplyOutcome::DeliveryFailed(err);
                    return report;
                }
                self.counters.record_sent(size);
                *sequence = sequence.wrapping_add(1);
            }

            let confirmed = match &operation {
                Operation::Create(d) => self.store.mark_rendered_in(key, d).map(|_| {
                    report.created.push(d.id());
                }),
                Operation::Update(d) => self.store.mark_rendered_in(key, d).map(|_| {
                    report.updated.push(d.id());
                }),
                Operation::Remove { id, .. } => self.store.mark_removed_in(key, *id).map(|_| {
                    report.removed.push(*id);
                }),
            };

            if confirmed.is_err() {
                report.outcome = ApplyOutcome::SessionClosed;
                return report;
            }
        }

        report
    }

    fn encode_frames(
        &self,
        operation: &Operation,
        first_sequence: u32,
    ) -> Result<Vec<Vec<u8>>, EncodeError> {
        let messages = self.codecs.encode(operation)?;

        messages
            .into_iter()
            .enumerate()
            .map(|(offset, message)| {
                let header = PacketHeader::new(first_sequence.wrapping_add(offset as u32));
                let bytes = Packet::new(header, PacketType::Visual(message))
                    .serialize()
                    .map_err(|e| EncodeError::Packet(e.to_string()))?;

                if bytes.len() > self.max_message_size {
                    return Err(EncodeError::Oversized {
                        size: bytes.len(),
                        limit: self.max_message_size,
                    });
                }
                Ok(bytes)
            })
            .collect()
    }

    fn reject(
        &self,
        key: SessionKey,
        operation: &Operation,
        err: EncodeError,
        report: &mut ApplyReport,
    ) {
        log::warn!(
            "viewer {}: skipping {} of {}: {}",
            key.viewer,
            operation.label(),
            operation.id(),
            err
        );
        self.counters.record_encoding_failure();

        if let Some(version) = operation.version() {
            // A closed session has nothing left to protect.
            let _ = self.store.mark_rejected_in(key, operation.id(), version);
        }
        report.rejected.push((operation.id(), err));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::{DiffScope, diff};
    use crate::effect::{EffectDraft, EffectKind, HologramStyle, Style, StylePayload};
    use crate::net::MemoryTransport;
    use crate::net::protocol::ClientboundVisual;
    use crate::registry::EffectRegistry;
    use std::time::Duration;

    fn hologram(lines: usize) -> EffectDraft {
        EffectDraft::from_style(&Style::Hologram(HologramStyle {
            lines: (0..lines).map(|n| format!("line {n}")).collect(),
            line_spacing: 0.3,
            background_argb: 0,
            see_through: true,
        }))
        .unwrap()
    }

    struct Fixture {
        registry: EffectRegistry,
        store: Arc<SessionStore>,
        transport: Arc<MemoryTransport>,
        injector: Injector<MemoryTransport>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(SessionStore::new());
        let transport = Arc::new(MemoryTransport::new());
        let injector = Injector::new(
            Arc::clone(&transport),
            CodecRegistry::with_defaults(),
            Arc::clone(&store),
            crate::net::MAX_PACKET_SIZE,
        );
        Fixture {
            registry: EffectRegistry::new(),
            store,
            transport,
            injector,
        }
    }

    fn pending(f: &Fixture, key: SessionKey) -> Vec<Operation> {
        diff(
            &f.registry.snapshot(),
            &f.store.session_in(key).unwrap(),
            0,
            &DiffScope::Full,
        )
    }

    #[tokio::test]
    async fn delivers_in_order_and_confirms() {
        let f = fixture();
        let key = f.store.open_session(1);
        let a = f.registry.publish(hologram(1));
        let b = f.registry.publish(hologram(2));

        let mut sequence = 0;
        let report = f
            .injector
            .apply(key, pending(&f, key), &mut sequence, &AtomicBool::new(false))
            .await;

        assert_eq!(report.outcome, ApplyOutcome::Completed);
        assert_eq!(report.created, vec![a, b]);
        assert_eq!(sequence, 4);

        let packets = f.transport.delivered(1);
        let sequences: Vec<u32> = packets.iter().map(|p| p.header.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2, 3]);
        assert!(matches!(
            f.transport.delivered_visuals(1)[1],
            ClientboundVisual::HologramLines { .. }
        ));

        let session = f.store.get_session(1).unwrap();
        assert!(session.contains(a) && session.contains(b));
        assert_eq!(f.injector.stats().messages_sent, 4);
    }

    #[tokio::test]
    async fn delivery_failure_leaves_operation_unconfirmed() {
        let f = fixture();
        let key = f.store.open_session(1);
        let a = f.registry.publish(hologram(1));
        let b = f.registry.publish(hologram(1));
        // Both packets of `a`, then only the spawn of `b`.
        f.transport.fail_after(1, 3);

        let mut sequence = 0;
        let report = f
            .injector
            .apply(key, pending(&f, key), &mut sequence, &AtomicBool::new(false))
            .await;

        assert_eq!(
            report.outcome,
            ApplyOutcome::DeliveryFailed(DeliveryError::ConnectionClosed)
        );
        assert_eq!(report.created, vec![a]);

        let session = f.store.get_session(1).unwrap();
        assert!(session.contains(a));
        assert!(!session.contains(b));

        f.transport.heal(1);
        let retry = pending(&f, key);
        assert_eq!(retry.len(), 1);
        assert_eq!(retry[0].id(), b);
    }

    #[tokio::test]
    async fn encoding_failure_skips_only_that_effect() {
        let f = fixture();
        let key = f.store.open_session(1);
        let bad = f.registry.publish(EffectDraft::new(
            EffectKind::HologramText,
            StylePayload::raw(EffectKind::HologramText, vec![0xff; 3]),
        ));
        let good = f.registry.publish(hologram(1));

        let mut sequence = 0;
        let report = f
            .injector
            .apply(key, pending(&f, key), &mut sequence, &AtomicBool::new(false))
            .await;

        assert_eq!(report.outcome, ApplyOutcome::Completed);
        assert_eq!(report.created, vec![good]);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].0, bad);

        assert!(pending(&f, key).is_empty());
    }

    #[tokio::test]
    async fn oversized_message_is_rejected() {
        let f = fixture();
        let key = f.store.open_session(1);
        let huge = f.registry.publish(hologram(400));

        let mut sequence = 0;
        let report = f
            .injector
            .apply(key, pending(&f, key), &mut sequence, &AtomicBool::new(false))
            .await;

        assert!(matches!(
            report.rejected.as_slice(),
            [(id, EncodeError::Oversized { .. })] if *id == huge
        ));
        assert!(f.transport.delivered(1).is_empty());
    }

    #[tokio::test]
    async fn cancellation_stops_before_next_operation() {
        let f = fixture();
        let key = f.store.open_session(1);
        f.registry.publish(hologram(1));

        let mut sequence = 0;
        let report = f
            .injector
            .apply(key, pending(&f, key), &mut sequence, &AtomicBool::new(true))
            .await;

        assert_eq!(report.outcome, ApplyOutcome::Cancelled);
        assert!(f.transport.delivered(1).is_empty());
        assert!(f.store.get_session(1).unwrap().rendered().is_empty());
    }

    #[tokio::test]
    async fn cancellation_between_frames_leaves_operation_unconfirmed() {
        let f = fixture();
        let key = f.store.open_session(1);
        let id = f.registry.publish(hologram(2));
        f.transport.set_delay(Some(Duration::from_millis(20)));

        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            flag.store(true, Ordering::Release);
        });

        let mut sequence = 0;
        let report = f
            .injector
            .apply(key, pending(&f, key), &mut sequence, &cancelled)
            .await;

        assert_eq!(report.outcome, ApplyOutcome::Cancelled);
        assert_eq!(f.transport.delivered(1).len(), 1);
        assert!(!f.store.get_session(1).unwrap().contains(id));
    }

    #[tokio::test]
    async fn closed_session_stops_pass() {
        let f = fixture();
        let key = f.store.open_session(1);
        f.registry.publish(hologram(1));
        let operations = pending(&f, key);
        f.store.close_session(1);

        let mut sequence = 0;
        let report = f
            .injector
            .apply(key, operations, &mut sequence, &AtomicBool::new(false))
            .await;

        assert_eq!(report.outcome, ApplyOutcome::SessionClosed);
        assert!(f.store.get_session(1).is_none());
    }
}
