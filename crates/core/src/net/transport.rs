use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::DeliveryError;
use crate::viewer::ViewerId;

use super::protocol::{ClientboundVisual, Packet, PacketType};

/// The host runtime's outbound side of a viewer connection.
///
/// `send` resolves once the message has been handed to the connection, and
/// the injector never issues a second `send` for the same viewer before the
/// first resolves.
pub trait Transport: Send + Sync + 'static {
    fn send(
        &self,
        viewer: ViewerId,
        message: Vec<u8>,
    ) -> impl Future<Output = Result<(), DeliveryError>> + Send;
}

/// In-process transport that keeps every delivered message per viewer.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    delivered: Mutex<HashMap<ViewerId, Vec<Vec<u8>>>>,
    failing: Mutex<HashSet<ViewerId>>,
    fail_after: Mutex<HashMap<ViewerId, usize>>,
    delay: Mutex<Option<Duration>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every send to `viewer` fails until `heal` is called.
    pub fn fail(&self, viewer: ViewerId) {
        self.failing.lock().insert(viewer);
    }

    pub fn heal(&self, viewer: ViewerId) {
        self.failing.lock().remove(&viewer);
        self.fail_after.lock().remove(&viewer);
    }

    /// Lets `count` more sends to `viewer` through, then fails every later one.
    pub fn fail_after(&self, viewer: ViewerId, count: usize) {
        self.fail_after.lock().insert(viewer, count);
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    pub fn delivered_bytes(&self, viewer: ViewerId) -> Vec<Vec<u8>> {
        self.delivered.lock().get(&viewer).cloned().unwrap_or_default()
    }

    pub fn delivered(&self, viewer: ViewerId) -> Vec<Packet> {
        self.delivered_bytes(viewer)
            .iter()
            .filter_map(|bytes| Packet::deserialize(bytes).ok())
            .collect()
    }

    pub fn delivered_visuals(&self, viewer: ViewerId) -> Vec<ClientboundVisual> {
        self.delivered(viewer)
            .into_iter()
            .filter_map(|packet| match packet.payload {
                PacketType::Visual(visual) => Some(visual),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self, viewer: ViewerId) {
        self.delivered.lock().remove(&viewer);
    }

    fn admit(&self, viewer: ViewerId) -> Result<(), DeliveryError> {
        if self.failing.lock().contains(&viewer) {
            return Err(DeliveryError::ConnectionClosed);
        }

        let mut fail_after = self.fail_after.lock();
        if let Some(remaining) = fail_after.get_mut(&viewer) {
            if *remaining == 0 {
                return Err(DeliveryError::ConnectionClosed);
            }
            *remaining -= 1;
        }
        Ok(())
    }
}

impl Transport for MemoryTransport {
    async fn send(&self, viewer: ViewerId, message: Vec<u8>) -> Result<(), DeliveryError> {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.admit(viewer)?;
        self.delivered.lock().entry(viewer).or_default().push(message);
        Ok(())
    }
}
