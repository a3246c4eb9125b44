use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::RwLock;
use tokio::net::UdpSocket;

use visual::{DeliveryError, Packet, PacketHeader, PacketType, Transport, ViewerId};

/// Sends visual packets to whichever address a viewer said hello from.
///
/// Visual packets arrive already framed and sequenced by the injector.
/// Control packets (welcome, pong, disconnect) use their own sequence.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    routes: RwLock<HashMap<ViewerId, SocketAddr>>,
    control_sequence: AtomicU32,
}

impl UdpTransport {
    pub fn new(socket: Arc<UdpSocket>) -> Self {
        Self {
            socket,
            routes: RwLock::new(HashMap::new()),
            control_sequence: AtomicU32::new(0),
        }
    }

    pub fn route(&self, viewer: ViewerId, addr: SocketAddr) {
        self.routes.write().insert(viewer, addr);
    }

    pub fn unroute(&self, viewer: ViewerId) {
        self.routes.write().remove(&viewer);
    }

    pub async fn send_control(&self, addr: SocketAddr, payload: PacketType) -> io::Result<()> {
        let sequence = self.control_sequence.fetch_add(1, Ordering::Relaxed);
        let bytes = Packet::new(PacketHeader::new(sequence), payload)
            .serialize()
            .map_err(io::Error::other)?;
        self.socket.send_to(&bytes, addr).await?;
        Ok(())
    }
}

impl Transport for UdpTransport {
    async fn send(&self, viewer: ViewerId, message: Vec<u8>) -> Result<(), DeliveryError> {
        let addr = self
            .routes
            .read()
            .get(&viewer)
            .copied()
            .ok_or(DeliveryError::ConnectionClosed)?;

        self.socket
            .send_to(&message, addr)
            .await
            .map(|_| ())
            .map_err(|e| DeliveryError::Io(e.to_string()))
    }
}
