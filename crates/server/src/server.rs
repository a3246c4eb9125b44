use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

use visual::{
    CodecRegistry, EffectRegistry, Packet, PacketType, SyncConfig, SyncEvent, SyncHandle,
    SyncService, SyncStats, ViewerId,
};

use crate::config::ServerConfig;
use crate::connection::{ConnectionManager, ViewerConnection};
use crate::events::{DisconnectReason, ServerCommand, ServerEvent};
use crate::producers::{NameTagProducer, TabEntry, TabListProducer};
use crate::transport::UdpTransport;

const RECEIVE_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct ViewerInfo {
    pub viewer: ViewerId,
    pub name: String,
    pub addr: String,
    pub world: u32,
    pub rtt_ms: Option<u32>,
    pub rendered: usize,
    pub state: &'static str,
}

#[derive(Debug, Clone, Default)]
pub struct ServerStatus {
    pub sync: SyncStats,
    pub viewers: Vec<ViewerInfo>,
    pub max_viewers: usize,
    pub uptime_secs: u64,
}

/// The operator's side of a running server.
pub struct ServerLink {
    pub commands: mpsc::UnboundedSender<ServerCommand>,
    pub events: mpsc::UnboundedReceiver<ServerEvent>,
    pub status: watch::Receiver<ServerStatus>,
    pub running: Arc<AtomicBool>,
}

pub struct VisualServer {
    socket: Arc<UdpSocket>,
    transport: Arc<UdpTransport>,
    connections: ConnectionManager,
    registry: Arc<EffectRegistry>,
    sync: SyncHandle,
    sync_events: mpsc::UnboundedReceiver<SyncEvent>,
    tab_list: TabListProducer,
    name_tags: NameTagProducer,
    config: ServerConfig,
    running: Arc<AtomicBool>,
    commands: mpsc::UnboundedReceiver<ServerCommand>,
    events: mpsc::UnboundedSender<ServerEvent>,
    status: watch::Sender<ServerStatus>,
    start_time: Instant,
}

impl VisualServer {
    pub async fn bind(config: ServerConfig) -> io::Result<(Self, ServerLink)> {
        let socket = Arc::new(UdpSocket::bind(config.bind_addr()).await?);
        let transport = Arc::new(UdpTransport::new(Arc::clone(&socket)));
        let registry = Arc::new(EffectRegistry::new());

        let sync_config = SyncConfig {
            tick_rate: config.tick_rate,
            ..SyncConfig::manual()
        };
        let (sync, sync_events) = SyncService::start(
            Arc::clone(&registry),
            Arc::clone(&transport),
            CodecRegistry::with_defaults(),
            sync_config,
        );

        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (events, events_rx) = mpsc::unbounded_channel();
        let (status, status_rx) = watch::channel(ServerStatus {
            max_viewers: config.max_viewers,
            ..Default::default()
        });
        let running = Arc::new(AtomicBool::new(true));

        let _ = events.send(ServerEvent::Listening {
            addr: socket.local_addr()?,
        });

        let server = Self {
            socket,
            transport,
            connections: ConnectionManager::new(config.max_viewers, config.viewer_timeout()),
            registry,
            sync,
            sync_events,
            tab_list: TabListProducer::new(&config),
            name_tags: NameTagProducer::new(config.name_tag.clone()),
            running: Arc::clone(&running),
            commands,
            events,
            status,
            start_time: Instant::now(),
            config,
        };
        let link = ServerLink {
            commands: commands_tx,
            events: events_rx,
            status: status_rx,
            running,
        };
        Ok((server, link))
    }

    pub async fn run(mut self) {
        let socket = Arc::clone(&self.socket);
        let mut buf = vec![0u8; RECEIVE_BUFFER_SIZE];
        let mut ticker = tokio::time::interval(self.config.tick_duration());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        while self.running.load(Ordering::SeqCst) {
            tokio::select! {
                received = socket.recv_from(&mut buf) => match received {
                    Ok((len, addr)) => self.handle_datagram(&buf[..len], addr).await,
                    Err(e) => self.emit(ServerEvent::Error {
                        message: format!("Network error: {}", e),
                    }),
                },
                _ = ticker.tick() => self.tick().await,
                Some(event) = self.sync_events.recv() => self.emit(ServerEvent::Sync(event)),
                Some(command) = self.commands.recv() => self.handle_command(command).await,
            }
        }

        self.shutdown().await;
    }

    async fn tick(&mut self) {
        let tick = match self.sync.advance(1).await {
            Ok(tick) => tick,
            Err(e) => {
                self.emit(ServerEvent::Error {
                    message: format!("Sync stopped: {}", e),
                });
                self.running.store(false, Ordering::SeqCst);
                return;
            }
        };

        for connection in self.connections.cleanup_timed_out() {
            self.drop_viewer(connection, DisconnectReason::Timeout);
        }

        if self.tab_list.is_due(tick) {
            self.refresh_tab_list();
            self.send_pings().await;
        }

        self.publish_status().await;
    }

    async fn handle_command(&mut self, command: ServerCommand) {
        match command {
            ServerCommand::Kick(viewer) => self.kick_viewer(viewer).await,
            ServerCommand::Shutdown => self.running.store(false, Ordering::SeqCst),
        }
    }

    async fn handle_datagram(&mut self, bytes: &[u8], addr: SocketAddr) {
        let packet = match Packet::deserialize(bytes) {
            Ok(packet) => packet,
            Err(e) => {
                log::debug!("Dropping datagram from {}: {}", addr, e);
                return;
            }
        };

        let sequence = packet.header.sequence;
        if let Some(connection) = self.connections.get_by_addr_mut(&addr) {
            if !connection.accept_sequence(sequence) {
                log::trace!("Stale packet {} from {}", sequence, addr);
                return;
            }
            connection.touch();
        }

        let result = match packet.payload {
            PacketType::Hello { name, world } => {
                self.handle_hello(addr, sequence, name, world).await
            }
            PacketType::WorldChange { world } => {
                self.handle_world_change(addr, world);
                Ok(())
            }
            PacketType::Ping { timestamp } => {
                self.transport
                    .send_control(addr, PacketType::Pong { timestamp })
                    .await
            }
            PacketType::Pong { timestamp } => {
                self.handle_pong(addr, timestamp);
                Ok(())
            }
            PacketType::Disconnect => {
                if let Some(connection) = self.connections.remove_by_addr(&addr) {
                    self.drop_viewer(connection, DisconnectReason::Graceful);
                }
                Ok(())
            }
            _ => Ok(()),
        };

        if let Err(e) = result {
            self.emit(ServerEvent::Error {
                message: format!("Failed to answer {}: {}", addr, e),
            });
        }
    }

    async fn handle_hello(
        &mut self,
        addr: SocketAddr,
        sequence: u32,
        name: String,
        world: u32,
    ) -> io::Result<()> {
        let (viewer, created) = match self.connections.get_or_create(addr, &name, world) {
            Ok((connection, created)) => {
                if created {
                    connection.accept_sequence(sequence);
                }
                (connection.viewer_id, created)
            }
            Err(reason) => {
                self.transport
                    .send_control(
                        addr,
                        PacketType::Denied {
                            reason: reason.to_string(),
                        },
                    )
                    .await?;
                self.emit(ServerEvent::ConnectionDenied {
                    addr,
                    reason: reason.to_string(),
                });
                return Ok(());
            }
        };

        // Welcome goes out before any visual traffic for this viewer.
        self.transport
            .send_control(
                addr,
                PacketType::Welcome {
                    viewer_id: viewer,
                    tick_rate: self.config.tick_rate,
                },
            )
            .await?;

        if !created {
            return Ok(());
        }

        self.transport.route(viewer, addr);
        if let Err(e) = self.sync.join(viewer) {
            self.emit(ServerEvent::Error {
                message: format!("Viewer {} could not join: {}", viewer, e),
            });
            return Ok(());
        }

        let rank = self.config.ranks.get(&name);
        if let Err(e) = self.name_tags.add(&self.registry, viewer, world, rank) {
            self.emit(ServerEvent::Error {
                message: format!("Name tag for viewer {} rejected: {}", viewer, e),
            });
        }
        self.refresh_tab_list();

        self.emit(ServerEvent::ViewerConnected { viewer, addr, name });
        Ok(())
    }

    fn handle_world_change(&mut self, addr: SocketAddr, world: u32) {
        let Some(connection) = self.connections.get_by_addr_mut(&addr) else {
            return;
        };
        connection.world = world;
        let viewer = connection.viewer_id;

        // Name tag visibility depends on worlds, which the registry cannot see.
        for other in self.name_tags.move_to(viewer, world) {
            if other != viewer {
                let _ = self.sync.invalidate(other);
            }
        }
        let _ = self.sync.world_change(viewer);

        self.emit(ServerEvent::WorldChanged { viewer, world });
    }

    fn handle_pong(&mut self, addr: SocketAddr, timestamp: u64) {
        let now = self.now_millis();
        if let Some(connection) = self.connections.get_by_addr_mut(&addr) {
            connection.rtt_ms = Some(now.saturating_sub(timestamp) as u32);
        }
    }

    async fn send_pings(&self) {
        let timestamp = self.now_millis();
        for connection in self.connections.iter() {
            if let Err(e) = self
                .transport
                .send_control(connection.addr, PacketType::Ping { timestamp })
                .await
            {
                log::debug!("Ping to {} failed: {}", connection.addr, e);
            }
        }
    }

    fn refresh_tab_list(&mut self) {
        let mut entries: Vec<TabEntry> = self
            .connections
            .iter()
            .map(|c| TabEntry {
                viewer: c.viewer_id,
                name: c.name.clone(),
                rtt_ms: c.rtt_ms,
            })
            .collect();
        entries.sort_by_key(|e| e.viewer);

        if let Err(e) = self.tab_list.refresh(&self.registry, &entries) {
            self.emit(ServerEvent::Error {
                message: format!("Tab list rejected: {}", e),
            });
        }
    }

    async fn kick_viewer(&mut self, viewer: ViewerId) {
        let Some(connection) = self.connections.remove(viewer) else {
            return;
        };
        let _ = self
            .transport
            .send_control(connection.addr, PacketType::Disconnect)
            .await;
        self.drop_viewer(connection, DisconnectReason::Kicked);
    }

    fn drop_viewer(&mut self, connection: ViewerConnection, reason: DisconnectReason) {
        let viewer = connection.viewer_id;
        self.transport.unroute(viewer);
        let _ = self.sync.disconnect(viewer);
        self.name_tags.remove(&self.registry, viewer);
        self.tab_list.remove(&self.registry, viewer);

        self.emit(ServerEvent::ViewerDisconnected { viewer, reason });
    }

    async fn publish_status(&self) {
        let sync = self.sync.stats().await.unwrap_or_default();

        let mut viewers: Vec<ViewerInfo> = self
            .connections
            .iter()
            .map(|c| {
                let session = self.sync.session(c.viewer_id);
                ViewerInfo {
                    viewer: c.viewer_id,
                    name: c.name.clone(),
                    addr: c.addr.to_string(),
                    world: c.world,
                    rtt_ms: c.rtt_ms,
                    rendered: session.as_ref().map_or(0, |s| s.rendered().len()),
                    state: session.as_ref().map_or("closed", |s| s.state().as_str()),
                }
            })
            .collect();
        viewers.sort_by_key(|v| v.viewer);

        self.status.send_replace(ServerStatus {
            sync,
            viewers,
            max_viewers: self.connections.max_viewers(),
            uptime_secs: self.start_time.elapsed().as_secs(),
        });
    }

    async fn shutdown(&mut self) {
        let viewers: Vec<ViewerId> = self.connections.iter().map(|c| c.viewer_id).collect();
        for viewer in viewers {
            self.kick_viewer(viewer).await;
        }
        if let Err(e) = self.sync.stop().await {
            log::debug!("Sync already stopped: {}", e);
        }
        log::info!("Server stopped");
    }

    fn emit(&self, event: ServerEvent) {
        let _ = self.events.send(event);
    }

    fn now_millis(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }
}
