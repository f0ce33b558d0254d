//! Server network layer handling UDP communications and game loop coordination

use crate::client_manager::{ClientManager, DEFAULT_CLIENT_TIMEOUT};
use crate::game::GameState;
use log::{debug, error, info, warn};
use shared::{
    decode, encode, presentation_events, Bus, BusEvent, ClientId, Packet, Subscription, Tuning,
    MAX_PACKET_SIZE, PROTOCOL_VERSION,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::interval;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode packet: {0}")]
    Encode(#[from] bincode::Error),
}

/// Everything needed to open a session.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub max_clients: usize,
    pub session_name: String,
    pub tuning: Tuning,
    /// Fixed seed for spawn points and generated names.
    pub seed: Option<u64>,
    pub client_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            max_clients: 8,
            session_name: "arena".to_string(),
            tuning: Tuning::default(),
            seed: None,
            client_timeout: DEFAULT_CLIENT_TIMEOUT,
        }
    }
}

/// Messages sent from network tasks to main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { packet: Packet, addr: SocketAddr },
    ClientTimeout { client_id: ClientId },
    Shutdown,
}

/// Messages sent from game loop to network tasks
#[derive(Debug)]
pub enum GameMessage {
    SendPacket {
        packet: Packet,
        addr: SocketAddr,
    },
    BroadcastPacket {
        packet: Packet,
        exclude: Option<ClientId>,
    },
}

/// Stops a running server from another task.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    server_tx: mpsc::UnboundedSender<ServerMessage>,
}

impl ServerHandle {
    /// Returns false if the server loop already exited.
    pub fn shutdown(&self) -> bool {
        self.server_tx.send(ServerMessage::Shutdown).is_ok()
    }
}

/// Main server coordinating networking and game simulation
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    game_state: GameState,
    tick_duration: Duration,
    session_name: String,
    bus: Bus<BusEvent>,
    tasks: Vec<JoinHandle<()>>,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: Option<mpsc::UnboundedReceiver<GameMessage>>,
}

impl Server {
    pub async fn new(config: ServerConfig) -> Result<Self, ServerError> {
        let socket = Arc::new(UdpSocket::bind(&config.bind_addr).await?);
        info!(
            "Server '{}' listening on {}",
            config.session_name,
            socket.local_addr()?
        );

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();

        let tick_duration = Duration::from_secs_f32(config.tuning.tick_dt());
        let game_state = match config.seed {
            Some(seed) => GameState::seeded(config.tuning, config.max_clients, seed),
            None => GameState::new(config.tuning, config.max_clients),
        };

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::with_timeout(
                config.max_clients,
                config.client_timeout,
            ))),
            game_state,
            tick_duration,
            session_name: config.session_name,
            bus: Bus::new(),
            tasks: Vec::new(),
            server_tx,
            server_rx,
            game_tx,
            game_rx: Some(game_rx),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            server_tx: self.server_tx.clone(),
        }
    }

    /// Facts and presentation events produced by this server, in order.
    pub fn subscribe(&mut self) -> Subscription<BusEvent> {
        self.bus.subscribe()
    }

    pub fn game_state(&self) -> &GameState {
        &self.game_state
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&mut self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        self.tasks.push(tokio::spawn(async move {
            let mut buffer = vec![0u8; MAX_PACKET_SIZE];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => match decode(&buffer[..len]) {
                        Ok(packet) => {
                            if server_tx
                                .send(ServerMessage::PacketReceived { packet, addr })
                                .is_err()
                            {
                                break;
                            }
                        }
                        Err(e) => warn!("Failed to deserialize packet from {}: {}", addr, e),
                    },
                    Err(e) => {
                        // Windows reports ICMP port unreachable here, keep going.
                        debug!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        }));
    }

    /// Spawns task that processes outgoing packet queue
    fn spawn_network_sender(&mut self) {
        let Some(mut game_rx) = self.game_rx.take() else {
            return;
        };
        let socket = Arc::clone(&self.socket);
        let clients = Arc::clone(&self.clients);

        self.tasks.push(tokio::spawn(async move {
            while let Some(message) = game_rx.recv().await {
                match message {
                    GameMessage::SendPacket { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    GameMessage::BroadcastPacket { packet, exclude } => {
                        let client_addrs = clients.read().await.get_client_addrs();
                        for (client_id, addr) in client_addrs {
                            if Some(client_id) == exclude {
                                continue;
                            }
                            if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                                error!("Failed to send to client {}: {}", client_id, e);
                            }
                        }
                    }
                }
            }
        }));
    }

    /// Spawns task that monitors client timeouts
    fn spawn_timeout_checker(&mut self) {
        let clients = Arc::clone(&self.clients);
        let server_tx = self.server_tx.clone();

        self.tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;
                let timed_out = clients.write().await.check_timeouts();
                for client_id in timed_out {
                    if server_tx
                        .send(ServerMessage::ClientTimeout { client_id })
                        .is_err()
                    {
                        return;
                    }
                }
            }
        }));
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), ServerError> {
        let data = encode(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self.game_tx.send(GameMessage::SendPacket { packet, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    fn broadcast_packet(&self, packet: Packet, exclude: Option<ClientId>) {
        if let Err(e) = self
            .game_tx
            .send(GameMessage::BroadcastPacket { packet, exclude })
        {
            error!("Failed to queue broadcast packet: {}", e);
        }
    }

    async fn client_for(&self, addr: SocketAddr) -> Option<ClientId> {
        self.clients.read().await.find_client_by_addr(addr)
    }

    /// Processes incoming packets and updates game state
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::Connect {
                client_version,
                name,
                properties,
            } => {
                self.handle_connect(addr, client_version, name, properties)
                    .await;
            }

            Packet::Input { entity, command } => {
                if let Some(client_id) = self.client_for(addr).await {
                    self.clients
                        .write()
                        .await
                        .add_input(client_id, entity, command);
                }
            }

            Packet::Ack { reliable_seq } => {
                if let Some(client_id) = self.client_for(addr).await {
                    self.clients
                        .write()
                        .await
                        .acknowledge(client_id, reliable_seq);
                }
            }

            Packet::Restart => {
                if let Some(client_id) = self.client_for(addr).await {
                    self.clients.write().await.touch(client_id);
                    self.game_state.restart_match(client_id);
                }
            }

            Packet::Disconnect => {
                if let Some(client_id) = self.client_for(addr).await {
                    self.drop_client(client_id).await;
                }
            }

            _ => {
                warn!("Unexpected packet type from client at {}", addr);
            }
        }
    }

    async fn handle_connect(
        &mut self,
        addr: SocketAddr,
        client_version: u32,
        name: Option<String>,
        properties: Vec<(String, String)>,
    ) {
        info!(
            "Client connecting from {} (version: {})",
            addr, client_version
        );

        if client_version != PROTOCOL_VERSION {
            self.send_packet(
                Packet::Disconnected {
                    reason: "Protocol version mismatch".to_string(),
                },
                addr,
            );
            return;
        }

        if let Some(existing_id) = self.client_for(addr).await {
            info!("Removing existing client {} from {}", existing_id, addr);
            self.drop_client(existing_id).await;
        }

        // Earlier facts must reach existing clients before the newcomer's
        // catch-up is computed, or they would be delivered twice.
        self.flush_facts().await;
        let catch_up = self.game_state.catch_up_facts();

        let Some(client_id) = self.clients.write().await.add_client(addr) else {
            self.send_packet(
                Packet::Disconnected {
                    reason: "Server full".to_string(),
                },
                addr,
            );
            return;
        };

        let Some((_, entity)) = self.game_state.add_player(client_id, name.as_deref()) else {
            self.clients.write().await.remove_client(&client_id);
            self.send_packet(
                Packet::Disconnected {
                    reason: "Server full".to_string(),
                },
                addr,
            );
            return;
        };

        if !properties.is_empty() {
            info!("Client {} properties: {:?}", client_id, properties);
        }
        {
            let mut clients = self.clients.write().await;
            clients.set_profile(client_id, name.as_deref(), properties);
            for fact in catch_up {
                clients.queue_fact(client_id, fact);
            }
        }

        self.send_packet(
            Packet::Connected {
                client_id,
                entity,
                session_name: self.session_name.clone(),
                tick_rate: self.game_state.tuning().tick_rate,
            },
            addr,
        );
    }

    async fn drop_client(&mut self, client_id: ClientId) {
        self.clients.write().await.remove_client(&client_id);
        self.game_state.remove_player(client_id);
    }

    /// Applies buffered inputs for this tick, oldest first
    async fn process_inputs(&mut self) {
        let all_inputs = self.clients.read().await.get_chronological_inputs();
        if all_inputs.is_empty() {
            return;
        }

        let mut processed = Vec::with_capacity(all_inputs.len());
        for (client_id, entity, command) in all_inputs {
            if let Err(e) = self.game_state.apply_input(entity, client_id, &command) {
                warn!("Rejected input: {}", e);
            }
            processed.push((client_id, command.sequence));
        }

        let mut clients = self.clients.write().await;
        for (client_id, sequence) in processed {
            clients.mark_input_processed(client_id, sequence);
        }
        clients.cleanup_processed_inputs();
    }

    /// Moves this tick's facts onto every client's reliable channel and the
    /// local bus.
    async fn flush_facts(&mut self) {
        let facts = self.game_state.drain_facts();
        if facts.is_empty() {
            return;
        }

        let mut clients = self.clients.write().await;
        for fact in facts {
            clients.broadcast_fact(&fact);
            let presentation = presentation_events(&fact);
            self.bus.publish(BusEvent::Fact(fact));
            for event in presentation {
                self.bus.publish(event);
            }
        }
    }

    async fn send_reliable(&self) {
        let batches = self.clients.read().await.reliable_batches();
        for (addr, packet) in batches {
            self.send_packet(packet, addr);
        }
    }

    /// Broadcasts current game state to all connected clients
    async fn broadcast_game_state(&mut self) {
        if self.clients.read().await.is_empty() {
            return;
        }
        let packet = self.game_state.build_snapshot();
        self.broadcast_packet(packet, None);
    }

    async fn tick(&mut self) {
        self.game_state.step();
        self.process_inputs().await;
        self.flush_facts().await;
        self.send_reliable().await;
        self.broadcast_game_state().await;
    }

    /// Tears the session down and tells every client, bypassing the sender
    /// task so nothing is lost when it is aborted.
    async fn shutdown(&mut self) {
        self.game_state.shutdown();
        self.flush_facts().await;

        let (batches, addrs) = {
            let clients = self.clients.read().await;
            (clients.reliable_batches(), clients.get_client_addrs())
        };
        for (addr, packet) in batches {
            if let Err(e) = Self::send_packet_impl(&self.socket, &packet, addr).await {
                debug!("Final reliable batch to {} failed: {}", addr, e);
            }
        }
        let goodbye = Packet::Disconnected {
            reason: "Server shutting down".to_string(),
        };
        for (_, addr) in addrs {
            if let Err(e) = Self::send_packet_impl(&self.socket, &goodbye, addr).await {
                debug!("Goodbye to {} failed: {}", addr, e);
            }
        }

        for task in self.tasks.drain(..) {
            task.abort();
        }
        info!("Server stopped");
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), ServerError> {
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();

        let mut tick_interval = interval(self.tick_duration);
        let mut tick_time = Duration::ZERO;

        info!("Server started successfully");

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr).await;
                        }
                        Some(ServerMessage::ClientTimeout { client_id }) => {
                            info!("Client {} timed out", client_id);
                            self.game_state.remove_player(client_id);
                        }
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                }

                _ = tick_interval.tick() => {
                    let started = Instant::now();
                    self.tick().await;
                    tick_time += started.elapsed();

                    let tick = self.game_state.tick();
                    if tick % 60 == 0 {
                        let clients = self.clients.read().await.len();
                        debug!(
                            "Tick {}: {} clients, {} active projectiles, avg tick {:?}",
                            tick,
                            clients,
                            self.game_state.projectiles().active_count(),
                            tick_time / 60
                        );
                        tick_time = Duration::ZERO;
                    }
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }
}
