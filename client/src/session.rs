//! Session creation with bounded retry and cancellation.
//!
//! Connecting is the one long-latency operation in the client. It runs as a
//! cancellable future: every attempt and every backoff sleep races against
//! the leave signal, and a cancelled or failed attempt never leaves a hosted
//! server or a half-registered player behind.

use log::{debug, info, warn};
use server::network::{Server, ServerConfig, ServerError, ServerHandle};
use shared::{
    decode, encode, Bus, BusEvent, ClientId, ConnectionIntent, EntityId, Packet, Tuning,
    MAX_PACKET_SIZE, PROTOCOL_VERSION,
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode packet: {0}")]
    Encode(#[from] bincode::Error),
    #[error("failed to host session: {0}")]
    Host(#[from] ServerError),
    #[error("invalid server address '{0}'")]
    BadAddress(String),
    #[error("server refused connection: {0}")]
    Rejected(String),
    #[error("no reply from server within {0:?}")]
    Timeout(Duration),
    #[error("connection cancelled")]
    Cancelled,
    #[error("gave up after {attempts} attempts")]
    Exhausted { attempts: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    Host,
    Client,
    /// Join if possible, otherwise host after repeated failures.
    AutoHostOrClient,
}

impl SessionMode {
    /// The mode a menu click asks for, if any.
    pub fn from_intent(intent: ConnectionIntent) -> Option<Self> {
        match intent {
            ConnectionIntent::HostClicked => Some(SessionMode::Host),
            ConnectionIntent::JoinClicked => Some(SessionMode::Client),
            ConnectionIntent::LeaveClicked | ConnectionIntent::RestartClicked => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
    pub handshake_timeout: Duration,
    /// Failed join attempts before `AutoHostOrClient` hosts instead.
    pub auto_host_after: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(1),
            handshake_timeout: Duration::from_secs(2),
            auto_host_after: 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub mode: SessionMode,
    /// Session name when hosting.
    pub name: String,
    pub player_name: Option<String>,
    pub max_players: usize,
    pub properties: Vec<(String, String)>,
    /// Where to join in `Client` and `AutoHostOrClient` modes.
    pub server_addr: String,
    /// Where to listen when hosting.
    pub host_bind: String,
    pub tuning: Tuning,
    pub retry: RetryPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: SessionMode::AutoHostOrClient,
            name: "arena".to_string(),
            player_name: None,
            max_players: 8,
            properties: vec![
                ("GameType".to_string(), "Deathmatch".to_string()),
                ("Version".to_string(), PROTOCOL_VERSION.to_string()),
                ("Map".to_string(), "Arena".to_string()),
            ],
            server_addr: "127.0.0.1:8080".to_string(),
            host_bind: "127.0.0.1:8080".to_string(),
            tuning: Tuning::default(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Fires the leave action. Dropping it never cancels anything.
#[derive(Debug)]
pub struct LeaveSignal {
    tx: watch::Sender<bool>,
}

impl LeaveSignal {
    pub fn leave(&self) {
        self.tx.send_replace(true);
    }
}

#[derive(Debug, Clone)]
pub struct LeaveListener {
    rx: watch::Receiver<bool>,
}

impl LeaveListener {
    pub fn has_left(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once leave was requested.
    pub async fn left(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

pub fn leave_channel() -> (LeaveSignal, LeaveListener) {
    let (tx, rx) = watch::channel(false);
    (LeaveSignal { tx }, LeaveListener { rx })
}

/// A server running inside this process.
pub struct HostedServer {
    addr: SocketAddr,
    handle: ServerHandle,
    task: JoinHandle<Result<(), ServerError>>,
}

impl HostedServer {
    pub async fn start(config: ServerConfig) -> Result<Self, SessionError> {
        let mut server = Server::new(config).await?;
        let mut addr = server.local_addr()?;
        if addr.ip().is_unspecified() {
            addr.set_ip(IpAddr::V4(Ipv4Addr::LOCALHOST));
        }
        let handle = server.handle();
        let task = tokio::spawn(async move { server.run().await });
        Ok(Self { addr, handle, task })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stops the server and waits for its teardown to finish.
    pub async fn shutdown(self) {
        self.handle.shutdown();
        match self.task.await {
            Ok(Ok(())) => info!("Hosted server stopped"),
            Ok(Err(e)) => warn!("Hosted server failed: {}", e),
            Err(e) => warn!("Hosted server task ended abnormally: {}", e),
        }
    }
}

/// A connected session, ready for the client loop.
pub struct Session {
    pub socket: UdpSocket,
    pub server_addr: SocketAddr,
    pub client_id: ClientId,
    pub entity: EntityId,
    pub session_name: String,
    pub tick_rate: u32,
    pub hosted: Option<HostedServer>,
}

impl Session {
    pub fn is_host(&self) -> bool {
        self.hosted.is_some()
    }

    /// Best-effort disconnect, then stops a locally hosted server.
    pub async fn leave(self) {
        send_disconnect(&self.socket, self.server_addr).await;
        if let Some(hosted) = self.hosted {
            hosted.shutdown().await;
        }
    }
}

async fn send_disconnect(socket: &UdpSocket, addr: SocketAddr) {
    match encode(&Packet::Disconnect) {
        Ok(data) => {
            if let Err(e) = socket.send_to(&data, addr).await {
                debug!("Disconnect to {} not sent: {}", addr, e);
            }
        }
        Err(e) => debug!("Failed to encode disconnect: {}", e),
    }
}

fn status(bus: &mut Bus<BusEvent>, text: impl Into<String>) {
    let text = text.into();
    info!("{}", text);
    bus.publish(BusEvent::StatusText(text));
}

/// Connects according to `config.mode`, retrying up to the policy's cap.
///
/// Progress is published on `bus`. After the cap is exhausted a failure
/// status and `ShowMenu(true)` are published and the session is abandoned.
pub async fn create_session(
    config: &SessionConfig,
    bus: &mut Bus<BusEvent>,
    leave: &mut LeaveListener,
) -> Result<Session, SessionError> {
    let policy = &config.retry;
    let attempts = policy.max_attempts.max(1);

    for attempt in 1..=attempts {
        let hosting = match config.mode {
            SessionMode::Host => true,
            SessionMode::Client => false,
            SessionMode::AutoHostOrClient => attempt > policy.auto_host_after,
        };
        let verb = if hosting { "Creating room" } else { "Finding room" };
        status(bus, format!("{}... ({}/{})", verb, attempt, attempts));

        let result = attempt_session(config, hosting, leave).await;

        match result {
            Ok(session) => {
                // Leave may have raced the final reply.
                if leave.has_left() {
                    session.leave().await;
                    return Err(cancelled(bus));
                }
                let role = if session.is_host() { "Host" } else { "Client" };
                status(bus, format!("Connected as {}", role));
                bus.publish(BusEvent::ShowMenu(false));
                return Ok(session);
            }
            Err(SessionError::Cancelled) => return Err(cancelled(bus)),
            Err(e) => {
                warn!("Attempt {} failed: {}", attempt, e);
                status(bus, format!("Attempt {} failed", attempt));
            }
        }

        if attempt < attempts {
            tokio::select! {
                biased;
                _ = leave.left() => return Err(cancelled(bus)),
                _ = tokio::time::sleep(policy.backoff) => {}
            }
        }
    }

    status(bus, "Connection failed - Please retry");
    bus.publish(BusEvent::ShowMenu(true));
    Err(SessionError::Exhausted { attempts })
}

fn cancelled(bus: &mut Bus<BusEvent>) -> SessionError {
    status(bus, "Left session");
    bus.publish(BusEvent::ShowMenu(true));
    SessionError::Cancelled
}

/// One attempt. Cleans up after itself on failure.
///
/// A leave during the handshake sends `Disconnect` before returning
/// [`SessionError::Cancelled`]. If the whole future is dropped instead, the
/// hosted server shuts down through [`HostedGuard`].
async fn attempt_session(
    config: &SessionConfig,
    hosting: bool,
    leave: &mut LeaveListener,
) -> Result<Session, SessionError> {
    if leave.has_left() {
        return Err(SessionError::Cancelled);
    }

    let mut guard = HostedGuard(None);
    let server_addr = if hosting {
        let server_config = ServerConfig {
            bind_addr: config.host_bind.clone(),
            max_clients: config.max_players,
            session_name: config.name.clone(),
            tuning: config.tuning.clone(),
            ..ServerConfig::default()
        };
        let hosted = HostedServer::start(server_config).await?;
        let addr = hosted.addr();
        guard.0 = Some(hosted);
        addr
    } else {
        config
            .server_addr
            .parse::<SocketAddr>()
            .map_err(|_| SessionError::BadAddress(config.server_addr.clone()))?
    };

    let socket = UdpSocket::bind(bind_addr_for(server_addr)).await?;
    let timeout = config.retry.handshake_timeout;
    let handshake = tokio::time::timeout(timeout, handshake(&socket, server_addr, config));
    let reply = tokio::select! {
        biased;
        _ = leave.left() => Err(SessionError::Cancelled),
        reply = handshake => match reply {
            Ok(reply) => reply,
            Err(_) => Err(SessionError::Timeout(timeout)),
        },
    };

    match reply {
        Ok((client_id, entity, session_name, tick_rate)) => Ok(Session {
            socket,
            server_addr,
            client_id,
            entity,
            session_name,
            tick_rate,
            hosted: guard.0.take(),
        }),
        Err(e) => {
            // The server may already have registered us.
            send_disconnect(&socket, server_addr).await;
            if let Some(hosted) = guard.0.take() {
                hosted.shutdown().await;
            }
            Err(e)
        }
    }
}

fn bind_addr_for(server: SocketAddr) -> SocketAddr {
    let ip = if server.ip().is_loopback() {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    } else {
        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    };
    SocketAddr::new(ip, 0)
}

async fn handshake(
    socket: &UdpSocket,
    server_addr: SocketAddr,
    config: &SessionConfig,
) -> Result<(ClientId, EntityId, String, u32), SessionError> {
    let connect = Packet::Connect {
        client_version: PROTOCOL_VERSION,
        name: config.player_name.clone(),
        properties: config.properties.clone(),
    };
    socket.send_to(&encode(&connect)?, server_addr).await?;

    let mut buffer = vec![0u8; MAX_PACKET_SIZE];
    loop {
        let (len, from) = socket.recv_from(&mut buffer).await?;
        if from != server_addr {
            continue;
        }
        match decode(&buffer[..len]) {
            Ok(Packet::Connected {
                client_id,
                entity,
                session_name,
                tick_rate,
            }) => return Ok((client_id, entity, session_name, tick_rate)),
            Ok(Packet::Disconnected { reason }) => return Err(SessionError::Rejected(reason)),
            // Facts and snapshots can beat the reply; reliable facts are resent.
            Ok(_) => continue,
            Err(e) => debug!("Ignoring undecodable packet: {}", e),
        }
    }
}

/// Stops a hosted server that was started by an attempt which never
/// completed, including one that was dropped by cancellation.
struct HostedGuard(Option<HostedServer>);

impl Drop for HostedGuard {
    fn drop(&mut self) {
        if let Some(hosted) = self.0.take() {
            hosted.handle.shutdown();
        }
    }
}
