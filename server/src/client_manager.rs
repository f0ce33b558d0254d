//! Per-connection bookkeeping for the authoritative server
//!
//! This module tracks everything the server knows about a remote process:
//! - Connection lifecycle (connect, disconnect, timeout)
//! - Buffered input commands, tagged with the entity they claim to drive
//! - One reliable sender per client carrying discrete facts in order
//!
//! Input-authority is not decided here. The manager only remembers who sent
//! what; the game state rejects input for entities the sender does not own.

use log::{debug, info};
use shared::{
    ClientId, EntityId, Fact, InputCommand, Packet, ReliableSender, MAX_NAME_LEN,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Inputs kept per client before the oldest are dropped.
pub const MAX_PENDING_INPUTS: usize = 16;

pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

/// A connected remote process
#[derive(Debug)]
pub struct Client {
    /// Identifier assigned by the server, never reused within a session
    pub id: ClientId,
    /// Network address for replies
    pub addr: SocketAddr,
    /// Display name requested on connect, if any
    pub requested_name: Option<String>,
    /// Free-form properties sent with the connect request
    pub properties: Vec<(String, String)>,
    /// Last time any packet arrived from this client
    pub last_seen: Instant,
    /// Highest input sequence handed to the game state
    pub last_processed_input: u32,
    /// Buffered inputs, kept sorted by sequence
    pub pending_inputs: Vec<(EntityId, InputCommand)>,
    /// Facts not yet acknowledged by this client
    pub reliable: ReliableSender<Fact>,
}

impl Client {
    pub fn new(id: ClientId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            requested_name: None,
            properties: Vec::new(),
            last_seen: Instant::now(),
            last_processed_input: 0,
            pending_inputs: Vec::new(),
            reliable: ReliableSender::new(),
        }
    }

    /// Buffers an input command
    ///
    /// Duplicates and inputs at or below the processed watermark are dropped.
    /// The buffer is bounded; a client flooding inputs loses its oldest ones.
    pub fn add_input(&mut self, entity: EntityId, command: InputCommand) {
        self.touch();
        if command.sequence <= self.last_processed_input
            || self
                .pending_inputs
                .iter()
                .any(|(_, c)| c.sequence == command.sequence)
        {
            return;
        }
        self.pending_inputs.push((entity, command));
        // Out-of-order delivery
        self.pending_inputs.sort_by_key(|(_, c)| c.sequence);
        if self.pending_inputs.len() > MAX_PENDING_INPUTS {
            let excess = self.pending_inputs.len() - MAX_PENDING_INPUTS;
            self.pending_inputs.drain(..excess);
            debug!("Client {} input buffer full, dropped {}", self.id, excess);
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// All connected clients, their input queues and their reliable channels
///
/// Client IDs start at 1 and are never reused while the manager lives, so a
/// late packet from a departed client can never be credited to a newcomer.
pub struct ClientManager {
    clients: HashMap<ClientId, Client>,
    next_client_id: ClientId,
    max_clients: usize,
    timeout: Duration,
}

impl ClientManager {
    pub fn new(max_clients: usize) -> Self {
        Self::with_timeout(max_clients, DEFAULT_CLIENT_TIMEOUT)
    }

    pub fn with_timeout(max_clients: usize, timeout: Duration) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
            timeout,
        }
    }

    /// Registers a new connection
    ///
    /// Returns `None` when the server is at capacity.
    pub fn add_client(&mut self, addr: SocketAddr) -> Option<ClientId> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        info!("Client {} connected from {}", client_id, addr);
        self.clients.insert(client_id, Client::new(client_id, addr));
        Some(client_id)
    }

    /// Records the name and properties a client sent with its connect request
    pub fn set_profile(
        &mut self,
        client_id: ClientId,
        name: Option<&str>,
        properties: Vec<(String, String)>,
    ) {
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.requested_name = name.map(|n| n.chars().take(MAX_NAME_LEN).collect());
            client.properties = properties;
        }
    }

    pub fn remove_client(&mut self, client_id: &ClientId) -> Option<Client> {
        let client = self.clients.remove(client_id)?;
        info!("Client {} disconnected", client.id);
        Some(client)
    }

    pub fn find_client_by_addr(&self, addr: SocketAddr) -> Option<ClientId> {
        self.clients
            .iter()
            .find(|(_, client)| client.addr == addr)
            .map(|(id, _)| *id)
    }

    pub fn get(&self, client_id: ClientId) -> Option<&Client> {
        self.clients.get(&client_id)
    }

    /// Refreshes the activity timestamp for any packet, inputs included
    pub fn touch(&mut self, client_id: ClientId) {
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.touch();
        }
    }

    pub fn add_input(&mut self, client_id: ClientId, entity: EntityId, command: InputCommand) -> bool {
        match self.clients.get_mut(&client_id) {
            Some(client) => {
                client.add_input(entity, command);
                true
            }
            None => false,
        }
    }

    /// Unprocessed inputs of every client, oldest timestamp first
    ///
    /// The submitter travels with each command so the game state can check
    /// input-authority against the entity it names.
    pub fn get_chronological_inputs(&self) -> Vec<(ClientId, EntityId, InputCommand)> {
        let mut all_inputs: Vec<(ClientId, EntityId, InputCommand)> = self
            .clients
            .iter()
            .flat_map(|(client_id, client)| {
                client
                    .pending_inputs
                    .iter()
                    .filter(|(_, c)| c.sequence > client.last_processed_input)
                    .map(|(entity, command)| (*client_id, *entity, *command))
            })
            .collect();

        all_inputs.sort_by_key(|(id, _, command)| (command.timestamp, *id, command.sequence));
        all_inputs
    }

    pub fn mark_input_processed(&mut self, client_id: ClientId, sequence: u32) {
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.last_processed_input = client.last_processed_input.max(sequence);
        }
    }

    pub fn cleanup_processed_inputs(&mut self) {
        for client in self.clients.values_mut() {
            let watermark = client.last_processed_input;
            client.pending_inputs.retain(|(_, c)| c.sequence > watermark);
        }
    }

    /// Queues a fact for one client
    pub fn queue_fact(&mut self, client_id: ClientId, fact: Fact) {
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.reliable.push(fact);
        }
    }

    /// Queues a fact for every connected client
    pub fn broadcast_fact(&mut self, fact: &Fact) {
        for client in self.clients.values_mut() {
            client.reliable.push(fact.clone());
        }
    }

    /// Drops everything the client has confirmed up to and including `seq`
    pub fn acknowledge(&mut self, client_id: ClientId, seq: u32) {
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.touch();
            client.reliable.acknowledge(seq);
        }
    }

    /// One reliable packet per client that still has unacknowledged facts
    ///
    /// Unacknowledged facts are resent every call until acknowledged.
    pub fn reliable_batches(&self) -> Vec<(SocketAddr, Packet)> {
        self.clients
            .values()
            .filter(|client| !client.reliable.is_idle())
            .map(|client| {
                (
                    client.addr,
                    Packet::Reliable {
                        messages: client.reliable.pending(),
                    },
                )
            })
            .collect()
    }

    /// Removes clients that went quiet and returns their IDs
    pub fn check_timeouts(&mut self) -> Vec<ClientId> {
        let timeout = self.timeout;
        let timed_out: Vec<ClientId> = self
            .clients
            .iter()
            .filter(|(_, client)| client.is_timed_out(timeout))
            .map(|(id, _)| *id)
            .collect();

        for client_id in &timed_out {
            self.remove_client(client_id);
        }
        timed_out
    }

    pub fn get_client_addrs(&self) -> Vec<(ClientId, SocketAddr)> {
        self.clients
            .iter()
            .map(|(id, client)| (*id, client.addr))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::InputSnapshot;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    fn command(sequence: u32, timestamp: u64) -> InputCommand {
        InputCommand {
            sequence,
            timestamp,
            snapshot: InputSnapshot::default(),
        }
    }

    #[test]
    fn test_client_manager_capacity() {
        let mut manager = ClientManager::new(2);
        assert_eq!(manager.add_client(addr(8001)), Some(1));
        assert_eq!(manager.add_client(addr(8002)), Some(2));
        assert_eq!(manager.add_client(addr(8003)), None);
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn test_client_ids_not_reused() {
        let mut manager = ClientManager::new(2);
        let first = manager.add_client(addr(8001)).unwrap();
        manager.remove_client(&first);
        assert_eq!(manager.add_client(addr(8001)), Some(2));
        assert_eq!(manager.find_client_by_addr(addr(8001)), Some(2));
    }

    #[test]
    fn test_inputs_sorted_and_deduplicated() {
        let mut manager = ClientManager::new(2);
        let id = manager.add_client(addr(8001)).unwrap();
        manager.add_input(id, 7, command(3, 30));
        manager.add_input(id, 7, command(1, 10));
        manager.add_input(id, 7, command(1, 10));
        manager.add_input(id, 7, command(2, 20));

        let inputs = manager.get_chronological_inputs();
        let sequences: Vec<u32> = inputs.iter().map(|(_, _, c)| c.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
        assert!(inputs.iter().all(|(client, entity, _)| *client == id && *entity == 7));
    }

    #[test]
    fn test_chronological_across_clients() {
        let mut manager = ClientManager::new(2);
        let a = manager.add_client(addr(8001)).unwrap();
        let b = manager.add_client(addr(8002)).unwrap();
        manager.add_input(a, 1, command(1, 200));
        manager.add_input(b, 2, command(1, 100));

        let inputs = manager.get_chronological_inputs();
        assert_eq!(inputs[0].0, b);
        assert_eq!(inputs[1].0, a);
    }

    #[test]
    fn test_processed_inputs_cleaned_up() {
        let mut manager = ClientManager::new(1);
        let id = manager.add_client(addr(8001)).unwrap();
        manager.add_input(id, 1, command(1, 1));
        manager.add_input(id, 1, command(2, 2));
        manager.mark_input_processed(id, 1);
        manager.cleanup_processed_inputs();
        assert_eq!(manager.get(id).unwrap().pending_inputs.len(), 1);

        // Stale input is not re-buffered.
        manager.add_input(id, 1, command(1, 1));
        assert_eq!(manager.get(id).unwrap().pending_inputs.len(), 1);
    }

    #[test]
    fn test_input_buffer_bounded() {
        let mut manager = ClientManager::new(1);
        let id = manager.add_client(addr(8001)).unwrap();
        for seq in 1..=40 {
            manager.add_input(id, 1, command(seq, seq as u64));
        }
        let pending = &manager.get(id).unwrap().pending_inputs;
        assert_eq!(pending.len(), MAX_PENDING_INPUTS);
        assert_eq!(pending[0].1.sequence, 25);
    }

    #[test]
    fn test_reliable_batches_until_acknowledged() {
        let mut manager = ClientManager::new(2);
        let a = manager.add_client(addr(8001)).unwrap();
        let b = manager.add_client(addr(8002)).unwrap();
        manager.broadcast_fact(&Fact::MatchStarted);
        manager.queue_fact(a, Fact::PlayerDespawned { entity: 3 });

        assert_eq!(manager.reliable_batches().len(), 2);
        manager.acknowledge(b, 1);
        let batches = manager.reliable_batches();
        assert_eq!(batches.len(), 1);
        match &batches[0].1 {
            Packet::Reliable { messages } => assert_eq!(messages.len(), 2),
            other => panic!("unexpected packet {:?}", other),
        }
        manager.acknowledge(a, 2);
        assert!(manager.reliable_batches().is_empty());
    }

    #[test]
    fn test_timeouts_remove_clients() {
        let mut manager = ClientManager::with_timeout(2, Duration::from_millis(0));
        let id = manager.add_client(addr(8001)).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(manager.check_timeouts(), vec![id]);
        assert!(manager.is_empty());
    }

    #[test]
    fn test_profile_name_clamped() {
        let mut manager = ClientManager::new(1);
        let id = manager.add_client(addr(8001)).unwrap();
        manager.set_profile(
            id,
            Some("a-name-that-is-far-too-long"),
            vec![("team".to_string(), "red".to_string())],
        );
        let client = manager.get(id).unwrap();
        assert_eq!(client.requested_name.as_deref().map(str::len), Some(MAX_NAME_LEN));
        assert_eq!(client.properties.len(), 1);
    }
}
