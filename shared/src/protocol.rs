//! Wire protocol between the server and its clients.
//!
//! Continuous state (transforms, projectile positions) travels in
//! [`Packet::Snapshot`] and may be dropped or reordered. Discrete facts
//! travel in [`Packet::Reliable`] batches and are delivered exactly once,
//! in order.

use crate::movement::TransformState;
use crate::reliable::Sequenced;
use crate::vitals::Vitals;
use crate::{ClientId, EntityId, ProjectileSlot, Tick};
use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

/// Largest look delta per axis accepted in one tick.
pub const MAX_LOOK_DELTA: f32 = 10.0;

/// One tick of local input, already mapped from whatever device produced it.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct InputSnapshot {
    pub move_vector: Vec2,
    pub look_delta: Vec2,
    pub fire: bool,
    pub vertical_move: f32,
}

impl InputSnapshot {
    /// Zeroes non-finite components, clamps movement to unit range and look
    /// deltas to [`MAX_LOOK_DELTA`] per axis.
    pub fn sanitize(mut self) -> Self {
        if !self.move_vector.is_finite() {
            self.move_vector = Vec2::ZERO;
        }
        self.move_vector = self.move_vector.clamp_length_max(1.0);

        if !self.look_delta.is_finite() {
            self.look_delta = Vec2::ZERO;
        }
        self.look_delta = self
            .look_delta
            .clamp(Vec2::splat(-MAX_LOOK_DELTA), Vec2::splat(MAX_LOOK_DELTA));

        self.vertical_move = if self.vertical_move.is_finite() {
            self.vertical_move.clamp(-1.0, 1.0)
        } else {
            0.0
        };
        self
    }

    pub fn is_idle(&self) -> bool {
        self.move_vector == Vec2::ZERO
            && self.look_delta == Vec2::ZERO
            && self.vertical_move == 0.0
            && !self.fire
    }
}

/// Input tagged with the client's sequence number so the server can report
/// which inputs it has applied.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InputCommand {
    pub sequence: u32,
    pub timestamp: u64,
    pub snapshot: InputSnapshot,
}

/// Per-tick state of one player in a snapshot.
///
/// `transform` is `None` when the server thinned the update this tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerUpdate {
    pub entity: EntityId,
    pub seq: Tick,
    pub transform: Option<TransformState>,
    pub vitals: Vitals,
    /// Ticks left until respawn, zero while alive.
    pub respawn_ticks: u32,
    pub last_processed_input: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectileUpdate {
    pub slot: ProjectileSlot,
    pub seq: Tick,
    pub position: Vec3,
    pub velocity: Vec3,
}

/// Discrete, order-sensitive facts. Always sent on the reliable channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Fact {
    PlayerSpawned {
        entity: EntityId,
        owner: ClientId,
        name: String,
    },
    PlayerDespawned {
        entity: EntityId,
    },
    HealthChanged {
        entity: EntityId,
        health: i32,
    },
    PlayerDied {
        entity: EntityId,
        attacker: Option<EntityId>,
    },
    PlayerVisibility {
        entity: EntityId,
        visible: bool,
    },
    ScoreUpdated {
        name: String,
        kills: u32,
    },
    ProjectileActivated {
        slot: ProjectileSlot,
        tick: Tick,
        position: Vec3,
        velocity: Vec3,
        suppress_ticks: u8,
    },
    ProjectileHidden {
        slot: ProjectileSlot,
    },
    MatchStarted,
    MatchEnded {
        winner: String,
        kills: u32,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Packet {
    // Client -> server
    Connect {
        client_version: u32,
        name: Option<String>,
        properties: Vec<(String, String)>,
    },
    Input {
        entity: EntityId,
        command: InputCommand,
    },
    Ack {
        reliable_seq: u32,
    },
    Restart,
    Disconnect,

    // Server -> client
    Connected {
        client_id: ClientId,
        entity: EntityId,
        session_name: String,
        tick_rate: u32,
    },
    Snapshot {
        tick: Tick,
        timestamp: u64,
        players: Vec<PlayerUpdate>,
        projectiles: Vec<ProjectileUpdate>,
    },
    Reliable {
        messages: Vec<Sequenced<Fact>>,
    },
    Disconnected {
        reason: String,
    },
}

pub fn encode(packet: &Packet) -> Result<Vec<u8>, bincode::Error> {
    bincode::serialize(packet)
}

pub fn decode(bytes: &[u8]) -> Result<Packet, bincode::Error> {
    bincode::deserialize(bytes)
}
