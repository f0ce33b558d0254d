//! Types and rules shared by the authoritative server and every client.
//!
//! Anything both sides must agree on lives here: the wire protocol, the
//! movement integration used for prediction, the replicated-field access
//! layer, the reliable fact channel and the match state machine.

pub mod authority;
pub mod bus;
pub mod match_state;
pub mod movement;
pub mod protocol;
pub mod reliable;
pub mod sequence;
pub mod tuning;
pub mod vitals;

pub use authority::{check_input_authority, NotAuthorized, ProcessId, Replicated};
pub use bus::{presentation_events, Bus, BusEvent, ConnectionIntent, Subscription};
pub use match_state::{MatchCoordinator, MatchEnd, MatchPhase};
pub use movement::{apply_movement, TransformState};
pub use protocol::{
    decode, encode, Fact, InputCommand, InputSnapshot, Packet, PlayerUpdate, ProjectileUpdate,
    MAX_LOOK_DELTA,
};
pub use reliable::{ReliableReceiver, ReliableSender, Sequenced};
pub use sequence::{seq_newer, SequenceFilter};
pub use tuning::Tuning;
pub use vitals::Vitals;

use glam::Vec3;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Identifier the server hands out to each connection.
pub type ClientId = u32;
/// Network identity of a replicated entity. Never reused within a session.
pub type EntityId = u32;
/// Authoritative simulation tick counter.
pub type Tick = u32;
/// Index of a projectile slot in the server's pool.
pub type ProjectileSlot = u16;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_NAME_LEN: usize = 16;
pub const MAX_PACKET_SIZE: usize = 8192;

/// Where inactive projectiles are parked, far outside any play area.
pub const PARKED_POSITION: Vec3 = Vec3::splat(9999.0);

/// Milliseconds since the unix epoch.
pub fn get_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

/// Truncates a display name to [`MAX_NAME_LEN`] characters.
pub fn clamp_name(name: &str) -> String {
    name.trim().chars().take(MAX_NAME_LEN).collect()
}
