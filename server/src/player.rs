//! Authoritative player records and the fixed-capacity table that owns them.

use shared::{
    ClientId, EntityId, ProcessId, Replicated, Tick, TransformState, Tuning, Vitals,
};
use std::collections::HashMap;

/// Index of a player slot in a [`PlayerArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlayerHandle(pub(crate) usize);

impl PlayerHandle {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Decides when a player's transform is worth sending.
///
/// A transform goes out when it moved or turned past the thresholds since the
/// last send, or when the max sync interval ran out.
#[derive(Debug, Clone, Default)]
pub struct SyncThrottle {
    last_sent: Option<TransformState>,
    last_sent_tick: Tick,
}

impl SyncThrottle {
    pub fn should_send(&self, current: &TransformState, tick: Tick, tuning: &Tuning) -> bool {
        let Some(last) = self.last_sent else {
            return true;
        };
        if current.distance_to(&last) >= tuning.position_sync_threshold {
            return true;
        }
        if current.angle_to(&last) >= tuning.rotation_sync_threshold
            || (current.pitch - last.pitch).abs() >= tuning.rotation_sync_threshold
        {
            return true;
        }
        tick.wrapping_sub(self.last_sent_tick) >= tuning.ticks_for(tuning.max_sync_interval)
    }

    pub fn mark_sent(&mut self, transform: TransformState, tick: Tick) {
        self.last_sent = Some(transform);
        self.last_sent_tick = tick;
    }

    /// Makes the next check send unconditionally (teleports, respawns).
    pub fn force(&mut self) {
        self.last_sent = None;
    }
}

#[derive(Debug, Clone)]
pub struct Player {
    pub entity: EntityId,
    /// Input-authority: the only client allowed to drive this player.
    pub owner: ClientId,
    pub name: String,
    pub vitals: Replicated<Vitals>,
    pub transform: Replicated<TransformState>,
    pub respawn_at: Option<Tick>,
    pub next_fire_at: Tick,
    pub visible: bool,
    pub last_processed_input: u32,
    pub throttle: SyncThrottle,
}

impl Player {
    pub fn new(
        entity: EntityId,
        owner: ClientId,
        name: String,
        transform: TransformState,
        tuning: &Tuning,
    ) -> Self {
        Self {
            entity,
            owner,
            name,
            vitals: Replicated::new(ProcessId::Server, Vitals::new(tuning.max_health)),
            transform: Replicated::new(ProcessId::Server, transform),
            respawn_at: None,
            next_fire_at: 0,
            visible: true,
            last_processed_input: 0,
            throttle: SyncThrottle::default(),
        }
    }

    pub fn is_dead(&self) -> bool {
        self.vitals.is_dead
    }

    /// Alive and shown: the only state in which a player can be hit.
    pub fn is_collidable(&self) -> bool {
        self.visible && !self.vitals.is_dead
    }

    pub fn can_fire(&self, tick: Tick) -> bool {
        self.vitals.combat_enabled && !self.vitals.is_dead && tick >= self.next_fire_at
    }

    pub fn respawn_ticks_left(&self, tick: Tick) -> u32 {
        self.respawn_at
            .map(|at| at.saturating_sub(tick))
            .unwrap_or(0)
    }
}

/// Fixed-capacity player table with ownership and entity indexes kept in
/// step on every insert and remove.
#[derive(Debug)]
pub struct PlayerArena {
    slots: Vec<Option<Player>>,
    by_owner: HashMap<ClientId, PlayerHandle>,
    by_entity: HashMap<EntityId, PlayerHandle>,
}

impl PlayerArena {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            by_owner: HashMap::new(),
            by_entity: HashMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.by_entity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_entity.is_empty()
    }

    /// Returns `None` when the table is full or the owner already has a player.
    pub fn insert(&mut self, player: Player) -> Option<PlayerHandle> {
        if self.by_owner.contains_key(&player.owner) {
            return None;
        }
        let index = self.slots.iter().position(Option::is_none)?;
        let handle = PlayerHandle(index);
        self.by_owner.insert(player.owner, handle);
        self.by_entity.insert(player.entity, handle);
        self.slots[index] = Some(player);
        Some(handle)
    }

    pub fn remove(&mut self, handle: PlayerHandle) -> Option<Player> {
        let player = self.slots.get_mut(handle.0)?.take()?;
        self.by_owner.remove(&player.owner);
        self.by_entity.remove(&player.entity);
        Some(player)
    }

    pub fn get(&self, handle: PlayerHandle) -> Option<&Player> {
        self.slots.get(handle.0)?.as_ref()
    }

    pub fn get_mut(&mut self, handle: PlayerHandle) -> Option<&mut Player> {
        self.slots.get_mut(handle.0)?.as_mut()
    }

    pub fn handle_for_owner(&self, owner: ClientId) -> Option<PlayerHandle> {
        self.by_owner.get(&owner).copied()
    }

    pub fn handle_for_entity(&self, entity: EntityId) -> Option<PlayerHandle> {
        self.by_entity.get(&entity).copied()
    }

    pub fn name_taken(&self, name: &str) -> bool {
        self.iter().any(|(_, player)| player.name == name)
    }

    pub fn handles(&self) -> Vec<PlayerHandle> {
        self.iter().map(|(handle, _)| handle).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PlayerHandle, &Player)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|p| (PlayerHandle(i), p)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (PlayerHandle, &mut Player)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_mut().map(|p| (PlayerHandle(i), p)))
    }
}
