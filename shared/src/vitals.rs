use serde::{Deserialize, Serialize};

/// Health, score and the combat gate of one player.
///
/// Invariants kept by every method here:
/// - `0 <= health <= max_health`
/// - `is_dead` implies `health == 0` and `!combat_enabled`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vitals {
    pub health: i32,
    pub max_health: i32,
    pub is_dead: bool,
    pub kills: u32,
    pub deaths: u32,
    pub combat_enabled: bool,
}

impl Vitals {
    pub fn new(max_health: i32) -> Self {
        Self {
            health: max_health,
            max_health,
            is_dead: false,
            kills: 0,
            deaths: 0,
            combat_enabled: false,
        }
    }

    /// Subtracts health. Returns true if this hit killed the player.
    pub fn take_damage(&mut self, amount: i32) -> bool {
        if self.is_dead || !self.combat_enabled {
            return false;
        }
        self.health = (self.health - amount.max(0)).clamp(0, self.max_health);
        if self.health == 0 {
            self.is_dead = true;
            self.combat_enabled = false;
            self.deaths += 1;
            return true;
        }
        false
    }

    pub fn respawn(&mut self, combat_enabled: bool) {
        self.health = self.max_health;
        self.is_dead = false;
        self.combat_enabled = combat_enabled;
    }

    /// Fresh start for a new match. Combat is switched on separately.
    pub fn reset_for_match(&mut self) {
        self.health = self.max_health;
        self.is_dead = false;
        self.kills = 0;
        self.deaths = 0;
    }

    pub fn set_combat(&mut self, enabled: bool) {
        self.combat_enabled = enabled && !self.is_dead;
    }

    pub fn holds_invariants(&self) -> bool {
        let in_range = (0..=self.max_health).contains(&self.health);
        let dead_ok = !self.is_dead || (self.health == 0 && !self.combat_enabled);
        in_range && dead_ok
    }
}
