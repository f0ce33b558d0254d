//! Gameplay and replication constants.

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Every tunable number in the game. Both sides must run with the same
/// values for prediction to line up with the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tuning {
    pub tick_rate: u32,

    // Movement
    pub move_speed: f32,
    /// Degrees per second per unit of horizontal look input.
    pub rotation_speed: f32,
    /// Degrees per second per unit of vertical look input.
    pub vertical_look_speed: f32,
    pub pitch_limit: f32,
    pub arena_radius: f32,
    pub floor_height: f32,
    pub ceiling_height: f32,
    pub arena_center: Vec3,
    pub spawn_points: Vec<Vec3>,

    // Body
    pub player_height: f32,
    pub player_radius: f32,
    pub eye_height: f32,
    pub muzzle_offset: f32,

    // Combat
    pub max_health: i32,
    pub fire_interval: f32,
    pub respawn_delay: f32,
    pub kills_to_win: u32,
    pub min_players: usize,

    // Projectiles
    pub projectile_speed: f32,
    pub projectile_damage: i32,
    pub projectile_lifetime: f32,
    pub projectile_radius: f32,
    pub world_bound: f32,
    pub pool_size: usize,
    /// Extra slots added once after sustained exhaustion. Zero disables growth.
    pub pool_growth: usize,
    pub pool_growth_threshold: u32,
    pub suppress_ticks: u8,

    // Replication
    pub position_sync_threshold: f32,
    /// Degrees.
    pub rotation_sync_threshold: f32,
    pub max_sync_interval: f32,
    pub remote_catch_up_rate: f32,
    pub projectile_catch_up_rate: f32,
    pub projectile_snap_distance: f32,
    pub reconcile_threshold: f32,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            tick_rate: 60,

            move_speed: 5.0,
            rotation_speed: 150.0,
            vertical_look_speed: 100.0,
            pitch_limit: 80.0,
            arena_radius: 40.0,
            floor_height: 0.0,
            ceiling_height: 20.0,
            arena_center: Vec3::ZERO,
            spawn_points: default_spawn_points(),

            player_height: 1.8,
            player_radius: 0.35,
            eye_height: 1.6,
            muzzle_offset: 0.6,

            max_health: 100,
            fire_interval: 0.15,
            respawn_delay: 3.0,
            kills_to_win: 10,
            min_players: 2,

            projectile_speed: 40.0,
            projectile_damage: 20,
            projectile_lifetime: 4.0,
            projectile_radius: 0.1,
            world_bound: 2000.0,
            pool_size: 30,
            pool_growth: 10,
            pool_growth_threshold: 30,
            suppress_ticks: 1,

            position_sync_threshold: 0.1,
            rotation_sync_threshold: 5.0,
            max_sync_interval: 0.25,
            remote_catch_up_rate: 20.0,
            projectile_catch_up_rate: 25.0,
            projectile_snap_distance: 10.0,
            reconcile_threshold: 0.05,
        }
    }
}

impl Tuning {
    /// Fixed simulation step in seconds.
    pub fn tick_dt(&self) -> f32 {
        1.0 / self.tick_rate.max(1) as f32
    }

    /// Converts a duration in seconds to a whole number of ticks, at least one.
    pub fn ticks_for(&self, seconds: f32) -> u32 {
        // Small bias so values like 0.15 * 60 do not round up past 9.
        let ticks = (seconds * self.tick_rate as f32 - 1e-3).ceil();
        (ticks.max(0.0) as u32).max(1)
    }
}

fn default_spawn_points() -> Vec<Vec3> {
    (0..8)
        .map(|i| {
            let angle = i as f32 * std::f32::consts::TAU / 8.0;
            Vec3::new(angle.cos() * 15.0, 0.0, angle.sin() * 15.0)
        })
        .collect()
}
