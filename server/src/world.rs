//! Collision queries for the authoritative projectile simulation.

use crate::player::{PlayerArena, PlayerHandle};
use glam::Vec3;
use shared::Tuning;

const EPSILON: f32 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HitTarget {
    Player(PlayerHandle),
    Terrain,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepHit {
    pub target: HitTarget,
    pub point: Vec3,
    /// Distance from the sweep start to `point`.
    pub distance: f32,
}

/// A swept-sphere query against everything collidable.
pub trait WorldQuery {
    fn sweep(&self, from: Vec3, to: Vec3, radius: f32) -> Option<SweepHit>;
}

#[derive(Debug, Clone, Copy)]
struct Capsule {
    handle: PlayerHandle,
    a: Vec3,
    b: Vec3,
}

/// Players as vertical capsules standing on a floor plane.
#[derive(Debug, Clone)]
pub struct ArenaWorld {
    capsules: Vec<Capsule>,
    capsule_radius: f32,
    capsule_height: f32,
    floor_height: f32,
}

impl ArenaWorld {
    pub fn new(tuning: &Tuning) -> Self {
        Self {
            capsules: Vec::new(),
            capsule_radius: tuning.player_radius,
            capsule_height: tuning.player_height,
            floor_height: tuning.floor_height,
        }
    }

    /// Snapshot of every alive, visible player at its current position.
    pub fn from_players(players: &PlayerArena, tuning: &Tuning) -> Self {
        let mut world = Self::new(tuning);
        for (handle, player) in players.iter() {
            if player.is_collidable() {
                world.add_player(handle, player.transform.position);
            }
        }
        world
    }

    pub fn add_player(&mut self, handle: PlayerHandle, feet: Vec3) {
        let r = self.capsule_radius;
        let top = (self.capsule_height - r).max(r);
        self.capsules.push(Capsule {
            handle,
            a: feet + Vec3::Y * r,
            b: feet + Vec3::Y * top,
        });
    }

    pub fn len(&self) -> usize {
        self.capsules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capsules.is_empty()
    }

    fn sweep_floor(&self, from: Vec3, to: Vec3, radius: f32) -> Option<f32> {
        let contact = self.floor_height + radius;
        if from.y <= contact {
            return Some(0.0);
        }
        if to.y > contact {
            return None;
        }
        Some((from.y - contact) / (from.y - to.y))
    }
}

impl WorldQuery for ArenaWorld {
    fn sweep(&self, from: Vec3, to: Vec3, radius: f32) -> Option<SweepHit> {
        let delta = to - from;
        let length = delta.length();
        let dir = if length > EPSILON { delta / length } else { Vec3::ZERO };

        let mut best: Option<(f32, HitTarget)> = None;
        let mut consider = |t: f32, target: HitTarget| {
            if t < 0.0 || t > length {
                return;
            }
            if best.map_or(true, |(bt, _)| t < bt) {
                best = Some((t, target));
            }
        };

        for capsule in &self.capsules {
            let r = self.capsule_radius + radius;
            if let Some(t) = sweep_capsule(from, dir, length, capsule.a, capsule.b, r) {
                consider(t, HitTarget::Player(capsule.handle));
            }
        }

        if let Some(fraction) = self.sweep_floor(from, to, radius) {
            consider(fraction * length, HitTarget::Terrain);
        }

        best.map(|(distance, target)| SweepHit {
            target,
            point: from + dir * distance,
            distance,
        })
    }
}

fn closest_on_segment(p: Vec3, a: Vec3, b: Vec3) -> Vec3 {
    let ab = b - a;
    let len_sq = ab.length_squared();
    if len_sq < EPSILON {
        return a;
    }
    let t = ((p - a).dot(ab) / len_sq).clamp(0.0, 1.0);
    a + ab * t
}

fn ray_sphere(origin: Vec3, dir: Vec3, center: Vec3, r: f32) -> Option<f32> {
    let oc = origin - center;
    let b = dir.dot(oc);
    let c = oc.length_squared() - r * r;
    let h = b * b - c;
    if h < 0.0 {
        return None;
    }
    let t = -b - h.sqrt();
    (t >= 0.0).then_some(t)
}

/// Distance along `dir` to the first contact with the capsule `a..b`, or zero
/// if `origin` already overlaps it.
fn sweep_capsule(origin: Vec3, dir: Vec3, length: f32, a: Vec3, b: Vec3, r: f32) -> Option<f32> {
    if origin.distance_squared(closest_on_segment(origin, a, b)) <= r * r {
        return Some(0.0);
    }
    if length <= EPSILON {
        return None;
    }

    let mut hit: Option<f32> = None;
    let mut keep = |t: f32| {
        if hit.map_or(true, |h| t < h) {
            hit = Some(t);
        }
    };

    // Cylinder body.
    let ba = b - a;
    let oa = origin - a;
    let baba = ba.dot(ba);
    let bard = ba.dot(dir);
    let baoa = ba.dot(oa);
    let rdoa = dir.dot(oa);
    let oaoa = oa.dot(oa);
    let qa = baba - bard * bard;
    if qa.abs() > EPSILON {
        let qb = baba * rdoa - baoa * bard;
        let qc = baba * oaoa - baoa * baoa - r * r * baba;
        let h = qb * qb - qa * qc;
        if h >= 0.0 {
            let t = (-qb - h.sqrt()) / qa;
            let y = baoa + t * bard;
            if t >= 0.0 && y > 0.0 && y < baba {
                keep(t);
            }
        }
    }

    // End caps.
    for center in [a, b] {
        if let Some(t) = ray_sphere(origin, dir, center, r) {
            keep(t);
        }
    }

    hit
}
