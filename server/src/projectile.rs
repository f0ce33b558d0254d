//! Fixed projectile pool owned by the authority.
//!
//! Slots move `Inactive -> Reserved -> Pending -> Active -> Inactive`.
//! A freshly launched projectile stays `Pending` for a few ticks so it is
//! never shown or tested for hits before observers have its fired position.
//! Releasing produces the hide fact before the slot is parked, so observers
//! never see a reset slot that is still considered live.

use crate::world::{HitTarget, WorldQuery};
use glam::Vec3;
use log::{debug, warn};
use shared::{ClientId, Fact, ProjectileSlot, Tick, Tuning, PARKED_POSITION};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectilePhase {
    Inactive,
    /// Handed out by `acquire`, not launched yet.
    Reserved,
    Pending {
        suppress_ticks: u8,
    },
    Active,
}

/// Slot index plus the generation it was acquired in, so a stale handle can
/// never release a slot that has since been reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProjectileHandle {
    pub slot: ProjectileSlot,
    generation: u32,
}

#[derive(Debug, Clone)]
pub struct Projectile {
    pub phase: ProjectilePhase,
    pub owner: Option<ClientId>,
    pub position: Vec3,
    pub velocity: Vec3,
    pub expires_at: Tick,
    pub fired_at: Tick,
    generation: u32,
}

impl Projectile {
    fn parked() -> Self {
        Self {
            phase: ProjectilePhase::Inactive,
            owner: None,
            position: PARKED_POSITION,
            velocity: Vec3::ZERO,
            expires_at: 0,
            fired_at: 0,
            generation: 0,
        }
    }

    fn park(&mut self) {
        self.phase = ProjectilePhase::Inactive;
        self.owner = None;
        self.position = PARKED_POSITION;
        self.velocity = Vec3::ZERO;
        self.expires_at = 0;
        self.fired_at = 0;
    }

    pub fn is_active(&self) -> bool {
        self.phase == ProjectilePhase::Active
    }

    pub fn is_inactive(&self) -> bool {
        self.phase == ProjectilePhase::Inactive
    }
}

/// Everything the pool needs to launch a reserved projectile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Shot {
    pub owner: ClientId,
    pub position: Vec3,
    pub velocity: Vec3,
    pub lifetime_ticks: u32,
    pub suppress_ticks: u8,
}

/// Outcome of one simulation tick for a projectile. The caller applies damage
/// and then releases the handle.
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectileEvent {
    Hit {
        handle: ProjectileHandle,
        owner: Option<ClientId>,
        target: HitTarget,
        point: Vec3,
    },
    Expired {
        handle: ProjectileHandle,
    },
}

#[derive(Debug)]
pub struct ProjectilePool {
    slots: Vec<Projectile>,
    growth: usize,
    growth_threshold: u32,
    consecutive_exhaustions: u32,
    grown: bool,
}

impl ProjectilePool {
    pub fn new(size: usize, growth: usize, growth_threshold: u32) -> Self {
        Self {
            slots: (0..size).map(|_| Projectile::parked()).collect(),
            growth,
            growth_threshold,
            consecutive_exhaustions: 0,
            grown: false,
        }
    }

    pub fn from_tuning(tuning: &Tuning) -> Self {
        Self::new(
            tuning.pool_size,
            tuning.pool_growth,
            tuning.pool_growth_threshold,
        )
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Every slot that is not `Inactive`.
    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|p| !p.is_inactive()).count()
    }

    pub fn inactive_count(&self) -> usize {
        self.slots.iter().filter(|p| p.is_inactive()).count()
    }

    pub fn has_grown(&self) -> bool {
        self.grown
    }

    pub fn get(&self, handle: ProjectileHandle) -> Option<&Projectile> {
        self.slots
            .get(handle.slot as usize)
            .filter(|p| p.generation == handle.generation)
    }

    pub fn slot(&self, slot: ProjectileSlot) -> Option<&Projectile> {
        self.slots.get(slot as usize)
    }

    /// Visible projectiles: `Active` only, never `Pending` or parked.
    pub fn iter_active(&self) -> impl Iterator<Item = (ProjectileSlot, &Projectile)> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_active())
            .map(|(i, p)| (i as ProjectileSlot, p))
    }

    /// Reserves an inactive slot. `None` means the pool is exhausted and the
    /// fire request should be dropped.
    pub fn acquire(&mut self) -> Option<ProjectileHandle> {
        if let Some(index) = self.slots.iter().position(Projectile::is_inactive) {
            self.consecutive_exhaustions = 0;
            return Some(self.reserve(index));
        }

        self.consecutive_exhaustions += 1;
        if !self.grown && self.growth > 0 && self.consecutive_exhaustions >= self.growth_threshold
        {
            let index = self.slots.len();
            let new_len = (index + self.growth).min(ProjectileSlot::MAX as usize + 1);
            if new_len > index {
                warn!(
                    "Projectile pool exhausted {} times in a row, growing {} -> {}",
                    self.consecutive_exhaustions, index, new_len
                );
                self.slots.resize_with(new_len, Projectile::parked);
                self.grown = true;
                self.consecutive_exhaustions = 0;
                return Some(self.reserve(index));
            }
        }

        debug!("Projectile pool exhausted, dropping fire request");
        None
    }

    fn reserve(&mut self, index: usize) -> ProjectileHandle {
        let projectile = &mut self.slots[index];
        projectile.generation = projectile.generation.wrapping_add(1);
        projectile.phase = ProjectilePhase::Reserved;
        ProjectileHandle {
            slot: index as ProjectileSlot,
            generation: projectile.generation,
        }
    }

    /// Places a reserved projectile at its fired position and starts the
    /// visibility suppression. Returns the activation fact for observers.
    pub fn launch(&mut self, handle: ProjectileHandle, shot: Shot, tick: Tick) -> Option<Fact> {
        let projectile = self.slots.get_mut(handle.slot as usize)?;
        if projectile.generation != handle.generation
            || projectile.phase != ProjectilePhase::Reserved
        {
            return None;
        }

        let suppress_ticks = shot.suppress_ticks.max(1);
        projectile.owner = Some(shot.owner);
        projectile.position = shot.position;
        projectile.velocity = shot.velocity;
        projectile.fired_at = tick;
        projectile.expires_at = tick.wrapping_add(shot.lifetime_ticks);
        projectile.phase = ProjectilePhase::Pending { suppress_ticks };

        Some(Fact::ProjectileActivated {
            slot: handle.slot,
            tick,
            position: shot.position,
            velocity: shot.velocity,
            suppress_ticks,
        })
    }

    /// Idempotent. Returns the hide fact if observers could have known about
    /// the projectile, then parks the slot.
    pub fn release(&mut self, handle: ProjectileHandle) -> Option<Fact> {
        let projectile = self.slots.get_mut(handle.slot as usize)?;
        if projectile.generation != handle.generation {
            return None;
        }
        let fact = match projectile.phase {
            ProjectilePhase::Inactive => return None,
            ProjectilePhase::Reserved => None,
            ProjectilePhase::Pending { .. } | ProjectilePhase::Active => {
                Some(Fact::ProjectileHidden { slot: handle.slot })
            }
        };
        projectile.park();
        fact
    }

    /// Advances every live projectile by one tick.
    ///
    /// Pending projectiles count down and turn Active without moving, so their
    /// first visible position is the fired one. Active projectiles move, sweep
    /// from their previous position, and report hits or expiry.
    pub fn step(
        &mut self,
        tick: Tick,
        dt: f32,
        radius: f32,
        world_bound: f32,
        world: &impl WorldQuery,
    ) -> Vec<ProjectileEvent> {
        let mut events = Vec::new();

        for (index, projectile) in self.slots.iter_mut().enumerate() {
            let handle = ProjectileHandle {
                slot: index as ProjectileSlot,
                generation: projectile.generation,
            };

            match projectile.phase {
                ProjectilePhase::Inactive | ProjectilePhase::Reserved => {}
                ProjectilePhase::Pending { suppress_ticks } => {
                    let remaining = suppress_ticks.saturating_sub(1);
                    projectile.phase = if remaining == 0 {
                        ProjectilePhase::Active
                    } else {
                        ProjectilePhase::Pending {
                            suppress_ticks: remaining,
                        }
                    };
                }
                ProjectilePhase::Active => {
                    let from = projectile.position;
                    let to = from + projectile.velocity * dt;

                    if let Some(hit) = world.sweep(from, to, radius) {
                        projectile.position = hit.point;
                        events.push(ProjectileEvent::Hit {
                            handle,
                            owner: projectile.owner,
                            target: hit.target,
                            point: hit.point,
                        });
                        continue;
                    }

                    projectile.position = to;
                    if tick >= projectile.expires_at || to.length() > world_bound {
                        events.push(ProjectileEvent::Expired { handle });
                    }
                }
            }
        }

        events
    }

    /// Releases every slot. Used when the session shuts down.
    pub fn teardown(&mut self) -> Vec<Fact> {
        let handles: Vec<ProjectileHandle> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.is_inactive())
            .map(|(i, p)| ProjectileHandle {
                slot: i as ProjectileSlot,
                generation: p.generation,
            })
            .collect();

        handles
            .into_iter()
            .filter_map(|handle| self.release(handle))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::SweepHit;
    use proptest::prelude::*;

    struct EmptyWorld;

    impl WorldQuery for EmptyWorld {
        fn sweep(&self, _from: Vec3, _to: Vec3, _radius: f32) -> Option<SweepHit> {
            None
        }
    }

    /// Terrain wall at z = 10.
    struct Wall;

    impl WorldQuery for Wall {
        fn sweep(&self, from: Vec3, to: Vec3, _radius: f32) -> Option<SweepHit> {
            if to.z < 10.0 {
                return None;
            }
            let point = Vec3::new(to.x, to.y, 10.0);
            Some(SweepHit {
                target: HitTarget::Terrain,
                point,
                distance: from.distance(point),
            })
        }
    }

    fn shot(position: Vec3, velocity: Vec3, lifetime_ticks: u32, suppress_ticks: u8) -> Shot {
        Shot {
            owner: 1,
            position,
            velocity,
            lifetime_ticks,
            suppress_ticks,
        }
    }

    fn launch(pool: &mut ProjectilePool, position: Vec3, velocity: Vec3) -> ProjectileHandle {
        let handle = pool.acquire().unwrap();
        pool.launch(handle, shot(position, velocity, 240, 1), 0).unwrap();
        handle
    }

    #[test]
    fn test_acquire_until_exhausted() {
        let mut pool = ProjectilePool::new(3, 0, 1);
        let handles: Vec<_> = (0..3).map(|_| pool.acquire().unwrap()).collect();
        assert_eq!(handles.len(), 3);
        assert!(pool.acquire().is_none());
        assert_eq!(pool.active_count(), 3);
    }

    #[test]
    fn test_acquire_never_hands_out_same_slot_twice() {
        let mut pool = ProjectilePool::new(2, 0, 1);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_ne!(a.slot, b.slot);
    }

    #[test]
    fn test_launch_emits_activation_and_stays_pending() {
        let mut pool = ProjectilePool::new(1, 0, 1);
        let handle = pool.acquire().unwrap();
        let fact = pool
            .launch(handle, shot(Vec3::ONE, Vec3::Z, 60, 2), 10)
            .unwrap();
        assert_eq!(
            fact,
            Fact::ProjectileActivated {
                slot: 0,
                tick: 10,
                position: Vec3::ONE,
                velocity: Vec3::Z,
                suppress_ticks: 2,
            }
        );
        assert_eq!(
            pool.get(handle).unwrap().phase,
            ProjectilePhase::Pending { suppress_ticks: 2 }
        );
        assert_eq!(pool.iter_active().count(), 0);
        assert!(pool
            .launch(handle, shot(Vec3::ONE, Vec3::Z, 60, 2), 10)
            .is_none());
    }

    #[test]
    fn test_zero_suppress_is_raised_to_one() {
        let mut pool = ProjectilePool::new(1, 0, 1);
        let handle = pool.acquire().unwrap();
        let fact = pool.launch(handle, shot(Vec3::ZERO, Vec3::Z, 60, 0), 0);
        assert!(matches!(
            fact,
            Some(Fact::ProjectileActivated {
                suppress_ticks: 1,
                ..
            })
        ));
    }

    #[test]
    fn test_first_visible_position_is_fired_position() {
        let mut pool = ProjectilePool::new(1, 0, 1);
        let fired = Vec3::new(1.0, 1.6, 2.0);
        launch(&mut pool, fired, Vec3::new(0.0, 0.0, 40.0));

        let events = pool.step(1, 1.0 / 60.0, 0.1, 2000.0, &EmptyWorld);
        assert!(events.is_empty());
        let (_, visible) = pool.iter_active().next().unwrap();
        assert_eq!(visible.position, fired);

        pool.step(2, 1.0 / 60.0, 0.1, 2000.0, &EmptyWorld);
        let (_, moved) = pool.iter_active().next().unwrap();
        assert!(moved.position.z > fired.z);
    }

    #[test]
    fn test_release_is_idempotent_and_parks() {
        let mut pool = ProjectilePool::new(1, 0, 1);
        let handle = launch(&mut pool, Vec3::ONE, Vec3::Z);
        assert_eq!(
            pool.release(handle),
            Some(Fact::ProjectileHidden { slot: 0 })
        );
        assert_eq!(pool.release(handle), None);
        let parked = pool.slot(0).unwrap();
        assert!(parked.is_inactive());
        assert_eq!(parked.position, PARKED_POSITION);
    }

    #[test]
    fn test_stale_handle_cannot_release_reused_slot() {
        let mut pool = ProjectilePool::new(1, 0, 1);
        let old = launch(&mut pool, Vec3::ONE, Vec3::Z);
        pool.release(old);
        let new = launch(&mut pool, Vec3::ONE, Vec3::Z);
        assert_eq!(old.slot, new.slot);
        assert_eq!(pool.release(old), None);
        assert!(!pool.slot(0).unwrap().is_inactive());
    }

    #[test]
    fn test_reserved_release_has_no_fact() {
        let mut pool = ProjectilePool::new(1, 0, 1);
        let handle = pool.acquire().unwrap();
        assert_eq!(pool.release(handle), None);
        assert_eq!(pool.inactive_count(), 1);
    }

    #[test]
    fn test_expiry_by_lifetime() {
        let mut pool = ProjectilePool::new(1, 0, 1);
        let handle = pool.acquire().unwrap();
        pool.launch(handle, shot(Vec3::ZERO, Vec3::X, 3, 1), 0);
        let mut expired_at = None;
        for tick in 1..10 {
            let events = pool.step(tick, 1.0 / 60.0, 0.1, 2000.0, &EmptyWorld);
            if events.contains(&ProjectileEvent::Expired { handle }) {
                expired_at = Some(tick);
                pool.release(handle);
                break;
            }
        }
        assert_eq!(expired_at, Some(3));
    }

    #[test]
    fn test_expiry_by_world_bound() {
        let mut pool = ProjectilePool::new(1, 0, 1);
        let handle = launch(&mut pool, Vec3::new(0.0, 0.0, 99.0), Vec3::new(0.0, 0.0, 120.0));
        pool.step(1, 1.0, 0.1, 100.0, &EmptyWorld);
        let events = pool.step(2, 1.0, 0.1, 100.0, &EmptyWorld);
        assert_eq!(events, vec![ProjectileEvent::Expired { handle }]);
    }

    #[test]
    fn test_terrain_hit_reported() {
        let mut pool = ProjectilePool::new(1, 0, 1);
        let handle = launch(&mut pool, Vec3::new(0.0, 1.0, 9.5), Vec3::new(0.0, 0.0, 60.0));
        pool.step(1, 1.0 / 60.0, 0.1, 2000.0, &Wall);
        let events = pool.step(2, 1.0 / 60.0, 0.1, 2000.0, &Wall);
        assert_eq!(
            events,
            vec![ProjectileEvent::Hit {
                handle,
                owner: Some(1),
                target: HitTarget::Terrain,
                point: Vec3::new(0.0, 1.0, 10.0),
            }]
        );
    }

    #[test]
    fn test_bounded_growth_happens_once() {
        let mut pool = ProjectilePool::new(2, 3, 2);
        pool.acquire().unwrap();
        pool.acquire().unwrap();
        assert!(pool.acquire().is_none());
        assert!(pool.acquire().is_some());
        assert!(pool.has_grown());
        assert_eq!(pool.capacity(), 5);

        pool.acquire().unwrap();
        pool.acquire().unwrap();
        for _ in 0..10 {
            assert!(pool.acquire().is_none());
        }
        assert_eq!(pool.capacity(), 5);
    }

    #[test]
    fn test_teardown_hides_everything() {
        let mut pool = ProjectilePool::new(4, 0, 1);
        launch(&mut pool, Vec3::ONE, Vec3::Z);
        launch(&mut pool, Vec3::ONE, Vec3::Z);
        pool.acquire().unwrap();
        let facts = pool.teardown();
        assert_eq!(facts.len(), 2);
        assert_eq!(pool.inactive_count(), 4);
        assert!(pool
            .slot(0)
            .map(|p| p.position == PARKED_POSITION)
            .unwrap_or(false));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Acquire,
        Launch(usize),
        Release(usize),
        Step,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::Acquire),
            (0usize..16).prop_map(Op::Launch),
            (0usize..16).prop_map(Op::Release),
            Just(Op::Step),
        ]
    }

    proptest! {
        #[test]
        fn prop_pool_conservation(ops in proptest::collection::vec(op_strategy(), 1..200)) {
            let mut pool = ProjectilePool::new(8, 0, 1);
            let mut handles: Vec<ProjectileHandle> = Vec::new();
            let mut tick = 0;

            for op in ops {
                match op {
                    Op::Acquire => {
                        if let Some(handle) = pool.acquire() {
                            prop_assert!(
                                !handles.iter().any(|h| h.slot == handle.slot
                                    && pool.get(*h).is_some()),
                                "slot handed out twice"
                            );
                            handles.push(handle);
                        }
                    }
                    Op::Launch(i) => {
                        if let Some(handle) = handles.get(i).copied() {
                            pool.launch(handle, shot(Vec3::ZERO, Vec3::Z, 5, 1), tick);
                        }
                    }
                    Op::Release(i) => {
                        if let Some(handle) = handles.get(i).copied() {
                            pool.release(handle);
                            pool.release(handle);
                        }
                    }
                    Op::Step => {
                        tick += 1;
                        for event in pool.step(tick, 1.0 / 60.0, 0.1, 2000.0, &EmptyWorld) {
                            if let ProjectileEvent::Expired { handle } = event {
                                pool.release(handle);
                            }
                        }
                    }
                }
                prop_assert_eq!(pool.active_count() + pool.inactive_count(), pool.capacity());
                prop_assert_eq!(pool.capacity(), 8);
                for (_, p) in pool.iter_active() {
                    prop_assert!(p.position != PARKED_POSITION);
                }
            }
        }
    }
}
