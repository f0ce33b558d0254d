//! Authoritative game state.
//!
//! One `GameState` per server process. Every write to a replicated field goes
//! through [`shared::Replicated::write`] with the process this state acts as, so a
//! misconfigured non-authority instance fails loudly instead of diverging.
//! Facts produced during a tick are queued and drained by the network layer,
//! which sends them on the reliable channel in the order they were produced.

use crate::player::{Player, PlayerArena, PlayerHandle};
use crate::projectile::{ProjectileEvent, ProjectileHandle, ProjectilePool, Shot};
use crate::world::{ArenaWorld, HitTarget};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{
    apply_movement, check_input_authority, clamp_name, get_timestamp, ClientId, EntityId, Fact,
    InputCommand, MatchCoordinator, MatchEnd, MatchPhase, NotAuthorized, Packet, PlayerUpdate,
    ProcessId, ProjectileUpdate, Tick, TransformState, Tuning, MAX_NAME_LEN,
};

/// What a call to [`GameState::apply_damage`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DamageOutcome {
    /// Victim missing, already dead or combat disabled.
    Ignored,
    Damaged { health: i32 },
    Killed,
}

pub struct GameState {
    tuning: Tuning,
    process: ProcessId,
    tick: Tick,
    players: PlayerArena,
    projectiles: ProjectilePool,
    coordinator: MatchCoordinator,
    facts: Vec<Fact>,
    rng: StdRng,
    next_entity: EntityId,
}

impl GameState {
    pub fn new(tuning: Tuning, max_players: usize) -> Self {
        Self::with_rng(tuning, max_players, StdRng::from_entropy())
    }

    /// Deterministic spawn points and generated names.
    pub fn seeded(tuning: Tuning, max_players: usize, seed: u64) -> Self {
        Self::with_rng(tuning, max_players, StdRng::seed_from_u64(seed))
    }

    fn with_rng(tuning: Tuning, max_players: usize, rng: StdRng) -> Self {
        let coordinator = MatchCoordinator::new(true, tuning.kills_to_win, tuning.min_players);
        Self {
            projectiles: ProjectilePool::from_tuning(&tuning),
            players: PlayerArena::with_capacity(max_players),
            coordinator,
            tuning,
            process: ProcessId::Server,
            tick: 0,
            facts: Vec::new(),
            rng,
            next_entity: 1,
        }
    }

    /// Acts as another process. Only useful to prove that a non-authority
    /// cannot write.
    pub fn acting_as(mut self, process: ProcessId) -> Self {
        self.process = process;
        self
    }

    pub fn tick(&self) -> Tick {
        self.tick
    }

    pub fn tuning(&self) -> &Tuning {
        &self.tuning
    }

    pub fn players(&self) -> &PlayerArena {
        &self.players
    }

    pub fn player(&self, handle: PlayerHandle) -> Option<&Player> {
        self.players.get(handle)
    }

    pub fn player_for_owner(&self, owner: ClientId) -> Option<&Player> {
        self.players
            .handle_for_owner(owner)
            .and_then(|h| self.players.get(h))
    }

    pub fn projectiles(&self) -> &ProjectilePool {
        &self.projectiles
    }

    pub fn coordinator(&self) -> &MatchCoordinator {
        &self.coordinator
    }

    pub fn phase(&self) -> MatchPhase {
        self.coordinator.phase()
    }

    /// Facts produced since the last drain, oldest first.
    pub fn drain_facts(&mut self) -> Vec<Fact> {
        std::mem::take(&mut self.facts)
    }

    pub fn pending_facts(&self) -> &[Fact] {
        &self.facts
    }

    /// Facts a client joining now needs to build its view of the session.
    pub fn catch_up_facts(&self) -> Vec<Fact> {
        let mut facts = Vec::new();
        for (_, player) in self.players.iter() {
            facts.push(Fact::PlayerSpawned {
                entity: player.entity,
                owner: player.owner,
                name: player.name.clone(),
            });
            facts.push(Fact::ScoreUpdated {
                name: player.name.clone(),
                kills: player.vitals.kills,
            });
            if !player.visible {
                facts.push(Fact::PlayerVisibility {
                    entity: player.entity,
                    visible: false,
                });
            }
        }
        match self.coordinator.phase() {
            MatchPhase::Running => facts.push(Fact::MatchStarted),
            MatchPhase::Ending => {
                if let Some(result) = self.coordinator.last_result() {
                    facts.push(result.to_fact());
                }
            }
            MatchPhase::Menu | MatchPhase::Connecting => {}
        }
        facts
    }

    /// Spawns the player for a newly connected client. Starts the match if
    /// this join reaches the minimum player count.
    pub fn add_player(
        &mut self,
        owner: ClientId,
        requested_name: Option<&str>,
    ) -> Option<(PlayerHandle, EntityId)> {
        if self.players.handle_for_owner(owner).is_some() {
            warn!("Client {} already owns a player", owner);
            return None;
        }

        let entity = self.next_entity;
        let name = self.unique_name(requested_name, entity);
        let transform = self.spawn_transform();
        let mut player = Player::new(entity, owner, name.clone(), transform, &self.tuning);
        player
            .vitals
            .write(self.process)
            .ok()?
            .set_combat(self.coordinator.is_running());

        let handle = self.players.insert(player)?;
        self.next_entity += 1;
        if self.coordinator.phase() == MatchPhase::Menu {
            self.coordinator.session_opened();
        }

        info!(
            "Spawned player '{}' (entity {}) for client {} at {:?}",
            name, entity, owner, transform.position
        );
        self.facts.push(Fact::PlayerSpawned {
            entity,
            owner,
            name: name.clone(),
        });
        self.publish_score(&name, 0);

        self.start_match();
        Some((handle, entity))
    }

    /// Despawns the client's player and ends a running match if too few
    /// players remain. Projectiles it fired keep flying.
    pub fn remove_player(&mut self, owner: ClientId) -> bool {
        let Some(handle) = self.players.handle_for_owner(owner) else {
            return false;
        };
        let Some(player) = self.players.remove(handle) else {
            return false;
        };

        info!("Removed player '{}' (client {})", player.name, owner);
        self.facts.push(Fact::PlayerDespawned {
            entity: player.entity,
        });
        self.coordinator.forget_player(&player.name);

        if let Some(end) = self.coordinator.on_player_count(self.players.len()) {
            self.finish_match(end);
        }
        if self.players.is_empty() && self.coordinator.return_to_menu() {
            info!("Last player left, waiting for a new session");
        }
        true
    }

    /// Applies one input command from `submitter` to the player `entity`.
    ///
    /// Returns `Ok(false)` for stale or unknown input. Input is acknowledged
    /// but ignored while the player is dead.
    pub fn apply_input(
        &mut self,
        entity: EntityId,
        submitter: ClientId,
        command: &InputCommand,
    ) -> Result<bool, NotAuthorized> {
        let Some(handle) = self.players.handle_for_entity(entity) else {
            return Ok(false);
        };
        let process = self.process;
        let dt = self.tuning.tick_dt();

        let wants_fire = {
            let Some(player) = self.players.get_mut(handle) else {
                return Ok(false);
            };
            check_input_authority(Some(player.owner), submitter)?;
            if command.sequence <= player.last_processed_input {
                return Ok(false);
            }
            player.last_processed_input = command.sequence;

            if player.is_dead() {
                return Ok(true);
            }

            let input = command.snapshot.sanitize();
            apply_movement(player.transform.write(process)?, &input, dt, &self.tuning);
            input.fire
        };

        if wants_fire {
            self.fire_projectile(handle);
        }
        Ok(true)
    }

    /// Fires from the player's muzzle if the combat gate and cooldown allow.
    pub fn fire_projectile(&mut self, handle: PlayerHandle) -> Option<ProjectileHandle> {
        let tick = self.tick;
        let (owner, transform) = {
            let player = self.players.get(handle)?;
            if !player.can_fire(tick) {
                return None;
            }
            (player.owner, *player.transform)
        };

        let projectile = self.projectiles.acquire()?;
        let shot = Shot {
            owner,
            position: transform.muzzle(&self.tuning),
            velocity: transform.aim_direction() * self.tuning.projectile_speed,
            lifetime_ticks: self.tuning.ticks_for(self.tuning.projectile_lifetime),
            suppress_ticks: self.tuning.suppress_ticks,
        };
        let fact = self.projectiles.launch(projectile, shot, tick)?;
        self.facts.push(fact);

        if let Some(player) = self.players.get_mut(handle) {
            player.next_fire_at = tick + self.tuning.ticks_for(self.tuning.fire_interval);
        }
        debug!("Client {} fired projectile {}", owner, projectile.slot);
        Some(projectile)
    }

    /// The only code path that changes health, kills and deaths.
    ///
    /// No-op while the victim is dead or combat is disabled. On a kill, the
    /// attacker is found through the ownership index and credited exactly
    /// once, unless it has left or is the victim itself.
    pub fn apply_damage(
        &mut self,
        victim: PlayerHandle,
        amount: i32,
        attacker: ClientId,
    ) -> Result<DamageOutcome, NotAuthorized> {
        let process = self.process;
        let tick = self.tick;
        let respawn_ticks = self.tuning.ticks_for(self.tuning.respawn_delay);

        let (victim_entity, health, died) = {
            let Some(player) = self.players.get_mut(victim) else {
                return Ok(DamageOutcome::Ignored);
            };
            if player.vitals.is_dead || !player.vitals.combat_enabled {
                return Ok(DamageOutcome::Ignored);
            }
            let vitals = player.vitals.write(process)?;
            let died = vitals.take_damage(amount);
            let health = vitals.health;
            if died {
                player.respawn_at = Some(tick + respawn_ticks);
                player.visible = false;
            }
            (player.entity, health, died)
        };

        self.facts.push(Fact::HealthChanged {
            entity: victim_entity,
            health,
        });
        if !died {
            return Ok(DamageOutcome::Damaged { health });
        }

        let attacker_handle = self
            .players
            .handle_for_owner(attacker)
            .filter(|&handle| handle != victim);
        let mut credited = None;
        if let Some(handle) = attacker_handle {
            if let Some(killer) = self.players.get_mut(handle) {
                let vitals = killer.vitals.write(process)?;
                vitals.kills += 1;
                credited = Some((killer.entity, killer.name.clone(), vitals.kills));
            }
        }

        let mut match_end = None;
        if let Some((_, name, kills)) = &credited {
            info!("Player '{}' scored, now at {} kills", name, kills);
            match_end = self.publish_score(name, *kills);
        }
        self.facts.push(Fact::PlayerVisibility {
            entity: victim_entity,
            visible: false,
        });
        self.facts.push(Fact::PlayerDied {
            entity: victim_entity,
            attacker: credited.as_ref().map(|(entity, _, _)| *entity),
        });
        if let Some(end) = match_end {
            self.finish_match(end);
        }

        Ok(DamageOutcome::Killed)
    }

    /// Brings a dead player back at a random spawn point.
    pub fn respawn(&mut self, handle: PlayerHandle) -> Result<bool, NotAuthorized> {
        let process = self.process;
        let combat = self.coordinator.is_running();
        let transform = self.spawn_transform();

        let Some(player) = self.players.get_mut(handle) else {
            return Ok(false);
        };
        if !player.vitals.is_dead {
            return Ok(false);
        }

        let vitals = player.vitals.write(process)?;
        vitals.respawn(combat);
        let health = vitals.health;
        *player.transform.write(process)? = transform;
        player.respawn_at = None;
        player.visible = true;
        player.throttle.force();

        debug!("Respawned '{}' at {:?}", player.name, transform.position);
        let entity = player.entity;
        self.facts.push(Fact::HealthChanged { entity, health });
        self.facts.push(Fact::PlayerVisibility {
            entity,
            visible: true,
        });
        Ok(true)
    }

    /// Moves a player instantly. Authority-only, like every other write.
    pub fn teleport(
        &mut self,
        handle: PlayerHandle,
        transform: TransformState,
    ) -> Result<(), NotAuthorized> {
        let process = self.process;
        if let Some(player) = self.players.get_mut(handle) {
            *player.transform.write(process)? = transform;
            player.throttle.force();
        }
        Ok(())
    }

    /// Advances the simulation by one tick: respawns that are due, then
    /// projectile flight and hits. Inputs for the new tick are applied after
    /// this by the caller, so shots fired this tick start pending.
    pub fn step(&mut self) {
        self.tick = self.tick.wrapping_add(1);
        self.process_respawns();
        self.simulate_projectiles();
    }

    fn process_respawns(&mut self) {
        let tick = self.tick;
        let due: Vec<PlayerHandle> = self
            .players
            .iter()
            .filter(|(_, p)| p.respawn_at.map_or(false, |at| tick >= at))
            .map(|(handle, _)| handle)
            .collect();

        for handle in due {
            if let Err(e) = self.respawn(handle) {
                warn!("Respawn rejected: {}", e);
            }
        }
    }

    fn simulate_projectiles(&mut self) {
        let world = ArenaWorld::from_players(&self.players, &self.tuning);
        let events = self.projectiles.step(
            self.tick,
            self.tuning.tick_dt(),
            self.tuning.projectile_radius,
            self.tuning.world_bound,
            &world,
        );

        for event in events {
            match event {
                ProjectileEvent::Hit {
                    handle,
                    owner,
                    target: HitTarget::Player(victim),
                    ..
                } => {
                    let own_shot = self.players.get(victim).map(|p| Some(p.owner) == owner);
                    if let (Some(false), Some(attacker)) = (own_shot, owner) {
                        let damage = self.tuning.projectile_damage;
                        if let Err(e) = self.apply_damage(victim, damage, attacker) {
                            warn!("Damage rejected: {}", e);
                        }
                    }
                    self.release_projectile(handle);
                }
                ProjectileEvent::Hit { handle, .. } | ProjectileEvent::Expired { handle } => {
                    self.release_projectile(handle);
                }
            }
        }
    }

    fn release_projectile(&mut self, handle: ProjectileHandle) {
        if let Some(fact) = self.projectiles.release(handle) {
            self.facts.push(fact);
        }
    }

    /// Starts a match if the coordinator allows it: fresh vitals and combat
    /// for everyone, a zero score for every player, then `MatchStarted`.
    pub fn start_match(&mut self) -> bool {
        if !self.coordinator.try_start(self.players.len()) {
            return false;
        }

        let process = self.process;
        let hidden: Vec<PlayerHandle> = self
            .players
            .iter()
            .filter(|(_, p)| !p.visible || p.vitals.is_dead)
            .map(|(handle, _)| handle)
            .collect();

        let mut scores = Vec::new();
        for (_, player) in self.players.iter_mut() {
            match player.vitals.write(process) {
                Ok(vitals) => {
                    vitals.reset_for_match();
                    vitals.set_combat(true);
                }
                Err(e) => {
                    warn!("Match reset rejected: {}", e);
                    continue;
                }
            }
            player.respawn_at = None;
            player.next_fire_at = 0;
            scores.push(player.name.clone());
        }

        // Players still down from the last match come back at a spawn point.
        let mut reshown = Vec::new();
        for handle in hidden {
            let transform = self.spawn_transform();
            let Some(player) = self.players.get_mut(handle) else {
                continue;
            };
            match player.transform.write(process) {
                Ok(current) => *current = transform,
                Err(e) => {
                    warn!("Spawn placement rejected: {}", e);
                    continue;
                }
            }
            player.throttle.force();
            player.visible = true;
            reshown.push(player.entity);
        }

        for entity in reshown {
            self.facts.push(Fact::PlayerVisibility {
                entity,
                visible: true,
            });
        }
        for name in scores {
            self.publish_score(&name, 0);
        }
        self.facts.push(Fact::MatchStarted);
        true
    }

    /// Ends a running match on request. Winner is empty.
    pub fn request_end(&mut self) -> bool {
        match self.coordinator.request_end() {
            Some(end) => {
                self.finish_match(end);
                true
            }
            None => false,
        }
    }

    /// A client asked for another round. Only honoured after a match ended.
    pub fn restart_match(&mut self, requested_by: ClientId) -> bool {
        if self.coordinator.phase() != MatchPhase::Ending {
            debug!(
                "Ignoring restart from client {} in phase {:?}",
                requested_by,
                self.coordinator.phase()
            );
            return false;
        }
        info!("Client {} requested a restart", requested_by);
        self.coordinator.return_to_menu();
        self.start_match();
        true
    }

    fn finish_match(&mut self, end: MatchEnd) {
        let process = self.process;
        for (_, player) in self.players.iter_mut() {
            match player.vitals.write(process) {
                Ok(vitals) => vitals.set_combat(false),
                Err(e) => warn!("Combat gate rejected: {}", e),
            }
        }
        self.facts.push(end.to_fact());
    }

    fn publish_score(&mut self, name: &str, kills: u32) -> Option<MatchEnd> {
        self.facts.push(Fact::ScoreUpdated {
            name: name.to_string(),
            kills,
        });
        self.coordinator.record_score(name, kills)
    }

    /// Snapshot for this tick. Transforms are thinned per player.
    pub fn build_snapshot(&mut self) -> Packet {
        let tick = self.tick;
        let mut players = Vec::with_capacity(self.players.len());
        for (_, player) in self.players.iter_mut() {
            let current = *player.transform;
            let transform = if player.throttle.should_send(&current, tick, &self.tuning) {
                player.throttle.mark_sent(current, tick);
                Some(current)
            } else {
                None
            };
            players.push(PlayerUpdate {
                entity: player.entity,
                seq: tick,
                transform,
                vitals: *player.vitals,
                respawn_ticks: player.respawn_ticks_left(tick),
                last_processed_input: player.last_processed_input,
            });
        }

        let projectiles = self
            .projectiles
            .iter_active()
            .map(|(slot, p)| ProjectileUpdate {
                slot,
                seq: tick,
                position: p.position,
                velocity: p.velocity,
            })
            .collect();

        Packet::Snapshot {
            tick,
            timestamp: get_timestamp(),
            players,
            projectiles,
        }
    }

    /// Tears down every projectile and player. The resulting hide and
    /// despawn facts are left queued for a final flush.
    pub fn shutdown(&mut self) {
        let hidden = self.projectiles.teardown();
        self.facts.extend(hidden);
        for handle in self.players.handles() {
            if let Some(player) = self.players.remove(handle) {
                self.facts.push(Fact::PlayerDespawned {
                    entity: player.entity,
                });
            }
        }
        self.coordinator.return_to_menu();
        info!("Game state torn down at tick {}", self.tick);
    }

    fn spawn_transform(&mut self) -> TransformState {
        let points = &self.tuning.spawn_points;
        let position = if points.is_empty() {
            self.tuning.arena_center
        } else {
            points[self.rng.gen_range(0..points.len())]
        };
        TransformState::facing(position, self.tuning.arena_center)
    }

    fn unique_name(&mut self, requested: Option<&str>, entity: EntityId) -> String {
        let base = requested
            .map(clamp_name)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| random_name(&mut self.rng));
        if !self.players.name_taken(&base) {
            return base;
        }
        let suffix = format!("-{}", entity);
        let keep = MAX_NAME_LEN.saturating_sub(suffix.len());
        let mut name: String = base.chars().take(keep).collect();
        name.push_str(&suffix);
        name
    }
}

/// Three lowercase letters followed by three digits, e.g. `kqz481`.
pub fn random_name(rng: &mut impl Rng) -> String {
    let letters: String = (0..3).map(|_| rng.gen_range(b'a'..=b'z') as char).collect();
    format!("{}{:03}", letters, rng.gen_range(0..1000))
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Quat, Vec2, Vec3};
    use shared::InputSnapshot;

    fn game() -> GameState {
        let tuning = Tuning {
            pool_growth: 0,
            ..Tuning::default()
        };
        GameState::seeded(tuning, 8, 7)
    }

    fn two_player_game() -> (GameState, PlayerHandle, PlayerHandle) {
        let mut game = game();
        let (a, _) = game.add_player(1, Some("alice")).unwrap();
        let (b, _) = game.add_player(2, Some("bob")).unwrap();
        (game, a, b)
    }

    fn command(sequence: u32, snapshot: InputSnapshot) -> InputCommand {
        InputCommand {
            sequence,
            timestamp: 0,
            snapshot,
        }
    }

    #[test]
    fn test_add_player_spawns_with_full_health() {
        let mut game = game();
        let (handle, entity) = game.add_player(1, None).unwrap();
        let player = game.player(handle).unwrap();
        assert_eq!(player.entity, entity);
        assert_eq!(player.vitals.health, 100);
        assert!(!player.vitals.combat_enabled);
        assert!(player.name.len() <= MAX_NAME_LEN);
        assert!(game.tuning().spawn_points.contains(&player.transform.position));
        assert_eq!(game.phase(), MatchPhase::Connecting);

        let facts = game.drain_facts();
        assert!(matches!(facts[0], Fact::PlayerSpawned { owner: 1, .. }));
        assert!(matches!(facts[1], Fact::ScoreUpdated { kills: 0, .. }));
    }

    #[test]
    fn test_spawn_faces_center() {
        let mut game = game();
        let (handle, _) = game.add_player(1, None).unwrap();
        let transform = *game.player(handle).unwrap().transform;
        let to_center = (Vec3::ZERO - transform.position).normalize();
        assert!(transform.forward().dot(to_center) > 0.99);
    }

    #[test]
    fn test_generated_names_follow_pattern() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..20 {
            let name = random_name(&mut rng);
            assert_eq!(name.len(), 6);
            assert!(name[..3].chars().all(|c| c.is_ascii_lowercase()));
            assert!(name[3..].chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_duplicate_names_made_unique() {
        let mut game = game();
        let (a, _) = game.add_player(1, Some("sam")).unwrap();
        let (b, _) = game.add_player(2, Some("sam")).unwrap();
        assert_ne!(game.player(a).unwrap().name, game.player(b).unwrap().name);
    }

    #[test]
    fn test_long_names_clamped() {
        let mut game = game();
        let (a, _) = game
            .add_player(1, Some("a-very-long-player-name"))
            .unwrap();
        assert_eq!(game.player(a).unwrap().name.chars().count(), MAX_NAME_LEN);
        let (b, _) = game
            .add_player(2, Some("a-very-long-player-name"))
            .unwrap();
        assert!(game.player(b).unwrap().name.chars().count() <= MAX_NAME_LEN);
    }

    #[test]
    fn test_second_join_starts_match() {
        let (mut game, a, b) = two_player_game();
        assert_eq!(game.phase(), MatchPhase::Running);
        assert!(game.player(a).unwrap().vitals.combat_enabled);
        assert!(game.player(b).unwrap().vitals.combat_enabled);

        let facts = game.drain_facts();
        let started = facts.iter().position(|f| *f == Fact::MatchStarted).unwrap();
        let zero_scores = facts[..started]
            .iter()
            .filter(|f| matches!(f, Fact::ScoreUpdated { kills: 0, .. }))
            .count();
        assert!(zero_scores >= 2);
    }

    #[test]
    fn test_input_from_non_owner_rejected() {
        let (mut game, a, _) = two_player_game();
        let entity = game.player(a).unwrap().entity;
        let result = game.apply_input(entity, 2, &command(1, InputSnapshot::default()));
        assert_eq!(
            result,
            Err(NotAuthorized::Input {
                owner: Some(1),
                submitter: 2
            })
        );
    }

    #[test]
    fn test_input_moves_player_and_tracks_sequence() {
        let (mut game, a, _) = two_player_game();
        let entity = game.player(a).unwrap().entity;
        let start = game.player(a).unwrap().transform.position;
        let forward = InputSnapshot {
            move_vector: Vec2::Y,
            ..Default::default()
        };
        assert_eq!(game.apply_input(entity, 1, &command(1, forward)), Ok(true));
        assert_eq!(game.apply_input(entity, 1, &command(1, forward)), Ok(false));
        let player = game.player(a).unwrap();
        assert_eq!(player.last_processed_input, 1);
        assert!(player.transform.position.distance(start) > 0.05);
    }

    #[test]
    fn test_dead_player_input_ignored() {
        let (mut game, a, b) = two_player_game();
        for _ in 0..5 {
            game.apply_damage(b, 20, 1).unwrap();
        }
        let entity = game.player(b).unwrap().entity;
        let before = *game.player(b).unwrap().transform;
        let forward = InputSnapshot {
            move_vector: Vec2::Y,
            fire: true,
            ..Default::default()
        };
        assert_eq!(game.apply_input(entity, 2, &command(1, forward)), Ok(true));
        assert_eq!(*game.player(b).unwrap().transform, before);
        assert_eq!(game.projectiles().active_count(), 0);
        assert!(game.player(a).is_some());
    }

    #[test]
    fn test_fire_requires_combat_and_cooldown() {
        let mut game = game();
        let (a, _) = game.add_player(1, None).unwrap();
        assert!(game.fire_projectile(a).is_none());

        game.add_player(2, None).unwrap();
        assert!(game.fire_projectile(a).is_some());
        assert!(game.fire_projectile(a).is_none());

        let cooldown = game.tuning().ticks_for(game.tuning().fire_interval);
        for _ in 0..cooldown {
            game.step();
        }
        assert!(game.fire_projectile(a).is_some());
    }

    #[test]
    fn test_damage_path_and_kill_credit() {
        let (mut game, a, b) = two_player_game();
        game.drain_facts();
        for i in 1..5 {
            assert_eq!(
                game.apply_damage(b, 20, 1),
                Ok(DamageOutcome::Damaged {
                    health: 100 - 20 * i
                })
            );
        }
        assert_eq!(game.apply_damage(b, 20, 1), Ok(DamageOutcome::Killed));
        assert_eq!(game.apply_damage(b, 20, 1), Ok(DamageOutcome::Ignored));

        let victim = game.player(b).unwrap();
        assert!(victim.vitals.is_dead);
        assert_eq!(victim.vitals.deaths, 1);
        assert!(!victim.visible);
        assert_eq!(game.player(a).unwrap().vitals.kills, 1);

        let facts = game.drain_facts();
        assert!(facts.contains(&Fact::ScoreUpdated {
            name: "alice".to_string(),
            kills: 1
        }));
        let attacker_entity = game.player(a).unwrap().entity;
        assert!(facts.contains(&Fact::PlayerDied {
            entity: game.player(b).unwrap().entity,
            attacker: Some(attacker_entity),
        }));
    }

    #[test]
    fn test_self_kill_not_credited() {
        let (mut game, a, _) = two_player_game();
        for _ in 0..5 {
            game.apply_damage(a, 20, 1).unwrap();
        }
        let player = game.player(a).unwrap();
        assert!(player.vitals.is_dead);
        assert_eq!(player.vitals.kills, 0);
    }

    #[test]
    fn test_non_authority_damage_rejected() {
        let (game, _, b) = two_player_game();
        let mut game = game.acting_as(ProcessId::Client(1));
        let result = game.apply_damage(b, 20, 1);
        assert!(matches!(result, Err(NotAuthorized::StateWrite { .. })));
        assert_eq!(game.player(b).unwrap().vitals.health, 100);
    }

    #[test]
    fn test_respawn_after_deadline() {
        let tuning = Tuning {
            respawn_delay: 0.5,
            ..Tuning::default()
        };
        let mut game = GameState::seeded(tuning, 4, 3);
        game.add_player(1, None).unwrap();
        let (b, _) = game.add_player(2, None).unwrap();
        game.apply_damage(b, 1000, 1).unwrap();
        assert_eq!(game.player(b).unwrap().respawn_ticks_left(game.tick()), 30);

        for _ in 0..29 {
            game.step();
        }
        assert!(game.player(b).unwrap().vitals.is_dead);
        game.step();
        let player = game.player(b).unwrap();
        assert!(!player.vitals.is_dead);
        assert!(player.visible);
        assert!(player.vitals.combat_enabled);
        assert_eq!(player.vitals.health, 100);
        assert_eq!(player.respawn_at, None);
    }

    #[test]
    fn test_projectile_hits_and_damages() {
        let (mut game, a, b) = two_player_game();
        game.teleport(
            a,
            TransformState {
                position: Vec3::ZERO,
                rotation: Quat::IDENTITY,
                pitch: 0.0,
            },
        )
        .unwrap();
        game.teleport(b, TransformState::facing(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO))
            .unwrap();
        game.drain_facts();

        game.fire_projectile(a).unwrap();
        for _ in 0..20 {
            game.step();
        }
        assert_eq!(game.player(b).unwrap().vitals.health, 80);
        assert_eq!(game.projectiles().active_count(), 0);

        let facts = game.drain_facts();
        let hidden = facts
            .iter()
            .position(|f| matches!(f, Fact::ProjectileHidden { .. }))
            .unwrap();
        let health = facts
            .iter()
            .position(|f| matches!(f, Fact::HealthChanged { .. }))
            .unwrap();
        assert!(health < hidden);
    }

    #[test]
    fn test_snapshot_excludes_pending_projectile() {
        let (mut game, a, _) = two_player_game();
        game.fire_projectile(a).unwrap();
        match game.build_snapshot() {
            Packet::Snapshot { projectiles, .. } => assert!(projectiles.is_empty()),
            other => panic!("unexpected packet {:?}", other),
        }
    }

    #[test]
    fn test_snapshot_thins_idle_players() {
        let (mut game, _, _) = two_player_game();
        let count = |packet: Packet| match packet {
            Packet::Snapshot { players, .. } => {
                players.iter().filter(|p| p.transform.is_some()).count()
            }
            _ => 0,
        };
        let first = game.build_snapshot();
        assert_eq!(count(first), 2);
        game.step();
        let second = game.build_snapshot();
        assert_eq!(count(second), 0);
    }

    #[test]
    fn test_attrition_ends_match() {
        let (mut game, _, _) = two_player_game();
        game.drain_facts();
        assert!(game.remove_player(2));
        assert_eq!(game.phase(), MatchPhase::Ending);
        let facts = game.drain_facts();
        assert!(facts.contains(&Fact::MatchEnded {
            winner: String::new(),
            kills: 0
        }));
        assert!(!game.player_for_owner(1).unwrap().vitals.combat_enabled);
    }

    #[test]
    fn test_empty_server_returns_to_menu() {
        let (mut game, _, _) = two_player_game();
        game.remove_player(1);
        assert_eq!(game.phase(), MatchPhase::Ending);
        game.remove_player(2);
        assert_eq!(game.phase(), MatchPhase::Menu);

        let (c, _) = game.add_player(3, Some("carol")).unwrap();
        assert_eq!(game.phase(), MatchPhase::Connecting);
        let (d, _) = game.add_player(4, Some("dave")).unwrap();
        assert_eq!(game.phase(), MatchPhase::Running);
        assert!(game.player(c).unwrap().vitals.combat_enabled);
        assert!(game.player(d).unwrap().vitals.combat_enabled);
    }

    #[test]
    fn test_restart_moves_dead_players_to_spawn() {
        let tuning = Tuning {
            kills_to_win: 1,
            ..Tuning::default()
        };
        let mut game = GameState::seeded(tuning, 8, 7);
        let (a, _) = game.add_player(1, Some("alice")).unwrap();
        let (b, _) = game.add_player(2, Some("bob")).unwrap();
        let died_at = TransformState {
            position: Vec3::new(3.0, 0.0, 3.0),
            rotation: Quat::IDENTITY,
            pitch: 0.0,
        };
        game.teleport(b, died_at).unwrap();
        game.apply_damage(b, 100, 1).unwrap();
        assert_eq!(game.phase(), MatchPhase::Ending);
        game.build_snapshot();

        assert!(game.restart_match(1));
        let victim = game.player(b).unwrap();
        assert!(victim.visible);
        assert!(!victim.vitals.is_dead);
        assert!(game
            .tuning()
            .spawn_points
            .contains(&victim.transform.position));
        assert!(victim.throttle.should_send(&victim.transform, game.tick(), game.tuning()));
        assert!(game.player(a).unwrap().visible);
    }

    #[test]
    fn test_huge_look_delta_keeps_transform_finite() {
        let (mut game, a, _) = two_player_game();
        let entity = game.player(a).unwrap().entity;
        let spin = InputSnapshot {
            look_delta: Vec2::new(3e38, 0.0),
            ..Default::default()
        };
        let forward = InputSnapshot {
            move_vector: Vec2::Y,
            ..Default::default()
        };
        game.apply_input(entity, 1, &command(1, spin)).unwrap();
        game.apply_input(entity, 1, &command(2, forward)).unwrap();

        let transform = *game.player(a).unwrap().transform;
        assert!(transform.rotation.is_finite());
        assert!(transform.position.is_finite());
    }

    #[test]
    fn test_restart_only_when_ending() {
        let (mut game, _, _) = two_player_game();
        assert!(!game.restart_match(1));
        assert!(game.request_end());
        assert!(!game.request_end());
        assert!(game.restart_match(1));
        assert_eq!(game.phase(), MatchPhase::Running);
    }

    #[test]
    fn test_catch_up_facts_describe_session() {
        let (game, _, _) = two_player_game();
        let facts = game.catch_up_facts();
        let spawned = facts
            .iter()
            .filter(|f| matches!(f, Fact::PlayerSpawned { .. }))
            .count();
        assert_eq!(spawned, 2);
        assert_eq!(facts.last(), Some(&Fact::MatchStarted));
    }

    #[test]
    fn test_shutdown_tears_everything_down() {
        let (mut game, a, _) = two_player_game();
        game.fire_projectile(a).unwrap();
        game.drain_facts();
        game.shutdown();
        assert!(game.players().is_empty());
        assert_eq!(game.projectiles().active_count(), 0);
        let facts = game.drain_facts();
        assert!(facts.contains(&Fact::ProjectileHidden { slot: 0 }));
        assert_eq!(
            facts
                .iter()
                .filter(|f| matches!(f, Fact::PlayerDespawned { .. }))
                .count(),
            2
        );
    }
}
