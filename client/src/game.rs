//! Client-side view of the session.
//!
//! Nothing here is authoritative. The owned player is predicted from local
//! input and reconciled against every authoritative transform; every other
//! player is interpolated toward the last transform the server sent; projectiles
//! only become visible once their suppress counter has run out.

use glam::Vec3;
use log::debug;
use shared::{
    apply_movement, ClientId, EntityId, Fact, InputCommand, MatchCoordinator, PlayerUpdate,
    ProcessId, ProjectileSlot, ProjectileUpdate, Replicated, SequenceFilter, Tick,
    TransformState, Tuning, Vitals, PARKED_POSITION,
};
use std::collections::{HashMap, VecDeque};

/// Unacknowledged inputs kept for replay.
const MAX_INPUT_HISTORY: usize = 256;

#[derive(Debug, Clone)]
pub struct PlayerView {
    pub entity: EntityId,
    pub owner: ClientId,
    pub name: String,
    pub vitals: Replicated<Vitals>,
    /// Last transform received from the server.
    pub authoritative: Replicated<TransformState>,
    /// What gets drawn. Never fed back into `authoritative`.
    pub rendered: TransformState,
    pub visible: bool,
    pub respawn_ticks: u32,
}

impl PlayerView {
    fn new(entity: EntityId, owner: ClientId, name: String, tuning: &Tuning) -> Self {
        Self {
            entity,
            owner,
            name,
            vitals: Replicated::new(ProcessId::Server, Vitals::new(tuning.max_health)),
            authoritative: Replicated::new(ProcessId::Server, TransformState::default()),
            rendered: TransformState::default(),
            visible: true,
            respawn_ticks: 0,
        }
    }

    fn has_transform(&self) -> bool {
        self.authoritative.revision() > 0
    }

    fn update_vitals(&mut self, f: impl FnOnce(&mut Vitals)) {
        let mut vitals = *self.vitals;
        f(&mut vitals);
        self.vitals.apply_authoritative(vitals);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectileVisibility {
    Hidden,
    /// Activated but held invisible for `remaining` more ticks.
    Suppressed { remaining: u8 },
    Visible,
}

#[derive(Debug, Clone, Copy)]
pub struct ProjectileView {
    pub visibility: ProjectileVisibility,
    pub activated_tick: Tick,
    pub rendered: Vec3,
    pub target: Vec3,
    pub velocity: Vec3,
}

impl ProjectileView {
    fn parked() -> Self {
        Self {
            visibility: ProjectileVisibility::Hidden,
            activated_tick: 0,
            rendered: PARKED_POSITION,
            target: PARKED_POSITION,
            velocity: Vec3::ZERO,
        }
    }

    pub fn is_visible(&self) -> bool {
        self.visibility == ProjectileVisibility::Visible
    }
}

pub struct ClientWorld {
    tuning: Tuning,
    client_id: Option<ClientId>,
    own_entity: Option<EntityId>,
    players: HashMap<EntityId, PlayerView>,
    projectiles: HashMap<ProjectileSlot, ProjectileView>,
    transform_filter: SequenceFilter<EntityId>,
    projectile_filter: SequenceFilter<ProjectileSlot>,
    coordinator: MatchCoordinator,
    predicted: Option<TransformState>,
    history: VecDeque<InputCommand>,
    server_tick: Tick,
    reconciliations: u32,
    pub prediction_enabled: bool,
    pub reconciliation_enabled: bool,
}

impl ClientWorld {
    pub fn new(tuning: Tuning) -> Self {
        let coordinator = MatchCoordinator::new(false, tuning.kills_to_win, tuning.min_players);
        Self {
            tuning,
            client_id: None,
            own_entity: None,
            players: HashMap::new(),
            projectiles: HashMap::new(),
            transform_filter: SequenceFilter::new(),
            projectile_filter: SequenceFilter::new(),
            coordinator,
            predicted: None,
            history: VecDeque::new(),
            server_tick: 0,
            reconciliations: 0,
            prediction_enabled: true,
            reconciliation_enabled: true,
        }
    }

    pub fn set_identity(&mut self, client_id: ClientId, entity: EntityId) {
        self.client_id = Some(client_id);
        self.own_entity = Some(entity);
        self.predicted = None;
        self.history.clear();
    }

    pub fn tuning(&self) -> &Tuning {
        &self.tuning
    }

    pub fn client_id(&self) -> Option<ClientId> {
        self.client_id
    }

    pub fn own_entity(&self) -> Option<EntityId> {
        self.own_entity
    }

    pub fn server_tick(&self) -> Tick {
        self.server_tick
    }

    pub fn coordinator(&self) -> &MatchCoordinator {
        &self.coordinator
    }

    pub fn player(&self, entity: EntityId) -> Option<&PlayerView> {
        self.players.get(&entity)
    }

    pub fn players(&self) -> impl Iterator<Item = &PlayerView> {
        self.players.values()
    }

    pub fn own_player(&self) -> Option<&PlayerView> {
        self.own_entity.and_then(|e| self.players.get(&e))
    }

    /// The predicted transform of the owned player.
    pub fn own_transform(&self) -> Option<TransformState> {
        self.predicted
    }

    pub fn projectile(&self, slot: ProjectileSlot) -> Option<&ProjectileView> {
        self.projectiles.get(&slot)
    }

    pub fn visible_projectiles(&self) -> impl Iterator<Item = (ProjectileSlot, Vec3)> + '_ {
        self.projectiles
            .iter()
            .filter(|(_, view)| view.is_visible())
            .map(|(slot, view)| (*slot, view.rendered))
    }

    pub fn pending_inputs(&self) -> usize {
        self.history.len()
    }

    pub fn reconciliation_count(&self) -> u32 {
        self.reconciliations
    }

    /// Seconds until the owned player respawns, while dead.
    pub fn respawn_seconds_left(&self) -> Option<f32> {
        let view = self.own_player()?;
        (view.respawn_ticks > 0).then(|| view.respawn_ticks as f32 * self.tuning.tick_dt())
    }

    fn is_own(&self, entity: EntityId) -> bool {
        self.own_entity == Some(entity)
    }

    /// Applies one fact from the reliable channel.
    pub fn apply_fact(&mut self, fact: &Fact) {
        match fact {
            Fact::PlayerSpawned {
                entity,
                owner,
                name,
            } => {
                let view = PlayerView::new(*entity, *owner, name.clone(), &self.tuning);
                self.players.insert(*entity, view);
            }
            Fact::PlayerDespawned { entity } => {
                self.players.remove(entity);
                self.transform_filter.forget(entity);
                if self.is_own(*entity) {
                    self.predicted = None;
                    self.history.clear();
                }
            }
            Fact::HealthChanged { entity, health } => {
                if let Some(view) = self.players.get_mut(entity) {
                    view.update_vitals(|v| v.health = *health);
                }
            }
            Fact::PlayerDied { entity, .. } => {
                if let Some(view) = self.players.get_mut(entity) {
                    view.update_vitals(|v| {
                        v.health = 0;
                        v.is_dead = true;
                        v.combat_enabled = false;
                    });
                }
            }
            Fact::PlayerVisibility { entity, visible } => {
                if let Some(view) = self.players.get_mut(entity) {
                    view.visible = *visible;
                }
            }
            Fact::ProjectileActivated {
                slot,
                tick,
                position,
                velocity,
                suppress_ticks,
            } => {
                self.projectiles.insert(
                    *slot,
                    ProjectileView {
                        visibility: ProjectileVisibility::Suppressed {
                            remaining: (*suppress_ticks).max(1),
                        },
                        activated_tick: *tick,
                        rendered: *position,
                        target: *position,
                        velocity: *velocity,
                    },
                );
                self.projectile_filter.reset(*slot, *tick);
            }
            Fact::ProjectileHidden { slot } => {
                self.projectiles.insert(*slot, ProjectileView::parked());
            }
            Fact::ScoreUpdated { .. } | Fact::MatchStarted | Fact::MatchEnded { .. } => {
                self.coordinator.apply_fact(fact);
            }
        }
    }

    /// Applies an unreliable snapshot. Updates older than what was already
    /// applied for the same entity are dropped.
    pub fn apply_snapshot(
        &mut self,
        tick: Tick,
        players: &[PlayerUpdate],
        projectiles: &[ProjectileUpdate],
    ) {
        if shared::seq_newer(tick, self.server_tick) {
            self.server_tick = tick;
        }

        for update in players {
            if !self.transform_filter.accept(update.entity, update.seq) {
                continue;
            }
            let own = self.is_own(update.entity);
            let Some(view) = self.players.get_mut(&update.entity) else {
                continue;
            };
            view.vitals.apply_authoritative(update.vitals);
            view.respawn_ticks = update.respawn_ticks;

            match update.transform {
                Some(transform) => {
                    let first = !view.has_transform();
                    view.authoritative.apply_authoritative(transform);
                    if first {
                        view.rendered = transform;
                    }
                    if own {
                        self.reconcile(transform, update.last_processed_input);
                    }
                }
                None if own => self.prune_history(update.last_processed_input),
                None => {}
            }
        }

        for update in projectiles {
            if !self.projectile_filter.accept(update.slot, update.seq) {
                continue;
            }
            let Some(view) = self.projectiles.get_mut(&update.slot) else {
                continue;
            };
            match view.visibility {
                ProjectileVisibility::Hidden => {}
                ProjectileVisibility::Suppressed { .. } => {
                    view.target = update.position;
                    view.velocity = update.velocity;
                }
                ProjectileVisibility::Visible => {
                    view.target = update.position;
                    view.velocity = update.velocity;
                    if view.rendered.distance(view.target) > self.tuning.projectile_snap_distance {
                        view.rendered = view.target;
                    }
                }
            }
        }
    }

    /// Predicts the owned player's movement for one local input.
    ///
    /// Returns false when nothing was predicted (no transform yet, dead, or
    /// prediction turned off). The command is still sent to the server.
    pub fn predict(&mut self, command: &InputCommand) -> bool {
        if !self.prediction_enabled {
            return false;
        }
        if self.own_player().map_or(true, |view| view.vitals.is_dead) {
            return false;
        }
        let dt = self.tuning.tick_dt();
        let Some(predicted) = self.predicted.as_mut() else {
            return false;
        };

        apply_movement(predicted, &command.snapshot, dt, &self.tuning);
        self.history.push_back(*command);
        while self.history.len() > MAX_INPUT_HISTORY {
            self.history.pop_front();
        }
        true
    }

    fn prune_history(&mut self, last_processed: u32) {
        while self
            .history
            .front()
            .map_or(false, |c| c.sequence <= last_processed)
        {
            self.history.pop_front();
        }
    }

    /// Rebases prediction on an authoritative transform by replaying the
    /// inputs the server has not processed yet. Only snaps when the replayed
    /// result disagrees with what was predicted.
    fn reconcile(&mut self, authoritative: TransformState, last_processed: u32) {
        self.prune_history(last_processed);

        let Some(predicted) = self.predicted else {
            self.predicted = Some(authoritative);
            return;
        };
        if !self.reconciliation_enabled {
            return;
        }

        let dt = self.tuning.tick_dt();
        let mut replayed = authoritative;
        for command in &self.history {
            apply_movement(&mut replayed, &command.snapshot, dt, &self.tuning);
        }

        let error = replayed.distance_to(&predicted);
        if error > self.tuning.reconcile_threshold
            || replayed.angle_to(&predicted) > self.tuning.rotation_sync_threshold
        {
            debug!(
                "Reconciling: error {:.3}, replaying {} inputs",
                error,
                self.history.len()
            );
            self.predicted = Some(replayed);
            self.reconciliations += 1;
        }
    }

    /// One simulation tick: counts down suppressed projectiles.
    pub fn advance_tick(&mut self) {
        for view in self.projectiles.values_mut() {
            if let ProjectileVisibility::Suppressed { remaining } = view.visibility {
                view.visibility = if remaining <= 1 {
                    ProjectileVisibility::Visible
                } else {
                    ProjectileVisibility::Suppressed {
                        remaining: remaining - 1,
                    }
                };
            }
        }
    }

    /// Presentation smoothing. Moves rendered transforms toward their
    /// targets; never touches authoritative values.
    pub fn interpolate(&mut self, dt: f32) {
        let player_t = (self.tuning.remote_catch_up_rate * dt).clamp(0.0, 1.0);
        let projectile_t = (self.tuning.projectile_catch_up_rate * dt).clamp(0.0, 1.0);
        let own = self.own_entity;
        let predicted = self.predicted;

        for view in self.players.values_mut() {
            if Some(view.entity) == own {
                if let Some(predicted) = predicted {
                    view.rendered = predicted;
                }
            } else if view.has_transform() {
                view.rendered = view.rendered.lerp_toward(&view.authoritative, player_t);
            }
        }

        for view in self.projectiles.values_mut() {
            if view.is_visible() {
                view.rendered = view.rendered.lerp(view.target, projectile_t);
            }
        }
    }

    /// Forgets everything, e.g. after leaving a session.
    pub fn clear(&mut self) {
        *self = Self::new(self.tuning.clone());
    }
}
