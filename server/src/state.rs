use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use ctf_shared::config::GameModeConfig;
use ctf_shared::protocol::{
    EngineEvent, FlagId, GameEvent, MatchSnapshot, ModeCommand, ObjectId, PlayerId, ScoreWire,
    TeamId, WelcomeMsg, ZoneId, PROTOCOL_VERSION,
};
use ctf_shared::vec3::{add, scale, Vec3};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Duration, Instant};

use crate::capture_zone::{CaptureDecision, CaptureZone};
use crate::engine::{EngineSink, Positionable, Toggleable};
use crate::flag::{DropTicket, Flag, FlagDrop, FlagState};
use crate::game_loop::GameCommand;
use crate::path_animation::{AnimationHandle, PathAnimator};
use crate::player::Player;
use crate::projectile::{ProjectileParams, ProjectileSimulator};
use crate::raycast::{CastCall, RaycastQueue, Raycaster};
use crate::spawn_validator::SpawnValidator;

/// How a carried flag leaves its carrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropMode {
    /// Thrown along the carrier's facing and animated until it lands
    Arc,
    /// Placed at the carrier's position
    Snap,
}

/// Central match state owned by the game loop task.
pub struct GameState {
    pub config: GameModeConfig,
    flags: BTreeMap<FlagId, Flag>,
    players: HashMap<PlayerId, Player>,
    zones: BTreeMap<ZoneId, CaptureZone>,
    scores: BTreeMap<TeamId, u32>,
    winner: Option<TeamId>,
    next_object_id: ObjectId,
    sink: EngineSink,
    raycaster: Raycaster,
    raycasts: RaycastQueue,
    events: broadcast::Sender<GameEvent>,
    commands: mpsc::WeakSender<GameCommand>,
}

impl GameState {
    pub fn new(
        config: GameModeConfig,
        sink: EngineSink,
        raycaster: Raycaster,
        events: broadcast::Sender<GameEvent>,
        commands: mpsc::WeakSender<GameCommand>,
    ) -> Self {
        let flags = config.flags.iter().map(|f| (f.id, Flag::new(f))).collect();
        let zones = config
            .capture_zones
            .iter()
            .map(|z| (z.id, CaptureZone::new(z)))
            .collect();
        let scores = config.teams.iter().map(|t| (t.id, 0)).collect();
        let raycasts = RaycastQueue::detached(sink.clone(), config.debug_raycasts);

        Self {
            config,
            flags,
            players: HashMap::new(),
            zones,
            scores,
            winner: None,
            next_object_id: 1,
            sink,
            raycaster,
            raycasts,
            events,
            commands,
        }
    }

    pub fn welcome(&self) -> WelcomeMsg {
        WelcomeMsg {
            protocol_version: PROTOCOL_VERSION,
            config: self.config.clone(),
        }
    }

    pub fn flag(&self, id: FlagId) -> Option<&Flag> {
        self.flags.get(&id)
    }

    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.players.get(&id)
    }

    pub fn score(&self, team: TeamId) -> u32 {
        self.scores.get(&team).copied().unwrap_or(0)
    }

    pub fn winner(&self) -> Option<TeamId> {
        self.winner
    }

    pub fn pending_raycasts(&self) -> usize {
        self.raycasts.pending_len()
    }

    fn allocate_object_id(&mut self) -> ObjectId {
        let id = self.next_object_id;
        self.next_object_id += 1;
        id
    }

    fn emit(&self, event: GameEvent) {
        // No subscribers is fine
        let _ = self.events.send(event.clone());
        self.sink.announce(event);
    }

    /// Spawn a task that reports `command` back to the game loop after `delay`.
    fn schedule(&self, delay: Duration, command: GameCommand) {
        let commands = self.commands.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(tx) = commands.upgrade() {
                let _ = tx.send(command).await;
            }
        });
    }

    fn carried_by(&self, player: PlayerId) -> Vec<FlagId> {
        self.flags
            .values()
            .filter(|f| f.carrier() == Some(player))
            .map(|f| f.id)
            .collect()
    }

    fn team_color(&self, team: TeamId) -> u32 {
        self.config.team(team).map(|t| t.color).unwrap_or(0xffffff)
    }

    /// Reset scores and flags and light up the capture zones.
    pub fn start_match(&mut self) {
        self.raycasts.attach();
        self.winner = None;
        for score in self.scores.values_mut() {
            *score = 0;
        }
        let ids: Vec<FlagId> = self.flags.keys().copied().collect();
        for id in ids {
            self.reset_flag(id);
            if let Some(flag) = self.flags.get(&id) {
                self.sink.set_enabled(flag.icon_id, true);
            }
        }
        for zone in self.zones.values() {
            zone.show_icons(&self.sink, self.team_color(zone.team));
        }
        tracing::info!(
            "Match started: {} flags, {} capture zones, target score {}",
            self.flags.len(),
            self.zones.len(),
            self.config.target_score
        );
    }

    /// The engine went away: nothing it owed us will arrive.
    pub fn engine_detached(&mut self) {
        self.raycasts.detach();
        let ids: Vec<FlagId> = self.flags.keys().copied().collect();
        for id in ids {
            self.reset_flag(id);
        }
        self.players.clear();
    }

    pub fn submit_cast(&mut self, call: CastCall) {
        if let Err(e) = self.raycasts.submit(call) {
            tracing::debug!("Rejected cast: {}", e);
        }
    }

    pub fn handle_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::RayCastHit { point, normal } => self.raycasts.on_hit(point, normal),
            EngineEvent::RayCastMissed => self.raycasts.on_miss(),
            EngineEvent::PlayerJoined { player_id, team } => {
                if self.config.team(team).is_none() {
                    tracing::warn!("Player {} joined unknown team {}", player_id, team);
                    return;
                }
                self.players.insert(player_id, Player::new(player_id, team));
                tracing::info!("Player {} joined team {}", player_id, team);
            }
            EngineEvent::PlayerLeft { player_id } => {
                self.drop_carried(player_id, DropMode::Snap);
                if self.players.remove(&player_id).is_some() {
                    tracing::info!("Player {} left", player_id);
                }
            }
            EngineEvent::PlayerDied { player_id } => {
                let mode = if self.config.arc_throw_on_death {
                    DropMode::Arc
                } else {
                    DropMode::Snap
                };
                self.drop_carried(player_id, mode);
                if let Some(player) = self.players.get_mut(&player_id) {
                    player.alive = false;
                }
            }
            EngineEvent::PlayerMoved {
                player_id,
                position,
                velocity,
                facing,
            } => self.player_moved(player_id, position, velocity, facing),
            EngineEvent::InteractFlag { player_id, flag_id } => self.interact(player_id, flag_id),
            EngineEvent::EnterCaptureZone { player_id, zone_id } => {
                self.enter_capture_zone(player_id, zone_id)
            }
            EngineEvent::ExitCaptureZone { player_id, zone_id } => {
                tracing::trace!("Player {} left zone {}", player_id, zone_id);
            }
            EngineEvent::EnteredVehicle { player_id } => {
                self.drop_carried(player_id, DropMode::Snap)
            }
            EngineEvent::DropRequested { player_id } => self.drop_carried(player_id, DropMode::Arc),
        }
    }

    fn player_moved(&mut self, player_id: PlayerId, position: Vec3, velocity: Vec3, facing: Vec3) {
        let Some(player) = self.players.get_mut(&player_id) else {
            return;
        };
        player.update_motion(position, velocity, facing);
        for flag in self.flags.values_mut() {
            if flag.carrier() == Some(player_id) {
                flag.follow_carrier(position);
                self.sink.set_position(flag.icon_id, position);
            }
        }
    }

    /// A player touched a flag: own team returns it, enemies pick it up.
    pub fn interact(&mut self, player_id: PlayerId, flag_id: FlagId) {
        if self.winner.is_some() {
            return;
        }
        let Some(player) = self.players.get(&player_id) else {
            tracing::debug!("Interaction from unknown player {}", player_id);
            return;
        };
        if !player.alive {
            return;
        }
        let team = player.team;
        let Some(flag) = self.flags.get(&flag_id) else {
            tracing::debug!("Interaction with unknown flag {}", flag_id);
            return;
        };

        match (flag.team == team, flag.state()) {
            (true, FlagState::Dropped) => self.return_flag(flag_id, false),
            (false, FlagState::AtHome | FlagState::Dropped) => {
                self.pickup_flag(player_id, flag_id);
            }
            _ => {}
        }
    }

    /// Returns true if the player now carries the flag.
    pub fn pickup_flag(&mut self, player_id: PlayerId, flag_id: FlagId) -> bool {
        let Some(position) = self.players.get(&player_id).map(|p| p.position) else {
            return false;
        };
        let already_carrying = !self.carried_by(player_id).is_empty();
        let allow_multi_carry = self.config.allow_multi_carry;
        let Some(flag) = self.flags.get_mut(&flag_id) else {
            return false;
        };

        let pickup = match flag.pickup(player_id, already_carrying, allow_multi_carry) {
            Ok(pickup) => pickup,
            Err(reason) => {
                tracing::debug!("Player {} cannot take flag {}: {}", player_id, flag_id, reason);
                return false;
            }
        };
        flag.follow_carrier(position);
        let icon_id = flag.icon_id;

        if let Some(prop) = pickup.prop {
            self.sink.despawn_object(prop);
        }
        if !already_carrying {
            self.sink.force_melee_loadout(player_id);
        }
        self.sink.set_position(icon_id, position);

        tracing::info!("Player {} took flag {}", player_id, flag_id);
        self.emit(GameEvent::FlagTaken {
            flag_id,
            player_id,
            was_at_home: pickup.was_at_home,
        });
        true
    }

    /// Drop every flag `player_id` carries.
    pub fn drop_carried(&mut self, player_id: PlayerId, mode: DropMode) {
        for flag_id in self.carried_by(player_id) {
            self.drop_flag(flag_id, mode);
        }
    }

    /// Release a carried flag. Returns false if it was not carried.
    pub fn drop_flag(&mut self, flag_id: FlagId, mode: DropMode) -> bool {
        let Some(flag) = self.flags.get(&flag_id) else {
            return false;
        };
        let Some(carrier_id) = flag.carrier() else {
            return false;
        };
        // Without a motion report the flag falls where it was last seen
        let (position, velocity, facing) = match self.players.get(&carrier_id) {
            Some(p) => (p.position, p.velocity, p.facing),
            None => (flag.position(), Vec3::ZERO, Vec3::ZERO),
        };

        let object_id = self.allocate_object_id();
        let Some(flag) = self.flags.get_mut(&flag_id) else {
            return false;
        };
        let Some(drop) = flag.drop_at(position, Instant::now()) else {
            return false;
        };
        let team = flag.team;
        flag.set_prop(object_id);

        if self.carried_by(carrier_id).is_empty() {
            self.sink.restore_loadout(carrier_id);
        }
        tracing::info!("Flag {} dropped by player {} ({:?})", flag_id, carrier_id, mode);

        match mode {
            DropMode::Snap => {
                self.sink.spawn_flag_prop(object_id, team, position);
                self.on_flag_landed(flag_id, drop.ticket, drop.previous_carrier, position);
            }
            DropMode::Arc => {
                let throw = &self.config.throw;
                let origin = add(position, scale(Vec3::UP, throw.throw_origin_height));
                let velocity = add(
                    add(velocity, scale(facing, throw.throw_speed)),
                    scale(Vec3::UP, throw.throw_lift),
                );
                self.sink.spawn_flag_prop(object_id, team, origin);
                self.throw_flag(flag_id, drop, object_id, origin, velocity);
            }
        }
        true
    }

    /// Run the arc throw in its own task. It reports the resting point back as
    /// [`GameCommand::FlagLanded`].
    fn throw_flag(
        &mut self,
        flag_id: FlagId,
        drop: FlagDrop,
        object_id: ObjectId,
        origin: Vec3,
        velocity: Vec3,
    ) {
        let FlagDrop {
            previous_carrier,
            ticket,
        } = drop;
        let params = ProjectileParams::from_config(origin, velocity, &self.config.throw);
        let simulator = match ProjectileSimulator::new(self.raycaster.clone(), params) {
            Ok(simulator) => simulator,
            Err(e) => {
                tracing::warn!("Flag {} throw rejected ({}), placing it instead", flag_id, e);
                self.sink.move_object(object_id, origin, Vec3::ZERO, 0.0);
                self.on_flag_landed(flag_id, ticket, previous_carrier, origin);
                return;
            }
        };
        let refiner = SpawnValidator::new(self.raycaster.clone(), self.config.spawn_probe.clone());
        let simulator = simulator.with_refiner(Arc::new(refiner));
        let animator = PathAnimator::new(self.sink.clone(), self.config.animation.clone());

        let handle = AnimationHandle::new();
        if let Some(flag) = self.flags.get_mut(&flag_id) {
            flag.set_in_flight(ticket, handle.clone());
        }

        let commands = self.commands.clone();
        tokio::spawn(async move {
            let samples = Box::pin(simulator.into_stream());
            let report = animator.animate(object_id, origin, samples, &handle).await;
            if report.cancelled {
                tracing::debug!("Flag {} throw cancelled", flag_id);
                return;
            }
            tracing::debug!(
                "Flag {} landed after {} segments ({} starvations)",
                flag_id,
                report.segments,
                report.starvation_count
            );
            if let Some(tx) = commands.upgrade() {
                let _ = tx
                    .send(GameCommand::FlagLanded {
                        flag_id,
                        ticket,
                        previous_carrier,
                        position: report.final_position,
                    })
                    .await;
            }
        });
    }

    /// A dropped flag came to rest. Announces the drop and starts the
    /// pickup-delay and auto-return timers for it.
    pub fn on_flag_landed(
        &mut self,
        flag_id: FlagId,
        ticket: DropTicket,
        previous_carrier: PlayerId,
        position: Vec3,
    ) {
        let auto_return_delay = Duration::from_secs_f64(self.config.auto_return_delay.max(0.0));
        let pickup_delay = Duration::from_secs_f64(self.config.pickup_delay.max(0.0));
        let Some(flag) = self.flags.get_mut(&flag_id) else {
            return;
        };
        if !flag.land(ticket, position, Instant::now(), auto_return_delay) {
            tracing::debug!("Stale landing for flag {} ignored", flag_id);
            return;
        }
        let icon_id = flag.icon_id;

        self.sink.set_position(icon_id, position);
        self.emit(GameEvent::FlagDropped {
            flag_id,
            previous_carrier,
            position,
        });
        self.schedule(
            pickup_delay,
            GameCommand::PickupDelayElapsed { flag_id, ticket },
        );
        self.schedule(
            auto_return_delay,
            GameCommand::AutoReturnDue { flag_id, ticket },
        );
    }

    pub fn on_pickup_delay_elapsed(&mut self, flag_id: FlagId, ticket: DropTicket) {
        if let Some(flag) = self.flags.get_mut(&flag_id) {
            if flag.enable_pickup(ticket) {
                tracing::debug!("Flag {} can be picked up again", flag_id);
            } else {
                tracing::debug!("Stale pickup delay for flag {} ignored", flag_id);
            }
        }
    }

    pub fn on_auto_return_due(&mut self, flag_id: FlagId, ticket: DropTicket) {
        let current = self
            .flags
            .get(&flag_id)
            .is_some_and(|f| f.ticket_is_current(ticket));
        if current {
            self.return_flag(flag_id, true);
        } else {
            tracing::debug!("Stale auto-return for flag {} ignored", flag_id);
        }
    }

    pub fn return_flag(&mut self, flag_id: FlagId, was_auto_returned: bool) {
        if !self.flags.contains_key(&flag_id) {
            return;
        }
        self.reset_flag(flag_id);
        tracing::info!("Flag {} returned (auto: {})", flag_id, was_auto_returned);
        self.emit(GameEvent::FlagReturned {
            flag_id,
            was_auto_returned,
        });
    }

    /// Put the flag back at home with a fresh prop. Safe to call in any state.
    pub fn reset_flag(&mut self, flag_id: FlagId) {
        let object_id = self.allocate_object_id();
        let Some(flag) = self.flags.get_mut(&flag_id) else {
            return;
        };
        let released = flag.reset();
        let old_prop = flag.take_prop();
        flag.set_prop(object_id);
        let (team, home, icon_id) = (flag.team, flag.home, flag.icon_id);

        if let Some(prop) = old_prop {
            self.sink.despawn_object(prop);
        }
        self.sink.spawn_flag_prop(object_id, team, home);
        self.sink.set_position(icon_id, home);

        if let Some(carrier) = released {
            if self.carried_by(carrier).is_empty() {
                self.sink.restore_loadout(carrier);
            }
        }
    }

    pub fn enter_capture_zone(&mut self, player_id: PlayerId, zone_id: ZoneId) {
        if self.winner.is_some() {
            return;
        }
        let Some(team) = self.players.get(&player_id).map(|p| p.team) else {
            return;
        };
        let Some(zone) = self.zones.get(&zone_id) else {
            tracing::debug!("Unknown capture zone {}", zone_id);
            return;
        };

        let captured = match zone.evaluate(player_id, team, self.flags.values()) {
            CaptureDecision::Capture(captured) => captured,
            decision => {
                tracing::debug!("Player {} in zone {}: {:?}", player_id, zone_id, decision);
                return;
            }
        };

        for flag_id in captured {
            self.reset_flag(flag_id);
            tracing::info!("Player {} captured flag {} for team {}", player_id, flag_id, team);
            self.emit(GameEvent::FlagCaptured {
                flag_id,
                player_id,
                team,
            });

            let score = self.scores.entry(team).or_insert(0);
            *score += 1;
            let score = *score;
            self.emit(GameEvent::ScoreChanged { team, score });

            if self.winner.is_none() && score >= self.config.target_score {
                self.winner = Some(team);
                tracing::info!("Team {} wins with {} points", team, score);
                self.emit(GameEvent::MatchEnded { winning_team: team });
                self.sink.send(ModeCommand::MatchEnded { winning_team: team });
                for zone in self.zones.values() {
                    zone.hide_icons(&self.sink);
                }
            }
        }
    }

    pub fn snapshot(&self) -> MatchSnapshot {
        MatchSnapshot {
            flags: self.flags.values().map(Flag::snapshot).collect(),
            scores: self
                .scores
                .iter()
                .map(|(&team, &score)| ScoreWire { team, score })
                .collect(),
            winner: self.winner,
        }
    }
}
