//! Simulated host engine for the capture-the-flag mode.
//!
//! Connects to the mode as the engine and:
//! - Answers every `cast_ray` from a small collision world
//! - Drives seeded bot players through pickup/run/capture cycles
//! - Occasionally kills carriers or has them throw the flag
//!
//! Usage: cargo run --bin sim_engine -- [OPTIONS]
//!
//! Options:
//!   --bots N         Bots per team (default: 3)
//!   --duration S     Give up after S seconds (default: 120)
//!   --seed N         RNG seed (default: 42)
//!   --url URL        Mode URL (default: ws://127.0.0.1:9010/engine)
//!   --json           Print the final results as one JSON line

use std::collections::HashMap;
use std::time::{Duration, Instant};

use ctf_server::sim_world::World;
use ctf_shared::config::GameModeConfig;
use ctf_shared::protocol::{
    EngineEvent, FlagId, GameEvent, ModeCommand, ModeMsg, PlayerId, TeamId,
};
use ctf_shared::vec3::{add, distance, normalize, scale, sub, vec3, Vec3};
use futures_util::{SinkExt, StreamExt};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const TICK: Duration = Duration::from_millis(100);
/// Bot run speed (m/s)
const RUN_SPEED: f64 = 7.0;
/// Distance at which a bot can touch a flag or enter a zone
const REACH: f64 = 2.0;
/// Per-tick chance that a carrier is killed
const DEATH_CHANCE: f64 = 0.01;
/// Per-tick chance that a carrier throws the flag
const THROW_CHANCE: f64 = 0.005;
const RESPAWN_DELAY: f64 = 3.0;

/// Bot role decides what a bot runs towards
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BotRole {
    /// Goes for the enemy flag and brings it home
    Runner,
    /// Stays near home and returns dropped own flags
    Defender,
}

#[derive(Debug)]
struct Bot {
    id: PlayerId,
    team: TeamId,
    role: BotRole,
    position: Vec3,
    velocity: Vec3,
    facing: Vec3,
    respawn_in: Option<f64>,
}

#[derive(Debug, Clone, Copy)]
struct FlagView {
    team: TeamId,
    home: Vec3,
    position: Vec3,
    carrier: Option<PlayerId>,
}

#[derive(Debug, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct Stats {
    casts: u64,
    hits: u64,
    taken: u64,
    dropped: u64,
    returned: u64,
    captured: u64,
    deaths: u64,
}

struct Sim {
    config: GameModeConfig,
    world: World,
    bots: Vec<Bot>,
    flags: HashMap<FlagId, FlagView>,
    /// Flag icon id to flag id
    icons: HashMap<u32, FlagId>,
    rng: ChaCha8Rng,
    stats: Stats,
    winner: Option<TeamId>,
}

impl Sim {
    fn new(config: GameModeConfig, bots_per_team: u32, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let world = World::flat(0.0)
            .with_box(vec3(-4.0, 0.0, -20.0), vec3(4.0, 3.0, -12.0))
            .with_box(vec3(-4.0, 0.0, 12.0), vec3(4.0, 3.0, 20.0));

        let flags: HashMap<FlagId, FlagView> = config
            .flags
            .iter()
            .map(|f| {
                (
                    f.id,
                    FlagView {
                        team: f.team,
                        home: f.home,
                        position: f.home,
                        carrier: None,
                    },
                )
            })
            .collect();
        let icons = config.flags.iter().map(|f| (f.icon_id, f.id)).collect();

        let mut bots = Vec::new();
        let mut next_id = 1;
        for team in &config.teams {
            let home = home_of(&config, team.id);
            for i in 0..bots_per_team {
                let role = if i == 0 {
                    BotRole::Defender
                } else {
                    BotRole::Runner
                };
                let jitter = vec3(rng.gen_range(-3.0..3.0), 0.0, rng.gen_range(-3.0..3.0));
                bots.push(Bot {
                    id: next_id,
                    team: team.id,
                    role,
                    position: add(home, jitter),
                    velocity: Vec3::ZERO,
                    facing: vec3(0.0, 0.0, 1.0),
                    respawn_in: None,
                });
                next_id += 1;
            }
        }

        Self {
            config,
            world,
            bots,
            flags,
            icons,
            rng,
            stats: Stats::default(),
            winner: None,
        }
    }

    fn joins(&self) -> Vec<EngineEvent> {
        self.bots
            .iter()
            .map(|b| EngineEvent::PlayerJoined {
                player_id: b.id,
                team: b.team,
            })
            .collect()
    }

    /// React to a mode command. Returns the events the engine answers with.
    fn on_command(&mut self, command: ModeCommand) -> Vec<EngineEvent> {
        match command {
            ModeCommand::CastRay { start, end } => {
                self.stats.casts += 1;
                match self.world.cast(start, end) {
                    Some((point, normal)) => {
                        self.stats.hits += 1;
                        vec![EngineEvent::RayCastHit {
                            point,
                            normal: Some(normal),
                        }]
                    }
                    None => vec![EngineEvent::RayCastMissed],
                }
            }
            ModeCommand::SetIconPosition { icon_id, position } => {
                if let Some(flag) = self.icons.get(&icon_id).and_then(|id| self.flags.get_mut(id)) {
                    flag.position = position;
                }
                Vec::new()
            }
            ModeCommand::Announce { event } => {
                self.on_event(event);
                Vec::new()
            }
            ModeCommand::MatchEnded { winning_team } => {
                self.winner = Some(winning_team);
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn on_event(&mut self, event: GameEvent) {
        match event {
            GameEvent::FlagTaken {
                flag_id, player_id, ..
            } => {
                self.stats.taken += 1;
                if let Some(flag) = self.flags.get_mut(&flag_id) {
                    flag.carrier = Some(player_id);
                }
            }
            GameEvent::FlagDropped {
                flag_id, position, ..
            } => {
                self.stats.dropped += 1;
                if let Some(flag) = self.flags.get_mut(&flag_id) {
                    flag.carrier = None;
                    flag.position = position;
                }
            }
            GameEvent::FlagReturned { flag_id, .. } => {
                self.stats.returned += 1;
                if let Some(flag) = self.flags.get_mut(&flag_id) {
                    flag.carrier = None;
                    flag.position = flag.home;
                }
            }
            GameEvent::FlagCaptured { flag_id, team, .. } => {
                self.stats.captured += 1;
                println!("Team {} captured flag {}", team, flag_id);
                if let Some(flag) = self.flags.get_mut(&flag_id) {
                    flag.carrier = None;
                    flag.position = flag.home;
                }
            }
            GameEvent::ScoreChanged { team, score } => {
                println!("Score: team {} has {}", team, score);
            }
            GameEvent::MatchEnded { winning_team } => self.winner = Some(winning_team),
        }
    }

    fn carried_by(&self, player: PlayerId) -> Option<FlagId> {
        self.flags
            .iter()
            .find(|(_, f)| f.carrier == Some(player))
            .map(|(&id, _)| id)
    }

    /// Where a bot wants to go, and the flag it wants to touch there.
    fn goal(&self, bot: &Bot) -> (Vec3, Option<FlagId>) {
        let home = home_of(&self.config, bot.team);
        if self.carried_by(bot.id).is_some() {
            return (home, None);
        }

        // Own flag lying in the field: go and return it
        let own_dropped = self
            .flags
            .iter()
            .find(|(_, f)| f.team == bot.team && f.carrier.is_none() && distance(f.position, f.home) > REACH);
        if let Some((&id, flag)) = own_dropped {
            return (flag.position, Some(id));
        }

        match bot.role {
            BotRole::Defender => (home, None),
            BotRole::Runner => self
                .flags
                .iter()
                .find(|(_, f)| f.team != bot.team && f.carrier.is_none())
                .map(|(&id, f)| (f.position, Some(id)))
                .unwrap_or((home, None)),
        }
    }

    fn tick(&mut self, dt: f64) -> Vec<EngineEvent> {
        let mut events = Vec::new();

        for i in 0..self.bots.len() {
            if let Some(remaining) = self.bots[i].respawn_in {
                let remaining = remaining - dt;
                if remaining > 0.0 {
                    self.bots[i].respawn_in = Some(remaining);
                    continue;
                }
                self.bots[i].respawn_in = None;
                self.bots[i].position = home_of(&self.config, self.bots[i].team);
            }

            let (target, touch) = self.goal(&self.bots[i]);
            let bot = &self.bots[i];
            let to_target = sub(target, bot.position);
            let direction = normalize(vec3(to_target.x, 0.0, to_target.z));
            let step = (RUN_SPEED * dt).min(distance(target, bot.position));
            let wobble = vec3(self.rng.gen_range(-0.2..0.2), 0.0, self.rng.gen_range(-0.2..0.2));
            let position = add(add(bot.position, scale(direction, step)), wobble);
            let velocity = scale(direction, RUN_SPEED);
            let facing = if direction == Vec3::ZERO {
                bot.facing
            } else {
                direction
            };
            let (id, team) = (bot.id, bot.team);

            let bot = &mut self.bots[i];
            bot.position = vec3(position.x, 0.0, position.z);
            bot.velocity = velocity;
            bot.facing = facing;
            events.push(EngineEvent::PlayerMoved {
                player_id: id,
                position: bot.position,
                velocity,
                facing,
            });

            let at_target = distance(bot.position, target) <= REACH;
            let carrying = self.carried_by(id).is_some();
            if carrying {
                if at_target {
                    if let Some(zone) = self.config.capture_zones.iter().find(|z| z.team == team) {
                        events.push(EngineEvent::EnterCaptureZone {
                            player_id: id,
                            zone_id: zone.id,
                        });
                    }
                } else if self.rng.gen_bool(DEATH_CHANCE) {
                    self.stats.deaths += 1;
                    self.bots[i].respawn_in = Some(RESPAWN_DELAY);
                    events.push(EngineEvent::PlayerDied { player_id: id });
                } else if self.rng.gen_bool(THROW_CHANCE) {
                    events.push(EngineEvent::DropRequested { player_id: id });
                }
            } else if let (true, Some(flag_id)) = (at_target, touch) {
                events.push(EngineEvent::InteractFlag {
                    player_id: id,
                    flag_id,
                });
            }
        }

        events
    }
}

fn home_of(config: &GameModeConfig, team: TeamId) -> Vec3 {
    config
        .flags
        .iter()
        .find(|f| f.team == team)
        .map(|f| f.home)
        .unwrap_or(Vec3::ZERO)
}

// === Main ===

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();

    let mut bots_per_team: u32 = 3;
    let mut duration_secs: u64 = 120;
    let mut seed: u64 = 42;
    let mut url = "ws://127.0.0.1:9010/engine".to_string();
    let mut json_output = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bots" => {
                i += 1;
                bots_per_team = args.get(i).and_then(|s| s.parse().ok()).unwrap_or(3);
            }
            "--duration" => {
                i += 1;
                duration_secs = args.get(i).and_then(|s| s.parse().ok()).unwrap_or(120);
            }
            "--seed" => {
                i += 1;
                seed = args.get(i).and_then(|s| s.parse().ok()).unwrap_or(42);
            }
            "--url" => {
                i += 1;
                url = args.get(i).cloned().unwrap_or(url);
            }
            "--json" => json_output = true,
            _ => {}
        }
        i += 1;
    }

    println!("=== Capture-the-flag Simulated Engine ===");
    println!("Bots per team: {}", bots_per_team);
    println!("Duration: {}s", duration_secs);
    println!("Seed: {}", seed);
    println!("URL: {}", url);
    println!();

    let (mut ws, _) = match connect_async(&url).await {
        Ok(conn) => conn,
        Err(e) => {
            eprintln!("Failed to connect: {}", e);
            std::process::exit(1);
        }
    };

    // The welcome carries the active game-mode config
    let config = loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<ModeMsg>(&text) {
                Ok(ModeMsg::Welcome(welcome)) => break welcome.config,
                Ok(ModeMsg::Command(_)) => continue,
                Err(e) => {
                    eprintln!("Unexpected first message: {}", e);
                    std::process::exit(1);
                }
            },
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                eprintln!("Connection error: {}", e);
                std::process::exit(1);
            }
            None => {
                eprintln!("Connection closed before welcome (another engine attached?)");
                std::process::exit(1);
            }
        }
    };

    let mut sim = Sim::new(config, bots_per_team, seed);
    let mut outbox = sim.joins();

    let mut ticker = tokio::time::interval(TICK);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let start = Instant::now();
    let deadline = start + Duration::from_secs(duration_secs);

    'run: loop {
        for event in outbox.drain(..) {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    eprintln!("Failed to encode event: {}", e);
                    continue;
                }
            };
            if ws.send(Message::Text(json.into())).await.is_err() {
                eprintln!("Connection lost");
                break 'run;
            }
        }

        if sim.winner.is_some() || Instant::now() >= deadline {
            break;
        }

        tokio::select! {
            _ = ticker.tick() => {
                outbox = sim.tick(TICK.as_secs_f64());
            }

            msg = ws.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Ok(ModeMsg::Command(command)) = serde_json::from_str::<ModeMsg>(&text) {
                            outbox = sim.on_command(command);
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        eprintln!("Mode closed the connection");
                        break;
                    }
                    Some(Err(e)) => {
                        eprintln!("Connection error: {}", e);
                        break;
                    }
                    Some(_) => {}
                }
            }
        }
    }

    let _ = ws.close(None).await;

    if json_output {
        let summary = serde_json::json!({
            "elapsedSecs": start.elapsed().as_secs_f64(),
            "winner": sim.winner,
            "stats": sim.stats,
        });
        println!("{}", summary);
        return;
    }

    println!();
    println!("=== Final Results ===");
    println!("Elapsed: {:.1}s", start.elapsed().as_secs_f64());
    match sim.winner {
        Some(team) => println!("Winner: team {}", team),
        None => println!("Winner: none (time limit)"),
    }
    println!("Casts answered: {} ({} hits)", sim.stats.casts, sim.stats.hits);
    println!("Flags taken: {}", sim.stats.taken);
    println!("Flags dropped: {}", sim.stats.dropped);
    println!("Flags returned: {}", sim.stats.returned);
    println!("Flags captured: {}", sim.stats.captured);
    println!("Carrier deaths: {}", sim.stats.deaths);
}
