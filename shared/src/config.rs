use std::collections::HashSet;

use crate::vec3::{vec3, Vec3};

/// A team taking part in the match.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, ts_rs::TS)]
#[ts(export, export_to = "../../engine-shim/src/generated/")]
#[serde(rename_all = "camelCase")]
pub struct TeamConfig {
    pub id: u32,
    pub name: String,
    /// 0xRRGGBB
    pub color: u32,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, ts_rs::TS)]
#[ts(export, export_to = "../../engine-shim/src/generated/")]
#[serde(rename_all = "camelCase")]
pub struct FlagConfig {
    pub id: u32,
    /// Owning team
    pub team: u32,
    pub home: Vec3,
    /// World icon that marks the flag
    pub icon_id: u32,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, ts_rs::TS)]
#[ts(export, export_to = "../../engine-shim/src/generated/")]
#[serde(rename_all = "camelCase")]
pub struct CaptureZoneConfig {
    pub id: u32,
    pub team: u32,
    #[serde(default)]
    pub icon_ids: Vec<u32>,
}

/// Arc-throw simulation settings
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, ts_rs::TS)]
#[ts(export, export_to = "../../engine-shim/src/generated/")]
#[serde(rename_all = "camelCase")]
pub struct ThrowConfig {
    /// Speed added along the carrier's facing (m/s)
    pub throw_speed: f64,
    /// Extra upward speed so throws arc (m/s)
    pub throw_lift: f64,
    /// Height above the carrier's feet the throw starts from (m)
    pub throw_origin_height: f64,
    /// Physics steps per simulated second
    pub sample_rate: f64,
    /// Maximum path length before the throw is declared a miss (m)
    pub max_distance: f64,
    /// Downward acceleration (m/s^2)
    pub gravity: f64,
    /// Animation-only samples inserted between physics steps
    pub interpolation_steps: u32,
    /// Synthesize an impact instead of casting below this height
    #[serde(default)]
    pub min_height: Option<f64>,
    pub max_steps: u32,
    /// Refined landing points closer than this to the impact are not bridged (m)
    pub refine_threshold: f64,
    pub bridge_samples: u32,
}

impl Default for ThrowConfig {
    fn default() -> Self {
        Self {
            throw_speed: 8.0,
            throw_lift: 3.0,
            throw_origin_height: 1.5,
            sample_rate: 30.0,
            max_distance: 40.0,
            gravity: 9.81,
            interpolation_steps: 2,
            min_height: None,
            max_steps: 600,
            refine_threshold: 0.1,
            bridge_samples: 3,
        }
    }
}

/// Landing spot validation settings
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, ts_rs::TS)]
#[ts(export, export_to = "../../engine-shim/src/generated/")]
#[serde(rename_all = "camelCase")]
pub struct SpawnProbeConfig {
    pub probe_radius: f64,
    /// Probes start this far above the candidate so they clear the floor
    pub probe_offset: f64,
    pub direction_count: u32,
    pub ground_probe_distance: f64,
    pub max_iterations: u32,
}

impl Default for SpawnProbeConfig {
    fn default() -> Self {
        Self {
            probe_radius: 1.0,
            probe_offset: 0.5,
            direction_count: 8,
            ground_probe_distance: 5.0,
            max_iterations: 4,
        }
    }
}

/// Flag prop playback settings
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, ts_rs::TS)]
#[ts(export, export_to = "../../engine-shim/src/generated/")]
#[serde(rename_all = "camelCase")]
pub struct AnimationConfig {
    /// Samples buffered before the prop starts moving
    pub min_buffer_size: u32,
    /// Playback speed (m/s). Without it every segment takes `min_segment_duration`.
    #[serde(default)]
    pub speed: Option<f64>,
    /// Seconds
    pub min_segment_duration: f64,
    pub rotate_to_direction: bool,
    pub snap_epsilon: f64,
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            min_buffer_size: 3,
            speed: Some(12.0),
            min_segment_duration: 0.02,
            rotate_to_direction: true,
            snap_epsilon: 0.01,
        }
    }
}

/// Game-mode configuration, loaded once at match start. Missing fields take
/// their values from the default two-team setup.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, ts_rs::TS)]
#[ts(export, export_to = "../../engine-shim/src/generated/")]
#[serde(rename_all = "camelCase", default)]
pub struct GameModeConfig {
    pub teams: Vec<TeamConfig>,
    pub flags: Vec<FlagConfig>,
    pub capture_zones: Vec<CaptureZoneConfig>,
    pub target_score: u32,
    /// Seconds a dropped flag stays untouchable after landing
    pub pickup_delay: f64,
    /// Seconds a dropped flag waits before returning home
    pub auto_return_delay: f64,
    pub allow_multi_carry: bool,
    pub arc_throw_on_death: bool,
    pub debug_raycasts: bool,
    pub throw: ThrowConfig,
    pub spawn_probe: SpawnProbeConfig,
    pub animation: AnimationConfig,
}

impl Default for GameModeConfig {
    fn default() -> Self {
        Self {
            teams: vec![
                TeamConfig {
                    id: 1,
                    name: "Blue".to_string(),
                    color: 0x2f6fff,
                },
                TeamConfig {
                    id: 2,
                    name: "Red".to_string(),
                    color: 0xff3b30,
                },
            ],
            flags: vec![
                FlagConfig {
                    id: 1,
                    team: 1,
                    home: vec3(-60.0, 0.0, 0.0),
                    icon_id: 101,
                },
                FlagConfig {
                    id: 2,
                    team: 2,
                    home: vec3(60.0, 0.0, 0.0),
                    icon_id: 102,
                },
            ],
            capture_zones: vec![
                CaptureZoneConfig {
                    id: 1,
                    team: 1,
                    icon_ids: vec![201],
                },
                CaptureZoneConfig {
                    id: 2,
                    team: 2,
                    icon_ids: vec![202],
                },
            ],
            target_score: 3,
            pickup_delay: 3.0,
            auto_return_delay: 30.0,
            allow_multi_carry: false,
            arc_throw_on_death: true,
            debug_raycasts: false,
            throw: ThrowConfig::default(),
            spawn_probe: SpawnProbeConfig::default(),
            animation: AnimationConfig::default(),
        }
    }
}

impl GameModeConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.teams.is_empty() {
            return Err("at least one team is required".to_string());
        }
        let mut team_ids = HashSet::new();
        for team in &self.teams {
            if !team_ids.insert(team.id) {
                return Err(format!("duplicate team id {}", team.id));
            }
        }

        let mut flag_ids = HashSet::new();
        for flag in &self.flags {
            if !flag_ids.insert(flag.id) {
                return Err(format!("duplicate flag id {}", flag.id));
            }
            if !team_ids.contains(&flag.team) {
                return Err(format!("flag {} references unknown team {}", flag.id, flag.team));
            }
            if !flag.home.is_finite() {
                return Err(format!("flag {} home position must be finite", flag.id));
            }
        }

        let mut zone_ids = HashSet::new();
        for zone in &self.capture_zones {
            if !zone_ids.insert(zone.id) {
                return Err(format!("duplicate capture zone id {}", zone.id));
            }
            if !team_ids.contains(&zone.team) {
                return Err(format!(
                    "capture zone {} references unknown team {}",
                    zone.id, zone.team
                ));
            }
        }

        if self.target_score == 0 {
            return Err("target_score must be > 0".to_string());
        }
        if !self.pickup_delay.is_finite() || self.pickup_delay < 0.0 {
            return Err("pickup_delay must be finite and >= 0".to_string());
        }
        if !self.auto_return_delay.is_finite() || self.auto_return_delay <= 0.0 {
            return Err("auto_return_delay must be finite and > 0".to_string());
        }

        let throw = &self.throw;
        if !throw.sample_rate.is_finite() || throw.sample_rate <= 0.0 {
            return Err("throw.sample_rate must be finite and > 0".to_string());
        }
        if !throw.max_distance.is_finite() || throw.max_distance <= 0.0 {
            return Err("throw.max_distance must be finite and > 0".to_string());
        }
        if !throw.gravity.is_finite() {
            return Err("throw.gravity must be finite".to_string());
        }
        if throw.max_steps == 0 {
            return Err("throw.max_steps must be > 0".to_string());
        }

        let probe = &self.spawn_probe;
        if probe.direction_count == 0 {
            return Err("spawn_probe.direction_count must be > 0".to_string());
        }
        if !probe.probe_radius.is_finite() || probe.probe_radius <= 0.0 {
            return Err("spawn_probe.probe_radius must be finite and > 0".to_string());
        }
        if !probe.ground_probe_distance.is_finite() || probe.ground_probe_distance <= 0.0 {
            return Err("spawn_probe.ground_probe_distance must be finite and > 0".to_string());
        }

        let animation = &self.animation;
        if animation.min_buffer_size == 0 {
            return Err("animation.min_buffer_size must be > 0".to_string());
        }
        if let Some(speed) = animation.speed {
            if !speed.is_finite() || speed <= 0.0 {
                return Err("animation.speed must be finite and > 0".to_string());
            }
        }
        if !animation.min_segment_duration.is_finite() || animation.min_segment_duration < 0.0 {
            return Err("animation.min_segment_duration must be finite and >= 0".to_string());
        }

        Ok(())
    }

    pub fn team(&self, id: u32) -> Option<&TeamConfig> {
        self.teams.iter().find(|t| t.id == id)
    }
}
