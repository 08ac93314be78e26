use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::config::GameModeConfig;
use crate::vec3::Vec3;

/// Protocol version - increment when making breaking changes.
pub const PROTOCOL_VERSION: u32 = 1;

pub type PlayerId = u32;
pub type TeamId = u32;
pub type FlagId = u32;
pub type ZoneId = u32;
pub type ObjectId = u32;

// === Engine -> Mode ===

/// Notifications delivered by the host engine.
///
/// Ray-cast notifications carry no request id: they answer the casts in the
/// order the mode issued them.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../engine-shim/src/generated/")]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    RayCastHit {
        point: Vec3,
        #[serde(default)]
        normal: Option<Vec3>,
    },
    RayCastMissed,
    #[serde(rename_all = "camelCase")]
    PlayerJoined { player_id: PlayerId, team: TeamId },
    #[serde(rename_all = "camelCase")]
    PlayerLeft { player_id: PlayerId },
    #[serde(rename_all = "camelCase")]
    PlayerDied { player_id: PlayerId },
    #[serde(rename_all = "camelCase")]
    PlayerMoved {
        player_id: PlayerId,
        position: Vec3,
        #[serde(default)]
        velocity: Vec3,
        #[serde(default)]
        facing: Vec3,
    },
    #[serde(rename_all = "camelCase")]
    InteractFlag { player_id: PlayerId, flag_id: FlagId },
    #[serde(rename_all = "camelCase")]
    EnterCaptureZone { player_id: PlayerId, zone_id: ZoneId },
    #[serde(rename_all = "camelCase")]
    ExitCaptureZone { player_id: PlayerId, zone_id: ZoneId },
    #[serde(rename_all = "camelCase")]
    EnteredVehicle { player_id: PlayerId },
    #[serde(rename_all = "camelCase")]
    DropRequested { player_id: PlayerId },
}

// === Mode -> Engine ===

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../engine-shim/src/generated/")]
#[serde(rename_all = "snake_case")]
pub enum PropKind {
    Flag,
}

/// Fire-and-forget commands for the host engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../engine-shim/src/generated/")]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModeCommand {
    CastRay {
        start: Vec3,
        end: Vec3,
    },
    #[serde(rename_all = "camelCase")]
    SpawnObject {
        object_id: ObjectId,
        kind: PropKind,
        team: TeamId,
        position: Vec3,
        rotation: Vec3,
    },
    /// Move over `duration` seconds. Rotation is (pitch, yaw, roll) in radians.
    #[serde(rename_all = "camelCase")]
    MoveObject {
        object_id: ObjectId,
        position: Vec3,
        rotation: Vec3,
        duration: f64,
    },
    #[serde(rename_all = "camelCase")]
    DespawnObject { object_id: ObjectId },
    #[serde(rename_all = "camelCase")]
    ForceMeleeLoadout { player_id: PlayerId },
    #[serde(rename_all = "camelCase")]
    RestoreLoadout { player_id: PlayerId },
    #[serde(rename_all = "camelCase")]
    SetIconPosition { icon_id: u32, position: Vec3 },
    #[serde(rename_all = "camelCase")]
    SetIconEnabled { icon_id: u32, enabled: bool },
    #[serde(rename_all = "camelCase")]
    SetIconColor { icon_id: u32, color: u32 },
    Announce { event: GameEvent },
    #[serde(rename_all = "camelCase")]
    MatchEnded { winning_team: TeamId },
}

/// Match events, announced to the engine (UI, VO) and to local observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../engine-shim/src/generated/")]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GameEvent {
    #[serde(rename_all = "camelCase")]
    FlagTaken {
        flag_id: FlagId,
        player_id: PlayerId,
        was_at_home: bool,
    },
    #[serde(rename_all = "camelCase")]
    FlagDropped {
        flag_id: FlagId,
        previous_carrier: PlayerId,
        position: Vec3,
    },
    #[serde(rename_all = "camelCase")]
    FlagReturned {
        flag_id: FlagId,
        was_auto_returned: bool,
    },
    #[serde(rename_all = "camelCase")]
    FlagCaptured {
        flag_id: FlagId,
        player_id: PlayerId,
        team: TeamId,
    },
    #[serde(rename_all = "camelCase")]
    ScoreChanged { team: TeamId, score: u32 },
    #[serde(rename_all = "camelCase")]
    MatchEnded { winning_team: TeamId },
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../engine-shim/src/generated/")]
#[serde(rename_all = "camelCase")]
pub struct WelcomeMsg {
    pub protocol_version: u32,
    pub config: GameModeConfig,
}

/// Envelope for everything the mode sends over the engine bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum ModeMsg {
    Welcome(WelcomeMsg),
    Command(ModeCommand),
}

// === Diagnostics ===

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../engine-shim/src/generated/")]
#[serde(rename_all = "snake_case")]
pub enum FlagStatus {
    AtHome,
    Carried,
    Dropped,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../engine-shim/src/generated/")]
#[serde(rename_all = "camelCase")]
pub struct FlagSnapshot {
    pub id: FlagId,
    pub team: TeamId,
    pub status: FlagStatus,
    pub carrier: Option<PlayerId>,
    /// Who dropped it, until the pickup delay runs out
    pub last_carrier: Option<PlayerId>,
    pub pickup_eligible: bool,
    pub pickup_count: u32,
    pub position: Vec3,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../engine-shim/src/generated/")]
#[serde(rename_all = "camelCase")]
pub struct ScoreWire {
    pub team: TeamId,
    pub score: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../engine-shim/src/generated/")]
#[serde(rename_all = "camelCase")]
pub struct MatchSnapshot {
    pub flags: Vec<FlagSnapshot>,
    pub scores: Vec<ScoreWire>,
    pub winner: Option<TeamId>,
}

impl MatchSnapshot {
    pub fn flag(&self, id: FlagId) -> Option<&FlagSnapshot> {
        self.flags.iter().find(|f| f.id == id)
    }

    pub fn score(&self, team: TeamId) -> u32 {
        self.scores
            .iter()
            .find(|s| s.team == team)
            .map(|s| s.score)
            .unwrap_or(0)
    }
}
