//! Outbound side of the host-engine boundary.
//!
//! Everything the mode asks of the engine is a fire-and-forget [`ModeCommand`]
//! pushed into an unbounded channel; the websocket bridge drains it. UI and icon
//! managers are reached through the narrow capability traits below so callers
//! only depend on what they actually drive.

use ctf_shared::protocol::{GameEvent, ModeCommand, ObjectId, PlayerId, PropKind, TeamId};
use ctf_shared::vec3::Vec3;
use tokio::sync::mpsc;

/// Something with a world position that can be moved by id.
pub trait Positionable {
    fn set_position(&self, id: u32, position: Vec3);
}

/// Something that can be shown or hidden by id.
pub trait Toggleable {
    fn set_enabled(&self, id: u32, enabled: bool);
}

/// Something that can be tinted by id.
pub trait Colorable {
    fn set_color(&self, id: u32, color: u32);
}

/// Cloneable handle for issuing engine commands.
#[derive(Clone, Debug)]
pub struct EngineSink {
    tx: mpsc::UnboundedSender<ModeCommand>,
}

impl EngineSink {
    pub fn new(tx: mpsc::UnboundedSender<ModeCommand>) -> Self {
        Self { tx }
    }

    /// Sink plus the receiving end the bridge (or a test) drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ModeCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn send(&self, command: ModeCommand) {
        if self.tx.send(command).is_err() {
            tracing::trace!("Engine command dropped, no receiver");
        }
    }

    pub fn cast_ray(&self, start: Vec3, end: Vec3) {
        self.send(ModeCommand::CastRay { start, end });
    }

    pub fn spawn_flag_prop(&self, object_id: ObjectId, team: TeamId, position: Vec3) {
        self.send(ModeCommand::SpawnObject {
            object_id,
            kind: PropKind::Flag,
            team,
            position,
            rotation: Vec3::ZERO,
        });
    }

    pub fn move_object(&self, object_id: ObjectId, position: Vec3, rotation: Vec3, duration: f64) {
        self.send(ModeCommand::MoveObject {
            object_id,
            position,
            rotation,
            duration,
        });
    }

    pub fn despawn_object(&self, object_id: ObjectId) {
        self.send(ModeCommand::DespawnObject { object_id });
    }

    pub fn force_melee_loadout(&self, player_id: PlayerId) {
        self.send(ModeCommand::ForceMeleeLoadout { player_id });
    }

    pub fn restore_loadout(&self, player_id: PlayerId) {
        self.send(ModeCommand::RestoreLoadout { player_id });
    }

    pub fn announce(&self, event: GameEvent) {
        self.send(ModeCommand::Announce { event });
    }
}

impl Positionable for EngineSink {
    fn set_position(&self, id: u32, position: Vec3) {
        self.send(ModeCommand::SetIconPosition {
            icon_id: id,
            position,
        });
    }
}

impl Toggleable for EngineSink {
    fn set_enabled(&self, id: u32, enabled: bool) {
        self.send(ModeCommand::SetIconEnabled {
            icon_id: id,
            enabled,
        });
    }
}

impl Colorable for EngineSink {
    fn set_color(&self, id: u32, color: u32) {
        self.send(ModeCommand::SetIconColor {
            icon_id: id,
            color,
        });
    }
}
