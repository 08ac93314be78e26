use ctf_shared::protocol::{PlayerId, TeamId};
use ctf_shared::vec3::{horizontal_direction, normalize, Vec3};

/// Last known state of a player as reported by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    pub id: PlayerId,
    pub team: TeamId,
    pub position: Vec3,
    pub velocity: Vec3,
    /// Unit view direction
    pub facing: Vec3,
    pub alive: bool,
}

impl Player {
    pub fn new(id: PlayerId, team: TeamId) -> Self {
        Self {
            id,
            team,
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            facing: horizontal_direction(0.0),
            alive: true,
        }
    }

    /// Apply a movement report. A zero facing keeps the previous one.
    pub fn update_motion(&mut self, position: Vec3, velocity: Vec3, facing: Vec3) {
        self.position = position;
        self.velocity = velocity;
        let facing = normalize(facing);
        if facing != Vec3::ZERO {
            self.facing = facing;
        }
        self.alive = true;
    }
}
