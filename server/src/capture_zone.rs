use ctf_shared::config::CaptureZoneConfig;
use ctf_shared::protocol::{FlagId, PlayerId, TeamId, ZoneId};

use crate::engine::{Colorable, Toggleable};
use crate::flag::Flag;

/// Outcome of a player entering a capture zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureDecision {
    /// Every listed flag is scored and sent home
    Capture(Vec<FlagId>),
    /// Zone belongs to another team
    WrongTeam,
    /// Player carries no enemy flag
    NothingCarried,
    /// One of the zone team's own flags is not at home
    OwnFlagAway,
}

#[derive(Debug, Clone)]
pub struct CaptureZone {
    pub id: ZoneId,
    pub team: TeamId,
    pub icon_ids: Vec<u32>,
}

impl CaptureZone {
    pub fn new(config: &CaptureZoneConfig) -> Self {
        Self {
            id: config.id,
            team: config.team,
            icon_ids: config.icon_ids.clone(),
        }
    }

    /// Decide whether `player` (on `player_team`) scores by entering this zone.
    pub fn evaluate<'a>(
        &self,
        player: PlayerId,
        player_team: TeamId,
        flags: impl IntoIterator<Item = &'a Flag>,
    ) -> CaptureDecision {
        if player_team != self.team {
            return CaptureDecision::WrongTeam;
        }

        let mut captured = Vec::new();
        let mut own_flag_away = false;
        for flag in flags {
            if flag.team == self.team {
                own_flag_away |= !flag.is_at_home();
            } else if flag.carrier() == Some(player) {
                captured.push(flag.id);
            }
        }

        if captured.is_empty() {
            CaptureDecision::NothingCarried
        } else if own_flag_away {
            CaptureDecision::OwnFlagAway
        } else {
            CaptureDecision::Capture(captured)
        }
    }

    pub fn show_icons<U: Toggleable + Colorable>(&self, ui: &U, color: u32) {
        for &icon in &self.icon_ids {
            ui.set_color(icon, color);
            ui.set_enabled(icon, true);
        }
    }

    pub fn hide_icons<U: Toggleable>(&self, ui: &U) {
        for &icon in &self.icon_ids {
            ui.set_enabled(icon, false);
        }
    }
}
