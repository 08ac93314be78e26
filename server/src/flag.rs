//! Authoritative state of a single flag.
//!
//! `Flag` only records transitions. Side effects (engine props, loadouts,
//! icons, timers, throws) are driven by `GameState` from what these methods
//! return, so every transition here is synchronous and testable on its own.

use ctf_shared::config::FlagConfig;
use ctf_shared::protocol::{FlagId, FlagSnapshot, FlagStatus, ObjectId, PlayerId, TeamId};
use ctf_shared::vec3::Vec3;
use tokio::time::{Duration, Instant};

use crate::path_animation::AnimationHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagState {
    AtHome,
    Carried { carrier: PlayerId },
    Dropped,
}

/// Identifies one drop. Anything scheduled for that drop (landing, pickup
/// delay, auto-return) must present the ticket and is ignored once the flag
/// has moved on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DropTicket {
    pub generation: u64,
    pub pickup_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PickupRejected {
    #[error("flag is not eligible for pickup yet")]
    NotEligible,
    #[error("flag is already carried")]
    AlreadyCarried,
    #[error("player already carries a flag")]
    MultiCarryDisabled,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlagPickup {
    pub was_at_home: bool,
    /// Resting prop to despawn, if one was in the world
    pub prop: Option<ObjectId>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlagDrop {
    pub previous_carrier: PlayerId,
    pub ticket: DropTicket,
}

#[derive(Debug)]
pub struct Flag {
    pub id: FlagId,
    pub team: TeamId,
    pub home: Vec3,
    pub icon_id: u32,
    position: Vec3,
    state: FlagState,
    pickup_eligible: bool,
    pickup_count: u32,
    last_carrier: Option<PlayerId>,
    drop_timestamp: Option<Instant>,
    auto_return_deadline: Option<Instant>,
    generation: u64,
    prop: Option<ObjectId>,
    in_flight: Option<AnimationHandle>,
}

impl Flag {
    pub fn new(config: &FlagConfig) -> Self {
        Self {
            id: config.id,
            team: config.team,
            home: config.home,
            icon_id: config.icon_id,
            position: config.home,
            state: FlagState::AtHome,
            pickup_eligible: true,
            pickup_count: 0,
            last_carrier: None,
            drop_timestamp: None,
            auto_return_deadline: None,
            generation: 0,
            prop: None,
            in_flight: None,
        }
    }

    pub fn state(&self) -> FlagState {
        self.state
    }

    pub fn carrier(&self) -> Option<PlayerId> {
        match self.state {
            FlagState::Carried { carrier } => Some(carrier),
            _ => None,
        }
    }

    pub fn is_at_home(&self) -> bool {
        self.state == FlagState::AtHome
    }

    pub fn is_dropped(&self) -> bool {
        self.state == FlagState::Dropped
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn pickup_eligible(&self) -> bool {
        self.pickup_eligible
    }

    pub fn pickup_count(&self) -> u32 {
        self.pickup_count
    }

    pub fn last_carrier(&self) -> Option<PlayerId> {
        self.last_carrier
    }

    pub fn drop_timestamp(&self) -> Option<Instant> {
        self.drop_timestamp
    }

    pub fn auto_return_deadline(&self) -> Option<Instant> {
        self.auto_return_deadline
    }

    pub fn prop(&self) -> Option<ObjectId> {
        self.prop
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Record the prop now representing the flag in the world.
    pub fn set_prop(&mut self, object_id: ObjectId) {
        self.prop = Some(object_id);
    }

    pub fn take_prop(&mut self) -> Option<ObjectId> {
        self.prop.take()
    }

    /// Track the carrier. Ignored unless carried.
    pub fn follow_carrier(&mut self, position: Vec3) {
        if matches!(self.state, FlagState::Carried { .. }) {
            self.position = position;
        }
    }

    /// Bind the flag to `player`. `player_carrying` tells whether the player
    /// already carries another flag.
    pub fn pickup(
        &mut self,
        player: PlayerId,
        player_carrying: bool,
        allow_multi_carry: bool,
    ) -> Result<FlagPickup, PickupRejected> {
        if matches!(self.state, FlagState::Carried { .. }) {
            return Err(PickupRejected::AlreadyCarried);
        }
        if !self.pickup_eligible {
            return Err(PickupRejected::NotEligible);
        }
        if player_carrying && !allow_multi_carry {
            return Err(PickupRejected::MultiCarryDisabled);
        }

        let was_at_home = self.is_at_home();
        self.pickup_count += 1;
        self.generation += 1;
        self.state = FlagState::Carried { carrier: player };
        self.last_carrier = Some(player);
        self.drop_timestamp = None;
        self.auto_return_deadline = None;
        self.in_flight = None;

        Ok(FlagPickup {
            was_at_home,
            prop: self.prop.take(),
        })
    }

    /// Release the flag at `position`. Returns `None` unless carried.
    /// Pickup stays disabled until the pickup delay of this drop has elapsed.
    pub fn drop_at(&mut self, position: Vec3, now: Instant) -> Option<FlagDrop> {
        let FlagState::Carried { carrier } = self.state else {
            return None;
        };

        self.generation += 1;
        self.state = FlagState::Dropped;
        self.pickup_eligible = false;
        self.position = position;
        self.drop_timestamp = Some(now);
        self.auto_return_deadline = None;

        Some(FlagDrop {
            previous_carrier: carrier,
            ticket: self.ticket(),
        })
    }

    fn ticket(&self) -> DropTicket {
        DropTicket {
            generation: self.generation,
            pickup_count: self.pickup_count,
        }
    }

    pub fn ticket_is_current(&self, ticket: DropTicket) -> bool {
        self.is_dropped()
            && ticket.generation == self.generation
            && ticket.pickup_count == self.pickup_count
    }

    /// Keep the animation handle of an arc throw so a reset can stop it.
    pub fn set_in_flight(&mut self, ticket: DropTicket, handle: AnimationHandle) {
        if self.ticket_is_current(ticket) {
            self.in_flight = Some(handle);
        }
    }

    /// The dropped flag came to rest. Returns false for a stale ticket.
    pub fn land(
        &mut self,
        ticket: DropTicket,
        position: Vec3,
        now: Instant,
        auto_return_delay: Duration,
    ) -> bool {
        if !self.ticket_is_current(ticket) {
            return false;
        }
        self.position = position;
        self.in_flight = None;
        self.auto_return_deadline = Some(now + auto_return_delay);
        true
    }

    /// End of the pickup delay for the drop `ticket` belongs to.
    pub fn enable_pickup(&mut self, ticket: DropTicket) -> bool {
        if !self.ticket_is_current(ticket) {
            return false;
        }
        self.pickup_eligible = true;
        self.last_carrier = None;
        true
    }

    /// Back to `AtHome`. Idempotent. Returns the carrier that was released,
    /// if any. Outstanding tickets become stale.
    pub fn reset(&mut self) -> Option<PlayerId> {
        let released = self.carrier();
        if let Some(handle) = self.in_flight.take() {
            handle.cancel();
        }
        self.generation += 1;
        self.state = FlagState::AtHome;
        self.position = self.home;
        self.pickup_eligible = true;
        self.last_carrier = None;
        self.drop_timestamp = None;
        self.auto_return_deadline = None;
        released
    }

    pub fn snapshot(&self) -> FlagSnapshot {
        let status = match self.state {
            FlagState::AtHome => FlagStatus::AtHome,
            FlagState::Carried { .. } => FlagStatus::Carried,
            FlagState::Dropped => FlagStatus::Dropped,
        };
        FlagSnapshot {
            id: self.id,
            team: self.team,
            status,
            carrier: self.carrier(),
            last_carrier: self.last_carrier,
            pickup_eligible: self.pickup_eligible,
            pickup_count: self.pickup_count,
            position: self.position,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctf_shared::vec3::vec3;

    fn flag() -> Flag {
        Flag::new(&FlagConfig {
            id: 1,
            team: 2,
            home: vec3(10.0, 0.0, 0.0),
            icon_id: 101,
        })
    }

    fn carried_by(player: PlayerId) -> Flag {
        let mut f = flag();
        f.pickup(player, false, false).unwrap();
        f
    }

    fn assert_consistent(f: &Flag) {
        assert_eq!(f.carrier().is_some(), matches!(f.state(), FlagState::Carried { .. }));
    }

    #[test]
    fn starts_at_home_and_eligible() {
        let f = flag();
        assert!(f.is_at_home());
        assert!(f.pickup_eligible());
        assert_eq!(f.position(), f.home);
        assert_eq!(f.carrier(), None);
    }

    #[test]
    fn pickup_from_home() {
        let mut f = flag();
        f.set_prop(7);
        let pickup = f.pickup(5, false, false).unwrap();
        assert!(pickup.was_at_home);
        assert_eq!(pickup.prop, Some(7));
        assert_eq!(f.carrier(), Some(5));
        assert_eq!(f.pickup_count(), 1);
        assert_eq!(f.last_carrier(), Some(5));
        assert_consistent(&f);
    }

    #[test]
    fn pickup_rejections() {
        let mut f = carried_by(5);
        assert_eq!(f.pickup(6, false, false), Err(PickupRejected::AlreadyCarried));

        let mut f = flag();
        assert_eq!(f.pickup(6, true, false), Err(PickupRejected::MultiCarryDisabled));
        assert!(f.pickup(6, true, true).is_ok());

        let mut f = carried_by(5);
        f.drop_at(vec3(1.0, 0.0, 1.0), Instant::now()).unwrap();
        assert_eq!(f.pickup(6, false, false), Err(PickupRejected::NotEligible));
        assert_eq!(f.pickup_count(), 1);
    }

    #[test]
    fn drop_only_when_carried() {
        let mut f = flag();
        assert!(f.drop_at(vec3(1.0, 0.0, 1.0), Instant::now()).is_none());
        assert!(f.is_at_home());

        let mut f = carried_by(5);
        let drop = f.drop_at(vec3(1.0, 0.0, 1.0), Instant::now()).unwrap();
        assert_eq!(drop.previous_carrier, 5);
        assert_eq!(drop.ticket.pickup_count, 1);
        assert!(f.is_dropped());
        assert!(!f.pickup_eligible());
        assert_eq!(f.position(), vec3(1.0, 0.0, 1.0));
        assert!(f.drop_timestamp().is_some());
        assert_consistent(&f);
    }

    #[test]
    fn landing_sets_deadline_and_position() {
        let mut f = carried_by(5);
        let now = Instant::now();
        let drop = f.drop_at(vec3(1.0, 2.0, 1.0), now).unwrap();
        assert!(f.land(drop.ticket, vec3(2.0, 0.0, 1.0), now, Duration::from_secs(30)));
        assert_eq!(f.position(), vec3(2.0, 0.0, 1.0));
        assert_eq!(f.auto_return_deadline(), Some(now + Duration::from_secs(30)));
    }

    #[test]
    fn stale_ticket_after_repickup() {
        let mut f = carried_by(5);
        let first = f.drop_at(vec3(1.0, 0.0, 0.0), Instant::now()).unwrap().ticket;
        assert!(f.enable_pickup(first));
        f.pickup(6, false, false).unwrap();
        let second = f.drop_at(vec3(2.0, 0.0, 0.0), Instant::now()).unwrap().ticket;

        assert_ne!(first, second);
        assert!(!f.ticket_is_current(first));
        assert!(!f.enable_pickup(first));
        assert!(!f.pickup_eligible());
        assert!(!f.land(first, Vec3::ZERO, Instant::now(), Duration::from_secs(1)));
        assert_eq!(f.position(), vec3(2.0, 0.0, 0.0));
        assert!(f.ticket_is_current(second));
    }

    #[test]
    fn enable_pickup_clears_last_carrier() {
        let mut f = carried_by(5);
        let ticket = f.drop_at(Vec3::ZERO, Instant::now()).unwrap().ticket;
        assert_eq!(f.last_carrier(), Some(5));
        assert!(f.enable_pickup(ticket));
        assert!(f.pickup_eligible());
        assert_eq!(f.last_carrier(), None);
        // Still the same drop, so the ticket stays valid for auto-return
        assert!(f.ticket_is_current(ticket));
    }

    #[test]
    fn reset_is_idempotent_and_invalidates_tickets() {
        let mut f = carried_by(5);
        let ticket = f.drop_at(vec3(4.0, 0.0, 4.0), Instant::now()).unwrap().ticket;
        let handle = AnimationHandle::new();
        f.set_in_flight(ticket, handle.clone());

        assert_eq!(f.reset(), None);
        assert!(handle.is_cancelled());
        assert!(!f.in_flight());
        assert!(f.is_at_home());
        assert_eq!(f.position(), f.home);
        assert!(f.pickup_eligible());
        assert!(!f.ticket_is_current(ticket));

        assert_eq!(f.reset(), None);
        assert!(f.is_at_home());
        assert_consistent(&f);
    }

    #[test]
    fn reset_releases_carrier() {
        let mut f = carried_by(9);
        assert_eq!(f.reset(), Some(9));
        assert_eq!(f.carrier(), None);
        assert_consistent(&f);
    }

    #[test]
    fn follow_carrier_only_while_carried() {
        let mut f = carried_by(5);
        f.follow_carrier(vec3(3.0, 1.0, 3.0));
        assert_eq!(f.position(), vec3(3.0, 1.0, 3.0));
        f.reset();
        f.follow_carrier(vec3(9.0, 9.0, 9.0));
        assert_eq!(f.position(), f.home);
    }

    #[test]
    fn snapshot_reflects_state() {
        let mut f = carried_by(5);
        let snap = f.snapshot();
        assert_eq!(snap.status, FlagStatus::Carried);
        assert_eq!(snap.carrier, Some(5));
        f.drop_at(Vec3::ZERO, Instant::now());
        let snap = f.snapshot();
        assert_eq!(snap.status, FlagStatus::Dropped);
        assert_eq!(snap.carrier, None);
        assert_eq!(snap.last_carrier, Some(5));
        assert!(!snap.pickup_eligible);
        assert_eq!(snap.pickup_count, 1);
    }
}
