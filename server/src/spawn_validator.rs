//! Landing-spot validation by radial probing.
//!
//! A candidate point is pushed out of nearby geometry by casting a ring of
//! horizontal probes and averaging the penetration of every probe that hits,
//! then snapped onto the ground with one downward probe. This is a
//! convergence heuristic: after `max_iterations` the position is accepted even
//! if probes still hit something.

use ctf_shared::config::SpawnProbeConfig;
use ctf_shared::vec3::{add, distance, horizontal_direction, scale, Vec3};
use futures_util::future::BoxFuture;
use std::f64::consts::TAU;

use crate::raycast::{RaycastError, Raycaster};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpawnValidation {
    pub position: Vec3,
    /// Ground was found under `position`
    pub is_valid: bool,
    /// Push-out iterations that found a collision
    pub iterations: u32,
    /// Probes still hit something when the iteration budget ran out
    pub collisions_remaining: bool,
}

/// Replaces a raw projectile impact point with a better resting spot.
pub trait LandingRefiner: Send + Sync {
    fn refine<'a>(&'a self, impact: Vec3) -> BoxFuture<'a, Vec3>;
}

#[derive(Clone)]
pub struct SpawnValidator {
    raycaster: Raycaster,
    probe: SpawnProbeConfig,
}

impl SpawnValidator {
    pub fn new(raycaster: Raycaster, probe: SpawnProbeConfig) -> Self {
        Self { raycaster, probe }
    }

    pub async fn validate(&self, center: Vec3) -> SpawnValidation {
        validate_spawn(&self.raycaster, center, &self.probe).await
    }
}

impl LandingRefiner for SpawnValidator {
    fn refine<'a>(&'a self, impact: Vec3) -> BoxFuture<'a, Vec3> {
        Box::pin(async move {
            let validation = self.validate(impact).await;
            if validation.is_valid {
                validation.position
            } else {
                tracing::debug!("No ground under landing point {:?}, keeping impact", impact);
                impact
            }
        })
    }
}

/// Cast a probe and return the hit point. Only a closed queue is an error:
/// nothing will answer later probes either.
async fn probe_hit(
    raycaster: &Raycaster,
    start: Vec3,
    end: Vec3,
) -> Result<Option<Vec3>, RaycastError> {
    match raycaster.cast(start, end).await {
        Ok(result) if result.hit => Ok(Some(result.point)),
        Ok(_) => Ok(None),
        Err(RaycastError::Closed) => Err(RaycastError::Closed),
        Err(e) => {
            tracing::warn!("Spawn probe failed: {}", e);
            Ok(None)
        }
    }
}

pub async fn validate_spawn(
    raycaster: &Raycaster,
    center: Vec3,
    probe: &SpawnProbeConfig,
) -> SpawnValidation {
    let lift = scale(Vec3::UP, probe.probe_offset);
    let direction_count = probe.direction_count.max(1);
    let mut result = SpawnValidation {
        position: center,
        is_valid: false,
        iterations: 0,
        collisions_remaining: false,
    };

    for _ in 0..probe.max_iterations {
        let origin = add(result.position, lift);
        let mut push = Vec3::ZERO;
        let mut collisions = 0u32;

        for i in 0..direction_count {
            let direction = horizontal_direction(TAU * i as f64 / direction_count as f64);
            let end = add(origin, scale(direction, probe.probe_radius));
            match probe_hit(raycaster, origin, end).await {
                Ok(Some(point)) => {
                    let depth = probe.probe_radius - distance(origin, point);
                    if depth > 0.0 {
                        push = add(push, scale(direction, -depth));
                        collisions += 1;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!("Spawn validation of {:?} stopped: {}", center, e);
                    return result;
                }
            }
        }

        if collisions == 0 {
            result.collisions_remaining = false;
            break;
        }
        result.iterations += 1;
        result.collisions_remaining = true;
        result.position = add(result.position, scale(push, 1.0 / collisions as f64));
    }

    if result.collisions_remaining {
        tracing::debug!(
            "Spawn point {:?} still colliding after {} iterations, accepting anyway",
            result.position,
            result.iterations
        );
    }

    let ground_start = add(result.position, lift);
    let ground_end = add(result.position, scale(Vec3::UP, -probe.ground_probe_distance));
    match probe_hit(raycaster, ground_start, ground_end).await {
        Ok(Some(ground)) => {
            result.position.y = ground.y;
            result.is_valid = true;
        }
        Ok(None) => {}
        Err(e) => tracing::debug!("Ground probe under {:?} stopped: {}", result.position, e),
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineSink;
    use crate::raycast::RaycastQueue;
    use crate::sim_world::{spawn_world_raycaster, World};
    use ctf_shared::vec3::vec3;

    fn probe() -> SpawnProbeConfig {
        SpawnProbeConfig {
            probe_radius: 1.0,
            probe_offset: 0.5,
            direction_count: 8,
            ground_probe_distance: 5.0,
            max_iterations: 6,
        }
    }

    #[tokio::test]
    async fn clear_spot_is_unchanged() {
        let raycaster = spawn_world_raycaster(World::flat(0.0));
        let center = vec3(3.0, 0.0, -2.0);
        let result = validate_spawn(&raycaster, center, &probe()).await;
        assert_eq!(result.position, center);
        assert!(result.is_valid);
        assert_eq!(result.iterations, 0);
        assert!(!result.collisions_remaining);
    }

    #[tokio::test]
    async fn missing_ground_is_reported_not_fatal() {
        let raycaster = spawn_world_raycaster(World::default());
        let center = vec3(1.0, 4.0, 1.0);
        let result = validate_spawn(&raycaster, center, &probe()).await;
        assert_eq!(result.position, center);
        assert!(!result.is_valid);
    }

    #[tokio::test]
    async fn spot_next_to_wall_is_pushed_out() {
        // Wall face at x = 0.5, candidate 0.5 m away from it
        let world = World::flat(0.0).with_box(vec3(0.5, 0.0, -10.0), vec3(2.0, 3.0, 10.0));
        let raycaster = spawn_world_raycaster(world);
        let result = validate_spawn(&raycaster, vec3(0.0, 0.0, 0.0), &probe()).await;

        assert!(result.iterations >= 1);
        assert!(result.position.x < 0.0, "moved away from the wall: {:?}", result.position);
        assert!(result.is_valid);
        assert_eq!(result.position.y, 0.0);
    }

    #[tokio::test]
    async fn snaps_down_to_ground() {
        let raycaster = spawn_world_raycaster(World::flat(-1.25));
        let result = validate_spawn(&raycaster, vec3(0.0, 0.0, 0.0), &probe()).await;
        assert!(result.is_valid);
        assert!((result.position.y + 1.25).abs() < 1e-9);
    }

    #[tokio::test]
    async fn corridor_too_narrow_to_clear_is_accepted_anyway() {
        // Walls at x = -0.4 and x = 0.4, both inside the probe radius
        let world = World::flat(-0.5)
            .with_box(vec3(-10.0, -0.5, -10.0), vec3(-0.4, 3.0, 10.0))
            .with_box(vec3(0.4, -0.5, -10.0), vec3(10.0, 3.0, 10.0));
        let raycaster = spawn_world_raycaster(world);
        let probe = SpawnProbeConfig {
            max_iterations: 2,
            ..probe()
        };

        let result = validate_spawn(&raycaster, vec3(0.1, 0.0, 0.0), &probe).await;

        assert_eq!(result.iterations, 2);
        assert!(result.collisions_remaining);
        // Pushed to the middle of the corridor, then snapped to the ground
        assert!(result.position.x.abs() < 1e-9, "pushed to {:?}", result.position);
        assert!(result.position.z.abs() < 1e-9);
        assert!(result.is_valid);
        assert_eq!(result.position.y, -0.5);
    }

    #[tokio::test]
    async fn closed_queue_stops_validation() {
        let (raycaster, calls) = Raycaster::channel();
        drop(calls);
        let center = vec3(2.0, 1.0, 2.0);

        let result = validate_spawn(&raycaster, center, &probe()).await;

        assert_eq!(result.position, center);
        assert!(!result.is_valid);
        assert_eq!(result.iterations, 0);
    }

    #[tokio::test]
    async fn queue_closing_mid_validation_returns_pushed_position() {
        // Answers the first ring of probes from a world with a wall, then goes away
        let world = World::flat(0.0).with_box(vec3(0.5, 0.0, -10.0), vec3(2.0, 3.0, 10.0));
        let (raycaster, mut calls) = Raycaster::channel();
        let (sink, _commands) = EngineSink::channel();
        tokio::spawn(async move {
            let mut queue = RaycastQueue::new(sink, false);
            for _ in 0..8 {
                let Some(call) = calls.recv().await else {
                    return;
                };
                let (start, end) = (call.start, call.end);
                queue.submit(call).unwrap();
                match world.cast(start, end) {
                    Some((point, normal)) => queue.on_hit(point, Some(normal)),
                    None => queue.on_miss(),
                }
            }
            // Next probe is left outstanding until the queue detaches
            if let Some(call) = calls.recv().await {
                queue.submit(call).unwrap();
                queue.detach();
            }
        });

        let result = validate_spawn(&raycaster, vec3(0.0, 0.0, 0.0), &probe()).await;

        assert!(!result.is_valid);
        assert_eq!(result.iterations, 1);
        assert!(result.position.x < 0.0, "kept the pushed position: {:?}", result.position);
    }

    #[tokio::test]
    async fn refiner_keeps_impact_when_invalid() {
        let validator = SpawnValidator::new(spawn_world_raycaster(World::default()), probe());
        let impact = vec3(5.0, 2.0, 5.0);
        assert_eq!(validator.refine(impact).await, impact);
    }

    #[tokio::test]
    async fn refiner_uses_validated_position() {
        let validator = SpawnValidator::new(spawn_world_raycaster(World::flat(0.0)), probe());
        let refined = validator.refine(vec3(5.0, 0.3, 5.0)).await;
        assert_eq!(refined, vec3(5.0, 0.0, 5.0));
    }
}
