//! Stepped ballistic integration verified against the world by ray casts.
//!
//! [`ProjectileSimulator`] is a pull-based producer: every call to
//! [`ProjectileSimulator::next_sample`] advances the integration only as far as
//! needed to hand out one more [`TrajectorySample`]. Streamed playback wraps it
//! in a `Stream`; [`ProjectileSimulator::simulate_blocking`] drains the very same
//! producer when only the outcome matters.

use std::collections::VecDeque;
use std::sync::Arc;

use ctf_shared::config::ThrowConfig;
use ctf_shared::vec3::{add, distance, lerp, scale, Vec3};
use futures_util::stream::{self, Stream};

use crate::raycast::Raycaster;
use crate::spawn_validator::LandingRefiner;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrajectorySample {
    pub position: Vec3,
    /// Ray that verified the segment this sample lies on. `None` for
    /// synthesized ground-clamp impacts and landing-refinement bridges.
    pub source_ray_id: Option<u64>,
    pub hit: bool,
    pub hit_normal: Option<Vec3>,
    pub is_final: bool,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SimulationError {
    #[error("invalid projectile parameters: {0}")]
    InvalidParameters(String),
}

#[derive(Debug, Clone)]
pub struct ProjectileParams {
    pub origin: Vec3,
    pub initial_velocity: Vec3,
    pub max_distance: f64,
    /// Physics steps per second
    pub sample_rate: f64,
    pub gravity: f64,
    pub interpolation_steps: u32,
    pub min_height: Option<f64>,
    pub max_steps: u32,
    pub refine_threshold: f64,
    pub bridge_samples: u32,
}

impl ProjectileParams {
    /// Parameters for a throw from `origin` using the configured physics.
    pub fn from_config(origin: Vec3, initial_velocity: Vec3, config: &ThrowConfig) -> Self {
        Self {
            origin,
            initial_velocity,
            max_distance: config.max_distance,
            sample_rate: config.sample_rate,
            gravity: config.gravity,
            interpolation_steps: config.interpolation_steps,
            min_height: config.min_height,
            max_steps: config.max_steps,
            refine_threshold: config.refine_threshold,
            bridge_samples: config.bridge_samples,
        }
    }

    fn validate(&self) -> Result<(), SimulationError> {
        if !self.origin.is_finite() || !self.initial_velocity.is_finite() {
            return Err(SimulationError::InvalidParameters(
                "origin and velocity must be finite".to_string(),
            ));
        }
        if !self.sample_rate.is_finite() || self.sample_rate <= 0.0 {
            return Err(SimulationError::InvalidParameters(
                "sample_rate must be finite and > 0".to_string(),
            ));
        }
        if !self.max_distance.is_finite() || self.max_distance <= 0.0 {
            return Err(SimulationError::InvalidParameters(
                "max_distance must be finite and > 0".to_string(),
            ));
        }
        if !self.gravity.is_finite() {
            return Err(SimulationError::InvalidParameters(
                "gravity must be finite".to_string(),
            ));
        }
        if self.max_steps == 0 {
            return Err(SimulationError::InvalidParameters(
                "max_steps must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Outcome of a fully drained simulation.
#[derive(Debug, Clone)]
pub struct Trajectory {
    pub samples: Vec<TrajectorySample>,
    pub final_sample: TrajectorySample,
    pub traveled: f64,
}

impl Trajectory {
    pub fn landed(&self) -> bool {
        self.final_sample.hit
    }
}

pub struct ProjectileSimulator {
    raycaster: Raycaster,
    refiner: Option<Arc<dyn LandingRefiner>>,
    params: ProjectileParams,
    position: Vec3,
    velocity: Vec3,
    traveled: f64,
    steps: u32,
    pending: VecDeque<TrajectorySample>,
    finished: bool,
}

impl ProjectileSimulator {
    pub fn new(raycaster: Raycaster, params: ProjectileParams) -> Result<Self, SimulationError> {
        params.validate()?;
        Ok(Self {
            raycaster,
            refiner: None,
            position: params.origin,
            velocity: params.initial_velocity,
            params,
            traveled: 0.0,
            steps: 0,
            pending: VecDeque::new(),
            finished: false,
        })
    }

    pub fn with_refiner(mut self, refiner: Arc<dyn LandingRefiner>) -> Self {
        self.refiner = Some(refiner);
        self
    }

    /// Path length covered so far
    pub fn traveled(&self) -> f64 {
        self.traveled
    }

    /// Next sample, or `None` once the final sample has been handed out.
    pub async fn next_sample(&mut self) -> Option<TrajectorySample> {
        while self.pending.is_empty() && !self.finished {
            self.step().await;
        }
        self.pending.pop_front()
    }

    pub fn into_stream(self) -> impl Stream<Item = TrajectorySample> + Send {
        stream::unfold(self, |mut sim| async move {
            let sample = sim.next_sample().await?;
            Some((sample, sim))
        })
    }

    /// Run to completion and return every sample plus the terminal one.
    pub async fn simulate_blocking(mut self) -> Trajectory {
        let mut samples = Vec::new();
        while let Some(sample) = self.next_sample().await {
            samples.push(sample);
        }
        let final_sample = samples.last().copied().unwrap_or(TrajectorySample {
            position: self.position,
            source_ray_id: None,
            hit: false,
            hit_normal: None,
            is_final: true,
        });
        Trajectory {
            samples,
            final_sample,
            traveled: self.traveled,
        }
    }

    /// Advance one physics step, queueing the samples it produces.
    async fn step(&mut self) {
        let dt = 1.0 / self.params.sample_rate;
        self.velocity.y -= self.params.gravity * dt;
        let next = add(self.position, scale(self.velocity, dt));
        self.steps += 1;

        if let Some(min_height) = self.params.min_height {
            if next.y < min_height {
                let drop = self.position.y - next.y;
                let t = if self.position.y > min_height && drop > 1e-12 {
                    ((self.position.y - min_height) / drop).clamp(0.0, 1.0)
                } else {
                    0.0
                };
                let impact = lerp(self.position, next, t);
                self.land(impact, Some(Vec3::UP), None).await;
                return;
            }
        }

        // A stationary projectile has nothing to verify.
        let ray_id = if distance(self.position, next) < 1e-9 {
            None
        } else {
            match self.raycaster.cast(self.position, next).await {
                Ok(result) if result.hit => {
                    self.land(result.point, result.normal, Some(result.id)).await;
                    return;
                }
                Ok(result) => Some(result.id),
                Err(e) => {
                    tracing::warn!("Trajectory cast failed, ending throw: {}", e);
                    self.push_final_miss(self.position, None);
                    return;
                }
            }
        };

        self.push_substeps(self.position, next, ray_id);
        self.traveled += distance(self.position, next);
        self.position = next;

        if self.traveled >= self.params.max_distance || self.steps >= self.params.max_steps {
            self.push_final_miss(next, ray_id);
        } else {
            self.pending.push_back(TrajectorySample {
                position: next,
                source_ray_id: ray_id,
                hit: false,
                hit_normal: None,
                is_final: false,
            });
        }
    }

    async fn land(&mut self, impact: Vec3, normal: Option<Vec3>, ray_id: Option<u64>) {
        self.push_substeps(self.position, impact, ray_id);
        self.traveled += distance(self.position, impact);
        self.position = impact;

        let refined = match &self.refiner {
            Some(refiner) => refiner.refine(impact).await,
            None => impact,
        };

        if distance(impact, refined) > self.params.refine_threshold {
            self.pending.push_back(TrajectorySample {
                position: impact,
                source_ray_id: ray_id,
                hit: true,
                hit_normal: normal,
                is_final: false,
            });
            let bridges = self.params.bridge_samples;
            for i in 1..=bridges {
                let t = i as f64 / (bridges + 1) as f64;
                self.pending.push_back(TrajectorySample {
                    position: lerp(impact, refined, t),
                    source_ray_id: None,
                    hit: false,
                    hit_normal: None,
                    is_final: false,
                });
            }
        }

        self.pending.push_back(TrajectorySample {
            position: refined,
            source_ray_id: ray_id,
            hit: true,
            hit_normal: normal,
            is_final: true,
        });
        self.position = refined;
        self.finished = true;
    }

    fn push_substeps(&mut self, from: Vec3, to: Vec3, ray_id: Option<u64>) {
        let count = self.params.interpolation_steps;
        for i in 1..=count {
            let t = i as f64 / (count + 1) as f64;
            self.pending.push_back(TrajectorySample {
                position: lerp(from, to, t),
                source_ray_id: ray_id,
                hit: false,
                hit_normal: None,
                is_final: false,
            });
        }
    }

    fn push_final_miss(&mut self, position: Vec3, ray_id: Option<u64>) {
        self.pending.push_back(TrajectorySample {
            position,
            source_ray_id: ray_id,
            hit: false,
            hit_normal: None,
            is_final: true,
        });
        self.finished = true;
    }
}

/// Streamed trajectory for animated playback.
pub fn simulate(
    raycaster: Raycaster,
    params: ProjectileParams,
    refiner: Option<Arc<dyn LandingRefiner>>,
) -> Result<impl Stream<Item = TrajectorySample> + Send, SimulationError> {
    let mut sim = ProjectileSimulator::new(raycaster, params)?;
    if let Some(refiner) = refiner {
        sim = sim.with_refiner(refiner);
    }
    Ok(sim.into_stream())
}

/// Same integration as [`simulate`], drained internally.
pub async fn simulate_blocking(
    raycaster: Raycaster,
    params: ProjectileParams,
    refiner: Option<Arc<dyn LandingRefiner>>,
) -> Result<Trajectory, SimulationError> {
    let mut sim = ProjectileSimulator::new(raycaster, params)?;
    if let Some(refiner) = refiner {
        sim = sim.with_refiner(refiner);
    }
    Ok(sim.simulate_blocking().await)
}
