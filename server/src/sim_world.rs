//! Minimal collision world standing in for the host engine's physics scene.
//!
//! Used by the `sim_engine` binary to answer `cast_ray` commands and by tests
//! that need deterministic ray results.

use ctf_shared::protocol::ModeCommand;
use ctf_shared::vec3::{lerp, sub, vec3, Vec3};

use crate::engine::EngineSink;
use crate::raycast::{RaycastQueue, Raycaster};

/// Axis-aligned box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Entry point and surface normal of the segment, if it enters the box.
    /// Segments starting inside the box do not hit it.
    fn intersect(&self, start: Vec3, end: Vec3) -> Option<(f64, Vec3)> {
        let dir = sub(end, start);
        let starts = [start.x, start.y, start.z];
        let dirs = [dir.x, dir.y, dir.z];
        let mins = [self.min.x, self.min.y, self.min.z];
        let maxs = [self.max.x, self.max.y, self.max.z];

        let mut t_enter = f64::NEG_INFINITY;
        let mut t_exit = f64::INFINITY;
        let mut enter_axis = 0;

        for axis in 0..3 {
            if dirs[axis].abs() < 1e-12 {
                if starts[axis] < mins[axis] || starts[axis] > maxs[axis] {
                    return None;
                }
                continue;
            }
            let inv = 1.0 / dirs[axis];
            let mut t0 = (mins[axis] - starts[axis]) * inv;
            let mut t1 = (maxs[axis] - starts[axis]) * inv;
            if t0 > t1 {
                std::mem::swap(&mut t0, &mut t1);
            }
            if t0 > t_enter {
                t_enter = t0;
                enter_axis = axis;
            }
            t_exit = t_exit.min(t1);
            if t_enter > t_exit {
                return None;
            }
        }

        if !(0.0..=1.0).contains(&t_enter) {
            return None;
        }

        let mut normal = [0.0; 3];
        normal[enter_axis] = -dirs[enter_axis].signum();
        Some((t_enter, vec3(normal[0], normal[1], normal[2])))
    }
}

#[derive(Debug, Clone, Default)]
pub struct World {
    /// One-sided floor at this height, hit only from above
    pub ground: Option<f64>,
    pub boxes: Vec<Aabb>,
}

impl World {
    pub fn flat(ground: f64) -> Self {
        Self {
            ground: Some(ground),
            boxes: Vec::new(),
        }
    }

    pub fn with_box(mut self, min: Vec3, max: Vec3) -> Self {
        self.boxes.push(Aabb::new(min, max));
        self
    }

    /// Nearest hit along the segment as (point, normal).
    pub fn cast(&self, start: Vec3, end: Vec3) -> Option<(Vec3, Vec3)> {
        let mut best: Option<(f64, Vec3, Vec3)> = None;

        if let Some(h) = self.ground {
            if start.y >= h && end.y < h {
                let t = (start.y - h) / (start.y - end.y);
                let mut point = lerp(start, end, t);
                point.y = h;
                best = Some((t, point, Vec3::UP));
            }
        }

        for b in &self.boxes {
            if let Some((t, normal)) = b.intersect(start, end) {
                if best.map_or(true, |(bt, _, _)| t < bt) {
                    best = Some((t, lerp(start, end, t), normal));
                }
            }
        }

        best.map(|(_, point, normal)| (point, normal))
    }
}

/// Spawn a task that plays the engine's role for a [`RaycastQueue`]: every
/// issued cast is answered from `world`. Returns the handle to cast through.
pub fn spawn_world_raycaster(world: World) -> Raycaster {
    let (raycaster, mut calls) = Raycaster::channel();
    let (sink, mut commands) = EngineSink::channel();

    tokio::spawn(async move {
        let mut queue = RaycastQueue::new(sink, false);
        loop {
            tokio::select! {
                call = calls.recv() => match call {
                    Some(call) => {
                        if let Err(e) = queue.submit(call) {
                            tracing::debug!("Rejected cast: {}", e);
                        }
                    }
                    None => break,
                },
                Some(command) = commands.recv() => {
                    if let ModeCommand::CastRay { start, end } = command {
                        match world.cast(start, end) {
                            Some((point, normal)) => queue.on_hit(point, Some(normal)),
                            None => queue.on_miss(),
                        }
                    }
                }
            }
        }
    });

    raycaster
}
