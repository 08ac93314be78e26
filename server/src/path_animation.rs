//! Buffered playback of a trajectory on an engine object.
//!
//! The animator pulls samples from a producer that may itself be waiting on ray
//! casts. It pre-fills a lookahead buffer before the first move, tops the buffer
//! up without waiting whenever the producer has samples ready, and only blocks
//! when the buffer has run down to its minimum (a starvation, counted for
//! diagnostics). Segment timing comes from the playback speed, so production
//! and playback rates are decoupled.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ctf_shared::config::AnimationConfig;
use ctf_shared::protocol::ObjectId;
use ctf_shared::vec3::{direction_to_angles, distance, sub, vec3, Vec3};
use futures_util::{FutureExt, Stream, StreamExt};

use crate::engine::EngineSink;
use crate::projectile::TrajectorySample;

/// Cancellation flag shared between an animation and whoever may stop it.
#[derive(Clone, Debug, Default)]
pub struct AnimationHandle {
    cancelled: Arc<AtomicBool>,
}

impl AnimationHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop at the next check. Movement already issued to the engine stays.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnimationReport {
    /// Move commands issued, including the final snap
    pub segments: usize,
    pub samples_consumed: usize,
    pub starvation_count: usize,
    /// Last position commanded to the engine
    pub final_position: Vec3,
    pub last_sample: Option<TrajectorySample>,
    pub cancelled: bool,
}

pub struct PathAnimator {
    sink: EngineSink,
    config: AnimationConfig,
}

impl PathAnimator {
    pub fn new(sink: EngineSink, config: AnimationConfig) -> Self {
        Self { sink, config }
    }

    fn segment_duration(&self, length: f64) -> f64 {
        match self.config.speed {
            Some(speed) if speed > 0.0 => (length / speed).max(self.config.min_segment_duration),
            _ => self.config.min_segment_duration,
        }
    }

    /// Move `object_id` from `start` through every sample `samples` produces.
    pub async fn animate<S>(
        &self,
        object_id: ObjectId,
        start: Vec3,
        mut samples: S,
        handle: &AnimationHandle,
    ) -> AnimationReport
    where
        S: Stream<Item = TrajectorySample> + Unpin,
    {
        let min_buffer = (self.config.min_buffer_size as usize).max(1);
        let max_buffer = min_buffer * 2;
        let epsilon = self.config.snap_epsilon;

        let mut report = AnimationReport {
            segments: 0,
            samples_consumed: 0,
            starvation_count: 0,
            final_position: start,
            last_sample: None,
            cancelled: false,
        };
        let mut buffer: VecDeque<TrajectorySample> = VecDeque::with_capacity(max_buffer);
        let mut exhausted = false;
        let mut current = start;
        let mut rotation = Vec3::ZERO;

        while buffer.len() < min_buffer && !exhausted {
            match samples.next().await {
                Some(sample) => buffer.push_back(sample),
                None => exhausted = true,
            }
        }

        while !buffer.is_empty() || !exhausted {
            if handle.is_cancelled() {
                report.cancelled = true;
                break;
            }

            while buffer.len() < max_buffer && !exhausted {
                match samples.next().now_or_never() {
                    Some(Some(sample)) => buffer.push_back(sample),
                    Some(None) => exhausted = true,
                    None => break,
                }
            }

            if buffer.len() <= min_buffer && !exhausted {
                report.starvation_count += 1;
                match samples.next().await {
                    Some(sample) => buffer.push_back(sample),
                    None => exhausted = true,
                }
            }

            let Some(target) = buffer.pop_front() else {
                continue;
            };
            report.samples_consumed += 1;
            report.last_sample = Some(target);

            let delta = sub(target.position, current);
            let length = distance(target.position, current);
            if length <= epsilon {
                continue;
            }
            if self.config.rotate_to_direction {
                let (pitch, yaw) = direction_to_angles(delta);
                rotation = vec3(pitch, yaw, 0.0);
            }

            let duration = self.segment_duration(length);
            self.sink
                .move_object(object_id, target.position, rotation, duration);
            report.segments += 1;
            current = target.position;
            report.final_position = current;

            if duration > 0.0 {
                tokio::time::sleep(Duration::from_secs_f64(duration)).await;
            }
            if handle.is_cancelled() {
                report.cancelled = true;
                break;
            }
        }

        if !report.cancelled {
            if let Some(last) = report.last_sample {
                if distance(last.position, current) > 0.0 {
                    self.sink.move_object(object_id, last.position, rotation, 0.0);
                    report.segments += 1;
                    report.final_position = last.position;
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctf_shared::protocol::ModeCommand;
    use futures_util::stream;
    use tokio::sync::mpsc;

    fn sample(x: f64, is_final: bool) -> TrajectorySample {
        TrajectorySample {
            position: vec3(x, 0.0, 0.0),
            source_ray_id: None,
            hit: is_final,
            hit_normal: None,
            is_final,
        }
    }

    fn config(min_buffer_size: u32) -> AnimationConfig {
        AnimationConfig {
            min_buffer_size,
            speed: Some(10.0),
            min_segment_duration: 0.01,
            rotate_to_direction: true,
            snap_epsilon: 0.01,
        }
    }

    fn moves(rx: &mut mpsc::UnboundedReceiver<ModeCommand>) -> Vec<(Vec3, Vec3, f64)> {
        let mut out = Vec::new();
        while let Ok(cmd) = rx.try_recv() {
            if let ModeCommand::MoveObject {
                position,
                rotation,
                duration,
                ..
            } = cmd
            {
                out.push((position, rotation, duration));
            }
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn plays_every_sample_in_order() {
        let (sink, mut rx) = EngineSink::channel();
        let animator = PathAnimator::new(sink, config(2));
        let samples = stream::iter(vec![
            sample(1.0, false),
            sample(2.0, false),
            sample(3.0, false),
            sample(4.0, true),
        ]);

        let report = animator
            .animate(5, Vec3::ZERO, samples, &AnimationHandle::new())
            .await;

        let moved = moves(&mut rx);
        let xs: Vec<f64> = moved.iter().map(|(p, _, _)| p.x).collect();
        assert_eq!(xs, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(report.final_position, vec3(4.0, 0.0, 0.0));
        assert_eq!(report.samples_consumed, 4);
        assert!(report.last_sample.unwrap().is_final);
        assert!(!report.cancelled);
        // 1 m at 10 m/s
        assert!((moved[0].2 - 0.1).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn rotation_follows_segment_direction() {
        let (sink, mut rx) = EngineSink::channel();
        let animator = PathAnimator::new(sink, config(1));
        // +x has yaw pi/2
        let samples = stream::iter(vec![sample(2.0, true)]);
        animator
            .animate(1, Vec3::ZERO, samples, &AnimationHandle::new())
            .await;

        let (_, rotation, _) = moves(&mut rx)[0];
        assert!((rotation.y - std::f64::consts::FRAC_PI_2).abs() < 1e-9);
        assert_eq!(rotation.x, 0.0);
        assert_eq!(rotation.z, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_duration_without_speed() {
        let (sink, mut rx) = EngineSink::channel();
        let mut cfg = config(1);
        cfg.speed = None;
        cfg.min_segment_duration = 0.25;
        let animator = PathAnimator::new(sink, cfg);
        let samples = stream::iter(vec![sample(1.0, false), sample(9.0, true)]);
        animator
            .animate(1, Vec3::ZERO, samples, &AnimationHandle::new())
            .await;

        for (_, _, duration) in moves(&mut rx) {
            assert_eq!(duration, 0.25);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn tiny_last_segment_is_snapped() {
        let (sink, mut rx) = EngineSink::channel();
        let animator = PathAnimator::new(sink, config(1));
        let samples = stream::iter(vec![sample(1.0, false), sample(1.005, true)]);
        let report = animator
            .animate(1, Vec3::ZERO, samples, &AnimationHandle::new())
            .await;

        let moved = moves(&mut rx);
        assert_eq!(moved.len(), 2);
        assert_eq!(moved[1].0, vec3(1.005, 0.0, 0.0));
        assert_eq!(moved[1].2, 0.0);
        assert_eq!(report.final_position, vec3(1.005, 0.0, 0.0));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_producer_causes_starvation() {
        let (sink, mut rx) = EngineSink::channel();
        let animator = PathAnimator::new(sink, config(2));
        let samples = Box::pin(stream::unfold(0u32, |i| async move {
            if i == 6 {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
            Some((sample(i as f64 + 1.0, i == 5), i + 1))
        }));

        let report = animator
            .animate(1, Vec3::ZERO, samples, &AnimationHandle::new())
            .await;

        assert!(report.starvation_count > 0);
        assert_eq!(report.samples_consumed, 6);
        assert_eq!(report.final_position, vec3(6.0, 0.0, 0.0));
        assert_eq!(moves(&mut rx).last().unwrap().0, vec3(6.0, 0.0, 0.0));
    }

    #[tokio::test(start_paused = true)]
    async fn ready_producer_never_starves_after_prefill() {
        let (sink, _rx) = EngineSink::channel();
        let animator = PathAnimator::new(sink, config(2));
        let samples = stream::iter((1..=10).map(|i| sample(i as f64, i == 10)));
        let report = animator
            .animate(1, Vec3::ZERO, samples, &AnimationHandle::new())
            .await;
        assert_eq!(report.starvation_count, 0);
        assert_eq!(report.samples_consumed, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_animation_stops_without_snap() {
        let (sink, mut rx) = EngineSink::channel();
        let animator = PathAnimator::new(sink, config(1));
        let handle = AnimationHandle::new();
        let samples = stream::iter((1..=20).map(|i| sample(i as f64, i == 20)));

        let canceller = {
            let handle = handle.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(250)).await;
                handle.cancel();
            })
        };
        let report = animator.animate(1, Vec3::ZERO, samples, &handle).await;
        canceller.await.unwrap();

        assert!(report.cancelled);
        assert!(report.samples_consumed < 20);
        let moved = moves(&mut rx);
        assert_eq!(moved.len(), report.segments);
        assert_ne!(moved.last().unwrap().0, vec3(20.0, 0.0, 0.0));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_producer_moves_nothing() {
        let (sink, mut rx) = EngineSink::channel();
        let animator = PathAnimator::new(sink, config(3));
        let report = animator
            .animate(1, vec3(1.0, 2.0, 3.0), stream::empty(), &AnimationHandle::new())
            .await;
        assert_eq!(report.segments, 0);
        assert_eq!(report.final_position, vec3(1.0, 2.0, 3.0));
        assert!(moves(&mut rx).is_empty());
    }
}
