//! FIFO correlation of engine ray casts.
//!
//! The engine answers every `cast_ray` command with exactly one hit or miss
//! notification, but the notification does not say which cast it answers.
//! The queue keeps requests in issue order and only ever has the front request
//! outstanding at the engine, so each notification maps onto exactly one
//! request even when several tasks cast at the same time.
//!
//! While no engine is attached nothing is issued. Casts wait in the queue and
//! the front one goes out when an engine attaches.

use std::collections::VecDeque;

use ctf_shared::protocol::PlayerId;
use ctf_shared::vec3::{distance, Vec3};
use tokio::sync::{mpsc, oneshot};

use crate::engine::EngineSink;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RaycastError {
    #[error("invalid ray endpoints: {0}")]
    InvalidArgument(String),
    #[error("raycast queue closed before the cast resolved")]
    Closed,
}

#[derive(Debug, Clone)]
pub struct RaycastRequest {
    pub id: u64,
    pub start: Vec3,
    pub end: Vec3,
    pub requester: Option<PlayerId>,
    pub debug: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RaycastResult {
    pub hit: bool,
    /// Impact point on a hit, the requested end point on a miss
    pub point: Vec3,
    pub normal: Option<Vec3>,
    pub id: u64,
    pub requester: Option<PlayerId>,
}

/// A cast handed from a [`Raycaster`] to the task that owns the queue.
#[derive(Debug)]
pub struct CastCall {
    pub start: Vec3,
    pub end: Vec3,
    pub requester: Option<PlayerId>,
    pub reply: oneshot::Sender<RaycastResult>,
}

fn check_endpoints(start: Vec3, end: Vec3) -> Result<(), RaycastError> {
    if !start.is_finite() || !end.is_finite() {
        return Err(RaycastError::InvalidArgument(format!(
            "non-finite endpoint {:?} -> {:?}",
            start, end
        )));
    }
    if distance(start, end) < 1e-9 {
        return Err(RaycastError::InvalidArgument(
            "start and end coincide".to_string(),
        ));
    }
    Ok(())
}

/// Cloneable handle used by tasks to cast rays and await the result.
#[derive(Clone, Debug)]
pub struct Raycaster {
    tx: mpsc::UnboundedSender<CastCall>,
}

impl Raycaster {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<CastCall>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub async fn cast(&self, start: Vec3, end: Vec3) -> Result<RaycastResult, RaycastError> {
        self.cast_for(start, end, None).await
    }

    /// Cast on behalf of a player. Invalid endpoints fail before anything is queued.
    pub async fn cast_for(
        &self,
        start: Vec3,
        end: Vec3,
        requester: Option<PlayerId>,
    ) -> Result<RaycastResult, RaycastError> {
        check_endpoints(start, end)?;
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(CastCall {
                start,
                end,
                requester,
                reply,
            })
            .map_err(|_| RaycastError::Closed)?;
        rx.await.map_err(|_| RaycastError::Closed)
    }
}

struct PendingCast {
    request: RaycastRequest,
    reply: oneshot::Sender<RaycastResult>,
}

/// Outstanding casts, owned by the game loop.
pub struct RaycastQueue {
    pending: VecDeque<PendingCast>,
    next_id: u64,
    sink: EngineSink,
    debug: bool,
    attached: bool,
    dropped_notifications: u64,
}

impl RaycastQueue {
    /// Queue issuing to `sink`, with an engine already attached.
    pub fn new(sink: EngineSink, debug: bool) -> Self {
        Self {
            pending: VecDeque::new(),
            next_id: 1,
            sink,
            debug,
            attached: true,
            dropped_notifications: 0,
        }
    }

    /// Queue that holds casts until [`RaycastQueue::attach`] is called.
    pub fn detached(sink: EngineSink, debug: bool) -> Self {
        Self {
            attached: false,
            ..Self::new(sink, debug)
        }
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// An engine attached. The front cast has never been seen by it, so it
    /// is issued now.
    pub fn attach(&mut self) {
        if self.attached {
            return;
        }
        self.attached = true;
        self.issue_front();
    }

    /// The engine went away. Outstanding casts fail and later ones wait for
    /// the next [`RaycastQueue::attach`]. Returns how many casts were failed.
    pub fn detach(&mut self) -> usize {
        self.attached = false;
        self.abandon_all()
    }

    /// Enqueue a cast. It is issued to the engine right away if nothing else
    /// is outstanding, otherwise when everything ahead of it has resolved.
    pub fn submit(&mut self, call: CastCall) -> Result<u64, RaycastError> {
        check_endpoints(call.start, call.end)?;

        let id = self.next_id;
        self.next_id += 1;
        let request = RaycastRequest {
            id,
            start: call.start,
            end: call.end,
            requester: call.requester,
            debug: self.debug,
        };
        if request.debug {
            tracing::debug!(
                "Ray {} queued {:?} -> {:?} ({} ahead)",
                id,
                request.start,
                request.end,
                self.pending.len()
            );
        }

        self.pending.push_back(PendingCast {
            request,
            reply: call.reply,
        });
        if self.pending.len() == 1 {
            self.issue_front();
        }
        Ok(id)
    }

    pub fn on_hit(&mut self, point: Vec3, normal: Option<Vec3>) {
        self.resolve(Some((point, normal)));
    }

    pub fn on_miss(&mut self) {
        self.resolve(None);
    }

    fn resolve(&mut self, hit: Option<(Vec3, Option<Vec3>)>) {
        let Some(front) = self.pending.pop_front() else {
            self.dropped_notifications += 1;
            tracing::warn!(
                "Ray notification with no outstanding cast dropped ({} total)",
                self.dropped_notifications
            );
            return;
        };

        let request = front.request;
        let result = match hit {
            Some((point, normal)) => RaycastResult {
                hit: true,
                point,
                normal,
                id: request.id,
                requester: request.requester,
            },
            None => RaycastResult {
                hit: false,
                point: request.end,
                normal: None,
                id: request.id,
                requester: request.requester,
            },
        };
        if request.debug {
            tracing::debug!("Ray {} resolved hit={} at {:?}", request.id, result.hit, result.point);
        }
        if front.reply.send(result).is_err() {
            tracing::debug!("Ray {} resolved after its caller went away", request.id);
        }

        if !self.pending.is_empty() {
            self.issue_front();
        }
    }

    fn issue_front(&self) {
        if !self.attached {
            return;
        }
        if let Some(front) = self.pending.front() {
            self.sink.cast_ray(front.request.start, front.request.end);
        }
    }

    /// Fail every outstanding cast with [`RaycastError::Closed`]. Used when the
    /// engine goes away and no notification will ever arrive.
    pub fn abandon_all(&mut self) -> usize {
        let abandoned = self.pending.len();
        if abandoned > 0 {
            tracing::warn!("Abandoning {} outstanding ray casts", abandoned);
        }
        self.pending.clear();
        abandoned
    }

    /// Casts waiting for a notification, including the one at the engine.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn dropped_notifications(&self) -> u64 {
        self.dropped_notifications
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctf_shared::protocol::ModeCommand;
    use ctf_shared::vec3::vec3;

    fn call(start: Vec3, end: Vec3) -> (CastCall, oneshot::Receiver<RaycastResult>) {
        let (reply, rx) = oneshot::channel();
        (
            CastCall {
                start,
                end,
                requester: None,
                reply,
            },
            rx,
        )
    }

    fn count_casts(rx: &mut mpsc::UnboundedReceiver<ModeCommand>) -> usize {
        let mut n = 0;
        while let Ok(cmd) = rx.try_recv() {
            if matches!(cmd, ModeCommand::CastRay { .. }) {
                n += 1;
            }
        }
        n
    }

    #[test]
    fn only_front_cast_is_outstanding() {
        let (sink, mut cmds) = EngineSink::channel();
        let mut queue = RaycastQueue::new(sink, false);

        let (c1, _r1) = call(vec3(0.0, 0.0, 0.0), vec3(1.0, 0.0, 0.0));
        let (c2, _r2) = call(vec3(0.0, 0.0, 0.0), vec3(2.0, 0.0, 0.0));
        let id1 = queue.submit(c1).unwrap();
        let id2 = queue.submit(c2).unwrap();

        assert_eq!(id2, id1 + 1);
        assert_eq!(queue.pending_len(), 2);
        assert_eq!(count_casts(&mut cmds), 1);
    }

    #[test]
    fn notifications_resolve_in_issue_order() {
        let (sink, mut cmds) = EngineSink::channel();
        let mut queue = RaycastQueue::new(sink, true);

        let (c1, mut r1) = call(vec3(0.0, 5.0, 0.0), vec3(0.0, -5.0, 0.0));
        let (c2, mut r2) = call(vec3(0.0, 5.0, 0.0), vec3(9.0, 5.0, 0.0));
        queue.submit(c1).unwrap();
        queue.submit(c2).unwrap();

        queue.on_hit(vec3(0.0, 0.0, 0.0), Some(Vec3::UP));
        let first = r1.try_recv().unwrap();
        assert!(first.hit);
        assert_eq!(first.point, vec3(0.0, 0.0, 0.0));
        assert_eq!(first.normal, Some(Vec3::UP));
        assert!(r2.try_recv().is_err());

        // Second cast goes out only after the first resolved
        match cmds.try_recv().unwrap() {
            ModeCommand::CastRay { end, .. } => assert_eq!(end, vec3(0.0, -5.0, 0.0)),
            other => panic!("Expected CastRay, got {:?}", other),
        }
        match cmds.try_recv().unwrap() {
            ModeCommand::CastRay { end, .. } => assert_eq!(end, vec3(9.0, 5.0, 0.0)),
            other => panic!("Expected CastRay, got {:?}", other),
        }

        queue.on_miss();
        let second = r2.try_recv().unwrap();
        assert!(!second.hit);
        assert_eq!(second.point, vec3(9.0, 5.0, 0.0));
        assert_eq!(queue.pending_len(), 0);
    }

    #[test]
    fn notification_with_empty_queue_is_dropped() {
        let (sink, mut cmds) = EngineSink::channel();
        let mut queue = RaycastQueue::new(sink, false);

        queue.on_miss();
        queue.on_hit(Vec3::ZERO, None);

        assert_eq!(queue.dropped_notifications(), 2);
        assert_eq!(count_casts(&mut cmds), 0);

        // The queue still works afterwards
        let (c, mut r) = call(vec3(0.0, 1.0, 0.0), vec3(0.0, 0.0, 0.0));
        queue.submit(c).unwrap();
        queue.on_miss();
        assert!(!r.try_recv().unwrap().hit);
    }

    #[test]
    fn invalid_endpoints_are_rejected_without_queueing() {
        let (sink, mut cmds) = EngineSink::channel();
        let mut queue = RaycastQueue::new(sink, false);

        let (c, _r) = call(vec3(f64::NAN, 0.0, 0.0), vec3(1.0, 0.0, 0.0));
        assert!(matches!(
            queue.submit(c),
            Err(RaycastError::InvalidArgument(_))
        ));
        let (c, _r) = call(vec3(1.0, 1.0, 1.0), vec3(1.0, 1.0, 1.0));
        assert!(matches!(
            queue.submit(c),
            Err(RaycastError::InvalidArgument(_))
        ));

        assert_eq!(queue.pending_len(), 0);
        assert_eq!(count_casts(&mut cmds), 0);
    }

    #[test]
    fn dropped_caller_does_not_stall_the_queue() {
        let (sink, mut cmds) = EngineSink::channel();
        let mut queue = RaycastQueue::new(sink, false);

        let (c1, r1) = call(vec3(0.0, 0.0, 0.0), vec3(1.0, 0.0, 0.0));
        let (c2, mut r2) = call(vec3(0.0, 0.0, 0.0), vec3(0.0, 0.0, 1.0));
        queue.submit(c1).unwrap();
        queue.submit(c2).unwrap();
        drop(r1);

        queue.on_miss();
        queue.on_hit(vec3(0.0, 0.0, 0.5), None);
        assert!(r2.try_recv().unwrap().hit);
        assert_eq!(count_casts(&mut cmds), 2);
    }

    #[test]
    fn abandoned_casts_fail_their_callers() {
        let (sink, _cmds) = EngineSink::channel();
        let mut queue = RaycastQueue::new(sink, false);

        let (c1, mut r1) = call(vec3(0.0, 0.0, 0.0), vec3(1.0, 0.0, 0.0));
        let (c2, mut r2) = call(vec3(0.0, 0.0, 0.0), vec3(2.0, 0.0, 0.0));
        queue.submit(c1).unwrap();
        queue.submit(c2).unwrap();

        assert_eq!(queue.abandon_all(), 2);
        assert_eq!(queue.pending_len(), 0);
        assert!(matches!(r1.try_recv(), Err(oneshot::error::TryRecvError::Closed)));
        assert!(matches!(r2.try_recv(), Err(oneshot::error::TryRecvError::Closed)));

        // A late notification is now just a desync
        queue.on_miss();
        assert_eq!(queue.dropped_notifications(), 1);
    }

    #[test]
    fn detached_queue_holds_casts_until_attach() {
        let (sink, mut cmds) = EngineSink::channel();
        let mut queue = RaycastQueue::new(sink, false);

        let (c1, mut r1) = call(vec3(0.0, 0.0, 0.0), vec3(1.0, 0.0, 0.0));
        queue.submit(c1).unwrap();
        assert_eq!(count_casts(&mut cmds), 1);

        // Engine leaves with a cast outstanding
        assert_eq!(queue.detach(), 1);
        assert!(!queue.is_attached());
        assert!(matches!(r1.try_recv(), Err(oneshot::error::TryRecvError::Closed)));

        let (c2, mut r2) = call(vec3(0.0, 0.0, 0.0), vec3(2.0, 0.0, 0.0));
        let (c3, mut r3) = call(vec3(0.0, 0.0, 0.0), vec3(3.0, 0.0, 0.0));
        queue.submit(c2).unwrap();
        queue.submit(c3).unwrap();
        assert_eq!(count_casts(&mut cmds), 0);

        queue.attach();
        match cmds.try_recv().unwrap() {
            ModeCommand::CastRay { end, .. } => assert_eq!(end, vec3(2.0, 0.0, 0.0)),
            other => panic!("Expected CastRay, got {:?}", other),
        }
        assert!(cmds.try_recv().is_err());

        queue.on_miss();
        assert_eq!(r2.try_recv().unwrap().point, vec3(2.0, 0.0, 0.0));
        queue.on_miss();
        assert_eq!(r3.try_recv().unwrap().point, vec3(3.0, 0.0, 0.0));
        assert_eq!(count_casts(&mut cmds), 1);
    }

    #[test]
    fn attach_while_attached_does_not_reissue() {
        let (sink, mut cmds) = EngineSink::channel();
        let mut queue = RaycastQueue::detached(sink, false);

        let (c, _r) = call(vec3(0.0, 0.0, 0.0), vec3(1.0, 0.0, 0.0));
        queue.submit(c).unwrap();
        assert_eq!(count_casts(&mut cmds), 0);

        queue.attach();
        queue.attach();
        assert_eq!(count_casts(&mut cmds), 1);
    }

    #[tokio::test]
    async fn raycaster_rejects_invalid_endpoints_immediately() {
        let (raycaster, mut calls) = Raycaster::channel();
        let err = raycaster
            .cast(vec3(0.0, 0.0, 0.0), vec3(0.0, f64::INFINITY, 0.0))
            .await
            .unwrap_err();
        assert!(matches!(err, RaycastError::InvalidArgument(_)));
        assert!(calls.try_recv().is_err());
    }

    #[tokio::test]
    async fn raycaster_reports_closed_queue() {
        let (raycaster, calls) = Raycaster::channel();
        drop(calls);
        let err = raycaster
            .cast(vec3(0.0, 0.0, 0.0), vec3(0.0, 1.0, 0.0))
            .await
            .unwrap_err();
        assert_eq!(err, RaycastError::Closed);
    }

    #[tokio::test]
    async fn raycaster_round_trips_through_queue_owner() {
        let (raycaster, mut calls) = Raycaster::channel();
        let (sink, _cmds) = EngineSink::channel();

        let owner = tokio::spawn(async move {
            let mut queue = RaycastQueue::new(sink, false);
            let call = calls.recv().await.unwrap();
            queue.submit(call).unwrap();
            queue.on_hit(vec3(0.0, 2.0, 0.0), Some(Vec3::UP));
        });

        let result = raycaster
            .cast_for(vec3(0.0, 10.0, 0.0), vec3(0.0, 0.0, 0.0), Some(42))
            .await
            .unwrap();
        owner.await.unwrap();

        assert!(result.hit);
        assert_eq!(result.id, 1);
        assert_eq!(result.requester, Some(42));
        assert_eq!(result.point, vec3(0.0, 2.0, 0.0));
    }
}
