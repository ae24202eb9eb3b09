//! Cancellable per-player countdowns that gate a teleport.
//!
//! A session's timer runs on the scheduler; when it fires it queues the
//! completion onto the world thread, where the session is looked up again by
//! id. Anything that removed the session in between (cancel, supersede,
//! movement) wins, so a cancelled action never runs.

use crate::entities::player::PlayerId;
use crate::error::TeleportError;
use crate::sync::lock;
use crate::world::host::WorldExecutor;
use crate::world::position::Location;
use crate::world::time::{ceil_secs, Clock, Timestamp};
use crate::world::timers::{Scheduler, TimerHandle};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelReason {
    /// A newer warmup replaced this one.
    Superseded,
    Moved,
    Disconnected,
    Requested,
    Shutdown,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CancelReason::Superseded => "superseded",
            CancelReason::Moved => "moved",
            CancelReason::Disconnected => "disconnected",
            CancelReason::Requested => "requested",
            CancelReason::Shutdown => "shutdown",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Counting,
    Completed,
    Cancelled(CancelReason),
}

#[derive(Debug, Clone, PartialEq)]
pub struct WarmupCompletion<A> {
    pub player: PlayerId,
    pub origin: Location,
    pub action: A,
}

/// Receives the outcome of a warmup. Both methods run outside the
/// coordinator's lock and may start new warmups.
pub trait WarmupHandler<A>: Send + Sync {
    fn on_complete(&self, completion: WarmupCompletion<A>);

    fn on_cancel(&self, _player: PlayerId, _action: A, _reason: CancelReason) {}
}

/// Observer for one session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    player: PlayerId,
    id: u64,
    deadline: Timestamp,
    state: Arc<Mutex<SessionState>>,
}

impl SessionHandle {
    pub fn player(&self) -> PlayerId {
        self.player
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn deadline(&self) -> Timestamp {
        self.deadline
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Counting
    }
}

struct Session<A> {
    id: u64,
    origin: Location,
    deadline: Timestamp,
    action: A,
    handler: Arc<dyn WarmupHandler<A>>,
    state: Arc<Mutex<SessionState>>,
    timer: Option<TimerHandle>,
    announced: u64,
}

impl<A> Session<A> {
    fn finish(self, state: SessionState) -> (A, Arc<dyn WarmupHandler<A>>, Location) {
        if let Some(timer) = &self.timer {
            timer.cancel();
        }
        *lock(&self.state) = state;
        (self.action, self.handler, self.origin)
    }
}

pub struct WarmupCoordinator<A> {
    clock: Arc<dyn Clock>,
    scheduler: Arc<dyn Scheduler>,
    executor: Arc<dyn WorldExecutor>,
    tolerance: f64,
    sessions: Mutex<HashMap<PlayerId, Session<A>>>,
    next_id: AtomicU64,
}

impl<A: Send + 'static> WarmupCoordinator<A> {
    pub fn new(
        clock: Arc<dyn Clock>,
        scheduler: Arc<dyn Scheduler>,
        executor: Arc<dyn WorldExecutor>,
        tolerance: f64,
    ) -> Self {
        Self {
            clock,
            scheduler,
            executor,
            tolerance: tolerance.max(0.0),
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Begin a countdown, superseding any active one for `player`.
    ///
    /// A zero duration runs `on_complete` before returning and creates no
    /// session.
    pub fn start(
        self: &Arc<Self>,
        player: PlayerId,
        origin: Location,
        duration: Duration,
        action: A,
        handler: Arc<dyn WarmupHandler<A>>,
    ) -> Result<Option<SessionHandle>, TeleportError> {
        if !origin.is_valid() {
            return Err(TeleportError::InvalidOrigin);
        }
        self.cancel_session(player, None, CancelReason::Superseded);

        if duration.is_zero() {
            handler.on_complete(WarmupCompletion {
                player,
                origin,
                action,
            });
            return Ok(None);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let deadline = self.clock.now().saturating_add(duration);
        let state = Arc::new(Mutex::new(SessionState::Counting));
        let superseded = lock(&self.sessions).insert(
            player,
            Session {
                id,
                origin,
                deadline,
                action,
                handler,
                state: Arc::clone(&state),
                timer: None,
                announced: ceil_secs(duration),
            },
        );
        if let Some(previous) = superseded {
            self.notify_cancelled(player, previous, CancelReason::Superseded);
        }

        let coordinator = Arc::downgrade(self);
        let timer = self.scheduler.schedule(
            duration,
            Box::new(move || Self::on_timer(coordinator, player, id)),
        );
        {
            let mut sessions = lock(&self.sessions);
            match sessions.get_mut(&player) {
                Some(session) if session.id == id => session.timer = Some(timer),
                _ => {
                    timer.cancel();
                }
            }
        }
        tracing::debug!(player = %player, session = id, ?duration, "warmup started");
        Ok(Some(SessionHandle {
            player,
            id,
            deadline,
            state,
        }))
    }

    pub fn has_active(&self, player: PlayerId) -> bool {
        lock(&self.sessions).contains_key(&player)
    }

    pub fn active_count(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub fn origin(&self, player: PlayerId) -> Option<Location> {
        lock(&self.sessions)
            .get(&player)
            .map(|session| session.origin.clone())
    }

    pub fn remaining(&self, player: PlayerId) -> Option<Duration> {
        let deadline = lock(&self.sessions).get(&player)?.deadline;
        Some(deadline.saturating_duration_since(self.clock.now()))
    }

    pub fn cancel(&self, player: PlayerId, reason: CancelReason) -> bool {
        self.cancel_session(player, None, reason)
    }

    pub fn cancel_all(&self, reason: CancelReason) -> usize {
        let drained: Vec<(PlayerId, Session<A>)> = lock(&self.sessions).drain().collect();
        let count = drained.len();
        for (player, session) in drained {
            self.notify_cancelled(player, session, reason);
        }
        count
    }

    /// True when `current` is farther from the session origin than the
    /// tolerance allows. A different world always counts as movement.
    pub fn exceeded_tolerance(&self, player: PlayerId, current: &Location) -> bool {
        let sessions = lock(&self.sessions);
        let Some(session) = sessions.get(&player) else {
            return false;
        };
        self.moved(&session.origin, current)
    }

    /// Sample every counting player's position and cancel the ones that
    /// moved or went away. Call once per tick from the world thread.
    pub fn poll_movement(&self) -> Vec<(PlayerId, CancelReason)> {
        let snapshot: Vec<(PlayerId, u64, Location)> = lock(&self.sessions)
            .iter()
            .map(|(player, session)| (*player, session.id, session.origin.clone()))
            .collect();

        let mut cancelled = Vec::new();
        for (player, id, origin) in snapshot {
            let reason = match self.executor.current_position(player) {
                None => CancelReason::Disconnected,
                Some(current) if self.moved(&origin, &current) => CancelReason::Moved,
                Some(_) => continue,
            };
            if self.cancel_session(player, Some(id), reason) {
                cancelled.push((player, reason));
            }
        }
        cancelled
    }

    /// Players whose whole seconds remaining changed since the last call.
    pub fn countdown_updates(&self) -> Vec<(PlayerId, u64)> {
        let now = self.clock.now();
        let mut updates = Vec::new();
        for (player, session) in lock(&self.sessions).iter_mut() {
            let seconds = ceil_secs(session.deadline.saturating_duration_since(now));
            if seconds > 0 && seconds != session.announced {
                session.announced = seconds;
                updates.push((*player, seconds));
            }
        }
        updates
    }

    /// Finish session `id` if it is still the active one for `player`.
    ///
    /// The position is sampled once more here, so movement after the last
    /// tick still cancels instead of completing.
    pub(crate) fn complete(&self, player: PlayerId, id: u64) -> bool {
        let current = self.executor.current_position(player);
        let (session, cancelled) = {
            let mut sessions = lock(&self.sessions);
            let cancelled = match sessions.get(&player) {
                Some(session) if session.id == id => match &current {
                    None => Some(CancelReason::Disconnected),
                    Some(current) if self.moved(&session.origin, current) => {
                        Some(CancelReason::Moved)
                    }
                    Some(_) => None,
                },
                _ => {
                    tracing::trace!(player = %player, session = id, "stale warmup completion ignored");
                    return false;
                }
            };
            (sessions.remove(&player), cancelled)
        };
        let Some(session) = session else {
            return false;
        };
        if let Some(reason) = cancelled {
            self.notify_cancelled(player, session, reason);
            return false;
        }
        let (action, handler, origin) = session.finish(SessionState::Completed);
        tracing::debug!(player = %player, session = id, "warmup completed");
        handler.on_complete(WarmupCompletion {
            player,
            origin,
            action,
        });
        true
    }

    fn on_timer(coordinator: Weak<Self>, player: PlayerId, id: u64) {
        let Some(coordinator) = coordinator.upgrade() else {
            return;
        };
        let executor = Arc::clone(&coordinator.executor);
        executor.run_on_world_thread(Box::new(move || {
            coordinator.complete(player, id);
        }));
    }

    fn moved(&self, origin: &Location, current: &Location) -> bool {
        match origin.distance_squared(current) {
            Some(distance) => distance > self.tolerance * self.tolerance,
            None => true,
        }
    }

    fn cancel_session(&self, player: PlayerId, id: Option<u64>, reason: CancelReason) -> bool {
        let session = {
            let mut sessions = lock(&self.sessions);
            match sessions.get(&player) {
                Some(session) if id.map_or(true, |id| id == session.id) => {
                    sessions.remove(&player)
                }
                _ => None,
            }
        };
        match session {
            Some(session) => {
                self.notify_cancelled(player, session, reason);
                true
            }
            None => false,
        }
    }

    fn notify_cancelled(&self, player: PlayerId, session: Session<A>, reason: CancelReason) {
        let id = session.id;
        let (action, handler, _) = session.finish(SessionState::Cancelled(reason));
        tracing::debug!(player = %player, session = id, %reason, "warmup cancelled");
        handler.on_cancel(player, action, reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::sim::SimWorld;
    use crate::world::time::{ManualClock, SystemClock};
    use crate::world::timers::ThreadScheduler;

    #[derive(Default)]
    struct Recorder {
        completed: Mutex<Vec<(PlayerId, &'static str)>>,
        cancelled: Mutex<Vec<(PlayerId, &'static str, CancelReason)>>,
    }

    impl WarmupHandler<&'static str> for Recorder {
        fn on_complete(&self, completion: WarmupCompletion<&'static str>) {
            lock(&self.completed).push((completion.player, completion.action));
        }

        fn on_cancel(&self, player: PlayerId, action: &'static str, reason: CancelReason) {
            lock(&self.cancelled).push((player, action, reason));
        }
    }

    struct Fixture {
        clock: Arc<ManualClock>,
        world: Arc<SimWorld>,
        warmups: Arc<WarmupCoordinator<&'static str>>,
        recorder: Arc<Recorder>,
        player: PlayerId,
    }

    impl Fixture {
        fn new() -> Self {
            let clock = ManualClock::new(Timestamp::from_secs(0));
            let world = Arc::new(SimWorld::new());
            let player = world
                .add_player("Alice", Location::new("overworld", 0.0, 64.0, 0.0))
                .id;
            let warmups = Arc::new(WarmupCoordinator::new(
                clock.clone(),
                clock.clone(),
                world.clone(),
                1.0,
            ));
            Self {
                clock,
                world,
                warmups,
                recorder: Arc::new(Recorder::default()),
                player,
            }
        }

        fn origin(&self) -> Location {
            Location::new("overworld", 0.0, 64.0, 0.0)
        }

        fn start(&self, secs: u64, action: &'static str) -> Option<SessionHandle> {
            self.warmups
                .start(
                    self.player,
                    self.origin(),
                    Duration::from_secs(secs),
                    action,
                    self.recorder.clone(),
                )
                .expect("start")
        }

        fn completed(&self) -> Vec<&'static str> {
            lock(&self.recorder.completed)
                .iter()
                .map(|(_, action)| *action)
                .collect()
        }

        fn cancelled(&self) -> Vec<(&'static str, CancelReason)> {
            lock(&self.recorder.cancelled)
                .iter()
                .map(|(_, action, reason)| (*action, *reason))
                .collect()
        }
    }

    #[test]
    fn zero_duration_completes_synchronously() {
        let fx = Fixture::new();
        assert!(fx.start(0, "now").is_none());
        assert_eq!(fx.completed(), vec!["now"]);
        assert!(!fx.warmups.has_active(fx.player));
        assert_eq!(fx.clock.pending_timers(), 0);
    }

    #[test]
    fn invalid_origin_is_rejected() {
        let fx = Fixture::new();
        let err = fx
            .warmups
            .start(
                fx.player,
                Location::new("", 0.0, 0.0, 0.0),
                Duration::from_secs(3),
                "nowhere",
                fx.recorder.clone(),
            )
            .unwrap_err();
        assert_eq!(err, TeleportError::InvalidOrigin);
        let err = fx
            .warmups
            .start(
                fx.player,
                Location::new("overworld", f64::NAN, 0.0, 0.0),
                Duration::from_secs(3),
                "nowhere",
                fx.recorder.clone(),
            )
            .unwrap_err();
        assert_eq!(err, TeleportError::InvalidOrigin);
        assert!(!fx.warmups.has_active(fx.player));
    }

    #[test]
    fn completion_runs_once_on_the_world_thread() {
        let fx = Fixture::new();
        let handle = fx.start(3, "home").expect("session");
        assert!(fx.warmups.has_active(fx.player));
        fx.clock.advance_secs(2);
        assert_eq!(fx.world.run_world_tasks(), 0);
        fx.clock.advance_secs(1);
        assert!(fx.completed().is_empty());
        assert_eq!(fx.world.queued_tasks(), 1);
        fx.world.run_world_tasks();
        assert_eq!(fx.completed(), vec!["home"]);
        assert_eq!(handle.state(), SessionState::Completed);
        assert!(!fx.warmups.has_active(fx.player));
        fx.clock.advance_secs(10);
        fx.world.run_world_tasks();
        assert_eq!(fx.completed().len(), 1);
    }

    #[test]
    fn second_start_supersedes_first_exactly_once() {
        let fx = Fixture::new();
        let first = fx.start(3, "first").expect("session");
        fx.clock.advance_secs(1);
        let second = fx.start(3, "second").expect("session");
        assert_eq!(first.state(), SessionState::Cancelled(CancelReason::Superseded));
        assert_eq!(fx.cancelled(), vec![("first", CancelReason::Superseded)]);

        fx.clock.advance_secs(5);
        fx.world.run_world_tasks();
        assert_eq!(fx.completed(), vec!["second"]);
        assert_eq!(second.state(), SessionState::Completed);
        assert_eq!(fx.cancelled().len(), 1);
    }

    #[test]
    fn cancel_wins_over_elapsed_timer() {
        let fx = Fixture::new();
        let handle = fx.start(3, "home").expect("session");
        fx.clock.advance_secs(3);
        assert_eq!(fx.world.queued_tasks(), 1);
        assert!(fx.warmups.cancel(fx.player, CancelReason::Requested));
        assert!(!fx.warmups.cancel(fx.player, CancelReason::Requested));
        fx.world.run_world_tasks();
        assert!(fx.completed().is_empty());
        assert_eq!(handle.state(), SessionState::Cancelled(CancelReason::Requested));
    }

    #[test]
    fn superseded_session_with_elapsed_timer_never_fires() {
        let fx = Fixture::new();
        fx.start(1, "first").expect("session");
        fx.clock.advance_secs(1);
        fx.start(5, "second").expect("session");
        fx.world.run_world_tasks();
        assert!(fx.completed().is_empty());
        assert!(fx.warmups.has_active(fx.player));
    }

    #[test]
    fn movement_beyond_tolerance_cancels() {
        let fx = Fixture::new();
        let handle = fx.start(3, "home").expect("session");
        fx.world
            .move_player(fx.player, Location::new("overworld", 0.5, 64.0, 0.5));
        assert!(fx.warmups.poll_movement().is_empty());
        fx.world
            .move_player(fx.player, Location::new("overworld", 2.0, 64.0, 0.0));
        assert_eq!(
            fx.warmups.poll_movement(),
            vec![(fx.player, CancelReason::Moved)]
        );
        assert_eq!(handle.state(), SessionState::Cancelled(CancelReason::Moved));
        fx.clock.advance_secs(5);
        fx.world.run_world_tasks();
        assert!(fx.completed().is_empty());
    }

    #[test]
    fn movement_in_the_final_second_cancels_completion() {
        let fx = Fixture::new();
        let handle = fx.start(3, "home").expect("session");
        for _ in 0..2 {
            fx.clock.advance_secs(1);
            fx.world.run_world_tasks();
            assert!(fx.warmups.poll_movement().is_empty());
        }
        fx.world
            .move_player(fx.player, Location::new("overworld", 40.0, 64.0, 0.0));
        fx.clock.advance_secs(1);
        fx.world.run_world_tasks();
        assert!(fx.completed().is_empty());
        assert_eq!(handle.state(), SessionState::Cancelled(CancelReason::Moved));
        assert_eq!(fx.cancelled(), vec![("home", CancelReason::Moved)]);
        assert!(!fx.warmups.has_active(fx.player));
    }

    #[test]
    fn disconnect_before_completion_cancels() {
        let fx = Fixture::new();
        let handle = fx.start(2, "home").expect("session");
        fx.clock.advance_secs(2);
        fx.world.disconnect(fx.player);
        fx.world.run_world_tasks();
        assert!(fx.completed().is_empty());
        assert_eq!(
            handle.state(),
            SessionState::Cancelled(CancelReason::Disconnected)
        );
    }

    #[test]
    fn world_change_counts_as_movement() {
        let fx = Fixture::new();
        fx.start(3, "home").expect("session");
        let nether = Location::new("nether", 0.0, 64.0, 0.0);
        assert!(fx.warmups.exceeded_tolerance(fx.player, &nether));
        assert!(!fx.warmups.exceeded_tolerance(fx.player, &fx.origin()));
    }

    #[test]
    fn missing_position_cancels_as_disconnected() {
        let fx = Fixture::new();
        fx.start(3, "home").expect("session");
        fx.world.disconnect(fx.player);
        assert_eq!(
            fx.warmups.poll_movement(),
            vec![(fx.player, CancelReason::Disconnected)]
        );
    }

    #[test]
    fn countdown_reports_each_second_once() {
        let fx = Fixture::new();
        fx.start(3, "home").expect("session");
        assert!(fx.warmups.countdown_updates().is_empty());
        fx.clock.advance(Duration::from_millis(1_200));
        assert_eq!(fx.warmups.countdown_updates(), vec![(fx.player, 2)]);
        fx.clock.advance(Duration::from_millis(300));
        assert!(fx.warmups.countdown_updates().is_empty());
        fx.clock.advance(Duration::from_millis(600));
        assert_eq!(fx.warmups.countdown_updates(), vec![(fx.player, 1)]);
        assert_eq!(
            fx.warmups.remaining(fx.player),
            Some(Duration::from_millis(900))
        );
    }

    fn wait_for_world_task(world: &SimWorld) {
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while world.queued_tasks() == 0 {
            assert!(std::time::Instant::now() < deadline, "timer never fired");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn wall_clock_fixture() -> (
        Arc<ThreadScheduler>,
        Arc<SimWorld>,
        Arc<WarmupCoordinator<&'static str>>,
        PlayerId,
    ) {
        let scheduler = ThreadScheduler::start().expect("scheduler");
        let world = Arc::new(SimWorld::new());
        let player = world
            .add_player("Alice", Location::new("overworld", 0.0, 64.0, 0.0))
            .id;
        let warmups = Arc::new(WarmupCoordinator::new(
            Arc::new(SystemClock),
            scheduler.clone(),
            world.clone(),
            1.0,
        ));
        (scheduler, world, warmups, player)
    }

    #[test]
    fn wall_clock_cancel_wins_over_queued_completion() {
        let (scheduler, world, warmups, player) = wall_clock_fixture();
        let recorder = Arc::new(Recorder::default());
        let handle = warmups
            .start(
                player,
                Location::new("overworld", 0.0, 64.0, 0.0),
                Duration::from_millis(20),
                "home",
                recorder.clone(),
            )
            .expect("start")
            .expect("session");

        wait_for_world_task(&world);
        assert!(warmups.cancel(player, CancelReason::Requested));
        world.run_world_tasks();

        assert!(lock(&recorder.completed).is_empty());
        assert_eq!(handle.state(), SessionState::Cancelled(CancelReason::Requested));
        assert_eq!(scheduler.pending(), 0);
        scheduler.shutdown();
    }

    #[test]
    fn wall_clock_session_completes_on_world_tick() {
        let (scheduler, world, warmups, player) = wall_clock_fixture();
        let recorder = Arc::new(Recorder::default());
        let handle = warmups
            .start(
                player,
                Location::new("overworld", 0.0, 64.0, 0.0),
                Duration::from_millis(20),
                "home",
                recorder.clone(),
            )
            .expect("start")
            .expect("session");

        wait_for_world_task(&world);
        assert_eq!(handle.state(), SessionState::Counting);
        world.run_world_tasks();

        assert_eq!(lock(&recorder.completed).len(), 1);
        assert_eq!(handle.state(), SessionState::Completed);
        scheduler.shutdown();
    }

    #[test]
    fn cancel_all_notifies_every_session() {
        let fx = Fixture::new();
        let bob = fx
            .world
            .add_player("Bob", Location::new("overworld", 5.0, 64.0, 5.0))
            .id;
        fx.start(3, "alice").expect("session");
        fx.warmups
            .start(
                bob,
                Location::new("overworld", 5.0, 64.0, 5.0),
                Duration::from_secs(3),
                "bob",
                fx.recorder.clone(),
            )
            .expect("start");
        assert_eq!(fx.warmups.active_count(), 2);
        assert_eq!(fx.warmups.cancel_all(CancelReason::Shutdown), 2);
        assert_eq!(fx.cancelled().len(), 2);
        assert_eq!(fx.clock.pending_timers(), 0);
    }
}
