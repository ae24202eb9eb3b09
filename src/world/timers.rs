use crate::sync::lock;
use crate::world::time::{Clock, SystemClock, Timestamp};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread;
use std::time::Duration;

pub type TimerTask = Box<dyn FnOnce() + Send + 'static>;

const IDLE_WAIT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

/// Schedules one-shot tasks after a delay.
pub trait Scheduler: Send + Sync {
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle;
}

#[derive(Clone, Copy, Debug)]
struct TimerEntry {
    id: TimerId,
    due: Timestamp,
}

/// Min-heap by due time (earliest first)
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.due == other.due
    }
}

impl Eq for TimerEntry {}

/// Pending one-shot tasks ordered by due time.
///
/// Stopped timers leave a stale heap entry behind; stale entries are skipped
/// lazily when they reach the top.
#[derive(Default)]
pub struct TimerQueue {
    heap: BinaryHeap<TimerEntry>,
    tasks: HashMap<TimerId, TimerTask>,
    next_id: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, due: Timestamp, task: TimerTask) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        self.tasks.insert(id, task);
        self.heap.push(TimerEntry { id, due });
        id
    }

    pub fn next_due(&mut self) -> Option<Timestamp> {
        loop {
            let entry = *self.heap.peek()?;
            if self.tasks.contains_key(&entry.id) {
                return Some(entry.due);
            }
            self.heap.pop();
        }
    }

    /// Pop the earliest task due at or before `now`.
    pub fn pop_ready(&mut self, now: Timestamp) -> Option<(TimerId, Timestamp, TimerTask)> {
        let due = self.next_due()?;
        if due > now {
            return None;
        }
        let entry = self.heap.pop()?;
        let task = self.tasks.remove(&entry.id)?;
        Some((entry.id, entry.due, task))
    }

    pub fn stop(&mut self, id: TimerId) -> bool {
        self.tasks.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

pub(crate) struct TimerShared {
    pub(crate) queue: Mutex<TimerQueue>,
    pub(crate) wake: Condvar,
}

impl TimerShared {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(TimerQueue::new()),
            wake: Condvar::new(),
        })
    }

    pub(crate) fn schedule(self: &Arc<Self>, due: Timestamp, task: TimerTask) -> TimerHandle {
        let id = lock(&self.queue).set(due, task);
        self.wake.notify_all();
        TimerHandle {
            id,
            shared: Arc::downgrade(self),
        }
    }
}

/// Cancels a scheduled task. Dropping the handle does not cancel.
#[derive(Clone)]
pub struct TimerHandle {
    id: TimerId,
    shared: Weak<TimerShared>,
}

impl TimerHandle {
    pub fn id(&self) -> TimerId {
        self.id
    }

    /// Returns false when the task already ran or was cancelled.
    pub fn cancel(&self) -> bool {
        let Some(shared) = self.shared.upgrade() else {
            return false;
        };
        let stopped = lock(&shared.queue).stop(self.id);
        shared.wake.notify_all();
        stopped
    }
}

impl std::fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerHandle").field("id", &self.id).finish()
    }
}

/// Wall-clock scheduler backed by a single worker thread.
pub struct ThreadScheduler {
    shared: Arc<TimerShared>,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl ThreadScheduler {
    pub fn start() -> std::io::Result<Arc<Self>> {
        let shared = TimerShared::new();
        let running = Arc::new(AtomicBool::new(true));
        let worker = {
            let shared = Arc::clone(&shared);
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name("waygate-timers".to_string())
                .spawn(move || run_timer_loop(&shared, &running))?
        };
        Ok(Arc::new(Self {
            shared,
            running,
            worker: Mutex::new(Some(worker)),
        }))
    }

    pub fn pending(&self) -> usize {
        lock(&self.shared.queue).len()
    }

    pub fn shutdown(&self) {
        self.running.store(false, AtomicOrdering::SeqCst);
        self.shared.wake.notify_all();
        if let Some(worker) = lock(&self.worker).take() {
            if worker.join().is_err() {
                tracing::error!("timer worker panicked");
            }
        }
    }
}

impl Scheduler for ThreadScheduler {
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle {
        let due = SystemClock.now().saturating_add(delay);
        self.shared.schedule(due, task)
    }
}

impl Drop for ThreadScheduler {
    fn drop(&mut self) {
        self.running.store(false, AtomicOrdering::SeqCst);
        self.shared.wake.notify_all();
    }
}

fn run_timer_loop(shared: &TimerShared, running: &AtomicBool) {
    let mut queue = lock(&shared.queue);
    while running.load(AtomicOrdering::SeqCst) {
        let now = SystemClock.now();
        if let Some((id, _, task)) = queue.pop_ready(now) {
            drop(queue);
            tracing::trace!(timer = id.0, "timer fired");
            task();
            queue = lock(&shared.queue);
            continue;
        }
        let wait = queue
            .next_due()
            .map(|due| due.saturating_duration_since(now))
            .unwrap_or(IDLE_WAIT);
        queue = match shared.wake.wait_timeout(queue, wait) {
            Ok((guard, _)) => guard,
            Err(poisoned) => poisoned.into_inner().0,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn noop() -> TimerTask {
        Box::new(|| {})
    }

    #[test]
    fn queue_pops_in_due_order() {
        let mut queue = TimerQueue::new();
        let late = queue.set(Timestamp::from_millis(300), noop());
        let early = queue.set(Timestamp::from_millis(100), noop());
        let middle = queue.set(Timestamp::from_millis(200), noop());

        assert!(queue.pop_ready(Timestamp::from_millis(50)).is_none());
        let ready: Vec<TimerId> = std::iter::from_fn(|| {
            queue
                .pop_ready(Timestamp::from_millis(1_000))
                .map(|(id, _, _)| id)
        })
        .collect();
        assert_eq!(ready, vec![early, middle, late]);
        assert!(queue.is_empty());
    }

    #[test]
    fn stopped_timer_is_skipped() {
        let mut queue = TimerQueue::new();
        let stopped = queue.set(Timestamp::from_millis(100), noop());
        let kept = queue.set(Timestamp::from_millis(200), noop());
        assert!(queue.stop(stopped));
        assert!(!queue.stop(stopped));
        assert_eq!(queue.next_due(), Some(Timestamp::from_millis(200)));
        let (id, _, _) = queue
            .pop_ready(Timestamp::from_millis(200))
            .expect("kept timer");
        assert_eq!(id, kept);
    }

    #[test]
    fn thread_scheduler_runs_task_after_delay() {
        let scheduler = ThreadScheduler::start().expect("start");
        let (tx, rx) = mpsc::channel();
        let _handle = scheduler.schedule(
            Duration::from_millis(20),
            Box::new(move || {
                let _ = tx.send(());
            }),
        );
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
        scheduler.shutdown();
    }

    #[test]
    fn thread_scheduler_cancelled_task_never_runs() {
        let scheduler = ThreadScheduler::start().expect("start");
        let (tx, rx) = mpsc::channel::<()>();
        let handle = scheduler.schedule(
            Duration::from_millis(200),
            Box::new(move || {
                let _ = tx.send(());
            }),
        );
        assert!(handle.cancel());
        assert!(rx.recv_timeout(Duration::from_millis(400)).is_err());
        assert_eq!(scheduler.pending(), 0);
        scheduler.shutdown();
    }
}
