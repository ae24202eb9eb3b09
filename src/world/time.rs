use crate::sync::lock;
use crate::world::timers::{Scheduler, TimerHandle, TimerShared, TimerTask};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Wall-clock instant in milliseconds since the unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    pub fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(1_000))
    }

    pub fn as_millis(self) -> u64 {
        self.0
    }

    pub fn saturating_add(self, duration: Duration) -> Self {
        let millis = duration.as_millis().min(u128::from(u64::MAX)) as u64;
        Self(self.0.saturating_add(millis))
    }

    pub fn saturating_duration_since(self, earlier: Timestamp) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }
}

/// Whole seconds in `duration`, rounded up.
pub fn ceil_secs(duration: Duration) -> u64 {
    let millis = duration.as_millis();
    ((millis + 999) / 1_000).min(u128::from(u64::MAX)) as u64
}

pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis().min(u128::from(u64::MAX)) as u64)
            .unwrap_or(0);
        Timestamp(millis)
    }
}

/// Simulated time that only moves when told to.
///
/// Also acts as a [`Scheduler`]: tasks fire from inside [`ManualClock::advance`],
/// in due order, with the clock set to each task's due time while it runs.
pub struct ManualClock {
    now: Mutex<Timestamp>,
    timers: Arc<TimerShared>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(start),
            timers: TimerShared::new(),
        })
    }

    pub fn advance(&self, duration: Duration) {
        let target = lock(&self.now).saturating_add(duration);
        loop {
            let ready = lock(&self.timers.queue).pop_ready(target);
            let Some((_, due, task)) = ready else {
                break;
            };
            {
                let mut now = lock(&self.now);
                if due > *now {
                    *now = due;
                }
            }
            task();
        }
        let mut now = lock(&self.now);
        if target > *now {
            *now = target;
        }
    }

    pub fn advance_secs(&self, secs: u64) {
        self.advance(Duration::from_secs(secs));
    }

    pub fn pending_timers(&self) -> usize {
        lock(&self.timers.queue).len()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *lock(&self.now)
    }
}

impl Scheduler for ManualClock {
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle {
        let due = self.now().saturating_add(delay);
        self.timers.schedule(due, task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn ceil_secs_rounds_partial_seconds_up() {
        assert_eq!(ceil_secs(Duration::ZERO), 0);
        assert_eq!(ceil_secs(Duration::from_millis(1)), 1);
        assert_eq!(ceil_secs(Duration::from_millis(1_000)), 1);
        assert_eq!(ceil_secs(Duration::from_millis(2_001)), 3);
    }

    #[test]
    fn timestamp_difference_saturates() {
        let early = Timestamp::from_secs(10);
        let late = Timestamp::from_secs(12);
        assert_eq!(late.saturating_duration_since(early), Duration::from_secs(2));
        assert_eq!(early.saturating_duration_since(late), Duration::ZERO);
    }

    #[test]
    fn manual_clock_fires_due_tasks_only() {
        let clock = ManualClock::new(Timestamp::from_secs(100));
        let fired = Arc::new(AtomicUsize::new(0));
        for delay in [1, 3] {
            let fired = Arc::clone(&fired);
            clock.schedule(
                Duration::from_secs(delay),
                Box::new(move || {
                    fired.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }

        clock.advance_secs(2);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(clock.now(), Timestamp::from_secs(102));
        clock.advance_secs(1);
        assert_eq!(fired.load(Ordering::SeqCst), 2);
        assert_eq!(clock.pending_timers(), 0);
    }

    #[test]
    fn manual_clock_reports_due_time_inside_task() {
        let clock = ManualClock::new(Timestamp::from_secs(0));
        let seen = Arc::new(Mutex::new(None));
        {
            let seen = Arc::clone(&seen);
            let inner = Arc::clone(&clock);
            clock.schedule(
                Duration::from_secs(3),
                Box::new(move || {
                    *lock(&seen) = Some(inner.now());
                }),
            );
        }
        clock.advance_secs(10);
        assert_eq!(*lock(&seen), Some(Timestamp::from_secs(3)));
        assert_eq!(clock.now(), Timestamp::from_secs(10));
    }

    #[test]
    fn cancelled_manual_timer_does_not_fire() {
        let clock = ManualClock::new(Timestamp::default());
        let fired = Arc::new(AtomicUsize::new(0));
        let handle = {
            let fired = Arc::clone(&fired);
            clock.schedule(
                Duration::from_secs(1),
                Box::new(move || {
                    fired.fetch_add(1, Ordering::SeqCst);
                }),
            )
        };
        assert!(handle.cancel());
        clock.advance_secs(5);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
