use crate::world::time::Timestamp;
use std::time::Duration;

/// Interval for periodic housekeeping driven from the world tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepConfig {
    pub interval_seconds: u64,
}

impl SweepConfig {
    pub fn interval(self) -> Option<Duration> {
        if self.interval_seconds == 0 {
            None
        } else {
            Some(Duration::from_secs(self.interval_seconds))
        }
    }
}

#[derive(Debug, Clone)]
pub struct SweepState {
    interval: Option<Duration>,
    next_due: Option<Timestamp>,
}

impl SweepState {
    pub fn new(config: SweepConfig, now: Timestamp) -> Self {
        let interval = config.interval();
        let next_due = interval.map(|interval| now.saturating_add(interval));
        Self { interval, next_due }
    }

    pub fn due(&self, now: Timestamp) -> bool {
        self.next_due.map_or(false, |next| now >= next)
    }

    pub fn mark_done(&mut self, now: Timestamp) {
        if let Some(interval) = self.interval {
            self.next_due = Some(now.saturating_add(interval));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_interval_never_runs() {
        let state = SweepState::new(SweepConfig { interval_seconds: 0 }, Timestamp::from_secs(0));
        assert!(!state.due(Timestamp::from_secs(1_000_000)));
    }

    #[test]
    fn sweep_is_due_after_interval() {
        let mut state =
            SweepState::new(SweepConfig { interval_seconds: 5 }, Timestamp::from_secs(10));
        assert!(!state.due(Timestamp::from_secs(14)));
        assert!(state.due(Timestamp::from_secs(15)));
        state.mark_done(Timestamp::from_secs(16));
        assert!(!state.due(Timestamp::from_secs(20)));
        assert!(state.due(Timestamp::from_secs(21)));
    }
}
