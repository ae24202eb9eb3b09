use crate::entities::player::PlayerId;
use crate::sync::lock;
use crate::world::time::{ceil_secs, Clock, Timestamp};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Last successful use per (command, player).
///
/// Entries are never evicted; an entry older than its cooldown simply reports
/// zero remaining.
pub struct CooldownRegistry {
    clock: Arc<dyn Clock>,
    cooldowns: HashMap<String, Duration>,
    entries: Mutex<HashMap<(String, PlayerId), Timestamp>>,
}

impl CooldownRegistry {
    pub fn new(clock: Arc<dyn Clock>, cooldowns: HashMap<String, Duration>) -> Self {
        Self {
            clock,
            cooldowns,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn cooldown(&self, key: &str) -> Duration {
        self.cooldowns.get(key).copied().unwrap_or_default()
    }

    /// Whole seconds left before `key` may be used again, rounded up.
    pub fn remaining(&self, key: &str, player: PlayerId) -> u64 {
        let cooldown = self.cooldown(key);
        if cooldown.is_zero() {
            return 0;
        }
        let last = match lock(&self.entries).get(&(key.to_string(), player)) {
            Some(last) => *last,
            None => return 0,
        };
        let elapsed = self.clock.now().saturating_duration_since(last);
        ceil_secs(cooldown.saturating_sub(elapsed))
    }

    pub fn mark_used(&self, key: &str, player: PlayerId) {
        let now = self.clock.now();
        let mut entries = lock(&self.entries);
        let entry = entries.entry((key.to_string(), player)).or_insert(now);
        if now > *entry {
            *entry = now;
        }
        tracing::debug!(player = %player, command = key, "cooldown started");
    }

    pub fn clear(&self, key: &str, player: PlayerId) -> bool {
        lock(&self.entries)
            .remove(&(key.to_string(), player))
            .is_some()
    }

    pub fn clear_all(&self, player: PlayerId) -> usize {
        let mut entries = lock(&self.entries);
        let before = entries.len();
        entries.retain(|(_, owner), _| *owner != player);
        before - entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::time::ManualClock;

    fn registry(clock: Arc<ManualClock>) -> CooldownRegistry {
        let cooldowns = [
            ("home".to_string(), Duration::from_secs(60)),
            ("back".to_string(), Duration::ZERO),
        ]
        .into_iter()
        .collect();
        CooldownRegistry::new(clock, cooldowns)
    }

    #[test]
    fn unused_command_has_nothing_remaining() {
        let clock = ManualClock::new(Timestamp::from_secs(1_000));
        let cooldowns = registry(clock);
        assert_eq!(cooldowns.remaining("home", PlayerId::random()), 0);
    }

    #[test]
    fn remaining_counts_down_to_zero() {
        let clock = ManualClock::new(Timestamp::from_secs(1_000));
        let cooldowns = registry(Arc::clone(&clock));
        let player = PlayerId::random();
        cooldowns.mark_used("home", player);
        assert_eq!(cooldowns.remaining("home", player), 60);
        clock.advance(Duration::from_millis(500));
        assert_eq!(cooldowns.remaining("home", player), 60);
        clock.advance(Duration::from_millis(29_600));
        assert_eq!(cooldowns.remaining("home", player), 30);
        clock.advance_secs(30);
        assert_eq!(cooldowns.remaining("home", player), 0);
        clock.advance_secs(3_600);
        assert_eq!(cooldowns.remaining("home", player), 0);
    }

    #[test]
    fn remaining_never_negative_over_many_steps() {
        let clock = ManualClock::new(Timestamp::from_secs(0));
        let cooldowns = registry(Arc::clone(&clock));
        let player = PlayerId::random();
        cooldowns.mark_used("home", player);
        let mut last = cooldowns.remaining("home", player);
        for _ in 0..100 {
            clock.advance(Duration::from_millis(777));
            let now = cooldowns.remaining("home", player);
            assert!(now <= last);
            last = now;
        }
        assert_eq!(last, 0);
    }

    #[test]
    fn zero_cooldown_is_never_pending() {
        let clock = ManualClock::new(Timestamp::from_secs(5));
        let cooldowns = registry(clock);
        let player = PlayerId::random();
        cooldowns.mark_used("back", player);
        assert_eq!(cooldowns.remaining("back", player), 0);
        cooldowns.mark_used("fly", player);
        assert_eq!(cooldowns.remaining("fly", player), 0);
    }

    #[test]
    fn mark_used_resets_the_window() {
        let clock = ManualClock::new(Timestamp::from_secs(0));
        let cooldowns = registry(Arc::clone(&clock));
        let player = PlayerId::random();
        cooldowns.mark_used("home", player);
        clock.advance_secs(45);
        cooldowns.mark_used("home", player);
        assert_eq!(cooldowns.remaining("home", player), 60);
    }

    #[test]
    fn players_and_commands_are_independent() {
        let clock = ManualClock::new(Timestamp::from_secs(0));
        let cooldowns = registry(clock);
        let alice = PlayerId::random();
        let bob = PlayerId::random();
        cooldowns.mark_used("home", alice);
        assert_eq!(cooldowns.remaining("home", bob), 0);
        assert_eq!(cooldowns.remaining("warp", alice), 0);
    }

    #[test]
    fn clear_removes_entries() {
        let clock = ManualClock::new(Timestamp::from_secs(0));
        let cooldowns = registry(clock);
        let player = PlayerId::random();
        cooldowns.mark_used("home", player);
        cooldowns.mark_used("back", player);
        assert!(cooldowns.clear("home", player));
        assert!(!cooldowns.clear("home", player));
        assert_eq!(cooldowns.remaining("home", player), 0);
        assert_eq!(cooldowns.clear_all(player), 1);
    }
}
