//! Bounded per-player stack of prior locations, persisted write-through.
//!
//! Documents are cached in an LRU. Writes run outside the cache lock, one at a
//! time per player, on a snapshot of the latest document. A write that fails is
//! logged, counted and leaves the entry dirty; dirty entries are retried by
//! [`BackHistoryStore::flush`] and are never dropped on eviction.

use crate::entities::player::PlayerId;
use crate::persistence::store::{PlayerDocument, PlayerDocumentStore};
use crate::sync::lock;
use crate::world::position::Location;
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
struct CachedHistory {
    document: PlayerDocument,
    /// Bumped on every change; `saved` trails it until a write lands.
    version: u64,
    saved: u64,
}

impl CachedHistory {
    fn loaded(document: PlayerDocument) -> Self {
        Self {
            document,
            version: 0,
            saved: 0,
        }
    }

    fn is_dirty(&self) -> bool {
        self.saved < self.version
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub saved: usize,
    pub failed: usize,
}

struct BackCache {
    entries: LruCache<PlayerId, CachedHistory>,
    /// Dirty entries pushed out of the LRU; kept until a save succeeds.
    stranded: HashMap<PlayerId, CachedHistory>,
    stats: CacheStats,
}

impl BackCache {
    fn resident_mut(&mut self, player: PlayerId) -> Option<&mut CachedHistory> {
        match self.entries.peek_mut(&player) {
            Some(entry) => Some(entry),
            None => self.stranded.get_mut(&player),
        }
    }
}

pub struct BackHistoryStore {
    store: Arc<dyn PlayerDocumentStore>,
    max_history: usize,
    cache: Mutex<BackCache>,
    writers: Mutex<HashMap<PlayerId, Arc<Mutex<()>>>>,
    write_failures: AtomicUsize,
}

impl BackHistoryStore {
    pub fn new(store: Arc<dyn PlayerDocumentStore>, max_history: usize, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            store,
            max_history: max_history.max(1),
            cache: Mutex::new(BackCache {
                entries: LruCache::new(capacity),
                stranded: HashMap::new(),
                stats: CacheStats::default(),
            }),
            writers: Mutex::new(HashMap::new()),
            write_failures: AtomicUsize::new(0),
        }
    }

    pub fn max_history(&self) -> usize {
        self.max_history
    }

    pub fn push(&self, player: PlayerId, location: &Location) {
        self.update(player, |history| {
            history.insert(0, location.clone());
            history.truncate(self.max_history);
            true
        });
    }

    pub fn peek(&self, player: PlayerId) -> Option<Location> {
        self.read(player, |history| history.first().cloned())
    }

    pub fn pop(&self, player: PlayerId) -> Option<Location> {
        let mut popped = None;
        self.update(player, |history| {
            if history.is_empty() {
                return false;
            }
            popped = Some(history.remove(0));
            true
        });
        popped
    }

    /// Remove the newest entry equal to `location`, wherever it sits.
    pub fn take(&self, player: PlayerId, location: &Location) -> bool {
        let mut taken = false;
        self.update(player, |history| {
            if let Some(index) = history.iter().position(|entry| entry == location) {
                history.remove(index);
                taken = true;
            }
            taken
        });
        taken
    }

    pub fn history_size(&self, player: PlayerId) -> usize {
        self.read(player, |history| history.len())
    }

    /// Most recent first.
    pub fn history(&self, player: PlayerId) -> Vec<Location> {
        self.read(player, |history| history.to_vec())
    }

    pub fn clear(&self, player: PlayerId) {
        self.update(player, |history| {
            let changed = !history.is_empty();
            history.clear();
            changed
        });
    }

    /// Retry every write that failed earlier.
    pub fn flush(&self) -> FlushReport {
        let dirty: Vec<PlayerId> = {
            let cache = lock(&self.cache);
            cache
                .stranded
                .iter()
                .chain(cache.entries.iter())
                .filter(|(_, entry)| entry.is_dirty())
                .map(|(player, _)| *player)
                .collect()
        };
        let mut report = FlushReport::default();
        for player in dirty {
            match self.persist(player) {
                Some(true) => report.saved += 1,
                Some(false) => report.failed += 1,
                None => {}
            }
        }
        if report.failed > 0 {
            tracing::error!(failed = report.failed, "back history flush left unsaved documents");
        }
        report
    }

    /// Writes that failed and degraded to memory only.
    pub fn write_failures(&self) -> usize {
        self.write_failures.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> CacheStats {
        lock(&self.cache).stats.clone()
    }

    fn read<T>(&self, player: PlayerId, f: impl FnOnce(&[Location]) -> T) -> T {
        let mut cache = lock(&self.cache);
        let entry = self.entry(&mut cache, player);
        f(&entry.document.back_history)
    }

    /// Apply `f`; when it reports a change, persist the document.
    fn update(&self, player: PlayerId, f: impl FnOnce(&mut Vec<Location>) -> bool) {
        {
            let mut cache = lock(&self.cache);
            let entry = self.entry(&mut cache, player);
            if !f(&mut entry.document.back_history) {
                return;
            }
            entry.version += 1;
        }
        self.persist(player);
    }

    /// Write the latest snapshot of `player`'s document if it is dirty.
    /// `None` when there was nothing to write.
    fn persist(&self, player: PlayerId) -> Option<bool> {
        let writer = self.writer(player);
        let result = {
            let _turn = lock(writer.as_ref());
            let snapshot = {
                let mut cache = lock(&self.cache);
                cache
                    .resident_mut(player)
                    .filter(|entry| entry.is_dirty())
                    .map(|entry| (entry.document.clone(), entry.version))
            };
            snapshot.map(|(document, version)| {
                let saved = self.save(&document);
                if saved {
                    let mut cache = lock(&self.cache);
                    if let Some(entry) = cache.resident_mut(player) {
                        entry.saved = entry.saved.max(version);
                    }
                    if cache.stranded.get(&player).is_some_and(|entry| !entry.is_dirty()) {
                        cache.stranded.remove(&player);
                    }
                }
                saved
            })
        };
        self.release_writer(player, writer);
        result
    }

    fn writer(&self, player: PlayerId) -> Arc<Mutex<()>> {
        Arc::clone(lock(&self.writers).entry(player).or_default())
    }

    fn release_writer(&self, player: PlayerId, writer: Arc<Mutex<()>>) {
        let mut writers = lock(&self.writers);
        // The map and this caller are the only holders.
        if Arc::strong_count(&writer) == 2 {
            writers.remove(&player);
        }
    }

    fn entry<'a>(&self, cache: &'a mut BackCache, player: PlayerId) -> &'a mut CachedHistory {
        if cache.entries.contains(&player) {
            cache.stats.hits += 1;
        } else {
            cache.stats.misses += 1;
            let loaded = match cache.stranded.remove(&player) {
                Some(entry) => entry,
                None => CachedHistory::loaded(self.load(player)),
            };
            if let Some((evicted_player, evicted)) = cache.entries.push(player, loaded) {
                if evicted_player != player {
                    cache.stats.evictions += 1;
                    if evicted.is_dirty() {
                        cache.stranded.insert(evicted_player, evicted);
                    }
                }
            }
        }
        cache
            .entries
            .get_or_insert_mut(player, || CachedHistory::loaded(PlayerDocument::empty(player)))
    }

    fn load(&self, player: PlayerId) -> PlayerDocument {
        match self.store.load(player) {
            Ok(Some(mut document)) => {
                document.back_history.truncate(self.max_history);
                document
            }
            Ok(None) => PlayerDocument::empty(player),
            Err(err) => {
                tracing::warn!(player = %player, error = %err, "back history load failed, starting empty");
                PlayerDocument::empty(player)
            }
        }
    }

    fn save(&self, document: &PlayerDocument) -> bool {
        match self.store.save(document) {
            Ok(()) => true,
            Err(err) => {
                let failures = self.write_failures.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::error!(
                    player = %document.player,
                    error = %err,
                    failures,
                    "back history write failed, keeping in memory"
                );
                false
            }
        }
    }
}
