//! In-process LRU tier bounded by total payload bytes.
//!
//! Recency is tracked in an access log separate from the entries themselves:
//! every hit bumps a monotonically increasing tick for its key, and eviction
//! walks the log from the oldest tick. Stored entries are never mutated by
//! reads; callers receive an access-refreshed copy.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::debug;

use super::entry::CacheEntry;
use super::key::short_hash;
use crate::clock::Clock;

/// Entry count and payload bytes held by a tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TierStats {
    pub entry_count: usize,
    pub total_size: u64,
}

struct Slot {
    entry: CacheEntry,
    tick: u64,
}

#[derive(Default)]
struct MemoryState {
    entries: HashMap<String, Slot>,
    /// tick → hash, ascending = least recently used first.
    access_log: BTreeMap<u64, String>,
    next_tick: u64,
    total_size: u64,
}

impl MemoryState {
    fn touch(&mut self, hash: &str) {
        let tick = self.next_tick;
        if let Some(slot) = self.entries.get_mut(hash) {
            self.access_log.remove(&slot.tick);
            slot.tick = tick;
            self.access_log.insert(tick, hash.to_string());
            self.next_tick += 1;
        }
    }

    fn remove(&mut self, hash: &str) -> Option<CacheEntry> {
        let slot = self.entries.remove(hash)?;
        self.access_log.remove(&slot.tick);
        self.total_size -= slot.entry.size();
        Some(slot.entry)
    }
}

/// Memory tier. All operations are serialized behind one lock and never block
/// on I/O.
pub struct MemoryCache {
    state: Mutex<MemoryState>,
    capacity: u64,
    clock: Arc<dyn Clock>,
    debug_logging: bool,
}

impl MemoryCache {
    pub fn new(capacity: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            capacity,
            clock,
            debug_logging: false,
        }
    }

    pub fn with_debug_logging(mut self, enabled: bool) -> Self {
        self.debug_logging = enabled;
        self
    }

    /// Insert or replace the entry for `hash`, evicting least-recently-used
    /// entries until the byte budget holds. An entry larger than the whole
    /// budget is not kept.
    pub fn set(&self, hash: &str, entry: CacheEntry) {
        let mut state = self.lock();
        state.remove(hash);

        if entry.size() > self.capacity {
            if self.debug_logging {
                debug!(
                    key = %short_hash(hash),
                    size = entry.size(),
                    capacity = self.capacity,
                    "Entry larger than memory budget, not cached in memory"
                );
            }
            return;
        }

        state.total_size += entry.size();
        let tick = state.next_tick;
        state.next_tick += 1;
        state.access_log.insert(tick, hash.to_string());
        state.entries.insert(hash.to_string(), Slot { entry, tick });

        while state.total_size > self.capacity {
            let Some((_, victim)) = state.access_log.pop_first() else {
                break;
            };
            // pop_first already dropped the log entry; drop the slot without
            // touching the log again.
            if let Some(slot) = state.entries.remove(&victim) {
                state.total_size -= slot.entry.size();
            }
            if self.debug_logging {
                debug!(key = %short_hash(&victim), "Evicted LRU entry from memory");
            }
        }
    }

    /// Look up `hash`. A hit bumps its recency and returns a copy with
    /// `last_accessed_at` set to now; the stored entry is left unchanged.
    pub fn get(&self, hash: &str) -> Option<CacheEntry> {
        let now = self.clock.now();
        let mut state = self.lock();
        let entry = state.entries.get(hash)?.entry.accessed(now);
        state.touch(hash);
        Some(entry)
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.lock().entries.contains_key(hash)
    }

    pub fn remove(&self, hash: &str) {
        self.lock().remove(hash);
    }

    pub fn remove_all(&self) {
        *self.lock() = MemoryState::default();
    }

    pub fn statistics(&self) -> TierStats {
        let state = self.lock();
        TierStats {
            entry_count: state.entries.len(),
            total_size: state.total_size,
        }
    }

    /// Hashes ordered least recently used first.
    pub fn lru_order(&self) -> Vec<String> {
        self.lock().access_log.values().cloned().collect()
    }

    /// Drop every expired entry and return how many were removed.
    pub fn remove_expired_entries(&self) -> usize {
        let now = self.clock.now();
        let mut state = self.lock();
        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, slot)| slot.entry.is_expired(now))
            .map(|(hash, _)| hash.clone())
            .collect();
        for hash in &expired {
            state.remove(hash);
        }
        expired.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().expect("memory cache lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::time::Duration;

    fn setup(capacity: u64) -> (MemoryCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        (MemoryCache::new(capacity, clock.clone()), clock)
    }

    fn entry(clock: &ManualClock, payload: &[u8], ttl: Option<u64>) -> CacheEntry {
        CacheEntry::new(
            payload.to_vec(),
            clock.now(),
            ttl.map(Duration::from_secs),
            None,
        )
    }

    #[test]
    fn test_memory_hit_miss() {
        let (cache, clock) = setup(100);
        assert!(cache.get("a").is_none());
        cache.set("a", entry(&clock, b"hello", None));
        assert_eq!(cache.get("a").unwrap().payload, b"hello");
        assert!(cache.contains("a"));
    }

    #[test]
    fn test_get_refreshes_copy_not_stored_entry() {
        let (cache, clock) = setup(100);
        let original = entry(&clock, b"x", None);
        cache.set("a", original.clone());
        clock.advance(chrono::Duration::seconds(10));

        let hit = cache.get("a").unwrap();
        assert_eq!(hit.last_accessed_at, clock.now());
        let state = cache.lock();
        assert_eq!(
            state.entries["a"].entry.last_accessed_at,
            original.last_accessed_at
        );
    }

    #[test]
    fn test_cost_based_lru_eviction() {
        let (cache, clock) = setup(10);
        cache.set("a", entry(&clock, b"aaaa", None));
        cache.set("b", entry(&clock, b"bbbb", None));
        // Touch "a" so "b" becomes least recently used.
        assert!(cache.get("a").is_some());
        cache.set("c", entry(&clock, b"cccc", None));

        assert!(cache.contains("a"));
        assert!(!cache.contains("b"), "b was least recently used");
        assert!(cache.contains("c"));
        assert_eq!(cache.statistics().total_size, 8);
    }

    #[test]
    fn test_oversized_entry_not_kept() {
        let (cache, clock) = setup(4);
        cache.set("a", entry(&clock, b"ab", None));
        cache.set("a", entry(&clock, b"too large", None));
        assert!(!cache.contains("a"));
        assert_eq!(cache.statistics(), TierStats::default());
    }

    #[test]
    fn test_overwrite_adjusts_size() {
        let (cache, clock) = setup(100);
        cache.set("a", entry(&clock, b"12345", None));
        cache.set("a", entry(&clock, b"12", None));
        assert_eq!(
            cache.statistics(),
            TierStats {
                entry_count: 1,
                total_size: 2
            }
        );
    }

    #[test]
    fn test_lru_order_follows_access() {
        let (cache, clock) = setup(100);
        cache.set("a", entry(&clock, b"1", None));
        cache.set("b", entry(&clock, b"1", None));
        cache.set("c", entry(&clock, b"1", None));
        let _ = cache.get("a");
        assert_eq!(cache.lru_order(), vec!["b", "c", "a"]);
    }

    #[test]
    fn test_remove_expired_entries() {
        let (cache, clock) = setup(100);
        cache.set("short", entry(&clock, b"1", Some(5)));
        cache.set("long", entry(&clock, b"22", Some(500)));
        cache.set("forever", entry(&clock, b"333", None));
        clock.advance(chrono::Duration::seconds(6));

        assert_eq!(cache.remove_expired_entries(), 1);
        assert!(!cache.contains("short"));
        assert_eq!(cache.statistics().total_size, 5);
    }

    #[test]
    fn test_remove_and_remove_all() {
        let (cache, clock) = setup(100);
        cache.set("a", entry(&clock, b"1", None));
        cache.set("b", entry(&clock, b"2", None));
        cache.remove("a");
        cache.remove("missing");
        assert_eq!(cache.statistics().entry_count, 1);
        cache.remove_all();
        assert_eq!(cache.statistics(), TierStats::default());
        assert!(cache.lru_order().is_empty());
    }
}
