//! Message deduplication cache
//!
//! A bounded, time-expiring set of message ids. Presence of an id means "this
//! message was already routed within the TTL window". Absence does not prove
//! the message is new: the least recently used entry is evicted once the
//! cache is full.
//!
//! Reads refresh recency but never the TTL; an entry expires a fixed time
//! after it was inserted. Time comes from `tokio::time::Instant`, so tests can
//! drive expiry with a paused clock.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::time::Instant;

/// Default number of remembered message ids
pub const DEFAULT_CAPACITY: usize = 500;

/// Default lifetime of a remembered id
pub const DEFAULT_TTL: Duration = Duration::from_secs(10 * 60);

#[derive(Debug)]
struct Entry {
    inserted_at: Instant,
    tick: u64,
}

/// LRU cache of message ids with a per-entry TTL
#[derive(Debug)]
pub struct DedupCache {
    capacity: usize,
    ttl: Duration,
    entries: HashMap<String, Entry>,
    // recency order: lowest tick is least recently used
    order: BTreeMap<u64, String>,
    next_tick: u64,
}

impl DedupCache {
    /// Create a cache holding at most `capacity` ids for `ttl` each
    ///
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            entries: HashMap::new(),
            order: BTreeMap::new(),
            next_tick: 0,
        }
    }

    /// Whether `id` is present and unexpired; refreshes its recency
    pub fn get(&mut self, id: &str) -> bool {
        if self.expire_if_stale(id) {
            return false;
        }
        let tick = self.bump();
        match self.entries.get_mut(id) {
            Some(entry) => {
                self.order.remove(&entry.tick);
                entry.tick = tick;
                self.order.insert(tick, id.to_string());
                true
            }
            None => false,
        }
    }

    /// Whether `id` is present and unexpired, without touching recency
    pub fn contains(&self, id: &str) -> bool {
        self.entries
            .get(id)
            .is_some_and(|entry| entry.inserted_at.elapsed() < self.ttl)
    }

    /// Remember `id`, evicting the least recently used id when full
    pub fn insert(&mut self, id: impl Into<String>) {
        let id = id.into();
        let tick = self.bump();
        let now = Instant::now();

        if let Some(old) = self.entries.insert(
            id.clone(),
            Entry {
                inserted_at: now,
                tick,
            },
        ) {
            self.order.remove(&old.tick);
        }
        self.order.insert(tick, id);

        while self.entries.len() > self.capacity {
            self.evict_oldest();
        }
    }

    /// Record `id` and report whether it was new
    ///
    /// Returns `false` for an id already present within the TTL window.
    pub fn check_and_insert(&mut self, id: &str) -> bool {
        if self.get(id) {
            return false;
        }
        self.insert(id);
        true
    }

    /// Number of stored ids, expired ones included until touched
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache stores no ids
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of ids
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every stored id
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    fn bump(&mut self) -> u64 {
        self.next_tick = self.next_tick.wrapping_add(1);
        self.next_tick
    }

    fn expire_if_stale(&mut self, id: &str) -> bool {
        let stale = self
            .entries
            .get(id)
            .is_some_and(|entry| entry.inserted_at.elapsed() >= self.ttl);
        if stale {
            if let Some(entry) = self.entries.remove(id) {
                self.order.remove(&entry.tick);
            }
        }
        stale
    }

    fn evict_oldest(&mut self) {
        if let Some((_, id)) = self.order.pop_first() {
            self.entries.remove(&id);
            tracing::trace!(message_id = %id, "dedup cache evicted entry");
        }
    }
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_oldest_at_capacity() {
        let mut cache = DedupCache::new(3, DEFAULT_TTL);
        for id in ["a", "b", "c", "d"] {
            cache.insert(id);
        }
        assert!(!cache.contains("a"));
        assert!(cache.contains("b"));
        assert!(cache.contains("c"));
        assert!(cache.contains("d"));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_get_refreshes_recency() {
        let mut cache = DedupCache::new(3, DEFAULT_TTL);
        cache.insert("a");
        cache.insert("b");
        cache.insert("c");
        assert!(cache.get("a"));
        cache.insert("d");
        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
    }

    #[test]
    fn test_check_and_insert() {
        let mut cache = DedupCache::default();
        assert!(cache.check_and_insert("12"));
        assert!(!cache.check_and_insert("12"));
        assert!(cache.check_and_insert("13"));
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let mut cache = DedupCache::new(10, Duration::from_secs(60));
        cache.insert("12");

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(cache.get("12"));

        // reading does not extend the lifetime
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(!cache.get("12"));
        assert!(cache.is_empty());
        assert!(cache.check_and_insert("12"));
    }

    #[test]
    fn test_zero_capacity_holds_one() {
        let mut cache = DedupCache::new(0, DEFAULT_TTL);
        cache.insert("a");
        cache.insert("b");
        assert_eq!(cache.capacity(), 1);
        assert!(cache.contains("b"));
        assert!(!cache.contains("a"));
    }

    #[test]
    fn test_reinsert_does_not_duplicate_order() {
        let mut cache = DedupCache::new(2, DEFAULT_TTL);
        cache.insert("a");
        cache.insert("a");
        cache.insert("b");
        assert_eq!(cache.len(), 2);
        cache.clear();
        assert!(cache.is_empty());
    }
}
