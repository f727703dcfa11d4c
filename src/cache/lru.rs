//! Bounded LRU/TTL store (C1).
//!
//! Recency ordering and capacity-bound eviction are delegated to the `lru`
//! crate's `LruCache` (the teacher's `Cargo.toml` already carries `lru` and
//! `moka` for this exact shape, never wired up); this module layers TTL
//! expiry and a background sweeper on top, since `lru::LruCache` itself has
//! no notion of expiry. `Get` promotes the key to most-recently-used (the
//! crate's own `get` does this); `Set` refreshes the value/expiry and lets
//! the crate's `put` evict the LRU tail when a new key would exceed
//! capacity.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

/// Statistics exposed by `LruStore::stats`.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct LruStats {
    /// Total `Get` calls that found a live entry.
    pub hits: u64,
    /// Total `Get` calls that found nothing or an expired entry.
    pub misses: u64,
    /// Current entry count.
    pub len: usize,
    /// Configured maximum entry count.
    pub capacity: usize,
}

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

/// Bounded, TTL-aware, recency-ordered key/value store.
///
/// All operations are infallible (spec §4.1): a `Get` either returns bytes
/// or a miss, never an error.
pub struct LruStore {
    inner: Mutex<LruCache<String, Entry>>,
    capacity: usize,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    sweeper: Mutex<Option<std::thread::JoinHandle<()>>>,
    stop: Arc<std::sync::atomic::AtomicBool>,
}

impl LruStore {
    /// Create a store with the given capacity and default TTL, and start its
    /// background sweeper (wakes at roughly `ttl / 2`, per spec §4.1).
    pub fn new(capacity: usize, default_ttl: Duration) -> Arc<Self> {
        let bound = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        let store = Arc::new(Self {
            inner: Mutex::new(LruCache::new(bound)),
            capacity,
            default_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sweeper: Mutex::new(None),
            stop: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        });
        store.clone().spawn_sweeper();
        store
    }

    fn spawn_sweeper(self: Arc<Self>) {
        let period = (self.default_ttl / 2).max(Duration::from_millis(100));
        let stop = self.stop.clone();
        let weak = Arc::downgrade(&self);
        let handle = std::thread::Builder::new()
            .name("lru-sweeper".into())
            .spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    std::thread::sleep(period);
                    if let Some(store) = weak.upgrade() {
                        store.sweep_expired();
                    } else {
                        break;
                    }
                }
            })
            .expect("failed to spawn lru sweeper thread");
        *self.sweeper.lock() = Some(handle);
    }

    fn sweep_expired(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let expired: Vec<String> = inner
            .iter()
            .filter(|(_, e)| now > e.expires_at)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            inner.pop(key);
        }
        tracing::debug!(removed = expired.len(), "lru sweeper pass complete");
    }

    /// Fetch a value, promoting it to most-recently-used on hit.
    ///
    /// Expired entries are treated as a miss and removed (I2): the miss
    /// counter is incremented exactly once and the entry does not linger.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        match inner.peek(key) {
            Some(entry) if now > entry.expires_at => {
                inner.pop(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Some(_) => {
                let value = inner.get(key).map(|e| e.value.clone());
                self.hits.fetch_add(1, Ordering::Relaxed);
                value
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert or replace a value with the given TTL, evicting the
    /// least-recently-used entry first if the store is at capacity (I3).
    pub fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        let mut inner = self.inner.lock();
        inner.put(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Remove a key unconditionally.
    pub fn delete(&self, key: &str) {
        self.inner.lock().pop(key);
    }

    /// Remove all entries.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Current number of (possibly not-yet-expired) entries.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot hit/miss counters and size.
    pub fn stats(&self) -> LruStats {
        let inner = self.inner.lock();
        LruStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            len: inner.len(),
            capacity: self.capacity,
        }
    }
}

impl Drop for LruStore {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(s: &str) -> Vec<u8> {
        s.as_bytes().to_vec()
    }

    #[test]
    fn lru_eviction_ordering() {
        // Scenario 1 from spec §8.
        let store = LruStore::new(3, Duration::from_secs(60));
        store.set("a", bytes("1"), Duration::from_secs(60));
        store.set("b", bytes("2"), Duration::from_secs(60));
        store.set("c", bytes("3"), Duration::from_secs(60));
        assert_eq!(store.get("a"), Some(bytes("1")));
        store.set("d", bytes("4"), Duration::from_secs(60));

        assert_eq!(store.get("b"), None);
        assert_eq!(store.get("a"), Some(bytes("1")));
        assert_eq!(store.get("c"), Some(bytes("3")));
        assert_eq!(store.get("d"), Some(bytes("4")));
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn expired_get_is_a_miss_and_counts_once() {
        let store = LruStore::new(10, Duration::from_secs(60));
        store.set("k", bytes("v"), Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(store.get("k"), None);
        let stats = store.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 0);
    }

    #[test]
    fn capacity_never_exceeded() {
        let store = LruStore::new(5, Duration::from_secs(60));
        for i in 0..50 {
            store.set(&format!("k{i}"), bytes("v"), Duration::from_secs(60));
            assert!(store.len() <= 5);
        }
    }

    #[test]
    fn recency_promotion_survives_capacity_minus_one_inserts() {
        let store = LruStore::new(4, Duration::from_secs(60));
        store.set("a", bytes("1"), Duration::from_secs(60));
        store.set("b", bytes("2"), Duration::from_secs(60));
        store.set("c", bytes("3"), Duration::from_secs(60));
        store.set("d", bytes("4"), Duration::from_secs(60));
        assert!(store.get("a").is_some());

        store.set("e", bytes("5"), Duration::from_secs(60));
        store.set("f", bytes("6"), Duration::from_secs(60));
        store.set("g", bytes("7"), Duration::from_secs(60));

        assert_eq!(store.get("a"), Some(bytes("1")));
    }

    #[test]
    fn set_then_get_round_trips() {
        let store = LruStore::new(10, Duration::from_secs(60));
        store.set("k", bytes("v"), Duration::from_secs(60));
        assert_eq!(store.get("k"), Some(bytes("v")));
    }

    proptest::proptest! {
        // P1: capacity is never exceeded for any insertion sequence (I3).
        #[test]
        fn capacity_bound_holds_for_arbitrary_key_sequences(keys in proptest::collection::vec(0u32..20, 0..200)) {
            let store = LruStore::new(5, Duration::from_secs(60));
            for k in keys {
                store.set(&k.to_string(), bytes("v"), Duration::from_secs(60));
                proptest::prop_assert!(store.len() <= 5);
            }
        }
    }
}
