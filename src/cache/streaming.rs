//! Streaming-event replay cache (C5).
//!
//! Records an ordered sequence of upstream SSE-style events and replays them
//! later, optionally honoring their recorded inter-event delays. Recording
//! and replay are independent of the exact-match/semantic tiers — this
//! module owns its own bounded store rather than reusing `LruStore`, since
//! eviction here is by earliest-expiry rather than strict recency.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// A single recorded streaming event.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StreamEvent {
    /// Raw event payload bytes.
    pub payload: Vec<u8>,
    /// SSE `event:` field, if present.
    pub event_type: Option<String>,
    /// SSE `id:` field, if present.
    pub id: Option<String>,
    /// Delay since the previous event in the same recording (zero for the
    /// first event).
    pub delay: Duration,
}

struct StoredSequence {
    events: Vec<StreamEvent>,
    expires_at: Instant,
}

/// An in-progress recording. Created by `StreamingCache::recorder`, events
/// appended via `record_event`, installed into the store via `commit`.
pub struct Recorder {
    key: String,
    max_total_size: usize,
    events: Mutex<Vec<StreamEvent>>,
    total_size: Mutex<usize>,
    last_event_at: Mutex<Option<Instant>>,
    dropped: std::sync::atomic::AtomicBool,
}

impl Recorder {
    /// Append an event. Once the configured max total size would be
    /// exceeded, further events are silently dropped but already-recorded
    /// events are left intact (spec §4.5).
    pub fn record_event(&self, payload: Vec<u8>, event_type: Option<String>, id: Option<String>) {
        if self.dropped.load(std::sync::atomic::Ordering::Relaxed) {
            return;
        }
        let mut total = self.total_size.lock();
        if *total + payload.len() > self.max_total_size {
            self.dropped.store(true, std::sync::atomic::Ordering::Relaxed);
            tracing::warn!(key = %self.key, "streaming recorder hit max total size, dropping further events");
            return;
        }
        *total += payload.len();
        drop(total);

        let mut last = self.last_event_at.lock();
        let now = Instant::now();
        let delay = last.map(|t| now.duration_since(t)).unwrap_or(Duration::ZERO);
        *last = Some(now);

        self.events.lock().push(StreamEvent {
            payload,
            event_type,
            id,
            delay,
        });
    }

    /// Number of events recorded so far.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Whether no events have been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Records and replays ordered streaming-event sequences with optional
/// delay replay.
pub struct StreamingCache {
    capacity: usize,
    max_total_size: usize,
    store: Mutex<HashMap<String, StoredSequence>>,
    default_ttl: Duration,
}

impl StreamingCache {
    /// Create a store bounded at `capacity` sequences, each capped at
    /// `max_total_size` recorded bytes.
    pub fn new(capacity: usize, max_total_size: usize, default_ttl: Duration) -> Self {
        Self {
            capacity,
            max_total_size,
            store: Mutex::new(HashMap::new()),
            default_ttl,
        }
    }

    /// Start a new recording for `key`.
    pub fn recorder(&self, key: impl Into<String>) -> Recorder {
        Recorder {
            key: key.into(),
            max_total_size: self.max_total_size,
            events: Mutex::new(Vec::new()),
            total_size: Mutex::new(0),
            last_event_at: Mutex::new(None),
            dropped: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Atomically install a recorder's events into the store. A recording
    /// with zero events is a no-op (spec §4.5).
    pub fn commit(&self, recorder: Recorder) {
        let events = recorder.events.into_inner();
        if events.is_empty() {
            return;
        }

        let mut store = self.store.lock();
        if !store.contains_key(&recorder.key) && store.len() >= self.capacity {
            Self::evict_earliest_expiry(&mut store);
        }
        store.insert(
            recorder.key,
            StoredSequence {
                events,
                expires_at: Instant::now() + self.default_ttl,
            },
        );
    }

    fn evict_earliest_expiry(store: &mut HashMap<String, StoredSequence>) {
        if let Some(key) = store
            .iter()
            .min_by_key(|(_, seq)| seq.expires_at)
            .map(|(k, _)| k.clone())
        {
            store.remove(&key);
        }
    }

    /// Fetch a copy of the recorded events for `key`, or `None` on miss or
    /// expiry.
    pub fn get(&self, key: &str) -> Option<Vec<StreamEvent>> {
        let mut store = self.store.lock();
        match store.get(key) {
            Some(seq) if Instant::now() > seq.expires_at => {
                store.remove(key);
                None
            }
            Some(seq) => Some(seq.events.clone()),
            None => None,
        }
    }

    /// Replay the events for `key` through `callback`, optionally sleeping
    /// the recorded delay before each one. Returns the callback's error (if
    /// any), aborting the rest of the replay (spec §4.5).
    pub async fn replay<F, Fut, E>(
        &self,
        key: &str,
        preserve_timings: bool,
        mut callback: F,
    ) -> Result<(), E>
    where
        F: FnMut(StreamEvent) -> Fut,
        Fut: std::future::Future<Output = Result<(), E>>,
    {
        let Some(events) = self.get(key) else {
            return Ok(());
        };
        for event in events {
            if preserve_timings && event.delay > Duration::ZERO {
                tokio::time::sleep(event.delay).await;
            }
            callback(event).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_commit_get_round_trips_in_order() {
        let cache = StreamingCache::new(10, 1_000_000, Duration::from_secs(60));
        let rec = cache.recorder("k");
        rec.record_event(b"a".to_vec(), Some("delta".into()), Some("1".into()));
        rec.record_event(b"b".to_vec(), Some("delta".into()), Some("2".into()));
        cache.commit(rec);

        let events = cache.get("k").unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].payload, b"a".to_vec());
        assert_eq!(events[1].payload, b"b".to_vec());
    }

    #[test]
    fn zero_events_commit_is_noop() {
        let cache = StreamingCache::new(10, 1_000_000, Duration::from_secs(60));
        let rec = cache.recorder("k");
        cache.commit(rec);
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn oversized_recording_silently_stops_but_keeps_prior_events() {
        let cache = StreamingCache::new(10, 10, Duration::from_secs(60));
        let rec = cache.recorder("k");
        rec.record_event(vec![0u8; 6], None, None);
        rec.record_event(vec![0u8; 6], None, None); // would exceed cap, dropped
        assert_eq!(rec.len(), 1);
        cache.commit(rec);
        assert_eq!(cache.get("k").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn replay_without_timings_preserves_order() {
        let cache = StreamingCache::new(10, 1_000_000, Duration::from_secs(60));
        let rec = cache.recorder("k");
        rec.record_event(b"a".to_vec(), None, None);
        rec.record_event(b"b".to_vec(), None, None);
        cache.commit(rec);

        let seen = std::sync::Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        cache
            .replay::<_, _, std::convert::Infallible>("k", false, move |event| {
                let seen = seen2.clone();
                async move {
                    seen.lock().push(event.payload);
                    Ok(())
                }
            })
            .await
            .unwrap();

        assert_eq!(*seen.lock(), vec![b"a".to_vec(), b"b".to_vec()]);
    }
}
