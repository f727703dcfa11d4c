//! Real-time tracker (C9): a 60-second circular buffer, running totals, and
//! latency percentiles.
//!
//! `Record` takes a single write lock for the counters path; the latency
//! ring is guarded by a separate lock so writing a latency sample never
//! blocks the counters (spec §5). `Snapshot` copies the latency ring under
//! its lock, releases it, then sorts outside the lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;

const RING_SECONDS: usize = 60;
const LATENCY_RING_SIZE: usize = 1000;

struct Ring {
    requests: [u64; RING_SECONDS],
    tokens: [u64; RING_SECONDS],
    last_second: u64,
}

impl Ring {
    fn new(now_secs: u64) -> Self {
        Self {
            requests: [0; RING_SECONDS],
            tokens: [0; RING_SECONDS],
            last_second: now_secs,
        }
    }

    /// Zero the slots between `last_second` (exclusive) and `now_secs`
    /// (inclusive), clamped to 60 slots (spec §4.9 step b, invariant I4).
    fn advance(&mut self, now_secs: u64) {
        if now_secs <= self.last_second {
            return;
        }
        let elapsed = (now_secs - self.last_second).min(RING_SECONDS as u64);
        for i in 1..=elapsed {
            let slot = ((self.last_second + i) % RING_SECONDS as u64) as usize;
            self.requests[slot] = 0;
            self.tokens[slot] = 0;
        }
        self.last_second = now_secs;
    }
}

struct ModelTotals {
    requests: u64,
    tokens: u64,
}

/// Percentile latencies (milliseconds), satisfying p50 <= p95 <= p99 (P8).
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct Percentiles {
    /// Median latency.
    pub p50: u64,
    /// 95th percentile latency.
    pub p95: u64,
    /// 99th percentile latency.
    pub p99: u64,
}

/// A point-in-time view of the tracker's state (spec §4.9 `Snapshot`).
#[derive(Debug, Clone, serde::Serialize)]
pub struct TrackerSnapshot {
    /// Requests in the last 60 seconds.
    pub rpm: u64,
    /// Tokens in the last 60 seconds.
    pub tpm: u64,
    /// Mean requests/second over the last 10 seconds.
    pub tps: f64,
    /// Total requests recorded since startup.
    pub total_requests: u64,
    /// Total tokens recorded since startup.
    pub total_tokens: u64,
    /// Total successful requests since startup.
    pub total_success: u64,
    /// Total failed requests since startup.
    pub total_failed: u64,
    /// `total_success / total_requests * 100`.
    pub success_rate: f64,
    /// Mean latency across the sampled latency window.
    pub avg_latency_ms: f64,
    /// Median latency.
    pub p50_latency_ms: u64,
    /// 95th percentile latency.
    pub p95_latency_ms: u64,
    /// 99th percentile latency.
    pub p99_latency_ms: u64,
    /// Per-model (requests, tokens) totals.
    pub model_stats: HashMap<String, (u64, u64)>,
}

struct LatencyRing {
    samples: [u64; LATENCY_RING_SIZE],
    next: u64,
}

/// Real-time request/token/latency tracker fed by the audit middleware tap.
pub struct RealtimeTracker {
    ring: RwLock<Ring>,
    latency: RwLock<LatencyRing>,
    total_requests: AtomicU64,
    total_tokens: AtomicU64,
    total_success: AtomicU64,
    total_failed: AtomicU64,
    latency_sum_ms: AtomicU64,
    latency_count: AtomicU64,
    model_totals: RwLock<HashMap<String, ModelTotals>>,
    started_at: std::time::Instant,
}

fn unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs()
}

impl Default for RealtimeTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RealtimeTracker {
    /// Create an empty tracker with all counters zeroed.
    pub fn new() -> Self {
        Self {
            ring: RwLock::new(Ring::new(unix_secs())),
            latency: RwLock::new(LatencyRing {
                samples: [0; LATENCY_RING_SIZE],
                next: 0,
            }),
            total_requests: AtomicU64::new(0),
            total_tokens: AtomicU64::new(0),
            total_success: AtomicU64::new(0),
            total_failed: AtomicU64::new(0),
            latency_sum_ms: AtomicU64::new(0),
            latency_count: AtomicU64::new(0),
            model_totals: RwLock::new(HashMap::new()),
            started_at: std::time::Instant::now(),
        }
    }

    /// Record one completed upstream request (spec §4.9).
    pub fn record(&self, model: &str, tokens: u64, latency_ms: u64, success: bool) {
        let now = unix_secs();
        {
            let mut ring = self.ring.write();
            ring.advance(now);
            let slot = (now % RING_SECONDS as u64) as usize;
            ring.requests[slot] += 1;
            ring.tokens[slot] += tokens;
        }

        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_tokens.fetch_add(tokens, Ordering::Relaxed);
        if success {
            self.total_success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.total_failed.fetch_add(1, Ordering::Relaxed);
        }

        {
            let mut models = self.model_totals.write();
            let entry = models.entry(model.to_string()).or_insert(ModelTotals {
                requests: 0,
                tokens: 0,
            });
            entry.requests += 1;
            entry.tokens += tokens;
        }

        {
            let mut latency = self.latency.write();
            let idx = (latency.next % LATENCY_RING_SIZE as u64) as usize;
            latency.samples[idx] = latency_ms;
            latency.next += 1;
        }
        self.latency_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.latency_count.fetch_add(1, Ordering::Relaxed);
    }

    fn percentiles(&self) -> Percentiles {
        let mut values: Vec<u64> = {
            let latency = self.latency.read();
            let n = latency.next.min(LATENCY_RING_SIZE as u64) as usize;
            latency.samples[..n].to_vec()
        };
        if values.is_empty() {
            return Percentiles::default();
        }
        values.sort_unstable();
        let n = values.len();
        let idx = |q: f64| ((n as f64 * q).ceil() as usize).saturating_sub(1).min(n - 1);
        Percentiles {
            p50: values[idx(0.50)],
            p95: values[idx(0.95)],
            p99: values[idx(0.99)],
        }
    }

    /// Build a point-in-time snapshot (spec §4.9).
    pub fn snapshot(&self) -> TrackerSnapshot {
        let (rpm, tpm, tps) = {
            let ring = self.ring.read();
            let rpm: u64 = ring.requests.iter().sum();
            let tpm: u64 = ring.tokens.iter().sum();
            let now = unix_secs();
            let tps = (0..10)
                .map(|i| {
                    let slot = ((now.saturating_sub(i)) % RING_SECONDS as u64) as usize;
                    ring.requests[slot]
                })
                .sum::<u64>() as f64
                / 10.0;
            (rpm, tpm, tps)
        };

        let percentiles = self.percentiles();
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let total_success = self.total_success.load(Ordering::Relaxed);
        let latency_count = self.latency_count.load(Ordering::Relaxed);
        let latency_sum = self.latency_sum_ms.load(Ordering::Relaxed);

        let model_stats = self
            .model_totals
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), (v.requests, v.tokens)))
            .collect();

        TrackerSnapshot {
            rpm,
            tpm,
            tps,
            total_requests,
            total_tokens: self.total_tokens.load(Ordering::Relaxed),
            total_success,
            total_failed: self.total_failed.load(Ordering::Relaxed),
            success_rate: total_success as f64 / total_requests.max(1) as f64 * 100.0,
            avg_latency_ms: latency_sum as f64 / latency_count.max(1) as f64,
            p50_latency_ms: percentiles.p50,
            p95_latency_ms: percentiles.p95,
            p99_latency_ms: percentiles.p99,
            model_stats,
        }
    }

    /// Seconds elapsed since this tracker was constructed.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentiles_from_sequential_latencies() {
        // Scenario 4 from spec §8.
        let tracker = RealtimeTracker::new();
        for i in 1..=100u64 {
            tracker.record("m", 1, i, true);
        }
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.p50_latency_ms, 50);
        assert_eq!(snapshot.p95_latency_ms, 95);
        assert_eq!(snapshot.p99_latency_ms, 99);
    }

    #[test]
    fn percentile_monotonicity_holds() {
        let tracker = RealtimeTracker::new();
        for i in 1..=37u64 {
            tracker.record("m", 1, i * 3, true);
        }
        let snapshot = tracker.snapshot();
        assert!(snapshot.p50_latency_ms <= snapshot.p95_latency_ms);
        assert!(snapshot.p95_latency_ms <= snapshot.p99_latency_ms);
    }

    #[test]
    fn success_rate_and_model_stats() {
        let tracker = RealtimeTracker::new();
        tracker.record("gpt-4", 100, 10, true);
        tracker.record("gpt-4", 50, 20, false);
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.success_rate, 50.0);
        assert_eq!(snapshot.model_stats.get("gpt-4"), Some(&(2, 150)));
    }

    #[test]
    fn ring_sum_equals_requests_in_last_60_seconds() {
        // P7, synthetically: record, then manually advance the ring and
        // confirm the window resets rather than accumulating forever.
        let tracker = RealtimeTracker::new();
        for _ in 0..5 {
            tracker.record("m", 1, 1, true);
        }
        {
            let mut ring = tracker.ring.write();
            let future = unix_secs() + 61;
            ring.advance(future);
        }
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.rpm, 0);
    }
}
